// src/commands/mod.rs

pub mod run;

use anyhow::Result;
use colored::*;
use credsweep::ServiceRegistry;

use crate::cli::Cli;

pub async fn handle(cli_args: &Cli) -> Result<()> {
    let registry = ServiceRegistry::builtin();
    if cli_args.list_services {
        list_services(&registry);
        return Ok(());
    }
    run::run_job(cli_args, registry).await
}

pub fn list_services(registry: &ServiceRegistry) {
    println!("{}", "Available services:".bold());
    for name in registry.names() {
        let port = registry.default_port(name).unwrap_or_default();
        println!("  {:<14} {}", name.cyan(), port);
    }
}
