use anyhow::Result;
use colored::*;
use std::sync::Arc;
use std::time::Duration;

use credsweep::input::{read_combo_lines, read_list};
use credsweep::{Job, JobConfig, ServiceRegistry, StatsSnapshot, Task, TaskBuilder};

use crate::cli::Cli;

/// Folds inline values and list files from the command line into a builder.
pub fn task_builder(cli: &Cli) -> Result<TaskBuilder> {
    let mut builder = TaskBuilder::new()
        .services(cli.services.iter().cloned())
        .usernames(cli.usernames.iter().cloned())
        .secrets(cli.secrets.iter().cloned())
        .targets(cli.targets.iter().cloned())
        .ports(cli.ports.iter().cloned())
        .combo_delimiter(cli.combo_delimiter.as_str());

    if let Some(path) = &cli.services_file {
        builder = builder.services(read_list(path)?);
    }
    if let Some(path) = &cli.usernames_file {
        builder = builder.usernames(read_list(path)?);
    }
    if let Some(path) = &cli.secrets_file {
        builder = builder.secrets(read_list(path)?);
    }
    if let Some(path) = &cli.targets_file {
        builder = builder.targets(read_list(path)?);
    }
    if let Some(path) = &cli.ports_file {
        builder = builder.ports(read_list(path)?);
    }
    if let Some(path) = &cli.combo_file {
        builder = builder.combo_lines(read_combo_lines(path)?);
    }
    for spec in &cli.options {
        builder = builder.option_spec(spec.as_str());
    }
    if let Some(uri) = &cli.uri {
        builder = builder.uri(uri.as_str());
    }
    Ok(builder)
}

pub fn job_config(cli: &Cli) -> Result<JobConfig> {
    let config = JobConfig::new()
        .with_workers(cli.threads)
        .with_failure_ceiling(cli.failed_number)
        .with_timeout(Duration::from_secs(cli.timeout))
        .with_pacing(cli.time_wait, cli.time_randomize)
        .with_first_match_abort(cli.first_match)
        .with_watch_failures(!cli.disable_failures)
        .with_retry_on_failure(!cli.no_retry)
        .with_randomized_order(cli.randomize_order)
        .with_stats(cli.stats, Duration::from_secs(cli.stats_interval))
        .with_output_file(cli.output.clone());
    config.validate()?;
    Ok(config)
}

pub async fn run_job(cli: &Cli, registry: ServiceRegistry) -> Result<()> {
    let config = job_config(cli)?;
    let tasks: Vec<Task> = task_builder(cli)?.build(&registry)?;

    println!("{}", "=== credsweep ===".bold());
    println!("[*] Tasks: {}", tasks.len());
    println!("[*] Workers: {}", config.worker_count);
    if let Some(path) = &config.output_file {
        println!("[*] Appending matches to '{}'", path.display());
    }

    let job = Job::new(config, Arc::new(registry));
    job.start(tasks).await?;

    print_report(&job.output().await, job.stats());
    if job.config().watch_failures {
        for identity in job.ledger().exhausted(job.config().failure_ceiling).await {
            let line = format!("[!] Gave up on {} after repeated connection failures", identity);
            println!("{}", line.yellow());
        }
    }
    Ok(())
}

fn print_report(output: &[String], stats: StatsSnapshot) {
    if output.is_empty() {
        println!("\n{}", "[-] No credentials discovered".yellow());
    } else {
        println!("\n{}", "[+] Valid credentials:".green().bold());
        for line in output {
            println!("     {}", line);
        }
    }
    println!(
        "[*] Attempts: {} | Failed connections: {} | Ignored: {} | Retried: {}",
        stats.attempts, stats.failed, stats.ignored, stats.retried
    );
}
