use anyhow::Result;
use clap::Parser;
use colored::*;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = cli::Cli::parse();
    credsweep::logging::init(cli_args.debug);

    match commands::handle(&cli_args).await {
        Ok(()) => Ok(()),
        Err(e) => match e.downcast_ref::<credsweep::Error>() {
            // Input errors: one red line, status 2.
            Some(err) if err.is_input_error() => {
                eprintln!("{}", err.to_string().red());
                std::process::exit(2);
            }
            _ => Err(e),
        },
    }
}
