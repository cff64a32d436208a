use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

mod args;
mod commands;
mod output;

use args::Cli;
use commands::Context;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    macspoof_core::telemetry::init_tracing("macspoof", cli.verbose > 0)?;

    let mut ctx = Context::load(&cli)?;
    let succeeded = commands::run(cli.command, &mut ctx).await?;

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
