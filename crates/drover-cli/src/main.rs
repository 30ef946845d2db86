//! `drover` command-line tool

mod commands;
mod config;

use clap::Parser;

use drover_pipeline::SealOutcome;

use crate::config::{Cli, Command, DroverConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = DroverConfig::load(cli.config.as_deref())?;
    config.apply_cli_overrides(&cli);

    let _log_guard = drover_logging::init(config.log.clone())?;

    match &cli.command {
        Command::Record { owner, events } => {
            let registry = commands::build_registry(&config)?;
            let recorded = commands::record(&registry, owner, events).await?;
            println!("Recorded {} event(s) for {}", recorded, owner);
        }

        Command::Flush { owner } => {
            let registry = commands::build_registry(&config)?;
            let summary = commands::flush(&registry, owner).await?;
            match &summary.seal {
                SealOutcome::Sealed(file) => println!("Sealed {}", file.name),
                SealOutcome::Empty => println!("Working file empty, nothing sealed"),
            }
            let delivery = &summary.delivery;
            println!(
                "Delivery: {} batch(es), {} file(s) sent, {} evicted, {} of {} pass(es) failed",
                delivery.batches_attempted,
                delivery.files_sent,
                delivery.files_evicted,
                delivery.failed_passes,
                delivery.passes,
            );
            println!("{}", serde_json::to_string_pretty(&summary.status)?);
        }

        Command::Status { owner } => {
            let registry = commands::build_registry(&config)?;
            let status = commands::status(&registry, owner).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }

        Command::Inspect { file } => {
            let max_element_size = config.pipeline.log.max_element_size;
            for line in commands::inspect(file, max_element_size).await? {
                println!("{}", line);
            }
        }

        Command::Disable { owner } => {
            let registry = commands::build_registry(&config)?;
            commands::disable(&registry, owner).await?;
            println!("Deleted local event files for {}", owner);
        }
    }

    Ok(())
}
