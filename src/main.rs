use anyhow::Result;
use clap::{CommandFactory, Parser};
use meetbot::{
    app,
    cli::{Cli, CliCommand},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Some(CliCommand::Version) => {
            println!("meetbot {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(CliCommand::Join(args)) => {
            let outcome = app::run_session(args).await?;
            info!(
                "Session {} finished ({}), recorded: {}",
                outcome.id,
                outcome.reason,
                outcome.recorded()
            );
            if let Some(report) = &outcome.report {
                info!("Bundle upload: {:?}, audio upload: {:?}", report.bundle, report.audio);
            }
            Ok(())
        }
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}
