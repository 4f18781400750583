use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "meetbot")]
#[command(about = "Unattended meeting recorder", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Join a meeting, record it and upload the artifacts
    Join(JoinArgs),
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug, Default)]
pub struct JoinArgs {
    /// Meeting join link
    pub meeting_link: String,
    /// Display name shown to the other participants
    #[arg(short, long)]
    pub name: Option<String>,
    /// Minimum recording time in seconds
    #[arg(long)]
    pub min_record_secs: Option<u64>,
    /// Maximum time to wait for admission in seconds
    #[arg(long)]
    pub max_wait_secs: Option<u64>,
    /// Pre-signed URL for the combined tar bundle
    #[arg(long)]
    pub combined_url: Option<String>,
    /// Pre-signed URL for the raw audio file
    #[arg(long)]
    pub audio_url: Option<String>,
    /// Directory for the recording, transcript and bundle
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// WebDriver endpoint (e.g. a running chromedriver)
    #[arg(long)]
    pub webdriver_url: Option<String>,
    /// Config file to use instead of the default location
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
