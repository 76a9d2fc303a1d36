pub mod toml_config;

#[cfg(feature = "cli")]
use clap::Parser;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "frs-notifier")]
#[command(about = "Feedback Request Service: notifies subscribers about new RfCs and GA nominations")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "frs.toml")]
    pub config: String,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Log what would be sent without editing the wiki or writing runfiles
    #[arg(long)]
    pub dry_run: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}
