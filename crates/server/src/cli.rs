use clap::{Parser, Subcommand};

/// Hospitality assistant gateway.
///
/// Serves the chat endpoint that drives the reasoning backend and tool
/// calls under the admission gate and output filter.
#[derive(Parser, Debug)]
#[command(name = "concierge", version, about = "Hospitality assistant gateway")]
pub struct CliArgs {
    /// Configuration profile (overrides CONCIERGE_PROFILE)
    #[arg(long, env = "CONCIERGE_PROFILE", default_value = "")]
    pub profile: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start the HTTP server (default)
    Serve,
    /// Print the effective configuration with secrets removed
    Config,
}
