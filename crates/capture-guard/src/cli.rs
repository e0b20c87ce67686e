use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "capture-guard",
    version,
    about = "Body capture and request-blocking policy harness"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Policy service base URL (overrides config file setting)
    #[arg(long)]
    pub policy_endpoint: Option<String>,

    /// Bearer token for the policy service
    #[arg(long, env = "CAPTURE_GUARD_POLICY_TOKEN", hide_env_values = true)]
    pub policy_token: Option<String>,

    /// Span log path (overrides config file setting)
    #[arg(long)]
    pub span_log: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate one request offline and print the outcome as JSON
    Check {
        /// Request headers as a JSON object
        #[arg(long)]
        headers: String,

        /// File holding the request body
        #[arg(long)]
        body: Option<PathBuf>,

        /// Content-Type of the body (overrides the headers)
        #[arg(long)]
        content_type: Option<String>,

        /// Local policy snapshot (JSON) instead of an empty one
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Read NDJSON requests from stdin with the policy poller running and
    /// write one NDJSON outcome per request to stdout
    Replay,
}
