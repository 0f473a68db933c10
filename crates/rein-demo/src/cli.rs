#![forbid(unsafe_code)]

//! Command-line options for the history demo.

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "rein-demo")]
#[command(about = "Drive the phrase history screen through a scripted session", long_about = None)]
pub struct Opts {
    /// Show the favorites screen instead of the full history
    #[arg(long)]
    pub favorites: bool,

    /// Number of sample phrases to seed the store with
    #[arg(long, default_value_t = 12)]
    pub seed: usize,

    /// Command worker threads (default: REIN_WORKER_THREADS or one thread per command)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Search queries to type, in order
    #[arg(long = "filter", value_name = "TEXT")]
    pub filters: Vec<String>,

    /// Clear the history at the end of the session
    #[arg(long)]
    pub clear: bool,

    /// Replay every recorded state after the session
    #[arg(long)]
    pub replay: bool,

    /// Print the recorded history as JSON lines
    #[arg(long)]
    pub history_json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Opts {
    /// Parse options from the process arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
