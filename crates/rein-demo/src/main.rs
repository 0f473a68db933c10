#![forbid(unsafe_code)]

//! Rein demo binary entry point.

use rein_demo::cli::Opts;
use rein_demo::session;
use rein_demo::store::PhraseStore;
use rein_demo::view::TextView;
use std::io;
use tracing_subscriber::EnvFilter;

fn main() {
    let opts = Opts::parse_args();

    let default_level = if opts.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let store = PhraseStore::seeded(opts.seed);
    let (view, _frames) = TextView::echo(io::stdout());

    let report = match session::run(&opts, &store, view) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Session failed: {e}");
            std::process::exit(1);
        }
    };

    if opts.history_json {
        if let Err(e) = report.traveller.write_console_jsonl(io::stdout().lock()) {
            eprintln!("Failed to write history: {e}");
            std::process::exit(1);
        }
    }
}
