//! Ferrule CLI — developer tool and version manager.

use clap::Parser;
use ferrule::cli::Cli;
use tracing_subscriber::EnvFilter;

fn init_tracing(quiet: bool, verbose: u8) {
    let default = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    let filter = EnvFilter::try_from_env("FERRULE_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);
    if let Err(e) = ferrule::cli::dispatch(cli.command, cli.quiet) {
        eprintln!("error: {}", e);
        if let Some(hint) = e.hint() {
            eprintln!("hint: {}", hint);
        }
        std::process::exit(e.exit_code());
    }
}
