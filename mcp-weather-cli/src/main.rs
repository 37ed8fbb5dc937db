//! Binary crate for the `mcp-weather` command-line tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Running the tool server, or spawning it and driving it as a client
//! - Interactive configuration
//! - Human-friendly output formatting

use clap::Parser;

mod cli;
mod render;
mod watch;

#[tokio::main]
async fn main() {
    let cmd = cli::Cli::parse();
    cmd.init_tracing();

    let code = match cmd.run().await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {err:#}");
            1
        }
    };

    // Tokio's stdin reader may be parked in a blocking read that cannot be
    // cancelled; exiting here keeps runtime shutdown from waiting on it.
    std::process::exit(code);
}
