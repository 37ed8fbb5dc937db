//! Interactive auto-refresh loop for `watch`.

use anyhow::Context;
use mcp_weather_core::{
    Location, RefreshConfig, RefreshScheduler, SchedulerEvent, ServerProcess, UnitSystem,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::render;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchCommand {
    Unit(UnitSystem),
    Quit,
}

fn parse_command(line: &str) -> Option<WatchCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "q" | "quit" | "stop" | "exit" => Some(WatchCommand::Quit),
        other => other.parse().ok().map(WatchCommand::Unit),
    }
}

pub async fn run(
    server: ServerProcess,
    location: Location,
    unit: UnitSystem,
    refresh: RefreshConfig,
) -> anyhow::Result<()> {
    let (mut scheduler, mut events) = RefreshScheduler::new(server.client(), refresh);
    scheduler
        .select(location.clone(), unit)
        .context("Failed to start auto-refresh")?;

    println!(
        "Watching {} every {}s. Type 'metric', 'imperial' or 'quit'.",
        location.label(),
        refresh.interval.as_secs()
    );

    let mut commands = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match &event {
                    SchedulerEvent::SnapshotUpdated(snapshot) => {
                        println!();
                        print!("{}", render::snapshot(snapshot));
                    }
                    other => {
                        if let Some(line) = render::status(other) {
                            println!("{line}");
                        }
                    }
                }
            }
            line = commands.next_line(), if stdin_open => {
                match line.context("Failed to read from stdin")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match parse_command(&line) {
                        Some(WatchCommand::Quit) => break,
                        Some(WatchCommand::Unit(unit)) => {
                            scheduler.change_unit(unit)?;
                        }
                        None => println!("Unknown command '{}'. Use metric, imperial or quit.", line.trim()),
                    },
                    None => {
                        debug!("stdin closed; watching until interrupted");
                        stdin_open = false;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    scheduler.stop();
    drop(scheduler);
    server.shutdown().await;
    Ok(())
}
