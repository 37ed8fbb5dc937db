use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use inquire::{Confirm, CustomType, Select, Text};
use mcp_weather_core::{
    CandidateSet, Config, Location, ServerProcess, UnitSystem, protocol::serve_stdio,
    provider::provider_from_config,
};
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{render, watch};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "mcp-weather",
    version,
    about = "Weather lookup tool server and terminal client"
)]
pub struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "mcp_weather_core=trace". Overrides RUST_LOG.
    #[arg(long, global = true)]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the tool server on stdin/stdout.
    Serve {
        /// Announce readiness without probing Open-Meteo first.
        #[arg(long)]
        skip_self_check: bool,
    },

    /// List places matching a name.
    Search {
        /// Place name, e.g. "Montevideo".
        query: String,
    },

    /// Show current weather and the next 24 hours for a place.
    Show {
        query: String,

        /// "metric" or "imperial"; defaults to the configured unit.
        #[arg(long)]
        unit: Option<UnitSystem>,

        /// Pick the Nth match (1-based) instead of prompting.
        #[arg(long)]
        pick: Option<usize>,
    },

    /// Keep the weather for a place on screen, refreshing periodically.
    Watch {
        query: String,

        #[arg(long)]
        unit: Option<UnitSystem>,

        #[arg(long)]
        pick: Option<usize>,

        /// Refresh interval in seconds; defaults to the configured interval.
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Edit the configuration file interactively.
    Configure,
}

impl Cli {
    /// Log to stderr only: stdout carries protocol frames or rendered output.
    pub fn init_tracing(&self) {
        let default = match self.command {
            Command::Serve { .. } => "info",
            _ => "warn",
        };
        let filter = match &self.log {
            Some(directive) => EnvFilter::try_new(directive).ok(),
            None => EnvFilter::try_from_default_env().ok(),
        }
        .unwrap_or_else(|| EnvFilter::new(default));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let config = load_config(self.config.as_deref())?;

        match self.command {
            Command::Serve { skip_self_check } => {
                let provider = provider_from_config(&config.provider)
                    .context("Failed to build the Open-Meteo client")?;
                let self_check = config.server.self_check && !skip_self_check;
                serve_stdio(provider.clone(), provider, self_check)
                    .await
                    .context("Tool server stopped")?;
            }
            Command::Search { query } => {
                let server = start_server(self.config.as_deref(), self.log.as_deref(), &config).await?;
                let found = server.client().search_city(&query).await;
                server.shutdown().await;
                print!("{}", render::candidates(&found?));
            }
            Command::Show { query, unit, pick } => {
                let unit = unit.unwrap_or(config.refresh.default_unit);
                let server = start_server(self.config.as_deref(), self.log.as_deref(), &config).await?;
                let outcome = async {
                    let location = choose_location(&server, &query, pick).await?;
                    let snapshot = server.client().get_weather(&location, unit).await?;
                    anyhow::Ok(snapshot)
                }
                .await;
                server.shutdown().await;
                print!("{}", render::snapshot(&outcome?));
            }
            Command::Watch {
                query,
                unit,
                pick,
                interval,
            } => {
                let unit = unit.unwrap_or(config.refresh.default_unit);
                let mut refresh = config.refresh.refresh_config();
                if let Some(secs) = interval {
                    if secs == 0 {
                        bail!("--interval must be at least 1 second");
                    }
                    refresh.interval = std::time::Duration::from_secs(secs);
                }

                let server = start_server(self.config.as_deref(), self.log.as_deref(), &config).await?;
                let location = match choose_location(&server, &query, pick).await {
                    Ok(location) => location,
                    Err(err) => {
                        server.shutdown().await;
                        return Err(err);
                    }
                };
                watch::run(server, location, unit, refresh).await?;
            }
            Command::Configure => configure(self.config.as_deref(), config)?,
        }

        Ok(())
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

/// Spawn this executable as `serve` and wait for it to become ready.
async fn start_server(
    config_path: Option<&Path>,
    log: Option<&str>,
    config: &Config,
) -> anyhow::Result<ServerProcess> {
    let exe = std::env::current_exe().context("Failed to locate the mcp-weather executable")?;

    let mut args: Vec<OsString> = Vec::new();
    if let Some(path) = config_path {
        args.push("--config".into());
        args.push(path.into());
    }
    args.push("--log".into());
    args.push(log.unwrap_or("warn").into());
    args.push("serve".into());

    let server = ServerProcess::spawn(
        exe.as_os_str(),
        args,
        config.server.readiness_timeout(),
        config.server.request_timeout(),
    )
    .await
    .context("Failed to start the weather tool server")?;

    let tools = server
        .client()
        .list_tools()
        .await
        .context("Tool server did not answer list_tools")?;
    debug!(count = tools.len(), "tool server warmed up");

    Ok(server)
}

/// Display wrapper for the candidate prompt.
struct Choice(Location);

impl std::fmt::Display for Choice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({:.2}, {:.2})",
            self.0.label(),
            self.0.latitude,
            self.0.longitude
        )
    }
}

async fn choose_location(
    server: &ServerProcess,
    query: &str,
    pick: Option<usize>,
) -> anyhow::Result<Location> {
    let candidates: CandidateSet = server.client().search_city(query).await?;
    if candidates.is_empty() {
        bail!("No places match '{query}'");
    }

    if let Some(n) = pick {
        return n
            .checked_sub(1)
            .and_then(|i| candidates.get(i))
            .cloned()
            .with_context(|| format!("--pick {n} is out of range (1..={})", candidates.len()));
    }

    if candidates.len() == 1 {
        return candidates
            .get(0)
            .cloned()
            .context("candidate list changed unexpectedly");
    }

    let options: Vec<Choice> = candidates.iter().cloned().map(Choice).collect();
    let Choice(location) = Select::new("Several places match; pick one:", options)
        .prompt()
        .context("No place selected (use --pick N when not running interactively)")?;
    Ok(location)
}

fn configure(path: Option<&Path>, mut config: Config) -> anyhow::Result<()> {
    config.provider.language = Text::new("Language for place names:")
        .with_default(&config.provider.language)
        .prompt()?;

    config.provider.max_results = CustomType::<u8>::new("Matches per search (1-100):")
        .with_default(config.provider.max_results)
        .prompt()?;

    config.refresh.interval_secs = CustomType::<u64>::new("Auto-refresh interval in seconds:")
        .with_default(config.refresh.interval_secs)
        .prompt()?;

    let units = UnitSystem::all().to_vec();
    let cursor = units
        .iter()
        .position(|u| *u == config.refresh.default_unit)
        .unwrap_or(0);
    config.refresh.default_unit = Select::new("Default unit system:", units)
        .with_starting_cursor(cursor)
        .prompt()?;

    config.server.self_check = Confirm::new("Check that Open-Meteo is reachable before serving?")
        .with_default(config.server.self_check)
        .prompt()?;

    let saved_to = match path {
        Some(path) => {
            config.save_to(path)?;
            path.to_path_buf()
        }
        None => config.save()?,
    };
    println!("Configuration saved to {}", saved_to.display());
    Ok(())
}
