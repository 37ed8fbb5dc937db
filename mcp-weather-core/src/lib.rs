//! Core library for the `mcp-weather` tool server and its clients.
//!
//! This crate defines:
//! - Shared domain models (locations, snapshots, the 24-hour forecast)
//! - Metric/imperial conversion
//! - The Open-Meteo geocoder and forecast fetcher
//! - The line-delimited JSON tool protocol, server and client side
//! - The auto-refresh scheduler used by interactive front ends
//!
//! It is used by `mcp-weather-cli`, but can also be embedded by other hosts
//! that want to speak the tool protocol.

pub mod config;
pub mod error;
pub mod model;
pub mod protocol;
pub mod provider;
pub mod scheduler;
pub mod units;

pub use config::{Config, ProviderConfig, RefreshSettings, ServerConfig};
pub use error::{ErrorKind, WeatherError};
pub use model::{
    CandidateSet, Coordinates, CurrentWeather, FORECAST_HOURS, Forecast, ForecastPoint, Location,
    SearchQuery, WeatherSnapshot,
};
pub use protocol::{ServerProcess, ToolCall, ToolClient, ToolServer};
pub use provider::{Geocoder, OpenMeteoProvider, WeatherFetcher};
pub use scheduler::{
    RefreshConfig, RefreshScheduler, RetryPolicy, SchedulerError, SchedulerEvent, SchedulerState,
    WeatherTool,
};
pub use units::{Measurement, UnitSystem};
