//! Open-Meteo geocoding and forecast client.
//!
//! Both endpoints are keyless JSON APIs. Every public operation issues exactly
//! one HTTP request and maps the outcome onto the [`WeatherError`] taxonomy:
//! transport trouble, rate limiting and 5xx become `UpstreamUnavailable`;
//! other HTTP failures and undecodable bodies become `UpstreamProtocol`;
//! decodable bodies with the wrong forecast shape become `UpstreamDataShape`.

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, TimeDelta, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::{debug, info, instrument};

use crate::{
    CandidateSet, Coordinates, CurrentWeather, FORECAST_HOURS, Forecast, ForecastPoint, Location,
    SearchQuery, UnitSystem, WeatherError, WeatherSnapshot, config::ProviderConfig,
};

use super::{Geocoder, WeatherFetcher};

const CURRENT_FIELDS: &str = "temperature_2m,wind_speed_10m";
const HOURLY_FIELDS: &str = "temperature_2m,wind_speed_10m,precipitation";

/// Probe target for health checks.
const PROBE_PLACE: &str = "Berlin";
const PROBE_LATITUDE: f64 = 52.52;
const PROBE_LONGITUDE: f64 = 13.41;

#[derive(Debug, Clone)]
pub struct OpenMeteoProvider {
    http: Client,
    config: ProviderConfig,
}

impl OpenMeteoProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, WeatherError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("mcp-weather/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                WeatherError::UpstreamUnavailable(format!("failed to initialise HTTP client: {e}"))
            })?;

        Ok(Self { http, config })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<T, WeatherError> {
        debug!(url, what, "sending Open-Meteo request");

        let res = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WeatherError::UpstreamUnavailable(format!("{what} request timed out"))
                } else {
                    WeatherError::UpstreamUnavailable(format!("could not reach Open-Meteo ({what}): {e}"))
                }
            })?;

        let status = res.status();
        let body = res.text().await.map_err(|e| {
            WeatherError::UpstreamUnavailable(format!("failed to read {what} response body: {e}"))
        })?;

        if !status.is_success() {
            return Err(classify_status(status, &body, what));
        }

        serde_json::from_str(&body).map_err(|e| {
            WeatherError::UpstreamProtocol(format!(
                "failed to parse {what} JSON: {e} (body: {})",
                truncate_body(&body)
            ))
        })
    }

    async fn geocode(&self, name: &str, count: u8) -> Result<CandidateSet, WeatherError> {
        let query = [
            ("name", name.to_string()),
            ("count", count.to_string()),
            ("language", self.config.language.clone()),
            ("format", "json".to_string()),
        ];

        let parsed: GeoResponse = self
            .get_json(&self.config.geocoding_url, &query, "geocoding")
            .await?;

        Ok(candidates_from(parsed))
    }

    async fn forecast(&self, location: &Location) -> Result<WeatherSnapshot, WeatherError> {
        let query = [
            ("latitude", location.latitude.to_string()),
            ("longitude", location.longitude.to_string()),
            ("current", CURRENT_FIELDS.to_string()),
            ("hourly", HOURLY_FIELDS.to_string()),
            ("forecast_hours", FORECAST_HOURS.to_string()),
            ("timezone", "GMT".to_string()),
            ("temperature_unit", "celsius".to_string()),
            ("wind_speed_unit", "kmh".to_string()),
            ("precipitation_unit", "mm".to_string()),
        ];

        let parsed: ForecastResponse = self
            .get_json(&self.config.forecast_url, &query, "forecast")
            .await?;

        snapshot_from(location.clone(), parsed, Utc::now())
    }
}

#[async_trait]
impl Geocoder for OpenMeteoProvider {
    #[instrument(skip(self, query), fields(query = %query))]
    async fn search(&self, query: &SearchQuery) -> Result<CandidateSet, WeatherError> {
        let candidates = self.geocode(query.as_str(), self.config.max_results).await?;

        if candidates.is_empty() {
            info!("geocoding returned no matches");
        } else {
            debug!(count = candidates.len(), "geocoding matches");
        }

        Ok(candidates)
    }

    async fn health_check(&self) -> Result<(), WeatherError> {
        self.geocode(PROBE_PLACE, 1).await.map(|_| ())
    }
}

#[async_trait]
impl WeatherFetcher for OpenMeteoProvider {
    #[instrument(skip(self, location), fields(lat = %location.latitude, lon = %location.longitude))]
    async fn fetch(&self, location: &Location) -> Result<WeatherSnapshot, WeatherError> {
        self.forecast(location).await
    }

    async fn health_check(&self) -> Result<(), WeatherError> {
        let probe = Location::from_coordinates(Coordinates {
            latitude: PROBE_LATITUDE,
            longitude: PROBE_LONGITUDE,
        });
        self.forecast(&probe).await.map(|_| ())
    }
}

#[derive(Debug, Deserialize)]
struct GeoResponse {
    #[serde(default)]
    results: Option<Vec<GeoResult>>,
}

#[derive(Debug, Deserialize)]
struct GeoResult {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    admin1: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    time: String,
    temperature_2m: Option<f64>,
    wind_speed_10m: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<String>,
    temperature_2m: Vec<Option<f64>>,
    wind_speed_10m: Vec<Option<f64>>,
    precipitation: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: CurrentBlock,
    hourly: HourlyBlock,
}

/// Provider order is kept; entries without usable coordinates are dropped.
fn candidates_from(response: GeoResponse) -> CandidateSet {
    let locations = response
        .results
        .unwrap_or_default()
        .into_iter()
        .filter_map(|r| {
            let coordinates = Coordinates::new(r.latitude?, r.longitude?).ok()?;

            let display_name = r
                .name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "Unnamed".to_string());

            let country = r
                .country
                .filter(|c| !c.is_empty())
                .or(r.country_code.filter(|c| !c.is_empty()))
                .unwrap_or_else(|| "Unknown".to_string());

            Some(Location {
                display_name,
                country,
                admin_region: r.admin1.filter(|a| !a.is_empty()),
                latitude: coordinates.latitude,
                longitude: coordinates.longitude,
            })
        })
        .collect();

    CandidateSet::new(locations)
}

fn snapshot_from(
    location: Location,
    response: ForecastResponse,
    fetched_at: DateTime<Utc>,
) -> Result<WeatherSnapshot, WeatherError> {
    let current_time = parse_datetime(&response.current.time)?;
    let current = CurrentWeather {
        timestamp: current_time,
        temperature: response.current.temperature_2m.ok_or_else(|| {
            WeatherError::UpstreamDataShape("current temperature is missing".to_string())
        })?,
        wind_speed: response.current.wind_speed_10m.ok_or_else(|| {
            WeatherError::UpstreamDataShape("current wind speed is missing".to_string())
        })?,
        unit_system: UnitSystem::Metric,
    };

    let hourly = response.hourly;
    let n = hourly.time.len();
    if hourly.temperature_2m.len() != n
        || hourly.wind_speed_10m.len() != n
        || hourly.precipitation.len() != n
    {
        return Err(WeatherError::UpstreamDataShape(format!(
            "hourly series have mismatched lengths (time {n}, temperature {}, wind {}, precipitation {})",
            hourly.temperature_2m.len(),
            hourly.wind_speed_10m.len(),
            hourly.precipitation.len(),
        )));
    }

    let mut points = Vec::with_capacity(n);
    for (i, time) in hourly.time.iter().enumerate() {
        let value = |series: &[Option<f64>], name: &str| {
            series[i].ok_or_else(|| {
                WeatherError::UpstreamDataShape(format!("hourly {name} at {time} is null"))
            })
        };

        points.push(ForecastPoint {
            timestamp: parse_datetime(time)?,
            temperature: value(&hourly.temperature_2m, "temperature")?,
            wind_speed: value(&hourly.wind_speed_10m, "wind speed")?,
            precipitation: value(&hourly.precipitation, "precipitation")?,
        });
    }

    let forecast = Forecast::new(points)?;

    let current_hour = current_time
        .duration_trunc(TimeDelta::hours(1))
        .map_err(|e| WeatherError::UpstreamDataShape(format!("invalid current time: {e}")))?;
    if forecast.first().timestamp < current_hour {
        return Err(WeatherError::UpstreamDataShape(format!(
            "forecast starts at {} which is before the current hour {current_hour}",
            forecast.first().timestamp
        )));
    }

    Ok(WeatherSnapshot {
        location,
        current,
        forecast,
        fetched_at,
        unit_system: UnitSystem::Metric,
    })
}

fn classify_status(status: StatusCode, body: &str, what: &str) -> WeatherError {
    let reason = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.reason)
        .unwrap_or_else(|| truncate_body(body));

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        WeatherError::UpstreamUnavailable(format!("{what} request failed with status {status}: {reason}"))
    } else {
        WeatherError::UpstreamProtocol(format!("{what} request failed with status {status}: {reason}"))
    }
}

/// Timestamps come back in GMT, without an offset.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, WeatherError> {
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M") {
        return Ok(Utc.from_utc_datetime(&dt));
    }

    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&dt));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    Err(WeatherError::UpstreamProtocol(format!("invalid timestamp: {s}")))
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
