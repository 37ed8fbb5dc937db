use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WeatherError;
use crate::units::{Measurement, UnitSystem, convert};

/// Number of hourly points every forecast carries.
pub const FORECAST_HOURS: usize = 24;

/// Geocoding results are given to five decimals; identity compares at that precision.
const COORDINATE_SCALE: f64 = 100_000.0;

/// A free-text place query, guaranteed non-empty after trimming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery(String);

impl SearchQuery {
    pub fn new(raw: &str) -> Result<Self, WeatherError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(WeatherError::InvalidRequest(
                "the 'query' argument must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Validated constructor: latitude in [-90, 90], longitude in [-180, 180].
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, WeatherError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(WeatherError::InvalidRequest(format!(
                "latitude {latitude} is out of range (-90 to 90)"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(WeatherError::InvalidRequest(format!(
                "longitude {longitude} is out of range (-180 to 180)"
            )));
        }
        Ok(Self { latitude, longitude })
    }

    /// Identity key at provider precision.
    pub fn key(&self) -> (i64, i64) {
        (
            (self.latitude * COORDINATE_SCALE).round() as i64,
            (self.longitude * COORDINATE_SCALE).round() as i64,
        )
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// A resolved place. Immutable once handed out by the resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub display_name: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_region: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// A location known only by its coordinates.
    pub fn from_coordinates(coordinates: Coordinates) -> Self {
        Self {
            display_name: coordinates.to_string(),
            country: String::new(),
            admin_region: None,
            latitude: coordinates.latitude,
            longitude: coordinates.longitude,
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    /// Same place if the coordinates agree at provider precision; names are ignored.
    pub fn same_place(&self, other: &Location) -> bool {
        self.coordinates().key() == other.coordinates().key()
    }

    /// "Name, Region, Country" with empty or repeated parts left out.
    pub fn label(&self) -> String {
        let mut parts: Vec<&str> = vec![self.display_name.as_str()];
        if let Some(region) = self
            .admin_region
            .as_deref()
            .filter(|r| !r.is_empty() && *r != self.display_name)
        {
            parts.push(region);
        }
        if !self.country.is_empty() {
            parts.push(&self.country);
        }
        parts.join(", ")
    }
}

/// Ordered candidates for one search, in provider ranking order.
/// Empty is a valid "no match" outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateSet(Vec<Location>);

impl CandidateSet {
    pub fn new(locations: Vec<Location>) -> Self {
        Self(locations)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Location> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Location> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Location] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a CandidateSet {
    type Item = &'a Location;
    type IntoIter = std::slice::Iter<'a, Location>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub wind_speed: f64,
    pub unit_system: UnitSystem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub wind_speed: f64,
    pub precipitation: f64,
}

/// Exactly [`FORECAST_HOURS`] points, strictly increasing, one hour apart.
///
/// The shape is checked on construction and on deserialization, so a value
/// of this type can never be truncated or padded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ForecastPoint>", into = "Vec<ForecastPoint>")]
pub struct Forecast {
    points: Vec<ForecastPoint>,
}

impl Forecast {
    pub fn new(points: Vec<ForecastPoint>) -> Result<Self, WeatherError> {
        if points.len() != FORECAST_HOURS {
            return Err(WeatherError::UpstreamDataShape(format!(
                "expected {FORECAST_HOURS} hourly forecast points, got {}",
                points.len()
            )));
        }

        for pair in points.windows(2) {
            let step = pair[1].timestamp - pair[0].timestamp;
            if step != TimeDelta::hours(1) {
                return Err(WeatherError::UpstreamDataShape(format!(
                    "forecast points {} and {} are not one hour apart",
                    pair[0].timestamp, pair[1].timestamp
                )));
            }
        }

        Ok(Self { points })
    }

    pub fn points(&self) -> &[ForecastPoint] {
        &self.points
    }

    pub fn first(&self) -> &ForecastPoint {
        // Non-empty by construction.
        &self.points[0]
    }

    /// Rewrites every numeric value; timestamps are carried over untouched,
    /// so the shape invariant holds for the result.
    fn map_values(&self, f: impl Fn(&ForecastPoint) -> (f64, f64, f64)) -> Forecast {
        let points = self
            .points
            .iter()
            .map(|p| {
                let (temperature, wind_speed, precipitation) = f(p);
                ForecastPoint {
                    timestamp: p.timestamp,
                    temperature,
                    wind_speed,
                    precipitation,
                }
            })
            .collect();
        Forecast { points }
    }
}

impl TryFrom<Vec<ForecastPoint>> for Forecast {
    type Error = WeatherError;

    fn try_from(points: Vec<ForecastPoint>) -> Result<Self, Self::Error> {
        Forecast::new(points)
    }
}

impl From<Forecast> for Vec<ForecastPoint> {
    fn from(forecast: Forecast) -> Self {
        forecast.points
    }
}

/// Current conditions plus the 24-hour forecast for one location, in one unit system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub location: Location,
    pub current: CurrentWeather,
    pub forecast: Forecast,
    pub fetched_at: DateTime<Utc>,
    pub unit_system: UnitSystem,
}

impl WeatherSnapshot {
    /// A new snapshot with every numeric field expressed in `target`.
    /// `self` is left untouched.
    pub fn to_unit_system(&self, target: UnitSystem) -> WeatherSnapshot {
        let from = self.unit_system;
        if from == target {
            return self.clone();
        }

        let current = CurrentWeather {
            timestamp: self.current.timestamp,
            temperature: convert(self.current.temperature, Measurement::Temperature, from, target),
            wind_speed: convert(self.current.wind_speed, Measurement::WindSpeed, from, target),
            unit_system: target,
        };

        let forecast = self.forecast.map_values(|p| {
            (
                convert(p.temperature, Measurement::Temperature, from, target),
                convert(p.wind_speed, Measurement::WindSpeed, from, target),
                convert(p.precipitation, Measurement::Precipitation, from, target),
            )
        });

        WeatherSnapshot {
            location: self.location.clone(),
            current,
            forecast,
            fetched_at: self.fetched_at,
            unit_system: target,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn search_query_is_trimmed_and_non_empty() {
        assert_eq!(SearchQuery::new("  Montevideo \n").unwrap().as_str(), "Montevideo");
        assert!(matches!(
            SearchQuery::new("   "),
            Err(WeatherError::InvalidRequest(_))
        ));
    }

    #[test]
    fn coordinates_are_range_checked() {
        assert!(Coordinates::new(90.0, -180.0).is_ok());
        assert!(Coordinates::new(90.1, 0.0).is_err());
        assert!(Coordinates::new(0.0, 180.5).is_err());
        assert!(Coordinates::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn location_identity_ignores_names_and_float_noise() {
        let a = montevideo();
        let mut b = montevideo();
        b.display_name = "MVD".to_string();
        b.latitude += 1e-9;
        assert!(a.same_place(&b));

        let mut c = montevideo();
        c.latitude += 0.01;
        assert!(!a.same_place(&c));
    }

    #[test]
    fn location_label_skips_redundant_parts() {
        assert_eq!(montevideo().label(), "Montevideo, Uruguay");

        let loc = Location {
            display_name: "San José".to_string(),
            country: "Costa Rica".to_string(),
            admin_region: Some("Provincia de San José".to_string()),
            latitude: 9.93333,
            longitude: -84.08333,
        };
        assert_eq!(loc.label(), "San José, Provincia de San José, Costa Rica");

        let bare = Location::from_coordinates(Coordinates::new(1.5, 2.25).unwrap());
        assert_eq!(bare.label(), "1.5000, 2.2500");
    }

    #[test]
    fn forecast_accepts_exactly_24_hourly_points() {
        let forecast = Forecast::new(hourly_points(start(), FORECAST_HOURS)).unwrap();
        assert_eq!(forecast.points().len(), 24);
        assert_eq!(forecast.first().timestamp, start());
    }

    #[test]
    fn forecast_rejects_wrong_count() {
        for count in [0, 23, 25] {
            let err = Forecast::new(hourly_points(start(), count)).unwrap_err();
            assert!(matches!(err, WeatherError::UpstreamDataShape(_)), "count {count}");
        }
    }

    #[test]
    fn forecast_rejects_irregular_spacing() {
        let mut points = hourly_points(start(), FORECAST_HOURS);
        points[10].timestamp = points[9].timestamp + TimeDelta::minutes(30);
        assert!(Forecast::new(points).is_err());

        let mut points = hourly_points(start(), FORECAST_HOURS);
        points.swap(3, 4);
        assert!(Forecast::new(points).is_err());
    }

    #[test]
    fn forecast_deserialization_enforces_shape() {
        let short = serde_json::to_value(hourly_points(start(), 12)).unwrap();
        assert!(serde_json::from_value::<Forecast>(short).is_err());

        let full = serde_json::to_value(hourly_points(start(), 24)).unwrap();
        assert!(serde_json::from_value::<Forecast>(full).is_ok());
    }

    #[test]
    fn snapshot_conversion_is_value_semantics() {
        let metric = snapshot_at(montevideo(), 20.0);
        let imperial = metric.to_unit_system(UnitSystem::Imperial);

        assert_eq!(metric.unit_system, UnitSystem::Metric);
        assert_eq!(metric.current.temperature, 20.0);

        assert_eq!(imperial.unit_system, UnitSystem::Imperial);
        assert_eq!(imperial.current.unit_system, UnitSystem::Imperial);
        assert!((imperial.current.temperature - 68.0).abs() < 1e-9);
        assert_eq!(imperial.forecast.points().len(), FORECAST_HOURS);
        assert_eq!(imperial.location, metric.location);
    }

    #[test]
    fn snapshot_double_conversion_restores_metric() {
        let metric = snapshot_at(montevideo(), 20.0);
        let back = metric
            .to_unit_system(UnitSystem::Imperial)
            .to_unit_system(UnitSystem::Metric);

        assert_eq!(back.unit_system, UnitSystem::Metric);
        assert!((back.current.temperature - 20.0).abs() < 1e-9);
        assert!((back.current.wind_speed - metric.current.wind_speed).abs() < 1e-9);
        for (a, b) in back.forecast.points().iter().zip(metric.forecast.points()) {
            assert_eq!(a.timestamp, b.timestamp);
            assert!((a.temperature - b.temperature).abs() < 1e-9);
            assert!((a.wind_speed - b.wind_speed).abs() < 1e-9);
            assert!((a.precipitation - b.precipitation).abs() < 1e-9);
        }
    }

    #[test]
    fn candidate_set_preserves_order() {
        let mut other = montevideo();
        other.display_name = "Montevideo".to_string();
        other.country = "United States".to_string();
        let set = CandidateSet::new(vec![montevideo(), other]);

        let countries: Vec<&str> = set.iter().map(|l| l.country.as_str()).collect();
        assert_eq!(countries, ["Uruguay", "United States"]);
        assert_eq!(set.len(), 2);
        assert!(CandidateSet::default().is_empty());
    }
}
