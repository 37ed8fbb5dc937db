//! Metric/imperial conversion for the three quantities the service reports.
//!
//! Metric is the canonical unit everywhere data is stored or fetched;
//! imperial only exists at the presentation boundary.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::WeatherError;

const KMH_TO_MPH: f64 = 0.621371;
const MM_TO_INCH: f64 = 0.0393701;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    #[default]
    Metric,
    Imperial,
}

impl UnitSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitSystem::Metric => "metric",
            UnitSystem::Imperial => "imperial",
        }
    }

    pub const fn all() -> &'static [UnitSystem] {
        &[UnitSystem::Metric, UnitSystem::Imperial]
    }
}

impl std::fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitSystem {
    type Err = WeatherError;

    /// Accepts `metric`/`m`/`si` and `imperial`/`i`/`us`, case-insensitive.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "metric" | "m" | "si" => Ok(UnitSystem::Metric),
            "imperial" | "i" | "us" => Ok(UnitSystem::Imperial),
            _ => Err(WeatherError::InvalidRequest(format!(
                "unsupported unit system '{value}'; use 'metric' or 'imperial'"
            ))),
        }
    }
}

/// Which physical quantity a number represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Measurement {
    Temperature,
    WindSpeed,
    Precipitation,
}

impl Measurement {
    pub fn unit_label(&self, system: UnitSystem) -> &'static str {
        match (self, system) {
            (Measurement::Temperature, UnitSystem::Metric) => "°C",
            (Measurement::Temperature, UnitSystem::Imperial) => "°F",
            (Measurement::WindSpeed, UnitSystem::Metric) => "km/h",
            (Measurement::WindSpeed, UnitSystem::Imperial) => "mph",
            (Measurement::Precipitation, UnitSystem::Metric) => "mm",
            (Measurement::Precipitation, UnitSystem::Imperial) => "in",
        }
    }
}

/// °C → °F, km/h → mph, mm → in.
pub fn to_imperial(value: f64, kind: Measurement) -> f64 {
    match kind {
        Measurement::Temperature => value * 9.0 / 5.0 + 32.0,
        Measurement::WindSpeed => value * KMH_TO_MPH,
        Measurement::Precipitation => value * MM_TO_INCH,
    }
}

/// °F → °C, mph → km/h, in → mm.
pub fn to_metric(value: f64, kind: Measurement) -> f64 {
    match kind {
        Measurement::Temperature => (value - 32.0) * 5.0 / 9.0,
        Measurement::WindSpeed => value / KMH_TO_MPH,
        Measurement::Precipitation => value / MM_TO_INCH,
    }
}

/// Convert `value` of `kind` between two unit systems; identity when they match.
pub fn convert(value: f64, kind: Measurement, from: UnitSystem, to: UnitSystem) -> f64 {
    match (from, to) {
        (UnitSystem::Metric, UnitSystem::Imperial) => to_imperial(value, kind),
        (UnitSystem::Imperial, UnitSystem::Metric) => to_metric(value, kind),
        _ => value,
    }
}
