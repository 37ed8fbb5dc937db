//! Plain-text rendering for the terminal.

use std::fmt::Write;

use mcp_weather_core::{CandidateSet, Measurement, SchedulerEvent, WeatherSnapshot};

pub fn candidates(set: &CandidateSet) -> String {
    if set.is_empty() {
        return "No matching places.\n".to_string();
    }

    let mut out = String::new();
    for (i, location) in set.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>2}. {:<40} ({:.4}, {:.4})",
            i + 1,
            location.label(),
            location.latitude,
            location.longitude
        );
    }
    out
}

pub fn snapshot(snapshot: &WeatherSnapshot) -> String {
    let units = snapshot.unit_system;
    let temp = Measurement::Temperature.unit_label(units);
    let wind = Measurement::WindSpeed.unit_label(units);
    let precip = Measurement::Precipitation.unit_label(units);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} ({:.4}, {:.4})",
        snapshot.location.label(),
        snapshot.location.latitude,
        snapshot.location.longitude
    );
    let _ = writeln!(
        out,
        "Now: {:.1} {temp}, wind {:.1} {wind}  (observed {} UTC)",
        snapshot.current.temperature,
        snapshot.current.wind_speed,
        snapshot.current.timestamp.format("%H:%M")
    );
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<13} {:>10} {:>12} {:>10}",
        "Time (UTC)",
        format!("Temp {temp}"),
        format!("Wind {wind}"),
        format!("Rain {precip}")
    );

    for point in snapshot.forecast.points() {
        let _ = writeln!(
            out,
            "  {:<11} {:>10.1} {:>12.1} {:>10.2}",
            point.timestamp.format("%m-%d %H:%M"),
            point.temperature,
            point.wind_speed,
            point.precipitation
        );
    }

    let _ = writeln!(
        out,
        "\nUpdated {} UTC",
        snapshot.fetched_at.format("%Y-%m-%d %H:%M:%S")
    );
    out
}

/// One-line notice for events that don't carry a snapshot.
pub fn status(event: &SchedulerEvent) -> Option<String> {
    match event {
        SchedulerEvent::SnapshotUpdated(_) => None,
        SchedulerEvent::ConnectionProblem { kind, message } => Some(format!(
            "! Connection problem ({kind}): {message}. Showing the last known data."
        )),
        SchedulerEvent::ConnectionRestored => Some("Connection restored.".to_string()),
        SchedulerEvent::LoadFailed {
            location,
            kind,
            message,
        } => Some(format!(
            "! Could not load weather for {} ({kind}): {message}",
            location.label()
        )),
    }
}
