//! Periodic weather refresh for the selected location.
//!
//! The scheduler owns one background task per selection. Selecting a new
//! location, stopping, or dropping the scheduler cancels that task; a fetch
//! already in flight is allowed to finish but its result is discarded.
//!
//! Snapshots are kept in metric and converted for presentation, so flipping
//! units back and forth never drifts.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{
    sync::mpsc,
    time::{MissedTickBehavior, interval, sleep},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{ErrorKind, Location, UnitSystem, WeatherError, WeatherSnapshot};

/// Anything that can answer a `get_weather` call.
#[async_trait]
pub trait WeatherTool: Send + Sync {
    async fn get_weather(
        &self,
        location: &Location,
        unit_system: UnitSystem,
    ) -> Result<WeatherSnapshot, WeatherError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one within a single cycle.
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    ///
    /// The first retry is immediate; after that the wait doubles from
    /// `initial_backoff`, never exceeding `cap`.
    pub fn delay_for_retry(&self, retry: u32, cap: Duration) -> Duration {
        if retry <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(retry - 2).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(cap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshConfig {
    pub interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerState {
    Idle,
    Active {
        location: Location,
        unit_system: UnitSystem,
        interval: Duration,
    },
    /// Terminal.
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// A new snapshot, already in the active unit system.
    SnapshotUpdated(WeatherSnapshot),
    /// A cycle failed while an older snapshot is still on screen.
    ConnectionProblem { kind: ErrorKind, message: String },
    /// The first success after a failed cycle. Always followed by `SnapshotUpdated`.
    ConnectionRestored,
    /// The first load for a location failed; there is nothing to show.
    LoadFailed {
        location: Location,
        kind: ErrorKind,
        message: String,
    },
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("the refresh scheduler has been stopped")]
    Stopped,
    #[error("no location is selected")]
    NoSelection,
}

#[derive(Debug)]
struct Shared {
    state: SchedulerState,
    /// Bumped on every select and on stop; a worker only publishes while
    /// its generation is current.
    generation: u64,
    /// Latest snapshot, in metric.
    latest: Option<WeatherSnapshot>,
    degraded: bool,
}

impl Shared {
    fn active_unit(&self) -> Option<UnitSystem> {
        match &self.state {
            SchedulerState::Active { unit_system, .. } => Some(*unit_system),
            _ => None,
        }
    }

    fn is_current(&self, generation: u64, location: &Location) -> bool {
        self.generation == generation
            && matches!(&self.state, SchedulerState::Active { location: active, .. } if active.same_place(location))
    }
}

struct Worker {
    cancel: CancellationToken,
}

pub struct RefreshScheduler {
    tool: Arc<dyn WeatherTool>,
    config: RefreshConfig,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<SchedulerEvent>,
    worker: Option<Worker>,
}

impl RefreshScheduler {
    pub fn new(
        tool: Arc<dyn WeatherTool>,
        config: RefreshConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            tool,
            config,
            shared: Arc::new(Mutex::new(Shared {
                state: SchedulerState::Idle,
                generation: 0,
                latest: None,
                degraded: false,
            })),
            events,
            worker: None,
        };
        (scheduler, rx)
    }

    /// Start refreshing `location`, fetching immediately.
    ///
    /// Replaces any previous selection. Must be called within a Tokio runtime.
    pub fn select(
        &mut self,
        location: Location,
        unit_system: UnitSystem,
    ) -> Result<(), SchedulerError> {
        let generation = {
            let mut shared = self.shared.lock();
            if shared.state == SchedulerState::Stopped {
                return Err(SchedulerError::Stopped);
            }
            shared.generation += 1;
            shared.state = SchedulerState::Active {
                location: location.clone(),
                unit_system,
                interval: self.config.interval,
            };
            shared.latest = None;
            shared.degraded = false;
            shared.generation
        };
        self.cancel_worker();

        info!(location = %location.label(), unit = %unit_system, "refreshing weather");
        let cancel = CancellationToken::new();
        let session = Session {
            generation,
            location,
            tool: self.tool.clone(),
            config: self.config,
            shared: self.shared.clone(),
            events: self.events.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(session.run());
        self.worker = Some(Worker { cancel });
        Ok(())
    }

    /// Switch the presentation unit. Re-emits the held snapshot converted
    /// locally; future fetches use the new unit.
    pub fn change_unit(&mut self, unit_system: UnitSystem) -> Result<(), SchedulerError> {
        let mut guard = self.shared.lock();
        let shared = &mut *guard;
        match &mut shared.state {
            SchedulerState::Active {
                unit_system: current,
                ..
            } => {
                if *current == unit_system {
                    return Ok(());
                }
                *current = unit_system;
            }
            SchedulerState::Idle => return Err(SchedulerError::NoSelection),
            SchedulerState::Stopped => return Err(SchedulerError::Stopped),
        }

        debug!(unit = %unit_system, "unit system changed");
        if let Some(latest) = &shared.latest {
            let _ = self
                .events
                .send(SchedulerEvent::SnapshotUpdated(latest.to_unit_system(unit_system)));
        }
        Ok(())
    }

    /// Stop for good. Idempotent.
    pub fn stop(&mut self) {
        {
            let mut shared = self.shared.lock();
            if shared.state == SchedulerState::Stopped {
                return;
            }
            shared.state = SchedulerState::Stopped;
            shared.generation += 1;
        }
        self.cancel_worker();
        info!("refresh scheduler stopped");
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.lock().state.clone()
    }

    /// Latest snapshot in the active unit system.
    pub fn snapshot(&self) -> Option<WeatherSnapshot> {
        let shared = self.shared.lock();
        let unit = shared.active_unit().unwrap_or_default();
        shared.latest.as_ref().map(|s| s.to_unit_system(unit))
    }

    /// Whether the most recent cycle failed.
    pub fn is_degraded(&self) -> bool {
        self.shared.lock().degraded
    }

    fn cancel_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.cancel();
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.cancel_worker();
    }
}

enum Cycle {
    Fetched(WeatherSnapshot),
    Failed(WeatherError),
    Cancelled,
}

/// Background refresh loop for one selection.
struct Session {
    generation: u64,
    location: Location,
    tool: Arc<dyn WeatherTool>,
    config: RefreshConfig,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<SchedulerEvent>,
    cancel: CancellationToken,
}

impl Session {
    async fn run(self) {
        // `interval` panics on a zero period.
        let period = self.config.interval.max(Duration::from_millis(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.cycle().await {
                Cycle::Fetched(snapshot) => self.publish(snapshot),
                Cycle::Failed(err) => self.report(err),
                Cycle::Cancelled => break,
            }
        }
        debug!(generation = self.generation, "refresh session ended");
    }

    async fn cycle(&self) -> Cycle {
        let mut retry = 0;
        loop {
            let unit = {
                let shared = self.shared.lock();
                if shared.generation != self.generation {
                    return Cycle::Cancelled;
                }
                shared.active_unit().unwrap_or_default()
            };

            let result = self.tool.get_weather(&self.location, unit).await;
            if self.cancel.is_cancelled() {
                return Cycle::Cancelled;
            }

            match result {
                Ok(snapshot) => return Cycle::Fetched(snapshot),
                Err(err) if err.is_retryable() && retry < self.config.retry.max_retries => {
                    retry += 1;
                    let delay = self.config.retry.delay_for_retry(retry, self.config.interval);
                    warn!(
                        location = %self.location.label(),
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "weather fetch failed; retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Cycle::Cancelled,
                        _ = sleep(delay) => {}
                    }
                }
                Err(err) => return Cycle::Failed(err),
            }
        }
    }

    fn publish(&self, snapshot: WeatherSnapshot) {
        let mut shared = self.shared.lock();
        if !shared.is_current(self.generation, &self.location) {
            debug!(location = %self.location.label(), "dropping result for a stale selection");
            return;
        }
        let unit = shared.active_unit().unwrap_or_default();
        let latest = snapshot.to_unit_system(UnitSystem::Metric);
        let presented = latest.to_unit_system(unit);
        shared.latest = Some(latest);

        if shared.degraded {
            shared.degraded = false;
            info!(location = %self.location.label(), "connection restored");
            let _ = self.events.send(SchedulerEvent::ConnectionRestored);
        }
        let _ = self.events.send(SchedulerEvent::SnapshotUpdated(presented));
    }

    fn report(&self, err: WeatherError) {
        let mut shared = self.shared.lock();
        if !shared.is_current(self.generation, &self.location) {
            return;
        }
        shared.degraded = true;
        warn!(location = %self.location.label(), kind = %err.kind(), error = %err, "refresh cycle failed");

        let event = if shared.latest.is_some() {
            SchedulerEvent::ConnectionProblem {
                kind: err.kind(),
                message: err.message().to_string(),
            }
        } else {
            SchedulerEvent::LoadFailed {
                location: self.location.clone(),
                kind: err.kind(),
                message: err.message().to_string(),
            }
        };
        let _ = self.events.send(event);
    }
}
