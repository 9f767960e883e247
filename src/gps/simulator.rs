// src/gps/simulator.rs
//! Synthetic and replayed NMEA sentence streams
//!
//! A [`SentenceSource`] yields the sentences for one tick at a time and can be
//! rewound. Two sources exist: [`SyntheticRoute`], which drives around a
//! waypoint loop and writes GGA/RMC/VTG for each stop, and [`ReplayBuffer`],
//! which cycles through lines loaded from a capture file.
//!
//! [`SentenceSimulator`] puts a source on a Tokio interval and pushes every
//! sentence to its subscribers. Sentences can also be pulled directly with
//! [`SentenceSimulator::tick`].
//!
//! Emitted sentences carry the constant checksum `00`. It is never computed,
//! so consumers must not validate it.

use super::nmea::KNOTS_TO_KMH;
use crate::{
    error::{GpsError, Result},
    geo::{self, LatLng},
};
use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    f64::consts::PI,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info};

pub const DEFAULT_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_START: LatLng = LatLng { lat: 40.7128, lng: -74.0060 };
pub const DEFAULT_ROUTE_POINTS: usize = 20;
pub const DEFAULT_ROUTE_RADIUS_DEG: f64 = 0.01;
pub const PLACEHOLDER_CHECKSUM: &str = "00";

const SPEED_RANGE_KNOTS: std::ops::Range<f64> = 5.0..15.0;

/// A restartable producer of sentence lines.
pub trait SentenceSource: Send {
    /// Sentences for the next tick, in emission order.
    fn next_batch(&mut self) -> Vec<String>;

    /// Rewind to the first tick.
    fn restart(&mut self);
}

/// Evenly spaced waypoints on a circle around `center`.
pub fn generate_circular_route(center: LatLng, radius_deg: f64, points: usize) -> Vec<LatLng> {
    (0..points)
        .map(|i| {
            let angle = (i as f64 / points as f64) * PI * 2.0;
            LatLng::new(
                center.lat + radius_deg * angle.sin(),
                center.lng + radius_deg * angle.cos(),
            )
        })
        .collect()
}

/// Drives around a closed waypoint loop, one waypoint per tick.
pub struct SyntheticRoute {
    route: Vec<LatLng>,
    cursor: usize,
    speed_knots: f64,
    altitude: f64,
    rng: StdRng,
}

impl SyntheticRoute {
    pub fn new(route: Vec<LatLng>) -> Self {
        Self {
            route,
            cursor: 0,
            speed_knots: 0.0,
            altitude: 0.0,
            rng: StdRng::from_entropy(),
        }
    }

    /// The default loop around `center`.
    pub fn circle(center: LatLng) -> Self {
        Self::new(generate_circular_route(center, DEFAULT_ROUTE_RADIUS_DEG, DEFAULT_ROUTE_POINTS))
    }

    pub fn route(&self) -> &[LatLng] {
        &self.route
    }

    /// Advance one waypoint and build its sentences with `now` as the fix time.
    pub fn next_batch_at(&mut self, now: DateTime<Utc>) -> Vec<String> {
        if self.route.is_empty() {
            return Vec::new();
        }

        let len = self.route.len();
        let position = self.route[self.cursor % len];
        let previous = self.route[(self.cursor + len - 1) % len];
        self.cursor += 1;

        self.speed_knots = self.rng.gen_range(SPEED_RANGE_KNOTS);
        self.altitude = 100.0 + (self.cursor as f64 / 10.0).sin() * 20.0;
        let course = if len > 1 {
            geo::initial_bearing(previous, position)
        } else {
            0.0
        };

        let time = now.format("%H%M%S").to_string();
        let date = now.format("%d%m%y").to_string();
        let lat = format_nmea_coordinate(position.lat, 2);
        let lng = format_nmea_coordinate(position.lng, 3);
        let ns = if position.lat >= 0.0 { "N" } else { "S" };
        let ew = if position.lng >= 0.0 { "E" } else { "W" };
        let cs = PLACEHOLDER_CHECKSUM;

        vec![
            format!(
                "$GPGGA,{},{},{},{},{},1,08,1.0,{:.1},M,0.0,M,,*{}",
                time, lat, ns, lng, ew, self.altitude, cs
            ),
            format!(
                "$GPRMC,{},A,{},{},{},{},{:.1},{:.1},{},,,A*{}",
                time, lat, ns, lng, ew, self.speed_knots, course, date, cs
            ),
            format!(
                "$GPVTG,{:.1},T,{:.1},M,{:.1},N,{:.1},K,A*{}",
                course,
                course,
                self.speed_knots,
                self.speed_knots * KNOTS_TO_KMH,
                cs
            ),
        ]
    }
}

impl SentenceSource for SyntheticRoute {
    fn next_batch(&mut self) -> Vec<String> {
        self.next_batch_at(Utc::now())
    }

    fn restart(&mut self) {
        self.cursor = 0;
    }
}

/// Cycles through captured sentence lines, one per tick.
#[derive(Debug, Clone, Default)]
pub struct ReplayBuffer {
    lines: Vec<String>,
    cursor: usize,
}

impl ReplayBuffer {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl SentenceSource for ReplayBuffer {
    fn next_batch(&mut self) -> Vec<String> {
        if self.lines.is_empty() {
            return Vec::new();
        }
        let line = self.lines[self.cursor % self.lines.len()].clone();
        self.cursor += 1;
        vec![line]
    }

    fn restart(&mut self) {
        self.cursor = 0;
    }
}

/// Keep only sentence lines of a type the parser understands.
pub fn extract_replay_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| {
            line.starts_with('$')
                && (line.contains("GGA") || line.contains("RMC") || line.contains("VTG"))
        })
        .map(str::to_string)
        .collect()
}

/// `DDMM.MMMM` (or `DDDMM.MMMM`) from the absolute value of `value`.
fn format_nmea_coordinate(value: f64, degree_digits: usize) -> String {
    let abs = value.abs();
    let mut degrees = abs.trunc();
    let mut minutes = (abs - degrees) * 60.0;
    // Rounding to four decimals must not print 60.0000 minutes
    if (minutes * 10_000.0).round() >= 600_000.0 {
        degrees += 1.0;
        minutes = 0.0;
    }
    format!("{:0width$}{:07.4}", degrees as u32, minutes, width = degree_digits)
}

#[derive(Debug, Clone, Default)]
pub struct SimulatorOptions {
    pub interval_ms: Option<u64>,
    pub start_position: Option<LatLng>,
    pub route: Option<Vec<LatLng>>,
    pub nmea_lines: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorStatus {
    Idle,
    Synthetic,
    Replay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Shared {
    status: SimulatorStatus,
    interval: Duration,
    source: Option<Box<dyn SentenceSource>>,
    replay_lines: Vec<String>,
    subscribers: Vec<(SubscriptionId, mpsc::UnboundedSender<String>)>,
    next_subscription: u64,
    // Bumped whenever the timer is replaced so a stale timer task exits
    generation: u64,
}

impl Shared {
    fn emit_tick(&mut self) -> Vec<String> {
        let Some(source) = self.source.as_mut() else {
            return Vec::new();
        };
        let lines = source.next_batch();
        for line in &lines {
            self.subscribers.retain(|(_, tx)| tx.send(line.clone()).is_ok());
        }
        lines
    }
}

/// Periodic sentence emitter with subscribe/unsubscribe and an explicit stop.
///
/// Starting requires a Tokio runtime; the timer runs as a spawned task.
pub struct SentenceSimulator {
    shared: Arc<Mutex<Shared>>,
    timer: Option<JoinHandle<()>>,
}

impl SentenceSimulator {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                status: SimulatorStatus::Idle,
                interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
                source: None,
                replay_lines: Vec::new(),
                subscribers: Vec::new(),
                next_subscription: 0,
                generation: 0,
            })),
            timer: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        lock_shared(&self.shared)
    }

    /// Start emitting. A no-op when already running.
    ///
    /// Replay mode is used when `nmea_lines` are given, or when a file was
    /// loaded and no route or start position is given. Otherwise a synthetic
    /// route is driven, by default a circle around the start position.
    pub fn start(&mut self, options: SimulatorOptions) -> Result<()> {
        let mut shared = self.lock();
        if shared.status != SimulatorStatus::Idle {
            debug!("Simulator already running, ignoring start");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| GpsError::Other(format!("Simulator needs a Tokio runtime: {}", e)))?;

        if let Some(ms) = options.interval_ms {
            shared.interval = Duration::from_millis(ms.max(1));
        }

        if let Some(lines) = options.nmea_lines.filter(|lines| !lines.is_empty()) {
            shared.replay_lines = lines;
        }

        let synthetic_requested = options.route.is_some() || options.start_position.is_some();
        let (status, source): (SimulatorStatus, Box<dyn SentenceSource>) =
            if !shared.replay_lines.is_empty() && !synthetic_requested {
                let buffer = ReplayBuffer::new(shared.replay_lines.clone());
                (SimulatorStatus::Replay, Box::new(buffer))
            } else {
                let route = match options.route {
                    Some(route) => SyntheticRoute::new(route),
                    None => SyntheticRoute::circle(options.start_position.unwrap_or(DEFAULT_START)),
                };
                (SimulatorStatus::Synthetic, Box::new(route))
            };

        info!("Simulator started ({:?}, every {:?})", status, shared.interval);
        shared.status = status;
        shared.source = Some(source);
        shared.generation += 1;
        let (generation, interval) = (shared.generation, shared.interval);
        drop(shared);

        self.timer = Some(spawn_timer(&runtime, Arc::clone(&self.shared), generation, interval));
        Ok(())
    }

    /// Stop emitting. No sentence is delivered after this returns.
    ///
    /// Loaded replay lines are kept; the next start begins from the top.
    pub fn stop(&mut self) {
        let mut shared = self.lock();
        if shared.status == SimulatorStatus::Idle {
            debug!("Simulator not running, ignoring stop");
            return;
        }
        shared.status = SimulatorStatus::Idle;
        shared.generation += 1;
        if let Some(source) = shared.source.as_mut() {
            source.restart();
        }
        drop(shared);

        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        info!("Simulator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.status() != SimulatorStatus::Idle
    }

    pub fn status(&self) -> SimulatorStatus {
        self.lock().status
    }

    /// Change the tick interval, restarting the timer when running.
    pub fn set_interval(&mut self, ms: u64) -> Result<()> {
        let mut shared = self.lock();
        shared.interval = Duration::from_millis(ms.max(1));
        if shared.status == SimulatorStatus::Idle {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| GpsError::Other(format!("Simulator needs a Tokio runtime: {}", e)))?;
        shared.generation += 1;
        let (generation, interval) = (shared.generation, shared.interval);
        drop(shared);

        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.timer = Some(spawn_timer(&runtime, Arc::clone(&self.shared), generation, interval));
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        self.lock().interval
    }

    /// Load sentence lines from capture file contents for replay.
    ///
    /// Returns how many lines were kept. When none qualify the previously
    /// loaded lines stay in place. Takes effect on the next start.
    pub fn load_file(&mut self, content: &str) -> usize {
        let lines = extract_replay_lines(content);
        let count = lines.len();
        if count > 0 {
            self.lock().replay_lines = lines;
            info!("Loaded {} sentences for replay", count);
        } else {
            debug!("No replayable sentences in loaded content");
        }
        count
    }

    pub fn replay_len(&self) -> usize {
        self.lock().replay_lines.len()
    }

    /// Register a new listener for emitted sentences.
    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shared = self.lock();
        let id = SubscriptionId(shared.next_subscription);
        shared.next_subscription += 1;
        shared.subscribers.push((id, tx));
        (id, rx)
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut shared = self.lock();
        let before = shared.subscribers.len();
        shared.subscribers.retain(|(sub, _)| *sub != id);
        shared.subscribers.len() != before
    }

    /// Advance one tick by hand, delivering to subscribers as the timer would.
    /// Returns nothing when idle.
    pub fn tick(&self) -> Vec<String> {
        let mut shared = self.lock();
        if shared.status == SimulatorStatus::Idle {
            return Vec::new();
        }
        shared.emit_tick()
    }
}

impl Default for SentenceSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SentenceSimulator {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

fn lock_shared(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn spawn_timer(
    runtime: &tokio::runtime::Handle,
    shared: Arc<Mutex<Shared>>,
    generation: u64,
    period: Duration,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let mut state = lock_shared(&shared);
            // Emission happens under the lock, after this check, so a
            // completed stop() can never be followed by another sentence
            if state.status == SimulatorStatus::Idle || state.generation != generation {
                break;
            }
            state.emit_tick();
        }
    })
}
