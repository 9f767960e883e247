// src/monitor.rs
//! Pipeline coordination: chunks to sentences to fixes, fanned out to
//! geofences and the track recorder

use crate::{
    error::{GpsError, Result},
    geofence::{GeofenceAlert, GeofenceSet},
    gps::{fix, framer::SentenceFramer, nmea, simulator::SimulatorOptions, PositionFix},
    track::TrackRecorder,
};
use std::collections::HashMap;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

/// Where sentences come from
#[derive(Debug, Clone)]
pub enum GpsSource {
    Serial { port: String, baudrate: u32 },
    Simulator(SimulatorOptions),
    /// Replay a capture file through the simulator
    Replay { path: std::path::PathBuf, interval_ms: Option<u64> },
}

/// Handle for one connected source and its framing buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything a transport or the simulator can tell the event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// Raw bytes with no sentence alignment
    Chunk { connection: ConnectionId, data: Vec<u8> },
    /// An already complete sentence; framing is skipped
    Sentence(String),
    /// The transport went away; `reason` is set when it failed
    Disconnected { connection: ConnectionId, reason: Option<String> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub sentences: u64,
    pub rejected: u64,
    pub unknown: u64,
    pub fixes: u64,
}

#[derive(Debug)]
struct Connection {
    label: String,
    framer: SentenceFramer,
    // Task feeding this connection, stopped on disconnect
    reader: Option<JoinHandle<()>>,
}

/// Owns per-connection framers plus the fix consumers.
///
/// All mutation goes through `&mut self`, so a single task drives it.
#[derive(Debug, Default)]
pub struct GpsMonitor {
    connections: HashMap<ConnectionId, Connection>,
    next_connection: u64,
    geofences: GeofenceSet,
    recorder: TrackRecorder,
    latest_fix: Option<PositionFix>,
    stats: MonitorStats,
}

impl GpsMonitor {
    /// Create a new GPS monitor
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_geofences(geofences: GeofenceSet) -> Self {
        Self {
            geofences,
            ..Self::default()
        }
    }

    /// Register a source and give it a fresh framing buffer.
    pub fn connect(&mut self, label: &str) -> ConnectionId {
        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;
        self.connections.insert(
            id,
            Connection {
                label: label.to_string(),
                framer: SentenceFramer::new(),
                reader: None,
            },
        );
        info!("Connected {} ({})", label, id);
        id
    }

    /// Tie the task reading for `id` to the connection, so that
    /// disconnecting also stops the read loop.
    pub fn attach_reader(&mut self, id: ConnectionId, reader: JoinHandle<()>) -> Result<()> {
        match self.connections.get_mut(&id) {
            Some(connection) => {
                if let Some(previous) = connection.reader.replace(reader) {
                    previous.abort();
                }
                Ok(())
            }
            None => {
                reader.abort();
                Err(GpsError::Connection(format!("unknown connection {}", id)))
            }
        }
    }

    /// Release a source's buffer and stop its reader. Any partial sentence
    /// is discarded.
    pub fn disconnect(&mut self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some(connection) => {
                if let Some(reader) = connection.reader {
                    reader.abort();
                }
                if !connection.framer.pending().is_empty() {
                    debug!(
                        "Dropping {} buffered bytes from {}",
                        connection.framer.pending().len(),
                        connection.label
                    );
                }
                info!("Disconnected {} ({})", connection.label, id);
                true
            }
            None => false,
        }
    }

    /// Disconnect every source. Returns how many were connected.
    pub fn disconnect_all(&mut self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        ids.into_iter().filter(|id| self.disconnect(*id)).count()
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Frame a chunk from `id` and process every sentence it completes.
    pub fn feed(&mut self, id: ConnectionId, chunk: &[u8]) -> Result<Vec<PositionFix>> {
        let mut fixes = Vec::new();
        self.feed_each(id, chunk, |fix, _| fixes.push(fix.clone()))?;
        Ok(fixes)
    }

    /// Like [`feed`](Self::feed), but reports each fix together with the
    /// alert set it produced, before the next sentence is processed.
    pub fn feed_each<F>(&mut self, id: ConnectionId, chunk: &[u8], mut on_fix: F) -> Result<()>
    where
        F: FnMut(&PositionFix, &[GeofenceAlert]),
    {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or_else(|| GpsError::Connection(format!("unknown connection {}", id)))?;
        let lines = connection.framer.feed_bytes(chunk);

        for line in lines {
            if let Some(fix) = self.ingest_line(&line) {
                on_fix(&fix, self.geofences.alerts());
            }
        }
        Ok(())
    }

    /// Process one complete sentence.
    pub fn ingest_line(&mut self, line: &str) -> Option<PositionFix> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        self.stats.sentences += 1;

        let Some(sentence) = nmea::parse_nmea_sentence(line) else {
            self.stats.rejected += 1;
            debug!("Rejected line: {}", line);
            return None;
        };
        if sentence.is_unknown() {
            self.stats.unknown += 1;
            debug!("Ignoring {} sentence", sentence.kind());
            return None;
        }

        let fix = fix::to_fix(&sentence)?;
        self.accept(fix.clone());
        Some(fix)
    }

    /// Hand a fix to each consumer. Neither sees the other's result.
    fn accept(&mut self, fix: PositionFix) {
        self.stats.fixes += 1;
        self.geofences.check(&fix);
        self.recorder.append(fix.clone());
        self.latest_fix = Some(fix);
    }

    /// Apply one event from a source.
    pub fn handle_event(&mut self, event: SourceEvent) -> Vec<PositionFix> {
        let mut fixes = Vec::new();
        self.dispatch(event, |fix, _| fixes.push(fix.clone()));
        fixes
    }

    /// Apply one event, calling `on_fix` for each accepted fix with the
    /// alert set it produced.
    pub fn dispatch<F>(&mut self, event: SourceEvent, mut on_fix: F)
    where
        F: FnMut(&PositionFix, &[GeofenceAlert]),
    {
        match event {
            SourceEvent::Chunk { connection, data } => {
                if let Err(e) = self.feed_each(connection, &data, on_fix) {
                    warn!("Dropping chunk: {}", e);
                }
            }
            SourceEvent::Sentence(line) => {
                if let Some(fix) = self.ingest_line(&line) {
                    on_fix(&fix, self.geofences.alerts());
                }
            }
            SourceEvent::Disconnected { connection, reason } => {
                if let Some(reason) = reason {
                    warn!("Source {} failed: {}", connection, reason);
                }
                self.disconnect(connection);
            }
        }
    }

    pub fn latest_fix(&self) -> Option<&PositionFix> {
        self.latest_fix.as_ref()
    }

    pub fn alerts(&self) -> &[GeofenceAlert] {
        self.geofences.alerts()
    }

    pub fn geofences(&self) -> &GeofenceSet {
        &self.geofences
    }

    pub fn geofences_mut(&mut self) -> &mut GeofenceSet {
        &mut self.geofences
    }

    pub fn recorder(&self) -> &TrackRecorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut TrackRecorder {
        &mut self.recorder
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }
}

/// Drive `monitor` from `events` until every sender is gone.
///
/// `on_fix` runs for each accepted fix with the alert set it produced,
/// before the next event is taken.
pub async fn run_event_loop<F>(monitor: &mut GpsMonitor, events: &mut mpsc::Receiver<SourceEvent>, mut on_fix: F)
where
    F: FnMut(&PositionFix, &[GeofenceAlert]),
{
    while let Some(event) = events.recv().await {
        monitor.dispatch(event, &mut on_fix);
    }
    debug!("All sources closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::LatLng;
    use crate::geofence::{Geofence, GeofenceShape};

    const GGA: &str = "$GPGGA,092750.000,5321.6802,N,00630.3372,W,1,8,1.03,61.7,M,55.2,M,,*76\r\n";
    const RMC: &str = "$GPRMC,092750.000,A,5321.6802,N,00630.3372,W,0.02,31.66,280511,,,A*43\r\n";
    const VTG: &str = "$GPVTG,31.66,T,,M,0.02,N,0.04,K,A*3B\r\n";

    fn dublin_fence() -> GeofenceSet {
        let mut set = GeofenceSet::new();
        set.add(Geofence::new("dublin", "Dublin", GeofenceShape::Circle {
            center: LatLng::new(53.36134, -6.50562),
            radius: 500.0,
        }))
        .unwrap();
        set
    }

    #[test]
    fn test_feed_split_chunks() {
        let mut monitor = GpsMonitor::new();
        let id = monitor.connect("test");

        let stream = format!("{}{}{}", GGA, RMC, VTG);
        let (a, b) = stream.split_at(40);
        assert!(monitor.feed(id, a.as_bytes()).unwrap().is_empty());
        let fixes = monitor.feed(id, b.as_bytes()).unwrap();

        assert_eq!(fixes.len(), 2);
        assert_eq!(monitor.stats().sentences, 3);
        assert_eq!(monitor.stats().fixes, 2);
        assert!(monitor.latest_fix().unwrap().speed.is_some());
    }

    #[test]
    fn test_feed_unknown_connection() {
        let mut monitor = GpsMonitor::new();
        let id = monitor.connect("gone");
        monitor.disconnect(id);
        assert!(matches!(monitor.feed(id, GGA.as_bytes()), Err(GpsError::Connection(_))));
    }

    #[test]
    fn test_connections_have_separate_buffers() {
        let mut monitor = GpsMonitor::new();
        let a = monitor.connect("a");
        let b = monitor.connect("b");

        monitor.feed(a, &GGA.as_bytes()[..30]).unwrap();
        monitor.feed(b, &RMC.as_bytes()[..30]).unwrap();
        assert_eq!(monitor.feed(a, &GGA.as_bytes()[30..]).unwrap().len(), 1);
        assert_eq!(monitor.feed(b, &RMC.as_bytes()[30..]).unwrap().len(), 1);
    }

    #[test]
    fn test_disconnect_discards_partial_sentence() {
        let mut monitor = GpsMonitor::new();
        let id = monitor.connect("serial");
        monitor.feed(id, &GGA.as_bytes()[..30]).unwrap();

        let fixes = monitor.handle_event(SourceEvent::Disconnected {
            connection: id,
            reason: Some("read error".to_string()),
        });
        assert!(fixes.is_empty());
        assert!(!monitor.is_connected(id));
        assert_eq!(monitor.connection_count(), 0);

        // Reconnecting starts from an empty buffer
        let id = monitor.connect("serial");
        assert!(monitor.feed(id, &GGA.as_bytes()[30..]).unwrap().is_empty());
        assert_eq!(monitor.stats().rejected, 1);
    }

    #[test]
    fn test_fix_reaches_geofences_and_track() {
        let mut monitor = GpsMonitor::with_geofences(dublin_fence());
        monitor.recorder_mut().start("Test");

        let fix = monitor.ingest_line(GGA.trim()).unwrap();
        assert_eq!(monitor.alerts().len(), 1);
        assert_eq!(monitor.alerts()[0].id, "dublin");
        assert_eq!(monitor.recorder().current().unwrap().fixes, vec![fix]);

        monitor.ingest_line("$GPGGA,120000,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47");
        assert!(monitor.alerts().is_empty());
        assert_eq!(monitor.recorder().current().unwrap().point_count(), 2);
    }

    #[test]
    fn test_unknown_and_rejected_counts() {
        let mut monitor = GpsMonitor::new();
        assert!(monitor.ingest_line("$GPGSV,1,1,00*79").is_none());
        assert!(monitor.ingest_line("no marker").is_none());
        assert!(monitor.ingest_line("   ").is_none());

        let stats = monitor.stats();
        assert_eq!(stats.sentences, 2);
        assert_eq!(stats.unknown, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.fixes, 0);
    }

    #[tokio::test]
    async fn test_event_loop_runs_until_sources_close() {
        let mut monitor = GpsMonitor::with_geofences(dublin_fence());
        let id = monitor.connect("chunks");
        let (tx, mut rx) = mpsc::channel(16);

        tx.send(SourceEvent::Chunk {
            connection: id,
            data: GGA.as_bytes()[..20].to_vec(),
        })
        .await
        .unwrap();
        tx.send(SourceEvent::Chunk {
            connection: id,
            data: GGA.as_bytes()[20..].to_vec(),
        })
        .await
        .unwrap();
        tx.send(SourceEvent::Sentence(RMC.trim().to_string())).await.unwrap();
        tx.send(SourceEvent::Disconnected { connection: id, reason: None })
            .await
            .unwrap();
        drop(tx);

        let mut seen = Vec::new();
        run_event_loop(&mut monitor, &mut rx, |fix, alerts| {
            seen.push((fix.clone(), alerts.len()));
        })
        .await;

        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|(_, alerts)| *alerts == 1));
        assert!(!monitor.is_connected(id));
    }

    #[tokio::test]
    async fn test_disconnect_stops_reader() {
        use crate::gps::serial::forward_chunks;
        use tokio::io::AsyncWriteExt;

        let mut monitor = GpsMonitor::new();
        let id = monitor.connect("duplex");
        let (mut device, port) = tokio::io::duplex(256);
        let (tx, mut rx) = mpsc::channel(16);
        monitor.attach_reader(id, tokio::spawn(forward_chunks(port, id, tx))).unwrap();

        device.write_all(GGA.as_bytes()).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(monitor.handle_event(event).len(), 1);

        assert!(monitor.disconnect(id));
        // The device keeps talking; nothing may reach the loop any more
        let _ = device.write_all(RMC.as_bytes()).await;

        let next = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn test_attach_reader_to_unknown_connection() {
        let mut monitor = GpsMonitor::new();
        let id = monitor.connect("gone");
        monitor.disconnect(id);

        let reader = tokio::spawn(std::future::pending::<()>());
        assert!(matches!(monitor.attach_reader(id, reader), Err(GpsError::Connection(_))));
    }

    #[test]
    fn test_disconnect_all() {
        let mut monitor = GpsMonitor::new();
        let a = monitor.connect("simulator");
        monitor.connect("serial");
        monitor.feed(a, &GGA.as_bytes()[..10]).unwrap();

        assert_eq!(monitor.disconnect_all(), 2);
        assert_eq!(monitor.connection_count(), 0);
        assert_eq!(monitor.disconnect_all(), 0);
    }

    #[test]
    fn test_feed_each_reports_alerts_per_fix() {
        let mut monitor = GpsMonitor::with_geofences(dublin_fence());
        let id = monitor.connect("chunks");
        let stream = format!(
            "{}$GPGGA,120000,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n",
            GGA
        );

        let mut alert_counts = Vec::new();
        monitor
            .feed_each(id, stream.as_bytes(), |_, alerts| alert_counts.push(alerts.len()))
            .unwrap();
        assert_eq!(alert_counts, vec![1, 0]);
    }
}
