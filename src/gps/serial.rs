// src/gps/serial.rs
//! Serial port transport: raw chunks in, `SourceEvent`s out

use crate::{
    error::{GpsError, Result},
    monitor::{ConnectionId, SourceEvent},
};
use std::time::Duration;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 1024;

/// Open `port` and forward whatever it delivers to `events`.
///
/// Chunks carry no sentence alignment; framing happens in the monitor.
pub fn spawn_serial_reader(
    port: &str,
    baudrate: u32,
    connection: ConnectionId,
    events: mpsc::Sender<SourceEvent>,
) -> Result<JoinHandle<()>> {
    info!("Connecting to GPS on {} at {} baud", port, baudrate);

    let serial = tokio_serial::new(port, baudrate)
        .timeout(Duration::from_millis(1000))
        .open_native_async()
        .map_err(|e| {
            warn!("Failed to open serial port {}: {}", port, e);
            GpsError::from(e)
        })?;

    Ok(tokio::spawn(forward_chunks(serial, connection, events)))
}

/// Read until EOF or error, then report a single `Disconnected`.
pub async fn forward_chunks<R>(mut reader: R, connection: ConnectionId, events: mpsc::Sender<SourceEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_BUFFER_SIZE];

    let reason = loop {
        match reader.read(&mut buf).await {
            Ok(0) => break None, // EOF
            Ok(n) => {
                let event = SourceEvent::Chunk {
                    connection,
                    data: buf[..n].to_vec(),
                };
                if events.send(event).await.is_err() {
                    debug!("Event loop gone, closing {}", connection);
                    return;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                warn!("Error reading from serial port: {}", e);
                break Some(e.to_string());
            }
        }
    };

    let _ = events.send(SourceEvent::Disconnected { connection, reason }).await;
}

/// Names of the serial ports the OS reports
pub fn list_serial_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| GpsError::Other(format!("Failed to list serial ports: {}", e)))?;

    Ok(ports.into_iter().map(|port| port.port_name).collect())
}
