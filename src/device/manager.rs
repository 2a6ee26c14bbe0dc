use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::config::ManagerConfig;
use crate::serial::payload::{encode_text, parse_hex, with_newline};
use crate::serial::{
    Operation, PortErrorKind, PortHandle, PortInfo, PortSettings, PortSettingsOverride, Result,
    SerialBackend, SerialError, SystemSerial,
};

use super::{ConnectionState, ConnectionStatus, PortScanner, SerialEvent};

/// The live device handle and what was applied to it
struct ActiveConnection {
    port_name: String,
    handle: Box<dyn PortHandle>,
    settings: PortSettings,
    connected_since: DateTime<Utc>,
    bytes_sent: u64,
    bytes_received: u64,
}

/// Serial connection manager
///
/// Owns at most one open port and drives port scanning, auto-reconnect,
/// inbound/outbound data and error recovery. All notifications go out on a
/// broadcast channel (see [`SerialManager::subscribe`]). Every operation
/// reports its failures on that channel before returning them.
///
/// The manager is driven by one caller: either directly (calling
/// [`scan_tick`](Self::scan_tick) and [`poll_incoming`](Self::poll_incoming)
/// from a host loop) or through [`SerialService`](super::SerialService).
pub struct SerialManager {
    backend: Box<dyn SerialBackend>,
    config: ManagerConfig,
    connection: Option<ActiveConnection>,
    /// Port the user most recently asked for. Survives non-user closes so
    /// the port can be reopened when it reappears.
    target: String,
    scanner: PortScanner,
    shutting_down: bool,
    events: broadcast::Sender<SerialEvent>,
}

impl SerialManager {
    pub fn new(config: ManagerConfig, backend: Box<dyn SerialBackend>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let scanner = PortScanner::new(config.scan_interval());
        log::debug!(
            "Serial manager created (scan every {:?}, auto-reconnect {})",
            config.scan_interval(),
            config.auto_reconnect
        );
        Self {
            backend,
            config,
            connection: None,
            target: String::new(),
            scanner,
            shutting_down: false,
            events,
        }
    }

    /// Manager over the host's real serial ports
    pub fn with_system_ports(config: ManagerConfig) -> Self {
        Self::new(config, Box::new(SystemSerial::new()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SerialEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<SerialEvent> {
        self.events.clone()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn emit(&self, event: SerialEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    /// Emit `err` on the error channel and hand it back for returning
    fn report(&self, err: SerialError, port: &str) -> SerialError {
        log::warn!("[{}] {}", port, err);
        self.emit(SerialEvent::Error {
            message: err.to_string(),
            port: port.to_string(),
        });
        err
    }

    // ---------------------------------------------------------------------
    // Port scanning
    // ---------------------------------------------------------------------

    /// One scan tick: refresh the port list, notify on change, then run the
    /// auto-reconnect check.
    pub fn scan_tick(&mut self) {
        if self.shutting_down {
            return;
        }
        let ports = self.get_list_ports();
        if self.scanner.observe(&ports) {
            log::debug!("Ports changed: {:?}", ports);
            self.emit(SerialEvent::PortsChanged {
                ports: ports.clone(),
            });
        }
        self.try_reconnect(&ports);
    }

    /// Called by the scheduler when the scan deadline passes
    pub fn on_scan_timer(&mut self) {
        if self.shutting_down {
            return;
        }
        // Re-arm first so an open during the tick can stop the timer
        self.scanner.start();
        self.scan_tick();
    }

    /// When the next scan tick is due, or `None` while scanning is suspended
    pub fn next_scan_due(&self) -> Option<Instant> {
        self.scanner.next_due()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_active()
    }

    /// Names of the ports currently present, e.g. `["COM7", "COM11"]`
    pub fn get_list_ports(&self) -> Vec<String> {
        self.available_ports()
            .into_iter()
            .map(|info| info.port_name)
            .collect()
    }

    /// Metadata for `port_name` if it is currently enumerated
    pub fn get_port_info(&self, port_name: &str) -> Option<PortInfo> {
        self.available_ports()
            .into_iter()
            .find(|info| info.port_name == port_name)
    }

    fn available_ports(&self) -> Vec<PortInfo> {
        match self.backend.available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                log::warn!("Failed to enumerate serial ports: {}", e);
                Vec::new()
            }
        }
    }

    fn try_reconnect(&mut self, ports: &[String]) {
        if !self.config.auto_reconnect || self.is_connected() || self.target.is_empty() {
            return;
        }
        if ports.iter().any(|p| *p == self.target) {
            let target = self.target.clone();
            log::info!("Port {} reappeared, reconnecting", target);
            if self.open(&target, None).is_err() {
                log::debug!("Reconnect to {} failed, retrying on next scan", target);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Connection control
    // ---------------------------------------------------------------------

    /// Open `port_name`, closing any current connection first. Settings are
    /// the configured defaults with `overrides` applied per field.
    ///
    /// The name is remembered as the target even when the open fails, so
    /// auto-reconnect can pick it up later.
    pub fn open(&mut self, port_name: &str, overrides: Option<&PortSettingsOverride>) -> Result<()> {
        if self.shutting_down {
            return Err(self.report(SerialError::ShutDown, port_name));
        }
        if port_name.is_empty() {
            return Err(self.report(SerialError::EmptyPortName, ""));
        }

        if self.connection.is_some() {
            self.close_port(true, false);
        }

        self.target = port_name.to_string();

        let settings = match overrides {
            Some(o) => self.config.default_settings.merged(o),
            None => self.config.default_settings,
        };
        if let Err(e) = settings.validate() {
            return Err(self.report(e, port_name));
        }

        match self.backend.open(port_name, &settings) {
            Ok(handle) => {
                self.connection = Some(ActiveConnection {
                    port_name: port_name.to_string(),
                    handle,
                    settings,
                    connected_since: Utc::now(),
                    bytes_sent: 0,
                    bytes_received: 0,
                });
                log::info!("Connected to {} ({})", port_name, settings);
                self.emit(SerialEvent::ConnectionChanged {
                    connected: true,
                    port: port_name.to_string(),
                });
                self.scanner.stop();
                Ok(())
            }
            Err(e) => {
                // A failed open never yields a handle, so there is nothing
                // half-initialized left to release.
                log::debug!("Open of {} failed: {}", port_name, e);
                let reason = PortErrorKind::classify(&e, Operation::Open);
                Err(self.report(
                    SerialError::OpenFailed {
                        port: port_name.to_string(),
                        reason,
                    },
                    port_name,
                ))
            }
        }
    }

    /// Close the port. A user close forgets the target, which disables
    /// auto-reconnect for it.
    pub fn close(&mut self, user_requested: bool) {
        self.close_port(true, user_requested);
    }

    /// Close with explicit control over restarting the scan timer
    pub fn close_port(&mut self, restart_scan: bool, user_requested: bool) {
        // Taking the connection detaches it from inbound polling and error
        // handling before any teardown step runs.
        if let Some(mut conn) = self.connection.take() {
            let port = conn.port_name.clone();
            let drain = self.config.close_drain_timeout();

            best_effort(&port, "deassert DTR", conn.handle.set_data_terminal_ready(false));
            best_effort(&port, "deassert RTS", conn.handle.set_request_to_send(false));
            best_effort(&port, "flush", conn.handle.flush());
            best_effort(&port, "clear buffers", conn.handle.clear());
            best_effort(&port, "drain writes", conn.handle.wait_for_bytes_written(drain));

            drop(conn);
            log::info!("Disconnected from {}", port);
            self.emit(SerialEvent::ConnectionChanged {
                connected: false,
                port,
            });
        }

        if user_requested {
            self.target.clear();
        }

        if restart_scan && !self.shutting_down {
            self.scanner.start();
        }
    }

    /// Reopen the remembered target with default settings. Settings from the
    /// previous open are not carried over.
    pub fn restart_connection(&mut self) -> Result<()> {
        if self.target.is_empty() {
            return Ok(());
        }
        let target = self.target.clone();
        self.open(&target, None)
    }

    /// Final close. The scan timer stays stopped and later opens are refused.
    pub fn shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        self.scanner.stop();
        self.close_port(false, true);
        log::debug!("Serial manager shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutting_down
    }

    // ---------------------------------------------------------------------
    // State
    // ---------------------------------------------------------------------

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// The remembered target, empty when there is none
    pub fn get_port_name(&self) -> &str {
        &self.target
    }

    /// Settings of the open port, `None` while disconnected
    pub fn get_current_settings(&self) -> Option<PortSettings> {
        self.connection.as_ref().map(|c| c.settings)
    }

    pub fn status(&self) -> ConnectionStatus {
        let conn = self.connection.as_ref();
        ConnectionStatus {
            state: self.state(),
            target_port: self.target.clone(),
            settings: conn.map(|c| c.settings),
            bytes_sent: conn.map_or(0, |c| c.bytes_sent),
            bytes_received: conn.map_or(0, |c| c.bytes_received),
            connected_since: conn.map(|c| c.connected_since),
            scanning: self.scanner.is_active(),
        }
    }

    // ---------------------------------------------------------------------
    // Sending
    // ---------------------------------------------------------------------

    /// Write `data` as-is. Anything short of the full buffer is a failure.
    pub fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        let flush_timeout = self.config.send_flush_timeout();
        let Some(conn) = self.connection.as_mut() else {
            let port = self.target.clone();
            return Err(self.report(SerialError::NotOpen, &port));
        };
        let port = conn.port_name.clone();

        let written = match conn.handle.write(data) {
            Ok(n) => n,
            Err(e) => {
                let kind = PortErrorKind::classify(&e, Operation::Write);
                let err = self.report(SerialError::WriteFailed(kind), &port);
                if kind.is_device_loss() {
                    self.handle_error(kind);
                }
                return Err(err);
            }
        };

        match conn.handle.wait_for_bytes_written(flush_timeout) {
            Ok(true) => {}
            Ok(false) => log::debug!("[{}] write still pending after {:?}", port, flush_timeout),
            Err(e) => log::debug!("[{}] waiting for write failed: {}", port, e),
        }
        conn.bytes_sent += written as u64;

        if written == data.len() {
            self.emit(SerialEvent::DataSent {
                data: data.to_vec(),
                port,
            });
            Ok(())
        } else {
            Err(self.report(
                SerialError::PartialWrite {
                    written,
                    requested: data.len(),
                },
                &port,
            ))
        }
    }

    /// Send text, appending '\n' when `append_newline` is set and the text
    /// does not already end with one.
    pub fn send_text(&mut self, text: &str, append_newline: bool, encoding: &str) -> Result<()> {
        let text = if append_newline {
            with_newline(text)
        } else {
            text.to_string()
        };
        let bytes = encode_text(&text, encoding).map_err(|e| self.report(e, &self.target))?;
        self.send_bytes(&bytes)
    }

    /// Send a hex string such as "7E 01 02 7E"
    pub fn send_hex(&mut self, hex_str: &str) -> Result<()> {
        let bytes = parse_hex(hex_str).map_err(|e| self.report(e, &self.target))?;
        self.send_bytes(&bytes)
    }

    // ---------------------------------------------------------------------
    // Receiving and device errors
    // ---------------------------------------------------------------------

    /// Read everything currently buffered on the open port and emit it as
    /// one chunk. Device errors go through [`handle_error`](Self::handle_error).
    pub fn poll_incoming(&mut self) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };

        match read_available(conn.handle.as_mut()) {
            Ok(data) if data.is_empty() => {}
            Ok(data) => {
                conn.bytes_received += data.len() as u64;
                let port = conn.port_name.clone();
                self.emit(SerialEvent::DataReceived { data, port });
            }
            Err(e) => {
                let kind = PortErrorKind::classify(&e, Operation::Read);
                self.handle_error(kind);
            }
        }
    }

    /// Report a device error for the open port. Device loss closes the port
    /// but keeps the target for auto-reconnect.
    pub fn handle_error(&mut self, kind: PortErrorKind) {
        if kind == PortErrorKind::NoError {
            return;
        }
        if self.connection.is_none() {
            log::debug!("Ignoring {:?} with no open port", kind);
            return;
        }

        let port = self.target.clone();
        log::warn!("[{}] {}", port, kind);
        self.emit(SerialEvent::Error {
            message: kind.to_string(),
            port,
        });

        if kind.is_device_loss() {
            self.close_port(true, false);
        }
    }
}

impl Drop for SerialManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn best_effort<T>(port: &str, step: &str, result: Result<T>) {
    if let Err(e) = result {
        log::debug!("[{}] {} failed during close: {}", port, step, e);
    }
}

fn read_available(handle: &mut dyn PortHandle) -> Result<Vec<u8>> {
    let pending = handle.bytes_to_read()?;
    if pending == 0 {
        return Ok(Vec::new());
    }
    let mut buffer = vec![0u8; pending];
    let n = handle.read(&mut buffer)?;
    buffer.truncate(n);
    Ok(buffer)
}
