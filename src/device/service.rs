//! Runs a [`SerialManager`] on a single tokio task.
//!
//! The task is the only owner of the manager, so the device handle is never
//! touched concurrently. Callers talk to it through a cloneable
//! [`SerialHandle`]; the task interleaves their requests with the scan timer
//! and the inbound-data poll.

use std::time::Instant;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::serial::{PortInfo, PortSettings, PortSettingsOverride, Result, SerialError};

use super::{ConnectionStatus, SerialEvent, SerialManager};

const COMMAND_CAPACITY: usize = 64;

type Job = Box<dyn FnOnce(&mut SerialManager) + Send>;

enum ServiceCommand {
    Execute(Job),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running serial service
#[derive(Clone)]
pub struct SerialHandle {
    cmd_tx: mpsc::Sender<ServiceCommand>,
    events_tx: broadcast::Sender<SerialEvent>,
}

pub struct SerialService;

impl SerialService {
    /// Move `manager` onto its own task. The task ends after
    /// [`SerialHandle::shutdown`] or once every handle is dropped.
    pub fn spawn(manager: SerialManager) -> (SerialHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let events_tx = manager.event_sender();
        let task = tokio::spawn(service_task(manager, cmd_rx));
        (SerialHandle { cmd_tx, events_tx }, task)
    }
}

async fn service_task(mut manager: SerialManager, mut cmd_rx: mpsc::Receiver<ServiceCommand>) {
    // Created once: frequent commands must not postpone inbound reads
    let mut poll = tokio::time::interval(manager.config().read_poll_interval());
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    log::info!("Serial service started");

    loop {
        let scan_due = manager.next_scan_due();
        let scan_at = tokio::time::Instant::from_std(scan_due.unwrap_or_else(Instant::now));
        let connected = manager.is_connected();

        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(ServiceCommand::Execute(job)) => job(&mut manager),
                Some(ServiceCommand::Shutdown(done)) => {
                    manager.shutdown();
                    let _ = done.send(());
                    break;
                }
                None => {
                    manager.shutdown();
                    break;
                }
            },
            _ = tokio::time::sleep_until(scan_at), if scan_due.is_some() => {
                manager.on_scan_timer();
            }
            _ = poll.tick(), if connected => {
                manager.poll_incoming();
            }
        }
    }

    log::info!("Serial service stopped");
}

impl SerialHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SerialEvent> {
        self.events_tx.subscribe()
    }

    /// Run `f` against the manager on the service task and return its result
    pub async fn execute<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut SerialManager) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |manager: &mut SerialManager| {
            let _ = tx.send(f(manager));
        });
        self.cmd_tx
            .send(ServiceCommand::Execute(job))
            .await
            .map_err(|_| SerialError::ServiceStopped)?;
        rx.await.map_err(|_| SerialError::ServiceStopped)
    }

    pub async fn open(
        &self,
        port_name: impl Into<String>,
        overrides: Option<PortSettingsOverride>,
    ) -> Result<()> {
        let port_name = port_name.into();
        self.execute(move |m| m.open(&port_name, overrides.as_ref()))
            .await?
    }

    pub async fn close(&self, user_requested: bool) -> Result<()> {
        self.execute(move |m| m.close(user_requested)).await
    }

    pub async fn restart_connection(&self) -> Result<()> {
        self.execute(|m| m.restart_connection()).await?
    }

    pub async fn is_connected(&self) -> Result<bool> {
        self.execute(|m| m.is_connected()).await
    }

    pub async fn get_port_name(&self) -> Result<String> {
        self.execute(|m| m.get_port_name().to_string()).await
    }

    pub async fn get_current_settings(&self) -> Result<Option<PortSettings>> {
        self.execute(|m| m.get_current_settings()).await
    }

    pub async fn get_list_ports(&self) -> Result<Vec<String>> {
        self.execute(|m| m.get_list_ports()).await
    }

    pub async fn get_port_info(&self, port_name: impl Into<String>) -> Result<Option<PortInfo>> {
        let port_name = port_name.into();
        self.execute(move |m| m.get_port_info(&port_name)).await
    }

    pub async fn status(&self) -> Result<ConnectionStatus> {
        self.execute(|m| m.status()).await
    }

    pub async fn send_bytes(&self, data: Vec<u8>) -> Result<()> {
        self.execute(move |m| m.send_bytes(&data)).await?
    }

    pub async fn send_text(
        &self,
        text: impl Into<String>,
        append_newline: bool,
        encoding: impl Into<String>,
    ) -> Result<()> {
        let text = text.into();
        let encoding = encoding.into();
        self.execute(move |m| m.send_text(&text, append_newline, &encoding))
            .await?
    }

    pub async fn send_hex(&self, hex_str: impl Into<String>) -> Result<()> {
        let hex_str = hex_str.into();
        self.execute(move |m| m.send_hex(&hex_str)).await?
    }

    /// Run a scan tick now instead of waiting for the timer
    pub async fn scan_now(&self) -> Result<()> {
        self.execute(|m| m.scan_tick()).await
    }

    /// Shut the manager down and stop the service task
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ServiceCommand::Shutdown(tx))
            .await
            .map_err(|_| SerialError::ServiceStopped)?;
        rx.await.map_err(|_| SerialError::ServiceStopped)
    }
}
