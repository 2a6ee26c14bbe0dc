#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use configver_lib::config::ManagerConfig;
use configver_lib::device::{SerialEvent, SerialManager};
use configver_lib::serial::{PortHandle, PortInfo, PortSettings, Result, SerialBackend, SerialError};
use tokio::sync::broadcast;

/// Shared state behind the mock backend and every port it opens
#[derive(Default)]
pub struct MockState {
    pub ports: Vec<PortInfo>,
    pub open_error: Option<io::ErrorKind>,
    pub opened: Vec<(String, PortSettings)>,
    pub open_handles: usize,
    pub written: Vec<u8>,
    pub write_limit: Option<usize>,
    pub write_error: Option<io::ErrorKind>,
    pub incoming: VecDeque<u8>,
    pub read_error: Option<io::ErrorKind>,
    pub fail_control: bool,
    pub steps: Vec<&'static str>,
}

#[derive(Clone, Default)]
pub struct MockBackend {
    pub state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn with_ports(names: &[&str]) -> Self {
        let backend = Self::default();
        backend.set_ports(names);
        backend
    }

    pub fn set_ports(&self, names: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.ports = names
            .iter()
            .map(|n| PortInfo {
                description: Some(format!("Mock device on {}", n)),
                manufacturer: Some("Mock".to_string()),
                vendor_id: Some(0x1A86),
                product_id: Some(0x7523),
                system_location: Some(format!("/dev/{}", n)),
                ..PortInfo::new(*n)
            })
            .collect();
    }

    pub fn push_incoming(&self, data: &[u8]) {
        self.state.lock().unwrap().incoming.extend(data.iter().copied());
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().opened.len()
    }

    pub fn last_opened(&self) -> Option<(String, PortSettings)> {
        self.state.lock().unwrap().opened.last().cloned()
    }

    pub fn open_handles(&self) -> usize {
        self.state.lock().unwrap().open_handles
    }

    pub fn steps(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().steps.clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut MockState)) {
        f(&mut self.state.lock().unwrap());
    }
}

fn io_error(kind: io::ErrorKind) -> SerialError {
    SerialError::IoError(io::Error::new(kind, "mock failure"))
}

impl SerialBackend for MockBackend {
    fn available_ports(&self) -> Result<Vec<PortInfo>> {
        Ok(self.state.lock().unwrap().ports.clone())
    }

    fn open(&self, port_name: &str, settings: &PortSettings) -> Result<Box<dyn PortHandle>> {
        let mut state = self.state.lock().unwrap();
        if let Some(kind) = state.open_error {
            return Err(io_error(kind));
        }
        state.opened.push((port_name.to_string(), *settings));
        state.open_handles += 1;
        Ok(Box::new(MockPort {
            state: self.state.clone(),
        }))
    }
}

pub struct MockPort {
    state: Arc<Mutex<MockState>>,
}

impl MockPort {
    fn control(&mut self, step: &'static str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.steps.push(step);
        if state.fail_control {
            Err(io_error(io::ErrorKind::Other))
        } else {
            Ok(())
        }
    }
}

impl PortHandle for MockPort {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        if let Some(kind) = state.write_error {
            return Err(io_error(kind));
        }
        let n = state.write_limit.map_or(data.len(), |limit| limit.min(data.len()));
        state.written.extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn bytes_to_read(&mut self) -> Result<usize> {
        let state = self.state.lock().unwrap();
        match state.read_error {
            Some(kind) => Err(io_error(kind)),
            None => Ok(state.incoming.len()),
        }
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let n = buffer.len().min(state.incoming.len());
        for (slot, byte) in buffer.iter_mut().zip(state.incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn set_data_terminal_ready(&mut self, _level: bool) -> Result<()> {
        self.control("dtr")
    }

    fn set_request_to_send(&mut self, _level: bool) -> Result<()> {
        self.control("rts")
    }

    fn flush(&mut self) -> Result<()> {
        self.control("flush")
    }

    fn clear(&mut self) -> Result<()> {
        self.control("clear")
    }

    fn wait_for_bytes_written(&mut self, _timeout: Duration) -> Result<bool> {
        self.control("drain").map(|_| true)
    }
}

impl Drop for MockPort {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.open_handles -= 1;
        state.steps.push("close");
    }
}

pub fn test_config() -> ManagerConfig {
    ManagerConfig::new(2000, true)
}

pub fn manager_with(backend: &MockBackend, config: ManagerConfig) -> SerialManager {
    SerialManager::new(config, Box::new(backend.clone()))
}

/// Everything emitted so far
pub fn drain(rx: &mut broadcast::Receiver<SerialEvent>) -> Vec<SerialEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn errors(events: &[SerialEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SerialEvent::Error { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

pub fn sent(events: &[SerialEvent]) -> Vec<Vec<u8>> {
    events
        .iter()
        .filter_map(|e| match e {
            SerialEvent::DataSent { data, .. } => Some(data.clone()),
            _ => None,
        })
        .collect()
}

pub fn connection_changes(events: &[SerialEvent]) -> Vec<(bool, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            SerialEvent::ConnectionChanged { connected, port } => Some((*connected, port.clone())),
            _ => None,
        })
        .collect()
}
