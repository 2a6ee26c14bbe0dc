use std::time::{Duration, Instant};

/// Periodic port scan state: the scan timer and the cache of the last
/// observed port list.
#[derive(Debug)]
pub struct PortScanner {
    interval: Duration,
    next_due: Option<Instant>,
    known_ports: Vec<String>,
}

impl PortScanner {
    /// Create a scanner with its timer already running
    pub fn new(interval: Duration) -> Self {
        let mut scanner = Self {
            interval,
            next_due: None,
            known_ports: Vec::new(),
        };
        scanner.start();
        scanner
    }

    /// (Re)start the timer. The next tick is one full interval from now.
    pub fn start(&mut self) {
        self.next_due = Some(Instant::now() + self.interval);
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    pub fn is_active(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    #[cfg(test)]
    fn is_due(&self, now: Instant) -> bool {
        self.next_due.is_some_and(|due| now >= due)
    }

    /// Record a fresh enumeration. Returns true when it differs (membership
    /// or order) from the previous one.
    pub fn observe(&mut self, ports: &[String]) -> bool {
        if self.known_ports.as_slice() == ports {
            return false;
        }
        self.known_ports = ports.to_vec();
        true
    }

    #[cfg(test)]
    fn known_ports(&self) -> &[String] {
        &self.known_ports
    }
}
