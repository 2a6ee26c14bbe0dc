pub mod manager;
pub mod models;
pub mod port_monitor;
pub mod service;

pub use manager::SerialManager;
pub use models::*;
pub use port_monitor::PortScanner;
pub use service::{SerialHandle, SerialService};
