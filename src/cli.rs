//! Serial console: lists ports, or opens one and mirrors traffic.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::device::{SerialEvent, SerialHandle, SerialManager, SerialService};
use crate::serial::payload::format_hex;
use crate::serial::{FlowControl, Parity, PortSettingsOverride};

/// Exit code when the requested port cannot be opened
pub const EXIT_OPEN_FAILED: i32 = 2;

const HEX_PREFIX: &str = "hex:";

#[derive(Debug, Parser)]
#[command(name = "configver", version, about = "Serial console for tracker configuration")]
pub struct Cli {
    /// Port to open (e.g. COM7 or /dev/ttyUSB0). Lists ports when omitted.
    pub port: Option<String>,

    #[arg(short, long)]
    pub baud: Option<u32>,

    #[arg(long)]
    pub data_bits: Option<u8>,

    /// none, odd or even
    #[arg(long)]
    pub parity: Option<Parity>,

    #[arg(long)]
    pub stop_bits: Option<u8>,

    /// none, software or hardware
    #[arg(long)]
    pub flow_control: Option<FlowControl>,

    /// Text sent periodically while connected
    #[arg(long, default_value = "PING")]
    pub ping: String,

    /// Seconds between pings, 0 disables
    #[arg(long, default_value_t = 2)]
    pub ping_interval: u64,

    /// Text encoding for outgoing lines
    #[arg(long, default_value = "utf-8")]
    pub encoding: String,

    /// Do not reopen the port when it disappears and comes back
    #[arg(long)]
    pub no_reconnect: bool,

    /// JSON settings file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn settings_override(&self) -> PortSettingsOverride {
        PortSettingsOverride {
            baud_rate: self.baud,
            data_bits: self.data_bits,
            parity: self.parity,
            stop_bits: self.stop_bits,
            flow_control: self.flow_control,
        }
    }
}

pub async fn execute(cli: Cli, mut config: AppConfig) -> anyhow::Result<i32> {
    if cli.no_reconnect {
        config.serial.auto_reconnect = false;
    }
    let manager = SerialManager::with_system_ports(config.serial);

    let Some(port) = cli.port.clone() else {
        list_ports(&manager);
        return Ok(0);
    };

    let events = manager.subscribe();
    let (handle, task) = SerialService::spawn(manager);
    let printer = tokio::spawn(print_events(events));

    let code = match handle.open(port.as_str(), Some(cli.settings_override())).await {
        Ok(()) => {
            console(&handle, &cli).await;
            0
        }
        Err(e) => {
            log::error!("Could not start session on {}: {}", port, e);
            EXIT_OPEN_FAILED
        }
    };

    handle.shutdown().await?;
    task.await?;
    drop(handle);
    printer.await?;
    Ok(code)
}

fn list_ports(manager: &SerialManager) {
    let ports = manager.get_list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
    } else {
        println!("Available ports:");
        for name in ports {
            match manager.get_port_info(&name).map(|info| serde_json::to_string(&info)) {
                Some(Ok(info)) => println!(" - {} {}", name, info),
                _ => println!(" - {}", name),
            }
        }
    }
    println!("\nUsage: configver <PORT> [--baud N]");
}

/// Forward stdin and pings to the port until Ctrl-C
async fn console(handle: &SerialHandle, cli: &Cli) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let ping_period = Duration::from_secs(cli.ping_interval.max(1));
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + ping_period, ping_period);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, closing");
                break;
            }
            _ = ping.tick(), if cli.ping_interval > 0 => {
                if let Err(e) = handle.send_text(cli.ping.as_str(), true, cli.encoding.as_str()).await {
                    log::debug!("Ping not sent: {}", e);
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => send_line(handle, &line, &cli.encoding).await,
                Ok(None) => stdin_open = false,
                Err(e) => {
                    log::warn!("stdin closed: {}", e);
                    stdin_open = false;
                }
            },
        }
    }
}

async fn send_line(handle: &SerialHandle, line: &str, encoding: &str) {
    let result = match line.strip_prefix(HEX_PREFIX) {
        Some(hex_str) => handle.send_hex(hex_str).await,
        None => handle.send_text(line, true, encoding).await,
    };
    // Failures were already printed from the event stream
    if let Err(e) = result {
        log::debug!("Line not sent: {}", e);
    }
}

async fn print_events(mut events: broadcast::Receiver<SerialEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => println!("{}", describe(&event)),
            Err(broadcast::error::RecvError::Lagged(n)) => log::warn!("Dropped {} events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// One console line per event
pub fn describe(event: &SerialEvent) -> String {
    match event {
        SerialEvent::PortsChanged { ports } => format!("[ports] {:?}", ports),
        SerialEvent::ConnectionChanged { connected, port } => {
            format!("[conn] {} {}", if *connected { "OPEN" } else { "CLOSED" }, port)
        }
        SerialEvent::Error { message, port } => format!("[error] {}: {}", port, message),
        SerialEvent::DataReceived { data, port } => {
            format!("[rx {}] {} | {:?}", port, format_hex(data), String::from_utf8_lossy(data))
        }
        SerialEvent::DataSent { data, port } => {
            format!("[tx {}] {} | {:?}", port, format_hex(data), String::from_utf8_lossy(data))
        }
    }
}
