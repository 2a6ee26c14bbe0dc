use std::io::{Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort, SerialPortType};

use super::{PortInfo, PortSettings, Result};

/// Read timeout on opened ports. Reads only happen once the driver has seen
/// pending bytes, so this only bounds a misbehaving driver.
pub const READ_TIMEOUT: Duration = Duration::from_millis(10);

const WRITE_POLL_STEP: Duration = Duration::from_millis(5);

/// Host side of the serial layer: port enumeration and opening
pub trait SerialBackend: Send {
    /// Ports currently present on the host, in enumeration order
    fn available_ports(&self) -> Result<Vec<PortInfo>>;

    /// Open `port_name` for reading and writing with the given settings
    fn open(&self, port_name: &str, settings: &PortSettings) -> Result<Box<dyn PortHandle>>;
}

/// An open device. Dropping the handle closes it.
pub trait PortHandle: Send {
    /// Write as much of `data` as the device accepts, returning the count
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Number of bytes waiting in the input buffer
    fn bytes_to_read(&mut self) -> Result<usize>;

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    fn set_data_terminal_ready(&mut self, level: bool) -> Result<()>;

    fn set_request_to_send(&mut self, level: bool) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Discard buffered data in both directions
    fn clear(&mut self) -> Result<()>;

    /// Wait until the output buffer drains or `timeout` expires. Returns
    /// whether it drained.
    fn wait_for_bytes_written(&mut self, timeout: Duration) -> Result<bool>;
}

/// `SerialBackend` backed by the host's serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSerial;

impl SystemSerial {
    pub fn new() -> Self {
        Self
    }

    fn port_info(port: serialport::SerialPortInfo) -> PortInfo {
        let mut info = PortInfo::new(port.port_name.clone());
        info.system_location = Some(port.port_name);
        match port.port_type {
            SerialPortType::UsbPort(usb_info) => {
                info.description = usb_info.product;
                info.manufacturer = usb_info.manufacturer;
                info.serial_number = usb_info.serial_number;
                info.vendor_id = Some(usb_info.vid);
                info.product_id = Some(usb_info.pid);
            }
            SerialPortType::PciPort => info.description = Some("PCI serial port".into()),
            SerialPortType::BluetoothPort => info.description = Some("Bluetooth serial port".into()),
            SerialPortType::Unknown => {}
        }
        info
    }
}

impl SerialBackend for SystemSerial {
    fn available_ports(&self) -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(Self::port_info).collect())
    }

    fn open(&self, port_name: &str, settings: &PortSettings) -> Result<Box<dyn PortHandle>> {
        let port = serialport::new(port_name, settings.baud_rate)
            .data_bits(settings.serial_data_bits()?)
            .parity(settings.parity.into())
            .stop_bits(settings.serial_stop_bits()?)
            .flow_control(settings.flow_control.into())
            .timeout(READ_TIMEOUT)
            .open()?;

        log::debug!("Opened {} with {}", port_name, settings);
        Ok(Box::new(SystemPort { port }))
    }
}

/// Blocking `serialport` handle. Calls block the caller, including the drain
/// wait, which is bounded by its timeout (100-150 ms by default). The service
/// task stalls for at most that long.
struct SystemPort {
    port: Box<dyn SerialPort>,
}

impl PortHandle for SystemPort {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.port.write(data)?)
    }

    fn bytes_to_read(&mut self) -> Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        Ok(self.port.read(buffer)?)
    }

    fn set_data_terminal_ready(&mut self, level: bool) -> Result<()> {
        Ok(self.port.write_data_terminal_ready(level)?)
    }

    fn set_request_to_send(&mut self, level: bool) -> Result<()> {
        Ok(self.port.write_request_to_send(level)?)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.port.flush()?)
    }

    fn clear(&mut self) -> Result<()> {
        Ok(self.port.clear(ClearBuffer::All)?)
    }

    fn wait_for_bytes_written(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.port.bytes_to_write()? == 0 {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(WRITE_POLL_STEP);
        }
    }
}
