use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{Result, SerialError};

pub const DEFAULT_BAUD_RATE: u32 = 115200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

impl FromStr for Parity {
    type Err = SerialError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Parity::None),
            "odd" | "o" => Ok(Parity::Odd),
            "even" | "e" => Ok(Parity::Even),
            other => Err(SerialError::InvalidSettings(format!("unknown parity '{}'", other))),
        }
    }
}

impl FromStr for FlowControl {
    type Err = SerialError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(FlowControl::None),
            "software" | "xonxoff" => Ok(FlowControl::Software),
            "hardware" | "rtscts" => Ok(FlowControl::Hardware),
            other => Err(SerialError::InvalidSettings(format!(
                "unknown flow control '{}'",
                other
            ))),
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(p: Parity) -> Self {
        match p {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(f: FlowControl) -> Self {
        match f {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

/// Line configuration applied when opening a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub flow_control: FlowControl,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            flow_control: FlowControl::None,
        }
    }
}

/// Caller supplied settings. Unset fields keep the base value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettingsOverride {
    pub baud_rate: Option<u32>,
    pub data_bits: Option<u8>,
    pub parity: Option<Parity>,
    pub stop_bits: Option<u8>,
    pub flow_control: Option<FlowControl>,
}

impl PortSettingsOverride {
    pub fn baud(baud_rate: u32) -> Self {
        Self {
            baud_rate: Some(baud_rate),
            ..Self::default()
        }
    }
}

impl PortSettings {
    /// Merge field by field, the override winning wherever it is set
    pub fn merged(&self, overrides: &PortSettingsOverride) -> Self {
        Self {
            baud_rate: overrides.baud_rate.unwrap_or(self.baud_rate),
            data_bits: overrides.data_bits.unwrap_or(self.data_bits),
            parity: overrides.parity.unwrap_or(self.parity),
            stop_bits: overrides.stop_bits.unwrap_or(self.stop_bits),
            flow_control: overrides.flow_control.unwrap_or(self.flow_control),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(SerialError::InvalidSettings("baud rate must be positive".into()));
        }
        self.serial_data_bits()?;
        self.serial_stop_bits()?;
        Ok(())
    }

    pub fn serial_data_bits(&self) -> Result<serialport::DataBits> {
        match self.data_bits {
            5 => Ok(serialport::DataBits::Five),
            6 => Ok(serialport::DataBits::Six),
            7 => Ok(serialport::DataBits::Seven),
            8 => Ok(serialport::DataBits::Eight),
            n => Err(SerialError::InvalidSettings(format!("unsupported data bits {}", n))),
        }
    }

    pub fn serial_stop_bits(&self) -> Result<serialport::StopBits> {
        match self.stop_bits {
            1 => Ok(serialport::StopBits::One),
            2 => Ok(serialport::StopBits::Two),
            n => Err(SerialError::InvalidSettings(format!("unsupported stop bits {}", n))),
        }
    }
}

impl fmt::Display for PortSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        write!(
            f,
            "{}-{}-{}-{} ({:?} flow)",
            self.baud_rate, self.data_bits, parity, self.stop_bits, self.flow_control
        )
    }
}
