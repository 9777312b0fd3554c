//! Serial port transport.
//!
//! Direct hardware connection to CNC controllers via USB or RS-232: port
//! enumeration narrowed to device names CNC hardware actually enumerates
//! under, and a [`Transport`] implementation over the `serialport` crate.

use super::{ConnectionParams, SerialParity, Transport};
use cncbridge_core::{MachineError, Result};
use std::io::{Read, Write};
use std::time::Duration;

/// Device-name families CNC controllers show up as. Windows COM ports are
/// handled separately since they need a numeric suffix check.
const CNC_PORT_PREFIXES: &[&str] = &[
    "/dev/ttyUSB",       // Linux USB-serial bridges
    "/dev/ttyACM",       // Linux CDC-ACM (grblHAL, most 32-bit boards)
    "/dev/cu.usbserial-", // macOS
    "/dev/cu.usbmodem",  // macOS
];

fn is_cnc_port(name: &str) -> bool {
    if let Some(digits) = name.strip_prefix("COM") {
        return !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit());
    }
    CNC_PORT_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// Information about an available serial port.
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g. "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Human-readable description.
    pub description: String,
    /// Manufacturer, if reported.
    pub manufacturer: Option<String>,
    /// Serial number, if reported.
    pub serial_number: Option<String>,
    /// USB vendor id, if applicable.
    pub vid: Option<u16>,
    /// USB product id, if applicable.
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    fn from_raw(raw: &serialport::SerialPortInfo) -> Self {
        let mut info = Self {
            port_name: raw.port_name.clone(),
            description: String::new(),
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
        };
        info.description = match &raw.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                info.vid = Some(usb.vid);
                info.pid = Some(usb.pid);
                info.manufacturer = usb.manufacturer.clone();
                info.serial_number = usb.serial_number.clone();
                match (&usb.manufacturer, &usb.product) {
                    (Some(mfg), Some(product)) => format!("{} {}", mfg, product),
                    (None, Some(product)) => product.clone(),
                    _ => "USB serial device".to_string(),
                }
            }
            serialport::SerialPortType::BluetoothPort => "Bluetooth serial adapter".to_string(),
            serialport::SerialPortType::PciPort => "PCI UART".to_string(),
            _ => "serial device".to_string(),
        };
        info
    }
}

/// List serial ports that look like CNC controllers.
///
/// Non-matching system ports (onboard UARTs, virtual consoles) are
/// filtered out: only the known USB/ACM/usbmodem device families and
/// numbered `COM*` ports on Windows are returned.
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("serial port enumeration failed: {}", e);
        MachineError::comm(format!("serial port enumeration failed: {}", e))
    })?;

    Ok(ports
        .iter()
        .filter(|raw| is_cnc_port(&raw.port_name))
        .map(SerialPortInfo::from_raw)
        .collect())
}

impl SerialParity {
    fn to_native(self) -> serialport::Parity {
        match self {
            SerialParity::None => serialport::Parity::None,
            SerialParity::Even => serialport::Parity::Even,
            SerialParity::Odd => serialport::Parity::Odd,
        }
    }
}

fn word_length(bits: u8) -> Result<serialport::DataBits> {
    use serialport::DataBits;
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(MachineError::comm(format!(
            "unsupported word length: {} data bits",
            other
        ))),
    }
}

fn stop_bits(count: u8) -> Result<serialport::StopBits> {
    use serialport::StopBits;
    match count {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(MachineError::comm(format!(
            "unsupported stop-bit count: {}",
            other
        ))),
    }
}

fn open_port(params: &ConnectionParams) -> Result<Box<dyn serialport::SerialPort>> {
    let flow = if params.flow_control {
        serialport::FlowControl::Hardware
    } else {
        serialport::FlowControl::None
    };
    serialport::new(&params.port, params.baud_rate)
        .data_bits(word_length(params.data_bits)?)
        .stop_bits(stop_bits(params.stop_bits)?)
        .parity(params.parity.to_native())
        .flow_control(flow)
        .timeout(Duration::from_millis(params.timeout_ms))
        .open()
        .map_err(|e| {
            tracing::warn!("cannot open {}: {}", params.port, e);
            MachineError::comm(format!("cannot open {}: {}", params.port, e))
        })
}

/// [`Transport`] over a physical serial port.
pub struct SerialTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialTransport {
    /// Create an unconnected serial transport.
    pub fn new() -> Self {
        Self { port: None }
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self, params: &ConnectionParams) -> Result<()> {
        self.port = Some(open_port(params)?);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.port = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn send(&mut self, data: &[u8]) -> Result<usize> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| MachineError::comm("serial port not open"))?;
        port.write(data)
            .map_err(|e| MachineError::comm(format!("serial write failed: {}", e)))
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| MachineError::comm("serial port not open"))?;
        let mut buf = [0u8; 512];
        match port.read(&mut buf) {
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(MachineError::comm(format!("serial read failed: {}", e))),
        }
    }
}
