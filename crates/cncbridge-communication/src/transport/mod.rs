//! Transport abstraction.
//!
//! A [`Transport`] is the byte pipe between a controller backend and the
//! physical device: serial/USB in production, an in-memory link for the
//! simulator. Transports are exclusively owned by one controller instance.

pub mod serial;

use cncbridge_core::Result;

pub use serial::{list_ports, SerialPortInfo, SerialTransport};

/// Serial parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerialParity {
    /// No parity bit.
    #[default]
    None,
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
}

/// Parameters for opening a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionParams {
    /// Port name (e.g. "/dev/ttyUSB0", "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Data bits (5-8).
    pub data_bits: u8,
    /// Stop bits (1-2).
    pub stop_bits: u8,
    /// Parity setting.
    pub parity: SerialParity,
    /// Hardware flow control.
    pub flow_control: bool,
    /// Read timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: false,
            timeout_ms: 10,
        }
    }
}

/// Byte-level connection to a device.
///
/// All operations are non-blocking or bounded by the configured timeout;
/// failures surface as `comm_error`.
pub trait Transport: Send {
    /// Open the connection.
    fn connect(&mut self, params: &ConnectionParams) -> Result<()>;

    /// Close the connection.
    fn disconnect(&mut self) -> Result<()>;

    /// Whether the connection is open.
    fn is_connected(&self) -> bool;

    /// Write raw bytes; returns the number written.
    fn send(&mut self, data: &[u8]) -> Result<usize>;

    /// Read whatever bytes are currently available (possibly none).
    fn receive(&mut self) -> Result<Vec<u8>>;
}
