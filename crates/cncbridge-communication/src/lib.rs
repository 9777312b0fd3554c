//! # cncbridge-communication
//!
//! Device communication for cncbridge: the transport abstraction with its
//! serial implementation, the flow-controlled transmit queue that carries
//! instruction lifecycles to the wire, and the simulator backend used as
//! the reference implementation of the controller contract.

pub mod firmware;
pub mod queue;
pub mod transport;

pub use firmware::{SimConfig, SimController, SimDevice, SimLink};
pub use queue::{TransmitQueue, TransmitQueueConfig, TransmitRecord};
pub use transport::{
    list_ports, ConnectionParams, SerialParity, SerialPortInfo, SerialTransport, Transport,
};
