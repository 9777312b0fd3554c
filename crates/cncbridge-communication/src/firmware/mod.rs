//! Backend implementations of the controller contract.
//!
//! Each backend owns one transport and one mirrored state vector. The
//! simulator backend ships in-tree; firmware-specific backends (GRBL,
//! TinyG, ...) plug in through the same [`cncbridge_core::Controller`]
//! trait and transmit-queue machinery.

pub mod sim;

pub use sim::{SimConfig, SimController, SimDevice, SimLink};
