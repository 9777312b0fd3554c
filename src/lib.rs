//! # cncbridge
//!
//! A backend CNC controller-abstraction layer: it owns the live connection
//! to a hobby CNC motion controller, mirrors the machine's kinematic and
//! modal state, and mediates the flow of G-code instructions between job
//! logic and the physical device.
//!
//! ## Architecture
//!
//! The workspace is organized as two crates plus this integration layer:
//!
//! 1. **cncbridge-core** - state vector, coordinate resolver, instruction
//!    lifecycle bus, controller contract, event broadcast, error taxonomy
//! 2. **cncbridge-communication** - transport abstraction, serial port
//!    implementation, flow-controlled transmit queue, simulator backend
//!
//! Concrete firmware backends implement [`Controller`] against their own
//! transport and protocol; job servers and UIs consume the contract and
//! the typed event hub without knowing which firmware is on the wire.

pub use cncbridge_core::{
    completion, Controller, ControllerEvents, CoolantMode, ErrorKind, GcodeHooks,
    GcodeInstruction, HookBundle, InstructionTracker, LifecycleStage, MachineError, MachineState,
    Result, SendItem, SendOptions, SendStream, SharedState, SpindleDirection, StatusSnapshot,
    Units,
};

pub use cncbridge_communication::{
    list_ports, ConnectionParams, SerialParity, SerialPortInfo, SerialTransport, SimConfig,
    SimController, SimDevice, Transport, TransmitQueue, TransmitQueueConfig,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time).
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration.
///
/// Structured console logging with `RUST_LOG` environment variable support;
/// defaults to `info` level.
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}
