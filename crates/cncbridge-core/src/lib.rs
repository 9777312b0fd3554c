//! # cncbridge-core
//!
//! Core abstractions for the cncbridge controller layer: the mirrored
//! machine state vector, work-coordinate resolution, the instruction
//! lifecycle bus, the polymorphic controller contract, the typed event
//! broadcast, and the error taxonomy shared by every backend.

pub mod controller;
pub mod coords;
pub mod error;
pub mod events;
pub mod gcode;
pub mod lifecycle;
pub mod state;
pub mod stream;

pub use controller::{Controller, SendOptions};
pub use error::{ErrorKind, MachineError, Result};
pub use events::ControllerEvents;
pub use gcode::{FanoutHooks, GcodeHooks, GcodeInstruction, HookBundle, SendItem};
pub use lifecycle::{completion, CompletionHooks, InstructionTracker, LifecycleStage};
pub use state::{
    CoolantMode, MachineState, SharedState, SpindleDirection, StatusSnapshot, Units,
};
pub use stream::SendStream;
