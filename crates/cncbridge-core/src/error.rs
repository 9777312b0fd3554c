//! Error taxonomy for controller operations.
//!
//! Every fallible contract operation returns [`MachineError`], a structured
//! error carrying an enumerated [`ErrorKind`] plus a human-readable message
//! and optional structured detail. The kind set is owned by this module;
//! backends never register new kinds at runtime.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Enumerated error kinds understood by every layer of the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Transport failure communicating with the device.
    #[serde(rename = "comm_error")]
    Comm,
    /// Malformed message received from the device.
    #[serde(rename = "parse_error")]
    Parse,
    /// Device reported a generic error.
    #[serde(rename = "machine_error")]
    Machine,
    /// Operation aborted by cancel/reset or stream-error fan-out.
    #[serde(rename = "cancelled")]
    Cancelled,
    /// Probe reached the commanded endpoint without tripping.
    #[serde(rename = "probe_end")]
    ProbeEnd,
    /// Device refused a probe operation because tripping did not occur.
    #[serde(rename = "probe_not_tripped")]
    ProbeNotTripped,
    /// Probe already in tripped state on entry.
    #[serde(rename = "probe_initial_state")]
    ProbeInitialState,
    /// Safety door or interlock disengaged.
    #[serde(rename = "safety_interlock")]
    SafetyInterlock,
    /// Limit switch engaged unexpectedly.
    #[serde(rename = "limit_hit")]
    LimitHit,
    /// Operation not supported by this backend.
    #[serde(rename = "unsupported")]
    Unsupported,
}

impl ErrorKind {
    /// Stable wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comm => "comm_error",
            Self::Parse => "parse_error",
            Self::Machine => "machine_error",
            Self::Cancelled => "cancelled",
            Self::ProbeEnd => "probe_end",
            Self::ProbeNotTripped => "probe_not_tripped",
            Self::ProbeInitialState => "probe_initial_state",
            Self::SafetyInterlock => "safety_interlock",
            Self::LimitHit => "limit_hit",
            Self::Unsupported => "unsupported",
        }
    }

    /// Parse a wire name back into a kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "comm_error" => Some(Self::Comm),
            "parse_error" => Some(Self::Parse),
            "machine_error" => Some(Self::Machine),
            "cancelled" => Some(Self::Cancelled),
            "probe_end" => Some(Self::ProbeEnd),
            "probe_not_tripped" => Some(Self::ProbeNotTripped),
            "probe_initial_state" => Some(Self::ProbeInitialState),
            "safety_interlock" => Some(Self::SafetyInterlock),
            "limit_hit" => Some(Self::LimitHit),
            "unsupported" => Some(Self::Unsupported),
            _ => None,
        }
    }

    /// Kinds that latch the controller-wide error flag and fan out
    /// `cancelled` to every in-flight instruction.
    pub fn is_controller_level(&self) -> bool {
        matches!(self, Self::Comm | Self::SafetyInterlock | Self::LimitHit)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured controller error.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct MachineError {
    /// Enumerated error kind.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Optional structured detail (device codes, positions, raw lines).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl MachineError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured detail.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Transport failure.
    pub fn comm(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Comm, message)
    }

    /// Malformed device message.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    /// Generic device-reported error.
    pub fn machine(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Machine, message)
    }

    /// Operation aborted by cancel/reset.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    /// Probe reached its endpoint without tripping.
    pub fn probe_end() -> Self {
        Self::new(ErrorKind::ProbeEnd, "probe reached endpoint without tripping")
    }

    /// Device refused the probe because tripping did not occur.
    pub fn probe_not_tripped() -> Self {
        Self::new(ErrorKind::ProbeNotTripped, "probe did not trip")
    }

    /// Probe already tripped on entry.
    pub fn probe_initial_state() -> Self {
        Self::new(ErrorKind::ProbeInitialState, "probe tripped before start")
    }

    /// Safety door or interlock disengaged.
    pub fn safety_interlock(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SafetyInterlock, message)
    }

    /// Limit switch engaged unexpectedly.
    pub fn limit_hit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LimitHit, message)
    }

    /// Operation not supported by the backend.
    pub fn unsupported(operation: &str) -> Self {
        Self::new(
            ErrorKind::Unsupported,
            format!("operation not supported by this backend: {}", operation),
        )
    }

    /// Whether this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

/// Result type using [`MachineError`].
pub type Result<T, E = MachineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_wire_names_round_trip() {
        for kind in [
            ErrorKind::Comm,
            ErrorKind::Parse,
            ErrorKind::Machine,
            ErrorKind::Cancelled,
            ErrorKind::ProbeEnd,
            ErrorKind::ProbeNotTripped,
            ErrorKind::ProbeInitialState,
            ErrorKind::SafetyInterlock,
            ErrorKind::LimitHit,
            ErrorKind::Unsupported,
        ] {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::parse("bogus"), None);
    }

    #[test]
    fn controller_level_kinds() {
        assert!(ErrorKind::Comm.is_controller_level());
        assert!(ErrorKind::SafetyInterlock.is_controller_level());
        assert!(ErrorKind::LimitHit.is_controller_level());
        assert!(!ErrorKind::Cancelled.is_controller_level());
        assert!(!ErrorKind::ProbeEnd.is_controller_level());
    }

    #[test]
    fn serializes_kind_as_wire_name() {
        let err = MachineError::comm("port vanished");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "comm_error");
        assert_eq!(json["message"], "port vanished");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = MachineError::probe_end();
        assert_eq!(
            err.to_string(),
            "probe_end: probe reached endpoint without tripping"
        );
    }
}
