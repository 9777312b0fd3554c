//! Mirrored machine state.
//!
//! [`MachineState`] is the single source of truth for the device state a
//! controller mirrors: positions, work offsets, modal flags, and the error
//! latch. Mutation is confined to the owning controller through
//! [`SharedState`]; every other consumer sees immutable [`StatusSnapshot`]
//! values derived under one lock.

use crate::error::{MachineError, Result};
use crate::events::ControllerEvents;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Machine coordinate units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Units {
    /// Millimeters (metric).
    #[default]
    #[serde(rename = "mm")]
    Mm,
    /// Inches (imperial).
    #[serde(rename = "in")]
    In,
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Units::Mm => write!(f, "mm"),
            Units::In => write!(f, "in"),
        }
    }
}

/// Coolant output state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoolantMode {
    /// All coolant off.
    #[default]
    Off,
    /// Mist coolant (M7).
    Mist,
    /// Flood coolant (M8).
    Flood,
    /// Mist and flood together.
    Both,
}

impl CoolantMode {
    /// Numeric level: off=0, mist=1, flood=2, both=3.
    pub fn level(&self) -> u8 {
        match self {
            CoolantMode::Off => 0,
            CoolantMode::Mist => 1,
            CoolantMode::Flood => 2,
            CoolantMode::Both => 3,
        }
    }

    /// Combine mist/flood flags into a mode.
    pub fn from_flags(mist: bool, flood: bool) -> Self {
        match (mist, flood) {
            (false, false) => CoolantMode::Off,
            (true, false) => CoolantMode::Mist,
            (false, true) => CoolantMode::Flood,
            (true, true) => CoolantMode::Both,
        }
    }
}

/// Spindle rotation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpindleDirection {
    /// Clockwise (M3).
    #[default]
    #[serde(rename = "cw")]
    Cw,
    /// Counter-clockwise (M4).
    #[serde(rename = "ccw")]
    Ccw,
}

impl SpindleDirection {
    /// Signed direction: +1 clockwise, -1 counter-clockwise.
    pub fn signum(&self) -> i8 {
        match self {
            SpindleDirection::Cw => 1,
            SpindleDirection::Ccw => -1,
        }
    }
}

/// Mirrored machine state vector.
///
/// Field semantics follow the device model: `mpos` is always in the
/// machine's native coordinate frame; work coordinates are derived (see the
/// resolver methods in [`crate::coords`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineState {
    /// Connection established, handshake complete, not alarmed.
    pub ready: bool,
    /// Ordered axis names.
    pub axis_labels: Vec<String>,
    /// Per-axis in-use mask.
    pub used_axes: Vec<bool>,
    /// Per-axis homable mask.
    pub homable_axes: Vec<bool>,
    /// Machine-coordinate position.
    pub mpos: Vec<f64>,
    /// Index of the active work coordinate system, or `None` for raw
    /// machine coordinates.
    pub active_coord_sys: Option<usize>,
    /// Per-system work offset vectors.
    pub coord_sys_offsets: Vec<Vec<f64>>,
    /// Transient offset established by an offset-set instruction (G92).
    pub offset: Vec<f64>,
    /// Whether the transient offset applies.
    pub offset_enabled: bool,
    /// Stored machine positions for the two home-return slots (G28/G30).
    pub stored_positions: [Vec<f64>; 2],
    /// Per-axis homed flags.
    pub homed: Vec<bool>,
    /// Feed hold active.
    pub held: bool,
    /// Active unit system.
    pub units: Units,
    /// Last commanded feed rate.
    pub feed: f64,
    /// Incremental positioning mode (G91).
    pub incremental: bool,
    /// Motion in progress.
    pub moving: bool,
    /// Coolant state.
    pub coolant: CoolantMode,
    /// Spindle on.
    pub spindle: bool,
    /// Spindle rotation direction.
    pub spindle_direction: SpindleDirection,
    /// Last known spindle speed in RPM, if reported.
    pub spindle_speed: Option<f64>,
    /// Inverse-time feed mode (G93).
    pub inverse_feed: bool,
    /// Last line number reported executed.
    pub line: u32,
    /// Alarm/error latched.
    pub error: bool,
    /// Structured error detail, present iff `error` is true.
    pub error_data: Option<MachineError>,
    /// A program stream is actively being consumed.
    pub program_running: bool,
}

impl MachineState {
    /// Create a state vector sized for the given axis labels, with every
    /// other field at its default.
    pub fn with_axes(labels: &[&str]) -> Self {
        let n = labels.len();
        Self {
            ready: false,
            axis_labels: labels.iter().map(|l| l.to_string()).collect(),
            used_axes: vec![true; n],
            homable_axes: vec![true; n],
            mpos: vec![0.0; n],
            active_coord_sys: Some(0),
            coord_sys_offsets: vec![vec![0.0; n]],
            offset: vec![0.0; n],
            offset_enabled: false,
            stored_positions: [vec![0.0; n], vec![0.0; n]],
            homed: vec![false; n],
            held: false,
            units: Units::Mm,
            feed: 0.0,
            incremental: false,
            moving: false,
            coolant: CoolantMode::Off,
            spindle: false,
            spindle_direction: SpindleDirection::Cw,
            spindle_speed: None,
            inverse_feed: false,
            line: 0,
            error: false,
            error_data: None,
            program_running: false,
        }
    }

    /// Restore the defaults (three axes x/y/z, all positions zero, work
    /// system 0 active with one zero offset vector, millimeters, no motion,
    /// no error, not ready).
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Number of axes.
    pub fn axis_count(&self) -> usize {
        self.axis_labels.len()
    }

    /// Check the structural invariants of the vector.
    pub fn validate(&self) -> Result<()> {
        let n = self.axis_count();
        let check = |ok: bool, what: &str| -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(MachineError::machine(format!(
                    "state vector invariant violated: {}",
                    what
                )))
            }
        };
        check(n > 0, "at least one axis")?;
        check(
            {
                let mut labels: Vec<&str> = self.axis_labels.iter().map(|s| s.as_str()).collect();
                labels.sort_unstable();
                labels.windows(2).all(|w| w[0] != w[1])
            },
            "axis labels unique",
        )?;
        check(self.used_axes.len() == n, "usedAxes length")?;
        check(self.homable_axes.len() == n, "homableAxes length")?;
        check(self.mpos.len() == n, "mpos length")?;
        check(self.mpos.iter().all(|v| v.is_finite()), "mpos finite")?;
        check(self.homed.len() == n, "homed length")?;
        check(self.offset.len() == n, "offset length")?;
        check(
            self.stored_positions.iter().all(|p| p.len() == n),
            "storedPositions length",
        )?;
        if let Some(idx) = self.active_coord_sys {
            check(idx < self.coord_sys_offsets.len(), "activeCoordSys in range")?;
        }
        check(self.feed >= 0.0, "feed non-negative")?;
        if let Some(speed) = self.spindle_speed {
            check(speed >= 0.0, "spindleSpeed non-negative")?;
        }
        check(!self.error || self.error_data.is_some(), "errorData present")?;
        check(!self.error || !self.ready, "error forces not ready")?;
        Ok(())
    }

    /// Build an immutable status snapshot from this state.
    ///
    /// `pos` and `mpos_offset` are derived from the same state as `mpos`,
    /// so the snapshot is always self-consistent.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            ready: self.ready,
            axis_labels: self.axis_labels.clone(),
            used_axes: self.used_axes.clone(),
            mpos: self.mpos.clone(),
            pos: self.work_position(),
            mpos_offset: self.effective_offsets(),
            active_coord_sys: self.active_coord_sys,
            offset: self.offset.clone(),
            offset_enabled: self.offset_enabled,
            stored_positions: self.stored_positions.clone(),
            homed: self.homed.clone(),
            held: self.held,
            units: self.units,
            feed: self.feed,
            incremental: self.incremental,
            moving: self.moving,
            coolant: self.coolant,
            spindle: self.spindle,
            line: self.line,
            error: self.error,
            error_data: self.error_data.clone(),
            program_running: self.program_running,
        }
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self::with_axes(&["x", "y", "z"])
    }
}

/// Immutable machine status snapshot.
///
/// This is the stable schema handed to upstream consumers; the serde
/// representation uses the camelCase field names they expect.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// Connection established, handshake complete, not alarmed.
    pub ready: bool,
    /// Ordered axis names.
    pub axis_labels: Vec<String>,
    /// Per-axis in-use mask.
    pub used_axes: Vec<bool>,
    /// Machine-coordinate position.
    pub mpos: Vec<f64>,
    /// Work-coordinate position (`mpos` minus effective offsets).
    pub pos: Vec<f64>,
    /// Effective offsets applied to derive `pos`.
    pub mpos_offset: Vec<f64>,
    /// Active work coordinate system index.
    pub active_coord_sys: Option<usize>,
    /// Transient offset vector.
    pub offset: Vec<f64>,
    /// Whether the transient offset applies.
    pub offset_enabled: bool,
    /// Stored home-return positions.
    pub stored_positions: [Vec<f64>; 2],
    /// Per-axis homed flags.
    pub homed: Vec<bool>,
    /// Feed hold active.
    pub held: bool,
    /// Active unit system.
    pub units: Units,
    /// Last commanded feed rate.
    pub feed: f64,
    /// Incremental positioning mode.
    pub incremental: bool,
    /// Motion in progress.
    pub moving: bool,
    /// Coolant state.
    pub coolant: CoolantMode,
    /// Spindle on.
    pub spindle: bool,
    /// Last line number reported executed.
    pub line: u32,
    /// Alarm/error latched.
    pub error: bool,
    /// Structured error detail when `error` is set.
    pub error_data: Option<MachineError>,
    /// A program stream is actively being consumed.
    pub program_running: bool,
}

/// Shared, event-emitting handle to a [`MachineState`].
///
/// This is the composed value a backend embeds: the state vector behind a
/// lock, plus the controller's event hub. All mutation funnels through
/// [`SharedState::update`], which emits a `statusUpdate` event carrying the
/// post-mutation snapshot.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<RwLock<MachineState>>,
    events: ControllerEvents,
}

impl SharedState {
    /// Create a shared handle over the default state vector.
    pub fn new(events: ControllerEvents) -> Self {
        Self::with_state(MachineState::default(), events)
    }

    /// Create a shared handle over a prepared state vector.
    pub fn with_state(state: MachineState, events: ControllerEvents) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
            events,
        }
    }

    /// The controller event hub this state reports into.
    pub fn events(&self) -> &ControllerEvents {
        &self.events
    }

    /// Read the state vector without mutating it.
    pub fn read<R>(&self, f: impl FnOnce(&MachineState) -> R) -> R {
        f(&*self.inner.read())
    }

    /// Mutate the state vector and emit a `statusUpdate` with the
    /// post-mutation snapshot.
    pub fn update<R>(&self, f: impl FnOnce(&mut MachineState) -> R) -> R {
        let (out, snap) = {
            let mut guard = self.inner.write();
            let out = f(&mut *guard);
            (out, guard.snapshot())
        };
        self.events.emit_status_update(snap);
        out
    }

    /// Take an immutable snapshot of the current state.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.read().snapshot()
    }

    /// Re-initialise the vector to defaults.
    pub fn reset(&self) {
        self.update(|s| s.reset());
    }

    /// Latch a controller-level error: `error=true`, `ready=false`,
    /// `errorData` populated, one `error` broadcast. Fan-out of `cancelled`
    /// to in-flight instructions is the owning controller's duty.
    pub fn latch_error(&self, err: MachineError) {
        self.update(|s| {
            s.error = true;
            s.ready = false;
            s.error_data = Some(err.clone());
        });
        self.events.emit_error(err);
    }

    /// The latched error, if any.
    pub fn latched_error(&self) -> Option<MachineError> {
        self.read(|s| if s.error { s.error_data.clone() } else { None })
    }
}

impl fmt::Debug for SharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedState")
            .field("state", &*self.inner.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reset() {
        let mut state = MachineState::default();
        state.mpos = vec![1.0, 2.0, 3.0];
        state.units = Units::In;
        state.held = true;
        state.reset();
        assert_eq!(state, MachineState::default());

        // resetState twice yields equal vectors
        let mut a = MachineState::default();
        let mut b = MachineState::default();
        a.reset();
        a.reset();
        b.reset();
        assert_eq!(a, b);
    }

    #[test]
    fn default_shape() {
        let state = MachineState::default();
        assert_eq!(state.axis_labels, vec!["x", "y", "z"]);
        assert_eq!(state.active_coord_sys, Some(0));
        assert_eq!(state.coord_sys_offsets, vec![vec![0.0, 0.0, 0.0]]);
        assert_eq!(state.units, Units::Mm);
        assert!(!state.ready);
        assert!(!state.error);
        state.validate().unwrap();
    }

    #[test]
    fn validate_catches_length_mismatch() {
        let mut state = MachineState::default();
        state.mpos = vec![0.0, 0.0];
        assert!(state.validate().is_err());
    }

    #[test]
    fn validate_requires_error_data_with_error() {
        let mut state = MachineState::default();
        state.error = true;
        assert!(state.validate().is_err());
        state.error_data = Some(MachineError::comm("x"));
        state.ready = false;
        state.validate().unwrap();
    }

    #[test]
    fn snapshot_is_pure_projection() {
        let state = MachineState::default();
        assert_eq!(state.snapshot(), state.snapshot());
    }

    #[test]
    fn snapshot_consistent_after_atomic_update() {
        let shared = SharedState::new(ControllerEvents::default());
        shared.update(|s| {
            s.mpos = vec![5.0, 5.0, 5.0];
            s.coord_sys_offsets[0] = vec![1.0, 1.0, 1.0];
        });
        let snap = shared.snapshot();
        assert_eq!(snap.mpos, vec![5.0, 5.0, 5.0]);
        assert_eq!(snap.mpos_offset, vec![1.0, 1.0, 1.0]);
        assert_eq!(snap.pos, vec![4.0, 4.0, 4.0]);
    }

    #[test]
    fn latch_error_forces_not_ready() {
        let events = ControllerEvents::default();
        let mut errors = events.subscribe_error();
        let shared = SharedState::new(events);
        shared.update(|s| s.ready = true);
        shared.latch_error(MachineError::comm("device gone"));
        let snap = shared.snapshot();
        assert!(snap.error);
        assert!(!snap.ready);
        assert_eq!(snap.error_data.as_ref().unwrap().kind.as_str(), "comm_error");
        assert_eq!(errors.try_recv().unwrap().kind.as_str(), "comm_error");
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn status_update_emitted_per_mutation() {
        let events = ControllerEvents::default();
        let mut updates = events.subscribe_status_update();
        let shared = SharedState::new(events);
        shared.update(|s| s.feed = 500.0);
        shared.update(|s| s.feed = 700.0);
        assert_eq!(updates.try_recv().unwrap().feed, 500.0);
        assert_eq!(updates.try_recv().unwrap().feed, 700.0);
    }

    #[test]
    fn coolant_levels() {
        assert_eq!(CoolantMode::Off.level(), 0);
        assert_eq!(CoolantMode::Mist.level(), 1);
        assert_eq!(CoolantMode::Flood.level(), 2);
        assert_eq!(CoolantMode::Both.level(), 3);
        assert_eq!(CoolantMode::from_flags(true, true), CoolantMode::Both);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let snap = MachineState::default().snapshot();
        let json = serde_json::to_value(&snap).unwrap();
        assert!(json.get("axisLabels").is_some());
        assert!(json.get("mposOffset").is_some());
        assert!(json.get("programRunning").is_some());
        assert_eq!(json["units"], "mm");
    }
}
