//! In-memory device model.
//!
//! [`SimDevice`] is the device side of the simulated link: it consumes
//! G-code lines the way firmware does, mutates its own state, and replies
//! over the wire (`ok`, `probe:...` reports, `error:<kind>:<message>`).
//! Interpretation happens here because interpretation is the device's job;
//! the controller only mirrors the result.

use cncbridge_core::{CoolantMode, MachineError, MachineState, SpindleDirection, Units};
use std::collections::VecDeque;

const WORK_SYSTEMS: usize = 6;
const MM_PER_INCH: f64 = 25.4;

/// Simulated CNC device.
pub struct SimDevice {
    axis_labels: Vec<String>,
    mpos: Vec<f64>,
    units: Units,
    incremental: bool,
    inverse_feed: bool,
    feed: f64,
    active_coord_sys: usize,
    coord_sys_offsets: Vec<Vec<f64>>,
    offset: Vec<f64>,
    offset_enabled: bool,
    stored_positions: [Vec<f64>; 2],
    homable: Vec<bool>,
    homed: Vec<bool>,
    spindle: bool,
    spindle_direction: SpindleDirection,
    spindle_speed: Option<f64>,
    coolant: CoolantMode,
    line: u32,
    alarm: Option<MachineError>,
    hard_alarm: bool,
    probe_trip: Option<Vec<f64>>,
    probe_tripped: bool,
    probe_refused: bool,
    last_probe: Option<Vec<f64>>,
    inbox: String,
    outbox: VecDeque<String>,
}

impl SimDevice {
    /// Create a device with the given axis labels, parked at machine zero.
    pub fn new(axis_labels: &[String]) -> Self {
        let n = axis_labels.len();
        Self {
            axis_labels: axis_labels.to_vec(),
            mpos: vec![0.0; n],
            units: Units::Mm,
            incremental: false,
            inverse_feed: false,
            feed: 0.0,
            active_coord_sys: 0,
            coord_sys_offsets: vec![vec![0.0; n]; WORK_SYSTEMS],
            offset: vec![0.0; n],
            offset_enabled: false,
            stored_positions: [vec![0.0; n], vec![0.0; n]],
            homable: vec![true; n],
            homed: vec![false; n],
            spindle: false,
            spindle_direction: SpindleDirection::Cw,
            spindle_speed: None,
            coolant: CoolantMode::Off,
            line: 0,
            alarm: None,
            hard_alarm: false,
            probe_trip: None,
            probe_tripped: false,
            probe_refused: false,
            last_probe: None,
            inbox: String::new(),
            outbox: VecDeque::new(),
        }
    }

    /// Soft-reset: restore power-on state and emit the banner again.
    pub fn reset(&mut self) {
        let labels = std::mem::take(&mut self.axis_labels);
        *self = Self::new(&labels);
        self.greet();
    }

    /// Emit the firmware banner.
    pub fn greet(&mut self) {
        self.outbox.push_back("Sim 1.1 [cncbridge device simulator]".to_string());
    }

    /// Feed raw wire bytes into the device; complete lines execute
    /// immediately.
    pub fn receive_bytes(&mut self, data: &[u8]) {
        self.inbox.push_str(&String::from_utf8_lossy(data));
        while let Some(pos) = self.inbox.find('\n') {
            let line: String = self.inbox[..pos].to_string();
            self.inbox.drain(..=pos);
            self.execute_line(line.trim());
        }
    }

    /// Drain pending replies as newline-terminated wire bytes.
    pub fn take_output(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(line) = self.outbox.pop_front() {
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }
        out
    }

    /// Machine position at the last probe trip, if any.
    pub fn last_probe(&self) -> Option<Vec<f64>> {
        self.last_probe.clone()
    }

    /// Nudge one axis by a signed machine-coordinate increment, bypassing
    /// the command stream.
    pub fn jog(&mut self, axis: usize, increment: f64) {
        if let Some(v) = self.mpos.get_mut(axis) {
            *v += increment;
        }
    }

    /// Attempt to clear the alarm latch; hard alarms refuse.
    pub fn clear_alarm(&mut self) -> bool {
        if self.hard_alarm {
            return false;
        }
        self.alarm = None;
        true
    }

    /// Position at which the probe input trips, or `None` for a probe that
    /// never trips.
    pub fn set_probe_trip(&mut self, trip: Option<Vec<f64>>) {
        self.probe_trip = trip;
    }

    /// Mark the probe input as already closed.
    pub fn set_probe_tripped(&mut self, tripped: bool) {
        self.probe_tripped = tripped;
    }

    /// Make the device refuse probe cycles outright.
    pub fn set_probe_refused(&mut self, refused: bool) {
        self.probe_refused = refused;
    }

    /// Latch an alarm; `hard` alarms cannot be cleared without a reset.
    pub fn set_alarm(&mut self, alarm: MachineError, hard: bool) {
        self.alarm = Some(alarm);
        self.hard_alarm = hard;
    }

    /// Copy the device-owned fields into a mirrored state vector.
    pub fn mirror_into(&self, state: &mut MachineState) {
        state.mpos = self.mpos.clone();
        state.units = self.units;
        state.incremental = self.incremental;
        state.inverse_feed = self.inverse_feed;
        state.feed = self.feed;
        state.active_coord_sys = Some(self.active_coord_sys);
        state.coord_sys_offsets = self.coord_sys_offsets.clone();
        state.offset = self.offset.clone();
        state.offset_enabled = self.offset_enabled;
        state.stored_positions = self.stored_positions.clone();
        state.homed = self.homed.clone();
        state.homable_axes = self.homable.clone();
        state.spindle = self.spindle;
        state.spindle_direction = self.spindle_direction;
        state.spindle_speed = self.spindle_speed;
        state.coolant = self.coolant;
        state.line = state.line.max(self.line);
    }

    fn reply_ok(&mut self) {
        self.outbox.push_back("ok".to_string());
    }

    fn reply_error(&mut self, err: &MachineError) {
        self.outbox
            .push_back(format!("error:{}:{}", err.kind, err.message));
    }

    fn axis_index(&self, letter: char) -> Option<usize> {
        self.axis_labels
            .iter()
            .position(|label| label.eq_ignore_ascii_case(&letter.to_string()))
    }

    fn to_native(&self, value: f64) -> f64 {
        match self.units {
            Units::Mm => value,
            Units::In => value * MM_PER_INCH,
        }
    }

    fn effective_offset(&self, axis: usize) -> f64 {
        let sys = self.coord_sys_offsets[self.active_coord_sys]
            .get(axis)
            .copied()
            .unwrap_or(0.0);
        let transient = if self.offset_enabled {
            self.offset.get(axis).copied().unwrap_or(0.0)
        } else {
            0.0
        };
        sys + transient
    }

    /// Resolve axis words into a machine-coordinate target, honoring the
    /// distance mode and unit system.
    fn motion_target(&self, words: &[Option<f64>]) -> Vec<(usize, f64)> {
        let mut target = Vec::new();
        for (axis, value) in words.iter().enumerate() {
            if let Some(v) = value {
                let native = self.to_native(*v);
                let machine = if self.incremental {
                    self.mpos[axis] + native
                } else {
                    native + self.effective_offset(axis)
                };
                target.push((axis, machine));
            }
        }
        target
    }

    fn execute_home(&mut self, rest: &str) {
        let selected: Vec<usize> = rest
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .filter_map(|c| self.axis_index(c))
            .collect();
        let axes: Vec<usize> = if selected.is_empty() {
            (0..self.axis_labels.len())
                .filter(|i| self.homable[*i])
                .collect()
        } else {
            selected.into_iter().filter(|i| self.homable[*i]).collect()
        };
        for axis in axes {
            self.mpos[axis] = 0.0;
            self.homed[axis] = true;
        }
        self.reply_ok();
    }

    fn execute_probe(&mut self, axis_words: &[Option<f64>]) {
        if self.probe_refused {
            self.reply_error(&MachineError::probe_not_tripped());
            return;
        }
        if self.probe_tripped {
            self.reply_error(&MachineError::probe_initial_state());
            return;
        }
        if let Some(trip) = self.probe_trip.clone() {
            for (axis, v) in trip.iter().enumerate().take(self.mpos.len()) {
                self.mpos[axis] = *v;
            }
            self.last_probe = Some(self.mpos.clone());
            let report: Vec<String> = self.mpos.iter().map(|v| format!("{:.3}", v)).collect();
            self.outbox.push_back(format!("probe:{}", report.join(",")));
            self.reply_ok();
        } else {
            // No trip along the path: park at the endpoint and report.
            for (axis, machine) in self.motion_target(axis_words) {
                self.mpos[axis] = machine;
            }
            self.reply_error(&MachineError::probe_end());
        }
    }

    /// Execute a single command line, pushing replies to the outbox.
    pub fn execute_line(&mut self, line: &str) {
        if self.alarm.is_some() && line != "$X" {
            let err = MachineError::machine("alarm lock");
            self.reply_error(&err);
            return;
        }
        if line.is_empty() {
            self.reply_ok();
            return;
        }
        if line == "$X" {
            if self.clear_alarm() {
                self.reply_ok();
            } else {
                self.reply_error(&MachineError::machine("cannot clear alarm"));
            }
            return;
        }
        if let Some(rest) = line.strip_prefix("$H") {
            self.execute_home(rest);
            return;
        }

        let words = match parse_words(line) {
            Ok(words) => words,
            Err(message) => {
                self.reply_error(&MachineError::machine(message));
                return;
            }
        };

        let axis_count = self.axis_labels.len();
        let mut axis_words: Vec<Option<f64>> = vec![None; axis_count];
        let mut g_codes: Vec<i32> = Vec::new();
        let mut m_codes: Vec<i32> = Vec::new();
        let mut feed_word: Option<f64> = None;
        let mut speed_word: Option<f64> = None;
        let mut line_word: Option<u32> = None;
        let mut l_word: Option<i32> = None;
        let mut p_word: Option<i32> = None;

        for (letter, value) in words {
            match letter {
                'G' => g_codes.push((value * 10.0).round() as i32),
                'M' => m_codes.push(value.round() as i32),
                'F' => feed_word = Some(value),
                'S' => speed_word = Some(value),
                'N' => line_word = Some(value.max(0.0) as u32),
                'L' => l_word = Some(value.round() as i32),
                'P' => p_word = Some(value.round() as i32),
                'T' => {}
                other => match self.axis_index(other) {
                    Some(axis) => axis_words[axis] = Some(value),
                    None => {
                        self.reply_error(&MachineError::machine(format!(
                            "unsupported word '{}'",
                            other
                        )));
                        return;
                    }
                },
            }
        }

        if let Some(n) = line_word {
            self.line = self.line.max(n);
        }
        if let Some(f) = feed_word {
            if f < 0.0 {
                self.reply_error(&MachineError::machine("negative feed rate"));
                return;
            }
            self.feed = f;
        }
        if let Some(s) = speed_word {
            self.spindle_speed = Some(s.max(0.0));
        }

        // Modal codes apply before any motion on the same line.
        let mut motion: Option<i32> = None;
        for code in &g_codes {
            match code {
                0 | 10 | 280 | 300 | 382 => motion = Some(*code),
                40 => {} // dwell
                200 => self.units = Units::In,
                210 => self.units = Units::Mm,
                281 => self.stored_positions[0] = self.mpos.clone(),
                301 => self.stored_positions[1] = self.mpos.clone(),
                540..=590 if code % 10 == 0 => {
                    self.active_coord_sys = ((code - 540) / 10) as usize;
                }
                900 => self.incremental = false,
                910 => self.incremental = true,
                920 => {
                    for (axis, value) in axis_words.iter().enumerate() {
                        if let Some(v) = value {
                            let native = self.to_native(*v);
                            let sys = self.coord_sys_offsets[self.active_coord_sys]
                                .get(axis)
                                .copied()
                                .unwrap_or(0.0);
                            self.offset[axis] = self.mpos[axis] - sys - native;
                        }
                    }
                    self.offset_enabled = true;
                }
                921 => {
                    self.offset = vec![0.0; axis_count];
                    self.offset_enabled = false;
                }
                930 => self.inverse_feed = true,
                940 => self.inverse_feed = false,
                100 => {
                    // G10 L2 Pn: set a work system's offsets directly.
                    if l_word == Some(2) {
                        let index = match p_word {
                            Some(p) if (1..=WORK_SYSTEMS as i32).contains(&p) => (p - 1) as usize,
                            _ => {
                                self.reply_error(&MachineError::machine(
                                    "G10 requires P1..P6",
                                ));
                                return;
                            }
                        };
                        for (axis, value) in axis_words.iter().enumerate() {
                            if let Some(v) = value {
                                self.coord_sys_offsets[index][axis] = self.to_native(*v);
                            }
                        }
                    }
                }
                other => {
                    self.reply_error(&MachineError::machine(format!(
                        "unsupported code G{}",
                        (*other as f64) / 10.0
                    )));
                    return;
                }
            }
        }

        for code in &m_codes {
            match code {
                2 | 30 => {}
                3 => {
                    self.spindle = true;
                    self.spindle_direction = SpindleDirection::Cw;
                }
                4 => {
                    self.spindle = true;
                    self.spindle_direction = SpindleDirection::Ccw;
                }
                5 => self.spindle = false,
                7 => {
                    self.coolant =
                        CoolantMode::from_flags(true, self.coolant.level() & 2 != 0);
                }
                8 => {
                    self.coolant =
                        CoolantMode::from_flags(self.coolant.level() & 1 != 0, true);
                }
                9 => self.coolant = CoolantMode::Off,
                other => {
                    self.reply_error(&MachineError::machine(format!(
                        "unsupported code M{}",
                        other
                    )));
                    return;
                }
            }
        }

        match motion {
            Some(382) => self.execute_probe(&axis_words),
            Some(280) => {
                self.mpos = self.stored_positions[0].clone();
                self.reply_ok();
            }
            Some(300) => {
                self.mpos = self.stored_positions[1].clone();
                self.reply_ok();
            }
            Some(_) => {
                for (axis, machine) in self.motion_target(&axis_words) {
                    self.mpos[axis] = machine;
                }
                self.reply_ok();
            }
            None => self.reply_ok(),
        }
    }
}

/// Split a command line into letter/value words. Accepts packed
/// (`G1X10Y-2`) and spaced (`G1 X10 Y-2`) forms; `;` starts a comment.
fn parse_words(line: &str) -> Result<Vec<(char, f64)>, String> {
    let mut words = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_whitespace() {
            continue;
        }
        if c == ';' {
            break;
        }
        if !c.is_ascii_alphabetic() {
            return Err(format!("unexpected character '{}'", c));
        }
        let letter = c.to_ascii_uppercase();
        let mut number = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_ascii_digit() || next == '.' || next == '-' || next == '+' {
                number.push(next);
                chars.next();
            } else {
                break;
            }
        }
        let value: f64 = number
            .parse()
            .map_err(|_| format!("malformed word '{}{}'", letter, number))?;
        words.push((letter, value));
    }
    Ok(words)
}
