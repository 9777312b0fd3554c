//! Work-coordinate resolution.
//!
//! Pure derived queries over [`MachineState`]: the effective offset vector
//! and the work position. Neither mutates state; both are deterministic for
//! a given vector.

use crate::state::MachineState;

impl MachineState {
    /// Effective offsets currently applied to machine coordinates.
    ///
    /// Starts at zero, adds the active work system's offset vector if one
    /// is selected, then the transient offset if enabled. Offset vectors
    /// shorter than the axis count contribute zero for the missing trailing
    /// components.
    pub fn effective_offsets(&self) -> Vec<f64> {
        let n = self.axis_count();
        let mut offsets = vec![0.0; n];
        if let Some(idx) = self.active_coord_sys {
            if let Some(sys) = self.coord_sys_offsets.get(idx) {
                for (i, v) in sys.iter().take(n).enumerate() {
                    offsets[i] += v;
                }
            }
        }
        if self.offset_enabled {
            for (i, v) in self.offset.iter().take(n).enumerate() {
                offsets[i] += v;
            }
        }
        offsets
    }

    /// Position in work coordinates: `mpos[i] - effective_offsets()[i]`.
    pub fn work_position(&self) -> Vec<f64> {
        let offsets = self.effective_offsets();
        self.mpos
            .iter()
            .enumerate()
            .map(|(i, m)| m - offsets.get(i).copied().unwrap_or(0.0))
            .collect()
    }

    /// Indices of in-use axes, in axis order.
    pub fn used_axis_indices(&self) -> Vec<usize> {
        self.used_axes
            .iter()
            .enumerate()
            .filter(|(_, used)| **used)
            .map(|(i, _)| i)
            .collect()
    }

    /// Labels of in-use axes, in axis order.
    pub fn used_axis_labels(&self) -> Vec<&str> {
        self.used_axis_indices()
            .into_iter()
            .map(|i| self.axis_labels[i].as_str())
            .collect()
    }
}
