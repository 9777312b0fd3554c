//! Flow-controlled transmit queue.
//!
//! Tracks every instruction from enqueue to terminal lifecycle event while
//! keeping the device's receive buffer from overflowing: a line is only
//! written once the bytes already in the device (sent but unacknowledged)
//! leave room for it. Acknowledgements release buffer space in FIFO order.

use crate::transport::Transport;
use cncbridge_core::{
    HookBundle, InstructionTracker, LifecycleStage, MachineError, Result,
};
use std::collections::VecDeque;
use tokio::sync::OwnedSemaphorePermit;

/// Configuration for the transmit queue.
#[derive(Debug, Clone)]
pub struct TransmitQueueConfig {
    /// Size of the device's receive buffer in bytes.
    pub device_buffer: usize,
    /// Maximum number of pending (unsent) instructions.
    pub max_pending: usize,
}

impl Default for TransmitQueueConfig {
    fn default() -> Self {
        Self {
            device_buffer: 128,
            max_pending: 64,
        }
    }
}

/// One instruction tracked by the queue.
pub struct TransmitRecord {
    text: String,
    tracker: InstructionTracker,
    // Held while the record occupies queue capacity; dropping it releases
    // the submitter-side backpressure slot.
    _permit: Option<OwnedSemaphorePermit>,
}

impl TransmitRecord {
    /// The line this record transmits, without trailing newline.
    pub fn text(&self) -> &str {
        &self.text
    }

    fn wire_len(&self) -> usize {
        self.text.len() + 1
    }

    /// Fire the terminal `executed` event (synthesizing any stage the
    /// backend did not observe distinctly).
    pub fn complete(self) {
        self.tracker.advance(LifecycleStage::Executed);
    }

    /// Fire the terminal `error` event.
    pub fn fail(self, error: &MachineError) {
        self.tracker.fail(error);
    }
}

/// Flow-controlled instruction queue between a controller and its device.
pub struct TransmitQueue {
    config: TransmitQueueConfig,
    pending: VecDeque<TransmitRecord>,
    active: VecDeque<TransmitRecord>,
    in_device: usize,
    paused: bool,
}

impl TransmitQueue {
    /// Create an empty queue.
    pub fn new(config: TransmitQueueConfig) -> Self {
        Self {
            config,
            pending: VecDeque::new(),
            active: VecDeque::new(),
            in_device: 0,
            paused: false,
        }
    }

    /// Enqueue a line with an optional hook bundle. Fires `queued`
    /// synchronously on success.
    pub fn enqueue(
        &mut self,
        text: String,
        hooks: Option<HookBundle>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Result<()> {
        if self.pending.len() >= self.config.max_pending {
            return Err(MachineError::machine("transmit queue full"));
        }
        let record = TransmitRecord {
            text,
            tracker: InstructionTracker::new(hooks),
            _permit: permit,
        };
        record.tracker.advance(LifecycleStage::Queued);
        self.pending.push_back(record);
        Ok(())
    }

    /// Write as many pending lines as the device buffer allows, in order.
    /// Returns the lines written this call. Does nothing while paused.
    pub fn pump(&mut self, transport: &mut dyn Transport) -> Result<Vec<String>> {
        let mut written = Vec::new();
        if self.paused {
            return Ok(written);
        }
        loop {
            let fits = match self.pending.front() {
                Some(front) => {
                    self.in_device + front.wire_len() <= self.config.device_buffer
                }
                None => break,
            };
            if !fits {
                break;
            }
            let record = match self.pending.pop_front() {
                Some(record) => record,
                None => break,
            };
            let mut wire = record.text.clone();
            wire.push('\n');
            transport.send(wire.as_bytes())?;
            self.in_device += record.wire_len();
            record.tracker.advance(LifecycleStage::Sent);
            written.push(record.text.clone());
            self.active.push_back(record);
        }
        Ok(written)
    }

    /// Device acknowledged the oldest sent line. Fires `ack`, releases its
    /// buffer bytes, and hands the record back for the caller to complete
    /// or fail once the device outcome is known.
    pub fn acknowledge(&mut self) -> Option<TransmitRecord> {
        let record = self.active.pop_front()?;
        self.in_device = self.in_device.saturating_sub(record.wire_len());
        record.tracker.advance(LifecycleStage::Ack);
        Some(record)
    }

    /// Device reported an error for the oldest sent line; the slot is
    /// consumed and the instruction terminates with `error`.
    pub fn fail_front(&mut self, error: &MachineError) -> bool {
        match self.active.pop_front() {
            Some(record) => {
                self.in_device = self.in_device.saturating_sub(record.wire_len());
                record.fail(error);
                true
            }
            None => false,
        }
    }

    /// Flush everything: every pending and in-flight record terminates with
    /// `cancelled`, buffer accounting resets, and any pause is released.
    /// Returns the number of flushed records.
    pub fn flush_cancelled(&mut self) -> usize {
        let cancelled = MachineError::cancelled();
        let mut count = 0;
        for record in self.active.drain(..).chain(self.pending.drain(..)) {
            record.fail(&cancelled);
            count += 1;
        }
        self.in_device = 0;
        self.paused = false;
        count
    }

    /// Stop pumping; queued items are retained.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume pumping.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Whether pumping is paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Number of pending (unsent) instructions.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of sent instructions awaiting acknowledgement.
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Whether nothing is pending or in flight.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }

    /// Bytes currently occupying the device buffer.
    pub fn in_device(&self) -> usize {
        self.in_device
    }
}

impl std::fmt::Debug for TransmitQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransmitQueue")
            .field("pending", &self.pending.len())
            .field("active", &self.active.len())
            .field("in_device", &self.in_device)
            .field("paused", &self.paused)
            .finish()
    }
}
