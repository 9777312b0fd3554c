//! Per-instruction lifecycle tracking.
//!
//! [`InstructionTracker`] drives a hook bundle through the ordered stages
//! `queued → sent → ack → executing → executed`, firing each at most once.
//! A terminal `error` can land at any point; afterwards nothing else fires
//! and the hook bundle is released. When a backend reports a later stage
//! without having observed the intermediate ones, the tracker synthesizes
//! the skipped events in order.

use crate::error::{MachineError, Result};
use crate::gcode::{GcodeHooks, HookBundle};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Ordered lifecycle stages of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleStage {
    /// Accepted into the transmit queue.
    Queued,
    /// Bytes left the host.
    Sent,
    /// Device acknowledged receipt.
    Ack,
    /// Device started acting on the instruction.
    Executing,
    /// Execution completed.
    Executed,
}

impl LifecycleStage {
    /// All stages in firing order.
    pub const ALL: [LifecycleStage; 5] = [
        LifecycleStage::Queued,
        LifecycleStage::Sent,
        LifecycleStage::Ack,
        LifecycleStage::Executing,
        LifecycleStage::Executed,
    ];

    fn index(&self) -> usize {
        match self {
            LifecycleStage::Queued => 0,
            LifecycleStage::Sent => 1,
            LifecycleStage::Ack => 2,
            LifecycleStage::Executing => 3,
            LifecycleStage::Executed => 4,
        }
    }

    /// Stable name of this stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStage::Queued => "queued",
            LifecycleStage::Sent => "sent",
            LifecycleStage::Ack => "ack",
            LifecycleStage::Executing => "executing",
            LifecycleStage::Executed => "executed",
        }
    }
}

impl std::fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct TrackerInner {
    hooks: Option<HookBundle>,
    last: Option<LifecycleStage>,
    terminal: bool,
}

/// Per-instruction lifecycle state machine.
pub struct InstructionTracker {
    inner: Mutex<TrackerInner>,
}

impl InstructionTracker {
    /// Create a tracker for an instruction with an optional hook bundle.
    pub fn new(hooks: Option<HookBundle>) -> Self {
        Self {
            inner: Mutex::new(TrackerInner {
                hooks,
                last: None,
                terminal: false,
            }),
        }
    }

    /// Advance to `stage`, firing it and any skipped intermediate stages in
    /// order. Stages at or before the last fired one are ignored, as is any
    /// advance after a terminal event.
    pub fn advance(&self, stage: LifecycleStage) {
        let (hooks, to_fire) = {
            let mut guard = self.inner.lock();
            if guard.terminal {
                return;
            }
            let next = guard.last.map(|s| s.index() + 1).unwrap_or(0);
            if stage.index() < next {
                return;
            }
            let to_fire: Vec<LifecycleStage> =
                LifecycleStage::ALL[next..=stage.index()].to_vec();
            guard.last = Some(stage);
            let hooks = if stage == LifecycleStage::Executed {
                guard.terminal = true;
                guard.hooks.take()
            } else {
                guard.hooks.clone()
            };
            (hooks, to_fire)
        };
        if let Some(hooks) = hooks {
            for stage in to_fire {
                fire(&*hooks, stage);
            }
        }
    }

    /// Terminate with an error. Fires `on_error` once; any later advance or
    /// failure is ignored. Releases the hook bundle.
    pub fn fail(&self, error: &MachineError) {
        let hooks = {
            let mut guard = self.inner.lock();
            if guard.terminal {
                return;
            }
            guard.terminal = true;
            guard.hooks.take()
        };
        if let Some(hooks) = hooks {
            hooks.on_error(error);
        }
    }

    /// Whether a terminal event has fired.
    pub fn is_terminal(&self) -> bool {
        self.inner.lock().terminal
    }

    /// The last lifecycle stage fired, if any.
    pub fn last_stage(&self) -> Option<LifecycleStage> {
        self.inner.lock().last
    }
}

impl std::fmt::Debug for InstructionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.inner.lock();
        f.debug_struct("InstructionTracker")
            .field("last", &guard.last)
            .field("terminal", &guard.terminal)
            .finish()
    }
}

fn fire(hooks: &dyn GcodeHooks, stage: LifecycleStage) {
    match stage {
        LifecycleStage::Queued => hooks.on_queued(),
        LifecycleStage::Sent => hooks.on_sent(),
        LifecycleStage::Ack => hooks.on_ack(),
        LifecycleStage::Executing => hooks.on_executing(),
        LifecycleStage::Executed => hooks.on_executed(),
    }
}

/// Hook bundle resolving a oneshot on the terminal event.
///
/// Used by `move`/`home`/`probe` implementations to await completion of a
/// single instruction.
pub struct CompletionHooks {
    tx: Mutex<Option<oneshot::Sender<Result<()>>>>,
}

impl GcodeHooks for CompletionHooks {
    fn on_executed(&self) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(Ok(()));
        }
    }

    fn on_error(&self, error: &MachineError) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(Err(error.clone()));
        }
    }
}

/// Create a completion hook bundle and the receiver resolving with the
/// instruction's terminal outcome.
pub fn completion() -> (Arc<CompletionHooks>, oneshot::Receiver<Result<()>>) {
    let (tx, rx) = oneshot::channel();
    (
        Arc::new(CompletionHooks {
            tx: Mutex::new(Some(tx)),
        }),
        rx,
    )
}
