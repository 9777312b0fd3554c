//! The polymorphic controller contract.
//!
//! [`Controller`] is the capability interface every backend implements.
//! Backends compose a [`SharedState`] (state vector + event hub) rather
//! than inheriting from a base type; the trait derives `status()` and
//! `events()` from it, and provides the dispatch, stream, and file
//! submission paths that are identical across backends.

use crate::error::{MachineError, Result};
use crate::events::ControllerEvents;
use crate::gcode::{FanoutHooks, GcodeHooks, GcodeInstruction, HookBundle, SendItem};
use crate::state::{SharedState, StatusSnapshot};
use crate::stream::{split_lines, SendStream};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// Records the first per-item error of a stream submission.
#[derive(Clone, Default)]
struct StreamWatch {
    first_error: Arc<Mutex<Option<MachineError>>>,
}

impl StreamWatch {
    fn first_error(&self) -> Option<MachineError> {
        self.first_error.lock().clone()
    }

    /// Wrap a submission item so its terminal error lands in the watch,
    /// alongside whatever hooks the submitter attached.
    fn watched(&self, item: SendItem) -> GcodeInstruction {
        let watcher: HookBundle = Arc::new(self.clone());
        match item {
            SendItem::Line(line) => GcodeInstruction::new(line).with_hooks(watcher),
            SendItem::Gcode(instr) => {
                let hooks = match instr.hooks() {
                    Some(own) => {
                        Arc::new(FanoutHooks::new(vec![own.clone(), watcher])) as HookBundle
                    }
                    None => watcher,
                };
                instr.with_hooks(hooks)
            }
        }
    }
}

impl GcodeHooks for StreamWatch {
    fn on_error(&self, error: &MachineError) {
        let mut guard = self.first_error.lock();
        if guard.is_none() {
            *guard = Some(error.clone());
        }
    }
}

/// Options accepted by the submission calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Wait for the submission to reach a terminal state (and the machine
    /// to stop) before returning.
    pub sync: bool,
}

impl SendOptions {
    /// Options requesting synchronous completion.
    pub fn sync() -> Self {
        Self { sync: true }
    }
}

/// The controller contract.
///
/// Instructions submitted to the same controller reach the device in
/// submission order. Real-time verbs (`hold`, `resume`, `cancel`,
/// `real_time_move`) bypass the queue and act immediately. `cancel` is the
/// universal cancellation primitive: every in-flight submission terminates
/// with a `cancelled` error and pending `move_to`/`home`/`probe` futures
/// reject with the same.
///
/// Every operation is required. A backend whose device genuinely cannot
/// perform one must return an [`ErrorKind::Unsupported`] error rather than
/// silently ignoring the call.
///
/// [`ErrorKind::Unsupported`]: crate::error::ErrorKind::Unsupported
#[async_trait]
pub trait Controller: Send + Sync {
    /// The shared state vector and event hub this controller owns.
    fn state(&self) -> &SharedState;

    /// The controller's event broadcast hub.
    fn events(&self) -> &ControllerEvents {
        self.state().events()
    }

    /// Immutable, self-consistent status snapshot.
    fn status(&self) -> StatusSnapshot {
        self.state().snapshot()
    }

    /// Open the transport and drive the handshake. With `retry`, connection
    /// failures are retried with backoff until connected or the caller
    /// cancels. Emits `connected` once the transport is open and `ready`
    /// once the device reports idle and un-alarmed.
    async fn init_connection(&self, retry: bool) -> Result<()>;

    /// Forcibly re-initialise the device. Invalidates all in-flight
    /// instructions with `cancelled`, then re-drives the handshake.
    async fn reset(&self) -> Result<()>;

    /// Attempt to clear a latched alarm. Fails with `machine_error` if the
    /// device refuses.
    async fn clear_error(&self) -> Result<()>;

    /// Enqueue a raw textual line (no trailing newline) for transmission.
    /// Progress is observable through the event broadcast only.
    async fn send_line(&self, line: &str, options: SendOptions) -> Result<()>;

    /// Enqueue a structured instruction. If it carries hooks, lifecycle
    /// events fire in order.
    async fn send_gcode(&self, instr: GcodeInstruction, options: SendOptions) -> Result<()>;

    /// Dispatch helper: structured instructions go to [`send_gcode`],
    /// anything else to [`send_line`].
    ///
    /// [`send_gcode`]: Controller::send_gcode
    /// [`send_line`]: Controller::send_line
    async fn send(&self, item: SendItem, options: SendOptions) -> Result<()> {
        match item {
            SendItem::Line(line) => self.send_line(&line, options).await,
            SendItem::Gcode(instr) => self.send_gcode(instr, options).await,
        }
    }

    /// Consume a submission stream, feeding each item through the
    /// submission path in order.
    ///
    /// Items are pulled one at a time so the bounded transmit queue applies
    /// backpressure to the source. Resolves once every item has reached a
    /// terminal state and motion has stopped. Fails with the first item's
    /// error (submission failure or device-reported); items not yet
    /// submitted at that point receive `cancelled`.
    async fn send_stream(&self, mut stream: SendStream) -> Result<()> {
        let watch = StreamWatch::default();
        self.state().update(|s| s.program_running = true);
        let mut first_err: Option<MachineError> = None;
        while let Some(item) = stream.next().await {
            if first_err.is_none() {
                first_err = watch.first_error();
            }
            if first_err.is_some() {
                if let SendItem::Gcode(instr) = &item {
                    if let Some(hooks) = instr.hooks() {
                        hooks.on_error(&MachineError::cancelled());
                    }
                }
                continue;
            }
            let instr = watch.watched(item);
            if let Err(err) = self.send_gcode(instr, SendOptions::default()).await {
                tracing::warn!("stream submission aborted: {}", err);
                first_err = Some(err);
            }
        }
        let sync = match first_err {
            Some(_) => Ok(()),
            None => self.wait_sync().await,
        };
        self.state().update(|s| s.program_running = false);
        if first_err.is_none() {
            first_err = watch.first_error();
        }
        match first_err {
            Some(err) => Err(err),
            None => sync,
        }
    }

    /// Read a UTF-8 text file, split it into lines, and stream them.
    async fn send_file(&self, path: &Path) -> Result<()> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            MachineError::comm(format!("failed to read {}: {}", path.display(), e))
        })?;
        let items = split_lines(&text).into_iter().map(SendItem::Line);
        self.send_stream(futures::stream::iter(items).boxed()).await
    }

    /// Complete once the transmit queue is drained, every sent instruction
    /// has reached a terminal state, and motion has stopped. Never discards
    /// unsent items.
    async fn wait_sync(&self) -> Result<()>;

    /// Feed hold: pause in-flight motion, retain the queue.
    async fn hold(&self) -> Result<()>;

    /// Release a feed hold.
    async fn resume(&self) -> Result<()>;

    /// Abort current operations, flush the queue (each flushed instruction
    /// receives `cancelled`), and release any hold. Idempotent.
    async fn cancel(&self) -> Result<()>;

    /// Nudge one axis by a signed increment, bypassing the queue. If a
    /// prior nudge is still in flight the call is silently ignored.
    async fn real_time_move(&self, axis: usize, increment: f64) -> Result<()>;

    /// Linear move; `None` components hold their axis. Resolves when motion
    /// completes and the machine has stopped. Rejects with `cancelled` if
    /// [`cancel`] runs first.
    ///
    /// [`cancel`]: Controller::cancel
    async fn move_to(&self, pos: &[Option<f64>], feed: Option<f64>) -> Result<()>;

    /// Home the indicated axes (default: all homable). Updates the per-axis
    /// homed flags.
    async fn home(&self, axes: Option<&[bool]>) -> Result<()>;

    /// Move toward `pos` until the probe trips; resolves with the tripped
    /// machine position, leaving the machine parked there. Fails with
    /// `probe_end`, `probe_initial_state`, or `probe_not_tripped`.
    async fn probe(&self, pos: &[Option<f64>], feed: Option<f64>) -> Result<Vec<f64>>;
}
