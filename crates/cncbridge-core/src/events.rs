//! Controller-wide event broadcast.
//!
//! A typed publish/subscribe hub with one broadcast channel per event kind.
//! Ordering is preserved within a channel; subscribers that fall behind see
//! a lag error rather than silently losing the tail of the stream.

use crate::error::MachineError;
use crate::state::StatusSnapshot;
use tokio::sync::broadcast;

/// Default per-channel buffer size.
const DEFAULT_CAPACITY: usize = 100;

/// Typed event hub owned by a controller instance.
///
/// Cloning the hub clones the channel handles, not the channels; all clones
/// publish into the same streams.
#[derive(Clone)]
pub struct ControllerEvents {
    status_update: broadcast::Sender<StatusSnapshot>,
    connected: broadcast::Sender<()>,
    ready: broadcast::Sender<()>,
    sent: broadcast::Sender<String>,
    received: broadcast::Sender<String>,
    error: broadcast::Sender<MachineError>,
}

impl ControllerEvents {
    /// Create a hub with the given per-channel buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (status_update, _) = broadcast::channel(capacity);
        let (connected, _) = broadcast::channel(capacity);
        let (ready, _) = broadcast::channel(capacity);
        let (sent, _) = broadcast::channel(capacity);
        let (received, _) = broadcast::channel(capacity);
        let (error, _) = broadcast::channel(capacity);
        Self {
            status_update,
            connected,
            ready,
            sent,
            received,
            error,
        }
    }

    /// Subscribe to state-vector change notifications. The payload is the
    /// post-mutation snapshot.
    pub fn subscribe_status_update(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.status_update.subscribe()
    }

    /// Subscribe to transport-open notifications.
    pub fn subscribe_connected(&self) -> broadcast::Receiver<()> {
        self.connected.subscribe()
    }

    /// Subscribe to device-ready notifications.
    pub fn subscribe_ready(&self) -> broadcast::Receiver<()> {
        self.ready.subscribe()
    }

    /// Subscribe to raw transmitted lines.
    pub fn subscribe_sent(&self) -> broadcast::Receiver<String> {
        self.sent.subscribe()
    }

    /// Subscribe to raw received lines.
    pub fn subscribe_received(&self) -> broadcast::Receiver<String> {
        self.received.subscribe()
    }

    /// Subscribe to controller-level errors.
    pub fn subscribe_error(&self) -> broadcast::Receiver<MachineError> {
        self.error.subscribe()
    }

    /// Publish a status update.
    pub fn emit_status_update(&self, snapshot: StatusSnapshot) {
        let _ = self.status_update.send(snapshot);
    }

    /// Publish a transport-open event.
    pub fn emit_connected(&self) {
        let _ = self.connected.send(());
    }

    /// Publish a device-ready event.
    pub fn emit_ready(&self) {
        let _ = self.ready.send(());
    }

    /// Publish a raw transmitted line.
    pub fn emit_sent(&self, raw: impl Into<String>) {
        let _ = self.sent.send(raw.into());
    }

    /// Publish a raw received line.
    pub fn emit_received(&self, raw: impl Into<String>) {
        let _ = self.received.send(raw.into());
    }

    /// Publish a controller-level error.
    pub fn emit_error(&self, err: MachineError) {
        let _ = self.error.send(err);
    }
}

impl Default for ControllerEvents {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for ControllerEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerEvents")
            .field("status_update_subscribers", &self.status_update.receiver_count())
            .field("error_subscribers", &self.error.receiver_count())
            .finish()
    }
}
