//! Structured G-code instructions and their lifecycle hooks.
//!
//! The core never parses G-code: a [`GcodeInstruction`] is an opaque tagged
//! payload produced by a parser upstream. What the core does manage is the
//! instruction's lifecycle: hooks attached here are driven by the
//! [`crate::lifecycle`] tracker for exactly as long as the instruction is in
//! flight.

use crate::error::MachineError;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Receiver of per-instruction lifecycle events.
///
/// Implementations must not block: hooks are invoked from the controller's
/// execution context. Every method has an empty default so receivers
/// implement only the transitions they care about.
pub trait GcodeHooks: Send + Sync {
    /// Instruction accepted into the transmit queue.
    fn on_queued(&self) {}

    /// Bytes left the host for the device.
    fn on_sent(&self) {}

    /// Device acknowledged receipt.
    fn on_ack(&self) {}

    /// Device started acting on the instruction.
    fn on_executing(&self) {}

    /// Execution completed.
    fn on_executed(&self) {}

    /// Terminal failure; no further events follow.
    fn on_error(&self, _error: &MachineError) {}
}

/// Shared hook bundle attached to an instruction.
pub type HookBundle = Arc<dyn GcodeHooks>;

/// A tagged, structured G-code instruction.
#[derive(Clone)]
pub struct GcodeInstruction {
    id: Uuid,
    text: String,
    hooks: Option<HookBundle>,
}

impl GcodeInstruction {
    /// Wrap a line of G-code as a structured instruction.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            hooks: None,
        }
    }

    /// Attach a lifecycle hook bundle.
    pub fn with_hooks(mut self, hooks: HookBundle) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Unique instruction id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The instruction payload, without trailing newline.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The attached hook bundle, if any.
    pub fn hooks(&self) -> Option<&HookBundle> {
        self.hooks.as_ref()
    }
}

impl fmt::Debug for GcodeInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcodeInstruction")
            .field("id", &self.id)
            .field("text", &self.text)
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

/// Hook bundle forwarding every event to multiple receivers, in order.
///
/// Lets a controller observe an instruction's lifecycle without displacing
/// the submitter's own hooks.
pub struct FanoutHooks {
    targets: Vec<HookBundle>,
}

impl FanoutHooks {
    /// Combine several hook bundles into one.
    pub fn new(targets: Vec<HookBundle>) -> Self {
        Self { targets }
    }
}

impl GcodeHooks for FanoutHooks {
    fn on_queued(&self) {
        for target in &self.targets {
            target.on_queued();
        }
    }

    fn on_sent(&self) {
        for target in &self.targets {
            target.on_sent();
        }
    }

    fn on_ack(&self) {
        for target in &self.targets {
            target.on_ack();
        }
    }

    fn on_executing(&self) {
        for target in &self.targets {
            target.on_executing();
        }
    }

    fn on_executed(&self) {
        for target in &self.targets {
            target.on_executed();
        }
    }

    fn on_error(&self, error: &MachineError) {
        for target in &self.targets {
            target.on_error(error);
        }
    }
}

/// A submission item: either a raw textual line or a tagged instruction.
#[derive(Debug, Clone)]
pub enum SendItem {
    /// Raw line, no lifecycle hooks.
    Line(String),
    /// Structured instruction, lifecycle events fire if hooks are attached.
    Gcode(GcodeInstruction),
}

impl SendItem {
    /// The textual payload of this item.
    pub fn text(&self) -> &str {
        match self {
            SendItem::Line(line) => line,
            SendItem::Gcode(instr) => instr.text(),
        }
    }
}

impl From<String> for SendItem {
    fn from(line: String) -> Self {
        SendItem::Line(line)
    }
}

impl From<&str> for SendItem {
    fn from(line: &str) -> Self {
        SendItem::Line(line.to_string())
    }
}

impl From<GcodeInstruction> for SendItem {
    fn from(instr: GcodeInstruction) -> Self {
        SendItem::Gcode(instr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_ids_are_unique() {
        let a = GcodeInstruction::new("G0 X1");
        let b = GcodeInstruction::new("G0 X1");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn send_item_dispatch_tag() {
        let line: SendItem = "G0 X1".into();
        assert!(matches!(line, SendItem::Line(_)));

        let instr: SendItem = GcodeInstruction::new("G0 X1").into();
        assert!(matches!(instr, SendItem::Gcode(_)));
        assert_eq!(instr.text(), "G0 X1");
    }

    #[test]
    fn hooks_are_optional() {
        struct Nop;
        impl GcodeHooks for Nop {}

        let bare = GcodeInstruction::new("M5");
        assert!(bare.hooks().is_none());

        let hooked = GcodeInstruction::new("M5").with_hooks(Arc::new(Nop));
        assert!(hooked.hooks().is_some());
    }
}
