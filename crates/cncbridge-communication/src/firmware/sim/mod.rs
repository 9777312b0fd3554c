//! Simulator backend.
//!
//! [`SimController`] implements the full controller contract against an
//! in-memory [`SimDevice`] behind an in-memory transport link. It is the
//! reference backend: integration tests drive every contract clause through
//! it, and it doubles as a dry-run target for job logic.

pub mod device;

use crate::queue::{TransmitQueue, TransmitQueueConfig};
use crate::transport::{ConnectionParams, Transport};
use async_trait::async_trait;
use cncbridge_core::{
    completion, Controller, ControllerEvents, ErrorKind, GcodeInstruction, HookBundle,
    MachineError, MachineState, Result, SendOptions, SharedState,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

pub use device::SimDevice;

/// Configuration for the simulator backend.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Axis labels, in order.
    pub axis_labels: Vec<String>,
    /// Submission queue capacity (backpressure bound).
    pub queue_capacity: usize,
    /// Simulated device receive buffer in bytes.
    pub device_buffer: usize,
    /// Number of connection attempts that fail before one succeeds.
    pub fail_connects: u32,
    /// How long a real-time jog stays "in flight" for coalescing.
    pub jog_window: Duration,
    /// Worker loop poll interval.
    pub poll_interval: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            axis_labels: vec!["x".into(), "y".into(), "z".into()],
            queue_capacity: 16,
            device_buffer: 128,
            fail_connects: 0,
            jog_window: Duration::from_millis(25),
            poll_interval: Duration::from_millis(1),
        }
    }
}

/// In-memory transport over a shared [`SimDevice`].
pub struct SimLink {
    device: Arc<Mutex<SimDevice>>,
    connected: bool,
}

impl SimLink {
    /// Create a link to the given device.
    pub fn new(device: Arc<Mutex<SimDevice>>) -> Self {
        Self {
            device,
            connected: false,
        }
    }
}

impl Transport for SimLink {
    fn connect(&mut self, _params: &ConnectionParams) -> Result<()> {
        self.device.lock().greet();
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send(&mut self, data: &[u8]) -> Result<usize> {
        if !self.connected {
            return Err(MachineError::comm("simulated link not connected"));
        }
        self.device.lock().receive_bytes(data);
        Ok(data.len())
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        if !self.connected {
            return Err(MachineError::comm("simulated link not connected"));
        }
        Ok(self.device.lock().take_output())
    }
}

#[derive(Clone)]
struct WorkerCtx {
    state: SharedState,
    device: Arc<Mutex<SimDevice>>,
    link: Arc<Mutex<SimLink>>,
    queue: Arc<Mutex<TransmitQueue>>,
    // Records popped from the queue but not yet terminal; keeps wait_sync
    // honest across the acknowledge-to-complete window.
    settling: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl WorkerCtx {
    fn mirror(&self) {
        self.state.update(|s| self.device.lock().mirror_into(s));
    }
}

/// Simulator implementation of the controller contract.
pub struct SimController {
    config: SimConfig,
    state: SharedState,
    device: Arc<Mutex<SimDevice>>,
    link: Arc<Mutex<SimLink>>,
    queue: Arc<Mutex<TransmitQueue>>,
    queue_space: Arc<Semaphore>,
    settling: Arc<AtomicUsize>,
    jog_active: Arc<AtomicBool>,
    connect_failures: AtomicU32,
    shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimController {
    /// Create a controller over a fresh simulated device. The configuration
    /// is stored verbatim; the state vector starts at its defaults.
    pub fn new(config: SimConfig) -> Self {
        let labels: Vec<&str> = config.axis_labels.iter().map(String::as_str).collect();
        let state = SharedState::with_state(
            MachineState::with_axes(&labels),
            ControllerEvents::default(),
        );
        let device = Arc::new(Mutex::new(SimDevice::new(&config.axis_labels)));
        let link = Arc::new(Mutex::new(SimLink::new(device.clone())));
        let capacity = config.queue_capacity.max(1);
        let queue = Arc::new(Mutex::new(TransmitQueue::new(TransmitQueueConfig {
            device_buffer: config.device_buffer,
            max_pending: capacity,
        })));
        Self {
            connect_failures: AtomicU32::new(config.fail_connects),
            config,
            state,
            device,
            link,
            queue,
            queue_space: Arc::new(Semaphore::new(capacity)),
            settling: Arc::new(AtomicUsize::new(0)),
            jog_active: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// The backend configuration, as constructed.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Direct handle to the simulated device (probe plans, alarm setup,
    /// inspection).
    pub fn device(&self) -> Arc<Mutex<SimDevice>> {
        self.device.clone()
    }

    /// Inject a controller-level fault: every in-flight instruction
    /// terminates with `cancelled`, the error latches (`error=true`,
    /// `ready=false`, `errorData` set), and one `error` event broadcasts.
    pub fn inject_fault(&self, err: MachineError) {
        let flushed = self.queue.lock().flush_cancelled();
        if flushed > 0 {
            tracing::warn!("fault cancelled {} in-flight instructions", flushed);
        }
        self.state.latch_error(err);
    }

    fn is_connected(&self) -> bool {
        self.link.lock().is_connected()
    }

    fn spawn_worker(&self) {
        let mut guard = self.worker.lock();
        if guard.is_some() {
            return;
        }
        let ctx = WorkerCtx {
            state: self.state.clone(),
            device: self.device.clone(),
            link: self.link.clone(),
            queue: self.queue.clone(),
            settling: self.settling.clone(),
            shutdown: self.shutdown.clone(),
            poll_interval: self.config.poll_interval,
        };
        *guard = Some(tokio::spawn(worker_loop(ctx)));
    }

    async fn submit(
        &self,
        text: String,
        hooks: Option<HookBundle>,
        options: SendOptions,
    ) -> Result<()> {
        if !self.is_connected() {
            let err = MachineError::comm("controller not connected");
            if let Some(hooks) = &hooks {
                hooks.on_error(&err);
            }
            return Err(err);
        }
        if let Some(err) = self.state.latched_error() {
            if let Some(hooks) = &hooks {
                hooks.on_error(&err);
            }
            return Err(err);
        }
        let permit = self
            .queue_space
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| MachineError::cancelled())?;
        self.queue.lock().enqueue(text, hooks, Some(permit))?;
        if options.sync {
            self.wait_sync().await?;
        }
        Ok(())
    }

    /// Submit a single instruction and wait for its terminal event.
    async fn submit_awaited(&self, text: String) -> Result<()> {
        let (hooks, rx) = completion();
        let instr = GcodeInstruction::new(text).with_hooks(hooks);
        self.send_gcode(instr, SendOptions::default()).await?;
        rx.await.unwrap_or_else(|_| Err(MachineError::cancelled()))
    }

    fn axis_word(&self, axis: usize, value: f64) -> String {
        let label = self.state.read(|s| s.axis_labels[axis].clone());
        format!("{}{}", label.to_uppercase(), value)
    }

    fn motion_command(&self, code: &str, pos: &[Option<f64>], feed: Option<f64>) -> Result<String> {
        let axis_count = self.state.read(|s| s.axis_count());
        if pos.len() > axis_count {
            return Err(MachineError::machine(format!(
                "{} axis words given, machine has {}",
                pos.len(),
                axis_count
            )));
        }
        let mut cmd = String::from(code);
        for (axis, value) in pos.iter().enumerate() {
            if let Some(v) = value {
                cmd.push(' ');
                cmd.push_str(&self.axis_word(axis, *v));
            }
        }
        if let Some(f) = feed {
            cmd.push_str(&format!(" F{}", f));
        }
        Ok(cmd)
    }

    /// Run a motion-producing instruction to completion, tracking the
    /// `moving` flag across its lifetime.
    async fn run_motion(&self, command: String) -> Result<()> {
        self.state.update(|s| s.moving = true);
        let outcome = self.submit_awaited(command).await;
        self.state.update(|s| s.moving = false);
        outcome
    }
}

#[async_trait]
impl Controller for SimController {
    fn state(&self) -> &SharedState {
        &self.state
    }

    async fn init_connection(&self, retry: bool) -> Result<()> {
        let mut backoff = Duration::from_millis(100);
        loop {
            let attempt = if self.connect_failures.load(Ordering::SeqCst) > 0 {
                self.connect_failures.fetch_sub(1, Ordering::SeqCst);
                Err(MachineError::comm("simulated connect failure"))
            } else {
                self.link.lock().connect(&ConnectionParams::default())
            };
            match attempt {
                Ok(()) => break,
                Err(err) if retry => {
                    tracing::warn!("connect failed, retrying in {:?}: {}", backoff, err);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(2));
                }
                Err(err) => return Err(err),
            }
        }
        self.events().emit_connected();
        self.spawn_worker();
        // Handshake: mirror the fresh device and report ready.
        let labels: Vec<String> = self.config.axis_labels.clone();
        self.state.update(|s| {
            let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
            *s = MachineState::with_axes(&label_refs);
            self.device.lock().mirror_into(s);
            s.ready = true;
        });
        self.events().emit_ready();
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.cancel().await?;
        self.device.lock().reset();
        let labels: Vec<String> = self.config.axis_labels.clone();
        self.state.update(|s| {
            let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
            *s = MachineState::with_axes(&label_refs);
        });
        if self.is_connected() {
            self.state.update(|s| {
                self.device.lock().mirror_into(s);
                s.ready = true;
            });
            self.events().emit_ready();
        }
        Ok(())
    }

    async fn clear_error(&self) -> Result<()> {
        if self.state.read(|s| !s.error) {
            return Ok(());
        }
        if self.device.lock().clear_alarm() {
            self.state.update(|s| {
                s.error = false;
                s.error_data = None;
                s.ready = true;
            });
            Ok(())
        } else {
            Err(MachineError::machine("device refused to clear alarm"))
        }
    }

    async fn send_line(&self, line: &str, options: SendOptions) -> Result<()> {
        self.submit(line.to_string(), None, options).await
    }

    async fn send_gcode(&self, instr: GcodeInstruction, options: SendOptions) -> Result<()> {
        let hooks = instr.hooks().cloned();
        self.submit(instr.text().to_string(), hooks, options).await
    }

    async fn wait_sync(&self) -> Result<()> {
        loop {
            if let Some(err) = self.state.latched_error() {
                return Err(err);
            }
            let drained = self.queue.lock().is_idle()
                && self.settling.load(Ordering::SeqCst) == 0;
            let stopped = self.state.read(|s| !s.moving);
            if drained && stopped {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    async fn hold(&self) -> Result<()> {
        self.queue.lock().pause();
        self.state.update(|s| s.held = true);
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.queue.lock().resume();
        self.state.update(|s| s.held = false);
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        let flushed = self.queue.lock().flush_cancelled();
        if flushed > 0 {
            tracing::debug!("cancel flushed {} instructions", flushed);
        }
        self.state.update(|s| {
            s.held = false;
            s.moving = false;
        });
        Ok(())
    }

    async fn real_time_move(&self, axis: usize, increment: f64) -> Result<()> {
        let axis_count = self.state.read(|s| s.axis_count());
        if axis >= axis_count {
            return Err(MachineError::machine(format!(
                "axis index {} out of range",
                axis
            )));
        }
        if self.jog_active.swap(true, Ordering::SeqCst) {
            // Coalescing rule: at most one outstanding nudge.
            tracing::debug!("jog ignored: previous nudge still in flight");
            return Ok(());
        }
        self.device.lock().jog(axis, increment);
        self.state.update(|s| self.device.lock().mirror_into(s));
        let jog_active = self.jog_active.clone();
        let window = self.config.jog_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            jog_active.store(false, Ordering::SeqCst);
        });
        Ok(())
    }

    async fn move_to(&self, pos: &[Option<f64>], feed: Option<f64>) -> Result<()> {
        let code = if feed.is_some() { "G1" } else { "G0" };
        let cmd = self.motion_command(code, pos, feed)?;
        self.run_motion(cmd).await
    }

    async fn home(&self, axes: Option<&[bool]>) -> Result<()> {
        let cmd = match axes {
            None => "$H".to_string(),
            Some(mask) => {
                let (labels, homable) = self
                    .state
                    .read(|s| (s.axis_labels.clone(), s.homable_axes.clone()));
                let mut cmd = String::from("$H");
                for (axis, requested) in mask.iter().enumerate() {
                    if *requested && homable.get(axis).copied().unwrap_or(false) {
                        if let Some(label) = labels.get(axis) {
                            cmd.push_str(&label.to_uppercase());
                        }
                    }
                }
                cmd
            }
        };
        self.run_motion(cmd).await
    }

    async fn probe(&self, pos: &[Option<f64>], feed: Option<f64>) -> Result<Vec<f64>> {
        let cmd = self.motion_command("G38.2", pos, feed)?;
        self.run_motion(cmd).await?;
        self.device
            .lock()
            .last_probe()
            .ok_or_else(|| MachineError::new(ErrorKind::Parse, "device reported no probe position"))
    }
}

impl Drop for SimController {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}

async fn worker_loop(ctx: WorkerCtx) {
    let mut rxbuf = String::new();
    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break;
        }

        // WRITE PHASE: forward pending lines within the device buffer limit.
        let pumped = {
            let mut queue = ctx.queue.lock();
            let mut link = ctx.link.lock();
            queue.pump(&mut *link)
        };
        match pumped {
            Ok(lines) => {
                for line in lines {
                    ctx.state.events().emit_sent(line);
                }
            }
            Err(err) => {
                tracing::error!("transport write failed: {}", err);
                ctx.queue.lock().flush_cancelled();
                ctx.state.latch_error(err);
            }
        }

        // READ PHASE: drain device replies and settle acknowledgements.
        let received = { ctx.link.lock().receive() };
        match received {
            Ok(bytes) if !bytes.is_empty() => {
                rxbuf.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(pos) = rxbuf.find('\n') {
                    let line = rxbuf[..pos].trim().to_string();
                    rxbuf.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }
                    ctx.state.events().emit_received(line.clone());
                    handle_reply(&ctx, &line);
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!("transport read failed: {}", err);
                ctx.queue.lock().flush_cancelled();
                ctx.state.latch_error(err);
            }
        }

        tokio::time::sleep(ctx.poll_interval).await;
    }
}

fn handle_reply(ctx: &WorkerCtx, line: &str) {
    if line == "ok" {
        ctx.settling.fetch_add(1, Ordering::SeqCst);
        let record = ctx.queue.lock().acknowledge();
        if let Some(record) = record {
            ctx.mirror();
            record.complete();
        }
        ctx.settling.fetch_sub(1, Ordering::SeqCst);
    } else if let Some(rest) = line.strip_prefix("error:") {
        let err = parse_device_error(rest);
        ctx.queue.lock().fail_front(&err);
        ctx.mirror();
    } else if line.starts_with("probe:") {
        // Position report; the state lands with the ack that follows.
    } else {
        tracing::debug!("device message: {}", line);
    }
}

fn parse_device_error(rest: &str) -> MachineError {
    match rest.split_once(':') {
        Some((kind, message)) => match ErrorKind::parse(kind) {
            Some(kind) => MachineError::new(kind, message),
            None => MachineError::parse(format!("unknown device error kind: {}", rest)),
        },
        None => MachineError::parse(format!("malformed device error: {}", rest)),
    }
}
