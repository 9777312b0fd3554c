//! End-to-end scenarios against the simulator backend.

use cncbridge_communication::{SimConfig, SimController};
use cncbridge_core::{
    stream, Controller, ErrorKind, GcodeHooks, GcodeInstruction, MachineError, SendItem,
    SendOptions,
};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn terminal_events(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e == "executed" || e.starts_with("error:"))
            .collect()
    }
}

impl GcodeHooks for Recorder {
    fn on_queued(&self) {
        self.events.lock().unwrap().push("queued".into());
    }
    fn on_sent(&self) {
        self.events.lock().unwrap().push("sent".into());
    }
    fn on_ack(&self) {
        self.events.lock().unwrap().push("ack".into());
    }
    fn on_executing(&self) {
        self.events.lock().unwrap().push("executing".into());
    }
    fn on_executed(&self) {
        self.events.lock().unwrap().push("executed".into());
    }
    fn on_error(&self, error: &MachineError) {
        self.events
            .lock()
            .unwrap()
            .push(format!("error:{}", error.kind));
    }
}

async fn connected() -> SimController {
    let controller = SimController::new(SimConfig::default());
    controller.init_connection(false).await.unwrap();
    controller
}

#[tokio::test]
async fn connect_emits_connected_then_ready() {
    let controller = SimController::new(SimConfig::default());
    let mut on_connected = controller.events().subscribe_connected();
    let mut on_ready = controller.events().subscribe_ready();

    controller.init_connection(false).await.unwrap();

    assert!(on_connected.try_recv().is_ok());
    assert!(on_ready.try_recv().is_ok());
    assert!(controller.status().ready);
}

#[tokio::test]
async fn connect_retries_with_backoff() {
    let controller = SimController::new(SimConfig {
        fail_connects: 2,
        ..Default::default()
    });
    controller.init_connection(true).await.unwrap();
    assert!(controller.status().ready);
}

#[tokio::test]
async fn connect_without_retry_surfaces_failure() {
    let controller = SimController::new(SimConfig {
        fail_connects: 1,
        ..Default::default()
    });
    let err = controller.init_connection(false).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Comm);
}

#[tokio::test]
async fn lifecycle_events_fire_in_order() {
    let controller = connected().await;
    let recorder = Arc::new(Recorder::default());
    let instr = GcodeInstruction::new("G0 X5").with_hooks(recorder.clone());

    controller.send_gcode(instr, SendOptions::default()).await.unwrap();
    controller.wait_sync().await.unwrap();

    assert_eq!(
        recorder.events(),
        vec!["queued", "sent", "ack", "executing", "executed"]
    );
}

#[tokio::test]
async fn sent_and_received_broadcasts_carry_raw_lines() {
    let controller = connected().await;
    let mut sent = controller.events().subscribe_sent();
    let mut received = controller.events().subscribe_received();

    controller
        .send_line("G0 X5", SendOptions::sync())
        .await
        .unwrap();

    assert_eq!(sent.recv().await.unwrap(), "G0 X5");
    let mut got_ok = false;
    while let Ok(line) = received.try_recv() {
        if line == "ok" {
            got_ok = true;
        }
    }
    assert!(got_ok);
}

#[tokio::test]
async fn cancellation_fans_out_to_queued_instructions() {
    let controller = connected().await;
    controller.hold().await.unwrap();

    let recorders: Vec<Arc<Recorder>> = (0..3).map(|_| Arc::new(Recorder::default())).collect();
    for (i, recorder) in recorders.iter().enumerate() {
        let instr =
            GcodeInstruction::new(format!("G0 X{}", i)).with_hooks(recorder.clone());
        controller.send_gcode(instr, SendOptions::default()).await.unwrap();
    }

    controller.cancel().await.unwrap();

    for recorder in &recorders {
        assert_eq!(recorder.terminal_events(), vec!["error:cancelled"]);
        assert!(!recorder.events().contains(&"executed".to_string()));
    }
    let status = controller.status();
    assert!(!status.held);
    assert!(!status.moving);

    // A second cancel with nothing outstanding is a no-op
    controller.cancel().await.unwrap();
}

#[tokio::test]
async fn hold_retains_queue_until_resume() {
    let controller = connected().await;
    controller.hold().await.unwrap();
    assert!(controller.status().held);

    let recorder = Arc::new(Recorder::default());
    let instr = GcodeInstruction::new("G0 X3").with_hooks(recorder.clone());
    controller.send_gcode(instr, SendOptions::default()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(recorder.events(), vec!["queued"]);

    controller.resume().await.unwrap();
    controller.wait_sync().await.unwrap();
    assert_eq!(recorder.terminal_events(), vec!["executed"]);
    assert_eq!(controller.status().mpos[0], 3.0);
}

#[tokio::test]
async fn move_updates_mirrored_position() {
    let controller = connected().await;
    controller
        .move_to(&[Some(10.0), Some(20.0), None], Some(800.0))
        .await
        .unwrap();

    let status = controller.status();
    assert_eq!(status.mpos, vec![10.0, 20.0, 0.0]);
    assert_eq!(status.pos, vec![10.0, 20.0, 0.0]);
    assert_eq!(status.feed, 800.0);
    assert!(!status.moving);
}

#[tokio::test]
async fn home_updates_homed_flags() {
    let controller = connected().await;
    controller
        .move_to(&[Some(5.0), Some(5.0), Some(5.0)], None)
        .await
        .unwrap();

    controller
        .home(Some(&[true, false, false]))
        .await
        .unwrap();
    let status = controller.status();
    assert_eq!(status.homed, vec![true, false, false]);
    assert_eq!(status.mpos, vec![0.0, 5.0, 5.0]);

    controller.home(None).await.unwrap();
    assert_eq!(controller.status().homed, vec![true, true, true]);
}

#[tokio::test]
async fn probe_without_trip_fails_probe_end_at_endpoint() {
    let controller = connected().await;
    let err = controller
        .probe(&[None, None, Some(-10.0)], Some(100.0))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ProbeEnd);
    assert_eq!(controller.status().mpos[2], -10.0);
}

#[tokio::test]
async fn probe_resolves_with_tripped_position() {
    let controller = connected().await;
    controller
        .device()
        .lock()
        .set_probe_trip(Some(vec![0.0, 0.0, -4.2]));

    let tripped = controller
        .probe(&[None, None, Some(-10.0)], Some(100.0))
        .await
        .unwrap();
    assert_eq!(tripped, vec![0.0, 0.0, -4.2]);
    assert_eq!(controller.status().mpos[2], -4.2);
}

#[tokio::test]
async fn probe_already_tripped_fails_fast() {
    let controller = connected().await;
    controller.device().lock().set_probe_tripped(true);
    let err = controller
        .probe(&[None, None, Some(-10.0)], None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ProbeInitialState);
}

#[tokio::test]
async fn probe_refused_by_device() {
    let controller = connected().await;
    controller.device().lock().set_probe_refused(true);
    let err = controller
        .probe(&[None, None, Some(-10.0)], None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ProbeNotTripped);
}

#[tokio::test]
async fn real_time_jog_coalesces() {
    let controller = connected().await;
    controller.real_time_move(0, 1.5).await.unwrap();
    // Second nudge lands inside the coalescing window: silently ignored
    controller.real_time_move(0, 1.5).await.unwrap();
    assert_eq!(controller.status().mpos[0], 1.5);

    tokio::time::sleep(controller.config().jog_window + Duration::from_millis(20)).await;
    controller.real_time_move(0, 1.5).await.unwrap();
    assert_eq!(controller.status().mpos[0], 3.0);
}

#[tokio::test]
async fn jog_rejects_unknown_axis() {
    let controller = connected().await;
    let err = controller.real_time_move(7, 1.0).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Machine);
}

#[tokio::test]
async fn fault_latches_error_and_cancels_in_flight() {
    let controller = connected().await;
    let mut errors = controller.events().subscribe_error();

    controller.hold().await.unwrap();
    let recorder = Arc::new(Recorder::default());
    let instr = GcodeInstruction::new("G0 X1").with_hooks(recorder.clone());
    controller.send_gcode(instr, SendOptions::default()).await.unwrap();

    controller.inject_fault(MachineError::comm("transport dropped"));

    let status = controller.status();
    assert!(status.error);
    assert!(!status.ready);
    assert_eq!(status.error_data.as_ref().unwrap().kind, ErrorKind::Comm);
    assert_eq!(recorder.terminal_events(), vec!["error:cancelled"]);
    assert_eq!(errors.recv().await.unwrap().kind, ErrorKind::Comm);
    assert!(errors.try_recv().is_err());

    // Submission is refused while the error is latched
    let err = controller
        .send_line("G0 X2", SendOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Comm);

    // wait_sync surfaces the latched error rather than hanging
    let err = controller.wait_sync().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Comm);
}

#[tokio::test]
async fn clear_error_restores_ready() {
    let controller = connected().await;
    controller.inject_fault(MachineError::comm("glitch"));
    assert!(controller.status().error);

    controller.clear_error().await.unwrap();
    let status = controller.status();
    assert!(!status.error);
    assert!(status.ready);
    assert!(status.error_data.is_none());

    controller.send_line("G0 X1", SendOptions::sync()).await.unwrap();
    assert_eq!(controller.status().mpos[0], 1.0);
}

#[tokio::test]
async fn clear_error_fails_when_device_refuses() {
    let controller = connected().await;
    controller
        .device()
        .lock()
        .set_alarm(MachineError::machine("hard fault"), true);
    controller.inject_fault(MachineError::machine("hard fault"));

    let err = controller.clear_error().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Machine);
    assert!(controller.status().error);
}

#[tokio::test]
async fn reset_cancels_and_reinitialises() {
    let controller = connected().await;
    controller
        .move_to(&[Some(5.0), None, None], None)
        .await
        .unwrap();
    controller.hold().await.unwrap();
    let recorder = Arc::new(Recorder::default());
    let instr = GcodeInstruction::new("G0 X9").with_hooks(recorder.clone());
    controller.send_gcode(instr, SendOptions::default()).await.unwrap();

    let mut on_ready = controller.events().subscribe_ready();
    controller.reset().await.unwrap();

    assert_eq!(recorder.terminal_events(), vec!["error:cancelled"]);
    let status = controller.status();
    assert!(status.ready);
    assert!(!status.held);
    assert_eq!(status.mpos, vec![0.0, 0.0, 0.0]);
    assert!(on_ready.try_recv().is_ok());
}

#[tokio::test]
async fn wait_sync_completes_immediately_when_idle() {
    let controller = connected().await;
    tokio::time::timeout(Duration::from_secs(1), controller.wait_sync())
        .await
        .expect("wait_sync should be bounded when idle")
        .unwrap();
}

#[tokio::test]
async fn send_stream_executes_every_item() {
    let controller = connected().await;
    let recorder = Arc::new(Recorder::default());
    let items: Vec<SendItem> = vec![
        SendItem::from("G0 X1"),
        SendItem::from(GcodeInstruction::new("G0 X2").with_hooks(recorder.clone())),
        SendItem::from("G0 X3"),
    ];

    controller.send_stream(stream::from_items(items)).await.unwrap();

    assert_eq!(recorder.terminal_events(), vec!["executed"]);
    let status = controller.status();
    assert_eq!(status.mpos[0], 3.0);
    assert!(!status.program_running);
}

#[tokio::test]
async fn send_stream_fails_with_first_item_error() {
    let controller = connected().await;
    let late = Arc::new(Recorder::default());
    let items: Vec<SendItem> = vec![
        SendItem::from("G0 X1"),
        SendItem::from("G77"), // unsupported on the device
        SendItem::from(GcodeInstruction::new("G0 X5").with_hooks(late.clone())),
    ];

    let err = controller
        .send_stream(stream::from_items(items))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Machine);
    assert!(!controller.status().program_running);
}

#[tokio::test]
async fn send_stream_from_push_source() {
    let controller = connected().await;
    let (tx, rx) = tokio::sync::mpsc::channel(2);

    let producer = tokio::spawn(async move {
        for i in 1..=4 {
            tx.send(SendItem::from(format!("G0 X{}", i))).await.unwrap();
        }
    });

    controller.send_stream(stream::from_receiver(rx)).await.unwrap();
    producer.await.unwrap();
    assert_eq!(controller.status().mpos[0], 4.0);
}

#[tokio::test]
async fn send_file_streams_last_line_without_newline() {
    let controller = connected().await;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "G0 X1\nG0 X2\n\nG0 X3").unwrap();

    controller.send_file(file.path()).await.unwrap();
    assert_eq!(controller.status().mpos[0], 3.0);
}

#[tokio::test]
async fn status_snapshot_reflects_modal_state() {
    let controller = connected().await;
    controller.send_line("G21 G90", SendOptions::sync()).await.unwrap();
    controller.send_line("M3 S9000", SendOptions::sync()).await.unwrap();
    controller.send_line("M8", SendOptions::sync()).await.unwrap();
    controller.send_line("N12 G1 X2 F450", SendOptions::sync()).await.unwrap();

    let status = controller.status();
    assert!(status.spindle);
    assert_eq!(status.coolant.level(), 2);
    assert_eq!(status.feed, 450.0);
    assert_eq!(status.line, 12);
    assert_eq!(status.mpos[0], 2.0);

    // Pure projection: no intervening mutation, identical snapshots
    assert_eq!(controller.status(), controller.status());
}

#[tokio::test]
async fn work_offsets_flow_through_snapshot() {
    let controller = connected().await;
    controller
        .send_line("G10 L2 P1 X1 Y2 Z3", SendOptions::sync())
        .await
        .unwrap();
    controller
        .send_line("G0 X0 Y0 Z0", SendOptions::sync())
        .await
        .unwrap();

    let status = controller.status();
    assert_eq!(status.mpos, vec![1.0, 2.0, 3.0]);
    assert_eq!(status.mpos_offset, vec![1.0, 2.0, 3.0]);
    assert_eq!(status.pos, vec![0.0, 0.0, 0.0]);
    assert_eq!(status.active_coord_sys, Some(0));
}

#[tokio::test]
async fn submission_before_connect_is_refused() {
    let controller = SimController::new(SimConfig::default());
    let err = controller
        .send_line("G0 X1", SendOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Comm);
}
