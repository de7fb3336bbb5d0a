//! Controllers driven end to end through the handler table and actor runtime,
//! with tokio's clock paused so timer behavior is deterministic.

use sortline_controllers::{
    AccessDirectory, ChannelEventSink, ControllerHandle, ControllerRuntime, EnvController,
    GateController, GateMode, MemoryDirectory, MemoryRepository, SortController, SortState,
};
use sortline_core::{DeviceKind, Error, GateConfig, MessageKind, RigConfig, SorterConfig, Zone};
use sortline_network::{DeviceTransport, HandlerTable};
use sortline_protocol::DeviceMessage;
use sortline_protocol::commands::FanMode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records every command sent, per device.
#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<(DeviceKind, String)>>,
}

impl Recorder {
    fn sent_to(&self, device: DeviceKind) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| *d == device)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl DeviceTransport for Recorder {
    fn send(&self, device: DeviceKind, payload: &str) -> bool {
        self.sent.lock().unwrap().push((device, payload.to_string()));
        true
    }

    fn is_connected(&self, _device: DeviceKind) -> bool {
        true
    }
}

fn event(device: DeviceKind, payload: &str) -> DeviceMessage {
    DeviceMessage::event(device, payload)
}

#[tokio::test(start_paused = true)]
async fn test_sorter_auto_stops_exactly_once() {
    let recorder = Arc::new(Recorder::default());
    let handlers = HandlerTable::new();
    let mut runtime = ControllerRuntime::new();
    let config = SorterConfig {
        auto_stop_timeout_secs: 30,
    };
    let sorter = runtime.spawn(SortController::new(
        &config,
        recorder.clone(),
        Arc::new(ChannelEventSink::new(64)),
    ));
    sorter.register(&handlers);

    handlers.dispatch(event(DeviceKind::Sorter, "ir1"));
    handlers.dispatch(event(DeviceKind::Sorter, "ssA"));
    let status = sorter.call(|s| s.status()).await.unwrap();
    assert!(status.is_running);
    assert_eq!(status.items_processed, 1);
    assert_eq!(status.sort_counts[&Zone::A], 1);

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(sorter.call(|s| s.state()).await.unwrap(), SortState::Running);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(sorter.call(|s| s.state()).await.unwrap(), SortState::Stopped);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(recorder.sent_to(DeviceKind::Sorter), vec!["st", "sp"]);

    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sorter_activity_defers_auto_stop() {
    let recorder = Arc::new(Recorder::default());
    let handlers = HandlerTable::new();
    let mut runtime = ControllerRuntime::new();
    let sorter = runtime.spawn(SortController::new(
        &SorterConfig::default(),
        recorder.clone(),
        Arc::new(ChannelEventSink::new(64)),
    ));
    sorter.register(&handlers);

    handlers.dispatch(event(DeviceKind::Sorter, "ir1"));
    tokio::time::sleep(Duration::from_secs(20)).await;
    handlers.dispatch(event(DeviceKind::Sorter, "ssC"));
    tokio::time::sleep(Duration::from_secs(20)).await;

    // 40s since start but only 20s since the last activity.
    assert_eq!(sorter.call(|s| s.state()).await.unwrap(), SortState::Running);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(sorter.call(|s| s.state()).await.unwrap(), SortState::Stopped);
    assert_eq!(recorder.sent_to(DeviceKind::Sorter), vec!["st", "sp"]);

    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sorter_stop_command_cancels_idle_timer() {
    let recorder = Arc::new(Recorder::default());
    let handlers = HandlerTable::new();
    let mut runtime = ControllerRuntime::new();
    let sorter = runtime.spawn(SortController::new(
        &SorterConfig::default(),
        recorder.clone(),
        Arc::new(ChannelEventSink::new(64)),
    ));
    sorter.register(&handlers);

    handlers.dispatch(DeviceMessage::command(DeviceKind::Sorter, "st"));
    handlers.dispatch(DeviceMessage::command(DeviceKind::Sorter, "sp"));
    tokio::time::sleep(Duration::from_secs(300)).await;

    assert_eq!(sorter.call(|s| s.state()).await.unwrap(), SortState::Stopped);
    assert_eq!(recorder.sent_to(DeviceKind::Sorter), vec!["st", "sp"]);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_env_rejects_out_of_range_target() {
    let recorder = Arc::new(Recorder::default());
    let repo = Arc::new(MemoryRepository::new());
    let mut runtime = ControllerRuntime::new();
    let env = runtime.spawn(EnvController::new(
        &RigConfig::default().zones,
        recorder.clone(),
        Arc::new(ChannelEventSink::new(64)),
        repo.clone(),
    ));

    let before = env.call(|e| e.zones().to_vec()).await.unwrap();
    let result = env
        .call(|e| e.set_target_temperature(Zone::A, -40.0))
        .await
        .unwrap();

    assert!(matches!(result, Err(Error::TargetOutOfRange { .. })));
    assert_eq!(env.call(|e| e.zones().to_vec()).await.unwrap(), before);
    assert!(recorder.sent_to(DeviceKind::Environment).is_empty());

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_env_fan_heat_only_for_room_temperature() {
    let handlers = HandlerTable::new();
    let events = Arc::new(ChannelEventSink::new(64));
    let mut rx = events.subscribe();
    let mut runtime = ControllerRuntime::new();
    let env = runtime.spawn(EnvController::new(
        &RigConfig::default().zones,
        Arc::new(Recorder::default()),
        events,
        Arc::new(MemoryRepository::new()),
    ));
    env.register(&handlers);

    handlers.dispatch(event(DeviceKind::Environment, "AH2"));
    handlers.dispatch(event(DeviceKind::Environment, "CH2"));

    let (a, c) = env
        .call(|e| {
            let a = e.zone_state(Zone::A).cloned();
            let c = e.zone_state(Zone::C).cloned();
            (a, c)
        })
        .await
        .unwrap();
    let (a, c) = (a.unwrap(), c.unwrap());
    assert_eq!((a.fan_mode, a.fan_speed), (FanMode::Off, 0));
    assert_eq!((c.fan_mode, c.fan_speed), (FanMode::Heat, 2));

    let first = rx.recv().await.unwrap();
    assert_eq!(first.category, "environment");
    assert_eq!(first.action, "fan_status");
    assert_eq!(first.payload["mode"], "off");

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_env_malformed_payload_keeps_controller_alive() {
    let handlers = HandlerTable::new();
    let mut runtime = ControllerRuntime::new();
    let env = runtime.spawn(EnvController::new(
        &RigConfig::default().zones,
        Arc::new(Recorder::default()),
        Arc::new(ChannelEventSink::new(64)),
        Arc::new(MemoryRepository::new()),
    ));
    env.register(&handlers);

    handlers.dispatch(event(DeviceKind::Environment, "garbage"));
    handlers.dispatch(event(DeviceKind::Environment, "wQ1"));
    handlers.dispatch(event(DeviceKind::Environment, "tp-21.0;x;19.5"));

    let temps = env
        .call(|e| e.zones().iter().map(|z| z.current_temp).collect::<Vec<_>>())
        .await
        .unwrap();
    assert_eq!(temps, vec![Some(-21.0), None, Some(19.5)]);

    runtime.shutdown().await;
}

fn gate_runtime(
    recorder: Arc<Recorder>,
    directory: Arc<MemoryDirectory>,
) -> (
    ControllerRuntime,
    ControllerHandle<GateController>,
    HandlerTable,
) {
    let handlers = HandlerTable::new();
    let mut runtime = ControllerRuntime::new();
    let gate = runtime.spawn(GateController::new(
        &GateConfig {
            write_timeout_secs: 15,
        },
        recorder,
        Arc::new(ChannelEventSink::new(64)),
        Arc::new(MemoryRepository::new()),
        directory,
    ));
    gate.register(&handlers);
    (runtime, gate, handlers)
}

#[tokio::test(start_paused = true)]
async fn test_gate_response_wins_over_timeout() {
    let recorder = Arc::new(Recorder::default());
    let directory = Arc::new(MemoryDirectory::new());
    let (runtime, gate, handlers) = gate_runtime(recorder.clone(), directory.clone());

    handlers.dispatch(DeviceMessage::command(DeviceKind::Gate, "md1"));
    handlers.dispatch(event(DeviceKind::Gate, "wr0C0D;7"));
    tokio::time::sleep(Duration::from_secs(5)).await;
    handlers.dispatch(DeviceMessage::new(DeviceKind::Gate, MessageKind::Response, "ok"));
    assert!(gate.call(|g| g.status().pending).await.unwrap().is_none());
    assert_eq!(directory.employee_for("0C0D").as_deref(), Some("000001"));

    // Overwrite so a second application would be visible.
    directory.bind_card("0C0D", "777777").unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(directory.employee_for("0C0D").as_deref(), Some("777777"));
    assert_eq!(recorder.sent_to(DeviceKind::Gate), vec!["md1", "wr000001"]);

    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_gate_timeout_completes_enrollment() {
    let recorder = Arc::new(Recorder::default());
    let directory = Arc::new(MemoryDirectory::new());
    let (runtime, gate, handlers) = gate_runtime(recorder, directory.clone());

    assert!(gate.call(|g| g.set_mode(GateMode::Register)).await.unwrap());
    handlers.dispatch(event(DeviceKind::Gate, "wr0C0D;"));

    tokio::time::sleep(Duration::from_secs(14)).await;
    assert!(gate.call(|g| g.status().pending).await.unwrap().is_some());
    assert_eq!(directory.employee_for("0C0D"), None);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(gate.call(|g| g.status().pending).await.unwrap().is_none());
    assert_eq!(directory.employee_for("0C0D").as_deref(), Some("000001"));

    // A late ok is a no-op.
    directory.bind_card("0C0D", "777777").unwrap();
    handlers.dispatch(DeviceMessage::new(DeviceKind::Gate, MessageKind::Response, "ok"));
    gate.call(|_| ()).await.unwrap();
    assert_eq!(directory.employee_for("0C0D").as_deref(), Some("777777"));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_gate_access_flow() {
    let recorder = Arc::new(Recorder::default());
    let directory = Arc::new(MemoryDirectory::new().with_card("04AB", "42"));
    let (runtime, gate, handlers) = gate_runtime(recorder.clone(), directory);

    handlers.dispatch(event(DeviceKind::Gate, "id04AB;000042"));
    handlers.dispatch(event(DeviceKind::Gate, "id9999;000042"));
    gate.call(|_| ()).await.unwrap();

    assert_eq!(recorder.sent_to(DeviceKind::Gate), vec!["ac1", "ac0"]);
    runtime.shutdown().await;
}
