#![allow(clippy::unwrap_used)]
// Session-level tests for `Orchestrator` against the scripted fake firmware.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use openair_api::fake::{FakeEntity, FakeEntityKind, FakeFirmware, RecordedCommand};
use openair_core::{
    ConnectionState, CoreError, Credential, DeviceEndpoint, EntityKey, EntityKind, FanUpdate,
    Generation, Hub, Orchestrator, ReconnectConfig, SessionConfig, SessionEvent, StateFields,
    VersionCache,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn endpoint() -> DeviceEndpoint {
    DeviceEndpoint::with_default_port(
        "openair.local",
        Credential::EncryptionKey(SecretString::from("a2V5".to_string())),
    )
}

fn entities() -> Vec<FakeEntity> {
    vec![
        FakeEntity::new(1, "Ventilation Fan", FakeEntityKind::Fan),
        FakeEntity::new(2, "CO2", FakeEntityKind::Sensor),
        FakeEntity::new(3, "CO2 Sensor 2", FakeEntityKind::Sensor),
        FakeEntity::new(4, "Humidity Sensor 2", FakeEntityKind::Sensor),
        FakeEntity::new(5, "Bypass Valve", FakeEntityKind::Valve),
        FakeEntity::new(6, "Filter Reset", FakeEntityKind::Button),
    ]
}

fn setup_with(fw: &FakeFirmware, config: SessionConfig) -> (Orchestrator, Arc<VersionCache>) {
    init_tracing();
    let versions = Arc::new(VersionCache::new());
    let orch = Orchestrator::new(config, Arc::new(fw.clone()), Arc::clone(&versions));
    (orch, versions)
}

fn setup(fw: &FakeFirmware) -> (Orchestrator, Arc<VersionCache>) {
    setup_with(fw, SessionConfig::new(endpoint()))
}

/// Wait (in paused time) for the first event matching `pred`.
async fn wait_for(
    rx: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(3600), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .unwrap()
}

fn is_connected(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::Connected { .. })
}

// ── Generation selection ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn legacy_only_device_falls_back_and_is_cached() {
    let fw = FakeFirmware::new().legacy_only().with_entities(entities());
    let (orch, versions) = setup(&fw);

    assert_ok!(orch.connect().await);
    assert_eq!(orch.generation(), Some(Generation::Legacy));
    assert_eq!(
        fw.connect_attempts(),
        vec![Generation::Modern, Generation::Legacy]
    );
    assert_eq!(versions.get(&endpoint().identity()), Some(Generation::Legacy));

    orch.disconnect().await;
    assert_ok!(orch.connect().await);
    assert_eq!(
        fw.connect_attempts(),
        vec![Generation::Modern, Generation::Legacy, Generation::Legacy]
    );
}

#[tokio::test(start_paused = true)]
async fn clearing_the_cache_probes_again() {
    let fw = FakeFirmware::new().legacy_only();
    let (orch, versions) = setup(&fw);

    assert_ok!(orch.connect().await);
    versions.clear();
    assert_ok!(orch.connect().await);
    assert_eq!(
        fw.connect_attempts(),
        vec![
            Generation::Modern,
            Generation::Legacy,
            Generation::Modern,
            Generation::Legacy
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn modern_device_is_tried_first() {
    let fw = FakeFirmware::new().with_entities(entities());
    let (orch, _) = setup(&fw);

    assert_ok!(orch.connect().await);
    assert_eq!(orch.generation(), Some(Generation::Modern));
    assert_eq!(fw.connect_attempts(), vec![Generation::Modern]);
    assert_eq!(orch.device_info().unwrap().firmware_version, "2024.6.1");
}

#[tokio::test(start_paused = true)]
async fn password_endpoint_never_handshakes_modern() {
    let fw = FakeFirmware::new();
    let config = SessionConfig::new(DeviceEndpoint::with_default_port(
        "openair.local",
        Credential::Password(SecretString::from("hunter2".to_string())),
    ));
    let (orch, _) = setup_with(&fw, config);

    assert_ok!(orch.connect().await);
    assert_eq!(fw.connect_attempts(), vec![Generation::Legacy]);
}

#[tokio::test(start_paused = true)]
async fn unavailable_client_triggers_fallback() {
    let fw = FakeFirmware::new();
    fw.set_available(Generation::Modern, false);
    let (orch, _) = setup(&fw);

    assert_ok!(orch.connect().await);
    assert_eq!(orch.generation(), Some(Generation::Legacy));
    assert_eq!(fw.connect_attempts(), vec![Generation::Legacy]);
}

#[tokio::test(start_paused = true)]
async fn exhausted_generations_report_last_cause() {
    let fw = FakeFirmware::new();
    fw.set_accepts(Generation::Modern, false);
    fw.set_reject_auth(true);
    let (orch, versions) = setup(&fw);

    let err = assert_err!(orch.connect().await);
    let CoreError::ConnectionFailed { endpoint, source } = err else {
        panic!("expected ConnectionFailed");
    };
    assert_eq!(endpoint, "openair.local:6053");
    assert!(source.is_auth(), "last cause should be the legacy auth failure");
    assert!(versions.is_empty());
    assert_eq!(
        *orch.connection_state().borrow(),
        ConnectionState::Disconnected
    );
}

#[tokio::test(start_paused = true)]
async fn slow_handshake_times_out_per_generation() {
    let fw = FakeFirmware::new().with_handshake_delay(Duration::from_secs(30));
    let (orch, _) = setup(&fw);

    let started = Instant::now();
    let err = assert_err!(orch.connect().await);
    assert!(matches!(
        err,
        CoreError::ConnectionFailed {
            source: openair_api::Error::Timeout { .. },
            ..
        }
    ));
    // 10 s per generation.
    assert_eq!(started.elapsed(), Duration::from_secs(20));
}

// ── Discovery ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn initial_burst_is_announced_before_connected() {
    let fw = FakeFirmware::new().with_entities(entities());
    let (orch, _) = setup(&fw);
    let mut events = orch.events();

    assert_ok!(orch.connect().await);

    let mut discovered = Vec::new();
    loop {
        match events.try_recv().unwrap() {
            SessionEvent::EntityDiscovered(e) => discovered.push(e.key.0),
            SessionEvent::Connected { generation, device } => {
                assert_eq!(generation, Generation::Modern);
                assert_eq!(device.name, "open-air-mini");
                break;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(discovered, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(*orch.connection_state().borrow(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn snapshot_queries_and_capabilities() {
    let fw = FakeFirmware::new().with_entities(entities());
    let (orch, _) = setup(&fw);
    assert_ok!(orch.connect().await);

    assert_eq!(orch.entities().len(), 6);
    assert_eq!(orch.entities_by_kind(EntityKind::Sensor).len(), 3);
    assert_eq!(orch.find_entity("bypass").unwrap().key, EntityKey(5));
    assert_eq!(orch.entity(EntityKey(1)).unwrap().kind, EntityKind::Fan);
    assert!(orch.entity(EntityKey(77)).is_none());

    let capabilities: Vec<String> = orch
        .entities_by_kind(EntityKind::Sensor)
        .iter()
        .filter_map(|e| e.capability_id())
        .collect();
    assert_eq!(
        capabilities,
        vec!["measure_co2", "measure_co2.2", "measure_humidity.2"]
    );
}

#[tokio::test(start_paused = true)]
async fn state_pushes_are_forwarded() {
    let fw = FakeFirmware::new().legacy_only().with_entities(entities());
    let (orch, _) = setup(&fw);
    assert_ok!(orch.connect().await);
    let mut events = orch.events();

    fw.push_sensor_state(3, 640.0, None);
    let SessionEvent::StateChanged(state) =
        wait_for(&mut events, |e| matches!(e, SessionEvent::StateChanged(_))).await
    else {
        unreachable!()
    };
    assert_eq!(state.entity.name, "CO2 Sensor 2");
    assert_eq!(state.entity.capability_id().as_deref(), Some("measure_co2.2"));
    assert_eq!(state.sensor_value(), Some(640.0));
}

#[tokio::test(start_paused = true)]
async fn event_stream_mirrors_broadcast() {
    use tokio_stream::StreamExt;

    let fw = FakeFirmware::new().with_entities(entities());
    let (orch, _) = setup(&fw);
    assert_ok!(orch.connect().await);
    let mut stream = Box::pin(orch.event_stream());

    fw.push_fan_state(1, true, 7);
    let Some(SessionEvent::StateChanged(state)) = stream.next().await else {
        panic!("expected state");
    };
    assert_eq!(
        state.fields,
        StateFields::Fan {
            on: true,
            speed_level: Some(7)
        }
    );
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn rapid_writes_run_in_order_and_failures_stay_local() {
    let fw = FakeFirmware::new()
        .with_entities(entities())
        .with_command_delay(Duration::from_millis(25));
    fw.fail_command(3);
    let (orch, _) = setup(&fw);
    assert_ok!(orch.connect().await);

    let results = join_all((1..=5).map(|level| {
        let orch = orch.clone();
        async move { orch.set_fan_state(EntityKey(1), FanUpdate::speed(level)).await }
    }))
    .await;

    let outcomes: Vec<bool> = results.iter().map(Result::is_ok).collect();
    assert_eq!(outcomes, vec![true, true, false, true, true]);
    assert!(matches!(results[2], Err(CoreError::Rejected { .. })));

    let speeds: Vec<Option<i32>> = fw
        .commands()
        .into_iter()
        .map(|c| match c {
            RecordedCommand::Fan { speed_level, .. } => speed_level,
            other => panic!("unexpected command {other:?}"),
        })
        .collect();
    assert_eq!(speeds, vec![Some(1), Some(2), Some(3), Some(4), Some(5)]);
    assert_eq!(fw.max_concurrent_commands(), 1);
}

#[tokio::test(start_paused = true)]
async fn burst_of_debounced_writes_sends_only_the_last() {
    let fw = FakeFirmware::new().with_entities(entities());
    let (orch, _) = setup(&fw);
    assert_ok!(orch.connect().await);

    for level in 1..=5 {
        orch.set_fan_state_debounced(EntityKey(1), FanUpdate::speed(level));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(
        fw.commands(),
        vec![RecordedCommand::Fan {
            generation: Generation::Modern,
            key: 1,
            on: None,
            speed_level: Some(5),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_debounced_write_surfaces_as_error_event() {
    let fw = FakeFirmware::new().with_entities(entities());
    fw.fail_command(1);
    let (orch, _) = setup(&fw);
    assert_ok!(orch.connect().await);
    let mut events = orch.events();

    orch.set_valve_position_debounced(EntityKey(5), 0.25);
    let event = wait_for(&mut events, |e| matches!(e, SessionEvent::Error { .. })).await;
    let SessionEvent::Error { message } = event else {
        unreachable!()
    };
    assert!(message.contains("rejected"), "got {message}");
}

#[tokio::test(start_paused = true)]
async fn valve_and_button_passthroughs() {
    let fw = FakeFirmware::new().legacy_only().with_entities(entities());
    let (orch, _) = setup(&fw);
    assert_ok!(orch.connect().await);

    assert_ok!(orch.set_valve_position(EntityKey(5), 0.75).await);
    assert_ok!(orch.stop_valve(EntityKey(5)).await);
    assert_ok!(orch.press_button(EntityKey(6)).await);
    assert!(matches!(
        orch.press_button(EntityKey(5)).await,
        Err(CoreError::EntityNotFound {
            kind: EntityKind::Button,
            ..
        })
    ));

    assert_eq!(
        fw.commands(),
        vec![
            RecordedCommand::Valve {
                generation: Generation::Legacy,
                key: 5,
                position: Some(0.75),
                stop: false,
            },
            RecordedCommand::Valve {
                generation: Generation::Legacy,
                key: 5,
                position: None,
                stop: true,
            },
            RecordedCommand::Button {
                generation: Generation::Legacy,
                key: 6,
            },
        ]
    );
}

// ── Reconnection ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn drop_reconnects_with_a_fresh_registry() {
    let fw = FakeFirmware::new().with_entities(entities());
    let (orch, _) = setup(&fw);
    assert_ok!(orch.connect().await);
    let mut events = orch.events();
    let first = orch.registry();

    let dropped_at = Instant::now();
    fw.drop_connection("wifi lost");
    let SessionEvent::Disconnected { reason } =
        wait_for(&mut events, |e| matches!(e, SessionEvent::Disconnected { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(reason.as_deref(), Some("wifi lost"));
    assert!(orch.entities().is_empty());

    wait_for(&mut events, is_connected).await;
    // First retry after 5 s, plus the settle window.
    assert_eq!(dropped_at.elapsed(), Duration::from_millis(5500));

    let second = orch.registry();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_ne!(first.session_id(), second.session_id());
    assert_eq!(second.len(), 6);
    assert_eq!(
        fw.connect_attempts(),
        vec![Generation::Modern, Generation::Modern]
    );
    assert_ok!(orch.set_fan_state(EntityKey(1), FanUpdate::power(false)).await);
}

#[tokio::test(start_paused = true)]
async fn retries_back_off_exponentially() {
    let fw = FakeFirmware::new().with_entities(entities());
    let (orch, _) = setup(&fw);
    assert_ok!(orch.connect().await);
    let mut events = orch.events();
    let mut states = orch.connection_state();

    fw.refuse_next_connects(3);
    let dropped_at = Instant::now();
    fw.drop_connection("power loss");

    states
        .wait_for(|s| *s == ConnectionState::Reconnecting { attempt: 1 })
        .await
        .unwrap();
    wait_for(&mut events, is_connected).await;
    // 5 + 10 + 20 + 40 s of backoff, then the settle window.
    assert_eq!(dropped_at.elapsed(), Duration::from_millis(75_500));
    assert_eq!(fw.connect_attempts().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn gives_up_once_after_the_budget() {
    let config = SessionConfig {
        reconnect: ReconnectConfig {
            max_attempts: 3,
            ..ReconnectConfig::default()
        },
        ..SessionConfig::new(endpoint())
    };
    let fw = FakeFirmware::new().with_entities(entities());
    let (orch, _) = setup_with(&fw, config);
    assert_ok!(orch.connect().await);
    let mut events = orch.events();

    fw.refuse_next_connects(100);
    fw.drop_connection("gone");
    tokio::time::sleep(Duration::from_secs(3600)).await;

    let mut failed = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::ReconnectFailed { .. }) {
            failed += 1;
        }
    }
    assert_eq!(failed, 1);
    // Initial connect plus three retries.
    assert_eq!(fw.connect_attempts().len(), 4);
    assert_eq!(*orch.connection_state().borrow(), ConnectionState::Failed);

    // A caller-initiated connect starts over.
    fw.refuse_next_connects(0);
    assert_ok!(orch.connect().await);
    assert_eq!(*orch.connection_state().borrow(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_a_scheduled_reconnect() {
    let fw = FakeFirmware::new().with_entities(entities());
    let (orch, _) = setup(&fw);
    assert_ok!(orch.connect().await);
    let mut events = orch.events();

    fw.drop_connection("flaky");
    wait_for(&mut events, |e| matches!(e, SessionEvent::Disconnected { .. })).await;
    orch.disconnect().await;
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(fw.connect_attempts().len(), 1);
    assert!(events.try_recv().is_err());
    assert_eq!(
        *orch.connection_state().borrow(),
        ConnectionState::Disconnected
    );
}

#[tokio::test(start_paused = true)]
async fn disconnect_supersedes_an_attempt_in_flight() {
    let fw = FakeFirmware::new().with_handshake_delay(Duration::from_secs(5));
    let (orch, versions) = setup(&fw);

    let connecting = tokio::spawn({
        let orch = orch.clone();
        async move { orch.connect().await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    orch.disconnect().await;

    let result = connecting.await.unwrap();
    assert!(matches!(result, Err(CoreError::Superseded)), "got {result:?}");
    assert!(!orch.is_connected());
    assert!(versions.is_empty());
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_a_reconnect_closes_its_transport() {
    let fw = FakeFirmware::new().with_entities(entities());
    let (orch, _) = setup(&fw);
    assert_ok!(orch.connect().await);
    let mut events = orch.events();

    fw.drop_connection("blip");
    wait_for(&mut events, |e| matches!(e, SessionEvent::Disconnected { .. })).await;
    // Retry fires at 5 s; the handshake is done and the settle window open.
    tokio::time::sleep(Duration::from_millis(5200)).await;
    assert_eq!(
        *orch.connection_state().borrow(),
        ConnectionState::Connecting
    );
    assert!(fw.is_linked());

    orch.disconnect().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(!fw.is_linked());
    assert_eq!(fw.connect_attempts().len(), 2);
    assert!(!orch.is_connected());
    assert_eq!(
        *orch.connection_state().borrow(),
        ConnectionState::Disconnected
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn dropped_orchestrator_stops_retrying() {
    let fw = FakeFirmware::new().with_entities(entities());
    let (orch, _) = setup(&fw);
    assert_ok!(orch.connect().await);
    let mut events = orch.events();

    fw.refuse_next_connects(100);
    fw.drop_connection("gone");
    wait_for(&mut events, |e| matches!(e, SessionEvent::Disconnected { .. })).await;
    drop(orch);
    tokio::time::sleep(Duration::from_secs(3600)).await;

    // Only the initial connect: the pending retry found nothing to drive.
    assert_eq!(fw.connect_attempts().len(), 1);
}

// ── Probe & hub ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_connection_keeps_no_session() {
    let fw = FakeFirmware::new().legacy_only().with_entities(entities());
    let versions = Arc::new(VersionCache::new());

    let report = Orchestrator::test_connection(
        SessionConfig::new(endpoint()),
        Arc::new(fw.clone()),
        Arc::clone(&versions),
    )
    .await
    .unwrap();

    assert_eq!(report.generation, Generation::Legacy);
    assert_eq!(report.device.model.as_deref(), Some("Open AIR Mini"));
    assert_eq!(report.entities.len(), 6);
    assert!(!fw.is_linked());
    assert_eq!(versions.get(&endpoint().identity()), Some(Generation::Legacy));
}

#[tokio::test(start_paused = true)]
async fn hub_shares_the_version_cache() {
    init_tracing();
    let fw = FakeFirmware::new().legacy_only().with_entities(entities());
    let hub = Hub::new(Arc::new(fw.clone()));

    let first = hub.attach("unit-a", SessionConfig::new(endpoint())).await;
    assert_ok!(first.connect().await);
    assert!(hub.detach("unit-a").await);
    assert!(!hub.detach("unit-a").await);
    assert!(matches!(first.connect().await, Err(CoreError::Destroyed)));

    let second = hub.attach("unit-b", SessionConfig::new(endpoint())).await;
    assert_ok!(second.connect().await);
    assert_eq!(
        fw.connect_attempts(),
        vec![Generation::Modern, Generation::Legacy, Generation::Legacy]
    );
    assert_eq!(hub.device_ids(), vec!["unit-b".to_string()]);

    hub.shutdown().await;
    assert!(hub.get("unit-b").is_none());
    assert!(!fw.is_linked());
}
