//! End-to-end sync runs against mock endpoints.

use std::sync::Arc;
use std::time::Duration;

use negsync::proto::{tags, EngineFactory, NegFrame, SessionStatus, SyncConfig, TimeoutKind};
use negsync::store::{RecordStore, RecordStoreExt};
use negsync::{Error, OrchestratorConfig, SessionServices, SyncError, SyncOrchestrator};
use negsync_testkit::{
    init_tracing, FailingStore, ListEngine, MockRelay, RelayHub, RelayMode, Reply, ScriptStep,
    ScriptedEngine, StalledConnector, TestFixture,
};

fn services(
    hub: &Arc<RelayHub>,
    store: Arc<dyn RecordStore>,
    engines: Arc<dyn EngineFactory>,
) -> SessionServices {
    SessionServices {
        connector: hub.network(),
        store,
        records: hub.clone(),
        engines,
    }
}

fn orchestrator(
    fixture: &TestFixture,
    endpoints: &[&str],
    services: SessionServices,
) -> Arc<SyncOrchestrator> {
    let config = OrchestratorConfig {
        endpoints: endpoints.iter().map(|u| u.to_string()).collect(),
        author: Some(fixture.author.to_hex()),
        sync: SyncConfig::default(),
    };
    Arc::new(SyncOrchestrator::new(config, services).unwrap())
}

fn frame_tags(frames: &[NegFrame]) -> Vec<&'static str> {
    frames.iter().map(NegFrame::type_tag).collect()
}

/// Wait until the relay has read `expected` frames. A session returns once
/// its last frame is queued, not once the relay has consumed it.
async fn frames_settled(relay: &MockRelay, expected: usize) -> Vec<NegFrame> {
    for _ in 0..200 {
        let received = relay.received();
        if received.len() >= expected {
            return received;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    relay.received()
}

#[tokio::test]
async fn test_one_endpoint_failing_mid_run_leaves_others_untouched() {
    init_tracing();
    let fixture = TestFixture::new();
    let hub = RelayHub::new();
    let a = hub
        .start(
            "mem://a",
            vec![],
            RelayMode::Scripted(vec![Reply::Msg("a1".into()), Reply::Drop]),
        )
        .await;
    let b = hub
        .start(
            "mem://b",
            vec![],
            RelayMode::Scripted(vec![
                Reply::Msg("b1".into()),
                Reply::Msg("b2".into()),
                Reply::Msg("b3".into()),
            ]),
        )
        .await;

    let engines = ScriptedEngine::factory(
        "init",
        vec![
            ScriptStep::cont("r2"),
            ScriptStep::cont("r3"),
            ScriptStep::finish(),
        ],
    );
    let orch = orchestrator(
        &fixture,
        &["mem://a", "mem://b"],
        services(&hub, fixture.store.clone(), engines),
    );

    let report = orch.start_sync().await.unwrap();

    let ra = report.session("mem://a").unwrap();
    assert_eq!(ra.status, SessionStatus::Error);
    assert!(matches!(ra.error, Some(SyncError::Connection(_))));
    assert_eq!(ra.round_count, 1);

    let rb = report.session("mem://b").unwrap();
    assert_eq!(rb.status, SessionStatus::Complete);
    assert_eq!(rb.round_count, 3);
    assert_ne!(ra.subscription_id, rb.subscription_id);

    assert_eq!(report.progress.completed_endpoints, 2);
    assert_eq!(report.progress.error_count, 1);
    assert_eq!(report.progress.successful(), 1);
    assert_eq!(orch.progress(), report.progress);

    let state_a = orch.session_state("mem://a").unwrap();
    assert!(state_a.error.unwrap().starts_with("connection error"));
    assert!(state_a.end_time.is_some());

    assert_eq!(frame_tags(&frames_settled(&a, 2).await), vec![tags::OPEN, tags::MSG]);
    assert_eq!(
        frame_tags(&frames_settled(&b, 4).await),
        vec![tags::OPEN, tags::MSG, tags::MSG, tags::CLOSE]
    );
}

#[tokio::test]
async fn test_engine_failure_ends_only_its_session() {
    init_tracing();
    let fixture = TestFixture::new();
    let hub = RelayHub::new();
    hub.start(
        "mem://a",
        vec![],
        RelayMode::Scripted(vec![Reply::Msg("a1".into()), Reply::Msg("garbled".into())]),
    )
    .await;
    hub.start(
        "mem://b",
        vec![],
        RelayMode::Scripted(vec![Reply::Msg("b1".into()), Reply::Msg("b2".into())]),
    )
    .await;

    let engines = ScriptedEngine::poisoned_factory(
        "init",
        vec![ScriptStep::cont("r2"), ScriptStep::finish()],
        "garbled",
    );
    let orch = orchestrator(
        &fixture,
        &["mem://a", "mem://b"],
        services(&hub, fixture.store.clone(), engines),
    );

    let report = orch.start_sync().await.unwrap();

    let ra = report.session("mem://a").unwrap();
    assert_eq!(ra.status, SessionStatus::Error);
    assert!(
        matches!(ra.error, Some(SyncError::Engine(_))),
        "{:?}",
        ra.error
    );
    assert_eq!(ra.round_count, 2);
    let state_a = orch.session_state("mem://a").unwrap();
    assert_eq!(state_a.status, SessionStatus::Error);
    assert!(state_a.error.unwrap().contains("garbled"));

    let rb = report.session("mem://b").unwrap();
    assert_eq!(rb.status, SessionStatus::Complete);
    assert_eq!(rb.round_count, 2);
    assert_eq!(
        orch.session_state("mem://b").unwrap().status,
        SessionStatus::Complete
    );

    assert_eq!(report.progress.completed_endpoints, 2);
    assert_eq!(report.progress.error_count, 1);
}

#[tokio::test]
async fn test_upload_only_round_completes_with_close() {
    let fixture = TestFixture::new();
    let id1 = fixture.make_token(1);
    let id2 = fixture.make_token(2);
    fixture.seed(&[id1.clone(), id2.clone()]).await;

    let hub = RelayHub::new();
    let relay = hub
        .start(
            "mem://relay",
            vec![],
            RelayMode::Scripted(vec![Reply::Msg("done".into())]),
        )
        .await;
    let engines = ScriptedEngine::factory("init", vec![ScriptStep::finish().have([id1.id])]);
    let orch = orchestrator(
        &fixture,
        &["mem://relay"],
        services(&hub, fixture.store.clone(), engines.clone()),
    );

    let report = orch.start_sync().await.unwrap();
    assert!(report.is_success());

    assert!(relay.has(&id1.id));
    assert!(!relay.has(&id2.id));
    assert_eq!(engines.calls(), 1);

    let received = frames_settled(&relay, 2).await;
    assert_eq!(frame_tags(&received), vec![tags::OPEN, tags::CLOSE]);
    match &received[0] {
        NegFrame::Open { filter, message, .. } => {
            assert_eq!(message.as_str(), "init");
            assert_eq!(filter, &fixture.filters().combined());
        }
        other => panic!("expected OPEN, got {other:?}"),
    }

    let state = orch.session_state("mem://relay").unwrap();
    assert_eq!(state.status, SessionStatus::Complete);
    assert_eq!((state.have_count, state.need_count), (1, 0));
    assert_eq!(state.message, "Sync complete: 1 uploaded, 0 downloaded");
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_forces_error_and_closes() {
    let fixture = TestFixture::new();
    let hub = RelayHub::new();
    let relay = hub
        .start("mem://silent", vec![], RelayMode::Scripted(vec![]))
        .await;
    let engines = ScriptedEngine::factory("init", vec![]);
    let orch = orchestrator(
        &fixture,
        &["mem://silent"],
        services(&hub, fixture.store.clone(), engines),
    );

    let started = tokio::time::Instant::now();
    let report = orch.start_sync().await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(120));

    let session = &report.sessions[0];
    assert!(matches!(
        session.error,
        Some(SyncError::Timeout {
            kind: TimeoutKind::Sync,
            ..
        })
    ));
    let state = orch.session_state("mem://silent").unwrap();
    assert_eq!(state.status, SessionStatus::Error);
    assert!(state.error.unwrap().contains("timed out"));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(frame_tags(&frames_settled(&relay, 1).await), vec![tags::OPEN]);
}

#[tokio::test(start_paused = true)]
async fn test_start_sync_while_running_is_refused() {
    let fixture = TestFixture::new();
    let hub = RelayHub::new();
    let relay = hub
        .start("mem://silent", vec![], RelayMode::Scripted(vec![]))
        .await;
    let orch = orchestrator(
        &fixture,
        &["mem://silent"],
        services(
            &hub,
            fixture.store.clone(),
            ScriptedEngine::factory("init", vec![]),
        ),
    );

    let first = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.start_sync().await }
    });
    while !orch.is_running() {
        tokio::task::yield_now().await;
    }

    assert!(matches!(orch.start_sync().await, Err(Error::AlreadyRunning)));
    assert!(matches!(orch.sync_one("mem://silent").await, Err(Error::AlreadyRunning)));
    assert!(matches!(orch.clear_states(), Err(Error::AlreadyRunning)));

    let report = first.await.unwrap().unwrap();
    assert_eq!(report.sessions.len(), 1);
    assert_eq!(relay.connections(), 1);
    assert!(!orch.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_foreign_subscription_never_reaches_engine() {
    let fixture = TestFixture::new();
    let hub = RelayHub::new();
    hub.start(
        "mem://relay",
        vec![],
        RelayMode::Scripted(vec![Reply::WrongSub("stray".into())]),
    )
    .await;
    let engines = ScriptedEngine::factory("init", vec![ScriptStep::finish()]);
    let orch = orchestrator(
        &fixture,
        &["mem://relay"],
        services(&hub, fixture.store.clone(), engines.clone()),
    );

    let report = orch.start_sync().await.unwrap();
    assert_eq!(engines.created(), 1);
    assert_eq!(engines.calls(), 0);
    assert_eq!(report.sessions[0].round_count, 0);
    assert!(matches!(
        report.sessions[0].error,
        Some(SyncError::Timeout { .. })
    ));
}

#[tokio::test]
async fn test_peer_error_reason_is_kept_verbatim() {
    let fixture = TestFixture::new();
    let hub = RelayHub::new();
    hub.start(
        "mem://relay",
        vec![],
        RelayMode::Scripted(vec![Reply::Err("blocked: negentropy disabled".into())]),
    )
    .await;
    let orch = orchestrator(
        &fixture,
        &["mem://relay"],
        services(&hub, fixture.store.clone(), ListEngine::factory()),
    );

    let report = orch.start_sync().await.unwrap();
    assert!(matches!(
        &report.sessions[0].error,
        Some(SyncError::Protocol(reason)) if reason == "blocked: negentropy disabled"
    ));
    assert_eq!(
        orch.session_state("mem://relay").unwrap().message,
        "Error: peer error: blocked: negentropy disabled"
    );
}

#[tokio::test]
async fn test_full_exchange_moves_only_missing_records() {
    init_tracing();
    let fixture = TestFixture::new();
    let stranger = TestFixture::with_seed([9; 32]);

    let shared = fixture.make_tokens(0, 150);
    let ours = fixture.make_token(500);
    let theirs = fixture.make_record(negsync::core::kinds::HISTORY, 600, "spent");
    let foreign = stranger.make_token(700);
    let off_filter = fixture.make_record(1, 800, "note");

    let mut local = shared.clone();
    local.push(ours.clone());
    local.push(off_filter.clone());
    fixture.seed(&local).await;

    let mut remote = shared.clone();
    remote.extend([theirs.clone(), foreign.clone()]);

    let hub = RelayHub::new();
    let a = hub
        .start("mem://a", remote.clone(), RelayMode::Responder)
        .await;
    let b = hub.start("mem://b", remote, RelayMode::Responder).await;

    let config = OrchestratorConfig {
        endpoints: vec!["mem://a".into(), "mem://b".into()],
        author: Some(fixture.author.to_hex()),
        sync: SyncConfig {
            // Sixty ids per frame: three rounds per session.
            frame_size_limit: 4_096,
            ..SyncConfig::default()
        },
    };
    let orch = SyncOrchestrator::new(
        config,
        services(&hub, fixture.store.clone(), ListEngine::factory()),
    )
    .unwrap();

    let report = orch.start_sync().await.unwrap();
    assert!(report.is_success(), "{:?}", report.failed().collect::<Vec<_>>());

    for (relay, session) in [(&a, &report.sessions[0]), (&b, &report.sessions[1])] {
        assert_eq!(session.url, relay.url());
        assert_eq!(session.have, vec![ours.id]);
        assert_eq!(session.need, vec![theirs.id]);
        assert_eq!(session.round_count, 3);
        assert!(relay.has(&ours.id));
        assert!(!relay.has(&off_filter.id));
    }

    assert!(fixture.store.has_record(&theirs.id).await.unwrap());
    assert!(!fixture.store.has_record(&foreign.id).await.unwrap());
    assert_eq!(report.progress.total_have, 2);
    assert_eq!(report.progress.total_need, 2);
    assert_eq!(report.progress.percent(), 100);

    // A second run finds nothing left to move.
    let again = orch.start_sync().await.unwrap();
    assert!(again.sessions.iter().all(|s| s.have.is_empty() && s.need.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_fetch_is_soft() {
    let fixture = TestFixture::new();
    let theirs = fixture.make_token(42);
    let hub = RelayHub::new();
    let relay = hub
        .start("mem://relay", vec![theirs.clone()], RelayMode::Responder)
        .await;
    relay.stall_fetch();

    let orch = orchestrator(
        &fixture,
        &["mem://relay"],
        services(&hub, fixture.store.clone(), ListEngine::factory()),
    );

    let started = tokio::time::Instant::now();
    let report = orch.start_sync().await.unwrap();
    let elapsed = started.elapsed();

    assert!(report.is_success());
    assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(120));
    assert!(fixture.store.has_record(&theirs.id).await.unwrap());
    let state = orch.session_state("mem://relay").unwrap();
    assert_eq!(state.need_count, 1);
    assert_eq!(state.total_processed, 1);
}

#[tokio::test]
async fn test_publish_failure_is_skipped() {
    let fixture = TestFixture::new();
    let ours = fixture.make_tokens(0, 3);
    fixture.seed(&ours).await;

    let hub = RelayHub::new();
    let relay = hub
        .start("mem://relay", vec![], RelayMode::Responder)
        .await;
    relay.reject_publish();

    let orch = orchestrator(
        &fixture,
        &["mem://relay"],
        services(&hub, fixture.store.clone(), ListEngine::factory()),
    );

    let report = orch.start_sync().await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.sessions[0].have.len(), 3);
    assert!(relay.ids().is_empty());
    assert_eq!(
        orch.session_state("mem://relay").unwrap().total_processed,
        3
    );
}

#[tokio::test]
async fn test_failed_filter_component_is_skipped() {
    let fixture = TestFixture::new();
    let token = fixture.make_token(1);
    let deletion = fixture.make_deletion(2, &token);
    let store = Arc::new(
        FailingStore::new([token.clone(), deletion.clone()])
            .fail_kinds([negsync::core::kinds::DELETION]),
    );
    assert_eq!(store.fetch_local_records(&fixture.filters()).await.len(), 1);

    let hub = RelayHub::new();
    let relay = hub
        .start("mem://relay", vec![], RelayMode::Responder)
        .await;
    let orch = orchestrator(
        &fixture,
        &["mem://relay"],
        services(&hub, store, ListEngine::factory()),
    );

    let report = orch.start_sync().await.unwrap();
    assert_eq!(report.sessions[0].have, vec![token.id]);
    assert!(relay.has(&token.id));
    assert!(!relay.has(&deletion.id));
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    let fixture = TestFixture::new();
    let hub = RelayHub::new();
    let services = SessionServices {
        connector: Arc::new(StalledConnector),
        ..services(&hub, fixture.store.clone(), ListEngine::factory())
    };
    let orch = orchestrator(&fixture, &["wss://unreachable"], services);

    let report = orch.start_sync().await.unwrap();
    assert!(matches!(
        report.sessions[0].error,
        Some(SyncError::Timeout {
            kind: TimeoutKind::Connect,
            after,
        }) if after == Duration::from_secs(10)
    ));
    assert_eq!(report.progress.error_count, 1);
}

#[tokio::test]
async fn test_sync_one_and_progress_watch() {
    let fixture = TestFixture::new();
    fixture.seed(&fixture.make_tokens(0, 2)).await;
    let hub = RelayHub::new();
    let extra = hub
        .start("mem://extra", vec![], RelayMode::Responder)
        .await;
    let orch = orchestrator(
        &fixture,
        &["mem://configured"],
        services(&hub, fixture.store.clone(), ListEngine::factory()),
    );

    let mut progress = orch.subscribe_progress();
    let mut state = orch.subscribe("mem://extra");

    let report = orch.sync_one("mem://extra").await.unwrap();
    assert_eq!(report.sessions.len(), 1);
    assert_eq!(extra.ids().len(), 2);

    assert!(progress.has_changed().unwrap());
    let seen = progress.borrow_and_update().clone();
    assert_eq!((seen.total_endpoints, seen.completed_endpoints), (1, 1));
    assert!(seen.end_time.is_some());

    assert!(state.has_changed().unwrap());
    assert_eq!(state.borrow_and_update().status, SessionStatus::Complete);
    assert!(orch.session_state("mem://configured").is_none());
}
