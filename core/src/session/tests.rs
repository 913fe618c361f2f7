use super::*;

use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};

use crate::audio::SyntheticLevelSource;
use crate::orchestrator::{
    CallHandle, RemoteSession, RemoteSessionParts, Speaker, Utterance,
};
use crate::provisioning::ProvisioningError;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct MockProvisioner {
    outcomes: StdMutex<VecDeque<Result<CallHandle, ProvisioningError>>>,
    gate: Option<Arc<Notify>>,
    entered: Arc<Notify>,
    requests: StdMutex<Vec<CallParams>>,
}

impl MockProvisioner {
    fn answering(outcomes: Vec<Result<CallHandle, ProvisioningError>>) -> Self {
        Self {
            outcomes: StdMutex::new(outcomes.into()),
            ..Self::default()
        }
    }

    fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    fn request_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

#[async_trait]
impl CallProvisioner for MockProvisioner {
    async fn provision(&self, params: &CallParams) -> Result<CallHandle, ProvisioningError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(params.clone());
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let next = self.outcomes.lock().expect("outcomes lock").pop_front();
        next.unwrap_or_else(|| Ok(CallHandle::new("https://x/y", "abc")))
    }
}

#[derive(Default)]
struct MockRemote {
    calls: StdMutex<Vec<String>>,
    join_gate: Option<Arc<Notify>>,
    join_entered: Arc<Notify>,
    mute_gate: Option<Arc<Notify>>,
    mute_entered: Arc<Notify>,
    fail_join: bool,
    fail_leave: bool,
    fail_mute: bool,
}

impl MockRemote {
    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn count(&self, name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.split(':').next() == Some(name))
            .count()
    }
}

#[async_trait]
impl RemoteSession for MockRemote {
    async fn join_call(&self, join_url: &str) -> Result<()> {
        self.record(format!("join_call:{join_url}"));
        self.join_entered.notify_one();
        if let Some(gate) = &self.join_gate {
            gate.notified().await;
        }
        if self.fail_join {
            return Err(anyhow!("media server unreachable"));
        }
        Ok(())
    }

    async fn leave_call(&self) -> Result<()> {
        self.record("leave_call".to_string());
        if self.fail_leave {
            return Err(anyhow!("socket already closed"));
        }
        Ok(())
    }

    async fn mute(&self) -> Result<()> {
        self.record("mute".to_string());
        self.mute_entered.notify_one();
        if let Some(gate) = &self.mute_gate {
            gate.notified().await;
        }
        if self.fail_mute {
            return Err(anyhow!("microphone busy"));
        }
        Ok(())
    }

    async fn unmute(&self) -> Result<()> {
        self.record("unmute".to_string());
        Ok(())
    }
}

struct MockFactory {
    remote: Arc<MockRemote>,
    events: StdMutex<Option<mpsc::Sender<RemoteSessionEvent>>>,
    created: AtomicUsize,
    fail: bool,
}

impl MockFactory {
    fn new(remote: Arc<MockRemote>) -> Self {
        Self {
            remote,
            events: StdMutex::new(None),
            created: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn sender(&self) -> mpsc::Sender<RemoteSessionEvent> {
        self.events
            .lock()
            .expect("events lock")
            .clone()
            .expect("remote session created")
    }

    fn close_events(&self) {
        self.events.lock().expect("events lock").take();
    }

    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl RemoteSessionFactory for MockFactory {
    fn create(&self) -> Result<RemoteSessionParts> {
        if self.fail {
            return Err(anyhow!("sdk not initialised"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        *self.events.lock().expect("events lock") = Some(tx);
        Ok(RemoteSessionParts {
            session: Arc::clone(&self.remote) as Arc<dyn RemoteSession>,
            events: rx,
        })
    }
}

struct Harness {
    manager: SessionLifecycleManager,
    provisioner: Arc<MockProvisioner>,
    factory: Arc<MockFactory>,
    remote: Arc<MockRemote>,
}

fn harness(provisioner: MockProvisioner, remote: MockRemote) -> Harness {
    harness_with_factory(provisioner, remote, false)
}

fn harness_with_factory(
    provisioner: MockProvisioner,
    remote: MockRemote,
    failing_factory: bool,
) -> Harness {
    let config = OrchestratorConfig::default();
    let provisioner = Arc::new(provisioner);
    let remote = Arc::new(remote);
    let mut factory = MockFactory::new(Arc::clone(&remote));
    factory.fail = failing_factory;
    let factory = Arc::new(factory);
    let source = SyntheticLevelSource::seeded(&config, 17);
    let manager = SessionLifecycleManager::with_level_source(
        config,
        Arc::clone(&provisioner) as Arc<dyn CallProvisioner>,
        Arc::clone(&factory) as Arc<dyn RemoteSessionFactory>,
        Box::new(source),
    );
    Harness {
        manager,
        provisioner,
        factory,
        remote,
    }
}

async fn wait_for_state(manager: &SessionLifecycleManager, expected: ConnectionState) {
    let mut rx = manager.subscribe_state();
    timeout(WAIT, rx.wait_for(|state| *state == expected))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {expected}"))
        .expect("state channel open");
}

async fn send(factory: &MockFactory, event: RemoteSessionEvent) {
    factory.sender().send(event).await.expect("pump listening");
}

fn params() -> CallParams {
    CallParams::with_max_duration(180)
}

#[tokio::test(start_paused = true)]
async fn connects_and_starts_timer_from_zero() {
    let h = harness(MockProvisioner::default(), MockRemote::default());
    let mut lifecycle = h.manager.subscribe_lifecycle();

    let outcome = h.manager.start(params()).await;
    assert_eq!(outcome, StartOutcome::Connected);
    assert_eq!(h.manager.duration_seconds(), 0);
    assert_eq!(h.manager.call_id().await.as_deref(), Some("abc"));
    assert_eq!(h.remote.calls(), vec!["join_call:https://x/y".to_string()]);
    assert_eq!(
        h.provisioner.requests.lock().expect("requests lock")[0].max_duration_seconds,
        180
    );

    send(&h.factory, RemoteSessionEvent::status("idle")).await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(h.manager.state(), ConnectionState::Connected);

    sleep(Duration::from_millis(2_050)).await;
    assert_eq!(h.manager.duration_seconds(), 2);

    let states: Vec<ConnectionState> = std::iter::from_fn(|| lifecycle.try_recv().ok())
        .map(|update| update.state)
        .collect();
    assert_eq!(
        states,
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
}

#[tokio::test(start_paused = true)]
async fn provider_statuses_drive_state_and_level() {
    let h = harness(MockProvisioner::default(), MockRemote::default());
    assert!(h.manager.start(params()).await.is_connected());

    send(&h.factory, RemoteSessionEvent::status("speaking")).await;
    wait_for_state(&h.manager, ConnectionState::Speaking).await;
    sleep(Duration::from_millis(2_050)).await;
    let level = h.manager.audio_level();
    assert!((0.49..=0.81).contains(&level), "speaking level {level}");

    send(&h.factory, RemoteSessionEvent::status("reconnecting")).await;
    send(&h.factory, RemoteSessionEvent::status("thinking")).await;
    wait_for_state(&h.manager, ConnectionState::Processing).await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(h.manager.audio_level(), 0.0);
}

#[tokio::test]
async fn transcript_snapshots_replace_the_log() {
    let h = harness(MockProvisioner::default(), MockRemote::default());
    assert!(h.manager.start(params()).await.is_connected());
    let mut transcripts = h.manager.subscribe_transcripts();

    send(
        &h.factory,
        RemoteSessionEvent::transcripts(vec![
            Utterance::new("Hello!", Speaker::Agent, true),
            Utterance::new("Hi", Speaker::User, true),
            Utterance::new("How can", Speaker::Agent, false),
        ]),
    )
    .await;
    timeout(WAIT, transcripts.wait_for(|log| log.len() == 3))
        .await
        .expect("transcripts delivered")
        .expect("transcript channel open");

    let log = h.manager.transcripts();
    assert!(log[0].is_agent && !log[0].is_streaming);
    assert!(!log[1].is_agent);
    assert!(log[2].is_streaming);

    send(
        &h.factory,
        RemoteSessionEvent::transcripts(vec![Utterance::new("Hello!", Speaker::Agent, true)]),
    )
    .await;
    timeout(WAIT, transcripts.wait_for(|log| log.len() == 1))
        .await
        .expect("shorter snapshot delivered")
        .expect("transcript channel open");
}

#[tokio::test(start_paused = true)]
async fn provisioning_failure_surfaces_error_then_recovers() {
    let provisioner = MockProvisioner::answering(vec![
        Err(ProvisioningError::Transport("connection refused".into())),
        Ok(CallHandle::new("https://x/z", "def")),
    ]);
    let h = harness(provisioner, MockRemote::default());

    let outcome = h.manager.start(params()).await;
    assert!(matches!(
        outcome,
        StartOutcome::Failed(SessionFailure::Provisioning(ProvisioningError::Transport(_)))
    ));
    assert_eq!(h.manager.state(), ConnectionState::Error);
    let message = h.manager.error_message().expect("error message set");
    assert!(!message.is_empty());
    assert_eq!(h.manager.call_id().await, None);
    assert_eq!(h.factory.created(), 0);

    sleep(Duration::from_millis(3_000)).await;
    assert_eq!(h.manager.duration_seconds(), 0);

    let outcome = h.manager.start(params()).await;
    assert_eq!(outcome, StartOutcome::Connected);
    assert_eq!(h.manager.state(), ConnectionState::Connected);
    assert_eq!(h.manager.error_message(), None);
    assert_eq!(h.manager.call_id().await.as_deref(), Some("def"));
    assert_eq!(h.provisioner.request_count(), 2);
}

#[tokio::test]
async fn join_failure_leaves_session_and_swallows_cleanup_error() {
    let remote = MockRemote {
        fail_join: true,
        fail_leave: true,
        ..MockRemote::default()
    };
    let h = harness(MockProvisioner::default(), remote);

    let outcome = h.manager.start(params()).await;
    assert!(matches!(
        outcome,
        StartOutcome::Failed(SessionFailure::Join { .. })
    ));
    assert_eq!(h.manager.state(), ConnectionState::Error);
    assert!(h
        .manager
        .error_message()
        .expect("error message set")
        .contains("media server unreachable"));
    assert_eq!(h.remote.count("leave_call"), 1);
    assert_eq!(h.manager.call_id().await, None);
}

#[tokio::test]
async fn session_setup_failure_is_reported() {
    let h = harness_with_factory(MockProvisioner::default(), MockRemote::default(), true);

    let outcome = h.manager.start(params()).await;
    assert!(matches!(
        outcome,
        StartOutcome::Failed(SessionFailure::SessionSetup { .. })
    ));
    assert_eq!(h.manager.state(), ConnectionState::Error);
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn repeated_stop_is_harmless_in_any_state() {
    let h = harness(MockProvisioner::default(), MockRemote::default());

    h.manager.stop().await;
    h.manager.stop().await;
    assert_eq!(h.manager.state(), ConnectionState::Idle);

    assert!(h.manager.start(params()).await.is_connected());
    h.manager.stop().await;
    h.manager.stop().await;
    h.manager.stop().await;

    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert_eq!(h.remote.count("leave_call"), 1);
    assert_eq!(h.manager.call_id().await, None);
    assert!(!h.manager.is_muted());
    assert_eq!(h.manager.error_message(), None);
}

#[tokio::test(start_paused = true)]
async fn stop_freezes_duration_and_ignores_late_events() {
    let h = harness(MockProvisioner::default(), MockRemote::default());
    assert!(h.manager.start(params()).await.is_connected());
    let events = h.factory.sender();

    sleep(Duration::from_millis(1_050)).await;
    assert_eq!(h.manager.duration_seconds(), 1);

    h.manager.stop().await;
    let _ = events.send(RemoteSessionEvent::status("speaking")).await;
    sleep(Duration::from_millis(3_000)).await;

    assert_eq!(h.manager.duration_seconds(), 1);
    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert_eq!(h.manager.audio_level(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn stop_during_provisioning_discards_the_allocation() {
    let gate = Arc::new(Notify::new());
    let h = harness(MockProvisioner::gated(Arc::clone(&gate)), MockRemote::default());
    let entered = Arc::clone(&h.provisioner.entered);

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.start(params()).await });
    entered.notified().await;
    assert_eq!(h.manager.state(), ConnectionState::Connecting);

    h.manager.stop().await;
    assert_eq!(h.manager.state(), ConnectionState::Idle);

    gate.notify_one();
    let outcome = pending.await.expect("start task joined");
    assert_eq!(outcome, StartOutcome::Superseded);

    sleep(Duration::from_millis(2_000)).await;
    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert_eq!(h.manager.duration_seconds(), 0);
    assert_eq!(h.factory.created(), 0);
    assert!(h.remote.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_during_join_never_reaches_connected() {
    let gate = Arc::new(Notify::new());
    let remote = MockRemote {
        join_gate: Some(Arc::clone(&gate)),
        ..MockRemote::default()
    };
    let h = harness(MockProvisioner::default(), remote);
    let entered = Arc::clone(&h.remote.join_entered);
    let mut lifecycle = h.manager.subscribe_lifecycle();

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.start(params()).await });
    entered.notified().await;

    h.manager.stop().await;
    assert_eq!(h.manager.state(), ConnectionState::Idle);

    gate.notify_one();
    let outcome = pending.await.expect("start task joined");
    assert_eq!(outcome, StartOutcome::Superseded);

    sleep(Duration::from_millis(2_000)).await;
    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert_eq!(h.manager.duration_seconds(), 0);
    assert!(h.remote.count("leave_call") >= 1);

    let states: Vec<ConnectionState> = std::iter::from_fn(|| lifecycle.try_recv().ok())
        .map(|update| update.state)
        .collect();
    assert!(!states.contains(&ConnectionState::Connected));
}

#[tokio::test(start_paused = true)]
async fn remote_disconnect_ends_without_leaving() {
    let h = harness(MockProvisioner::default(), MockRemote::default());
    assert!(h.manager.start(params()).await.is_connected());
    let events = h.factory.sender();

    events
        .send(RemoteSessionEvent::status("speaking"))
        .await
        .expect("pump listening");
    sleep(Duration::from_millis(2_050)).await;
    assert!(h.manager.audio_level() > 0.0);

    events
        .send(RemoteSessionEvent::status("disconnected"))
        .await
        .expect("pump listening");
    wait_for_state(&h.manager, ConnectionState::Ended).await;
    let frozen = h.manager.duration_seconds();

    let _ = events.send(RemoteSessionEvent::status("idle")).await;
    sleep(Duration::from_millis(3_000)).await;

    assert_eq!(h.manager.state(), ConnectionState::Ended);
    assert_eq!(h.manager.duration_seconds(), frozen);
    assert_eq!(h.manager.audio_level(), 0.0);
    assert_eq!(h.manager.call_id().await, None);
    assert_eq!(h.remote.count("leave_call"), 0);

    assert!(!h.manager.toggle_mute().await);
    assert_eq!(h.remote.count("mute"), 0);

    assert!(h.manager.start(params()).await.is_connected());
    assert_eq!(h.manager.duration_seconds(), 0);
}

#[tokio::test]
async fn start_while_busy_is_a_noop() {
    let h = harness(MockProvisioner::default(), MockRemote::default());
    assert!(h.manager.start(params()).await.is_connected());

    let outcome = h.manager.start(params()).await;
    assert_eq!(outcome, StartOutcome::AlreadyActive);
    assert_eq!(h.provisioner.request_count(), 1);
    assert_eq!(h.factory.created(), 1);
    assert_eq!(h.manager.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn toggle_mute_without_session_has_no_effect() {
    let h = harness(MockProvisioner::default(), MockRemote::default());

    assert!(!h.manager.toggle_mute().await);
    assert!(!h.manager.is_muted());
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn toggle_mute_flips_flag_on_open_session() {
    let h = harness(MockProvisioner::default(), MockRemote::default());
    assert!(h.manager.start(params()).await.is_connected());

    assert!(h.manager.toggle_mute().await);
    assert!(h.manager.is_muted());
    assert!(!h.manager.toggle_mute().await);
    assert!(!h.manager.is_muted());
    assert_eq!(h.remote.count("mute"), 1);
    assert_eq!(h.remote.count("unmute"), 1);

    assert!(h.manager.toggle_mute().await);
    h.manager.stop().await;
    assert!(!h.manager.is_muted());
}

#[tokio::test]
async fn failed_mute_keeps_flag() {
    let remote = MockRemote {
        fail_mute: true,
        ..MockRemote::default()
    };
    let h = harness(MockProvisioner::default(), remote);
    assert!(h.manager.start(params()).await.is_connected());

    assert!(!h.manager.toggle_mute().await);
    assert!(!h.manager.is_muted());
    assert_eq!(h.remote.count("mute"), 1);
}

#[tokio::test]
async fn stop_is_not_held_up_by_a_pending_mute() {
    let gate = Arc::new(Notify::new());
    let remote = MockRemote {
        mute_gate: Some(Arc::clone(&gate)),
        ..MockRemote::default()
    };
    let h = harness(MockProvisioner::default(), remote);
    assert!(h.manager.start(params()).await.is_connected());

    let manager = h.manager.clone();
    let toggle = tokio::spawn(async move { manager.toggle_mute().await });
    timeout(WAIT, h.remote.mute_entered.notified())
        .await
        .expect("mute requested");

    timeout(WAIT, h.manager.stop())
        .await
        .expect("stop finishes while mute is pending");
    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert_eq!(h.remote.count("leave_call"), 1);

    gate.notify_one();
    let muted = toggle.await.expect("toggle task joined");
    assert!(!muted);
    assert!(!h.manager.is_muted());
}

#[tokio::test(start_paused = true)]
async fn closed_event_stream_ends_the_call() {
    let h = harness(MockProvisioner::default(), MockRemote::default());
    assert!(h.manager.start(params()).await.is_connected());
    let mut lifecycle = h.manager.subscribe_lifecycle();

    sleep(Duration::from_millis(1_050)).await;
    assert_eq!(h.manager.duration_seconds(), 1);

    h.factory.close_events();
    wait_for_state(&h.manager, ConnectionState::Ended).await;

    sleep(Duration::from_millis(3_000)).await;
    assert_eq!(h.manager.state(), ConnectionState::Ended);
    assert_eq!(h.manager.duration_seconds(), 1);
    assert_eq!(h.manager.audio_level(), 0.0);
    assert_eq!(h.manager.call_id().await, None);
    assert_eq!(h.remote.count("leave_call"), 0);

    let update = lifecycle.try_recv().expect("ended update");
    assert_eq!(update.state, ConnectionState::Ended);
    assert!(update.detail.is_some());
}

#[tokio::test(start_paused = true)]
async fn remote_disconnect_during_join_is_superseded() {
    let gate = Arc::new(Notify::new());
    let remote = MockRemote {
        join_gate: Some(Arc::clone(&gate)),
        ..MockRemote::default()
    };
    let h = harness(MockProvisioner::default(), remote);
    let entered = Arc::clone(&h.remote.join_entered);

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.start(params()).await });
    entered.notified().await;

    send(&h.factory, RemoteSessionEvent::status("disconnected")).await;
    wait_for_state(&h.manager, ConnectionState::Ended).await;

    gate.notify_one();
    let outcome = pending.await.expect("start task joined");
    assert_eq!(outcome, StartOutcome::Superseded);

    sleep(Duration::from_millis(2_000)).await;
    assert_eq!(h.manager.state(), ConnectionState::Ended);
    assert_eq!(h.manager.duration_seconds(), 0);
    assert_eq!(h.manager.call_id().await, None);
    assert_eq!(h.remote.count("leave_call"), 1);
}
