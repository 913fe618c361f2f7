//! 通话会话生命周期管理。
//!
//! 每次 `start()` 分配一个递增的尝试 ID；`stop()`、失败或远端挂断都会让当前尝试失效，
//! 之后到达的分配结果、入会结果和远端事件一律丢弃。

pub mod error;
pub mod lifecycle;
pub mod state;
pub mod transcript;

#[cfg(test)]
mod tests;

pub use error::SessionFailure;
pub use lifecycle::{ConnectionState, SessionLifecycleUpdate};
pub use state::ConnectionStateMachine;
pub use transcript::TranscriptAggregator;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::audio::{AudioLevelEstimator, LevelSource};
use crate::orchestrator::runtime::util::duration_to_ms;
use crate::orchestrator::{
    ActiveCall, CallParams, CallProvisioner, DurationTimer, OrchestratorConfig,
    RemoteSessionEvent, RemoteSessionFactory, TranscriptEntry,
};
use crate::telemetry::events::{
    record_attempt_failed, record_call_provisioned, record_cleanup_failure,
};

const TARGET: &str = "session_manager";

/// `start()` 的结果；失败细节同时体现在状态与错误信息上。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Connected,
    /// A call was already connecting or in progress; nothing changed.
    AlreadyActive,
    /// The attempt was retired by `stop()` or a remote hang-up before it finished.
    Superseded,
    Failed(SessionFailure),
}

impl StartOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, StartOutcome::Connected)
    }
}

struct SessionSlot {
    active: Option<ActiveCall>,
    timer: DurationTimer,
    level: AudioLevelEstimator,
}

struct ManagerInner {
    provisioner: Arc<dyn CallProvisioner>,
    factory: Arc<dyn RemoteSessionFactory>,
    machine: ConnectionStateMachine,
    aggregator: TranscriptAggregator,
    attempt: AtomicU64,
    slot: Mutex<SessionSlot>,
    transcripts_tx: watch::Sender<Vec<TranscriptEntry>>,
    error_tx: watch::Sender<Option<String>>,
    muted_tx: watch::Sender<bool>,
    duration_rx: watch::Receiver<u64>,
    level_rx: watch::Receiver<f32>,
}

impl ManagerInner {
    fn is_current(&self, attempt: u64) -> bool {
        self.attempt.load(Ordering::SeqCst) == attempt
    }

    /// Invalidates `attempt`; returns `false` when it was already stale.
    fn retire(&self, attempt: u64) -> bool {
        self.attempt
            .compare_exchange(attempt, attempt + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    async fn fail_attempt(&self, attempt: u64, failure: SessionFailure) -> StartOutcome {
        let released = {
            let mut slot = self.slot.lock().await;
            if !self.retire(attempt) {
                debug!(target: TARGET, attempt, %failure, "discarding failure of retired attempt");
                return StartOutcome::Superseded;
            }

            slot.timer.stop();
            slot.level.stop();
            let released = slot.active.take();

            let message = failure.to_string();
            record_attempt_failed(attempt, failure.stage(), &message);
            self.error_tx.send_replace(Some(message.clone()));
            self.muted_tx.send_replace(false);
            self.machine
                .transition(attempt, ConnectionState::Error, Some(message));
            released
        };

        self.release_call(attempt, released).await;
        StartOutcome::Failed(failure)
    }

    async fn release_call(&self, attempt: u64, released: Option<ActiveCall>) {
        let Some(active) = released else {
            return;
        };
        let session = active.session();
        let call_id = active.call().call_id.clone();
        drop(active);

        match session.leave_call().await {
            Ok(()) => info!(target: TARGET, attempt, call_id = %call_id, "left call"),
            Err(err) => record_cleanup_failure(attempt, "leave_call", &format!("{err:#}")),
        }
    }

    /// Remote hang-up: the handle is released without `leave_call` and the timer keeps its value.
    fn end_remotely(&self, attempt: u64, slot: &mut SessionSlot) {
        self.retire(attempt);
        slot.timer.stop();
        slot.level.stop();
        if let Some(mut active) = slot.active.take() {
            active.detach_pump();
            info!(
                target: TARGET,
                attempt,
                call_id = %active.call().call_id,
                elapsed = slot.timer.elapsed_seconds(),
                "call ended by remote"
            );
        }
        self.muted_tx.send_replace(false);
    }
}

async fn pump_events(
    inner: Weak<ManagerInner>,
    attempt: u64,
    mut events: mpsc::Receiver<RemoteSessionEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut slot = inner.slot.lock().await;
        if !inner.is_current(attempt) {
            debug!(target: TARGET, attempt, "dropping event for retired attempt");
            return;
        }

        match event {
            RemoteSessionEvent::StatusChanged { provider_status } => {
                let state = inner.machine.apply(attempt, &provider_status);
                if state == ConnectionState::Ended {
                    inner.end_remotely(attempt, &mut slot);
                    return;
                }
            }
            RemoteSessionEvent::TranscriptsChanged { utterances } => {
                let entries = inner.aggregator.on_snapshot(&utterances);
                inner.transcripts_tx.send_replace(entries);
            }
        }
    }

    // The remote dropped its event stream without a final status.
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut slot = inner.slot.lock().await;
    if inner.is_current(attempt) {
        warn!(target: TARGET, attempt, "remote event stream closed; ending call");
        inner.machine.transition(
            attempt,
            ConnectionState::Ended,
            Some("remote event stream closed".to_string()),
        );
        inner.end_remotely(attempt, &mut slot);
    }
}

/// 对 UI 暴露的通话会话管理器，可廉价克隆并在任务间共享。
#[derive(Clone)]
pub struct SessionLifecycleManager {
    inner: Arc<ManagerInner>,
}

impl SessionLifecycleManager {
    pub fn new(
        config: OrchestratorConfig,
        provisioner: Arc<dyn CallProvisioner>,
        factory: Arc<dyn RemoteSessionFactory>,
    ) -> Self {
        let level = AudioLevelEstimator::synthetic(&config);
        Self::from_parts(&config, provisioner, factory, level)
    }

    /// Drives the audio level from `source` instead of synthetic jitter.
    pub fn with_level_source(
        config: OrchestratorConfig,
        provisioner: Arc<dyn CallProvisioner>,
        factory: Arc<dyn RemoteSessionFactory>,
        source: Box<dyn LevelSource>,
    ) -> Self {
        let level = AudioLevelEstimator::new(&config, source);
        Self::from_parts(&config, provisioner, factory, level)
    }

    fn from_parts(
        config: &OrchestratorConfig,
        provisioner: Arc<dyn CallProvisioner>,
        factory: Arc<dyn RemoteSessionFactory>,
        level: AudioLevelEstimator,
    ) -> Self {
        let timer = DurationTimer::new(config.duration_tick());
        let duration_rx = timer.subscribe();
        let level_rx = level.subscribe();
        let (transcripts_tx, _) = watch::channel(Vec::new());
        let (error_tx, _) = watch::channel(None);
        let (muted_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(ManagerInner {
                provisioner,
                factory,
                machine: ConnectionStateMachine::new(config.lifecycle_capacity),
                aggregator: TranscriptAggregator::new(),
                attempt: AtomicU64::new(0),
                slot: Mutex::new(SessionSlot {
                    active: None,
                    timer,
                    level,
                }),
                transcripts_tx,
                error_tx,
                muted_tx,
                duration_rx,
                level_rx,
            }),
        }
    }

    /// Provisions, creates and joins a call.
    ///
    /// Never fails loudly: errors land in [`ConnectionState::Error`] and
    /// [`error_message`](Self::error_message).
    pub async fn start(&self, params: CallParams) -> StartOutcome {
        let inner = &self.inner;

        let attempt = {
            let mut slot = inner.slot.lock().await;
            let current = inner.machine.current();
            if current.is_busy() {
                warn!(
                    target: TARGET,
                    state = current.as_str(),
                    "start requested while a call is active; ignoring"
                );
                return StartOutcome::AlreadyActive;
            }

            let attempt = inner.attempt.fetch_add(1, Ordering::SeqCst) + 1;
            slot.active = None;
            slot.timer.reset();
            slot.level.stop();
            inner.transcripts_tx.send_replace(Vec::new());
            inner.error_tx.send_replace(None);
            inner.muted_tx.send_replace(false);
            inner
                .machine
                .transition(attempt, ConnectionState::Connecting, None);
            info!(
                target: TARGET,
                attempt,
                max_duration_seconds = params.max_duration_seconds,
                "starting call attempt"
            );
            attempt
        };

        let requested_at = Instant::now();
        let call = match inner.provisioner.provision(&params).await {
            Ok(call) => call,
            Err(err) => return inner.fail_attempt(attempt, err.into()).await,
        };
        if !inner.is_current(attempt) {
            debug!(target: TARGET, attempt, "attempt retired during provisioning");
            return StartOutcome::Superseded;
        }
        record_call_provisioned(attempt, &call.call_id, duration_to_ms(requested_at.elapsed()));

        let parts = match inner.factory.create() {
            Ok(parts) => parts,
            Err(err) => {
                return inner
                    .fail_attempt(attempt, SessionFailure::setup(format!("{err:#}")))
                    .await
            }
        };
        let session = Arc::clone(&parts.session);

        {
            let mut slot = inner.slot.lock().await;
            if !inner.is_current(attempt) {
                debug!(target: TARGET, attempt, "attempt retired during provisioning");
                return StartOutcome::Superseded;
            }
            let mut active = ActiveCall::new(call.clone(), Arc::clone(&session));
            active.attach_pump(tokio::spawn(pump_events(
                Arc::downgrade(inner),
                attempt,
                parts.events,
            )));
            slot.active = Some(active);
        }

        if let Err(err) = session.join_call(&call.join_url).await {
            return inner
                .fail_attempt(attempt, SessionFailure::join(format!("{err:#}")))
                .await;
        }

        let mut slot = inner.slot.lock().await;
        if !inner.is_current(attempt) {
            drop(slot);
            debug!(target: TARGET, attempt, "attempt retired during join; leaving late session");
            if let Err(err) = session.leave_call().await {
                record_cleanup_failure(attempt, "leave_call", &format!("{err:#}"));
            }
            return StartOutcome::Superseded;
        }

        slot.timer.start(Instant::now());
        slot.level.start(inner.machine.subscribe());
        if inner.machine.current() == ConnectionState::Connecting {
            inner
                .machine
                .transition(attempt, ConnectionState::Connected, None);
        }
        info!(target: TARGET, attempt, call_id = %call.call_id, "call joined");
        StartOutcome::Connected
    }

    /// Tears down whatever is active and returns to idle. Safe to call repeatedly.
    pub async fn stop(&self) {
        let inner = &self.inner;
        let (attempt, released) = {
            let mut slot = inner.slot.lock().await;
            let attempt = inner.attempt.fetch_add(1, Ordering::SeqCst);
            slot.timer.stop();
            slot.level.stop();
            let released = slot.active.take();
            inner.error_tx.send_replace(None);
            inner.muted_tx.send_replace(false);
            inner.machine.transition(attempt, ConnectionState::Idle, None);
            (attempt, released)
        };

        if released.is_some() {
            info!(target: TARGET, attempt, "stopping call");
        }
        inner.release_call(attempt, released).await;
    }

    /// Flips the microphone mute on the open session and returns the resulting flag.
    ///
    /// The remote call runs without the session lock, so `stop()` is never held up by it.
    pub async fn toggle_mute(&self) -> bool {
        let inner = &self.inner;
        let (attempt, muted, session) = {
            let slot = inner.slot.lock().await;
            let muted = *inner.muted_tx.borrow();
            let Some(active) = slot.active.as_ref() else {
                return muted;
            };
            (inner.attempt.load(Ordering::SeqCst), muted, active.session())
        };

        let result = if muted {
            session.unmute().await
        } else {
            session.mute().await
        };

        let _slot = inner.slot.lock().await;
        if !inner.is_current(attempt) {
            debug!(target: TARGET, attempt, "mute toggle resolved after the call was torn down");
            return *inner.muted_tx.borrow();
        }

        match result {
            Ok(()) => {
                inner.muted_tx.send_replace(!muted);
                debug!(target: TARGET, muted = !muted, "microphone mute toggled");
                !muted
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(target: TARGET, error = %message, "failed to toggle mute");
                muted
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.machine.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.machine.subscribe()
    }

    pub fn audio_level(&self) -> f32 {
        *self.inner.level_rx.borrow()
    }

    pub fn subscribe_audio_level(&self) -> watch::Receiver<f32> {
        self.inner.level_rx.clone()
    }

    pub fn transcripts(&self) -> Vec<TranscriptEntry> {
        self.inner.transcripts_tx.borrow().clone()
    }

    pub fn subscribe_transcripts(&self) -> watch::Receiver<Vec<TranscriptEntry>> {
        self.inner.transcripts_tx.subscribe()
    }

    pub fn duration_seconds(&self) -> u64 {
        *self.inner.duration_rx.borrow()
    }

    pub fn subscribe_duration(&self) -> watch::Receiver<u64> {
        self.inner.duration_rx.clone()
    }

    pub fn error_message(&self) -> Option<String> {
        self.inner.error_tx.borrow().clone()
    }

    pub fn subscribe_error(&self) -> watch::Receiver<Option<String>> {
        self.inner.error_tx.subscribe()
    }

    pub fn is_muted(&self) -> bool {
        *self.inner.muted_tx.borrow()
    }

    pub fn subscribe_muted(&self) -> watch::Receiver<bool> {
        self.inner.muted_tx.subscribe()
    }

    /// ID of the call currently held open, if any.
    pub async fn call_id(&self) -> Option<String> {
        let slot = self.inner.slot.lock().await;
        slot.active
            .as_ref()
            .map(|active| active.call().call_id.clone())
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<SessionLifecycleUpdate> {
        self.inner.machine.subscribe_lifecycle()
    }
}

impl std::fmt::Debug for SessionLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLifecycleManager")
            .field("state", &self.state())
            .field("attempt", &self.inner.attempt.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
