//! 通话音量估计：仅在说话/聆听状态下按固定间隔平滑更新，驱动界面反馈。

mod source;

pub use source::{InputAmplitude, InputAmplitudeSource, LevelSource, SyntheticLevelSource};

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::trace;

use crate::orchestrator::OrchestratorConfig;
use crate::session::ConnectionState;

/// One exponential smoothing step, clamped to `[0, 1]`.
pub fn smooth_level(level: f32, target: f32, smoothing: f32) -> f32 {
    (level + (target - level) * smoothing).clamp(0.0, 1.0)
}

pub struct AudioLevelEstimator {
    tick: Duration,
    smoothing: f32,
    level_tx: Arc<watch::Sender<f32>>,
    source: Arc<Mutex<Box<dyn LevelSource>>>,
    task: Option<JoinHandle<()>>,
}

impl AudioLevelEstimator {
    pub fn new(config: &OrchestratorConfig, source: Box<dyn LevelSource>) -> Self {
        let (level_tx, _) = watch::channel(0.0);
        Self {
            tick: config.level_tick(),
            smoothing: config.level_smoothing,
            level_tx: Arc::new(level_tx),
            source: Arc::new(Mutex::new(source)),
            task: None,
        }
    }

    pub fn synthetic(config: &OrchestratorConfig) -> Self {
        Self::new(config, Box::new(SyntheticLevelSource::new(config)))
    }

    /// Follows `state_rx`, ticking only while the state is audio-active.
    pub fn start(&mut self, mut state_rx: watch::Receiver<ConnectionState>) {
        self.stop();

        let tick = self.tick;
        let smoothing = self.smoothing;
        let level_tx = Arc::clone(&self.level_tx);
        let source = Arc::clone(&self.source);

        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                let state = *state_rx.borrow_and_update();

                if !state.is_audio_active() {
                    reset_level(&level_tx);
                    if state_rx.changed().await.is_err() {
                        break;
                    }
                    ticker.reset();
                    continue;
                }

                tokio::select! {
                    _ = ticker.tick() => {
                        let target_level = source
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .target(state);
                        level_tx.send_modify(|level| {
                            *level = smooth_level(*level, target_level, smoothing);
                        });
                        trace!(
                            target: "audio_level",
                            state = state.as_str(),
                            target_level,
                            level = *level_tx.borrow(),
                            "audio level tick"
                        );
                    }
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            reset_level(&level_tx);
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        reset_level(&self.level_tx);
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn level(&self) -> f32 {
        *self.level_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<f32> {
        self.level_tx.subscribe()
    }
}

fn reset_level(level_tx: &watch::Sender<f32>) {
    level_tx.send_if_modified(|level| {
        if *level == 0.0 {
            false
        } else {
            *level = 0.0;
            true
        }
    });
}

impl std::fmt::Debug for AudioLevelEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioLevelEstimator")
            .field("tick", &self.tick)
            .field("smoothing", &self.smoothing)
            .field("level", &self.level())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Drop for AudioLevelEstimator {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
