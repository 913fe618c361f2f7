use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::debug;

/// 通话计时器：按墙钟差值重新计算已用秒数，避免 tick 延迟带来的漂移。
pub struct DurationTimer {
    tick: Duration,
    elapsed_tx: Arc<watch::Sender<u64>>,
    ticker: Option<JoinHandle<()>>,
}

impl DurationTimer {
    pub fn new(tick: Duration) -> Self {
        let (elapsed_tx, _) = watch::channel(0);
        Self {
            tick,
            elapsed_tx: Arc::new(elapsed_tx),
            ticker: None,
        }
    }

    /// Starts ticking from `epoch`; a running ticker is replaced.
    pub fn start(&mut self, epoch: Instant) {
        self.stop();
        self.elapsed_tx.send_replace(epoch.elapsed().as_secs());

        let elapsed_tx = Arc::clone(&self.elapsed_tx);
        let tick = self.tick;
        self.ticker = Some(tokio::spawn(async move {
            let mut ticker = interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let elapsed = Instant::now().saturating_duration_since(epoch).as_secs();
                elapsed_tx.send_if_modified(|current| {
                    if *current == elapsed {
                        false
                    } else {
                        *current = elapsed;
                        true
                    }
                });
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
            debug!(
                target: "session_manager",
                elapsed = self.elapsed_seconds(),
                "duration timer stopped"
            );
        }
    }

    /// Stops the ticker and zeroes the elapsed value.
    pub fn reset(&mut self) {
        self.stop();
        self.elapsed_tx.send_replace(0);
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    pub fn elapsed_seconds(&self) -> u64 {
        *self.elapsed_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.elapsed_tx.subscribe()
    }
}

impl std::fmt::Debug for DurationTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurationTimer")
            .field("tick", &self.tick)
            .field("elapsed", &self.elapsed_seconds())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for DurationTimer {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}
