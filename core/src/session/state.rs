use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::session::lifecycle::{ConnectionState, SessionLifecycleUpdate};
use crate::telemetry::events::record_state_transition;

/// 连接状态的唯一持有者：消费服务商状态并通知观察者。
pub struct ConnectionStateMachine {
    state_tx: watch::Sender<ConnectionState>,
    lifecycle_tx: broadcast::Sender<SessionLifecycleUpdate>,
}

impl ConnectionStateMachine {
    pub fn new(lifecycle_capacity: usize) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (lifecycle_tx, _) = broadcast::channel(lifecycle_capacity.max(1));
        Self {
            state_tx,
            lifecycle_tx,
        }
    }

    /// Maps a provider status and applies it; unknown statuses leave the state untouched.
    pub fn apply(&self, attempt: u64, provider_status: &str) -> ConnectionState {
        match ConnectionState::from_provider_status(provider_status) {
            Some(next) => {
                self.transition(attempt, next, None);
            }
            None => {
                debug!(
                    target: "connection_state",
                    attempt,
                    provider_status,
                    "ignoring unrecognized provider status"
                );
            }
        }
        self.current()
    }

    /// Returns `true` when the state actually changed.
    pub(crate) fn transition(
        &self,
        attempt: u64,
        next: ConnectionState,
        detail: Option<String>,
    ) -> bool {
        let mut previous = next;
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                previous = *state;
                *state = next;
                true
            }
        });

        if !changed {
            return false;
        }

        record_state_transition(attempt, previous.as_str(), next.as_str(), detail.as_deref());

        let update = match detail {
            Some(detail) => SessionLifecycleUpdate::with_detail(attempt, next, detail),
            None => SessionLifecycleUpdate::new(attempt, next),
        };
        if self.lifecycle_tx.receiver_count() > 0 {
            if let Err(err) = self.lifecycle_tx.send(update) {
                warn!(
                    target: "connection_state",
                    %err,
                    "failed to broadcast lifecycle update"
                );
            }
        }
        true
    }

    pub fn current(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<SessionLifecycleUpdate> {
        self.lifecycle_tx.subscribe()
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new(32)
    }
}

impl std::fmt::Debug for ConnectionStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStateMachine")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}
