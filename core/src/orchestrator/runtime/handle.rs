use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::orchestrator::traits::RemoteSession;
use crate::orchestrator::types::CallHandle;

/// 一次通话尝试持有的远端资源。
///
/// 被丢弃时会中止事件泵任务；远端的 `leave_call` 由调用方决定是否执行。
pub struct ActiveCall {
    call: CallHandle,
    session: Arc<dyn RemoteSession>,
    pump: Option<JoinHandle<()>>,
}

impl ActiveCall {
    pub(crate) fn new(call: CallHandle, session: Arc<dyn RemoteSession>) -> Self {
        Self {
            call,
            session,
            pump: None,
        }
    }

    pub(crate) fn attach_pump(&mut self, pump: JoinHandle<()>) {
        if let Some(previous) = self.pump.replace(pump) {
            previous.abort();
        }
    }

    /// Releases the pump handle without aborting it, for teardown driven by the pump itself.
    pub(crate) fn detach_pump(&mut self) {
        self.pump.take();
    }

    pub fn call(&self) -> &CallHandle {
        &self.call
    }

    pub fn session(&self) -> Arc<dyn RemoteSession> {
        Arc::clone(&self.session)
    }
}

impl std::fmt::Debug for ActiveCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveCall")
            .field("call", &self.call)
            .field("pump_running", &self.pump.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for ActiveCall {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
