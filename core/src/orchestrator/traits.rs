use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::orchestrator::types::{CallHandle, CallParams, RemoteSessionEvent};
use crate::provisioning::ProvisioningError;

/// 向后端申请一路实时通话。
#[async_trait]
pub trait CallProvisioner: Send + Sync {
    async fn provision(&self, params: &CallParams) -> Result<CallHandle, ProvisioningError>;
}

/// 第三方实时媒体 SDK 的会话句柄。
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn join_call(&self, join_url: &str) -> Result<()>;

    async fn leave_call(&self) -> Result<()>;

    async fn mute(&self) -> Result<()>;

    async fn unmute(&self) -> Result<()>;
}

/// 新建的远端会话及其事件流。
pub struct RemoteSessionParts {
    pub session: Arc<dyn RemoteSession>,
    pub events: mpsc::Receiver<RemoteSessionEvent>,
}

impl std::fmt::Debug for RemoteSessionParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSessionParts").finish_non_exhaustive()
    }
}

pub trait RemoteSessionFactory: Send + Sync {
    /// Creates a session client whose listeners are live before `join_call`.
    fn create(&self) -> Result<RemoteSessionParts>;
}
