use thiserror::Error;

use crate::provisioning::ProvisioningError;

/// 通话建立阶段的失败，只通过状态与错误信息对外暴露。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    #[error("call provisioning failed: {0}")]
    Provisioning(#[from] ProvisioningError),
    #[error("remote session setup failed: {message}")]
    SessionSetup { message: String },
    #[error("failed to join call: {message}")]
    Join { message: String },
}

impl SessionFailure {
    pub fn setup<S: Into<String>>(message: S) -> Self {
        Self::SessionSetup {
            message: message.into(),
        }
    }

    pub fn join<S: Into<String>>(message: S) -> Self {
        Self::Join {
            message: message.into(),
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            SessionFailure::Provisioning(_) => "provisioning",
            SessionFailure::SessionSetup { .. } => "session_setup",
            SessionFailure::Join { .. } => "join",
        }
    }
}
