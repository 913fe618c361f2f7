//! 通话连接状态与生命周期广播负载定义。

use std::time::SystemTime;

use serde::Serialize;

/// 通话连接状态，同一时刻只有一个处于当前。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Speaking,
    Listening,
    Processing,
    Error,
    Ended,
}

impl ConnectionState {
    /// 将服务商状态映射为内部状态，未知状态返回 `None`。
    pub fn from_provider_status(status: &str) -> Option<Self> {
        match status {
            "disconnected" | "disconnecting" => Some(ConnectionState::Ended),
            "listening" => Some(ConnectionState::Listening),
            "speaking" => Some(ConnectionState::Speaking),
            "connecting" => Some(ConnectionState::Connecting),
            "idle" => Some(ConnectionState::Connected),
            "thinking" => Some(ConnectionState::Processing),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Speaking => "speaking",
            ConnectionState::Listening => "listening",
            ConnectionState::Processing => "processing",
            ConnectionState::Error => "error",
            ConnectionState::Ended => "ended",
        }
    }

    pub fn is_audio_active(&self) -> bool {
        matches!(self, ConnectionState::Speaking | ConnectionState::Listening)
    }

    /// 会话尚在建立或进行中。
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Speaking
                | ConnectionState::Listening
                | ConnectionState::Processing
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 生命周期事件。
#[derive(Debug, Clone)]
pub struct SessionLifecycleUpdate {
    pub attempt: u64,
    pub state: ConnectionState,
    pub issued_at: SystemTime,
    pub detail: Option<String>,
}

impl SessionLifecycleUpdate {
    pub fn new(attempt: u64, state: ConnectionState) -> Self {
        Self {
            attempt,
            state,
            issued_at: SystemTime::now(),
            detail: None,
        }
    }

    pub fn with_detail<S: Into<String>>(attempt: u64, state: ConnectionState, detail: S) -> Self {
        Self {
            attempt,
            state,
            issued_at: SystemTime::now(),
            detail: Some(detail.into()),
        }
    }
}
