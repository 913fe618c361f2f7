use serde::{Deserialize, Serialize};

/// 发起一次通话所需的参数。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallParams {
    pub max_duration_seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
}

impl CallParams {
    pub fn with_max_duration(max_duration_seconds: u32) -> Self {
        Self {
            max_duration_seconds,
            call_type: None,
        }
    }

    pub fn call_type<S: Into<String>>(mut self, call_type: S) -> Self {
        self.call_type = Some(call_type.into());
        self
    }
}

/// 后端分配的通话入口，每次尝试只生成一次。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallHandle {
    pub join_url: String,
    pub call_id: String,
}

impl CallHandle {
    pub fn new<J: Into<String>, C: Into<String>>(join_url: J, call_id: C) -> Self {
        Self {
            join_url: join_url.into(),
            call_id: call_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Agent,
    User,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Agent => "agent",
            Speaker::User => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    pub speaker: Speaker,
    pub is_final: bool,
}

impl Utterance {
    pub fn new<S: Into<String>>(text: S, speaker: Speaker, is_final: bool) -> Self {
        Self {
            text: text.into(),
            speaker,
            is_final,
        }
    }
}

/// 远端会话推送的事件，转写事件总是携带完整的历史快照。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteSessionEvent {
    StatusChanged { provider_status: String },
    TranscriptsChanged { utterances: Vec<Utterance> },
}

impl RemoteSessionEvent {
    pub fn status<S: Into<String>>(provider_status: S) -> Self {
        Self::StatusChanged {
            provider_status: provider_status.into(),
        }
    }

    pub fn transcripts(utterances: Vec<Utterance>) -> Self {
        Self::TranscriptsChanged { utterances }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub text: String,
    pub is_agent: bool,
    pub is_streaming: bool,
}
