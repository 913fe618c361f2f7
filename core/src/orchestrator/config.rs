use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::orchestrator::constants::{
    DURATION_TICK, LEVEL_JITTER, LEVEL_SMOOTHING, LEVEL_TICK, LIFECYCLE_CAPACITY,
    LISTENING_BASE_LEVEL, PROVISION_TIMEOUT, SPEAKING_BASE_LEVEL,
};
use crate::orchestrator::runtime::util::duration_to_ms;

const ENV_PROVISION_URL: &str = "VOICECALL_PROVISION_URL";
const ENV_PROVISION_TIMEOUT_MS: &str = "VOICECALL_PROVISION_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub level_tick_ms: u64,
    pub duration_tick_ms: u64,
    pub level_smoothing: f32,
    pub speaking_base: f32,
    pub listening_base: f32,
    pub level_jitter: f32,
    pub lifecycle_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            level_tick_ms: duration_to_ms(LEVEL_TICK),
            duration_tick_ms: duration_to_ms(DURATION_TICK),
            level_smoothing: LEVEL_SMOOTHING,
            speaking_base: SPEAKING_BASE_LEVEL,
            listening_base: LISTENING_BASE_LEVEL,
            level_jitter: LEVEL_JITTER,
            lifecycle_capacity: LIFECYCLE_CAPACITY,
        }
    }
}

impl OrchestratorConfig {
    pub fn level_tick(&self) -> Duration {
        Duration::from_millis(self.level_tick_ms.max(1))
    }

    pub fn duration_tick(&self) -> Duration {
        Duration::from_millis(self.duration_tick_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    pub endpoint: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    duration_to_ms(PROVISION_TIMEOUT)
}

impl ProvisioningConfig {
    pub fn new<S: Into<String>>(endpoint: S) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    /// 从环境变量读取接口地址与超时，地址缺失时返回 `None`。
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var(ENV_PROVISION_URL).ok()?;
        if endpoint.trim().is_empty() {
            return None;
        }

        let request_timeout_ms = std::env::var(ENV_PROVISION_TIMEOUT_MS)
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or_else(default_request_timeout_ms);

        Some(Self {
            endpoint: endpoint.trim().to_string(),
            request_timeout_ms,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
