//! 通话分配接口客户端。
//!
//! 向后端 `POST` 通话参数，解析 `success/data` 信封中的入会地址与通话 ID。

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::orchestrator::config::ProvisioningConfig;
use crate::orchestrator::traits::CallProvisioner;
use crate::orchestrator::types::{CallHandle, CallParams};

const TARGET: &str = "call_provisioning";
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    #[error("provisioning request failed: {0}")]
    Transport(String),
    #[error("provisioning endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed provisioning response: {0}")]
    MalformedBody(String),
    #[error("provisioning rejected: {0}")]
    Rejected(String),
    #[error("provisioning response is missing a join url")]
    MissingJoinUrl,
    #[error("provisioning worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionRequest<'a> {
    max_duration: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    call_type: Option<&'a str>,
}

impl<'a> ProvisionRequest<'a> {
    fn from_params(params: &'a CallParams) -> Self {
        Self {
            max_duration: params.max_duration_seconds.to_string(),
            call_type: params.call_type.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProvisionEnvelope {
    success: bool,
    #[serde(default)]
    data: Option<ProvisionData>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionData {
    #[serde(default)]
    join_url: Option<String>,
    #[serde(default)]
    call_id: Option<String>,
}

/// 解析分配接口的响应体。
pub fn parse_provision_response(body: &str) -> Result<CallHandle, ProvisioningError> {
    let envelope: ProvisionEnvelope = serde_json::from_str(body)
        .map_err(|err| ProvisioningError::MalformedBody(err.to_string()))?;

    if !envelope.success {
        let reason = envelope
            .error
            .or(envelope.message)
            .unwrap_or_else(|| "backend reported failure".to_string());
        return Err(ProvisioningError::Rejected(reason));
    }

    let data = envelope
        .data
        .ok_or_else(|| ProvisioningError::MalformedBody("missing data object".to_string()))?;

    let join_url = data
        .join_url
        .filter(|url| !url.trim().is_empty())
        .ok_or(ProvisioningError::MissingJoinUrl)?;
    let call_id = data
        .call_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ProvisioningError::MalformedBody("missing callId".to_string()))?;

    Ok(CallHandle::new(join_url, call_id))
}

/// 基于 `ureq` 的阻塞请求，在 tokio 的阻塞线程池中执行。
#[derive(Clone)]
pub struct HttpCallProvisioner {
    config: ProvisioningConfig,
    agent: ureq::Agent,
}

impl std::fmt::Debug for HttpCallProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCallProvisioner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HttpCallProvisioner {
    pub fn new(config: ProvisioningConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.request_timeout())
            .build();
        Self { config, agent }
    }

    pub fn from_env() -> Option<Self> {
        ProvisioningConfig::from_env().map(Self::new)
    }

    pub fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    fn provision_blocking(
        agent: &ureq::Agent,
        endpoint: &str,
        payload: &str,
    ) -> Result<CallHandle, ProvisioningError> {
        let response = match agent
            .post(endpoint)
            .set("Content-Type", "application/json")
            .set("Accept", "application/json")
            .send_string(payload)
        {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(ProvisioningError::Status {
                    status,
                    body: truncate_body(&body),
                });
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(ProvisioningError::Transport(transport.to_string()));
            }
        };

        let status = response.status();
        if !(200..300).contains(&status) {
            let body = response.into_string().unwrap_or_default();
            return Err(ProvisioningError::Status {
                status,
                body: truncate_body(&body),
            });
        }

        let body = response
            .into_string()
            .map_err(|err| ProvisioningError::Transport(err.to_string()))?;
        parse_provision_response(&body)
    }
}

#[async_trait]
impl CallProvisioner for HttpCallProvisioner {
    async fn provision(&self, params: &CallParams) -> Result<CallHandle, ProvisioningError> {
        let payload = serde_json::to_string(&ProvisionRequest::from_params(params))
            .map_err(|err| ProvisioningError::Worker(err.to_string()))?;
        let agent = self.agent.clone();
        let endpoint = self.config.endpoint.clone();
        let started = Instant::now();

        info!(
            target: TARGET,
            endpoint = %endpoint,
            max_duration_seconds = params.max_duration_seconds,
            "requesting call allocation"
        );

        let result = tokio::task::spawn_blocking(move || {
            Self::provision_blocking(&agent, &endpoint, &payload)
        })
        .await
        .map_err(|err| ProvisioningError::Worker(err.to_string()))?;

        match &result {
            Ok(call) => info!(
                target: TARGET,
                call_id = %call.call_id,
                elapsed = ?started.elapsed(),
                "call allocated"
            ),
            Err(err) => warn!(
                target: TARGET,
                %err,
                elapsed = ?started.elapsed(),
                "call allocation failed"
            ),
        }

        result
    }
}

fn truncate_body(body: &str) -> String {
    body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect()
}
