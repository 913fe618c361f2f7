use serde::Serialize;
use tracing::{info, warn};

pub(crate) const TARGET: &str = "telemetry::voice_call";
pub(crate) const EVENT_PROVISIONED: &str = "call_provisioned";
pub(crate) const EVENT_ATTEMPT_FAILED: &str = "call_attempt_failed";
pub(crate) const EVENT_TRANSITION: &str = "call_state_transition";
pub(crate) const EVENT_CLEANUP_FAILURE: &str = "call_cleanup_failure";

#[derive(Debug, Serialize)]
pub struct CallProvisionedEvent<'a> {
    pub attempt: u64,
    pub call_id: &'a str,
    pub latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct AttemptFailedEvent<'a> {
    pub attempt: u64,
    pub stage: &'static str,
    pub message: &'a str,
}

#[derive(Debug, Serialize)]
pub struct StateTransitionEvent<'a> {
    pub attempt: u64,
    pub from: &'a str,
    pub to: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct CleanupFailureEvent<'a> {
    pub attempt: u64,
    pub operation: &'static str,
    pub message: &'a str,
}

pub fn record_call_provisioned(attempt: u64, call_id: &str, latency_ms: u64) {
    let event = CallProvisionedEvent {
        attempt,
        call_id,
        latency_ms,
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_PROVISIONED,
            attempt,
            call_id,
            latency_ms,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_PROVISIONED,
            %err,
            "failed to encode call provisioned event"
        ),
    }
}

pub fn record_attempt_failed(attempt: u64, stage: &'static str, message: &str) {
    let event = AttemptFailedEvent {
        attempt,
        stage,
        message,
    };

    match serde_json::to_string(&event) {
        Ok(payload) => warn!(
            target: TARGET,
            event = EVENT_ATTEMPT_FAILED,
            attempt,
            stage,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_ATTEMPT_FAILED,
            %err,
            "failed to encode attempt failure event"
        ),
    }
}

pub fn record_state_transition(attempt: u64, from: &str, to: &str, detail: Option<&str>) {
    let event = StateTransitionEvent {
        attempt,
        from,
        to,
        detail,
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_TRANSITION,
            attempt,
            from,
            to,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_TRANSITION,
            %err,
            "failed to encode state transition event"
        ),
    }
}

/// Teardown failures are logged here and never surfaced to callers.
pub fn record_cleanup_failure(attempt: u64, operation: &'static str, message: &str) {
    let event = CleanupFailureEvent {
        attempt,
        operation,
        message,
    };

    match serde_json::to_string(&event) {
        Ok(payload) => warn!(
            target: TARGET,
            event = EVENT_CLEANUP_FAILURE,
            attempt,
            operation,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_CLEANUP_FAILURE,
            %err,
            "failed to encode cleanup failure event"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_payload_omits_missing_detail() {
        let event = StateTransitionEvent {
            attempt: 4,
            from: "connecting",
            to: "connected",
            detail: None,
        };
        let payload = serde_json::to_string(&event).expect("encode transition");
        assert_eq!(
            payload,
            r#"{"attempt":4,"from":"connecting","to":"connected"}"#
        );
    }

    #[test]
    fn cleanup_payload_names_the_operation() {
        let event = CleanupFailureEvent {
            attempt: 2,
            operation: "leave_call",
            message: "socket closed",
        };
        let value: serde_json::Value =
            serde_json::to_value(&event).expect("encode cleanup failure");
        assert_eq!(value["operation"], "leave_call");
        assert_eq!(value["message"], "socket closed");
    }
}
