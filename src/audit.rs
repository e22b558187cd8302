//! Audit logging: every guard decision emits a structured event.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::dispatch::DecryptStrategy;
use crate::error::GuardError;

// ---------------------------------------------------------------------------
// Audit events
// ---------------------------------------------------------------------------

/// What happened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardAction {
    ReplayRejected,
    DuplicateRejected,
    DecryptSucceeded { strategy: DecryptStrategy },
    DecryptFailed { strategy: DecryptStrategy },
    ResponseEncrypted,
    ResponseEncryptionFailed,
    CachesCleared { entries: usize },
}

/// A structured audit event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuardEvent {
    pub timestamp: DateTime<Utc>,
    pub action: GuardAction,
    /// Resolved client address, when the event concerns a request.
    pub client_ip: Option<String>,
    pub user: Option<String>,
    pub request_id: Option<String>,
    pub success: bool,
    /// Stable error code on failure.
    pub code: Option<String>,
    pub detail: Option<String>,
}

impl GuardEvent {
    pub fn new(action: GuardAction, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            action,
            client_ip: None,
            user: None,
            request_id: None,
            success: true,
            code: None,
            detail: None,
        }
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    pub fn with_user(mut self, user: Option<&str>) -> Self {
        self.user = user.map(str::to_string);
        self
    }

    pub fn with_request_id(mut self, id: Option<&str>) -> Self {
        self.request_id = id.map(str::to_string);
        self
    }

    /// Mark as failed and copy the error's code and message.
    pub fn with_error(mut self, err: &GuardError) -> Self {
        self.success = false;
        self.code = Some(err.code().as_str().to_string());
        self.detail = Some(err.message().to_string());
        if self.request_id.is_none() {
            self.request_id = err.request_id().map(str::to_string);
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Audit sink trait
// ---------------------------------------------------------------------------

/// Where audit events go. Implement this for your SIEM/log system.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: GuardEvent);
}

// ---------------------------------------------------------------------------
// Built-in sinks
// ---------------------------------------------------------------------------

/// Logs events via the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: GuardEvent) {
        if event.success {
            tracing::info!(
                timestamp = %event.timestamp,
                action = ?event.action,
                client_ip = ?event.client_ip,
                user = ?event.user,
                request_id = ?event.request_id,
                detail = ?event.detail,
                "audit"
            );
        } else {
            tracing::warn!(
                timestamp = %event.timestamp,
                action = ?event.action,
                client_ip = ?event.client_ip,
                user = ?event.user,
                request_id = ?event.request_id,
                code = ?event.code,
                detail = ?event.detail,
                "audit"
            );
        }
    }
}

/// Collects events in memory (for tests and diagnostics).
#[derive(Debug, Default, Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<GuardEvent>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GuardEvent> {
        self.events.lock().clone()
    }

    pub fn failures(&self) -> Vec<GuardEvent> {
        self.events.lock().iter().filter(|e| !e.success).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: GuardEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn failure_events_carry_code() {
        let sink = InMemoryAuditSink::new();
        let err = GuardError::new(ErrorCode::DuplicateRequest, "dup").with_request_id("r-9");
        sink.record(
            GuardEvent::new(GuardAction::DuplicateRejected, Utc::now())
                .with_client_ip("10.0.0.1")
                .with_error(&err),
        );
        sink.record(GuardEvent::new(GuardAction::ResponseEncrypted, Utc::now()).with_user(Some("bob")));

        assert_eq!(sink.len(), 2);
        let failures = sink.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].code.as_deref(), Some("DUPLICATE_REQUEST"));
        assert_eq!(failures[0].request_id.as_deref(), Some("r-9"));
    }

    #[test]
    fn events_serialize() {
        let event = GuardEvent::new(
            GuardAction::DecryptSucceeded {
                strategy: DecryptStrategy::Registration,
            },
            Utc::now(),
        )
        .with_request_id(Some("r-1"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"]["DecryptSucceeded"]["strategy"], "registration");
        assert_eq!(json["success"], true);
    }
}
