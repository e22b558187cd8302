//! Uniqueness guard: each request id is accepted once per TTL.
//!
//! Strict mode rejects any repeat of an id. Non-strict mode rejects a
//! repeat only from the same client IP; the same id from a different IP is
//! treated as an independent request and overwrites the record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::{CacheStats, ExpiringCache};
use crate::clock::SharedClock;
use crate::config::CacheSettings;
use crate::error::{ErrorCode, GuardError, GuardResult};
use crate::request::InboundRequest;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UniquePolicy {
    pub header_name: String,
    pub strict_mode: bool,
    pub log_duplicates: bool,
}

impl Default for UniquePolicy {
    fn default() -> Self {
        Self {
            header_name: "X-Request-ID".into(),
            strict_mode: true,
            log_duplicates: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub request_id: String,
    pub method: String,
    pub uri: String,
    pub client_ip: String,
    pub user_agent: Option<String>,
    pub received_at: DateTime<Utc>,
}

pub struct UniqueGuard {
    records: ExpiringCache<String, RequestRecord>,
    clock: SharedClock,
}

impl UniqueGuard {
    pub fn new(settings: &CacheSettings, clock: SharedClock) -> Self {
        Self {
            records: ExpiringCache::new("unique-request", settings.max_size, settings.ttl(), clock.clone()),
            clock,
        }
    }

    /// Admit or reject `request`, reading its id from `policy.header_name`.
    pub fn check(&self, request: &InboundRequest, client_ip: &str, policy: &UniquePolicy) -> GuardResult<()> {
        let request_id = request
            .header(&policy.header_name)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                GuardError::new(
                    ErrorCode::MissingRequestId,
                    format!("missing {} header", policy.header_name),
                )
            })?;

        let record = RequestRecord {
            request_id: request_id.to_string(),
            method: request.method().to_string(),
            uri: request.uri().to_string(),
            client_ip: client_ip.to_string(),
            user_agent: request.user_agent().map(str::to_string),
            received_at: self.clock.now(),
        };

        let strict = policy.strict_mode;
        let outcome = self
            .records
            .insert_unless(request_id.to_string(), record, |seen| strict || seen.client_ip == client_ip);

        match outcome {
            Ok(()) => Ok(()),
            Err(original) => {
                if policy.log_duplicates {
                    warn!(
                        request_id = %request_id,
                        client_ip = %client_ip,
                        original_ip = %original.client_ip,
                        strict,
                        "duplicate request"
                    );
                }
                Err(GuardError::new(
                    ErrorCode::DuplicateRequest,
                    format!(
                        "duplicate request - RequestID: {}, Original time: {}, originalIP: {}",
                        request_id,
                        original.received_at.to_rfc3339(),
                        original.client_ip
                    ),
                )
                .with_request_id(request_id))
            }
        }
    }

    /// Record stored for `request_id`, if still live.
    pub fn record(&self, request_id: &str) -> Option<RequestRecord> {
        self.records.get(request_id)
    }

    pub fn stats(&self) -> CacheStats {
        self.records.stats()
    }

    pub fn clear(&self) -> usize {
        self.records.clear()
    }

    pub fn cleanup(&self) -> usize {
        self.records.cleanup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn guard() -> (UniqueGuard, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (UniqueGuard::new(&CacheSettings::new(100, 60), clock.clone()), clock)
    }

    fn request(id: &str) -> InboundRequest {
        InboundRequest::new("POST", "/orders")
            .with_header("X-Request-ID", id)
            .with_header("User-Agent", "test-agent")
    }

    fn non_strict() -> UniquePolicy {
        UniquePolicy {
            strict_mode: false,
            ..UniquePolicy::default()
        }
    }

    #[test]
    fn same_ip_repeat_fails_in_both_modes() {
        for policy in [UniquePolicy::default(), non_strict()] {
            let (g, _) = guard();
            assert!(g.check(&request("r-1"), "10.0.0.1", &policy).is_ok());
            let err = g.check(&request("r-1"), "10.0.0.1", &policy).unwrap_err();
            assert_eq!(err.code(), ErrorCode::DuplicateRequest);
            assert_eq!(err.request_id(), Some("r-1"));
            assert!(err.message().contains("originalIP: 10.0.0.1"));
        }
    }

    #[test]
    fn other_ip_repeat_depends_on_strictness() {
        let (g, _) = guard();
        assert!(g.check(&request("r-2"), "10.0.0.1", &UniquePolicy::default()).is_ok());
        assert!(g.check(&request("r-2"), "10.0.0.2", &UniquePolicy::default()).is_err());

        let (g, _) = guard();
        assert!(g.check(&request("r-3"), "10.0.0.1", &non_strict()).is_ok());
        assert!(g.check(&request("r-3"), "10.0.0.2", &non_strict()).is_ok());
        // the record now belongs to the second origin
        assert_eq!(g.record("r-3").unwrap().client_ip, "10.0.0.2");
    }

    #[test]
    fn missing_id() {
        let (g, _) = guard();
        let req = InboundRequest::new("POST", "/orders");
        let err = g.check(&req, "ip", &UniquePolicy::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingRequestId);
    }

    #[test]
    fn record_captures_origin_and_expires() {
        let (g, clock) = guard();
        g.check(&request("r-4"), "10.0.0.9", &UniquePolicy::default()).unwrap();
        let rec = g.record("r-4").unwrap();
        assert_eq!(rec.method, "POST");
        assert_eq!(rec.uri, "/orders");
        assert_eq!(rec.user_agent.as_deref(), Some("test-agent"));

        clock.advance(chrono::Duration::minutes(60));
        assert!(g.check(&request("r-4"), "10.0.0.9", &UniquePolicy::default()).is_ok());
    }
}
