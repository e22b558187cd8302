//! Replay guard: timestamp window plus a cache of seen
//! `(timestamp, client IP)` fingerprints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::{CacheStats, ExpiringCache};
use crate::clock::SharedClock;
use crate::config::CacheSettings;
use crate::error::{ErrorCode, GuardError, GuardResult};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplayPolicy {
    /// Header carrying the client's ISO-8601 timestamp.
    pub header_name: String,
    /// Largest accepted `|now - client time|`, in milliseconds.
    pub time_window_ms: u64,
    pub cache_key_prefix: String,
    pub check_future_time: bool,
    pub future_tolerance_secs: u64,
    pub log_attacks: bool,
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        Self {
            header_name: "X-Timestamp".into(),
            time_window_ms: 300_000,
            cache_key_prefix: "replay".into(),
            check_future_time: true,
            future_tolerance_secs: 60,
            log_attacks: true,
        }
    }
}

pub struct ReplayGuard {
    seen: ExpiringCache<String, DateTime<Utc>>,
    clock: SharedClock,
}

impl ReplayGuard {
    pub fn new(settings: &CacheSettings, clock: SharedClock) -> Self {
        Self {
            seen: ExpiringCache::new("replay", settings.max_size, settings.ttl(), clock.clone()),
            clock,
        }
    }

    pub fn fingerprint(prefix: &str, timestamp: &str, client_ip: &str) -> String {
        format!("{}:{}:{}", prefix, timestamp, client_ip)
    }

    /// Admit or reject one request. The fingerprint is recorded only when
    /// every earlier check passes.
    pub fn check(&self, timestamp: Option<&str>, client_ip: &str, policy: &ReplayPolicy) -> GuardResult<()> {
        let raw = timestamp.map(str::trim).filter(|t| !t.is_empty()).ok_or_else(|| {
            GuardError::new(
                ErrorCode::MissingTimestamp,
                format!("missing {} header", policy.header_name),
            )
        })?;

        let client_time = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| {
                GuardError::new(
                    ErrorCode::InvalidTimestampFormat,
                    "timestamp must be ISO-8601, e.g. 2024-01-01T12:00:00Z",
                )
                .with_timestamp(raw)
                .with_source(e)
            })?
            .with_timezone(&Utc);

        let now = self.clock.now();
        let diff_ms = (now - client_time).num_milliseconds().unsigned_abs();
        if diff_ms > policy.time_window_ms {
            return Err(GuardError::new(
                ErrorCode::TimestampExpired,
                format!(
                    "request timestamp outside allowed window: difference {}ms, window {}ms",
                    diff_ms, policy.time_window_ms
                ),
            )
            .with_timestamp(raw));
        }

        if policy.check_future_time {
            let ahead_ms = (client_time - now).num_milliseconds();
            let tolerance_ms = policy.future_tolerance_secs.saturating_mul(1000);
            if ahead_ms > 0 && ahead_ms.unsigned_abs() > tolerance_ms {
                return Err(GuardError::new(
                    ErrorCode::FutureTimestamp,
                    format!(
                        "request timestamp is {}ms in the future, tolerance {}ms",
                        ahead_ms, tolerance_ms
                    ),
                )
                .with_timestamp(raw));
            }
        }

        let key = Self::fingerprint(&policy.cache_key_prefix, raw, client_ip);
        match self.seen.insert_unless(key, now, |_| true) {
            Ok(()) => Ok(()),
            Err(first_seen) => {
                if policy.log_attacks {
                    warn!(client_ip = %client_ip, timestamp = %raw, first_seen = %first_seen, "replay attack detected");
                }
                Err(GuardError::new(
                    ErrorCode::ReplayAttackDetected,
                    format!("request already processed at {}", first_seen.to_rfc3339()),
                )
                .with_timestamp(raw))
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.seen.stats()
    }

    pub fn clear(&self) -> usize {
        self.seen.clear()
    }

    pub fn cleanup(&self) -> usize {
        self.seen.cleanup()
    }
}
