//! The request pipeline.
//!
//! ```text
//! inbound:  replay guard -> uniqueness guard -> decrypt strategy -> plaintext
//! outbound: plaintext -> envelope for the recipient + status header
//! ```
//!
//! The embedding framework decides per endpoint what applies (a
//! [`Classification`]), builds an [`InboundRequest`], and threads one
//! [`RequestScope`] through `inbound` and `outbound` for the same request.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::audit::{AuditSink, GuardAction, GuardEvent, TracingAuditSink};
use crate::cache::CacheStats;
use crate::clock::{system_clock, SharedClock};
use crate::config::GuardConfig;
use crate::context::{Authenticator, ContextCache, RequestScope, UnimplementedDirectory, UserDirectory};
use crate::crypto::{PublicPoint, SecurityEnvelope};
use crate::dispatch::{DecryptStrategy, Dispatcher, FieldNames};
use crate::error::{ErrorCode, GuardError, GuardResult};
use crate::replay::{ReplayGuard, ReplayPolicy};
use crate::request::InboundRequest;
use crate::security::{SecurityService, ServerPublicKey};
use crate::unique::{UniqueGuard, UniquePolicy};

pub const EXPOSE_HEADERS: &str = "Access-Control-Expose-Headers";

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// What one endpoint requires. Policies left as `None` use the configured
/// defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Classification {
    pub replay: bool,
    pub replay_policy: Option<ReplayPolicy>,
    pub unique: bool,
    pub unique_policy: Option<UniquePolicy>,
    pub decrypt: Option<DecryptStrategy>,
    pub decrypt_fields: Option<FieldNames>,
    pub encrypt_response: bool,
}

impl Classification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replay_protection(mut self) -> Self {
        self.replay = true;
        self
    }

    pub fn with_replay_policy(mut self, policy: ReplayPolicy) -> Self {
        self.replay = true;
        self.replay_policy = Some(policy);
        self
    }

    pub fn with_unique_protection(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_unique_policy(mut self, policy: UniquePolicy) -> Self {
        self.unique = true;
        self.unique_policy = Some(policy);
        self
    }

    pub fn with_decryption(mut self, strategy: DecryptStrategy) -> Self {
        self.decrypt = Some(strategy);
        self
    }

    pub fn with_decrypt_fields(mut self, fields: FieldNames) -> Self {
        self.decrypt_fields = Some(fields);
        self
    }

    pub fn with_response_encryption(mut self) -> Self {
        self.encrypt_response = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Outbound types
// ---------------------------------------------------------------------------

/// Whose key a response is encrypted for.
#[derive(Clone, Copy, Debug)]
pub enum Recipient<'a> {
    /// The request's active context, else the directory's current user.
    Active,
    /// A named user, looked up through the context cache.
    User(&'a str),
    /// An explicit key.
    Key(&'a PublicPoint),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedResponse {
    pub envelope: SecurityEnvelope,
    /// Status header pair followed by the CORS expose hint.
    pub headers: Vec<(String, String)>,
}

impl EncryptedResponse {
    pub fn body(&self) -> GuardResult<String> {
        self.envelope.to_json().map_err(|e| {
            GuardError::new(ErrorCode::EncryptionFailed, "cannot serialize envelope").with_source(e)
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseBody {
    /// Guard disabled: body unchanged.
    Plain(String),
    Encrypted(EncryptedResponse),
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheReport {
    pub generated_at: DateTime<Utc>,
    pub user_context: CacheStats,
    pub replay: CacheStats,
    pub unique_request: CacheStats,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearReport {
    pub user_context: usize,
    pub replay: usize,
    pub unique_request: usize,
}

impl ClearReport {
    pub fn total(&self) -> usize {
        self.user_context + self.replay + self.unique_request
    }
}

// ---------------------------------------------------------------------------
// Shield
// ---------------------------------------------------------------------------

struct Core {
    security: Arc<SecurityService>,
    authenticator: Arc<Authenticator>,
    dispatcher: Dispatcher,
    replay: ReplayGuard,
    unique: UniqueGuard,
}

impl Core {
    fn new(config: &GuardConfig, directory: Arc<dyn UserDirectory>, clock: SharedClock) -> GuardResult<Self> {
        let security = Arc::new(SecurityService::from_config(config)?);
        let contexts = Arc::new(ContextCache::new(&config.user_context_cache, clock.clone()));
        let authenticator = Arc::new(Authenticator::new(contexts, directory, clock.clone()));
        let dispatcher = Dispatcher::new(security.clone(), authenticator.clone());
        Ok(Self {
            security,
            authenticator,
            dispatcher,
            replay: ReplayGuard::new(&config.replay_attack.cache, clock.clone()),
            unique: UniqueGuard::new(&config.unique_request.cache, clock),
        })
    }
}

pub struct ShieldBuilder {
    config: GuardConfig,
    directory: Option<Arc<dyn UserDirectory>>,
    clock: Option<SharedClock>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl ShieldBuilder {
    pub fn directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn build(self) -> GuardResult<Shield> {
        self.config.validate()?;
        let clock = self.clock.unwrap_or_else(system_clock);
        let audit = self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink));
        let directory = self
            .directory
            .unwrap_or_else(|| Arc::new(UnimplementedDirectory));

        let core = if self.config.enabled {
            Some(Core::new(&self.config, directory, clock.clone())?)
        } else {
            None
        };
        info!(config = %self.config.summary(), "ecc guard initialised");

        Ok(Shield {
            config: self.config,
            core,
            audit,
            clock,
        })
    }
}

pub struct Shield {
    config: GuardConfig,
    core: Option<Core>,
    audit: Arc<dyn AuditSink>,
    clock: SharedClock,
}

impl Shield {
    pub fn builder(config: GuardConfig) -> ShieldBuilder {
        ShieldBuilder {
            config,
            directory: None,
            clock: None,
            audit: None,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.core.is_some()
    }

    pub fn server_public_key(&self) -> Option<&ServerPublicKey> {
        self.core.as_ref().map(|c| c.security.server_public_key())
    }

    pub fn security(&self) -> Option<&SecurityService> {
        self.core.as_ref().map(|c| c.security.as_ref())
    }

    pub fn authenticator(&self) -> Option<&Authenticator> {
        self.core.as_ref().map(|c| c.authenticator.as_ref())
    }

    fn emit(&self, action: GuardAction) -> GuardEvent {
        GuardEvent::new(action, self.clock.now())
    }

    /// Run the inbound guards for one request and return the plaintext body.
    ///
    /// Disabled guard and `OPTIONS` requests pass through untouched. On any
    /// failure the scope is cleared before the error is returned.
    pub fn inbound(
        &self,
        request: &InboundRequest,
        class: &Classification,
        scope: &mut RequestScope,
    ) -> GuardResult<String> {
        let Some(core) = &self.core else {
            return Ok(request.body().to_string());
        };
        if request.is_preflight() {
            return Ok(request.body().to_string());
        }
        let result = self.guard_inbound(core, request, class, scope);
        if result.is_err() {
            scope.clear();
        }
        result
    }

    fn guard_inbound(
        &self,
        core: &Core,
        request: &InboundRequest,
        class: &Classification,
        scope: &mut RequestScope,
    ) -> GuardResult<String> {
        let client_ip = request.client_ip();
        let unique_policy = class
            .unique_policy
            .as_ref()
            .unwrap_or(&self.config.unique_request.policy);
        let request_id = request.header(&unique_policy.header_name);

        if class.replay {
            let policy = class
                .replay_policy
                .as_ref()
                .unwrap_or(&self.config.replay_attack.policy);
            if let Err(e) = core.replay.check(request.header(&policy.header_name), &client_ip, policy) {
                self.audit.record(
                    self.emit(GuardAction::ReplayRejected)
                        .with_client_ip(&client_ip)
                        .with_request_id(request_id)
                        .with_error(&e),
                );
                return Err(e);
            }
        }

        if class.unique {
            if let Err(e) = core.unique.check(request, &client_ip, unique_policy) {
                self.audit.record(
                    self.emit(GuardAction::DuplicateRejected)
                        .with_client_ip(&client_ip)
                        .with_request_id(request_id)
                        .with_error(&e),
                );
                return Err(e);
            }
        }

        let Some(strategy) = class.decrypt else {
            return Ok(request.body().to_string());
        };
        if request.body().trim().is_empty() {
            return Ok(request.body().to_string());
        }

        let fields = class
            .decrypt_fields
            .as_ref()
            .unwrap_or(&self.config.decrypt_fields);
        let outcome = SecurityEnvelope::from_json(request.body())
            .map_err(|e| {
                GuardError::new(ErrorCode::InvalidEnvelope, "request body is not a security envelope")
                    .with_source(e)
            })
            .and_then(|envelope| core.dispatcher.decrypt(strategy, &envelope, fields, scope));

        match outcome {
            Ok(plaintext) => {
                self.audit.record(
                    self.emit(GuardAction::DecryptSucceeded { strategy })
                        .with_client_ip(&client_ip)
                        .with_request_id(request_id)
                        .with_user(scope.user()),
                );
                Ok(plaintext)
            }
            Err(e) => {
                self.audit.record(
                    self.emit(GuardAction::DecryptFailed { strategy })
                        .with_client_ip(&client_ip)
                        .with_request_id(request_id)
                        .with_error(&e),
                );
                Err(e)
            }
        }
    }

    /// Encrypt a response body for `recipient`.
    pub fn outbound(
        &self,
        body: &str,
        recipient: Recipient<'_>,
        scope: &mut RequestScope,
    ) -> GuardResult<ResponseBody> {
        let Some(core) = &self.core else {
            return Ok(ResponseBody::Plain(body.to_string()));
        };

        let result = self
            .recipient_key(core, recipient, scope)
            .and_then(|(user, key)| {
                core.security
                    .encrypt_for(body, &key)
                    .map(|envelope| (user, envelope))
            });

        match result {
            Ok((user, envelope)) => {
                self.audit
                    .record(self.emit(GuardAction::ResponseEncrypted).with_user(user.as_deref()));
                let status = &self.config.response_encryption;
                Ok(ResponseBody::Encrypted(EncryptedResponse {
                    envelope,
                    headers: vec![
                        (status.status_header_name.clone(), status.status_header_value.clone()),
                        (EXPOSE_HEADERS.to_string(), status.status_header_name.clone()),
                    ],
                }))
            }
            Err(e) => {
                self.audit.record(
                    self.emit(GuardAction::ResponseEncryptionFailed)
                        .with_user(scope.user())
                        .with_error(&e),
                );
                Err(e)
            }
        }
    }

    fn recipient_key(
        &self,
        core: &Core,
        recipient: Recipient<'_>,
        scope: &mut RequestScope,
    ) -> GuardResult<(Option<String>, PublicPoint)> {
        let context = match recipient {
            Recipient::Key(key) => return Ok((None, key.clone())),
            Recipient::User(user) => core.authenticator.resolve(user)?,
            Recipient::Active => {
                let published = scope.active().cloned();
                match published {
                    Some(context) => context,
                    None => core.authenticator.authenticate_current(scope)?,
                }
            }
        };
        let key = context.public_key().ok_or_else(|| {
            GuardError::new(ErrorCode::UserPublicKeyUnavailable, "user context has been cleared")
        })?;
        Ok((Some(context.user().to_string()), key))
    }

    // -- cache administration ----------------------------------------------

    pub fn cache_report(&self) -> Option<CacheReport> {
        self.core.as_ref().map(|core| CacheReport {
            generated_at: self.clock.now(),
            user_context: core.authenticator.cache().stats(),
            replay: core.replay.stats(),
            unique_request: core.unique.stats(),
        })
    }

    /// Empty all three caches. User contexts are wiped as they go.
    pub fn clear_caches(&self) -> ClearReport {
        let Some(core) = &self.core else {
            return ClearReport::default();
        };
        let report = ClearReport {
            user_context: core.authenticator.cache().clear(),
            replay: core.replay.clear(),
            unique_request: core.unique.clear(),
        };
        self.audit.record(self.emit(GuardAction::CachesCleared {
            entries: report.total(),
        }));
        report
    }

    pub fn clear_context_cache(&self) -> usize {
        self.core
            .as_ref()
            .map_or(0, |core| core.authenticator.cache().clear())
    }

    pub fn clear_replay_cache(&self) -> usize {
        self.core.as_ref().map_or(0, |core| core.replay.clear())
    }

    pub fn clear_unique_cache(&self) -> usize {
        self.core.as_ref().map_or(0, |core| core.unique.clear())
    }

    /// Sweep expired entries from all three caches now.
    pub fn cleanup(&self) -> usize {
        self.core.as_ref().map_or(0, |core| {
            core.authenticator.cache().cleanup() + core.replay.cleanup() + core.unique.cleanup()
        })
    }
}
