//! Decrypt strategy dispatch.
//!
//! Each protected endpoint declares one [`DecryptStrategy`]:
//!
//! - `Authenticated`: the caller is known. Verify the envelope signature
//!   against the caller's cached key, then decrypt.
//! - `AnonymousBootstrap` (login): decrypt, read the user name from the
//!   plaintext, load that user's key, then verify.
//! - `Registration`: decrypt, read the user name and key coordinates from
//!   the plaintext, verify against that inline key, then cache it.
//!
//! The two unauthenticated strategies necessarily decrypt before they can
//! verify. A forged bootstrap request therefore costs a decryption;
//! a forged authenticated request does not.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::context::{Authenticator, RequestScope};
use crate::crypto::{PublicPoint, SecurityEnvelope};
use crate::error::{ErrorCode, GuardError, GuardResult};
use crate::security::SecurityService;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecryptStrategy {
    Authenticated,
    AnonymousBootstrap,
    Registration,
}

impl DecryptStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authenticated => "authenticated",
            Self::AnonymousBootstrap => "anonymous-bootstrap",
            Self::Registration => "registration",
        }
    }
}

impl std::fmt::Display for DecryptStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plaintext field names read by the unauthenticated strategies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldNames {
    pub unique_user_key: String,
    pub public_x_key: String,
    pub public_y_key: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            unique_user_key: "username".into(),
            public_x_key: "userPublicX".into(),
            public_y_key: "userPublicY".into(),
        }
    }
}

pub struct Dispatcher {
    security: Arc<SecurityService>,
    authenticator: Arc<Authenticator>,
}

impl Dispatcher {
    pub fn new(security: Arc<SecurityService>, authenticator: Arc<Authenticator>) -> Self {
        Self {
            security,
            authenticator,
        }
    }

    /// Run `strategy` over `envelope`. Yields the plaintext or one error.
    pub fn decrypt(
        &self,
        strategy: DecryptStrategy,
        envelope: &SecurityEnvelope,
        fields: &FieldNames,
        scope: &mut RequestScope,
    ) -> GuardResult<String> {
        let result = match strategy {
            DecryptStrategy::Authenticated => self.authenticated(envelope, scope),
            DecryptStrategy::AnonymousBootstrap => self.bootstrap(envelope, fields, scope),
            DecryptStrategy::Registration => self.registration(envelope, fields, scope),
        };
        if let Err(e) = &result {
            debug!(strategy = %strategy, code = %e.code(), "decrypt strategy failed");
        }
        result
    }

    fn authenticated(&self, envelope: &SecurityEnvelope, scope: &mut RequestScope) -> GuardResult<String> {
        let published = scope.active().cloned();
        let context = match published {
            Some(active) => active,
            None => self.authenticator.authenticate_current(scope)?,
        };
        let key = context.public_key().ok_or_else(|| {
            GuardError::new(ErrorCode::UserPublicKeyUnavailable, "user context has been cleared")
        })?;

        self.check_signature(envelope, &key, context.user())?;
        self.security.decrypt(envelope)
    }

    fn bootstrap(
        &self,
        envelope: &SecurityEnvelope,
        fields: &FieldNames,
        scope: &mut RequestScope,
    ) -> GuardResult<String> {
        let plaintext = self.security.decrypt(envelope)?;

        let user = parse_object(&plaintext)
            .and_then(|doc| text_field(&doc, &fields.unique_user_key))
            .ok_or_else(|| {
                GuardError::new(
                    ErrorCode::MissingUsername,
                    format!(
                        "plaintext must be a JSON object with a non-empty \"{}\" field, e.g. {{\"{}\": \"alice\", \"data\": {{}}}}",
                        fields.unique_user_key, fields.unique_user_key
                    ),
                )
            })?;

        let context = self.authenticator.authenticate(&user, scope)?;
        let key = context.public_key().ok_or_else(|| {
            GuardError::new(ErrorCode::UserPublicKeyUnavailable, "user context has been cleared")
        })?;
        if let Err(e) = self.check_signature(envelope, &key, &user) {
            scope.clear();
            return Err(e);
        }
        Ok(plaintext)
    }

    fn registration(
        &self,
        envelope: &SecurityEnvelope,
        fields: &FieldNames,
        scope: &mut RequestScope,
    ) -> GuardResult<String> {
        let plaintext = self.security.decrypt(envelope)?;

        let doc = parse_object(&plaintext);
        let field = |name: &str| doc.as_ref().and_then(|d| text_field(d, name));
        let (user, x, y) = match (
            field(&fields.unique_user_key),
            field(&fields.public_x_key),
            field(&fields.public_y_key),
        ) {
            (Some(user), Some(x), Some(y)) => (user, x, y),
            _ => {
                return Err(GuardError::new(
                    ErrorCode::MissingRegistrationFields,
                    format!(
                        "plaintext must be a JSON object with non-empty \"{}\", \"{}\" and \"{}\" fields",
                        fields.unique_user_key, fields.public_x_key, fields.public_y_key
                    ),
                ))
            }
        };

        if !self.security.verify(&envelope.ciphertext, &envelope.signature, &x, &y)? {
            warn!(user = %user, "registration signature does not match inline key");
            return Err(GuardError::new(ErrorCode::SignatureInvalid, "signature verification failed"));
        }

        let key = PublicPoint::from_coordinates(&x, &y)
            .map_err(|e| GuardError::crypto(ErrorCode::InvalidKey, e))?;
        self.authenticator.register(&user, key, scope)?;
        Ok(plaintext)
    }

    fn check_signature(&self, envelope: &SecurityEnvelope, key: &PublicPoint, user: &str) -> GuardResult<()> {
        if self.security.verify_with(&envelope.ciphertext, &envelope.signature, key)? {
            Ok(())
        } else {
            warn!(user = %user, "envelope signature does not match user key");
            Err(GuardError::new(ErrorCode::SignatureInvalid, "signature verification failed"))
        }
    }
}

fn parse_object(plaintext: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str(plaintext) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// A non-empty scalar field rendered as text.
fn text_field(doc: &Map<String, Value>, name: &str) -> Option<String> {
    match doc.get(name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
