//! The cached per-user context.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use zeroize::Zeroize;

use crate::crypto::PublicPoint;

/// Attribute keys containing any of these (case-insensitive) are wiped when
/// a context is cleared.
pub const SENSITIVE_ATTRIBUTE_MARKERS: [&str; 4] = ["password", "secret", "token", "key"];

pub fn is_sensitive_attribute(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_ATTRIBUTE_MARKERS.iter().any(|m| lower.contains(m))
}

pub type SharedContext = Arc<UserContext>;

#[derive(Default)]
struct Secrets {
    public_key: Option<PublicPoint>,
    session_id: Option<String>,
    attributes: HashMap<String, Value>,
}

/// One user's resolved key material.
///
/// Handed out as [`SharedContext`]. When the cache removes an entry it calls
/// [`clear_sensitive_data`](Self::clear_sensitive_data), so every clone still
/// held by a request sees the key disappear too.
pub struct UserContext {
    user: String,
    loaded_at: DateTime<Utc>,
    secrets: RwLock<Secrets>,
}

impl UserContext {
    pub fn new(user: impl Into<String>, public_key: PublicPoint, loaded_at: DateTime<Utc>) -> Self {
        Self {
            user: user.into(),
            loaded_at,
            secrets: RwLock::new(Secrets {
                public_key: Some(public_key),
                ..Secrets::default()
            }),
        }
    }

    pub fn with_session_id(self, session_id: impl Into<String>) -> Self {
        self.secrets.write().session_id = Some(session_id.into());
        self
    }

    pub fn with_attribute(self, key: impl Into<String>, value: Value) -> Self {
        self.set_attribute(key, value);
        self
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn public_key(&self) -> Option<PublicPoint> {
        self.secrets.read().public_key.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.secrets.read().session_id.clone()
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.secrets.read().attributes.get(key).cloned()
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: Value) {
        self.secrets.write().attributes.insert(key.into(), value);
    }

    pub fn attribute_count(&self) -> usize {
        self.secrets.read().attributes.len()
    }

    /// Expired once `loaded_at + ttl < now`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match (now - self.loaded_at).to_std() {
            Ok(age) => age > ttl,
            Err(_) => false,
        }
    }

    /// True once key material has been wiped.
    pub fn is_cleared(&self) -> bool {
        self.secrets.read().public_key.is_none()
    }

    /// Wipe the public key, the session id, and every sensitive attribute.
    pub fn clear_sensitive_data(&self) {
        let mut secrets = self.secrets.write();
        if let Some(mut key) = secrets.public_key.take() {
            key.zeroize();
        }
        if let Some(mut session) = secrets.session_id.take() {
            session.zeroize();
        }
        let sensitive: Vec<String> = secrets
            .attributes
            .keys()
            .filter(|k| is_sensitive_attribute(k))
            .cloned()
            .collect();
        for key in sensitive {
            if let Some(value) = secrets.attributes.remove(&key) {
                wipe_value(value);
            }
        }
    }
}

fn wipe_value(value: Value) {
    match value {
        Value::String(mut s) => s.zeroize(),
        Value::Array(items) => items.into_iter().for_each(wipe_value),
        Value::Object(map) => map.into_iter().for_each(|(_, v)| wipe_value(v)),
        _ => {}
    }
}

impl std::fmt::Debug for UserContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserContext")
            .field("user", &self.user)
            .field("loaded_at", &self.loaded_at)
            .field("cleared", &self.is_cleared())
            .finish_non_exhaustive()
    }
}
