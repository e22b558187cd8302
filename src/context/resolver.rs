//! Authentication resolver: fills the context cache from the embedding
//! application's user store and publishes the result into a request scope.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::cache::ContextCache;
use super::scope::RequestScope;
use super::user::{SharedContext, UserContext};
use crate::clock::SharedClock;
use crate::crypto::PublicPoint;
use crate::error::{ErrorCode, GuardError, GuardResult};

/// Placeholder identity for callers that have not authenticated. Never
/// cached, never published.
pub const ANONYMOUS_USER: &str = "anonymous_user_id_get_key_from_request_header";

pub fn is_anonymous(user: &str) -> bool {
    let user = user.trim();
    user.is_empty() || user == ANONYMOUS_USER
}

// ---------------------------------------------------------------------------
// User directory
// ---------------------------------------------------------------------------

/// What the embedding application must supply.
pub trait UserDirectory: Send + Sync {
    /// The stored public key for `user`, or `None` when unknown.
    fn load_public_key(&self, user: &str) -> Option<PublicPoint>;

    /// The user the current request is authenticated as.
    fn current_user(&self) -> Option<String>;
}

/// Default directory: knows nobody. Every lookup fails with a warning until
/// the application installs a real one.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnimplementedDirectory;

impl UserDirectory for UnimplementedDirectory {
    fn load_public_key(&self, user: &str) -> Option<PublicPoint> {
        warn!(user = %user, "no user directory configured; load_public_key must be implemented");
        None
    }

    fn current_user(&self) -> Option<String> {
        warn!("no user directory configured; current_user must be implemented");
        None
    }
}

/// In-memory directory for tests, tools and small deployments.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    keys: RwLock<HashMap<String, PublicPoint>>,
    current: RwLock<Option<String>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, user: impl Into<String>, key: PublicPoint) -> Self {
        self.insert(user, key);
        self
    }

    pub fn insert(&self, user: impl Into<String>, key: PublicPoint) {
        self.keys.write().insert(user.into(), key);
    }

    pub fn remove(&self, user: &str) -> bool {
        self.keys.write().remove(user).is_some()
    }

    pub fn set_current_user(&self, user: Option<&str>) {
        *self.current.write() = user.map(str::to_string);
    }
}

impl UserDirectory for StaticDirectory {
    fn load_public_key(&self, user: &str) -> Option<PublicPoint> {
        self.keys.read().get(user).cloned()
    }

    fn current_user(&self) -> Option<String> {
        self.current.read().clone()
    }
}

// ---------------------------------------------------------------------------
// Authenticator
// ---------------------------------------------------------------------------

pub struct Authenticator {
    cache: Arc<ContextCache>,
    directory: Arc<dyn UserDirectory>,
    clock: SharedClock,
}

impl Authenticator {
    pub fn new(cache: Arc<ContextCache>, directory: Arc<dyn UserDirectory>, clock: SharedClock) -> Self {
        Self {
            cache,
            directory,
            clock,
        }
    }

    pub fn cache(&self) -> &ContextCache {
        &self.cache
    }

    /// Cached context for `user`, loading it from the directory on a miss or
    /// once the cached one has expired. Does not touch any request scope.
    pub fn resolve(&self, user: &str) -> GuardResult<SharedContext> {
        if is_anonymous(user) {
            return Err(GuardError::new(
                ErrorCode::UserPublicKeyUnavailable,
                "anonymous requests carry no user public key",
            ));
        }

        let now = self.clock.now();
        if let Some(context) = self.cache.get(user) {
            if !context.is_cleared() && !context.is_expired(now, self.cache.ttl()) {
                debug!(user = %user, "user context cache hit");
                return Ok(context);
            }
        }

        let key = self.directory.load_public_key(user).ok_or_else(|| {
            GuardError::new(
                ErrorCode::UserPublicKeyUnavailable,
                format!("no public key on record for user {}", user),
            )
        })?;
        let loaded: SharedContext = Arc::new(UserContext::new(user, key, now));
        let context = self.cache.get_or_insert(loaded, now);
        debug!(user = %user, "user context loaded");
        Ok(context)
    }

    /// Resolve `user` and publish the context as the request's active one.
    pub fn authenticate(&self, user: &str, scope: &mut RequestScope) -> GuardResult<SharedContext> {
        let context = self.resolve(user)?;
        scope.publish(context.clone());
        Ok(context)
    }

    /// Authenticate whoever the directory says the current user is.
    pub fn authenticate_current(&self, scope: &mut RequestScope) -> GuardResult<SharedContext> {
        let user = self.directory.current_user().ok_or_else(|| {
            GuardError::new(ErrorCode::UserPublicKeyUnavailable, "no authenticated user for this request")
        })?;
        self.authenticate(&user, scope)
    }

    /// Drop any cached context for `user` and load it fresh.
    pub fn refresh_context(&self, user: &str, scope: &mut RequestScope) -> GuardResult<SharedContext> {
        self.cache.evict(user);
        self.authenticate(user, scope)
    }

    /// Cache a key supplied inline (registration) and publish it.
    pub fn register(&self, user: &str, key: PublicPoint, scope: &mut RequestScope) -> GuardResult<SharedContext> {
        if is_anonymous(user) {
            return Err(GuardError::new(
                ErrorCode::MissingRegistrationFields,
                "registration requires a named user",
            ));
        }
        let context: SharedContext = Arc::new(UserContext::new(user, key, self.clock.now()));
        self.cache.put(context.clone());
        scope.publish(context.clone());
        debug!(user = %user, "user context registered");
        Ok(context)
    }
}
