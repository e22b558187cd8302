//! User context cache: size-bounded and expire-after-write. Evicted contexts are wiped.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::user::SharedContext;
use crate::cache::{CacheStats, ExpiringCache, RemovalCause};
use crate::clock::SharedClock;
use crate::config::CacheSettings;

pub struct ContextCache {
    entries: ExpiringCache<String, SharedContext>,
}

impl ContextCache {
    pub fn new(settings: &CacheSettings, clock: SharedClock) -> Self {
        let entries = ExpiringCache::new("user-context", settings.max_size, settings.ttl(), clock)
            .with_removal_listener(|user: String, context: SharedContext, cause: RemovalCause| {
                // a replaced context may still be serving the request that loaded it
                if cause == RemovalCause::Replaced {
                    debug!(user = %user, "user context replaced");
                    return;
                }
                context.clear_sensitive_data();
                if cause.was_evicted() {
                    info!(user = %user, cause = %cause, "user context evicted and wiped");
                } else {
                    debug!(user = %user, cause = %cause, "user context removed and wiped");
                }
            });
        Self { entries }
    }

    pub fn get(&self, user: &str) -> Option<SharedContext> {
        self.entries.get(user)
    }

    /// Store under the context's own user name.
    pub fn put(&self, context: SharedContext) {
        self.entries.insert(context.user().to_string(), context);
    }

    /// Store `context` unless a usable one is already cached for the same
    /// user, in which case that one is returned instead. Concurrent loads of
    /// one user therefore converge on a single shared context.
    pub fn get_or_insert(&self, context: SharedContext, now: DateTime<Utc>) -> SharedContext {
        let ttl = self.entries.ttl();
        let user = context.user().to_string();
        match self
            .entries
            .write_unless(user, context.clone(), |current| {
                !current.is_cleared() && !current.is_expired(now, ttl)
            }) {
            Ok(()) => context,
            Err(live) => live,
        }
    }

    pub fn evict(&self, user: &str) -> bool {
        self.entries.invalidate(user)
    }

    pub fn clear(&self) -> usize {
        self.entries.clear()
    }

    pub fn cleanup(&self) -> usize {
        self.entries.cleanup()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.entries.ttl()
    }

    pub fn stats(&self) -> CacheStats {
        self.entries.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::context::UserContext;
    use crate::crypto::generate_key_pair;
    use std::sync::Arc;

    fn setup(size: usize) -> (ContextCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (ContextCache::new(&CacheSettings::new(size, 1), clock.clone()), clock)
    }

    fn context(user: &str) -> SharedContext {
        Arc::new(UserContext::new(user, generate_key_pair().public, Utc::now()))
    }

    #[test]
    fn ttl_eviction_wipes_outstanding_handles() {
        let (cache, clock) = setup(10);
        cache.put(context("bob"));
        let held = cache.get("bob").unwrap();
        assert!(held.public_key().is_some());

        clock.advance(chrono::Duration::minutes(1));
        assert!(cache.get("bob").is_none());
        assert!(held.is_cleared());
        assert!(held.public_key().is_none());
    }

    #[test]
    fn size_eviction_wipes() {
        let (cache, _) = setup(1);
        let alice = context("alice");
        cache.put(alice.clone());
        cache.put(context("bob"));
        assert!(alice.is_cleared());
        assert!(cache.get("bob").is_some());
    }

    #[test]
    fn replacing_a_context_leaves_held_handles_usable() {
        let (cache, _) = setup(4);
        let first = context("bob");
        cache.put(first.clone());
        cache.put(context("bob"));
        assert!(!first.is_cleared());
        assert!(!Arc::ptr_eq(&first, &cache.get("bob").unwrap()));
    }

    #[test]
    fn get_or_insert_keeps_the_live_context() {
        let (cache, clock) = setup(4);
        let first = context("bob");
        let stored = cache.get_or_insert(first.clone(), clock.now());
        assert!(Arc::ptr_eq(&first, &stored));

        let second = context("bob");
        let stored = cache.get_or_insert(second.clone(), clock.now());
        assert!(Arc::ptr_eq(&first, &stored));
        assert!(!second.is_cleared());

        first.clear_sensitive_data();
        let stored = cache.get_or_insert(second.clone(), clock.now());
        assert!(Arc::ptr_eq(&second, &stored));
    }

    #[test]
    fn explicit_evict_and_clear() {
        let (cache, _) = setup(4);
        let bob = context("bob");
        cache.put(bob.clone());
        cache.put(context("carol"));
        assert!(cache.evict("bob"));
        assert!(bob.is_cleared());
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }
}
