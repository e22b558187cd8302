//! End-to-end request flows through a `Shield`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ecc_guard::crypto::{self, generate_key_pair, KeyPair};
use ecc_guard::{
    CacheSettings, Classification, Clock, DecryptStrategy, ErrorCode, GuardAction, GuardConfig, InMemoryAuditSink,
    InboundRequest, ManualClock, Recipient, RequestScope, ResponseBody, SecretHex, Shield, StaticDirectory,
    UniquePolicy,
};

const START: &str = "2024-05-01T12:00:00Z";

struct Harness {
    shield: Shield,
    server: KeyPair,
    directory: Arc<StaticDirectory>,
    clock: Arc<ManualClock>,
    audit: InMemoryAuditSink,
}

fn harness_with(tune: impl FnOnce(&mut GuardConfig)) -> Harness {
    let server = generate_key_pair();
    let mut config = GuardConfig {
        private_key: SecretHex::new(server.private.to_hex().as_str()),
        public_key_x: server.public.x().to_string(),
        public_key_y: server.public.y().to_string(),
        ..GuardConfig::default()
    };
    tune(&mut config);

    let start: DateTime<Utc> = START.parse().unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let directory = Arc::new(StaticDirectory::new());
    let audit = InMemoryAuditSink::new();
    let shield = Shield::builder(config)
        .directory(directory.clone())
        .clock(clock.clone())
        .audit_sink(Arc::new(audit.clone()))
        .build()
        .unwrap();
    Harness {
        shield,
        server,
        directory,
        clock,
        audit,
    }
}

fn harness() -> Harness {
    harness_with(|_| {})
}

fn envelope_body(plaintext: &str, to: &KeyPair, signer: &KeyPair) -> String {
    crypto::encrypt(plaintext, &to.public, &signer.private)
        .unwrap()
        .to_json()
        .unwrap()
}

fn post(body: String) -> InboundRequest {
    InboundRequest::new("POST", "/api").with_remote_addr("10.0.0.1").with_body(body)
}

fn stamped(h: &Harness, ip: &str) -> InboundRequest {
    InboundRequest::new("GET", "/api")
        .with_remote_addr(ip)
        .with_header("X-Timestamp", h.clock.now().to_rfc3339())
}

// ---------------------------------------------------------------------------
// Decrypt strategies
// ---------------------------------------------------------------------------

#[test]
fn login_bootstrap_publishes_context() {
    let h = harness();
    let alice = generate_key_pair();
    h.directory.insert("alice", alice.public.clone());

    let login = "{\"username\":\"alice\",\"password\":\"pw\"}";
    let req = post(envelope_body(login, &h.server, &alice));
    let class = Classification::new().with_decryption(DecryptStrategy::AnonymousBootstrap);
    let mut scope = RequestScope::new();

    assert_eq!(h.shield.inbound(&req, &class, &mut scope).unwrap(), login);
    assert_eq!(scope.user(), Some("alice"));

    // The response goes back to the same context.
    let ResponseBody::Encrypted(resp) = h.shield.outbound("{\"token\":\"t\"}", Recipient::Active, &mut scope).unwrap()
    else {
        panic!("expected encrypted response");
    };
    assert!(crypto::verify(&resp.envelope.ciphertext, &resp.envelope.signature, &h.server.public).unwrap());
    assert_eq!(crypto::decrypt(&resp.envelope, &alice.private).unwrap(), "{\"token\":\"t\"}");

    let actions: Vec<GuardAction> = h.audit.events().into_iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            GuardAction::DecryptSucceeded {
                strategy: DecryptStrategy::AnonymousBootstrap
            },
            GuardAction::ResponseEncrypted,
        ]
    );
}

#[test]
fn bootstrap_without_username_is_rejected() {
    let h = harness();
    let alice = generate_key_pair();
    let req = post(envelope_body("{\"password\":\"pw\"}", &h.server, &alice));
    let class = Classification::new().with_decryption(DecryptStrategy::AnonymousBootstrap);
    let mut scope = RequestScope::new();

    let err = h.shield.inbound(&req, &class, &mut scope).unwrap_err();
    assert_eq!(err.code(), ErrorCode::MissingUsername);
    assert!(scope.is_empty());
}

#[test]
fn bootstrap_signed_by_someone_else_clears_scope() {
    let h = harness();
    let alice = generate_key_pair();
    let mallory = generate_key_pair();
    h.directory.insert("alice", alice.public.clone());

    let req = post(envelope_body("{\"username\":\"alice\"}", &h.server, &mallory));
    let class = Classification::new().with_decryption(DecryptStrategy::AnonymousBootstrap);
    let mut scope = RequestScope::new();

    let err = h.shield.inbound(&req, &class, &mut scope).unwrap_err();
    assert_eq!(err.code(), ErrorCode::SignatureInvalid);
    assert!(scope.is_empty());
    assert_eq!(h.audit.failures()[0].code.as_deref(), Some("SIGNATURE_INVALID"));
}

#[test]
fn registration_then_authenticated_request() {
    let h = harness();
    let bob = generate_key_pair();

    let registration = format!(
        "{{\"username\":\"bob\",\"userPublicX\":\"{}\",\"userPublicY\":\"{}\"}}",
        bob.public.x(),
        bob.public.y()
    );
    let class = Classification::new().with_decryption(DecryptStrategy::Registration);
    let mut scope = RequestScope::new();
    let plaintext = h
        .shield
        .inbound(&post(envelope_body(&registration, &h.server, &bob)), &class, &mut scope)
        .unwrap();
    assert_eq!(plaintext, registration);
    assert_eq!(scope.user(), Some("bob"));

    // Bob's key is only in the context cache, not in the directory.
    h.directory.set_current_user(Some("bob"));
    let class = Classification::new().with_decryption(DecryptStrategy::Authenticated);
    let mut next = RequestScope::new();
    let body = h
        .shield
        .inbound(&post(envelope_body("{\"op\":1}", &h.server, &bob)), &class, &mut next)
        .unwrap();
    assert_eq!(body, "{\"op\":1}");
}

#[test]
fn registration_with_mismatched_key_is_rejected() {
    let h = harness();
    let bob = generate_key_pair();
    let other = generate_key_pair();
    let registration = format!(
        "{{\"username\":\"bob\",\"userPublicX\":\"{}\",\"userPublicY\":\"{}\"}}",
        other.public.x(),
        other.public.y()
    );
    let class = Classification::new().with_decryption(DecryptStrategy::Registration);
    let mut scope = RequestScope::new();
    let err = h
        .shield
        .inbound(&post(envelope_body(&registration, &h.server, &bob)), &class, &mut scope)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::SignatureInvalid);
    assert!(h.shield.authenticator().unwrap().cache().is_empty());

    let missing = post(envelope_body("{\"username\":\"bob\"}", &h.server, &bob));
    let err = h.shield.inbound(&missing, &class, &mut scope).unwrap_err();
    assert_eq!(err.code(), ErrorCode::MissingRegistrationFields);
}

#[test]
fn authenticated_without_current_user_is_rejected() {
    let h = harness();
    let alice = generate_key_pair();
    let class = Classification::new().with_decryption(DecryptStrategy::Authenticated);
    let err = h
        .shield
        .inbound(&post(envelope_body("{}", &h.server, &alice)), &class, &mut RequestScope::new())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::UserPublicKeyUnavailable);
}

// ---------------------------------------------------------------------------
// Replay guard
// ---------------------------------------------------------------------------

#[test]
fn replayed_timestamp_from_same_ip_is_rejected() {
    let h = harness();
    let class = Classification::new().with_replay_protection();

    let first = stamped(&h, "10.0.0.1");
    h.shield.inbound(&first, &class, &mut RequestScope::new()).unwrap();
    let err = h.shield.inbound(&first, &class, &mut RequestScope::new()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ReplayAttackDetected);

    // Same timestamp from another address is a different fingerprint.
    let other = stamped(&h, "10.0.0.2");
    h.shield.inbound(&other, &class, &mut RequestScope::new()).unwrap();
}

#[test]
fn replay_fingerprint_expires_with_cache_ttl() {
    let h = harness_with(|c| {
        c.replay_attack.cache = CacheSettings::new(100, 1);
        c.replay_attack.policy.time_window_ms = 600_000;
    });
    let class = Classification::new().with_replay_protection();
    let req = stamped(&h, "10.0.0.1");

    h.shield.inbound(&req, &class, &mut RequestScope::new()).unwrap();
    h.clock.advance(Duration::seconds(30));
    assert_eq!(
        h.shield.inbound(&req, &class, &mut RequestScope::new()).unwrap_err().code(),
        ErrorCode::ReplayAttackDetected
    );

    h.clock.advance(Duration::seconds(31));
    h.shield.inbound(&req, &class, &mut RequestScope::new()).unwrap();
}

#[test]
fn timestamp_window_edges() {
    let h = harness();
    let class = Classification::new().with_replay_protection();
    let now = h.clock.now();
    let at = |t: DateTime<Utc>, ip: &str| {
        InboundRequest::new("GET", "/")
            .with_remote_addr(ip)
            .with_header("X-Timestamp", t.to_rfc3339())
    };

    // Exactly the window is still accepted.
    h.shield
        .inbound(&at(now - Duration::milliseconds(300_000), "a"), &class, &mut RequestScope::new())
        .unwrap();

    let err = h
        .shield
        .inbound(&at(now - Duration::milliseconds(300_001), "b"), &class, &mut RequestScope::new())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::TimestampExpired);

    h.shield
        .inbound(&at(now + Duration::seconds(60), "c"), &class, &mut RequestScope::new())
        .unwrap();
    let err = h
        .shield
        .inbound(&at(now + Duration::seconds(61), "d"), &class, &mut RequestScope::new())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::FutureTimestamp);

    let garbled = InboundRequest::new("GET", "/").with_header("X-Timestamp", "yesterday");
    let err = h.shield.inbound(&garbled, &class, &mut RequestScope::new()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidTimestampFormat);
    assert_eq!(err.timestamp(), Some("yesterday"));
}

// ---------------------------------------------------------------------------
// Uniqueness guard
// ---------------------------------------------------------------------------

#[test]
fn strict_mode_rejects_any_repeat() {
    let h = harness();
    let class = Classification::new().with_unique_protection();
    let from = |ip: &str| {
        InboundRequest::new("POST", "/orders")
            .with_remote_addr(ip)
            .with_header("X-Request-ID", "req-42")
    };

    h.shield.inbound(&from("10.0.0.1"), &class, &mut RequestScope::new()).unwrap();
    let err = h
        .shield
        .inbound(&from("10.0.0.2"), &class, &mut RequestScope::new())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::DuplicateRequest);
    assert_eq!(err.request_id(), Some("req-42"));
    assert!(err.message().contains("originalIP: 10.0.0.1"));
}

#[test]
fn lenient_mode_only_rejects_same_ip() {
    let h = harness();
    let policy = UniquePolicy {
        strict_mode: false,
        ..UniquePolicy::default()
    };
    let class = Classification::new().with_unique_policy(policy);
    let from = |ip: &str| {
        InboundRequest::new("POST", "/orders")
            .with_remote_addr(ip)
            .with_header("X-Request-ID", "req-7")
    };

    h.shield.inbound(&from("10.0.0.1"), &class, &mut RequestScope::new()).unwrap();
    h.shield.inbound(&from("10.0.0.2"), &class, &mut RequestScope::new()).unwrap();
    let err = h
        .shield
        .inbound(&from("10.0.0.2"), &class, &mut RequestScope::new())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::DuplicateRequest);

    let missing = InboundRequest::new("POST", "/orders");
    let err = h.shield.inbound(&missing, &class, &mut RequestScope::new()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::MissingRequestId);
}

// ---------------------------------------------------------------------------
// Context cache
// ---------------------------------------------------------------------------

#[test]
fn evicted_context_is_wiped_for_every_holder() {
    let h = harness_with(|c| c.user_context_cache = CacheSettings::new(1, 120));
    let alice = generate_key_pair();
    let bob = generate_key_pair();
    h.directory.insert("alice", alice.public.clone());
    h.directory.insert("bob", bob.public.clone());

    let auth = h.shield.authenticator().unwrap();
    let held = auth.resolve("alice").unwrap();
    assert!(held.public_key().is_some());

    auth.resolve("bob").unwrap();
    assert!(held.is_cleared());
    assert!(held.public_key().is_none());
    assert_eq!(auth.cache().len(), 1);
}

#[test]
fn expired_context_is_reloaded() {
    let h = harness();
    let alice = generate_key_pair();
    h.directory.insert("alice", alice.public.clone());
    let auth = h.shield.authenticator().unwrap();

    let first = auth.resolve("alice").unwrap();
    h.clock.advance(Duration::minutes(121));
    let second = auth.resolve("alice").unwrap();

    assert!(first.is_cleared());
    assert!(!second.is_cleared());
    assert!(second.loaded_at() > first.loaded_at());
}

// ---------------------------------------------------------------------------
// Pipeline switches
// ---------------------------------------------------------------------------

#[test]
fn preflight_and_disabled_pass_through() {
    let h = harness();
    let class = Classification::new()
        .with_replay_protection()
        .with_unique_protection()
        .with_decryption(DecryptStrategy::Authenticated);
    let preflight = InboundRequest::new("OPTIONS", "/api").with_body("raw");
    assert_eq!(h.shield.inbound(&preflight, &class, &mut RequestScope::new()).unwrap(), "raw");
    assert!(h.audit.is_empty());

    let disabled = Shield::builder(GuardConfig {
        enabled: false,
        ..GuardConfig::default()
    })
    .build()
    .unwrap();
    assert!(!disabled.is_enabled());
    let req = InboundRequest::new("POST", "/api").with_body("raw");
    assert_eq!(disabled.inbound(&req, &class, &mut RequestScope::new()).unwrap(), "raw");
}

#[test]
fn full_pipeline_with_all_guards() {
    let h = harness();
    let alice = generate_key_pair();
    h.directory.insert("alice", alice.public.clone());
    h.directory.set_current_user(Some("alice"));

    let class = Classification::new()
        .with_replay_protection()
        .with_unique_protection()
        .with_decryption(DecryptStrategy::Authenticated)
        .with_response_encryption();
    let req = post(envelope_body("{\"transfer\":5}", &h.server, &alice))
        .with_header("X-Timestamp", h.clock.now().to_rfc3339())
        .with_header("X-Request-ID", "t-1");
    let mut scope = RequestScope::new();

    assert_eq!(h.shield.inbound(&req, &class, &mut scope).unwrap(), "{\"transfer\":5}");
    let report = h.shield.cache_report().unwrap();
    assert_eq!(report.replay.size, 1);
    assert_eq!(report.unique_request.size, 1);
    assert_eq!(report.user_context.size, 1);

    // A second delivery trips the replay guard before anything else.
    let err = h.shield.inbound(&req, &class, &mut scope).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ReplayAttackDetected);
    assert!(scope.is_empty());
}
