//! # ECC Guard
//!
//! Request-security layer for HTTP services whose clients hold secp256k1
//! key pairs.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use ecc_guard::{
//!     crypto, Classification, DecryptStrategy, GuardConfig, InboundRequest, RequestScope,
//!     SecretHex, Shield, StaticDirectory,
//! };
//!
//! let server = crypto::generate_key_pair();
//! let config = GuardConfig {
//!     private_key: SecretHex::new(server.private.to_hex().as_str()),
//!     public_key_x: server.public.x().to_string(),
//!     public_key_y: server.public.y().to_string(),
//!     ..GuardConfig::default()
//! };
//!
//! let alice = crypto::generate_key_pair();
//! let directory = Arc::new(StaticDirectory::new().with_user("alice", alice.public.clone()));
//! directory.set_current_user(Some("alice"));
//! let shield = Shield::builder(config).directory(directory).build()?;
//!
//! let envelope = crypto::encrypt("{\"amount\":10}", &server.public, &alice.private)?;
//! let request = InboundRequest::new("POST", "/transfer").with_body(envelope.to_json()?);
//! let class = Classification::new().with_decryption(DecryptStrategy::Authenticated);
//! let mut scope = RequestScope::new();
//! assert_eq!(shield.inbound(&request, &class, &mut scope)?, "{\"amount\":10}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Security Properties
//!
//! - **ECIES envelopes**: ephemeral ECDH, AES-256-GCM, ECDSA over the ciphertext
//! - **Replay and duplicate guards**: timestamp window plus seen-fingerprint caches
//! - **Key-context hygiene**: evicted user contexts are wiped for every holder
//! - **Stable error codes**: every rejection carries a machine-readable code
//!
//! ## What's NOT Provided
//!
//! - HTTP framework integration
//! - Key rotation or revocation
//! - Shared state across processes
//! - A hardened KDF: the AES key is `SHA-256(shared x)` for wire compatibility

#![deny(unsafe_code)]

pub mod audit;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod replay;
pub mod request;
pub mod security;
pub mod shield;
pub mod unique;

pub use audit::{AuditSink, GuardAction, GuardEvent, InMemoryAuditSink, TracingAuditSink};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{CacheSettings, ConfigError, GuardConfig, SecretHex};
pub use context::{
    Authenticator, ContextCache, RequestScope, StaticDirectory, UserContext, UserDirectory, ANONYMOUS_USER,
};
pub use crypto::{Coordinates, KeyPair, PrivateKey, PublicPoint, SecurityEnvelope};
pub use dispatch::{DecryptStrategy, FieldNames};
pub use error::{CryptoError, ErrorCode, GuardError, GuardResult};
pub use replay::ReplayPolicy;
pub use request::InboundRequest;
pub use security::{SecurityService, ServerPublicKey};
pub use shield::{
    CacheReport, Classification, ClearReport, EncryptedResponse, Recipient, ResponseBody, Shield, ShieldBuilder,
};
pub use unique::UniquePolicy;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
