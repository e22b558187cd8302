//! Security service: validates inputs, calls the crypto engine with the
//! server key, and reports failures as [`GuardError`]s.

use chrono::{DateTime, Utc};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tracing::{debug, error};

use crate::config::GuardConfig;
use crate::crypto::{self, PrivateKey, PublicPoint, SecurityEnvelope};
use crate::error::{CryptoError, ErrorCode, GuardError, GuardResult};

/// The service's own public key, fixed at construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPublicKey {
    pub point: PublicPoint,
    pub published_at: DateTime<Utc>,
}

impl ServerPublicKey {
    pub fn x(&self) -> &str {
        self.point.x()
    }

    pub fn y(&self) -> &str {
        self.point.y()
    }
}

#[derive(Debug)]
pub struct SecurityService {
    private_key: PrivateKey,
    server_key: ServerPublicKey,
}

impl SecurityService {
    pub fn new(private_key: PrivateKey) -> Self {
        let server_key = ServerPublicKey {
            point: private_key.public_point(),
            published_at: Utc::now(),
        };
        Self {
            private_key,
            server_key,
        }
    }

    /// Build from configured key material. The configured public coordinates
    /// must belong to the configured private key.
    pub fn from_config(config: &GuardConfig) -> GuardResult<Self> {
        let private_key = crypto::build_private_key(config.private_key.expose())
            .map_err(|e| GuardError::crypto(ErrorCode::InvalidKey, e).with_context("server private key"))?;
        let configured = crypto::build_public_key(&config.public_key_x, &config.public_key_y)
            .map_err(|e| GuardError::crypto(ErrorCode::InvalidKey, e).with_context("server public key"))?;

        let service = Self::new(private_key);
        let derived = service.server_key.point.to_uncompressed_hex();
        let matches: bool = derived
            .as_bytes()
            .ct_eq(configured.to_uncompressed_hex().as_bytes())
            .into();
        if !matches {
            return Err(GuardError::new(
                ErrorCode::InvalidKey,
                "configured public key does not match the private key",
            ));
        }
        Ok(service)
    }

    pub fn server_public_key(&self) -> &ServerPublicKey {
        &self.server_key
    }

    /// Encrypt for the holder of `(x, y)`, signed by the server key.
    pub fn encrypt(&self, plaintext: &str, x: &str, y: &str) -> GuardResult<SecurityEnvelope> {
        let recipient = crypto::build_public_key(x, y)
            .map_err(|e| GuardError::crypto(ErrorCode::InvalidKey, e).with_context("recipient public key"))?;
        self.encrypt_for(plaintext, &recipient)
    }

    pub fn encrypt_for(&self, plaintext: &str, recipient: &PublicPoint) -> GuardResult<SecurityEnvelope> {
        crypto::encrypt(plaintext, recipient, &self.private_key).map_err(|e| {
            error!(error = %e, "response encryption failed");
            GuardError::crypto(ErrorCode::EncryptionFailed, e)
        })
    }

    /// Decrypt an envelope addressed to the server key.
    ///
    /// Envelopes missing ciphertext, IV or ephemeral coordinates are rejected
    /// before any cryptographic work.
    pub fn decrypt(&self, envelope: &SecurityEnvelope) -> GuardResult<String> {
        if let Some(field) = envelope.missing_field() {
            return Err(GuardError::new(
                ErrorCode::DecryptionFailed,
                format!("envelope is missing {}", field),
            ));
        }
        crypto::decrypt(envelope, &self.private_key).map_err(|e| {
            debug!(error = %e, "envelope decryption failed");
            GuardError::crypto(ErrorCode::DecryptionFailed, e)
        })
    }

    /// Check `signature` over `message` against the key `(x, y)`.
    pub fn verify(&self, message: &str, signature: &str, x: &str, y: &str) -> GuardResult<bool> {
        let key = crypto::build_public_key(x, y)
            .map_err(|e| GuardError::crypto(ErrorCode::InvalidKey, e).with_context("signer public key"))?;
        self.verify_with(message, signature, &key)
    }

    pub fn verify_with(&self, message: &str, signature: &str, key: &PublicPoint) -> GuardResult<bool> {
        crypto::verify(message, signature, key).map_err(|e| match e {
            CryptoError::InvalidKey => GuardError::crypto(ErrorCode::InvalidKey, e),
            _ => GuardError::crypto(ErrorCode::SignatureInvalid, e),
        })
    }

    /// Sign with the server key.
    pub fn sign(&self, message: &str) -> GuardResult<String> {
        crypto::sign(message, &self.private_key).map_err(|e| GuardError::crypto(ErrorCode::EncryptionFailed, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecretHex;
    use crate::crypto::generate_key_pair;

    fn config_for(pair: &crypto::KeyPair) -> GuardConfig {
        GuardConfig {
            private_key: SecretHex::new(pair.private.to_hex().as_str()),
            public_key_x: pair.public.x().to_string(),
            public_key_y: pair.public.y().to_string(),
            ..GuardConfig::default()
        }
    }

    #[test]
    fn from_config_checks_key_pair() {
        let pair = generate_key_pair();
        let svc = SecurityService::from_config(&config_for(&pair)).unwrap();
        assert_eq!(svc.server_public_key().point, pair.public);

        let mut mismatched = config_for(&pair);
        let other = generate_key_pair();
        mismatched.public_key_x = other.public.x().to_string();
        mismatched.public_key_y = other.public.y().to_string();
        let err = SecurityService::from_config(&mismatched).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidKey);

        let mut bad = config_for(&pair);
        bad.private_key = SecretHex::new("not-hex");
        assert_eq!(SecurityService::from_config(&bad).unwrap_err().code(), ErrorCode::InvalidKey);
    }

    #[test]
    fn missing_fields_fail_before_crypto() {
        let svc = SecurityService::new(PrivateKey::generate());
        let env = SecurityEnvelope {
            ciphertext: "00".into(),
            iv: String::new(),
            ..SecurityEnvelope::default()
        };
        let err = svc.decrypt(&env).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DecryptionFailed);
        assert_eq!(err.message(), "envelope is missing iv");
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn encrypt_and_decrypt_through_service() {
        let server = SecurityService::new(PrivateKey::generate());
        let client = generate_key_pair();

        let to_server = crypto::encrypt("ping", &server.server_public_key().point, &client.private).unwrap();
        assert_eq!(server.decrypt(&to_server).unwrap(), "ping");

        let reply = server.encrypt("pong", client.public.x(), client.public.y()).unwrap();
        assert!(crypto::verify(&reply.ciphertext, &reply.signature, &server.server_public_key().point).unwrap());
        assert_eq!(crypto::decrypt(&reply, &client.private).unwrap(), "pong");
    }

    #[test]
    fn verify_error_codes() {
        let svc = SecurityService::new(PrivateKey::generate());
        let pair = generate_key_pair();
        let sig = svc.sign("m").unwrap();
        let server = &svc.server_public_key().point;
        assert!(svc.verify("m", &sig, server.x(), server.y()).unwrap());
        assert!(!svc.verify("m", &sig, pair.public.x(), pair.public.y()).unwrap());
        assert_eq!(svc.verify("m", "zz", server.x(), server.y()).unwrap_err().code(), ErrorCode::SignatureInvalid);
        assert_eq!(svc.verify("m", &sig, "", server.y()).unwrap_err().code(), ErrorCode::InvalidKey);
    }
}
