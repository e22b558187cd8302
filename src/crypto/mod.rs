//! The crypto engine: ECIES and ECDSA on secp256k1.
//!
//! Stateless. Every function either returns its result or a [`CryptoError`];
//! nothing retries.
//!
//! Encryption:
//!
//! 1. fresh ephemeral key pair
//! 2. ECDH(ephemeral, recipient) shared x-coordinate
//! 3. AES key = SHA-256(shared)[..32] (see [`kdf`])
//! 4. random 12-byte IV
//! 5. AES-256-GCM, no AAD
//! 6. signer's ECDSA signature over the ciphertext hex
//!
//! Decryption runs steps 2-5 in reverse with the recipient's private key and
//! the ephemeral public key from the envelope. It never checks the signature;
//! that is the caller's decision (see `dispatch`).

mod aead;
mod envelope;
mod kdf;
mod keys;

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};

pub use aead::{IV_BYTES, KEY_BYTES, TAG_BYTES};
pub use envelope::SecurityEnvelope;
pub use keys::{generate_key_pair, Coordinates, KeyPair, PrivateKey, PublicPoint, FIELD_BYTES, FIELD_HEX_LEN};

use crate::error::CryptoError;

pub fn build_private_key(hex: &str) -> Result<PrivateKey, CryptoError> {
    PrivateKey::from_hex(hex)
}

pub fn build_public_key(x: &str, y: &str) -> Result<PublicPoint, CryptoError> {
    PublicPoint::from_coordinates(x, y)
}

// ---------------------------------------------------------------------------
// ECDSA
// ---------------------------------------------------------------------------

/// ECDSA-SHA256 over the UTF-8 bytes of `message`, DER-encoded, hex.
pub fn sign(message: &str, key: &PrivateKey) -> Result<String, CryptoError> {
    let signing_key = SigningKey::from(key.secret());
    let signature: Signature = signing_key
        .try_sign(message.as_bytes())
        .map_err(|_| CryptoError::EncryptionFailed)?;
    Ok(hex::encode(signature.to_der().as_bytes()))
}

/// Verify a hex signature (DER or fixed 64-byte `r || s`).
///
/// `Ok(false)` on any mismatch. `Err` only when the signature itself cannot
/// be decoded.
pub fn verify(message: &str, signature_hex: &str, key: &PublicPoint) -> Result<bool, CryptoError> {
    let raw = hex::decode(signature_hex.trim()).map_err(|_| CryptoError::MalformedSignature)?;
    let signature = Signature::from_der(&raw)
        .or_else(|_| Signature::from_slice(&raw))
        .map_err(|_| CryptoError::MalformedSignature)?;
    // Other ECDSA stacks may emit high-S; k256 only accepts the low-S form.
    let signature = signature.normalize_s().unwrap_or(signature);

    let verifying_key = VerifyingKey::from(key.to_public_key()?);
    Ok(verifying_key.verify(message.as_bytes(), &signature).is_ok())
}

// ---------------------------------------------------------------------------
// ECIES
// ---------------------------------------------------------------------------

pub fn encrypt(
    plaintext: &str,
    recipient: &PublicPoint,
    signer: &PrivateKey,
) -> Result<SecurityEnvelope, CryptoError> {
    let recipient_key = recipient.to_public_key()?;
    let ephemeral = PrivateKey::generate();

    let shared = kdf::agree(ephemeral.secret(), &recipient_key);
    let key = kdf::derive_key(&shared[..]);
    let iv = aead::iv()?;
    let sealed = aead::aead_seal(&key, &iv, plaintext.as_bytes())?;

    let ciphertext = hex::encode(sealed);
    let signature = sign(&ciphertext, signer)?;

    Ok(SecurityEnvelope {
        ciphertext,
        iv: hex::encode(iv),
        signature,
        ephemeral_public_key: Some(ephemeral.public_point().to_coordinates()),
    })
}

pub fn decrypt(envelope: &SecurityEnvelope, recipient: &PrivateKey) -> Result<String, CryptoError> {
    let coords = envelope
        .ephemeral_public_key
        .as_ref()
        .ok_or(CryptoError::DecryptionFailed)?;
    let ephemeral = PublicPoint::from_coordinates(&coords.x, &coords.y)
        .and_then(|p| p.to_public_key())
        .map_err(|_| CryptoError::DecryptionFailed)?;

    let sealed = hex::decode(envelope.ciphertext.trim()).map_err(|_| CryptoError::DecryptionFailed)?;
    let iv: [u8; IV_BYTES] = hex::decode(envelope.iv.trim())
        .map_err(|_| CryptoError::DecryptionFailed)?
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::DecryptionFailed)?;

    let shared = kdf::agree(recipient.secret(), &ephemeral);
    let key = kdf::derive_key(&shared[..]);
    let plaintext = aead::aead_open(&key, &iv, &sealed)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
}
