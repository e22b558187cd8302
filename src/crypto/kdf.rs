//! KDF: AES key = SHA-256(ECDH shared x-coordinate), first 32 bytes.
//!
//! This is a bare hash, not HKDF: no salt, no context binding. Peers derive
//! the key the same way, so changing it breaks every existing client.

use k256::{PublicKey, SecretKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::aead::KEY_BYTES;

/// ECDH on secp256k1, returning the affine x-coordinate of the shared point.
pub fn agree(secret: &SecretKey, public: &PublicKey) -> Zeroizing<[u8; 32]> {
    let shared = k256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(shared.raw_secret_bytes());
    out
}

pub fn derive_key(shared_secret: &[u8]) -> Zeroizing<[u8; KEY_BYTES]> {
    let digest = Sha256::digest(shared_secret);
    let mut key = Zeroizing::new([0u8; KEY_BYTES]);
    key.copy_from_slice(&digest[..KEY_BYTES]);
    key
}
