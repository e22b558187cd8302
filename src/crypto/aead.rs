//! AEAD: AES-256-GCM, 96-bit IV, 128-bit tag, no associated data.
//!
//! Output layout is `ciphertext || tag`, the same as a GCM block cipher
//! that appends the tag on `doFinal`.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use getrandom::getrandom;

use crate::error::CryptoError;

pub const KEY_BYTES: usize = 32;
pub const IV_BYTES: usize = 12;
pub const TAG_BYTES: usize = 16;

/// Generate a random 12-byte IV. Used during encryption only.
pub fn iv() -> Result<[u8; IV_BYTES], CryptoError> {
    let mut n = [0u8; IV_BYTES];
    getrandom(&mut n).map_err(|_| CryptoError::EncryptionFailed)?;
    Ok(n)
}

pub fn aead_seal(
    key: &[u8; KEY_BYTES],
    iv: &[u8; IV_BYTES],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptionFailed)?;
    let n = Nonce::from_slice(iv);
    let payload = Payload { msg: plaintext, aad: &[] };
    cipher.encrypt(n, payload).map_err(|_| CryptoError::EncryptionFailed)
}

pub fn aead_open(
    key: &[u8; KEY_BYTES],
    iv: &[u8; IV_BYTES],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_BYTES {
        return Err(CryptoError::DecryptionFailed);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::DecryptionFailed)?;
    let n = Nonce::from_slice(iv);
    let payload = Payload { msg: ciphertext, aad: &[] };
    cipher.decrypt(n, payload).map_err(|_| CryptoError::DecryptionFailed)
}
