//! secp256k1 key material: parsing, generation, and hex forms.
//!
//! Coordinates are carried as 64-char lowercase hex, zero-padded on the
//! left. Input is accepted in either case, with or without a `0x` prefix.

use core::fmt;

use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

/// Scalar and coordinate width in bytes.
pub const FIELD_BYTES: usize = 32;

/// Scalar and coordinate width in hex characters.
pub const FIELD_HEX_LEN: usize = FIELD_BYTES * 2;

fn strip_hex_prefix(input: &str) -> &str {
    let trimmed = input.trim();
    trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
}

/// Decode a big-endian field element, left-padding to 32 bytes.
fn decode_field(input: &str) -> Result<Zeroizing<[u8; FIELD_BYTES]>, CryptoError> {
    let digits = strip_hex_prefix(input);
    if digits.is_empty() {
        return Err(CryptoError::InvalidKey);
    }
    let raw = Zeroizing::new(hex::decode(digits).map_err(|_| CryptoError::InvalidKey)?);
    if raw.len() > FIELD_BYTES {
        return Err(CryptoError::InvalidKey);
    }
    let mut out = Zeroizing::new([0u8; FIELD_BYTES]);
    out[FIELD_BYTES - raw.len()..].copy_from_slice(&raw);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Private key
// ---------------------------------------------------------------------------

/// A secp256k1 private scalar. Zeroized on drop.
#[derive(Clone)]
pub struct PrivateKey(SecretKey);

impl PrivateKey {
    /// Parse a hex scalar (`0x` prefix optional, up to 64 hex chars).
    pub fn from_hex(input: &str) -> Result<Self, CryptoError> {
        let bytes = decode_field(input)?;
        SecretKey::from_slice(&bytes[..])
            .map(Self)
            .map_err(|_| CryptoError::InvalidKey)
    }

    /// Fresh random key from the OS RNG.
    pub fn generate() -> Self {
        Self(SecretKey::random(&mut OsRng))
    }

    pub fn public_point(&self) -> PublicPoint {
        PublicPoint::from_public_key(&self.0.public_key())
    }

    /// 64-char lowercase hex, zero-padded.
    pub fn to_hex(&self) -> Zeroizing<String> {
        let mut bytes = Zeroizing::new([0u8; FIELD_BYTES]);
        bytes.copy_from_slice(&self.0.to_bytes());
        Zeroizing::new(hex::encode(&bytes[..]))
    }

    pub(crate) fn secret(&self) -> &SecretKey {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

// ---------------------------------------------------------------------------
// Public point
// ---------------------------------------------------------------------------

/// Raw coordinate pair as it appears on the wire, before validation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinates {
    #[serde(default)]
    pub x: String,
    #[serde(default)]
    pub y: String,
}

impl Coordinates {
    pub fn new(x: impl Into<String>, y: impl Into<String>) -> Self {
        Self {
            x: x.into(),
            y: y.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.x.trim().is_empty() && !self.y.trim().is_empty()
    }
}

/// A validated point on secp256k1.
///
/// Only constructible from coordinates that lie on the curve. Wiped on drop,
/// since cached user contexts hold these for their whole TTL.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(try_from = "Coordinates")]
pub struct PublicPoint {
    x: String,
    y: String,
}

impl PublicPoint {
    pub fn from_coordinates(x: &str, y: &str) -> Result<Self, CryptoError> {
        let xb = decode_field(x)?;
        let yb = decode_field(y)?;

        let mut sec1 = [0u8; 1 + 2 * FIELD_BYTES];
        sec1[0] = 0x04;
        sec1[1..1 + FIELD_BYTES].copy_from_slice(&xb[..]);
        sec1[1 + FIELD_BYTES..].copy_from_slice(&yb[..]);
        PublicKey::from_sec1_bytes(&sec1).map_err(|_| CryptoError::InvalidKey)?;

        Ok(Self {
            x: hex::encode(&xb[..]),
            y: hex::encode(&yb[..]),
        })
    }

    pub fn from_public_key(key: &PublicKey) -> Self {
        let point = key.to_encoded_point(false);
        // Uncompressed, non-identity encoding always carries both coordinates.
        let x = point.x().map(hex::encode).unwrap_or_default();
        let y = point.y().map(hex::encode).unwrap_or_default();
        Self { x, y }
    }

    pub fn x(&self) -> &str {
        &self.x
    }

    pub fn y(&self) -> &str {
        &self.y
    }

    /// `04 || x || y`, the SEC1 uncompressed form in hex.
    pub fn to_uncompressed_hex(&self) -> String {
        format!("04{}{}", self.x, self.y)
    }

    pub fn to_coordinates(&self) -> Coordinates {
        Coordinates::new(self.x.clone(), self.y.clone())
    }

    pub(crate) fn to_public_key(&self) -> Result<PublicKey, CryptoError> {
        let bytes = hex::decode(self.to_uncompressed_hex()).map_err(|_| CryptoError::InvalidKey)?;
        PublicKey::from_sec1_bytes(&bytes).map_err(|_| CryptoError::InvalidKey)
    }
}

impl TryFrom<Coordinates> for PublicPoint {
    type Error = CryptoError;

    fn try_from(value: Coordinates) -> Result<Self, Self::Error> {
        Self::from_coordinates(&value.x, &value.y)
    }
}

// ---------------------------------------------------------------------------
// Key pair
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct KeyPair {
    pub private: PrivateKey,
    pub public: PublicPoint,
}

pub fn generate_key_pair() -> KeyPair {
    let private = PrivateKey::generate();
    let public = private.public_point();
    KeyPair { private, public }
}
