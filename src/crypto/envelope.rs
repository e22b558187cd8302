//! The JSON envelope exchanged in request and response bodies.
//!
//! ```json
//! {
//!   "ciphertext": "<hex ct || tag>",
//!   "iv": "<hex, 12 bytes>",
//!   "signature": "<hex DER ECDSA over the ciphertext hex>",
//!   "tempPublicKey": { "x": "<64 hex>", "y": "<64 hex>" }
//! }
//! ```
//!
//! Fields missing from the JSON deserialize as empty so that
//! [`SecurityEnvelope::missing_field`] can report them before any crypto.

use serde::{Deserialize, Serialize};

use super::keys::Coordinates;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityEnvelope {
    pub ciphertext: String,
    pub iv: String,
    pub signature: String,
    #[serde(rename = "tempPublicKey", alias = "ephemeralPublicKey")]
    pub ephemeral_public_key: Option<Coordinates>,
}

impl SecurityEnvelope {
    pub fn from_json(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// First required field that is absent or blank.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.ciphertext.trim().is_empty() {
            return Some("ciphertext");
        }
        if self.iv.trim().is_empty() {
            return Some("iv");
        }
        match &self.ephemeral_public_key {
            None => Some("tempPublicKey"),
            Some(c) if c.x.trim().is_empty() => Some("tempPublicKey.x"),
            Some(c) if c.y.trim().is_empty() => Some("tempPublicKey.y"),
            Some(_) => None,
        }
    }
}
