//! Error types for the guard layer.
//!
//! Two levels:
//!
//! - [`CryptoError`]: what the crypto engine reports. Messages never carry
//!   key material or the primitive's internal error text.
//! - [`GuardError`]: the single reportable error of the service layer. It
//!   carries a stable [`ErrorCode`], a sanitized message, optional request
//!   correlation, and the underlying cause via [`std::error::Error::source`].

use std::error::Error as StdError;
use std::fmt;

// ---------------------------------------------------------------------------
// Crypto engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Key is empty, not hex, or not valid for secp256k1.
    InvalidKey,
    /// Signature hex decodes but is neither DER nor fixed-width `r || s`.
    MalformedSignature,
    /// GCM tag mismatch, wrong key, malformed field, or non-UTF-8 plaintext.
    DecryptionFailed,
    /// Randomness or cipher failure on the encrypt path.
    EncryptionFailed,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "invalid key"),
            Self::MalformedSignature => write!(f, "malformed signature"),
            Self::DecryptionFailed => write!(f, "decryption failed"),
            Self::EncryptionFailed => write!(f, "encryption failed"),
        }
    }
}

impl StdError for CryptoError {}

// ---------------------------------------------------------------------------
// Stable error codes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    MissingTimestamp,
    InvalidTimestampFormat,
    TimestampExpired,
    FutureTimestamp,
    ReplayAttackDetected,
    MissingRequestId,
    DuplicateRequest,
    MissingUsername,
    MissingRegistrationFields,
    SignatureInvalid,
    InvalidKey,
    InvalidEnvelope,
    DecryptionFailed,
    EncryptionFailed,
    UserPublicKeyUnavailable,
    Configuration,
}

impl ErrorCode {
    /// Machine-readable code. Stable across releases.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingTimestamp => "MISSING_TIMESTAMP",
            Self::InvalidTimestampFormat => "INVALID_TIMESTAMP_FORMAT",
            Self::TimestampExpired => "TIMESTAMP_EXPIRED",
            Self::FutureTimestamp => "FUTURE_TIMESTAMP",
            Self::ReplayAttackDetected => "REPLAY_ATTACK_DETECTED",
            Self::MissingRequestId => "MISSING_REQUEST_ID",
            Self::DuplicateRequest => "DUPLICATE_REQUEST",
            Self::MissingUsername => "MISSING_USERNAME",
            Self::MissingRegistrationFields => "MISSING_REGISTRATION_FIELDS",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::InvalidKey => "INVALID_KEY",
            Self::InvalidEnvelope => "INVALID_ENVELOPE",
            Self::DecryptionFailed => "DECRYPTION_FAILED",
            Self::EncryptionFailed => "ENCRYPTION_FAILED",
            Self::UserPublicKeyUnavailable => "USER_PUBLIC_KEY_UNAVAILABLE",
            Self::Configuration => "CONFIGURATION",
        }
    }

    /// Customary HTTP status for the code. The embedding layer decides
    /// whether to use it.
    pub fn suggested_status(&self) -> u16 {
        match self {
            Self::ReplayAttackDetected | Self::DuplicateRequest => 409,
            Self::SignatureInvalid | Self::UserPublicKeyUnavailable => 401,
            Self::EncryptionFailed | Self::InvalidKey | Self::Configuration => 500,
            _ => 400,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Guard error
// ---------------------------------------------------------------------------

pub struct GuardError {
    code: ErrorCode,
    message: String,
    request_id: Option<String>,
    timestamp: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl GuardError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: None,
            timestamp: None,
            source: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Prefix the message with what was being processed.
    pub fn with_context(mut self, context: &str) -> Self {
        self.message = format!("{}: {}", context, self.message);
        self
    }

    /// Wrap an engine failure under `code`, keeping it as the source.
    pub fn crypto(code: ErrorCode, err: CryptoError) -> Self {
        Self::new(code, err.to_string()).with_source(err)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.timestamp.as_deref()
    }
}

impl fmt::Debug for GuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("request_id", &self.request_id)
            .field("timestamp", &self.timestamp)
            .field("source", &self.source.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl fmt::Display for GuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl StdError for GuardError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn StdError + 'static))
    }
}

pub type GuardResult<T> = Result<T, GuardError>;
