use std::io;

/// Errors from envelope parsing and encoding.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("invalid magic bytes: expected 0x05E5, got 0x{0:04X}")]
    InvalidMagic(u16),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("wrong message direction: expected {expected}, got 0x{actual:02X}")]
    WrongDirection { expected: &'static str, actual: u8 },

    #[error("unknown message kind: 0x{0:02X}")]
    UnknownKind(u8),

    #[error("message too large: {size} bytes (max {max})")]
    TooLarge { size: u32, max: u32 },

    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("{field}: {count} trailing bytes")]
    TrailingBytes { field: &'static str, count: usize },

    #[error("too many entries in {field}: {count}")]
    TooManyEntries { field: &'static str, count: usize },

    #[error("{field} too long to encode: {len} bytes")]
    FieldTooLong { field: &'static str, len: usize },

    #[error("duplicate or unordered entry in {0}")]
    NonCanonical(&'static str),

    #[error("invalid attester id: {0}")]
    InvalidIdentifier(#[from] std::string::FromUtf8Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("HKDF expand failed: invalid length")]
    HkdfExpandFailed,

    #[error("AEAD encryption failed")]
    SealFailed,

    #[error("AEAD decryption failed: ciphertext is invalid or tampered")]
    OpenFailed,

    #[error("nonce overflow: maximum sequence number reached")]
    NonceOverflow,

    #[error("record sequence {received} rejected: expected {expected} (replayed or out of order)")]
    ReplayOrDesync { received: u64, expected: u64 },

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("non-contributory key exchange: peer sent small-subgroup or identity point")]
    NonContributoryKey,
}

/// Errors from attestation operations.
#[derive(Debug, thiserror::Error)]
pub enum AttestError {
    #[error("attestation generation failed: {0}")]
    GenerationFailed(String),

    #[error("attestation verification failed: {0}")]
    VerificationFailed(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("missing session binding for attester {0}")]
    MissingBinding(String),

    #[error("session binding for attester {0} does not verify")]
    InvalidBinding(String),
}

/// Errors from session configuration and the session state machine.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid session configuration: {0}")]
    Config(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("session is not open")]
    NotOpen,

    #[error("session keys have not been derived yet")]
    NotReady,

    #[error("session closed")]
    Closed,

    #[error("session failed earlier: {reason}")]
    Failed { kind: ErrorKind, reason: String },

    #[error("handshake timeout")]
    Timeout,
}

/// Coarse classification of an [`Error`], stable across the variants
/// that produce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Protocol,
    Attestation,
    Decrypt,
    ReplayOrDesync,
    NotOpen,
    NotReady,
    Closed,
    Timeout,
    Io,
}

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Attestation(#[from] AttestError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Message(MessageError::Io(_)) | Error::Io(_) => ErrorKind::Io,
            Error::Message(_) => ErrorKind::Protocol,
            Error::Crypto(CryptoError::OpenFailed) => ErrorKind::Decrypt,
            Error::Crypto(CryptoError::ReplayOrDesync { .. })
            | Error::Crypto(CryptoError::NonceOverflow) => ErrorKind::ReplayOrDesync,
            Error::Crypto(_) => ErrorKind::Protocol,
            Error::Attestation(_) => ErrorKind::Attestation,
            Error::Session(e) => match e {
                SessionError::Config(_) => ErrorKind::Config,
                SessionError::HandshakeFailed(_) | SessionError::UnexpectedMessage { .. } => {
                    ErrorKind::Protocol
                }
                SessionError::NotOpen => ErrorKind::NotOpen,
                SessionError::NotReady => ErrorKind::NotReady,
                SessionError::Closed => ErrorKind::Closed,
                SessionError::Failed { kind, .. } => *kind,
                SessionError::Timeout => ErrorKind::Timeout,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
