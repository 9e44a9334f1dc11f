pub mod noise;
pub mod seal;
pub mod transcript;

/// Supported cipher suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    /// X25519 key exchange + SHA-256 (hash and HKDF) + ChaCha20Poly1305.
    X25519ChaChaPolySha256,
}

impl CipherSuite {
    /// The `DH_CIPHER_HASH` suffix of a Noise protocol name.
    pub const fn noise_suffix(self) -> &'static str {
        match self {
            Self::X25519ChaChaPolySha256 => "25519_ChaChaPoly_SHA256",
        }
    }

    /// AEAD key length in bytes.
    pub const fn key_len(self) -> usize {
        match self {
            Self::X25519ChaChaPolySha256 => 32,
        }
    }

    /// AEAD nonce length in bytes.
    pub const fn nonce_len(self) -> usize {
        match self {
            Self::X25519ChaChaPolySha256 => 12,
        }
    }

    /// AEAD tag length in bytes.
    pub const fn tag_len(self) -> usize {
        match self {
            Self::X25519ChaChaPolySha256 => 16,
        }
    }
}

/// Length of the SHA-256 output used for chaining keys and handshake hashes.
pub const HASH_LEN: usize = 32;

/// 32-byte symmetric key.
pub type SymmetricKey = [u8; 32];

/// 32-byte handshake hash, which also serves as the session identifier.
pub type HandshakeHash = [u8; HASH_LEN];
