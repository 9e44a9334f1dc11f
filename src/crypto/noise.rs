//! Noise protocol primitives: `CipherState`, `SymmetricState` and X25519
//! key handling, instantiated with ChaChaPoly and SHA-256.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use super::{CipherSuite, HandshakeHash, SymmetricKey, HASH_LEN};
use crate::error::CryptoError;

const SUITE: CipherSuite = CipherSuite::X25519ChaChaPolySha256;

/// An X25519 key pair.
pub struct KeyPair {
    pub secret: StaticSecret,
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    pub fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }
}

/// Perform X25519 Diffie-Hellman, rejecting low-order peer points.
pub fn dh(
    our_secret: &StaticSecret,
    their_public: &PublicKey,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let shared = our_secret.diffie_hellman(their_public);
    if !shared.was_contributory() {
        return Err(CryptoError::NonContributoryKey);
    }
    Ok(Zeroizing::new(shared.to_bytes()))
}

/// Noise `HKDF(chaining_key, ikm, 2)`.
///
/// RFC 5869 with `salt = chaining_key` and empty info yields exactly the
/// Noise output blocks `output1 || output2`.
fn hkdf2(
    chaining_key: &[u8; HASH_LEN],
    ikm: &[u8],
) -> Result<(Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>), CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(Some(&chaining_key[..]), ikm);
    let mut okm = Zeroizing::new([0u8; 2 * HASH_LEN]);
    hkdf.expand(&[], &mut okm[..])
        .map_err(|_| CryptoError::HkdfExpandFailed)?;

    let mut first = Zeroizing::new([0u8; 32]);
    let mut second = Zeroizing::new([0u8; 32]);
    first.copy_from_slice(&okm[..HASH_LEN]);
    second.copy_from_slice(&okm[HASH_LEN..]);
    Ok((first, second))
}

/// Noise nonce layout: 32 bits of zeros followed by a little-endian counter.
fn noise_nonce(counter: u64) -> Nonce {
    let mut nonce_bytes = [0u8; 12];
    nonce_bytes[SUITE.nonce_len() - 8..].copy_from_slice(&counter.to_le_bytes());
    *Nonce::from_slice(&nonce_bytes)
}

/// AEAD key plus nonce counter used while the handshake is in progress.
#[derive(Default)]
pub struct CipherState {
    key: Option<Zeroizing<SymmetricKey>>,
    nonce: u64,
}

impl CipherState {
    fn initialize_key(&mut self, key: &SymmetricKey) {
        self.key = Some(Zeroizing::new(*key));
        self.nonce = 0;
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    pub fn encrypt_with_ad(&mut self, ad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let Some(key) = &self.key else {
            return Ok(plaintext.to_vec());
        };
        // 2^64-1 is reserved by Noise.
        if self.nonce == u64::MAX {
            return Err(CryptoError::NonceOverflow);
        }
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let ciphertext = cipher
            .encrypt(&noise_nonce(self.nonce), Payload { msg: plaintext, aad: ad })
            .map_err(|_| CryptoError::SealFailed)?;
        self.nonce += 1;
        Ok(ciphertext)
    }

    pub fn decrypt_with_ad(&mut self, ad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let Some(key) = &self.key else {
            return Ok(ciphertext.to_vec());
        };
        if self.nonce == u64::MAX {
            return Err(CryptoError::NonceOverflow);
        }
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let plaintext = cipher
            .decrypt(&noise_nonce(self.nonce), Payload { msg: ciphertext, aad: ad })
            .map_err(|_| CryptoError::OpenFailed)?;
        self.nonce += 1;
        Ok(plaintext)
    }
}

/// Chaining key, handshake hash and the handshake cipher.
pub struct SymmetricState {
    chaining_key: Zeroizing<[u8; HASH_LEN]>,
    hash: HandshakeHash,
    cipher: CipherState,
}

impl SymmetricState {
    pub fn initialize(protocol_name: &str) -> Self {
        let name = protocol_name.as_bytes();
        let mut hash = [0u8; HASH_LEN];
        if name.len() <= HASH_LEN {
            hash[..name.len()].copy_from_slice(name);
        } else {
            hash = Sha256::digest(name).into();
        }
        Self {
            chaining_key: Zeroizing::new(hash),
            hash,
            cipher: CipherState::default(),
        }
    }

    pub fn mix_hash(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.hash);
        hasher.update(data);
        self.hash = hasher.finalize().into();
    }

    pub fn mix_key(&mut self, input_key_material: &[u8]) -> Result<(), CryptoError> {
        let (chaining_key, temp_key) = hkdf2(&self.chaining_key, input_key_material)?;
        self.chaining_key = chaining_key;
        self.cipher.initialize_key(&temp_key);
        Ok(())
    }

    pub fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = self.cipher.encrypt_with_ad(&self.hash, plaintext)?;
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    pub fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.cipher.has_key() && ciphertext.len() < SUITE.tag_len() {
            return Err(CryptoError::OpenFailed);
        }
        let plaintext = self.cipher.decrypt_with_ad(&self.hash, ciphertext)?;
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }

    /// Derive the two transport keys: initiator-to-responder first.
    pub fn split(&self) -> Result<(Zeroizing<SymmetricKey>, Zeroizing<SymmetricKey>), CryptoError> {
        hkdf2(&self.chaining_key, &[])
    }

    pub fn handshake_hash(&self) -> HandshakeHash {
        self.hash
    }
}
