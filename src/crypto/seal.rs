use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use zeroize::{Zeroize, Zeroizing};

use super::{HandshakeHash, SymmetricKey};
use crate::error::CryptoError;
use crate::frame::PROTOCOL_VERSION;

/// Builds per-record AAD: `version || record_kind || session_id || sequence`.
///
/// Binding the record kind stops an attacker from re-labelling a record
/// without breaking AEAD verification.
fn build_aad(record_kind: u8, session_id: &HandshakeHash, sequence: u64) -> Vec<u8> {
    let mut aad = Vec::with_capacity(1 + 1 + 32 + 8);
    aad.push(PROTOCOL_VERSION);
    aad.push(record_kind);
    aad.extend_from_slice(session_id);
    aad.extend_from_slice(&sequence.to_be_bytes());
    aad
}

/// Build a 12-byte nonce from a u64 counter (big-endian, left-padded with zeros).
fn build_nonce(counter: u64) -> Nonce {
    let mut nonce_bytes = [0u8; 12];
    nonce_bytes[4..12].copy_from_slice(&counter.to_be_bytes());
    *Nonce::from_slice(&nonce_bytes)
}

/// Context for encrypting outgoing records in one direction.
pub struct SealingContext {
    key: Zeroizing<SymmetricKey>,
    session_id: HandshakeHash,
    sequence: u64,
}

impl Drop for SealingContext {
    fn drop(&mut self) {
        self.session_id.zeroize();
        self.sequence = 0;
    }
}

impl SealingContext {
    /// Create a new encryption context from a transport key and the session ID.
    pub fn new(key: &SymmetricKey, session_id: HandshakeHash) -> Self {
        Self {
            key: Zeroizing::new(*key),
            session_id,
            sequence: 0,
        }
    }

    /// Encrypt a plaintext payload. Returns ciphertext (includes AEAD tag)
    /// and the sequence number it was sealed under.
    ///
    /// The last representable sequence number is never used; reaching it
    /// fails with [`CryptoError::NonceOverflow`].
    pub fn seal(&mut self, plaintext: &[u8], record_kind: u8) -> Result<(Vec<u8>, u64), CryptoError> {
        let seq = self.sequence;
        self.sequence = seq.checked_add(1).ok_or(CryptoError::NonceOverflow)?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key[..]));
        let aad = build_aad(record_kind, &self.session_id, seq);
        let ciphertext = cipher
            .encrypt(
                &build_nonce(seq),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::SealFailed)?;

        Ok((ciphertext, seq))
    }

    /// Current sequence number (next to be used).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Context for decrypting incoming records in one direction.
pub struct OpeningContext {
    key: Zeroizing<SymmetricKey>,
    session_id: HandshakeHash,
    /// The only sequence number that will be accepted next.
    /// `None` once the counter space is exhausted.
    next_sequence: Option<u64>,
}

impl Drop for OpeningContext {
    fn drop(&mut self) {
        self.session_id.zeroize();
        self.next_sequence = None;
    }
}

impl OpeningContext {
    /// Create a new decryption context from a transport key and the session ID.
    pub fn new(key: &SymmetricKey, session_id: HandshakeHash) -> Self {
        Self {
            key: Zeroizing::new(*key),
            session_id,
            next_sequence: Some(0),
        }
    }

    /// Decrypt a record. Sequence numbers must arrive strictly in order:
    /// anything other than the next expected value is a replay or a desync
    /// and is rejected before touching the AEAD.
    pub fn open(
        &mut self,
        ciphertext: &[u8],
        sequence: u64,
        record_kind: u8,
    ) -> Result<Vec<u8>, CryptoError> {
        let expected = self.next_sequence.ok_or(CryptoError::NonceOverflow)?;
        if sequence != expected {
            return Err(CryptoError::ReplayOrDesync {
                received: sequence,
                expected,
            });
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key[..]));
        let aad = build_aad(record_kind, &self.session_id, sequence);
        let plaintext = cipher
            .decrypt(
                &build_nonce(sequence),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::OpenFailed)?;

        self.next_sequence = expected.checked_add(1);
        Ok(plaintext)
    }

    /// The sequence number the next record must carry.
    pub fn expected_sequence(&self) -> Option<u64> {
        self.next_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATA: u8 = 0x04;

    fn pair() -> (SealingContext, OpeningContext) {
        let key = [0x42; 32];
        let sid = [0xAA; 32];
        (SealingContext::new(&key, sid), OpeningContext::new(&key, sid))
    }

    #[test]
    fn seal_then_open() {
        let (mut sealer, mut opener) = pair();
        let plaintext = b"hello confidential world";
        let (ciphertext, seq) = sealer.seal(plaintext, DATA).unwrap();
        let recovered = opener.open(&ciphertext, seq, DATA).unwrap();
        assert_eq!(&recovered, plaintext);
        assert_eq!(opener.expected_sequence(), Some(1));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let (mut sealer, mut opener) = pair();
        let (mut ciphertext, seq) = sealer.seal(b"secret", DATA).unwrap();
        ciphertext[0] ^= 0xFF;

        let result = opener.open(&ciphertext, seq, DATA);
        assert!(matches!(result, Err(CryptoError::OpenFailed)));
        // A failed open does not consume the sequence number.
        assert_eq!(opener.expected_sequence(), Some(0));
    }

    #[test]
    fn replay_rejected() {
        let (mut sealer, mut opener) = pair();
        let (ct0, seq0) = sealer.seal(b"first", DATA).unwrap();
        let (ct1, seq1) = sealer.seal(b"second", DATA).unwrap();

        opener.open(&ct0, seq0, DATA).unwrap();
        opener.open(&ct1, seq1, DATA).unwrap();

        let result = opener.open(&ct0, seq0, DATA);
        assert!(matches!(
            result,
            Err(CryptoError::ReplayOrDesync {
                received: 0,
                expected: 2
            })
        ));
    }

    #[test]
    fn skipped_sequence_rejected() {
        let (mut sealer, mut opener) = pair();
        let _ = sealer.seal(b"lost", DATA).unwrap();
        let (ct1, seq1) = sealer.seal(b"early", DATA).unwrap();

        let result = opener.open(&ct1, seq1, DATA);
        assert!(matches!(
            result,
            Err(CryptoError::ReplayOrDesync {
                received: 1,
                expected: 0
            })
        ));
    }

    #[test]
    fn relabelled_sequence_fails_authentication() {
        let (mut sealer, _) = pair();
        let mut opener = OpeningContext::new(&[0x42; 32], [0xAA; 32]);
        opener.next_sequence = Some(7);
        let (ciphertext, _seq) = sealer.seal(b"secret", DATA).unwrap();

        let result = opener.open(&ciphertext, 7, DATA);
        assert!(matches!(result, Err(CryptoError::OpenFailed)));
    }

    #[test]
    fn wrong_record_kind_fails() {
        let (mut sealer, mut opener) = pair();
        let (ciphertext, seq) = sealer.seal(b"secret", DATA).unwrap();
        let result = opener.open(&ciphertext, seq, 0x05);
        assert!(matches!(result, Err(CryptoError::OpenFailed)));
    }

    #[test]
    fn wrong_session_id_fails() {
        let mut sealer = SealingContext::new(&[0x42; 32], [0xAA; 32]);
        let mut opener = OpeningContext::new(&[0x42; 32], [0xBB; 32]);
        let (ciphertext, seq) = sealer.seal(b"secret", DATA).unwrap();
        assert!(matches!(
            opener.open(&ciphertext, seq, DATA),
            Err(CryptoError::OpenFailed)
        ));
    }

    #[test]
    fn sequence_increments() {
        let (mut sealer, _) = pair();
        assert_eq!(sealer.sequence(), 0);
        let (_, seq) = sealer.seal(b"a", DATA).unwrap();
        assert_eq!(seq, 0);
        let (_, seq) = sealer.seal(b"b", DATA).unwrap();
        assert_eq!(seq, 1);
        assert_eq!(sealer.sequence(), 2);
    }

    #[test]
    fn sealer_counter_exhaustion() {
        let (mut sealer, _) = pair();
        sealer.sequence = u64::MAX - 1;
        let (_, seq) = sealer.seal(b"last", DATA).unwrap();
        assert_eq!(seq, u64::MAX - 1);
        assert!(matches!(
            sealer.seal(b"one too many", DATA),
            Err(CryptoError::NonceOverflow)
        ));
    }

    #[test]
    fn opener_counter_exhaustion() {
        let (_, mut opener) = pair();
        opener.next_sequence = None;
        assert!(matches!(
            opener.open(&[0u8; 16], 0, DATA),
            Err(CryptoError::NonceOverflow)
        ));
    }
}
