use std::collections::VecDeque;

use bytes::Bytes;

use super::handshake::HandshakeOutcome;
use crate::crypto::seal::{OpeningContext, SealingContext};
use crate::crypto::transcript::session_binding_token;
use crate::crypto::{CipherSuite, HandshakeHash};
use crate::error::{Error, MessageError};
use crate::frame::{EncryptedRecord, MessageKind, HEADER_SIZE};

/// Envelope bytes a record adds around its plaintext: header, sequence,
/// ciphertext length and AEAD tag.
pub const RECORD_OVERHEAD: usize =
    HEADER_SIZE + 8 + 4 + CipherSuite::X25519ChaChaPolySha256.tag_len();

/// Post-handshake encryption state for one session.
///
/// Inbound records are queued as they arrive and decrypted one at a time
/// when the application reads.
pub struct RecordLayer {
    sealer: SealingContext,
    opener: OpeningContext,
    handshake_hash: HandshakeHash,
    inbound: VecDeque<EncryptedRecord>,
    max_message_size: u32,
}

impl RecordLayer {
    pub fn new(outcome: HandshakeOutcome, max_message_size: u32) -> Self {
        Self {
            sealer: SealingContext::new(&outcome.send_key, outcome.handshake_hash),
            opener: OpeningContext::new(&outcome.recv_key, outcome.handshake_hash),
            handshake_hash: outcome.handshake_hash,
            inbound: VecDeque::new(),
            max_message_size,
        }
    }

    pub fn seal(&mut self, plaintext: &[u8]) -> Result<EncryptedRecord, Error> {
        let size = plaintext.len().saturating_add(RECORD_OVERHEAD);
        if size > self.max_message_size as usize {
            return Err(MessageError::TooLarge {
                size: u32::try_from(size).unwrap_or(u32::MAX),
                max: self.max_message_size,
            }
            .into());
        }
        let (ciphertext, sequence) = self.sealer.seal(plaintext, MessageKind::Record as u8)?;
        Ok(EncryptedRecord {
            sequence,
            ciphertext: Bytes::from(ciphertext),
        })
    }

    pub fn enqueue(&mut self, record: EncryptedRecord) {
        self.inbound.push_back(record);
    }

    /// Decrypt the oldest queued record, if any.
    pub fn open_next(&mut self) -> Result<Option<Bytes>, Error> {
        let Some(record) = self.inbound.pop_front() else {
            return Ok(None);
        };
        let plaintext =
            self.opener
                .open(&record.ciphertext, record.sequence, MessageKind::Record as u8)?;
        Ok(Some(Bytes::from(plaintext)))
    }

    pub fn pending(&self) -> usize {
        self.inbound.len()
    }

    pub fn handshake_hash(&self) -> &HandshakeHash {
        &self.handshake_hash
    }

    pub fn binding_token(&self, info: &[u8]) -> Result<[u8; 32], Error> {
        Ok(session_binding_token(&self.handshake_hash, info)?)
    }
}
