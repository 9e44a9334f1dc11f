//! Directional wire envelopes exchanged between client and server sessions.
//!
//! Every message is `header || payload`, where the 9-byte header is
//! `magic (u16) | version (u8) | direction (u8) | kind (u8) | payload_len (u32)`,
//! all big-endian. Payload parsers are strict: truncated fields, oversized
//! maps, unordered entries and trailing bytes are all rejected.

pub mod codec;

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::attestation::types::{EndorsedEvidence, Endorsements, Evidence, EvidenceMap};
use crate::error::MessageError;

/// Magic bytes: 0x05 0xE5 ("SEcure Session").
pub const MAGIC: u16 = 0x05E5;

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 9;

/// Maximum payload size: 16 MiB.
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Upper bound on evidence or binding entries in a single message.
pub const MAX_MAP_ENTRIES: usize = 64;

/// Which way a message travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    /// Client to server.
    Request = 0x01,
    /// Server to client.
    Response = 0x02,
}

impl Direction {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

/// Envelope message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Attest = 0x01,
    Handshake = 0x02,
    Bindings = 0x03,
    Record = 0x04,
    Close = 0x05,
}

impl MessageKind {
    pub fn from_u8(v: u8) -> Result<Self, MessageError> {
        match v {
            0x01 => Ok(Self::Attest),
            0x02 => Ok(Self::Handshake),
            0x03 => Ok(Self::Bindings),
            0x04 => Ok(Self::Record),
            0x05 => Ok(Self::Close),
            other => Err(MessageError::UnknownKind(other)),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Attest => "attest",
            Self::Handshake => "handshake",
            Self::Bindings => "bindings",
            Self::Record => "record",
            Self::Close => "close",
        }
    }
}

/// A parsed envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub direction: Direction,
    pub kind: MessageKind,
    pub payload_len: u32,
}

impl EnvelopeHeader {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(MAGIC);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(self.direction as u8);
        buf.put_u8(self.kind as u8);
        buf.put_u32(self.payload_len);
    }

    /// Parse a header for the given direction without consuming input.
    /// Returns `None` if fewer than [`HEADER_SIZE`] bytes are available.
    pub fn decode(
        buf: &[u8],
        direction: Direction,
        max_payload: u32,
    ) -> Result<Option<Self>, MessageError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let magic = u16::from_be_bytes([buf[0], buf[1]]);
        if magic != MAGIC {
            return Err(MessageError::InvalidMagic(magic));
        }

        let version = buf[2];
        if version != PROTOCOL_VERSION {
            return Err(MessageError::UnsupportedVersion(version));
        }

        if buf[3] != direction as u8 {
            return Err(MessageError::WrongDirection {
                expected: direction.name(),
                actual: buf[3],
            });
        }

        let kind = MessageKind::from_u8(buf[4])?;
        let payload_len = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]);
        let max = max_payload.min(MAX_MESSAGE_SIZE);
        if payload_len > max {
            return Err(MessageError::TooLarge {
                size: payload_len,
                max,
            });
        }

        Ok(Some(Self {
            direction,
            kind,
            payload_len,
        }))
    }
}

/// Attestation material sent by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttestRequest {
    pub endorsed_evidence: EvidenceMap,
}

/// Attestation material sent by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttestResponse {
    pub endorsed_evidence: EvidenceMap,
}

/// First Noise message (initiator to responder).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub noise_message: Bytes,
}

/// Second Noise message plus the server's session bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub noise_message: Bytes,
    pub bindings: BTreeMap<String, Bytes>,
}

/// Session bindings sent by a self-attesting client once the handshake completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionBindings {
    pub bindings: BTreeMap<String, Bytes>,
}

/// An application record sealed by the record layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedRecord {
    pub sequence: u64,
    pub ciphertext: Bytes,
}

/// Client-to-server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    Attest(AttestRequest),
    Handshake(HandshakeRequest),
    Bindings(SessionBindings),
    Record(EncryptedRecord),
    Close,
}

/// Server-to-client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionResponse {
    Attest(AttestResponse),
    Handshake(HandshakeResponse),
    Record(EncryptedRecord),
    Close,
}

/// A directionally typed envelope.
pub trait WireMessage: Sized {
    const DIRECTION: Direction;

    fn kind(&self) -> MessageKind;

    fn encode_payload(&self, buf: &mut BytesMut) -> Result<(), MessageError>;

    fn decode_payload(kind: MessageKind, payload: &[u8]) -> Result<Self, MessageError>;

    /// Wrap a sealed application record.
    fn record(record: EncryptedRecord) -> Self;

    /// The close frame for this direction.
    fn close() -> Self;

    /// Append the full envelope (header and payload) to `buf`.
    ///
    /// Fails without touching `buf` if a field cannot be represented on the
    /// wire.
    fn encode_into(&self, buf: &mut BytesMut) -> Result<(), MessageError> {
        let mut payload = BytesMut::new();
        self.encode_payload(&mut payload)?;
        let payload_len = u32::try_from(payload.len()).map_err(|_| MessageError::FieldTooLong {
            field: "payload",
            len: payload.len(),
        })?;
        let header = EnvelopeHeader {
            direction: Self::DIRECTION,
            kind: self.kind(),
            payload_len,
        };
        buf.reserve(HEADER_SIZE + payload.len());
        header.encode(buf);
        buf.extend_from_slice(&payload);
        Ok(())
    }

    fn encode(&self) -> Result<Bytes, MessageError> {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode exactly one envelope from `bytes`.
    fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        let header = EnvelopeHeader::decode(bytes, Self::DIRECTION, MAX_MESSAGE_SIZE)?
            .ok_or(MessageError::Truncated("header"))?;
        let body = &bytes[HEADER_SIZE..];
        let payload_len = header.payload_len as usize;
        if body.len() < payload_len {
            return Err(MessageError::Truncated("payload"));
        }
        if body.len() > payload_len {
            return Err(MessageError::TrailingBytes {
                field: "envelope",
                count: body.len() - payload_len,
            });
        }
        Self::decode_payload(header.kind, body)
    }
}

impl WireMessage for SessionRequest {
    const DIRECTION: Direction = Direction::Request;

    fn kind(&self) -> MessageKind {
        match self {
            Self::Attest(_) => MessageKind::Attest,
            Self::Handshake(_) => MessageKind::Handshake,
            Self::Bindings(_) => MessageKind::Bindings,
            Self::Record(_) => MessageKind::Record,
            Self::Close => MessageKind::Close,
        }
    }

    fn encode_payload(&self, buf: &mut BytesMut) -> Result<(), MessageError> {
        match self {
            Self::Attest(attest) => put_evidence_map(buf, &attest.endorsed_evidence),
            Self::Handshake(handshake) => {
                put_u32_prefixed(buf, "noise message", &handshake.noise_message)
            }
            Self::Bindings(bindings) => put_binding_map(buf, &bindings.bindings),
            Self::Record(record) => put_record(buf, record),
            Self::Close => Ok(()),
        }
    }

    fn decode_payload(kind: MessageKind, payload: &[u8]) -> Result<Self, MessageError> {
        let mut reader = Reader::new(payload);
        let message = match kind {
            MessageKind::Attest => Self::Attest(AttestRequest {
                endorsed_evidence: reader.evidence_map()?,
            }),
            MessageKind::Handshake => Self::Handshake(HandshakeRequest {
                noise_message: Bytes::copy_from_slice(reader.u32_prefixed("noise message")?),
            }),
            MessageKind::Bindings => Self::Bindings(SessionBindings {
                bindings: reader.binding_map()?,
            }),
            MessageKind::Record => Self::Record(reader.record()?),
            MessageKind::Close => Self::Close,
        };
        reader.finish(kind.name())?;
        Ok(message)
    }

    fn record(record: EncryptedRecord) -> Self {
        Self::Record(record)
    }

    fn close() -> Self {
        Self::Close
    }
}

impl WireMessage for SessionResponse {
    const DIRECTION: Direction = Direction::Response;

    fn kind(&self) -> MessageKind {
        match self {
            Self::Attest(_) => MessageKind::Attest,
            Self::Handshake(_) => MessageKind::Handshake,
            Self::Record(_) => MessageKind::Record,
            Self::Close => MessageKind::Close,
        }
    }

    fn encode_payload(&self, buf: &mut BytesMut) -> Result<(), MessageError> {
        match self {
            Self::Attest(attest) => put_evidence_map(buf, &attest.endorsed_evidence),
            Self::Handshake(handshake) => {
                put_u32_prefixed(buf, "noise message", &handshake.noise_message)?;
                put_binding_map(buf, &handshake.bindings)
            }
            Self::Record(record) => put_record(buf, record),
            Self::Close => Ok(()),
        }
    }

    fn decode_payload(kind: MessageKind, payload: &[u8]) -> Result<Self, MessageError> {
        let mut reader = Reader::new(payload);
        let message = match kind {
            MessageKind::Attest => Self::Attest(AttestResponse {
                endorsed_evidence: reader.evidence_map()?,
            }),
            MessageKind::Handshake => {
                let noise_message = Bytes::copy_from_slice(reader.u32_prefixed("noise message")?);
                let bindings = reader.binding_map()?;
                Self::Handshake(HandshakeResponse {
                    noise_message,
                    bindings,
                })
            }
            MessageKind::Bindings => return Err(MessageError::UnknownKind(kind as u8)),
            MessageKind::Record => Self::Record(reader.record()?),
            MessageKind::Close => Self::Close,
        };
        reader.finish(kind.name())?;
        Ok(message)
    }

    fn record(record: EncryptedRecord) -> Self {
        Self::Record(record)
    }

    fn close() -> Self {
        Self::Close
    }
}

// -- Payload helpers --
//
// Lengths and counts are checked before being narrowed to their wire width.

fn put_u16_prefixed(
    buf: &mut BytesMut,
    field: &'static str,
    data: &[u8],
) -> Result<(), MessageError> {
    let len = u16::try_from(data.len()).map_err(|_| MessageError::FieldTooLong {
        field,
        len: data.len(),
    })?;
    buf.put_u16(len);
    buf.put_slice(data);
    Ok(())
}

fn put_u32_prefixed(
    buf: &mut BytesMut,
    field: &'static str,
    data: &[u8],
) -> Result<(), MessageError> {
    let len = u32::try_from(data.len()).map_err(|_| MessageError::FieldTooLong {
        field,
        len: data.len(),
    })?;
    buf.put_u32(len);
    buf.put_slice(data);
    Ok(())
}

fn put_map_len(
    buf: &mut BytesMut,
    field: &'static str,
    count: usize,
) -> Result<(), MessageError> {
    if count > MAX_MAP_ENTRIES {
        return Err(MessageError::TooManyEntries { field, count });
    }
    buf.put_u16(count as u16);
    Ok(())
}

fn put_evidence_map(buf: &mut BytesMut, map: &EvidenceMap) -> Result<(), MessageError> {
    put_map_len(buf, "evidence map", map.len())?;
    for (id, endorsed) in map {
        put_u16_prefixed(buf, "attester id", id.as_bytes())?;
        put_u32_prefixed(buf, "evidence", &endorsed.evidence.raw)?;
        put_u32_prefixed(buf, "endorsements", &endorsed.endorsements.raw)?;
    }
    Ok(())
}

fn put_binding_map(
    buf: &mut BytesMut,
    map: &BTreeMap<String, Bytes>,
) -> Result<(), MessageError> {
    put_map_len(buf, "binding map", map.len())?;
    for (id, binding) in map {
        put_u16_prefixed(buf, "attester id", id.as_bytes())?;
        put_u32_prefixed(buf, "binding", binding)?;
    }
    Ok(())
}

fn put_record(buf: &mut BytesMut, record: &EncryptedRecord) -> Result<(), MessageError> {
    buf.put_u64(record.sequence);
    put_u32_prefixed(buf, "ciphertext", &record.ciphertext)
}

/// Bounds-checked cursor over a payload.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, MessageError> {
        if self.buf.remaining() < 2 {
            return Err(MessageError::Truncated(field));
        }
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, MessageError> {
        if self.buf.remaining() < 4 {
            return Err(MessageError::Truncated(field));
        }
        Ok(self.buf.get_u32())
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, MessageError> {
        if self.buf.remaining() < 8 {
            return Err(MessageError::Truncated(field));
        }
        Ok(self.buf.get_u64())
    }

    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], MessageError> {
        if self.buf.len() < len {
            return Err(MessageError::Truncated(field));
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn u16_prefixed(&mut self, field: &'static str) -> Result<&'a [u8], MessageError> {
        let len = self.u16(field)? as usize;
        self.take(len, field)
    }

    fn u32_prefixed(&mut self, field: &'static str) -> Result<&'a [u8], MessageError> {
        let len = self.u32(field)? as usize;
        self.take(len, field)
    }

    fn identifier(&mut self) -> Result<String, MessageError> {
        let raw = self.u16_prefixed("attester id")?;
        Ok(String::from_utf8(raw.to_vec())?)
    }

    fn entry_count(&mut self, field: &'static str) -> Result<usize, MessageError> {
        let count = self.u16(field)? as usize;
        if count > MAX_MAP_ENTRIES {
            return Err(MessageError::TooManyEntries { field, count });
        }
        Ok(count)
    }

    fn evidence_map(&mut self) -> Result<EvidenceMap, MessageError> {
        let count = self.entry_count("evidence map")?;
        let mut map = EvidenceMap::new();
        for _ in 0..count {
            let id = self.identifier()?;
            let evidence = Evidence::new(self.u32_prefixed("evidence")?.to_vec());
            let endorsements = Endorsements::new(self.u32_prefixed("endorsements")?.to_vec());
            insert_ordered(
                &mut map,
                id,
                EndorsedEvidence {
                    evidence,
                    endorsements,
                },
                "evidence map",
            )?;
        }
        Ok(map)
    }

    fn binding_map(&mut self) -> Result<BTreeMap<String, Bytes>, MessageError> {
        let count = self.entry_count("binding map")?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let id = self.identifier()?;
            let binding = Bytes::copy_from_slice(self.u32_prefixed("binding")?);
            insert_ordered(&mut map, id, binding, "binding map")?;
        }
        Ok(map)
    }

    fn record(&mut self) -> Result<EncryptedRecord, MessageError> {
        let sequence = self.u64("record sequence")?;
        let ciphertext = Bytes::copy_from_slice(self.u32_prefixed("record ciphertext")?);
        Ok(EncryptedRecord {
            sequence,
            ciphertext,
        })
    }

    fn finish(self, field: &'static str) -> Result<(), MessageError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(MessageError::TrailingBytes {
                field,
                count: self.buf.len(),
            })
        }
    }
}

/// Entries must appear in strictly ascending key order, which is how
/// `BTreeMap` iteration encodes them.
fn insert_ordered<V>(
    map: &mut BTreeMap<String, V>,
    key: String,
    value: V,
    field: &'static str,
) -> Result<(), MessageError> {
    if let Some((last, _)) = map.last_key_value() {
        if *last >= key {
            return Err(MessageError::NonCanonical(field));
        }
    }
    map.insert(key, value);
    Ok(())
}
