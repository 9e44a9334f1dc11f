use std::marker::PhantomData;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::{EnvelopeHeader, WireMessage, HEADER_SIZE, MAX_MESSAGE_SIZE};
use crate::error::MessageError;

/// Cap on speculative buffer growth while waiting for a large payload.
const MAX_RESERVE: usize = 64 * 1024;

/// Tokio codec framing session envelopes on a byte stream.
///
/// Decodes envelopes travelling towards this endpoint (`In`) and encodes
/// any outbound [`WireMessage`].
#[derive(Debug)]
pub struct EnvelopeCodec<In> {
    /// Cached header from a partial decode.
    current_header: Option<EnvelopeHeader>,
    /// Configured maximum payload size (enforced on decode).
    max_message_size: u32,
    _inbound: PhantomData<fn() -> In>,
}

impl<In: WireMessage> Default for EnvelopeCodec<In> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In: WireMessage> EnvelopeCodec<In> {
    pub fn new() -> Self {
        Self::with_max_message_size(MAX_MESSAGE_SIZE)
    }

    /// Create a codec with a custom maximum payload size.
    pub fn with_max_message_size(max_message_size: u32) -> Self {
        Self {
            current_header: None,
            max_message_size: max_message_size.min(MAX_MESSAGE_SIZE),
            _inbound: PhantomData,
        }
    }
}

impl<In: WireMessage> Decoder for EnvelopeCodec<In> {
    type Item = In;
    type Error = MessageError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.current_header.take() {
            Some(h) => h,
            None => match EnvelopeHeader::decode(src, In::DIRECTION, self.max_message_size)? {
                Some(h) => {
                    let _ = src.split_to(HEADER_SIZE);
                    h
                }
                None => return Ok(None),
            },
        };

        let payload_len = header.payload_len as usize;
        if src.len() < payload_len {
            src.reserve((payload_len - src.len()).min(MAX_RESERVE));
            self.current_header = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(payload_len);
        In::decode_payload(header.kind, &payload).map(Some)
    }
}

impl<In, Out: WireMessage> Encoder<Out> for EnvelopeCodec<In> {
    type Error = MessageError;

    fn encode(&mut self, message: Out, dst: &mut BytesMut) -> Result<(), Self::Error> {
        message.encode_into(dst)
    }
}
