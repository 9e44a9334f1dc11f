#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

use confidential_session::frame::codec::EnvelopeCodec;
use confidential_session::{SessionRequest, WireMessage};

fuzz_target!(|data: &[u8]| {
    // Whole-buffer decode: anything accepted must re-encode to the same bytes.
    if let Ok(request) = SessionRequest::decode(data) {
        assert_eq!(&request.encode().unwrap()[..], data);
    }

    // Streaming decode: keep pulling envelopes until the codec wants more
    // data or rejects the stream.
    let mut codec = EnvelopeCodec::<SessionRequest>::new();
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
});
