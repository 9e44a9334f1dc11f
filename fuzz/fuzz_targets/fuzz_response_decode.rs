#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

use confidential_session::frame::codec::EnvelopeCodec;
use confidential_session::{SessionResponse, WireMessage};

fuzz_target!(|data: &[u8]| {
    if let Ok(response) = SessionResponse::decode(data) {
        assert_eq!(&response.encode().unwrap()[..], data);
    }

    let mut codec = EnvelopeCodec::<SessionResponse>::new();
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
});
