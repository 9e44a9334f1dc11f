#![no_main]

use libfuzzer_sys::fuzz_target;

use confidential_session::{
    AttestationType, HandshakeType, ProtocolEngine, ServerSession, SessionConfig, SessionRequest,
    WireMessage,
};

fuzz_target!(|data: &[u8]| {
    // Feed a stream of decoded requests to a fresh server session. Any input
    // must end in a clean error or a valid state, never a panic.
    let Ok(config) =
        SessionConfig::builder(AttestationType::Unattested, HandshakeType::NoiseNN).build()
    else {
        return;
    };
    let Ok(mut server) = ServerSession::create(config) else {
        return;
    };

    for chunk in data.split(|&b| b == 0xFF) {
        let Ok(request) = SessionRequest::decode(chunk) else {
            continue;
        };
        if server.put_incoming_message(request).is_err() {
            break;
        }
        while server.get_outgoing_message().is_some() {}
    }
});
