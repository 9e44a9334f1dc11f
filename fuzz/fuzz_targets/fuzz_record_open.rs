#![no_main]

use libfuzzer_sys::fuzz_target;

use confidential_session::crypto::seal::OpeningContext;
use confidential_session::frame::MessageKind;

/// Arbitrary ciphertext under an arbitrary sequence number.
struct RecordInput<'a> {
    sequence: u64,
    ciphertext: &'a [u8],
}

fn parse_input(data: &[u8]) -> Option<RecordInput<'_>> {
    if data.len() < 8 {
        return None;
    }
    let sequence = u64::from_be_bytes(data[0..8].try_into().ok()?);
    Some(RecordInput {
        sequence,
        ciphertext: &data[8..],
    })
}

fuzz_target!(|data: &[u8]| {
    let Some(input) = parse_input(data) else {
        return;
    };

    let mut opener = OpeningContext::new(&[0x42; 32], [0xAA; 32]);
    let kind = MessageKind::Record as u8;

    // Forged records must never open, and a rejected record must not move
    // the expected sequence.
    assert!(opener.open(input.ciphertext, input.sequence, kind).is_err());
    assert_eq!(opener.expected_sequence(), Some(0));
    assert!(opener.open(input.ciphertext, 0, kind).is_err());
});
