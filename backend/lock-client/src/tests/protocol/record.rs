// Unit tests for the wire record codec

use crate::protocol::{
    Command, HEADER_LEN, HelperStatus, LockId, MAX_PATH_LEN, REQUEST_MAGIC, RESPONSE_MAGIC,
    Record, encode_request, read_request, read_response,
};

use std::io::{Cursor, ErrorKind};

/// **VALUE**: Verifies the header layout: four native-endian `u32`s in declared order.
///
/// **WHY THIS MATTERS**: The helper reads the header field by field at fixed offsets.
/// A swapped field or a padding byte would make every request unreadable.
///
/// **BUG THIS CATCHES**: Would catch reordering `sequence` and `code`, or switching to a
/// fixed endianness that differs from the helper built for this host.
#[test]
fn given_lock_request_when_encoded_then_fields_sit_at_fixed_offsets() {
    // GIVEN: A lock request for a 12-byte path
    let record = Record::lock_request(7, 12);

    // WHEN: Encoding the header
    let bytes = record.to_bytes();

    // THEN: Each field occupies its own 4-byte slot
    assert_eq!(bytes.len(), HEADER_LEN);
    assert_eq!(bytes[0..4], REQUEST_MAGIC.to_ne_bytes());
    assert_eq!(bytes[4..8], 7u32.to_ne_bytes());
    assert_eq!(bytes[8..12], Command::Lock.code().to_ne_bytes());
    assert_eq!(bytes[12..16], 12u32.to_ne_bytes());
}

/// **VALUE**: Verifies that a lock request is the header immediately followed by raw
/// path bytes, with no terminator.
///
/// **WHY THIS MATTERS**: The helper reads exactly `data` bytes after the header. A
/// trailing NUL would be read as the start of the next request.
///
/// **BUG THIS CATCHES**: Would catch a C-string style terminator or a length prefix
/// sneaking into the payload.
#[test]
fn given_path_payload_when_request_encoded_then_payload_follows_header_unterminated() {
    // GIVEN: A path and its lock request header
    let path = b"/var/mail/alice";
    let record = Record::lock_request(0, path.len() as u32);

    // WHEN: Encoding the full request
    let encoded = encode_request(&record, path);

    // THEN: Header then path, nothing else
    assert_eq!(encoded.len(), HEADER_LEN + path.len());
    assert_eq!(&encoded[HEADER_LEN..], path);
}

/// **VALUE**: Verifies the helper-side reader picks up the path payload of a lock request.
///
/// **WHY THIS MATTERS**: Requests have no self-describing framing; only the reader that
/// expects request framing knows to read `data` more bytes.
///
/// **BUG THIS CATCHES**: Would catch the reader ignoring the payload, which would leave
/// the path bytes in the pipe to be misread as the next header.
#[test]
fn given_encoded_lock_request_when_read_as_request_then_returns_header_and_path() {
    // GIVEN: Two requests back to back in one stream
    let path = b"/home/bob/mbox";
    let mut stream = encode_request(&Record::lock_request(3, path.len() as u32), path);
    stream.extend_from_slice(&Record::unlock_request(4, LockId::new(9, 1)).to_bytes());
    let mut reader = Cursor::new(stream);

    // WHEN: Reading both with request framing
    let (first, payload) = read_request(&mut reader).unwrap().unwrap();
    let (second, empty) = read_request(&mut reader).unwrap().unwrap();

    // THEN: The lock carries its path, the unlock carries nothing
    assert_eq!(first.command(), Some(Command::Lock));
    assert_eq!(payload, path);
    assert_eq!(second.command(), Some(Command::Unlock));
    assert_eq!(second.data, 9);
    assert!(empty.is_empty());
}

/// **VALUE**: Verifies that a corrupt payload length is rejected instead of allocated.
///
/// **WHY THIS MATTERS**: The length comes straight off the pipe. Trusting it would let a
/// single flipped bit request a 4 GiB buffer.
///
/// **BUG THIS CATCHES**: Would catch removal of the `MAX_PATH_LEN` bound.
#[test]
fn given_oversized_payload_length_when_read_as_request_then_returns_invalid_data() {
    // GIVEN: A lock request claiming a huge path
    let record = Record::lock_request(1, (MAX_PATH_LEN + 1) as u32);
    let mut reader = Cursor::new(record.to_bytes().to_vec());

    // WHEN: Reading it
    let result = read_request(&mut reader);

    // THEN: InvalidData
    assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidData);
}

/// **VALUE**: Verifies that a stream closed mid-header reads as "peer gone", not as a record.
///
/// **WHY THIS MATTERS**: A zero or short read is how the client learns the helper died.
/// Decoding a half-filled header would produce a garbage response instead.
///
/// **BUG THIS CATCHES**: Would catch `read_response` zero-filling a short read.
#[test]
fn given_truncated_stream_when_response_read_then_returns_none() {
    // GIVEN: Only 10 of 16 header bytes, and an empty stream
    let bytes = Record::response(1, HelperStatus::Ok, 5).to_bytes();
    let mut truncated = Cursor::new(bytes[..10].to_vec());
    let mut empty = Cursor::new(Vec::new());

    // WHEN: Reading responses
    // THEN: Both report the peer closed
    assert!(read_response(&mut truncated).unwrap().is_none());
    assert!(read_response(&mut empty).unwrap().is_none());
}

/// **VALUE**: Verifies that decoding a response recovers the status and data written.
///
/// **WHY THIS MATTERS**: The client's whole decision tree runs on `magic`, `sequence`,
/// status and `data` from the decoded response.
///
/// **BUG THIS CATCHES**: Would catch `from_bytes` reading fields at the wrong offsets.
#[test]
fn given_response_bytes_when_decoded_then_fields_match() {
    // GIVEN: An OK response granting lock 42 for sequence 11
    let bytes = Record::response(11, HelperStatus::Ok, 42).to_bytes();

    // WHEN: Decoding
    let record = Record::from_bytes(&bytes);

    // THEN: Everything matches
    assert_eq!(record.magic, RESPONSE_MAGIC);
    assert_eq!(record.sequence, 11);
    assert_eq!(record.status(), HelperStatus::Ok);
    assert_eq!(record.data, 42);
}

/// **VALUE**: Verifies the status codes the helper uses, including unknown ones.
///
/// **WHY THIS MATTERS**: A newer helper may report a status this client does not know.
/// It must surface as a failure with its code, not be mistaken for OK.
///
/// **BUG THIS CATCHES**: Would catch a catch-all arm mapping unknown codes to `Ok`.
#[test]
fn given_status_codes_when_mapped_then_match_protocol_values() {
    // GIVEN: The known status codes and one unknown code
    let cases = [
        (0, HelperStatus::Ok),
        (1, HelperStatus::Protocol),
        (2, HelperStatus::NoMemory),
        (3, HelperStatus::System),
        (4, HelperStatus::Invalid),
        (99, HelperStatus::Unknown(99)),
    ];

    // WHEN: Mapping both ways
    // THEN: Codes round-trip and unknown stays unknown
    for (code, status) in cases {
        assert_eq!(HelperStatus::from_code(code), status);
        assert_eq!(status.code(), code);
    }
    assert_eq!(Command::from_code(0x1234), None);
    assert_eq!(HelperStatus::Unknown(99).to_string(), "unknown status 99");
}
