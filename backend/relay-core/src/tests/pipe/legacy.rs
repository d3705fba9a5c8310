use crate::pipe::PipeMessage;
use crate::pipe::legacy::{
    decode_window_message, decode_window_payload, encode_window_message, encode_window_payload,
};

/// **VALUE**: The readiness sentinel survives the trip through a window
/// message even though it carries no real payload.
///
/// **BUG THIS CATCHES**: Encoding PONG as an empty string, which older
/// hosts do not recognize as the sentinel.
#[test]
fn given_pong_when_encoded_for_window_then_declared_length_is_sentinel() {
    // GIVEN
    let pong = PipeMessage::empty(777);

    // WHEN
    let frame = encode_window_message(&pong);

    // THEN
    assert_eq!(frame.command, 777);
    assert_eq!(frame.declared_len(), 777);
}

#[test]
fn given_sentinel_length_when_decoded_then_pong() {
    // GIVEN: an unrelated command but the sentinel length
    let data = vec![0u8; 777];

    // WHEN
    let message = decode_window_message(0, 777, &data);

    // THEN
    assert_eq!(message, PipeMessage::empty(777));
}

#[test]
fn given_protocol_frame_when_sent_through_window_then_text_preserved() {
    // GIVEN
    let json = r#"{"type":"socket_event","event":"message","payload":"héllo"}"#;
    let original = PipeMessage::new(500, json.as_bytes().to_vec());

    // WHEN
    let frame = encode_window_message(&original);
    let decoded = decode_window_message(frame.command, frame.declared_len(), &frame.data);

    // THEN
    assert_eq!(decoded, original);
}

#[test]
fn given_window_payload_when_encoded_then_utf16_with_terminator() {
    // WHEN
    let bytes = encode_window_payload("ok");

    // THEN
    assert_eq!(bytes, vec![b'o', 0, b'k', 0, 0, 0]);
    assert_eq!(decode_window_payload(&bytes), "ok");
}

#[test]
fn given_odd_trailing_byte_when_decoded_then_ignored() {
    // GIVEN
    let bytes = [b'h', 0, b'i', 0, 0x41];

    // WHEN / THEN
    assert_eq!(decode_window_payload(&bytes), "hi");
}

#[cfg(not(windows))]
#[tokio::test]
async fn given_non_windows_host_when_legacy_send_then_unsupported() {
    use crate::error::transport::TransportError;
    use crate::pipe::{LegacyBroadcastTransport, LegacyTarget, Transport};

    // GIVEN
    let transport = LegacyBroadcastTransport::new(LegacyTarget::WindowClass("Acme_notification".into()));

    // WHEN
    let result = transport.send(&PipeMessage::empty(777)).await;

    // THEN
    assert!(matches!(result, Err(TransportError::Unsupported { .. })));
}
