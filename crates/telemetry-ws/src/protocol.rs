//! RFC 6455 handshake pieces and text-frame encoding.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};
use std::collections::HashMap;

/// Key-derivation GUID fixed by RFC 6455.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// The 101 Switching Protocols response for a client key.
pub fn handshake_response(key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(key)
    )
}

/// Offset just past the `CRLF CRLF` terminator, if present.
pub fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|index| index + 4)
}

/// Parse request headers case-insensitively; the request line is skipped.
pub fn parse_headers(raw: &[u8]) -> HashMap<String, String> {
    let text: String = raw.iter().map(|&b| b as char).collect();
    let mut headers = HashMap::new();
    for line in text.split("\r\n").skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    headers
}

/// Wrap a payload as a single unmasked text frame (FIN=1, opcode 0x1) with
/// the standard 7/16/64-bit length encoding.
pub fn encode_text_frame(payload: &[u8]) -> Vec<u8> {
    let length = payload.len();
    let mut frame = Vec::with_capacity(length + 10);
    frame.push(0x81);
    if length < 126 {
        frame.push(length as u8);
    } else if length < 65_536 {
        frame.push(126);
        frame.extend_from_slice(&(length as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(length as u64).to_be_bytes());
    }
    frame.extend_from_slice(payload);
    frame
}
