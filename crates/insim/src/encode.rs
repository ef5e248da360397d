//! Outbound InSim packet builders.
//!
//! All outbound packets share the `[size, type, ...]` framing of the inbound
//! stream. Text payloads are Latin-1 with NUL padding or termination.

use crate::{ISP_BFN, ISP_BTN, ISP_ISI, ISP_MST};
use pitwall_config::InSimSettings;

/// ISI `flags` requesting multi-car info packets.
pub const ISI_FLAG_MCI: u16 = 1;
/// ISI `flags` requesting contact packets.
pub const ISI_FLAG_CON: u16 = 2;
/// ISI `flags` requesting object-hit packets.
pub const ISI_FLAG_OBH: u16 = 4;
/// ISI `flags` requesting node/lap packets.
pub const ISI_FLAG_NLP: u16 = 8;

const ISI_SIZE: usize = 44;
const MST_SIZE: usize = 68;
const MST_TEXT: usize = 64;
const BFN_SIZE: usize = 8;
const BTN_HEADER: usize = 12;
const BTN_MAX_TEXT: usize = 239;
const INSIM_VERSION: u8 = 9;
const PRODUCT_NAME: &str = "Pitwall";

/// Button placement and style for [`build_btn`].
#[derive(Debug, Clone, Copy)]
pub struct ButtonSpec {
    pub click_id: u8,
    pub inst: u8,
    pub style: u16,
    pub type_in: u8,
    pub left: u8,
    pub top: u8,
    pub width: u8,
    pub height: u8,
}

/// Build the 44-byte ISI handshake from the connection settings.
///
/// Requests MCI, contact, object-hit and node/lap reporting; the update
/// interval is clamped to at least one millisecond and the admin password is
/// truncated into its NUL-padded 16-byte field.
pub fn build_isi(settings: &InSimSettings) -> Vec<u8> {
    let mut packet = Vec::with_capacity(ISI_SIZE);
    packet.push(ISI_SIZE as u8);
    packet.push(ISP_ISI);
    packet.push(1); // reqi: ask for a VER reply
    packet.push(0);
    packet.extend_from_slice(&0u16.to_le_bytes()); // no UDP side-channel
    let flags = ISI_FLAG_MCI | ISI_FLAG_CON | ISI_FLAG_OBH | ISI_FLAG_NLP;
    packet.extend_from_slice(&flags.to_le_bytes());
    packet.push(INSIM_VERSION);
    packet.push(0); // no message prefix character
    packet.extend_from_slice(&settings.interval_ms.max(1).to_le_bytes());
    packet.extend_from_slice(&padded_latin1::<16>(&settings.admin_password, 15));
    packet.extend_from_slice(&padded_latin1::<16>(PRODUCT_NAME, 15));
    packet
}

/// Build a 68-byte MST chat-style command packet.
pub fn build_mst(command: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(MST_SIZE);
    packet.push(MST_SIZE as u8);
    packet.push(ISP_MST);
    packet.push(0);
    packet.push(0);
    packet.extend_from_slice(&padded_latin1::<MST_TEXT>(command, MST_TEXT - 1));
    packet
}

/// Build a variable-length BTN packet with a NUL-terminated caption.
pub fn build_btn(spec: &ButtonSpec, caption: &str) -> Vec<u8> {
    let mut text = latin1_bytes(caption);
    text.truncate(BTN_MAX_TEXT);
    text.push(0);

    let size = BTN_HEADER + text.len();
    let mut packet = Vec::with_capacity(size);
    packet.push(size as u8);
    packet.push(ISP_BTN);
    packet.push(1); // reqi must be non-zero for click reports
    packet.push(spec.click_id);
    packet.push(spec.inst);
    packet.extend_from_slice(&spec.style.to_le_bytes());
    packet.push(spec.type_in);
    packet.push(spec.left);
    packet.push(spec.top);
    packet.push(spec.width);
    packet.push(spec.height);
    packet.extend_from_slice(&text);
    packet
}

/// Build an 8-byte BFN packet deleting one button.
pub fn build_bfn(click_id: u8) -> Vec<u8> {
    vec![BFN_SIZE as u8, ISP_BFN, 0, 0, 0, click_id, 0, 0]
}

/// Latin-1 encode with replacement for characters outside the range.
fn latin1_bytes(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' })
        .collect()
}

/// Encode into a fixed-size NUL-padded field, truncating to `max_len` bytes.
fn padded_latin1<const N: usize>(text: &str, max_len: usize) -> [u8; N] {
    let mut field = [0u8; N];
    let bytes = latin1_bytes(text);
    let take = bytes.len().min(max_len).min(N);
    field[..take].copy_from_slice(&bytes[..take]);
    field
}
