//! RFB protocol message builders and parsers.
//!
//! Client → Server and Server → Client message framing per RFC 6143.
//! All multi-byte integers are big-endian.

use crate::vnc::errors::VncError;
use crate::vnc::types::{PixelFormat, Rectangle};

/// Length of the protocol-version banner.
pub const VERSION_LEN: usize = 12;

/// Prefix every RFB version banner starts with.
pub const VERSION_PREFIX: &[u8; 4] = b"RFB ";

/// Client-to-server message type codes (§7.5).
pub mod client_msg {
    pub const SET_PIXEL_FORMAT: u8 = 0;
    pub const SET_ENCODINGS: u8 = 2;
    pub const FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;
    pub const KEY_EVENT: u8 = 4;
    pub const POINTER_EVENT: u8 = 5;
}

/// Server-to-client message type codes (§7.6).
pub mod server_msg {
    pub const FRAMEBUFFER_UPDATE: u8 = 0;
    pub const SET_COLOUR_MAP_ENTRIES: u8 = 1;
    pub const BELL: u8 = 2;
    pub const SERVER_CUT_TEXT: u8 = 3;
}

/// RFB security type codes (§7.1.2).
pub mod security {
    pub const NONE: u8 = 1;
    pub const VNC_AUTH: u8 = 2;
}

// ── Client → Server message builders ────────────────────────────────────

/// Build the 1-byte ClientInit message.  `shared` = allow other clients.
pub fn build_client_init(shared: bool) -> [u8; 1] {
    [shared as u8]
}

/// Build SetEncodings (§7.5.2): 1 byte type + 1 padding + count + 4 bytes
/// per encoding, most preferred first.
pub fn build_set_encodings(encodings: &[i32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + encodings.len() * 4);
    buf.push(client_msg::SET_ENCODINGS);
    buf.push(0); // padding
    buf.extend_from_slice(&(encodings.len() as u16).to_be_bytes());
    for &enc in encodings {
        buf.extend_from_slice(&enc.to_be_bytes());
    }
    buf
}

/// Build FramebufferUpdateRequest (§7.5.3).
pub fn build_fb_update_request(incremental: bool, x: u16, y: u16, width: u16, height: u16) -> [u8; 10] {
    let mut msg = [0u8; 10];
    msg[0] = client_msg::FRAMEBUFFER_UPDATE_REQUEST;
    msg[1] = incremental as u8;
    msg[2..4].copy_from_slice(&x.to_be_bytes());
    msg[4..6].copy_from_slice(&y.to_be_bytes());
    msg[6..8].copy_from_slice(&width.to_be_bytes());
    msg[8..10].copy_from_slice(&height.to_be_bytes());
    msg
}

/// Build KeyEvent (§7.5.4).
pub fn build_key_event(down: bool, keysym: u32) -> [u8; 8] {
    let mut msg = [0u8; 8];
    msg[0] = client_msg::KEY_EVENT;
    msg[1] = down as u8;
    // 2..4 = padding
    msg[4..8].copy_from_slice(&keysym.to_be_bytes());
    msg
}

/// Build PointerEvent (§7.5.5).
pub fn build_pointer_event(button_mask: u8, x: u16, y: u16) -> [u8; 6] {
    let mut msg = [0u8; 6];
    msg[0] = client_msg::POINTER_EVENT;
    msg[1] = button_mask;
    msg[2..4].copy_from_slice(&x.to_be_bytes());
    msg[4..6].copy_from_slice(&y.to_be_bytes());
    msg
}

// ── Server → Client parsers ─────────────────────────────────────────────

/// Parse the fixed 24-byte head of ServerInit.
/// Returns (width, height, pixel format, name length).
pub fn parse_server_init_header(data: &[u8]) -> Result<(u16, u16, PixelFormat, usize), VncError> {
    if data.len() < 24 {
        return Err(VncError::protocol(format!(
            "ServerInit header too short: {} bytes",
            data.len()
        )));
    }
    let width = u16::from_be_bytes([data[0], data[1]]);
    let height = u16::from_be_bytes([data[2], data[3]]);
    let mut pf_bytes = [0u8; 16];
    pf_bytes.copy_from_slice(&data[4..20]);
    let pixel_format = PixelFormat::from_bytes(&pf_bytes);
    let name_len = u32::from_be_bytes([data[20], data[21], data[22], data[23]]) as usize;
    Ok((width, height, pixel_format, name_len))
}

/// Parse a framebuffer-update rectangle header (12 bytes).
pub fn parse_rect_header(data: &[u8]) -> Result<Rectangle, VncError> {
    if data.len() < 12 {
        return Err(VncError::protocol("rectangle header too short"));
    }
    Ok(Rectangle {
        x: u16::from_be_bytes([data[0], data[1]]),
        y: u16::from_be_bytes([data[2], data[3]]),
        width: u16::from_be_bytes([data[4], data[5]]),
        height: u16::from_be_bytes([data[6], data[7]]),
        encoding: i32::from_be_bytes([data[8], data[9], data[10], data[11]]),
    })
}
