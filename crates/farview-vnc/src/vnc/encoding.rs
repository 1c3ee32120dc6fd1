//! Encoding support: decode limits, rectangle plausibility, and the
//! best-effort skip heuristic for encodings this client cannot decode.

use crate::vnc::types::Rectangle;

/// Raw pixel data (§7.7.1).
pub const RAW: i32 = 0;
/// Block copy from elsewhere in the framebuffer (§7.7.2).
pub const COPY_RECT: i32 = 1;
/// Cursor shape pseudo-encoding.
pub const CURSOR_PSEUDO: i32 = -239;
/// Desktop resize pseudo-encoding.
pub const DESKTOP_SIZE_PSEUDO: i32 = -223;

/// Encodings advertised via SetEncodings, most preferred first.
pub const SUPPORTED_ENCODINGS: [i32; 2] = [COPY_RECT, RAW];

/// Hard ceiling on rectangles processed per update, whatever the server
/// claims.
pub const MAX_RECTS_PER_UPDATE: usize = 1000;

/// An update cycle is presumed desynchronized beyond this many
/// consecutive undecodable rectangles.
pub const MAX_CONSECUTIVE_INVALID: u32 = 10;

/// Sanity cap on a single Raw payload.
pub const MAX_RAW_PAYLOAD: usize = 100 * 1024 * 1024;

/// Cap on a single best-effort skip.
pub const MAX_SKIP_BYTES: usize = 1_000_000;

/// Plausibility check against the known framebuffer dimensions.
///
/// Zero-sized rectangles, or coordinates/dimensions beyond twice the
/// buffer size, are treated as corrupt framing.
pub fn plausible_rect(rect: &Rectangle, fb_width: u16, fb_height: u16) -> bool {
    if rect.width == 0 || rect.height == 0 {
        return false;
    }
    let max_w = fb_width as u32 * 2;
    let max_h = fb_height as u32 * 2;
    (rect.x as u32) <= max_w
        && (rect.width as u32) <= max_w
        && (rect.y as u32) <= max_h
        && (rect.height as u32) <= max_h
}

/// Payload length of a Raw rectangle (4 bytes per pixel).
pub fn raw_payload_len(width: u16, height: u16) -> usize {
    width as usize * height as usize * 4
}

/// Estimated payload length for an encoding we cannot decode.
///
/// DesktopSize carries no payload; Cursor carries pixels plus a 1-bit
/// mask; anything else is guessed at Raw size, capped.  Best-effort
/// only — a wrong estimate desynchronizes the stream, which the
/// consecutive-invalid guard then catches.
pub fn skip_length(encoding: i32, width: u16, height: u16) -> usize {
    let w = width as usize;
    let h = height as usize;
    match encoding {
        DESKTOP_SIZE_PSEUDO => 0,
        CURSOR_PSEUDO => w * h * 4 + (w + 7) / 8 * h,
        _ => (w * h * 4).min(MAX_SKIP_BYTES),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: u16, y: u16, w: u16, h: u16, encoding: i32) -> Rectangle {
        Rectangle {
            x,
            y,
            width: w,
            height: h,
            encoding,
        }
    }

    // ── plausible_rect ──────────────────────────────────────────────

    #[test]
    fn plausible_inside_buffer() {
        assert!(plausible_rect(&rect(0, 0, 800, 600, RAW), 800, 600));
        assert!(plausible_rect(&rect(100, 100, 50, 50, RAW), 800, 600));
    }

    #[test]
    fn plausible_up_to_twice_dimensions() {
        assert!(plausible_rect(&rect(1600, 1200, 1600, 1200, RAW), 800, 600));
    }

    #[test]
    fn implausible_zero_size() {
        assert!(!plausible_rect(&rect(0, 0, 0, 10, RAW), 800, 600));
        assert!(!plausible_rect(&rect(0, 0, 10, 0, RAW), 800, 600));
    }

    #[test]
    fn implausible_beyond_twice_dimensions() {
        assert!(!plausible_rect(&rect(0, 0, 1601, 10, RAW), 800, 600));
        assert!(!plausible_rect(&rect(0, 1201, 10, 10, RAW), 800, 600));
        assert!(!plausible_rect(&rect(1601, 0, 10, 10, RAW), 800, 600));
    }

    // ── skip_length ─────────────────────────────────────────────────

    #[test]
    fn skip_desktop_size_is_zero() {
        assert_eq!(skip_length(DESKTOP_SIZE_PSEUDO, 1920, 1080), 0);
    }

    #[test]
    fn skip_cursor_includes_bitmask() {
        // 16x16 cursor: 16*16*4 pixels + 2 mask bytes per row.
        assert_eq!(skip_length(CURSOR_PSEUDO, 16, 16), 16 * 16 * 4 + 2 * 16);
        // 9 px wide rounds the mask row up to 2 bytes.
        assert_eq!(skip_length(CURSOR_PSEUDO, 9, 4), 9 * 4 * 4 + 2 * 4);
    }

    #[test]
    fn skip_unknown_is_raw_estimate() {
        assert_eq!(skip_length(16, 10, 10), 10 * 10 * 4);
    }

    #[test]
    fn skip_unknown_is_capped() {
        assert_eq!(skip_length(7, 1000, 1000), MAX_SKIP_BYTES);
    }

    // ── raw_payload_len ─────────────────────────────────────────────

    #[test]
    fn raw_payload_len_is_four_bytes_per_pixel() {
        assert_eq!(raw_payload_len(800, 600), 800 * 600 * 4);
        assert_eq!(raw_payload_len(0, 600), 0);
    }
}
