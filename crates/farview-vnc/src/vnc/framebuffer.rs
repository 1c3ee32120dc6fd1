//! Decoded framebuffer state.

use bytes::Bytes;

use crate::vnc::types::Rectangle;

/// Immutable snapshot of the framebuffer, published to collaborators as
/// the "latest frame".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u16,
    pub height: u16,
    /// RGBA bytes, row-major, 4 bytes per pixel.
    pub pixels: Bytes,
}

/// The canonical decoded framebuffer for one session.
///
/// Single-writer: only the session task mutates it.  Snapshots are
/// immutable values, safe to hand to any task.  No write or copy may
/// touch coordinates outside the buffer; out-of-bounds requests are
/// dropped rather than clamped.
pub struct PixelBuffer {
    width: u16,
    height: u16,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    fn contains(&self, x: u16, y: u16, w: u16, h: u16) -> bool {
        x as u32 + w as u32 <= self.width as u32 && y as u32 + h as u32 <= self.height as u32
    }

    /// Write one Raw rectangle payload into the buffer.
    ///
    /// `payload` holds 4 bytes per wire pixel; the first three are RGB
    /// and alpha is forced opaque.  Out-of-bounds rectangles are dropped,
    /// and a payload short of a full trailing row stops before that row.
    pub fn update(&mut self, rect: &Rectangle, payload: &[u8]) {
        if rect.width == 0 || rect.height == 0 {
            return;
        }
        if !self.contains(rect.x, rect.y, rect.width, rect.height) {
            log::debug!(
                "dropping out-of-bounds update {}x{}+{}+{}",
                rect.width,
                rect.height,
                rect.x,
                rect.y
            );
            return;
        }
        let row_bytes = rect.width as usize * 4;
        for row in 0..rect.height as usize {
            let src_start = row * row_bytes;
            if src_start + row_bytes > payload.len() {
                break;
            }
            let dst_start =
                ((rect.y as usize + row) * self.width as usize + rect.x as usize) * 4;
            let dst = &mut self.data[dst_start..dst_start + row_bytes];
            let src = &payload[src_start..src_start + row_bytes];
            for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                d[0] = s[0];
                d[1] = s[1];
                d[2] = s[2];
                d[3] = 0xFF;
            }
        }
    }

    /// Copy a same-size block from `(src_x, src_y)` to `dst`.
    pub fn copy_rect(&mut self, src_x: u16, src_y: u16, dst: &Rectangle) {
        if dst.width == 0 || dst.height == 0 {
            return;
        }
        if !self.contains(src_x, src_y, dst.width, dst.height)
            || !self.contains(dst.x, dst.y, dst.width, dst.height)
        {
            log::debug!(
                "dropping out-of-bounds copy {}x{} from {},{} to {},{}",
                dst.width,
                dst.height,
                src_x,
                src_y,
                dst.x,
                dst.y
            );
            return;
        }
        let row_bytes = dst.width as usize * 4;
        // Stage the source region so overlapping moves stay correct.
        let mut staged = vec![0u8; row_bytes * dst.height as usize];
        for row in 0..dst.height as usize {
            let src_start = ((src_y as usize + row) * self.width as usize + src_x as usize) * 4;
            staged[row * row_bytes..(row + 1) * row_bytes]
                .copy_from_slice(&self.data[src_start..src_start + row_bytes]);
        }
        for row in 0..dst.height as usize {
            let dst_start = ((dst.y as usize + row) * self.width as usize + dst.x as usize) * 4;
            self.data[dst_start..dst_start + row_bytes]
                .copy_from_slice(&staged[row * row_bytes..(row + 1) * row_bytes]);
        }
    }

    /// Immutable snapshot of the current contents.  Pure read.
    pub fn snapshot(&self) -> Frame {
        Frame {
            width: self.width,
            height: self.height,
            pixels: Bytes::copy_from_slice(&self.data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: u16, y: u16, w: u16, h: u16) -> Rectangle {
        Rectangle {
            x,
            y,
            width: w,
            height: h,
            encoding: 0,
        }
    }

    fn pixel(frame: &Frame, x: u16, y: u16) -> [u8; 4] {
        let idx = (y as usize * frame.width as usize + x as usize) * 4;
        frame.pixels[idx..idx + 4].try_into().unwrap()
    }

    /// Payload of `n` wire pixels, all `[r, g, b, x]`.
    fn payload(n: usize, r: u8, g: u8, b: u8) -> Vec<u8> {
        [r, g, b, 0x42].repeat(n)
    }

    // ── update ──────────────────────────────────────────────────────

    #[test]
    fn update_writes_exactly_the_rect() {
        let mut fb = PixelBuffer::new(4, 4);
        fb.update(&rect(1, 1, 2, 2), &payload(4, 10, 20, 30));
        let frame = fb.snapshot();
        for y in 0..4u16 {
            for x in 0..4u16 {
                let expected = if (1..3).contains(&x) && (1..3).contains(&y) {
                    [10, 20, 30, 255]
                } else {
                    [0, 0, 0, 0]
                };
                assert_eq!(pixel(&frame, x, y), expected, "pixel {x},{y}");
            }
        }
    }

    #[test]
    fn update_forces_opaque_alpha() {
        let mut fb = PixelBuffer::new(1, 1);
        fb.update(&rect(0, 0, 1, 1), &[1, 2, 3, 0]);
        assert_eq!(pixel(&fb.snapshot(), 0, 0), [1, 2, 3, 255]);
    }

    #[test]
    fn update_out_of_bounds_is_noop() {
        let mut fb = PixelBuffer::new(4, 4);
        let before = fb.snapshot();
        fb.update(&rect(3, 3, 2, 2), &payload(4, 255, 255, 255));
        fb.update(&rect(0, 0, 5, 1), &payload(5, 255, 255, 255));
        fb.update(&rect(100, 100, 1, 1), &payload(1, 255, 255, 255));
        assert_eq!(fb.snapshot(), before);
    }

    #[test]
    fn update_zero_size_is_noop() {
        let mut fb = PixelBuffer::new(4, 4);
        let before = fb.snapshot();
        fb.update(&rect(0, 0, 0, 2), &[]);
        fb.update(&rect(0, 0, 2, 0), &[]);
        assert_eq!(fb.snapshot(), before);
    }

    #[test]
    fn update_stops_before_short_trailing_row() {
        let mut fb = PixelBuffer::new(2, 2);
        // Payload covers the first row and half of the second.
        let mut data = payload(2, 9, 9, 9);
        data.extend_from_slice(&[1, 1, 1, 1]);
        fb.update(&rect(0, 0, 2, 2), &data);
        let frame = fb.snapshot();
        assert_eq!(pixel(&frame, 0, 0), [9, 9, 9, 255]);
        assert_eq!(pixel(&frame, 1, 0), [9, 9, 9, 255]);
        // Second row untouched.
        assert_eq!(pixel(&frame, 0, 1), [0, 0, 0, 0]);
        assert_eq!(pixel(&frame, 1, 1), [0, 0, 0, 0]);
    }

    // ── copy_rect ───────────────────────────────────────────────────

    #[test]
    fn copy_rect_moves_block() {
        let mut fb = PixelBuffer::new(4, 4);
        fb.update(&rect(0, 0, 2, 2), &payload(4, 50, 60, 70));
        let src_region = fb.snapshot();
        fb.copy_rect(0, 0, &rect(2, 2, 2, 2));
        let frame = fb.snapshot();
        for y in 0..2u16 {
            for x in 0..2u16 {
                assert_eq!(pixel(&frame, x + 2, y + 2), pixel(&src_region, x, y));
            }
        }
        // Source still intact.
        assert_eq!(pixel(&frame, 0, 0), [50, 60, 70, 255]);
    }

    #[test]
    fn copy_rect_out_of_bounds_is_noop() {
        let mut fb = PixelBuffer::new(4, 4);
        fb.update(&rect(0, 0, 4, 4), &payload(16, 1, 2, 3));
        let before = fb.snapshot();
        fb.copy_rect(3, 3, &rect(0, 0, 2, 2)); // source overflows
        fb.copy_rect(0, 0, &rect(3, 3, 2, 2)); // destination overflows
        assert_eq!(fb.snapshot(), before);
    }

    #[test]
    fn copy_rect_overlapping_regions() {
        let mut fb = PixelBuffer::new(4, 1);
        // Pixels 0..3 distinct.
        let mut data = Vec::new();
        for i in 0..3u8 {
            data.extend_from_slice(&[i + 1, 0, 0, 0]);
        }
        fb.update(&rect(0, 0, 3, 1), &data);
        // Shift right by one; overlap on pixels 1..3.
        fb.copy_rect(0, 0, &rect(1, 0, 3, 1));
        let frame = fb.snapshot();
        assert_eq!(pixel(&frame, 1, 0), [1, 0, 0, 255]);
        assert_eq!(pixel(&frame, 2, 0), [2, 0, 0, 255]);
        assert_eq!(pixel(&frame, 3, 0), [3, 0, 0, 255]);
    }

    // ── snapshot ────────────────────────────────────────────────────

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let mut fb = PixelBuffer::new(2, 2);
        let before = fb.snapshot();
        fb.update(&rect(0, 0, 2, 2), &payload(4, 200, 200, 200));
        assert_ne!(fb.snapshot(), before);
        assert_eq!(pixel(&before, 0, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn new_buffer_is_zeroed() {
        let fb = PixelBuffer::new(3, 2);
        let frame = fb.snapshot();
        assert_eq!(frame.width, 3);
        assert_eq!(frame.height, 2);
        assert_eq!(frame.pixels.len(), 3 * 2 * 4);
        assert!(frame.pixels.iter().all(|&b| b == 0));
    }
}
