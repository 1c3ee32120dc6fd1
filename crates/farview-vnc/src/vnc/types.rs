//! VNC/RFB types: configuration, session state, pixel formats, events.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ── Session state ───────────────────────────────────────────────────────

/// Lifecycle state of a VNC session.
///
/// Transitions are forward-only, except that any state may move to
/// `Failed` or `Disconnected`.  `Active` is the only state in which
/// frame updates and input are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Handshaking,
    Authenticating,
    Active,
    Failed,
}

impl SessionState {
    pub fn is_active(self) -> bool {
        self == Self::Active
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn may_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        if matches!(next, Failed | Disconnected) {
            return true;
        }
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Handshaking)
                | (Handshaking, Authenticating)
                | (Authenticating, Active)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Authenticating => "authenticating",
            Self::Active => "active",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

// ── Pixel format ────────────────────────────────────────────────────────

/// RFB pixel format descriptor (16 bytes on the wire).
///
/// Carried for session metadata only: the decoder assumes 32-bit pixels
/// whose first three bytes are RGB, regardless of what the server
/// declares here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: bool,
    pub true_colour: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// Standard 32-bit true-colour format.
    pub fn rgba32() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: false,
            true_colour: true,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    /// Serialize to the 16-byte wire format.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0] = self.bits_per_pixel;
        buf[1] = self.depth;
        buf[2] = self.big_endian as u8;
        buf[3] = self.true_colour as u8;
        buf[4..6].copy_from_slice(&self.red_max.to_be_bytes());
        buf[6..8].copy_from_slice(&self.green_max.to_be_bytes());
        buf[8..10].copy_from_slice(&self.blue_max.to_be_bytes());
        buf[10] = self.red_shift;
        buf[11] = self.green_shift;
        buf[12] = self.blue_shift;
        // 13..16 = padding
        buf
    }

    /// Parse from the 16-byte wire format.
    pub fn from_bytes(buf: &[u8; 16]) -> Self {
        Self {
            bits_per_pixel: buf[0],
            depth: buf[1],
            big_endian: buf[2] != 0,
            true_colour: buf[3] != 0,
            red_max: u16::from_be_bytes([buf[4], buf[5]]),
            green_max: u16::from_be_bytes([buf[6], buf[7]]),
            blue_max: u16::from_be_bytes([buf[8], buf[9]]),
            red_shift: buf[10],
            green_shift: buf[11],
            blue_shift: buf[12],
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_pixel as usize + 7) / 8
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::rgba32()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}bpp depth={} {}",
            self.bits_per_pixel,
            self.depth,
            if self.big_endian { "BE" } else { "LE" }
        )
    }
}

// ── Wire structures ─────────────────────────────────────────────────────

/// ServerInit message data.  Immutable once parsed; fixes the
/// framebuffer dimensions for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInit {
    pub width: u16,
    pub height: u16,
    pub pixel_format: PixelFormat,
    pub name: String,
}

/// Header of one framebuffer-update rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rectangle {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub encoding: i32,
}

// ── Input events ────────────────────────────────────────────────────────

/// A user input event relayed to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputEvent {
    Key { keysym: u32, down: bool },
    Pointer { x: u16, y: u16, button_mask: u8 },
}

/// Common X11 keysym values used in VNC key events.
pub mod keysym {
    pub const BACKSPACE: u32 = 0xFF08;
    pub const TAB: u32 = 0xFF09;
    pub const RETURN: u32 = 0xFF0D;
    pub const ESCAPE: u32 = 0xFF1B;
    pub const INSERT: u32 = 0xFF63;
    pub const DELETE: u32 = 0xFFFF;
    pub const HOME: u32 = 0xFF50;
    pub const END: u32 = 0xFF57;
    pub const PAGE_UP: u32 = 0xFF55;
    pub const PAGE_DOWN: u32 = 0xFF56;
    pub const LEFT: u32 = 0xFF51;
    pub const UP: u32 = 0xFF52;
    pub const RIGHT: u32 = 0xFF53;
    pub const DOWN: u32 = 0xFF54;
    pub const F1: u32 = 0xFFBE;
    pub const F12: u32 = 0xFFC9;
    pub const SHIFT_L: u32 = 0xFFE1;
    pub const CONTROL_L: u32 = 0xFFE3;
    pub const ALT_L: u32 = 0xFFE9;
    pub const SUPER_L: u32 = 0xFFEB;
}

/// Mouse button mask bits for VNC pointer events.
pub mod mouse_button {
    pub const LEFT: u8 = 1;
    pub const MIDDLE: u8 = 2;
    pub const RIGHT: u8 = 4;
    pub const SCROLL_UP: u8 = 8;
    pub const SCROLL_DOWN: u8 = 16;
}

// ── Configuration ───────────────────────────────────────────────────────

/// Configuration for a new VNC connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VncConfig {
    /// Target host.
    pub host: String,
    /// Target port (default 5900).
    #[serde(default = "default_vnc_port")]
    pub port: u16,
    /// Password for VNC authentication.
    pub password: Option<String>,
    /// Request a shared desktop (allow other clients).
    #[serde(default = "default_true")]
    pub shared: bool,
    /// View-only mode — keyboard/mouse events are dropped.
    #[serde(default)]
    pub view_only: bool,
    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Connection label / friendly name.
    pub label: Option<String>,
}

fn default_vnc_port() -> u16 {
    5900
}
fn default_true() -> bool {
    true
}
fn default_connect_timeout() -> u64 {
    15
}

impl Default for VncConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_vnc_port(),
            password: None,
            shared: true,
            view_only: false,
            connect_timeout_secs: default_connect_timeout(),
            label: None,
        }
    }
}

// ── Session statistics ──────────────────────────────────────────────────

/// Live counters for a session (atomics — safe to read from any thread).
#[derive(Debug, Default)]
pub struct SessionStats {
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub rects_decoded: AtomicU64,
    pub key_events_sent: AtomicU64,
    pub pointer_events_sent: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            rects_decoded: self.rects_decoded.load(Ordering::Relaxed),
            key_events_sent: self.key_events_sent.load(Ordering::Relaxed),
            pointer_events_sent: self.pointer_events_sent.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionStatsSnapshot {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rects_decoded: u64,
    pub key_events_sent: u64,
    pub pointer_events_sent: u64,
}

// ── Session metadata ────────────────────────────────────────────────────

/// Metadata about a live (or recently closed) VNC session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub state: SessionState,
    pub label: Option<String>,
    /// Server desktop name from ServerInit.
    pub server_name: Option<String>,
    pub framebuffer_width: u16,
    pub framebuffer_height: u16,
    /// Negotiated pixel format, as reported by the server.
    pub pixel_format: String,
    /// ISO-8601 timestamp of when the session reached Active.
    pub connected_at: String,
    pub view_only: bool,
    pub stats: SessionStatsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── SessionState ────────────────────────────────────────────────

    #[test]
    fn state_forward_transitions() {
        use SessionState::*;
        assert!(Disconnected.may_transition_to(Connecting));
        assert!(Connecting.may_transition_to(Handshaking));
        assert!(Handshaking.may_transition_to(Authenticating));
        assert!(Authenticating.may_transition_to(Active));
    }

    #[test]
    fn state_no_backward_transitions() {
        use SessionState::*;
        assert!(!Active.may_transition_to(Connecting));
        assert!(!Authenticating.may_transition_to(Handshaking));
        assert!(!Connecting.may_transition_to(Active));
    }

    #[test]
    fn any_state_may_fail_or_disconnect() {
        use SessionState::*;
        for s in [Disconnected, Connecting, Handshaking, Authenticating, Active, Failed] {
            assert!(s.may_transition_to(Failed));
            assert!(s.may_transition_to(Disconnected));
        }
    }

    #[test]
    fn state_predicates() {
        assert!(SessionState::Active.is_active());
        assert!(!SessionState::Handshaking.is_active());
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Disconnected.is_terminal());
        assert!(!SessionState::Active.is_terminal());
    }

    #[test]
    fn state_display() {
        assert_eq!(SessionState::Active.to_string(), "active");
        assert_eq!(SessionState::Handshaking.to_string(), "handshaking");
    }

    // ── PixelFormat ─────────────────────────────────────────────────

    #[test]
    fn pixel_format_rgba32() {
        let pf = PixelFormat::rgba32();
        assert_eq!(pf.bits_per_pixel, 32);
        assert_eq!(pf.depth, 24);
        assert!(pf.true_colour);
        assert_eq!(pf.bytes_per_pixel(), 4);
    }

    #[test]
    fn pixel_format_bytes_roundtrip() {
        let pf = PixelFormat::rgba32();
        assert_eq!(PixelFormat::from_bytes(&pf.to_bytes()), pf);
    }

    #[test]
    fn pixel_format_parses_big_endian_flag() {
        let mut bytes = PixelFormat::rgba32().to_bytes();
        bytes[2] = 1;
        assert!(PixelFormat::from_bytes(&bytes).big_endian);
    }

    #[test]
    fn pixel_format_display() {
        let s = PixelFormat::rgba32().to_string();
        assert!(s.contains("32bpp"));
        assert!(s.contains("LE"));
    }

    // ── VncConfig ───────────────────────────────────────────────────

    #[test]
    fn config_default() {
        let cfg = VncConfig::default();
        assert_eq!(cfg.port, 5900);
        assert!(cfg.shared);
        assert!(!cfg.view_only);
        assert_eq!(cfg.connect_timeout_secs, 15);
    }

    #[test]
    fn config_deserialize_minimal() {
        let cfg: VncConfig = serde_json::from_str(r#"{"host":"10.0.0.1"}"#).unwrap();
        assert_eq!(cfg.host, "10.0.0.1");
        assert_eq!(cfg.port, 5900);
        assert!(cfg.shared);
    }

    #[test]
    fn config_serde_roundtrip() {
        let cfg = VncConfig {
            host: "10.0.0.5".into(),
            port: 5901,
            password: Some("secret".into()),
            label: Some("Lab".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let de: VncConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(de.host, "10.0.0.5");
        assert_eq!(de.port, 5901);
        assert_eq!(de.password.as_deref(), Some("secret"));
    }

    // ── InputEvent ──────────────────────────────────────────────────

    #[test]
    fn input_event_serde() {
        let ev = InputEvent::Key {
            keysym: keysym::RETURN,
            down: true,
        };
        let json = serde_json::to_string(&ev).unwrap();
        let de: InputEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(de, ev);
    }

    // ── SessionStats ────────────────────────────────────────────────

    #[test]
    fn stats_snapshot_reflects_counters() {
        let stats = SessionStats::new();
        stats.bytes_sent.fetch_add(10, Ordering::Relaxed);
        stats.rects_decoded.fetch_add(3, Ordering::Relaxed);
        let snap = stats.snapshot();
        assert_eq!(snap.bytes_sent, 10);
        assert_eq!(snap.rects_decoded, 3);
        assert_eq!(snap.bytes_received, 0);
    }

    // ── Constants ───────────────────────────────────────────────────

    #[test]
    fn keysym_values() {
        assert_eq!(keysym::RETURN, 0xFF0D);
        assert_eq!(keysym::ESCAPE, 0xFF1B);
        assert_eq!(keysym::CONTROL_L, 0xFFE3);
    }

    #[test]
    fn mouse_button_mask_bits() {
        assert_eq!(mouse_button::LEFT | mouse_button::RIGHT, 5);
        assert_eq!(mouse_button::SCROLL_DOWN, 16);
    }
}
