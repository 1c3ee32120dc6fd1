//! # farview-vnc
//!
//! Native RFB/VNC viewer core for FarView.
//!
//! Implements the client side of the RFB protocol: version and security
//! handshake, legacy DES challenge-response authentication, the
//! framebuffer update loop (Raw and CopyRect encodings), and keyboard /
//! pointer input.  Presentation layers consume this crate through
//! [`VncService`] / [`vnc::session::VncSessionHandle`] only.

pub mod vnc;

pub use vnc::errors::VncError;
pub use vnc::framebuffer::Frame;
pub use vnc::service::VncService;
pub use vnc::types::{SessionState, VncConfig};
