//! VNC/RFB crate: sub-modules.

pub mod auth;
pub mod diagnostics;
pub mod encoding;
pub mod errors;
pub mod framebuffer;
pub mod handshake;
pub mod protocol;
pub mod service;
pub mod session;
pub mod stream;
pub mod types;

// Re-export top-level items for convenience.
pub use errors::VncError;
pub use framebuffer::{Frame, PixelBuffer};
pub use service::{VncService, VncServiceState};
pub use session::VncSessionHandle;
pub use types::*;
