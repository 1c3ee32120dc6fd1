//! VNC session: connection lifecycle, framebuffer update loop, input.
//!
//! A session owns one [`ByteStream`] and one [`PixelBuffer`].  After the
//! handshake completes, two tasks run until disconnect or a fatal error:
//! the update loop (request → decode → publish) and the command task
//! (input events, disconnect).  Writes from both share the stream's
//! serialized writer, so input never interleaves mid-message.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::vnc::encoding;
use crate::vnc::errors::VncError;
use crate::vnc::framebuffer::{Frame, PixelBuffer};
use crate::vnc::handshake;
use crate::vnc::protocol::{self, server_msg};
use crate::vnc::stream::{ByteStream, READ_TIMEOUT};
use crate::vnc::types::{
    InputEvent, Rectangle, ServerInit, SessionInfo, SessionState, SessionStats, VncConfig,
};

/// Size of the command channel buffer.
const COMMAND_CHANNEL_SIZE: usize = 64;

/// Commands accepted by a running session.
#[derive(Debug)]
pub enum SessionCommand {
    /// Relay a keyboard or pointer event.
    Input(InputEvent),
    /// Tear the session down.
    Disconnect,
}

/// Handle to a running VNC session.
///
/// Collaborators interact with the session exclusively through this
/// handle: observable state, the latest decoded frame, input, and
/// disconnect.
#[derive(Debug)]
pub struct VncSessionHandle {
    pub id: String,
    pub config: VncConfig,
    /// ServerInit as negotiated; fixes the framebuffer dimensions.
    pub server_init: ServerInit,
    pub stats: Arc<SessionStats>,
    /// ISO-8601 timestamp of when the session reached Active.
    pub connected_at: String,
    cmd_tx: mpsc::Sender<SessionCommand>,
    state_rx: watch::Receiver<SessionState>,
    frame_rx: watch::Receiver<Option<Frame>>,
    last_error: Arc<Mutex<Option<VncError>>>,
    update_task: JoinHandle<()>,
    command_task: JoinHandle<()>,
}

impl VncSessionHandle {
    /// Connect, authenticate, and start the update loop.
    ///
    /// Returns only after the session reached Active; every handshake
    /// failure is surfaced here and leaves the state at Failed.
    pub async fn connect(id: String, config: VncConfig) -> Result<Self, VncError> {
        let stats = Arc::new(SessionStats::new());
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let (frame_tx, frame_rx) = watch::channel(None);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);

        log::info!("[vnc {id}] connecting to {}:{}", config.host, config.port);
        let stream = match ByteStream::connect(
            &config.host,
            config.port,
            Duration::from_secs(config.connect_timeout_secs),
            stats.clone(),
        )
        .await
        {
            Ok(stream) => stream,
            Err(e) => {
                let _ = state_tx.send(SessionState::Failed);
                return Err(e);
            }
        };

        let password = config.password.as_deref().unwrap_or("");
        let server_init =
            match handshake::negotiate(&stream, password, config.shared, &state_tx).await {
                Ok(init) => init,
                Err(e) => {
                    let _ = state_tx.send(SessionState::Failed);
                    stream.shutdown();
                    return Err(e);
                }
            };

        // Declare what we can actually decode before the first update
        // request, so a conforming server never sends anything else.
        if let Err(e) = stream
            .write(&protocol::build_set_encodings(&encoding::SUPPORTED_ENCODINGS))
            .await
        {
            let _ = state_tx.send(SessionState::Failed);
            stream.shutdown();
            return Err(e);
        }

        let _ = state_tx.send(SessionState::Active);
        log::info!(
            "[vnc {id}] active: {}x{} \"{}\"",
            server_init.width,
            server_init.height,
            server_init.name
        );

        let stream = Arc::new(stream);
        let state_tx = Arc::new(state_tx);
        let last_error = Arc::new(Mutex::new(None));
        let framebuffer = PixelBuffer::new(server_init.width, server_init.height);

        let update_task = tokio::spawn(update_loop(
            id.clone(),
            stream.clone(),
            framebuffer,
            state_tx.clone(),
            frame_tx,
            stats.clone(),
            last_error.clone(),
        ));
        let command_task = tokio::spawn(command_loop(
            id.clone(),
            config.view_only,
            stream,
            cmd_rx,
            state_tx,
            stats.clone(),
        ));

        Ok(Self {
            id,
            config,
            server_init,
            stats,
            connected_at: chrono::Utc::now().to_rfc3339(),
            cmd_tx,
            state_rx,
            frame_rx,
            last_error,
            update_task,
            command_task,
        })
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// The most recently published frame, if any update has completed.
    pub fn latest_frame(&self) -> Option<Frame> {
        self.frame_rx.borrow().clone()
    }

    /// Subscribe to published frames.
    pub fn watch_frames(&self) -> watch::Receiver<Option<Frame>> {
        self.frame_rx.clone()
    }

    /// The most recent error recorded by the session, if any.
    pub fn last_error(&self) -> Option<VncError> {
        self.last_error.lock().unwrap().clone()
    }

    /// Relay an input event.  Fire-and-forget; ordering across calls is
    /// preserved by the serialized outbound writer.
    pub async fn send_input(&self, event: InputEvent) -> Result<(), VncError> {
        self.cmd_tx
            .send(SessionCommand::Input(event))
            .await
            .map_err(|_| VncError::transport("session task is gone"))
    }

    pub async fn send_key(&self, keysym: u32, down: bool) -> Result<(), VncError> {
        self.send_input(InputEvent::Key { keysym, down }).await
    }

    pub async fn send_pointer(&self, x: u16, y: u16, button_mask: u8) -> Result<(), VncError> {
        self.send_input(InputEvent::Pointer { x, y, button_mask }).await
    }

    /// Request teardown.  Idempotent: disconnecting an already-dead
    /// session is not an error.
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Disconnect).await;
    }

    /// Session metadata for the caller.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
            state: self.state(),
            label: self.config.label.clone(),
            server_name: if self.server_init.name.is_empty() {
                None
            } else {
                Some(self.server_init.name.clone())
            },
            framebuffer_width: self.server_init.width,
            framebuffer_height: self.server_init.height,
            pixel_format: self.server_init.pixel_format.to_string(),
            connected_at: self.connected_at.clone(),
            view_only: self.config.view_only,
            stats: self.stats.snapshot(),
        }
    }
}

impl Drop for VncSessionHandle {
    fn drop(&mut self) {
        self.update_task.abort();
        self.command_task.abort();
    }
}

// ── Update loop ─────────────────────────────────────────────────────────

/// Repeated request → decode → publish cycles until cancelled or a fatal
/// error.  Decode errors abort only the current cycle; the next
/// iteration starts over with a fresh update request.  No self-retry on
/// transport errors — reconnection is a caller decision.
async fn update_loop(
    id: String,
    stream: Arc<ByteStream>,
    mut framebuffer: PixelBuffer,
    state_tx: Arc<watch::Sender<SessionState>>,
    frame_tx: watch::Sender<Option<Frame>>,
    stats: Arc<SessionStats>,
    last_error: Arc<Mutex<Option<VncError>>>,
) {
    loop {
        match run_update_cycle(&stream, &mut framebuffer, &stats).await {
            Ok(applied) => {
                if applied > 0 {
                    frame_tx.send_replace(Some(framebuffer.snapshot()));
                }
            }
            Err(e @ VncError::Decode(_)) => {
                log::warn!("[vnc {id}] {e}");
                *last_error.lock().unwrap() = Some(e);
            }
            Err(e) => {
                if state_tx.borrow().is_terminal() {
                    break; // deliberate teardown
                }
                log::error!("[vnc {id}] session failed: {e}");
                *last_error.lock().unwrap() = Some(e);
                let _ = state_tx.send(SessionState::Failed);
                break;
            }
        }
    }
}

/// One cycle: request an incremental update for the whole screen and
/// decode the response.  Returns the number of rectangles applied.
async fn run_update_cycle(
    stream: &ByteStream,
    framebuffer: &mut PixelBuffer,
    stats: &SessionStats,
) -> Result<usize, VncError> {
    // Oversized sentinel dimensions; the server clamps to its real size.
    stream
        .write(&protocol::build_fb_update_request(true, 0, 0, 0xFFFF, 0xFFFF))
        .await?;

    let msg_type = stream.read_u8(READ_TIMEOUT).await?;
    if msg_type != server_msg::FRAMEBUFFER_UPDATE {
        log::debug!("ignoring server message type {msg_type}");
        return Ok(0);
    }

    read_framebuffer_update(stream, framebuffer, stats).await
}

/// Decode the body of a FramebufferUpdate (message type already
/// consumed).  Returns the number of rectangles applied.
async fn read_framebuffer_update(
    stream: &ByteStream,
    framebuffer: &mut PixelBuffer,
    stats: &SessionStats,
) -> Result<usize, VncError> {
    let header = stream.read_exactly(3, READ_TIMEOUT).await?; // padding + count
    let advertised = u16::from_be_bytes([header[1], header[2]]) as usize;
    let count = advertised.min(encoding::MAX_RECTS_PER_UPDATE);
    if advertised > count {
        log::warn!("server claims {advertised} rectangles, processing {count}");
    }

    let mut applied = 0usize;
    let mut invalid_streak = 0u32;

    for _ in 0..count {
        let header = stream.read_exactly(12, READ_TIMEOUT).await?;
        let rect = protocol::parse_rect_header(&header)?;

        if decode_rectangle(stream, framebuffer, &rect, stats).await? {
            applied += 1;
            invalid_streak = 0;
        } else {
            invalid_streak += 1;
            if invalid_streak > encoding::MAX_CONSECUTIVE_INVALID {
                return Err(VncError::decode(format!(
                    "{invalid_streak} consecutive undecodable rectangles, \
                     stream presumed desynchronized"
                )));
            }
        }
    }

    Ok(applied)
}

/// Decode one rectangle.  `Ok(true)` when the rectangle was applied to
/// the framebuffer, `Ok(false)` when it was rejected or skipped.
async fn decode_rectangle(
    stream: &ByteStream,
    framebuffer: &mut PixelBuffer,
    rect: &Rectangle,
    stats: &SessionStats,
) -> Result<bool, VncError> {
    if !encoding::plausible_rect(rect, framebuffer.width(), framebuffer.height()) {
        log::warn!(
            "skipping implausible rectangle {}x{}+{}+{}",
            rect.width,
            rect.height,
            rect.x,
            rect.y
        );
        return Ok(false);
    }

    match rect.encoding {
        encoding::RAW => {
            let len = encoding::raw_payload_len(rect.width, rect.height);
            if len > encoding::MAX_RAW_PAYLOAD {
                log::warn!("rejecting {len}-byte raw rectangle");
                return Ok(false);
            }
            let payload = stream.read_exactly(len, READ_TIMEOUT).await?;
            framebuffer.update(rect, &payload);
            stats.rects_decoded.fetch_add(1, Ordering::Relaxed);
            Ok(true)
        }
        encoding::COPY_RECT => {
            let src = stream.read_exactly(4, READ_TIMEOUT).await?;
            let src_x = u16::from_be_bytes([src[0], src[1]]);
            let src_y = u16::from_be_bytes([src[2], src[3]]);
            framebuffer.copy_rect(src_x, src_y, rect);
            stats.rects_decoded.fetch_add(1, Ordering::Relaxed);
            Ok(true)
        }
        other => {
            let skip = encoding::skip_length(other, rect.width, rect.height);
            log::warn!("unsupported encoding {other}, skipping an estimated {skip} bytes");
            if skip > 0 {
                stream.read_exactly(skip, READ_TIMEOUT).await?;
            }
            Ok(false)
        }
    }
}

// ── Command loop ────────────────────────────────────────────────────────

/// Encode and write input events; handle disconnect.
async fn command_loop(
    id: String,
    view_only: bool,
    stream: Arc<ByteStream>,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    state_tx: Arc<watch::Sender<SessionState>>,
    stats: Arc<SessionStats>,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            SessionCommand::Input(event) => {
                if view_only {
                    log::debug!("[vnc {id}] dropping input event (view-only)");
                    continue;
                }
                if !state_tx.borrow().is_active() {
                    continue;
                }
                let write = match event {
                    InputEvent::Key { keysym, down } => {
                        stats.key_events_sent.fetch_add(1, Ordering::Relaxed);
                        stream.write(&protocol::build_key_event(down, keysym)).await
                    }
                    InputEvent::Pointer { x, y, button_mask } => {
                        stats.pointer_events_sent.fetch_add(1, Ordering::Relaxed);
                        stream
                            .write(&protocol::build_pointer_event(button_mask, x, y))
                            .await
                    }
                };
                if let Err(e) = write {
                    log::warn!("[vnc {id}] input write failed: {e}");
                    break;
                }
            }
            SessionCommand::Disconnect => {
                log::info!("[vnc {id}] disconnect requested");
                let _ = state_tx.send(SessionState::Disconnected);
                stream.shutdown();
                break;
            }
        }
    }
}
