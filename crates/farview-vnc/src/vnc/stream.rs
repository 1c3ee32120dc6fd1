//! Byte transport: receive queue and stream wrapper.
//!
//! RFB is strictly request/response at the message-framing level, so
//! reads are expressed as sequential `read_exactly` calls against a
//! single receive queue that a background pump keeps filled from the
//! socket.  The queue admits at most one outstanding reader.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::vnc::errors::VncError;
use crate::vnc::types::SessionStats;

/// Timeout for steady-state protocol reads.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Longer timeout for the leading ServerInit fields — slow servers
/// finish session setup between SecurityResult and Init.
pub const SERVER_INIT_TIMEOUT: Duration = Duration::from_secs(10);

struct Waiter {
    needed: usize,
    tx: oneshot::Sender<Result<Bytes, VncError>>,
}

struct QueueInner {
    buf: BytesMut,
    waiter: Option<Waiter>,
    closed: Option<String>,
}

/// Ordered byte FIFO with at most one outstanding reader.
pub struct ReceiveQueue {
    inner: Mutex<QueueInner>,
}

impl ReceiveQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                buf: BytesMut::new(),
                waiter: None,
                closed: None,
            }),
        }
    }

    /// Append bytes arriving from the socket and satisfy the registered
    /// waiter if its requested count is now covered.
    pub fn push(&self, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        inner.buf.extend_from_slice(data);
        let satisfied = inner
            .waiter
            .as_ref()
            .is_some_and(|w| inner.buf.len() >= w.needed);
        if satisfied {
            let w = inner.waiter.take().unwrap();
            let chunk = inner.buf.split_to(w.needed).freeze();
            let _ = w.tx.send(Ok(chunk));
        }
    }

    /// Mark the queue closed; a pending or future read resolves with a
    /// transport error.
    pub fn close(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut inner = self.inner.lock().unwrap();
        if inner.closed.is_none() {
            inner.closed = Some(reason.clone());
        }
        if let Some(w) = inner.waiter.take() {
            let _ = w.tx.send(Err(VncError::transport(reason)));
        }
    }

    /// Take exactly `n` bytes from the head of the queue, waiting up to
    /// `wait` for them to arrive.
    pub async fn read_exactly(&self, n: usize, wait: Duration) -> Result<Bytes, VncError> {
        let mut rx = {
            let mut inner = self.inner.lock().unwrap();
            if inner.buf.len() >= n {
                return Ok(inner.buf.split_to(n).freeze());
            }
            if let Some(reason) = &inner.closed {
                return Err(VncError::transport(format!("connection closed: {reason}")));
            }
            if inner.waiter.is_some() {
                return Err(VncError::transport(
                    "concurrent read on the receive queue",
                ));
            }
            let (tx, rx) = oneshot::channel();
            inner.waiter = Some(Waiter { needed: n, tx });
            rx
        };

        match timeout(wait, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(VncError::transport("receive queue dropped")),
            Err(_) => {
                // Timed out.  The pump may still win the race between the
                // timer firing and us reacquiring the lock; whoever gets
                // there first clears the waiter slot.
                let mut inner = self.inner.lock().unwrap();
                if inner.waiter.take().is_some() {
                    Err(VncError::transport(format!(
                        "timed out waiting for {n} bytes"
                    )))
                } else {
                    match rx.try_recv() {
                        Ok(result) => result,
                        Err(_) => Err(VncError::transport(format!(
                            "timed out waiting for {n} bytes"
                        ))),
                    }
                }
            }
        }
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.inner.lock().unwrap().buf.len()
    }
}

impl Default for ReceiveQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Bidirectional RFB transport over TCP.
///
/// Reading goes through the [`ReceiveQueue`]; a background pump drains
/// the socket into it regardless of whether a reader is waiting.
/// Writes are serialized behind one lock, so call order is wire order.
pub struct ByteStream {
    queue: Arc<ReceiveQueue>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    stats: Arc<SessionStats>,
    pump: JoinHandle<()>,
}

impl ByteStream {
    /// Connect to `host:port` and start the receive pump.
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        stats: Arc<SessionStats>,
    ) -> Result<Self, VncError> {
        let addr = format!("{host}:{port}");
        let stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| VncError::transport(format!("connection to {addr} timed out")))?
            .map_err(VncError::from)?;
        stream.set_nodelay(true).ok();
        Ok(Self::from_stream(stream, stats))
    }

    /// Wrap an already-connected stream (tests use this with a local
    /// listener).
    pub fn from_stream(stream: TcpStream, stats: Arc<SessionStats>) -> Self {
        let (mut reader, writer) = stream.into_split();
        let queue = Arc::new(ReceiveQueue::new());
        let pump_queue = queue.clone();
        let pump_stats = stats.clone();
        let pump = tokio::spawn(async move {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        pump_queue.close("closed by peer");
                        break;
                    }
                    Ok(n) => {
                        pump_stats.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                        pump_queue.push(&buf[..n]);
                    }
                    Err(e) => {
                        pump_queue.close(e.to_string());
                        break;
                    }
                }
            }
        });
        Self {
            queue,
            writer: tokio::sync::Mutex::new(writer),
            stats,
            pump,
        }
    }

    /// Suspend until exactly `n` bytes are available, consuming them.
    pub async fn read_exactly(&self, n: usize, wait: Duration) -> Result<Bytes, VncError> {
        self.queue.read_exactly(n, wait).await
    }

    pub async fn read_u8(&self, wait: Duration) -> Result<u8, VncError> {
        Ok(self.read_exactly(1, wait).await?[0])
    }

    pub async fn read_u16(&self, wait: Duration) -> Result<u16, VncError> {
        let buf = self.read_exactly(2, wait).await?;
        Ok(u16::from_be_bytes([buf[0], buf[1]]))
    }

    pub async fn read_u32(&self, wait: Duration) -> Result<u32, VncError> {
        let buf = self.read_exactly(4, wait).await?;
        Ok(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
    }

    /// Queue bytes for transmission.  Does not wait for delivery
    /// confirmation beyond the kernel send buffer.
    pub async fn write(&self, data: &[u8]) -> Result<(), VncError> {
        let mut w = self.writer.lock().await;
        w.write_all(data).await?;
        self.stats.bytes_sent.fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Stop the receive pump and fail any pending read.
    pub fn shutdown(&self) {
        self.pump.abort();
        self.queue.close("disconnected");
    }
}

impl Drop for ByteStream {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
