//! One-time RFB negotiation: version exchange, security selection,
//! DES authentication, and the ClientInit/ServerInit handoff.

use std::time::Duration;

use tokio::sync::watch;

use crate::vnc::auth;
use crate::vnc::errors::VncError;
use crate::vnc::protocol::{self, security, VERSION_LEN, VERSION_PREFIX};
use crate::vnc::stream::{ByteStream, READ_TIMEOUT, SERVER_INIT_TIMEOUT};
use crate::vnc::types::{PixelFormat, ServerInit, SessionState};

/// Sanity cap on the desktop-name length in ServerInit.
const MAX_NAME_LEN: usize = 1024 * 1024;

/// Timeout for the best-effort failure-reason read.
const REASON_TIMEOUT: Duration = Duration::from_secs(2);

/// Drive the full RFB handshake over `stream`.
///
/// Reports the Handshaking and Authenticating transitions through
/// `state_tx` and returns the parsed ServerInit on success.  The caller
/// owns the Active transition.
pub async fn negotiate(
    stream: &ByteStream,
    password: &str,
    shared: bool,
    state_tx: &watch::Sender<SessionState>,
) -> Result<ServerInit, VncError> {
    let _ = state_tx.send(SessionState::Handshaking);

    // 1. Version banner.
    let banner = stream.read_exactly(VERSION_LEN, READ_TIMEOUT).await?;
    if !banner.starts_with(VERSION_PREFIX) {
        return Err(VncError::protocol(format!(
            "unexpected protocol banner {:?}",
            String::from_utf8_lossy(&banner)
        )));
    }
    log::info!(
        "server protocol version: {}",
        String::from_utf8_lossy(&banner).trim_end()
    );

    // 2. Mirror the server's version back as our own.
    stream.write(&banner).await?;

    // 3. Security type list.
    let count = stream.read_u8(READ_TIMEOUT).await?;
    if count == 0 {
        let reason = read_failure_reason(stream).await;
        return Err(VncError::protocol(format!(
            "server refused the connection: {reason}"
        )));
    }
    let offered = stream.read_exactly(count as usize, READ_TIMEOUT).await?;

    // 4. VNC Authentication must be on offer.
    if !offered.contains(&security::VNC_AUTH) {
        return Err(VncError::protocol(format!(
            "server offers no VNC authentication (types {:?})",
            offered.as_ref()
        )));
    }
    stream.write(&[security::VNC_AUTH]).await?;

    // 5. DES challenge-response.
    let _ = state_tx.send(SessionState::Authenticating);
    let challenge_buf = stream.read_exactly(16, READ_TIMEOUT).await?;
    let mut challenge = [0u8; 16];
    challenge.copy_from_slice(&challenge_buf);
    let response = auth::vnc_auth_response(&challenge, password);
    stream.write(&response).await?;

    // 6. Security result.
    let result = stream.read_u32(READ_TIMEOUT).await?;
    if result != 0 {
        let reason = read_failure_reason(stream).await;
        return Err(VncError::auth(format!(
            "server rejected the credentials (code {result}): {reason}"
        )));
    }

    // 7. ClientInit must go out first — the server only sends ServerInit
    //    after receiving it.
    stream.write(&protocol::build_client_init(shared)).await?;

    // 8. ServerInit.  The leading fields get the longer timeout: slow
    //    servers finish session setup between SecurityResult and Init.
    let width = stream.read_u16(SERVER_INIT_TIMEOUT).await?;
    let height = stream.read_u16(SERVER_INIT_TIMEOUT).await?;
    let pf_buf = stream.read_exactly(16, READ_TIMEOUT).await?;
    let mut pf_bytes = [0u8; 16];
    pf_bytes.copy_from_slice(&pf_buf);
    let pixel_format = PixelFormat::from_bytes(&pf_bytes);
    let name_len = stream.read_u32(READ_TIMEOUT).await? as usize;
    if name_len > MAX_NAME_LEN {
        return Err(VncError::protocol(format!(
            "implausible desktop name length {name_len}"
        )));
    }
    let name_buf = stream.read_exactly(name_len, READ_TIMEOUT).await?;
    let name = String::from_utf8_lossy(&name_buf).into_owned();

    log::info!("server init: {width}x{height} \"{name}\" ({pixel_format})");

    Ok(ServerInit {
        width,
        height,
        pixel_format,
        name,
    })
}

/// Best-effort read of a u32-length-prefixed failure reason string.
async fn read_failure_reason(stream: &ByteStream) -> String {
    if let Ok(len) = stream.read_u32(REASON_TIMEOUT).await {
        if len as usize <= 4096 {
            if let Ok(buf) = stream.read_exactly(len as usize, REASON_TIMEOUT).await {
                return String::from_utf8_lossy(&buf).into_owned();
            }
        }
    }
    "(no reason given)".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vnc::types::SessionStats;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const PASSWORD: &str = "sesame";
    const CHALLENGE: [u8; 16] = [
        0x10, 0x32, 0x54, 0x76, 0x98, 0xBA, 0xDC, 0xFE, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB,
        0xCD, 0xEF,
    ];

    async fn client_stream(listener: &TcpListener) -> ByteStream {
        let addr = listener.local_addr().unwrap();
        let sock = TcpStream::connect(addr).await.unwrap();
        ByteStream::from_stream(sock, Arc::new(SessionStats::new()))
    }

    fn state_channel() -> (watch::Sender<SessionState>, watch::Receiver<SessionState>) {
        watch::channel(SessionState::Connecting)
    }

    /// Server side of a successful handshake up to and including
    /// ServerInit.
    async fn serve_good_handshake(mut sock: TcpStream) -> TcpStream {
        sock.write_all(b"RFB 003.008\n").await.unwrap();
        let mut echo = [0u8; 12];
        sock.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, b"RFB 003.008\n");

        sock.write_all(&[2, 1, 2]).await.unwrap(); // two types: None, VNC
        let mut selected = [0u8; 1];
        sock.read_exact(&mut selected).await.unwrap();
        assert_eq!(selected[0], 2);

        sock.write_all(&CHALLENGE).await.unwrap();
        let mut response = [0u8; 16];
        sock.read_exact(&mut response).await.unwrap();
        assert_eq!(response, auth::vnc_auth_response(&CHALLENGE, PASSWORD));

        sock.write_all(&0u32.to_be_bytes()).await.unwrap();

        let mut client_init = [0u8; 1];
        sock.read_exact(&mut client_init).await.unwrap();
        assert_eq!(client_init[0], 1);

        let mut init = Vec::new();
        init.extend_from_slice(&800u16.to_be_bytes());
        init.extend_from_slice(&600u16.to_be_bytes());
        init.extend_from_slice(&PixelFormat::rgba32().to_bytes());
        init.extend_from_slice(&4u32.to_be_bytes());
        init.extend_from_slice(b"test");
        sock.write_all(&init).await.unwrap();
        sock
    }

    #[tokio::test]
    async fn negotiate_parses_server_init() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream = client_stream(&listener).await;
        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            serve_good_handshake(sock).await
        });

        let (state_tx, state_rx) = state_channel();
        let init = negotiate(&stream, PASSWORD, true, &state_tx).await.unwrap();
        assert_eq!(init.width, 800);
        assert_eq!(init.height, 600);
        assert_eq!(init.name, "test");
        assert_eq!(init.pixel_format, PixelFormat::rgba32());
        // The negotiator reported the authenticating phase.
        assert_eq!(*state_rx.borrow(), SessionState::Authenticating);
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn negotiate_rejects_bad_banner() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream = client_stream(&listener).await;
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"HTTP 200 OK\n").await.unwrap();
            sock
        });

        let (state_tx, _state_rx) = state_channel();
        let err = negotiate(&stream, PASSWORD, true, &state_tx)
            .await
            .unwrap_err();
        assert!(matches!(err, VncError::Protocol(_)));
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn negotiate_rejects_zero_security_types() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream = client_stream(&listener).await;
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"RFB 003.008\n").await.unwrap();
            let mut echo = [0u8; 12];
            sock.read_exact(&mut echo).await.unwrap();
            sock.write_all(&[0]).await.unwrap();
            let reason = b"maintenance";
            sock.write_all(&(reason.len() as u32).to_be_bytes())
                .await
                .unwrap();
            sock.write_all(reason).await.unwrap();
            sock
        });

        let (state_tx, _state_rx) = state_channel();
        let err = negotiate(&stream, PASSWORD, true, &state_tx)
            .await
            .unwrap_err();
        match err {
            VncError::Protocol(msg) => assert!(msg.contains("maintenance")),
            other => panic!("expected protocol error, got {other:?}"),
        }
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn negotiate_requires_vnc_auth_on_offer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream = client_stream(&listener).await;
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"RFB 003.008\n").await.unwrap();
            let mut echo = [0u8; 12];
            sock.read_exact(&mut echo).await.unwrap();
            sock.write_all(&[1, 1]).await.unwrap(); // only "None"
            sock
        });

        let (state_tx, _state_rx) = state_channel();
        let err = negotiate(&stream, PASSWORD, true, &state_tx)
            .await
            .unwrap_err();
        assert!(matches!(err, VncError::Protocol(_)));
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn negotiate_surfaces_auth_rejection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream = client_stream(&listener).await;
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"RFB 003.008\n").await.unwrap();
            let mut echo = [0u8; 12];
            sock.read_exact(&mut echo).await.unwrap();
            sock.write_all(&[1, 2]).await.unwrap();
            let mut selected = [0u8; 1];
            sock.read_exact(&mut selected).await.unwrap();
            sock.write_all(&CHALLENGE).await.unwrap();
            let mut response = [0u8; 16];
            sock.read_exact(&mut response).await.unwrap();
            sock.write_all(&1u32.to_be_bytes()).await.unwrap();
            let reason = b"wrong password";
            sock.write_all(&(reason.len() as u32).to_be_bytes())
                .await
                .unwrap();
            sock.write_all(reason).await.unwrap();
            sock
        });

        let (state_tx, _state_rx) = state_channel();
        let err = negotiate(&stream, "bad-guess", true, &state_tx)
            .await
            .unwrap_err();
        match err {
            VncError::Auth(msg) => assert!(msg.contains("wrong password")),
            other => panic!("expected auth error, got {other:?}"),
        }
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn negotiate_rejects_implausible_name_length() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream = client_stream(&listener).await;
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"RFB 003.008\n").await.unwrap();
            let mut echo = [0u8; 12];
            sock.read_exact(&mut echo).await.unwrap();
            sock.write_all(&[1, 2]).await.unwrap();
            let mut selected = [0u8; 1];
            sock.read_exact(&mut selected).await.unwrap();
            sock.write_all(&CHALLENGE).await.unwrap();
            let mut response = [0u8; 16];
            sock.read_exact(&mut response).await.unwrap();
            sock.write_all(&0u32.to_be_bytes()).await.unwrap();
            let mut client_init = [0u8; 1];
            sock.read_exact(&mut client_init).await.unwrap();
            let mut init = Vec::new();
            init.extend_from_slice(&800u16.to_be_bytes());
            init.extend_from_slice(&600u16.to_be_bytes());
            init.extend_from_slice(&PixelFormat::rgba32().to_bytes());
            init.extend_from_slice(&u32::MAX.to_be_bytes());
            sock.write_all(&init).await.unwrap();
            sock
        });

        let (state_tx, _state_rx) = state_channel();
        let err = negotiate(&stream, PASSWORD, true, &state_tx)
            .await
            .unwrap_err();
        assert!(matches!(err, VncError::Protocol(_)));
        drop(server.await.unwrap());
    }
}
