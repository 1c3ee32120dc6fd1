//! Shared connection diagnostics infrastructure.
//!
//! Reusable probe steps for protocol crates: DNS resolution, TCP connect,
//! and service-banner reads.  A protocol crate strings the probes it cares
//! about into a [`DiagnosticReport`] via [`finish_report`].

use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

// ─── Shared types ───────────────────────────────────────────────────────────

/// Result of a single diagnostic probe step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticStep {
    pub name: String,
    /// `"pass"` | `"fail"` | `"warn"` | `"info"`
    pub status: String,
    pub message: String,
    pub duration_ms: u64,
    pub detail: Option<String>,
}

impl DiagnosticStep {
    pub fn pass(name: &str, message: impl Into<String>, started: Instant) -> Self {
        Self::with_status(name, "pass", message, started)
    }

    pub fn fail(name: &str, message: impl Into<String>, started: Instant) -> Self {
        Self::with_status(name, "fail", message, started)
    }

    fn with_status(name: &str, status: &str, message: impl Into<String>, started: Instant) -> Self {
        Self {
            name: name.into(),
            status: status.into(),
            message: message.into(),
            duration_ms: started.elapsed().as_millis() as u64,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Full diagnostic report handed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub resolved_ip: Option<String>,
    pub steps: Vec<DiagnosticStep>,
    pub summary: String,
    /// Wall-clock milliseconds for the entire diagnostic run.
    pub total_duration_ms: u64,
}

// ─── Probe helpers ──────────────────────────────────────────────────────────

/// Resolve `host:port` and return the first address.
/// Pushes a [`DiagnosticStep`]; returns `None` on failure.
pub fn probe_dns(host: &str, port: u16, steps: &mut Vec<DiagnosticStep>) -> Option<SocketAddr> {
    let t = Instant::now();
    match format!("{host}:{port}").to_socket_addrs() {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => {
                steps.push(DiagnosticStep::pass(
                    "DNS Resolution",
                    format!("{host} resolved to {}", addr.ip()),
                    t,
                ));
                Some(addr)
            }
            None => {
                steps.push(
                    DiagnosticStep::fail(
                        "DNS Resolution",
                        format!("DNS returned no addresses for {host}"),
                        t,
                    )
                    .with_detail("Verify the hostname and the local DNS configuration"),
                );
                None
            }
        },
        Err(e) => {
            steps.push(
                DiagnosticStep::fail("DNS Resolution", format!("DNS lookup failed: {e}"), t)
                    .with_detail("Check hostname spelling, DNS server, and network connectivity"),
            );
            None
        }
    }
}

/// Attempt a TCP connect with timeout.  Pushes a [`DiagnosticStep`].
/// Returns the connected `TcpStream` on success.
pub fn probe_tcp(
    addr: SocketAddr,
    timeout: Duration,
    steps: &mut Vec<DiagnosticStep>,
) -> Option<TcpStream> {
    let t = Instant::now();
    match TcpStream::connect_timeout(&addr, timeout) {
        Ok(stream) => {
            let _ = stream.set_nodelay(true);
            steps.push(DiagnosticStep::pass(
                "TCP Connect",
                format!("connected to {addr} in {}ms", t.elapsed().as_millis()),
                t,
            ));
            Some(stream)
        }
        Err(e) => {
            let hint = match e.kind() {
                std::io::ErrorKind::TimedOut => {
                    "Connection timed out — the port may be firewalled or the host unreachable"
                }
                std::io::ErrorKind::ConnectionRefused => {
                    "Connection refused — the service may not be running or listens on another port"
                }
                _ => "Check firewall rules and that the service is running",
            };
            steps.push(
                DiagnosticStep::fail("TCP Connect", format!("TCP connect failed: {e}"), t)
                    .with_detail(hint),
            );
            None
        }
    }
}

/// Read the service banner (first bytes the server sends after connect).
/// Waits up to `timeout` for data.  Pushes a [`DiagnosticStep`].
pub fn probe_banner(
    stream: &TcpStream,
    timeout: Duration,
    step_name: &str,
    steps: &mut Vec<DiagnosticStep>,
) -> Option<Vec<u8>> {
    let _ = stream.set_read_timeout(Some(timeout));
    let t = Instant::now();
    let mut buf = [0u8; 256];
    match std::io::Read::read(&mut &*stream, &mut buf) {
        Ok(0) => {
            steps.push(DiagnosticStep {
                name: step_name.into(),
                status: "warn".into(),
                message: "server closed the connection without sending a banner".into(),
                duration_ms: t.elapsed().as_millis() as u64,
                detail: None,
            });
            None
        }
        Ok(n) => {
            let printable = String::from_utf8_lossy(&buf[..n]).trim().to_string();
            steps.push(DiagnosticStep::pass(
                step_name,
                format!("banner: {printable}"),
                t,
            ));
            Some(buf[..n].to_vec())
        }
        Err(e)
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
        {
            steps.push(DiagnosticStep {
                name: step_name.into(),
                status: "info".into(),
                message: "no banner within the timeout (server may wait for the client to speak)"
                    .into(),
                duration_ms: t.elapsed().as_millis() as u64,
                detail: None,
            });
            None
        }
        Err(e) => {
            steps.push(DiagnosticStep::fail(
                step_name,
                format!("banner read error: {e}"),
                t,
            ));
            None
        }
    }
}

/// Build the final report from accumulated steps.
pub fn finish_report(
    host: &str,
    port: u16,
    protocol: &str,
    resolved_ip: Option<String>,
    steps: Vec<DiagnosticStep>,
    start: Instant,
) -> DiagnosticReport {
    let all_ok = steps.iter().all(|s| s.status == "pass" || s.status == "info");
    let first_fail = steps.iter().find(|s| s.status == "fail");

    let summary = if all_ok {
        "All diagnostic probes passed — the service is reachable.".into()
    } else if let Some(fail) = first_fail {
        format!("Diagnostics stopped at: {} — {}", fail.name, fail.message)
    } else {
        "Connection partially succeeded but warnings were reported.".into()
    };

    DiagnosticReport {
        host: host.to_string(),
        port,
        protocol: protocol.to_string(),
        resolved_ip,
        steps,
        summary,
        total_duration_ms: start.elapsed().as_millis() as u64,
    }
}
