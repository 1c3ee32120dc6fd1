//! VNC connection diagnostics.
//!
//! Multi-step probe against a VNC server, reporting the status of each
//! phase independently: DNS resolution, TCP connect, RFB version banner.
//! Uses the shared `farview_core::diagnostics` infrastructure.

use std::time::{Duration, Instant};

use farview_core::diagnostics::{self, DiagnosticReport, DiagnosticStep};

use crate::vnc::errors::VncError;
use crate::vnc::protocol::VERSION_PREFIX;

/// TCP connect timeout for diagnostics.
const DIAG_TCP_TIMEOUT: Duration = Duration::from_secs(5);

/// Banner read timeout; an RFB server speaks first.
const DIAG_BANNER_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a deep diagnostic probe against a VNC server.
///
/// Never authenticates; it only establishes that an RFB service is
/// reachable and speaking.
pub async fn diagnose_connection(host: String, port: u16) -> Result<DiagnosticReport, VncError> {
    tokio::task::spawn_blocking(move || run_diagnostics(&host, port))
        .await
        .map_err(|e| VncError::transport(format!("diagnostic task failed: {e}")))
}

fn run_diagnostics(host: &str, port: u16) -> DiagnosticReport {
    let run_start = Instant::now();
    let mut steps: Vec<DiagnosticStep> = Vec::new();

    // ── Step 1: DNS resolution ───────────────────────────────────────
    let addr = match diagnostics::probe_dns(host, port, &mut steps) {
        Some(addr) => addr,
        None => return diagnostics::finish_report(host, port, "vnc", None, steps, run_start),
    };
    let resolved_ip = Some(addr.ip().to_string());

    // ── Step 2: TCP connect ──────────────────────────────────────────
    let stream = match diagnostics::probe_tcp(addr, DIAG_TCP_TIMEOUT, &mut steps) {
        Some(stream) => stream,
        None => {
            return diagnostics::finish_report(host, port, "vnc", resolved_ip, steps, run_start)
        }
    };

    // ── Step 3: RFB version banner ───────────────────────────────────
    let t = Instant::now();
    match diagnostics::probe_banner(&stream, DIAG_BANNER_TIMEOUT, "RFB Banner", &mut steps) {
        Some(banner) if banner.starts_with(VERSION_PREFIX) => {
            steps.push(
                DiagnosticStep::pass("RFB Version", "server speaks RFB", t).with_detail(
                    String::from_utf8_lossy(&banner).trim_end().to_string(),
                ),
            );
        }
        Some(_) => {
            steps.push(DiagnosticStep::fail(
                "RFB Version",
                "service answered but does not speak RFB",
                t,
            ));
        }
        None => {
            steps.push(DiagnosticStep::fail(
                "RFB Version",
                "no RFB banner received",
                t,
            ));
        }
    }

    diagnostics::finish_report(host, port, "vnc", resolved_ip, steps, run_start)
}
