// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw socket print server (port 9100, "JetDirect" style).
//
// Client bytes are already device commands: each chunk read from the socket
// is forwarded to the head untouched.  The job boundary is the client closing
// its side of the connection, at which point the paper is fed and cut once.
// A read error or timeout, or a failed device write, drops the connection
// without cutting.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use printhead_core::error::{PrintheadError, Result};
use printhead_core::{ServerStatus, SharedSettings, current_settings};
use printhead_device::DeviceArbiter;

/// Default port for raw printing.
pub const DEFAULT_RAW_PORT: u16 = 9100;

/// Bytes read from the socket per forwarded write.
pub const RAW_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct RawServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub read_timeout: Duration,
}

#[derive(Clone)]
struct ConnectionContext {
    device: Arc<DeviceArbiter>,
    settings: SharedSettings,
    read_timeout: Duration,
}

/// Passthrough TCP server feeding client bytes to the print head.
pub struct RawServer {
    config: RawServerConfig,
    device: Arc<DeviceArbiter>,
    settings: SharedSettings,
    status: ServerStatus,
    bound_port: Option<u16>,
    shutdown_signal: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
    active_connections: Arc<AtomicU32>,
}

impl RawServer {
    pub fn new(
        config: RawServerConfig,
        device: Arc<DeviceArbiter>,
        settings: SharedSettings,
    ) -> Self {
        Self {
            config,
            device,
            settings,
            status: ServerStatus::Stopped,
            bound_port: None,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            active_connections: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn port(&self) -> u16 {
        self.bound_port.unwrap_or(self.config.port)
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.status == ServerStatus::Running {
            return Ok(());
        }
        self.status = ServerStatus::Starting;

        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = match TcpListener::bind(&bind_addr).await {
            Ok(l) => l,
            Err(e) => {
                self.status = ServerStatus::Error;
                return Err(PrintheadError::PrintServer(format!("bind {bind_addr}: {e}")));
            }
        };
        let port = listener.local_addr()?.port();
        self.bound_port = Some(port);
        info!(port, "raw print server listening");

        let ctx = ConnectionContext {
            device: Arc::clone(&self.device),
            settings: Arc::clone(&self.settings),
            read_timeout: self.config.read_timeout,
        };
        let shutdown = Arc::clone(&self.shutdown_signal);
        let active = Arc::clone(&self.active_connections);
        self.task_handle = Some(tokio::spawn(accept_loop(listener, shutdown, ctx, active)));
        self.status = ServerStatus::Running;
        Ok(())
    }

    /// Stop listening.  Jobs already streaming finish normally.
    pub async fn stop(&mut self) -> Result<()> {
        if self.status != ServerStatus::Running {
            return Ok(());
        }
        self.shutdown_signal.notify_one();
        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| PrintheadError::PrintServer(format!("task join: {e}")))?;
        }
        self.status = ServerStatus::Stopped;
        self.bound_port = None;
        info!(port = self.config.port, "raw print server stopped");
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    shutdown: Arc<Notify>,
    ctx: ConnectionContext,
    active: Arc<AtomicU32>,
) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "incoming raw connection");
                    let ctx = ctx.clone();
                    let active = Arc::clone(&active);
                    tokio::spawn(async move {
                        active.fetch_add(1, Ordering::Relaxed);
                        match handle_connection(stream, peer, &ctx).await {
                            Ok(0) => debug!(peer = %peer, "raw connection closed without data"),
                            Ok(bytes) => info!(peer = %peer, bytes, "raw job printed"),
                            Err(e) => warn!(peer = %peer, error = %e, "raw job aborted"),
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                Err(e) => error!(error = %e, "failed to accept raw connection"),
            }
        }
    }
}

/// Forward one connection's bytes to the head.  Returns the number of bytes
/// forwarded.
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: &ConnectionContext,
) -> Result<usize> {
    let mut buf = vec![0u8; RAW_CHUNK_SIZE];
    let mut forwarded = 0usize;

    loop {
        let n = tokio::time::timeout(ctx.read_timeout, stream.read(&mut buf))
            .await
            .map_err(|_| PrintheadError::PrintServer(format!("read from {peer} timed out")))??;
        if n == 0 {
            break;
        }

        let chunk = buf[..n].to_vec();
        let device = Arc::clone(&ctx.device);
        let brightness = current_settings(&ctx.settings).brightness;
        let first = forwarded == 0;
        let written = tokio::task::spawn_blocking(move || {
            if first && !device.ensure_ready(brightness) {
                return Err(PrintheadError::DeviceUnavailable);
            }
            if device.write(&chunk) {
                Ok(())
            } else {
                Err(PrintheadError::DeviceWrite(format!("{} bytes", chunk.len())))
            }
        })
        .await
        .map_err(|e| PrintheadError::PrintServer(format!("device task: {e}")))?;
        written?;

        forwarded += n;
        debug!(peer = %peer, bytes = n, total = forwarded, "raw chunk forwarded");
    }

    if forwarded > 0 {
        let device = Arc::clone(&ctx.device);
        let full_cut = current_settings(&ctx.settings).cut_mode.is_full();
        let cut = tokio::task::spawn_blocking(move || device.feed_and_cut(full_cut))
            .await
            .map_err(|e| PrintheadError::PrintServer(format!("device task: {e}")))?;
        if !cut {
            return Err(PrintheadError::DeviceWrite("feed and cut".into()));
        }
    }
    Ok(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use printhead_core::{CutMode, PrintSettings};
    use printhead_device::{RecordingTransport, escpos};
    use std::sync::RwLock;
    use tokio::io::AsyncWriteExt;

    async fn running_server(
        transport: RecordingTransport,
        cut_mode: CutMode,
        read_timeout: Duration,
    ) -> RawServer {
        let settings = Arc::new(RwLock::new(PrintSettings { cut_mode, brightness: 6 }));
        let config = RawServerConfig {
            bind_address: "127.0.0.1".into(),
            port: 0,
            read_timeout,
        };
        let mut server = RawServer::new(config, Arc::new(DeviceArbiter::new(transport)), settings);
        server.start().await.unwrap();
        server
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..300 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn bytes_then_close_cut_once_after_payload() {
        let transport = RecordingTransport::new();
        let mut server =
            running_server(transport.clone(), CutMode::Full, Duration::from_secs(5)).await;

        let mut client = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
        client.write_all(b"HELLO RAW\n").await.unwrap();
        client.shutdown().await.unwrap();
        drop(client);

        let cut = escpos::feed_and_cut(true);
        wait_until(|| transport.bytes().ends_with(&cut)).await;

        let bytes = transport.bytes();
        let setup = escpos::combine(&[&escpos::initialize(), &escpos::set_brightness(6)]);
        assert!(bytes.starts_with(&setup));
        assert!(bytes.ends_with(&cut));
        let payload = &bytes[setup.len()..bytes.len() - cut.len()];
        assert_eq!(payload, b"HELLO RAW\n");
        assert_eq!(transport.writes().iter().filter(|w| **w == cut).count(), 1);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn empty_connection_does_not_cut() {
        let transport = RecordingTransport::new();
        let mut server =
            running_server(transport.clone(), CutMode::Full, Duration::from_secs(5)).await;

        let client = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
        drop(client);
        tokio::time::sleep(Duration::from_millis(100)).await;
        wait_until(|| server.active_connections() == 0).await;

        assert_eq!(transport.write_count(), 0);
        assert_eq!(transport.open_count(), 0);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn idle_client_is_dropped_without_cut() {
        let transport = RecordingTransport::new();
        let mut server =
            running_server(transport.clone(), CutMode::Partial, Duration::from_millis(100)).await;

        let mut client = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
        client.write_all(b"partial").await.unwrap();
        wait_until(|| transport.bytes().ends_with(b"partial")).await;
        // past the read timeout
        tokio::time::sleep(Duration::from_millis(300)).await;
        wait_until(|| server.active_connections() == 0).await;

        let bytes = transport.bytes();
        assert!(bytes.ends_with(b"partial"));
        let cut = escpos::feed_and_cut(false);
        assert!(!transport.writes().contains(&cut));
        drop(client);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn failed_device_write_skips_cut() {
        let transport = RecordingTransport::new();
        let mut server =
            running_server(transport.clone(), CutMode::Full, Duration::from_secs(5)).await;
        // open the device first so the failure lands on the payload write
        server.device.open();
        transport.set_fail_writes(true);

        let mut client = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
        client.write_all(b"doomed").await.unwrap();
        client.shutdown().await.unwrap();
        drop(client);
        tokio::time::sleep(Duration::from_millis(100)).await;
        wait_until(|| server.active_connections() == 0).await;

        assert_eq!(transport.write_count(), 0);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let transport = RecordingTransport::new();
        let mut server = running_server(transport, CutMode::Full, Duration::from_secs(5)).await;
        assert_eq!(server.status(), ServerStatus::Running);
        server.stop().await.unwrap();
        server.stop().await.unwrap();
        assert_eq!(server.status(), ServerStatus::Stopped);
        assert!(!server.device.is_open());
    }
}
