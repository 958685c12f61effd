// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The management API as a start/stop-able front end.

use std::sync::Arc;

use printhead_core::ServerStatus;
use printhead_core::error::{PrintheadError, Result};
use printhead_print::{BoxFuture, ManagedServer};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::routes::{ApiState, router};

/// Default port for the management API.
pub const DEFAULT_API_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_address: String,
    pub port: u16,
}

pub struct ApiServer {
    config: ApiServerConfig,
    state: ApiState,
    status: ServerStatus,
    bound_port: Option<u16>,
    shutdown_signal: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: ApiState) -> Self {
        Self {
            config,
            state,
            status: ServerStatus::Stopped,
            bound_port: None,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.bound_port.unwrap_or(self.config.port)
    }

    pub fn status(&self) -> ServerStatus {
        self.status
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
        info!(port, "management API listening");

        let app = router(self.state.clone());
        let shutdown = Arc::clone(&self.shutdown_signal);
        self.task_handle = Some(tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.notified().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "management API server error");
            }
        }));
        self.status = ServerStatus::Running;
        Ok(())
    }

    /// Stop accepting requests; in-flight requests complete first.
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
        info!(port = self.config.port, "management API stopped");
        Ok(())
    }
}

impl ManagedServer for ApiServer {
    fn start(&mut self) -> BoxFuture<'_> {
        Box::pin(ApiServer::start(self))
    }

    fn stop(&mut self) -> BoxFuture<'_> {
        Box::pin(ApiServer::stop(self))
    }

    fn status(&self) -> ServerStatus {
        ApiServer::status(self)
    }

    fn port(&self) -> u16 {
        ApiServer::port(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AdminAccount, TokenStore};
    use crate::routes::DeviceInfo;
    use printhead_core::{AppConfig, PrintSettings};
    use printhead_device::{DeviceArbiter, RecordingTransport};
    use std::sync::RwLock;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn state() -> ApiState {
        ApiState {
            device: Arc::new(DeviceArbiter::new(RecordingTransport::new())),
            settings: Arc::new(RwLock::new(PrintSettings::default())),
            tokens: Arc::new(TokenStore::new()),
            account: Arc::new(AdminAccount::new(AppConfig::default(), None)),
            info: Arc::new(DeviceInfo {
                printer_name: "Kiosk".into(),
                ipp_port: 6631,
                raw_port: 9100,
                api_port: 0,
                started: Instant::now(),
            }),
        }
    }

    #[tokio::test]
    async fn serves_over_tcp_and_stops() {
        let config = ApiServerConfig {
            bind_address: "127.0.0.1".into(),
            port: 0,
        };
        let mut server = ApiServer::new(config, state());
        server.start().await.unwrap();
        assert_eq!(server.status(), ServerStatus::Running);

        let mut client = tokio::net::TcpStream::connect(("127.0.0.1", server.port()))
            .await
            .unwrap();
        client
            .write_all(b"GET /api/status HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = Vec::new();
        client.read_to_end(&mut raw).await.unwrap();
        assert!(String::from_utf8_lossy(&raw).starts_with("HTTP/1.1 401"));

        server.stop().await.unwrap();
        server.stop().await.unwrap();
        assert_eq!(server.status(), ServerStatus::Stopped);
    }
}
