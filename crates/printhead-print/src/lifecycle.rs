// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Lifecycle manager: starts and stops the network front ends independently.
//
// Each front end implements `ManagedServer`.  Stopping a front end tears down
// its listener (and, for IPP, the mDNS advertisement) but never closes the
// print head.

use std::future::Future;
use std::pin::Pin;

use printhead_core::error::Result;
use printhead_core::{FrontEnd, ServerStatus};
use tracing::{debug, error, info};

use crate::ipp_server::IppServer;
use crate::raw_server::RawServer;

/// Boxed future returned by [`ManagedServer`] methods.
pub type BoxFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A front end the manager can start and stop.
///
/// Both operations are idempotent.
pub trait ManagedServer: Send {
    fn start(&mut self) -> BoxFuture<'_>;
    fn stop(&mut self) -> BoxFuture<'_>;
    fn status(&self) -> ServerStatus;
    /// Port actually bound while running.
    fn port(&self) -> u16;
}

impl ManagedServer for IppServer {
    fn start(&mut self) -> BoxFuture<'_> {
        Box::pin(IppServer::start(self))
    }

    fn stop(&mut self) -> BoxFuture<'_> {
        Box::pin(IppServer::stop(self))
    }

    fn status(&self) -> ServerStatus {
        IppServer::status(self)
    }

    fn port(&self) -> u16 {
        IppServer::port(self)
    }
}

impl ManagedServer for RawServer {
    fn start(&mut self) -> BoxFuture<'_> {
        Box::pin(RawServer::start(self))
    }

    fn stop(&mut self) -> BoxFuture<'_> {
        Box::pin(RawServer::stop(self))
    }

    fn status(&self) -> ServerStatus {
        RawServer::status(self)
    }

    fn port(&self) -> u16 {
        RawServer::port(self)
    }
}

/// Holds the optional front ends and tracks whether any is running.
#[derive(Default)]
pub struct ServerManager {
    servers: Vec<(FrontEnd, Box<dyn ManagedServer>)>,
}

impl ServerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a front end, replacing any earlier one of the same kind.
    pub fn insert(&mut self, kind: FrontEnd, server: Box<dyn ManagedServer>) {
        self.servers.retain(|(k, _)| *k != kind);
        self.servers.push((kind, server));
    }

    pub fn contains(&self, kind: FrontEnd) -> bool {
        self.servers.iter().any(|(k, _)| *k == kind)
    }

    fn get_mut(&mut self, kind: FrontEnd) -> Option<&mut Box<dyn ManagedServer>> {
        self.servers.iter_mut().find(|(k, _)| *k == kind).map(|(_, s)| s)
    }

    /// Start one front end.  Absent front ends are ignored.
    ///
    /// Returns `true` only if this call brought the front end up.
    pub async fn start(&mut self, kind: FrontEnd) -> Result<bool> {
        let Some(server) = self.get_mut(kind) else {
            return Ok(false);
        };
        start_server(kind, server.as_mut()).await
    }

    /// Stop one front end.  Absent front ends are ignored.
    pub async fn stop(&mut self, kind: FrontEnd) -> Result<()> {
        match self.get_mut(kind) {
            Some(server) => server.stop().await,
            None => Ok(()),
        }
    }

    /// Start every registered front end.  A failure is logged and does not
    /// prevent the others from starting.  Returns how many are running.
    pub async fn start_all(&mut self) -> usize {
        for (kind, server) in &mut self.servers {
            if let Err(e) = start_server(*kind, server.as_mut()).await {
                error!(front_end = %kind, error = %e, "front end failed to start");
            }
        }
        self.running().len()
    }

    pub async fn stop_all(&mut self) {
        for (kind, server) in &mut self.servers {
            if let Err(e) = server.stop().await {
                error!(front_end = %kind, error = %e, "front end failed to stop");
            }
        }
        info!("all front ends stopped");
    }

    pub fn status(&self, kind: FrontEnd) -> Option<ServerStatus> {
        self.servers
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, s)| s.status())
    }

    /// Front ends currently running.
    pub fn running(&self) -> Vec<FrontEnd> {
        self.servers
            .iter()
            .filter(|(_, s)| s.status() == ServerStatus::Running)
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn any_running(&self) -> bool {
        !self.running().is_empty()
    }
}

/// Start `server`, logging only when its status actually changes.
async fn start_server(kind: FrontEnd, server: &mut dyn ManagedServer) -> Result<bool> {
    if server.status() == ServerStatus::Running {
        debug!(front_end = %kind, "front end already running");
        return Ok(false);
    }
    server.start().await?;
    let started = server.status() == ServerStatus::Running;
    if started {
        info!(front_end = %kind, port = server.port(), "front end started");
    }
    Ok(started)
}
