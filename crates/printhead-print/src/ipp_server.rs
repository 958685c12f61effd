// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// IPP print server: lets phones and laptops on the LAN print to the head.
//
// Clients send an HTTP/1.1 POST with an `application/ipp` body.  Each
// connection is one request and one response:
//
//   read request line -> read headers -> read body -> decode IPP ->
//   dispatch -> encode response -> write response -> close
//
// # Supported operations
//
//   - Print-Job             (0x0002)
//   - Validate-Job          (0x0004)
//   - Get-Job-Attributes    (0x0009)
//   - Get-Printer-Attrs     (0x000B)
//
// Print-Job runs synchronously: the document is written to a scratch file,
// rendered to page bitmaps, rasterized, and sent to the device before the
// response goes out.  Rendering and device I/O run on the blocking pool.

use std::collections::VecDeque;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use printhead_core::error::{PrintheadError, Result};
use printhead_core::{
    JobId, JobState, PRINT_WIDTH_PX, ServerStatus, SharedSettings, current_settings,
};
use printhead_device::{DeviceArbiter, rasterize_page};

use crate::advertise::{PrinterIdentity, ServiceAdvertiser};
use crate::http::HttpReader;
use crate::ipp::*;
use crate::render::PageRenderer;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default port for the IPP print server.
pub const DEFAULT_IPP_PORT: u16 = 6631;

/// First job id handed out after start-up.
pub const FIRST_JOB_ID: i32 = 1000;

/// Job states remembered for Get-Job-Attributes.
const JOB_HISTORY: usize = 64;

/// Path component of the printer URI.
const PRINTER_PATH: &str = "/ipp/print";

// ---------------------------------------------------------------------------
// Job ledger
// ---------------------------------------------------------------------------

/// Job id counter plus a short history of job outcomes.
#[derive(Debug)]
pub struct JobLedger {
    next_id: i32,
    history: VecDeque<(JobId, JobState)>,
}

impl Default for JobLedger {
    fn default() -> Self {
        Self {
            next_id: FIRST_JOB_ID,
            history: VecDeque::with_capacity(JOB_HISTORY),
        }
    }
}

impl JobLedger {
    /// Issue the next id and record it as queued.
    pub fn allocate(&mut self) -> JobId {
        let id = JobId(self.next_id);
        self.next_id += 1;
        self.record(id, JobState::Queued);
        id
    }

    pub fn record(&mut self, id: JobId, state: JobState) {
        if let Some(entry) = self.history.iter_mut().find(|(j, _)| *j == id) {
            entry.1 = state;
            return;
        }
        if self.history.len() == JOB_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back((id, state));
    }

    /// The most recently issued id (one below the first id before any job).
    pub fn last_issued(&self) -> JobId {
        JobId(self.next_id - 1)
    }

    /// Last known state.  Ids that fell out of the history, or were never
    /// issued, report completed.
    pub fn state_of(&self, id: JobId) -> JobState {
        self.history
            .iter()
            .find(|(j, _)| *j == id)
            .map(|(_, s)| *s)
            .unwrap_or(JobState::Completed)
    }
}

fn ipp_job_state(state: JobState) -> (i32, &'static str) {
    match state {
        // Jobs finish inside the Print-Job request, so queued is only
        // observable for a job still being printed by another connection.
        JobState::Queued => (JOB_STATE_PROCESSING, "job-printing"),
        JobState::Completed => (JOB_STATE_COMPLETED, "job-completed-successfully"),
        JobState::Failed => (JOB_STATE_ABORTED, "aborted-by-system"),
    }
}

// ---------------------------------------------------------------------------
// Shared state passed to connection handlers
// ---------------------------------------------------------------------------

/// Everything a Print-Job needs to reach the paper.
#[derive(Clone)]
pub struct PrintPipeline {
    pub device: Arc<DeviceArbiter>,
    pub renderer: Arc<dyn PageRenderer>,
    pub settings: SharedSettings,
    /// Blank rows kept under the last page before the cut.
    pub trim_margin_rows: usize,
}

/// State shared across all connection-handling tasks.
struct SharedState {
    pipeline: PrintPipeline,
    identity: PrinterIdentity,
    /// The port we are listening on (used to build URIs).
    port: u16,
    /// Management API port, published as `printer-more-info`.
    api_port: u16,
    read_timeout: Duration,
    ledger: Arc<Mutex<JobLedger>>,
    active_connections: Arc<AtomicU32>,
}

impl SharedState {
    fn ledger(&self) -> MutexGuard<'_, JobLedger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Per-request context derived from the HTTP envelope.
struct RequestContext {
    peer: SocketAddr,
    /// Host the client used to reach us, for URIs in the response.
    host: String,
}

/// Deterministic printer UUID: SHA-256 of the printer name, first 16 bytes.
pub fn printer_uuid(printer_name: &str) -> String {
    let digest = Sha256::digest(printer_name.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Uuid::from_bytes(bytes).to_string()
}

// ---------------------------------------------------------------------------
// IppServer
// ---------------------------------------------------------------------------

/// Settings fixed for the lifetime of one server instance.
#[derive(Debug, Clone)]
pub struct IppServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub printer_name: String,
    pub api_port: u16,
    pub read_timeout: Duration,
}

/// Embedded IPP print server.
pub struct IppServer {
    config: IppServerConfig,
    pipeline: PrintPipeline,
    advertiser: Box<dyn ServiceAdvertiser>,
    /// Current lifecycle state of the server.
    status: ServerStatus,
    /// Port actually bound (differs from the configured port when that is 0).
    bound_port: Option<u16>,
    /// Notification handle used to signal a graceful shutdown.
    shutdown_signal: Arc<Notify>,
    /// Handle to the Tokio task running the accept loop.
    task_handle: Option<JoinHandle<()>>,
    /// Counter of currently active TCP connections.
    active_connections: Arc<AtomicU32>,
    /// Outlives each accept loop so job ids keep increasing across restarts.
    ledger: Arc<Mutex<JobLedger>>,
}

impl IppServer {
    /// Create a new server in `Stopped` state.
    pub fn new(
        config: IppServerConfig,
        pipeline: PrintPipeline,
        advertiser: Box<dyn ServiceAdvertiser>,
    ) -> Self {
        Self {
            config,
            pipeline,
            advertiser,
            status: ServerStatus::Stopped,
            bound_port: None,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            active_connections: Arc::new(AtomicU32::new(0)),
            ledger: Arc::new(Mutex::new(JobLedger::default())),
        }
    }

    /// The bound port while running, else the configured one.
    pub fn port(&self) -> u16 {
        self.bound_port.unwrap_or(self.config.port)
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Bind the listener, advertise the printer, and spawn the accept loop.
    ///
    /// Idempotent while running.
    pub async fn start(&mut self) -> Result<()> {
        if self.status == ServerStatus::Running {
            debug!(port = self.port(), "IPP server already running");
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

        info!(port, "IPP print server listening");

        self.advertiser.advertise(port);

        let shared = Arc::new(SharedState {
            pipeline: self.pipeline.clone(),
            identity: PrinterIdentity {
                name: self.config.printer_name.clone(),
                uuid: printer_uuid(&self.config.printer_name),
            },
            port,
            api_port: self.config.api_port,
            read_timeout: self.config.read_timeout,
            ledger: Arc::clone(&self.ledger),
            active_connections: Arc::clone(&self.active_connections),
        });

        let shutdown = Arc::clone(&self.shutdown_signal);
        let handle = tokio::spawn(async move {
            Self::accept_loop(listener, shutdown, shared).await;
        });

        self.task_handle = Some(handle);
        self.status = ServerStatus::Running;
        Ok(())
    }

    /// Stop accepting connections and withdraw the advertisement.
    ///
    /// Connections already accepted run to completion.  The device is left
    /// open.
    pub async fn stop(&mut self) -> Result<()> {
        if self.status != ServerStatus::Running {
            return Ok(());
        }

        info!(port = self.port(), "stopping IPP print server");

        self.advertiser.withdraw();
        self.shutdown_signal.notify_one();

        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| PrintheadError::PrintServer(format!("task join: {e}")))?;
        }

        self.status = ServerStatus::Stopped;
        self.bound_port = None;
        info!(port = self.config.port, "IPP print server stopped");
        Ok(())
    }

    /// Runs until the shutdown signal is received.
    async fn accept_loop(listener: TcpListener, shutdown: Arc<Notify>, shared: Arc<SharedState>) {
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!(port = shared.port, "accept loop received shutdown signal");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "incoming IPP connection");
                            let state = Arc::clone(&shared);
                            tokio::spawn(async move {
                                state.active_connections.fetch_add(1, Ordering::Relaxed);
                                if let Err(e) =
                                    handle_connection(stream, peer_addr, &state).await
                                {
                                    warn!(
                                        peer = %peer_addr,
                                        error = %e,
                                        "connection handler error"
                                    );
                                }
                                state.active_connections.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }
    }
}

/// Handle a single connection: one request, one response.
async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    peer: SocketAddr,
    state: &Arc<SharedState>,
) -> Result<()> {
    let request = {
        let mut reader = HttpReader::new(&mut stream, state.read_timeout);
        reader
            .read_request()
            .await
            .map_err(|e| PrintheadError::PrintServer(format!("read from {peer}: {e}")))?
    };
    let Some(request) = request else {
        debug!(peer = %peer, "connection closed before request");
        return Ok(());
    };

    let ctx = RequestContext {
        peer,
        host: request.host().unwrap_or("localhost").to_owned(),
    };

    let response = process_request(&request.body, &ctx, state).await;

    let body = response.encode();
    send_response(&mut stream, &body).await?;

    info!(
        peer = %peer,
        status = %format!("0x{:04X}", response.operation_or_status),
        response_bytes = body.len(),
        "IPP response sent"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Operation dispatch
// ---------------------------------------------------------------------------

/// Decode one IPP body and produce its response.
///
/// A body whose attributes fail to decode still gets its version and
/// request id echoed when the 8-byte header is intact.
async fn process_request(
    body: &[u8],
    ctx: &RequestContext,
    state: &Arc<SharedState>,
) -> IppMessage {
    match IppMessage::decode(body) {
        Ok(message) => {
            debug!(
                peer = %ctx.peer,
                version = %format!("{}.{}", message.version_major, message.version_minor),
                operation = %format!("0x{:04X}", message.operation_or_status),
                request_id = message.request_id,
                doc_bytes = message.document.len(),
                "parsed IPP request"
            );
            dispatch_operation(message, ctx, state).await
        }
        Err(e) => {
            warn!(peer = %ctx.peer, error = %e, "malformed IPP request");
            let header = IppMessage::decode_header(body);
            error_response(header.as_ref(), status_for_error(&e))
        }
    }
}

/// Route a decoded request to its handler.
async fn dispatch_operation(
    request: IppMessage,
    ctx: &RequestContext,
    state: &Arc<SharedState>,
) -> IppMessage {
    match request.operation_or_status {
        OP_PRINT_JOB => handle_print_job(request, ctx, state).await,
        OP_VALIDATE_JOB => handle_validate_job(&request),
        OP_GET_JOB_ATTRIBUTES => handle_get_job_attributes(&request, ctx, state),
        OP_GET_PRINTER_ATTRIBUTES => handle_get_printer_attributes(&request, ctx, state),
        other => {
            let err = PrintheadError::UnsupportedOperation(other);
            warn!(error = %err, "unsupported IPP operation");
            error_response(Some(&request), status_for_error(&err))
        }
    }
}

// ---------------------------------------------------------------------------
// Operation handlers
// ---------------------------------------------------------------------------

/// Print-Job (0x0002): print the document after the attributes and report
/// the job as completed.
async fn handle_print_job(
    mut request: IppMessage,
    ctx: &RequestContext,
    state: &Arc<SharedState>,
) -> IppMessage {
    if !request.terminated || request.document.is_empty() {
        warn!(peer = %ctx.peer, "Print-Job without document data");
        return error_response(Some(&request), STATUS_CLIENT_ERROR_BAD_REQUEST);
    }

    let document = std::mem::take(&mut request.document);
    let job_id = state.ledger().allocate();
    info!(job_id = %job_id, peer = %ctx.peer, bytes = document.len(), "Print-Job received");

    let pipeline = state.pipeline.clone();
    let outcome = tokio::task::spawn_blocking(move || print_document(&pipeline, job_id, &document))
        .await
        .unwrap_or_else(|e| Err(PrintheadError::PrintServer(format!("print task: {e}"))));

    match outcome {
        Ok(()) => {
            state.ledger().record(job_id, JobState::Completed);
            info!(job_id = %job_id, "Print-Job completed");
            job_response(&request, ctx, state, job_id, JobState::Completed)
        }
        Err(e) => {
            state.ledger().record(job_id, JobState::Failed);
            error!(job_id = %job_id, error = %e, "Print-Job failed");
            error_response(Some(&request), status_for_error(&e))
        }
    }
}

/// Write the document to a scratch file, render it, and print every page.
///
/// Only the last page is trimmed and followed by the cut.  The scratch file
/// is removed when this returns, whatever the outcome.
pub fn print_document(pipeline: &PrintPipeline, job_id: JobId, document: &[u8]) -> Result<()> {
    let mut scratch = tempfile::Builder::new()
        .prefix(&format!("ipp_job_{job_id}_"))
        .suffix(".bin")
        .tempfile()?;
    scratch.write_all(document)?;
    scratch.flush()?;

    let pages = pipeline.renderer.render(scratch.path())?;
    if pages.is_empty() {
        return Err(PrintheadError::Render("document has no pages".into()));
    }

    let settings = current_settings(&pipeline.settings);
    if !pipeline.device.ensure_ready(settings.brightness) {
        return Err(PrintheadError::DeviceUnavailable);
    }

    let page_count = pages.len();
    for (index, page) in pages.into_iter().enumerate() {
        let raster = rasterize_page(page, PRINT_WIDTH_PX);
        let printed = if index + 1 == page_count {
            let raster = raster.trimmed(pipeline.trim_margin_rows);
            pipeline.device.print_bitmap_and_cut(&raster, settings.cut_mode)
        } else {
            pipeline.device.print_bitmap(&raster)
        };
        if !printed {
            return Err(PrintheadError::DeviceWrite(format!(
                "page {}/{page_count} of job {job_id}",
                index + 1
            )));
        }
        debug!(job_id = %job_id, page = index + 1, page_count, "page printed");
    }
    Ok(())
}

/// Validate-Job (0x0004): accept without touching the device.
fn handle_validate_job(request: &IppMessage) -> IppMessage {
    let mut resp = IppResponseBuilder::reply_to(request, STATUS_OK);
    resp.operation_attributes();
    resp.finish()
}

/// Get-Job-Attributes (0x0009): report the last known state of a job.
fn handle_get_job_attributes(
    request: &IppMessage,
    ctx: &RequestContext,
    state: &SharedState,
) -> IppMessage {
    let requested = request
        .operation_attributes()
        .and_then(|g| g.get_integer("job-id", VALUE_TAG_INTEGER))
        .map(JobId);
    let (job_id, job_state) = {
        let ledger = state.ledger();
        let id = requested.unwrap_or_else(|| ledger.last_issued());
        (id, ledger.state_of(id))
    };
    job_response(request, ctx, state, job_id, job_state)
}

fn job_response(
    request: &IppMessage,
    ctx: &RequestContext,
    state: &SharedState,
    job_id: JobId,
    job_state: JobState,
) -> IppMessage {
    let (state_enum, reason) = ipp_job_state(job_state);
    let job_uri = format!(
        "ipp://{}:{}{PRINTER_PATH}/jobs/{}",
        ctx.host, state.port, job_id
    );

    let mut resp = IppResponseBuilder::reply_to(request, STATUS_OK);
    resp.operation_attributes();
    resp.begin_group(TAG_JOB_ATTRIBUTES)
        .integer("job-id", job_id.0)
        .uri("job-uri", &job_uri)
        .enum_attr("job-state", state_enum)
        .keyword("job-state-reasons", reason);
    resp.finish()
}

/// Get-Printer-Attributes (0x000B): the static capability set.
fn handle_get_printer_attributes(
    request: &IppMessage,
    ctx: &RequestContext,
    state: &SharedState,
) -> IppMessage {
    let printer_uri = format!("ipp://{}:{}{PRINTER_PATH}", ctx.host, state.port);
    let more_info = format!("http://{}:{}", ctx.host, state.api_port);
    let name = &state.identity.name;

    let mut resp = IppResponseBuilder::reply_to(request, STATUS_OK);
    resp.operation_attributes();
    resp.begin_group(TAG_PRINTER_ATTRIBUTES)
        // Identification
        .uri("printer-uri-supported", &printer_uri)
        .keyword("uri-security-supported", "none")
        .keyword("uri-authentication-supported", "none")
        .name_attr("printer-name", name)
        .text("printer-info", &format!("{name} Thermal Receipt Printer"))
        .text("printer-make-and-model", "Printhead Thermal")
        .uri("printer-more-info", &more_info)
        .uri("printer-uuid", &format!("urn:uuid:{}", state.identity.uuid))
        // State
        .enum_attr("printer-state", PRINTER_STATE_IDLE)
        .keyword("printer-state-reasons", "none")
        .boolean("printer-is-accepting-jobs", true)
        .integer("queued-job-count", 0)
        // Capabilities
        .keyword("ipp-versions-supported", "1.1")
        .keyword_additional("2.0")
        .enum_attr("operations-supported", i32::from(OP_PRINT_JOB))
        .enum_additional(i32::from(OP_VALIDATE_JOB))
        .enum_additional(i32::from(OP_GET_JOB_ATTRIBUTES))
        .enum_additional(i32::from(OP_GET_PRINTER_ATTRIBUTES))
        // Supported document formats
        .mime_type("document-format-supported", "application/pdf")
        .mime_type_additional("application/octet-stream")
        .mime_type("document-format-default", "application/pdf")
        // Charset/language
        .charset("charset-configured", "utf-8")
        .charset("charset-supported", "utf-8")
        .natural_language("natural-language-configured", "en")
        .natural_language("generated-natural-language-supported", "en")
        // Media: a single 4x6in sheet, the closest standard size to the roll
        .keyword("media-supported", "na_index-4x6_4x6in")
        .keyword("media-default", "na_index-4x6_4x6in")
        .keyword("media-ready", "na_index-4x6_4x6in")
        .media_size("media-size-supported", 10160, 15240)
        // Color
        .keyword("print-color-mode-supported", "monochrome")
        .keyword("print-color-mode-default", "monochrome")
        .boolean("color-supported", false)
        // Sides
        .keyword("sides-supported", "one-sided")
        .keyword("sides-default", "one-sided")
        .keyword("pdl-override-supported", "attempted");

    debug!("Get-Printer-Attributes: returning capabilities");
    resp.finish()
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Send an IPP response wrapped in a minimal HTTP/1.1 200 OK.
async fn send_response(stream: &mut tokio::net::TcpStream, ipp_body: &[u8]) -> Result<()> {
    let http_response = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: application/ipp\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        ipp_body.len()
    );

    stream
        .write_all(http_response.as_bytes())
        .await
        .map_err(|e| PrintheadError::PrintServer(format!("write HTTP headers: {e}")))?;
    stream
        .write_all(ipp_body)
        .await
        .map_err(|e| PrintheadError::PrintServer(format!("write IPP body: {e}")))?;
    stream
        .flush()
        .await
        .map_err(|e| PrintheadError::PrintServer(format!("flush: {e}")))?;
    Ok(())
}
