// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device arbiter: the single owner of the print head transport.
//
// Every front end holds an `Arc<DeviceArbiter>`.  Each primitive takes the
// one internal lock for exactly one transport call, so writes from different
// connections are totally ordered and never interleave.  Transport errors
// are logged and reported as `false`; nothing here propagates or panics.
//
// The transport is opened lazily and never closed: the head firmware does
// not tolerate repeated open/close cycles.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use printhead_core::error::{PrintheadError, Result};
use printhead_core::{CutMode, RasterImage, STATUS_NOT_OPEN, StatusKind};
use tracing::{debug, error, info, warn};

use crate::escpos;

/// Status reported when a sensor query itself fails.
pub const STATUS_QUERY_FAILED: i32 = -1;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// The opaque hardware handle underneath the arbiter.
///
/// Implementations are only ever called with the arbiter lock held.
pub trait Transport: Send {
    fn open(&mut self) -> Result<()>;

    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Write and wait until the transport has accepted every byte.
    fn write_sync(&mut self, bytes: &[u8]) -> Result<()>;

    /// Sensor reading: 0 is normal, anything else is a fault.
    fn status(&mut self, kind: StatusKind) -> Result<i32>;
}

/// A print head exposed as a character device (e.g. `/dev/usb/lp0`).
///
/// Character devices offer no sensor interface, so every sensor reads
/// normal once the device is open.
#[derive(Debug)]
pub struct FileTransport {
    path: PathBuf,
    file: Option<File>,
}

impl FileTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(PrintheadError::DeviceUnavailable)
    }
}

impl Transport for FileTransport {
    fn open(&mut self) -> Result<()> {
        let file = OpenOptions::new().write(true).open(&self.path)?;
        self.file = Some(file);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.file()?.write_all(bytes)?;
        Ok(())
    }

    fn write_sync(&mut self, bytes: &[u8]) -> Result<()> {
        let file = self.file()?;
        file.write_all(bytes)?;
        file.flush()?;
        match file.sync_data() {
            // Most character devices reject fsync; the write already blocked.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            other => other.map_err(Into::into),
        }
    }

    fn status(&mut self, _kind: StatusKind) -> Result<i32> {
        self.file()?;
        Ok(0)
    }
}

/// What a [`RecordingTransport`] has seen.
#[derive(Debug, Default)]
struct Recording {
    opens: usize,
    writes: Vec<Vec<u8>>,
    stream: Vec<u8>,
    fail_open: bool,
    fail_writes: bool,
    paper: i32,
    cover: i32,
    overheat: i32,
}

/// In-memory transport that records every write.
///
/// Clones share the same recording, so a test can keep one handle while
/// the arbiter owns the other.  Used by tests and by `--dry-run`.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose `open` always fails.
    pub fn unavailable() -> Self {
        let transport = Self::default();
        transport.lock().fail_open = true;
        transport
    }

    fn lock(&self) -> MutexGuard<'_, Recording> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every subsequent write fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn set_status(&self, kind: StatusKind, value: i32) {
        let mut rec = self.lock();
        match kind {
            StatusKind::Paper => rec.paper = value,
            StatusKind::Cover => rec.cover = value,
            StatusKind::Overheat => rec.overheat = value,
        }
    }

    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    /// Every write call in order, one entry per call.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    /// All written bytes concatenated in arrival order.
    pub fn bytes(&self) -> Vec<u8> {
        self.lock().stream.clone()
    }
}

impl Transport for RecordingTransport {
    fn open(&mut self) -> Result<()> {
        let mut rec = self.lock();
        if rec.fail_open {
            return Err(PrintheadError::DeviceUnavailable);
        }
        rec.opens += 1;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.lock().fail_writes {
            return Err(PrintheadError::DeviceWrite("recording transport set to fail".into()));
        }
        // Byte at a time so that an unserialised caller would show up as
        // interleaving in `bytes()`.
        for &b in bytes {
            self.lock().stream.push(b);
            std::thread::yield_now();
        }
        self.lock().writes.push(bytes.to_vec());
        Ok(())
    }

    fn write_sync(&mut self, bytes: &[u8]) -> Result<()> {
        self.write(bytes)
    }

    fn status(&mut self, kind: StatusKind) -> Result<i32> {
        let rec = self.lock();
        Ok(match kind {
            StatusKind::Paper => rec.paper,
            StatusKind::Cover => rec.cover,
            StatusKind::Overheat => rec.overheat,
        })
    }
}

// ---------------------------------------------------------------------------
// Arbiter
// ---------------------------------------------------------------------------

struct DeviceState {
    transport: Box<dyn Transport>,
    open: bool,
}

/// Serialises all access to the print head.
pub struct DeviceArbiter {
    state: Mutex<DeviceState>,
}

impl std::fmt::Debug for DeviceArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceArbiter")
            .field("open", &self.is_open())
            .finish()
    }
}

impl DeviceArbiter {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::from_boxed(Box::new(transport))
    }

    pub fn from_boxed(transport: Box<dyn Transport>) -> Self {
        Self {
            state: Mutex::new(DeviceState {
                transport,
                open: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        // A panic inside a transport call must not wedge the device forever.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -- Primitives -----------------------------------------------------------

    /// Open the transport.  Idempotent: returns true if already open.
    pub fn open(&self) -> bool {
        let mut state = self.lock();
        Self::open_locked(&mut state)
    }

    fn open_locked(state: &mut DeviceState) -> bool {
        if state.open {
            return true;
        }
        match state.transport.open() {
            Ok(()) => {
                state.open = true;
                info!("print head opened");
                true
            }
            Err(e) => {
                error!(error = %e, "failed to open print head");
                false
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Send bytes to the head.  False if the device is not open or the
    /// transport reported an error.
    pub fn write(&self, bytes: &[u8]) -> bool {
        let mut state = self.lock();
        if !state.open {
            warn!(bytes = bytes.len(), "write: print head not open");
            return false;
        }
        match state.transport.write(bytes) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, bytes = bytes.len(), "write failed");
                false
            }
        }
    }

    /// Like [`write`](Self::write) but waits for the transport to accept the
    /// data.
    pub fn write_sync(&self, bytes: &[u8]) -> bool {
        let mut state = self.lock();
        if !state.open {
            warn!(bytes = bytes.len(), "write_sync: print head not open");
            return false;
        }
        match state.transport.write_sync(bytes) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, bytes = bytes.len(), "synchronous write failed");
                false
            }
        }
    }

    /// Read a sensor.  Returns [`STATUS_NOT_OPEN`] if the device was never
    /// opened.
    pub fn status(&self, kind: StatusKind) -> i32 {
        let mut state = self.lock();
        if !state.open {
            return STATUS_NOT_OPEN;
        }
        match state.transport.status(kind) {
            Ok(code) => code,
            Err(e) => {
                warn!(error = %e, ?kind, "status query failed");
                STATUS_QUERY_FAILED
            }
        }
    }

    /// Feed past the blade and cut, as one write.
    pub fn feed_and_cut(&self, full_cut: bool) -> bool {
        self.write(&escpos::feed_and_cut(full_cut))
    }

    // -- Convenience ----------------------------------------------------------

    /// Open the device if needed and, on first open, reset it and set the
    /// print density.
    pub fn ensure_ready(&self, brightness: u8) -> bool {
        let mut state = self.lock();
        if state.open {
            return true;
        }
        if !Self::open_locked(&mut state) {
            return false;
        }
        let setup = escpos::combine(&[&escpos::initialize(), &escpos::set_brightness(brightness)]);
        if let Err(e) = state.transport.write(&setup) {
            // Still open; the next job retries the write path.
            error!(error = %e, "failed to initialise print head");
        }
        true
    }

    /// Write a raster image: header once, then the payload in fixed-size
    /// chunks.  Each chunk is its own locked write.
    pub fn print_bitmap(&self, raster: &RasterImage) -> bool {
        let width_bytes = raster.width_bytes();
        let Ok(width) = u16::try_from(width_bytes) else {
            error!(width_bytes, "raster too wide for the head");
            return false;
        };
        // The header height field is 16 bits; taller images go out in bands.
        let band_bytes = usize::from(u16::MAX) * width_bytes;
        for band in raster.data().chunks(band_bytes) {
            let rows = (band.len() / width_bytes) as u16;
            if !self.write(&escpos::raster_header(0, width, rows)) {
                return false;
            }
            for chunk in band.chunks(escpos::RASTER_CHUNK_SIZE) {
                if !self.write(chunk) {
                    return false;
                }
            }
        }
        debug!(
            width_bytes,
            height_dots = raster.height_dots(),
            "raster image written"
        );
        true
    }

    pub fn print_bitmap_and_cut(&self, raster: &RasterImage, cut: CutMode) -> bool {
        self.print_bitmap(raster) && self.feed_and_cut(cut.is_full())
    }
}
