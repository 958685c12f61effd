// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Printhead print server.

use std::ops::RangeInclusive;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{PrintheadError, Result};

/// Printable width of the head in dots (573 physical dots, byte-aligned).
pub const PRINT_WIDTH_PX: u32 = 576;

/// Printable width in bytes of packed 1bpp raster data.
pub const PRINT_WIDTH_BYTES: usize = (PRINT_WIDTH_PX / 8) as usize;

/// Print density levels the head accepts.
pub const BRIGHTNESS_RANGE: RangeInclusive<u8> = 1..=8;

/// Default print density sent after initialisation.
pub const DEFAULT_BRIGHTNESS: u8 = 4;

/// Status sentinel returned when the device has never been opened.
pub const STATUS_NOT_OPEN: i32 = -99;

/// Integer job identifier issued by the IPP server.
///
/// Ids are unique and strictly increasing for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub i32);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states of a print job.
///
/// Jobs run synchronously inside the request that submitted them, so a job
/// is only ever observed in a terminal state once its id has been returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Accepted, not yet finished.
    Queued,
    /// Every page reached the device.
    Completed,
    /// Rendering or a device write failed.
    Failed,
}

/// Sensor that can be queried on the print head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Paper,
    Cover,
    Overheat,
}

impl StatusKind {
    pub const ALL: [StatusKind; 3] = [StatusKind::Paper, StatusKind::Cover, StatusKind::Overheat];
}

/// Cutter behaviour at the end of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CutMode {
    #[default]
    Full,
    Partial,
}

impl CutMode {
    pub fn is_full(self) -> bool {
        matches!(self, CutMode::Full)
    }
}

/// Print settings that can change while the servers are running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintSettings {
    pub cut_mode: CutMode,
    pub brightness: u8,
}

impl Default for PrintSettings {
    fn default() -> Self {
        Self {
            cut_mode: CutMode::Full,
            brightness: DEFAULT_BRIGHTNESS,
        }
    }
}

/// Settings shared between the front ends and the management API.
pub type SharedSettings = Arc<RwLock<PrintSettings>>;

/// Read a snapshot of the shared settings, tolerating a poisoned lock.
pub fn current_settings(settings: &SharedSettings) -> PrintSettings {
    match settings.read() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

/// Status of a network front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

/// The three independently managed network front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrontEnd {
    Ipp,
    Raw,
    Api,
}

impl std::fmt::Display for FrontEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FrontEnd::Ipp => "ipp",
            FrontEnd::Raw => "raw",
            FrontEnd::Api => "api",
        })
    }
}

/// A bit-packed monochrome image ready for the raster command.
///
/// Rows are `width_bytes` long, MSB first, and a set bit means ink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    width_bytes: usize,
    data: Vec<u8>,
}

impl RasterImage {
    /// Wrap packed rows, checking that `data` holds a whole number of rows.
    pub fn new(width_bytes: usize, data: Vec<u8>) -> Result<Self> {
        if width_bytes == 0 || data.len() % width_bytes != 0 {
            return Err(PrintheadError::Render(format!(
                "raster of {} bytes is not a multiple of the {}-byte row width",
                data.len(),
                width_bytes
            )));
        }
        Ok(Self { width_bytes, data })
    }

    /// A single all-zero row: the smallest printable image.
    pub fn blank(width_bytes: usize) -> Self {
        Self {
            width_bytes: width_bytes.max(1),
            data: vec![0; width_bytes.max(1)],
        }
    }

    pub fn width_bytes(&self) -> usize {
        self.width_bytes
    }

    pub fn height_dots(&self) -> usize {
        self.data.len() / self.width_bytes
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Iterate over the packed rows top to bottom.
    pub fn rows(&self) -> std::slice::Chunks<'_, u8> {
        self.data.chunks(self.width_bytes)
    }

    /// Drop blank rows below the last inked row, keeping `margin_rows` of
    /// them so the cutter does not clip the content.
    ///
    /// An image with no ink at all collapses to a single zero row.
    pub fn trimmed(&self, margin_rows: usize) -> RasterImage {
        let last_inked = self
            .rows()
            .rposition(|row| row.iter().any(|&b| b != 0));
        match last_inked {
            None => RasterImage::blank(self.width_bytes),
            Some(last) => {
                let keep = (last + 1 + margin_rows).min(self.height_dots());
                RasterImage {
                    width_bytes: self.width_bytes,
                    data: self.data[..keep * self.width_bytes].to_vec(),
                }
            }
        }
    }
}
