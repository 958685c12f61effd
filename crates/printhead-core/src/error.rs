// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Printhead.

use thiserror::Error;

/// Top-level error type for all Printhead operations.
#[derive(Debug, Error)]
pub enum PrintheadError {
    // -- Device errors --
    #[error("print head could not be opened")]
    DeviceUnavailable,

    #[error("device write failed: {0}")]
    DeviceWrite(String),

    // -- Protocol errors --
    #[error("malformed protocol message: {0}")]
    MalformedMessage(String),

    #[error("operation 0x{0:04X} is not supported")]
    UnsupportedOperation(u16),

    #[error("print server error: {0}")]
    PrintServer(String),

    // -- Document errors --
    #[error("document rendering failed: {0}")]
    Render(String),

    // -- Configuration --
    #[error("configuration error: {0}")]
    Config(String),

    // -- Storage / persistence --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PrintheadError>;
