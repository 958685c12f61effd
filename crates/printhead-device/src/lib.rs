// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printhead: the hardware side.  The device arbiter owns the print head,
// the ESC/POS module builds command bytes, and the rasterizer turns page
// bitmaps into packed monochrome rows.

pub mod arbiter;
pub mod escpos;
pub mod raster;

pub use arbiter::{DeviceArbiter, FileTransport, RecordingTransport, Transport};
pub use raster::{rasterize_page, to_monochrome, trim_trailing_white_rows};
