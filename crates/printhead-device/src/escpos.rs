// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ESC/POS command encoder.
//
// Every builder is a pure function returning the exact byte sequence for one
// command.  Sequences are concatenated with `combine` and handed to the
// device arbiter as a single write.

const LF: u8 = 0x0A;
const ESC: u8 = 0x1B;
const FS: u8 = 0x1C;
const GS: u8 = 0x1D;

/// Raster payload is written to the device in chunks of this many bytes.
pub const RASTER_CHUNK_SIZE: usize = 4096;

/// Lines fed before the cutter so the last printed row clears the blade.
pub const CUT_FEED_LINES: u8 = 5;

// ---------------------------------------------------------------------------
// Initialisation and paper movement
// ---------------------------------------------------------------------------

/// `ESC @` resets the printer to its power-on state.
pub fn initialize() -> Vec<u8> {
    vec![ESC, 0x40]
}

pub fn line_feed() -> Vec<u8> {
    vec![LF]
}

/// `ESC d n` prints the buffer and feeds `n` lines.
pub fn feed_lines(n: u8) -> Vec<u8> {
    vec![ESC, 0x64, n]
}

/// `ESC J n` prints the buffer and feeds `n` dots.
pub fn feed_dots(n: u8) -> Vec<u8> {
    vec![ESC, 0x4A, n]
}

// ---------------------------------------------------------------------------
// Cutter
// ---------------------------------------------------------------------------

/// `GS V 0`
pub fn full_cut() -> Vec<u8> {
    vec![GS, 0x56, 0x00]
}

/// `GS V 1`
pub fn partial_cut() -> Vec<u8> {
    vec![GS, 0x56, 0x01]
}

/// `GS V 66 n` feeds `dots` and then partially cuts.
pub fn partial_cut_with_feed(dots: u8) -> Vec<u8> {
    vec![GS, 0x56, 0x42, dots]
}

/// Feed the paper past the blade, then cut.
pub fn feed_and_cut(full: bool) -> Vec<u8> {
    let cut = if full { full_cut() } else { partial_cut() };
    combine(&[&feed_lines(CUT_FEED_LINES), &cut])
}

// ---------------------------------------------------------------------------
// Text layout and style
// ---------------------------------------------------------------------------

/// Horizontal alignment for `ESC a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Justify {
    Left = 0,
    Center = 1,
    Right = 2,
}

pub fn justify(align: Justify) -> Vec<u8> {
    vec![ESC, 0x61, align as u8]
}

pub fn bold(on: bool) -> Vec<u8> {
    vec![ESC, 0x45, u8::from(on)]
}

/// `ESC - n`: 0 = off, 1 = one dot, 2 = two dots.
pub fn underline(thickness: u8) -> Vec<u8> {
    vec![ESC, 0x2D, thickness.min(2)]
}

/// `GS ! n` with width and height multipliers in `1..=8`.
///
/// Out-of-range multipliers are clamped.
pub fn char_size(width: u8, height: u8) -> Vec<u8> {
    let w = width.clamp(1, 8) - 1;
    let h = height.clamp(1, 8) - 1;
    vec![GS, 0x21, (w << 4) | h]
}

pub fn char_size_normal() -> Vec<u8> {
    vec![GS, 0x21, 0x00]
}

/// `ESC 2`
pub fn default_line_spacing() -> Vec<u8> {
    vec![ESC, 0x32]
}

/// `ESC 3 n` sets line spacing to `n` dots.
pub fn line_spacing(dots: u8) -> Vec<u8> {
    vec![ESC, 0x33, dots]
}

/// `FS B n` sets print density (1-8).
pub fn set_brightness(level: u8) -> Vec<u8> {
    vec![FS, 0x42, level]
}

// ---------------------------------------------------------------------------
// Raster images
// ---------------------------------------------------------------------------

/// `GS v 0 m xL xH yL yH` header for a raster bit image.
///
/// `mode` is 0 for normal density; 1-3 select double width/height variants.
pub fn raster_header(mode: u8, width_bytes: u16, height_dots: u16) -> Vec<u8> {
    let [xl, xh] = width_bytes.to_le_bytes();
    let [yl, yh] = height_dots.to_le_bytes();
    vec![GS, 0x76, 0x30, mode, xl, xh, yl, yh]
}

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

/// `GS ( k` sequence printing `data` as a model 2 QR code at error
/// correction level L.
pub fn qr_code(module_size: u8, data: &str) -> Vec<u8> {
    let payload = data.as_bytes();
    // Store length counts the `cn fn m` bytes as well as the data.
    let [pl, ph] = ((payload.len() + 3).min(u16::MAX as usize) as u16).to_le_bytes();

    let mut out = Vec::with_capacity(payload.len() + 40);
    out.extend_from_slice(&[GS, 0x28, 0x6B, 0x04, 0x00, 0x31, 0x41, 0x32, 0x00]);
    out.extend_from_slice(&[GS, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x43, module_size]);
    out.extend_from_slice(&[GS, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x45, 0x30]);
    out.extend_from_slice(&[GS, 0x28, 0x6B, pl, ph, 0x31, 0x50, 0x30]);
    out.extend_from_slice(payload);
    out.extend_from_slice(&[GS, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x51, 0x30]);
    out
}

/// Position of the human-readable text under a barcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HriPosition {
    None = 0,
    Above = 1,
    Below = 2,
    Both = 3,
}

/// Barcode symbologies accepted by `GS k` (function B numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Symbology {
    UpcA = 0,
    Ean13 = 2,
    Code39 = 4,
    Code128 = 65,
}

/// Barcode with the given height in dots, terminated by NUL.
pub fn barcode(symbology: Symbology, data: &str, height: u8, hri: HriPosition) -> Vec<u8> {
    let mut out = vec![GS, 0x48, hri as u8, GS, 0x68, height, GS, 0x6B, symbology as u8];
    out.extend(data.bytes().filter(u8::is_ascii));
    out.push(0x00);
    out
}

/// Barcode with the stock height (80 dots) and text printed below.
pub fn barcode_default(symbology: Symbology, data: &str) -> Vec<u8> {
    barcode(symbology, data, 80, HriPosition::Below)
}

/// `ESC p m t1 t2` pulses the cash drawer connector.
pub fn cash_drawer_pulse(pin: u8, on_ms: u8, off_ms: u8) -> Vec<u8> {
    vec![ESC, 0x70, pin, on_ms, off_ms]
}

pub fn cash_drawer_pulse_default() -> Vec<u8> {
    cash_drawer_pulse(0, 25, 250)
}

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

/// Concatenate command sequences in order.
pub fn combine(commands: &[&[u8]]) -> Vec<u8> {
    let total = commands.iter().map(|c| c.len()).sum();
    let mut out = Vec::with_capacity(total);
    for command in commands {
        out.extend_from_slice(command);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_sequences() {
        assert_eq!(initialize(), [0x1B, 0x40]);
        assert_eq!(line_feed(), [0x0A]);
        assert_eq!(feed_lines(4), [0x1B, 0x64, 4]);
        assert_eq!(feed_dots(24), [0x1B, 0x4A, 24]);
        assert_eq!(full_cut(), [0x1D, 0x56, 0x00]);
        assert_eq!(partial_cut(), [0x1D, 0x56, 0x01]);
        assert_eq!(partial_cut_with_feed(10), [0x1D, 0x56, 0x42, 10]);
        assert_eq!(default_line_spacing(), [0x1B, 0x32]);
        assert_eq!(line_spacing(30), [0x1B, 0x33, 30]);
        assert_eq!(set_brightness(4), [0x1C, 0x42, 4]);
    }

    #[test]
    fn text_style_sequences() {
        assert_eq!(justify(Justify::Center), [0x1B, 0x61, 1]);
        assert_eq!(bold(true), [0x1B, 0x45, 1]);
        assert_eq!(bold(false), [0x1B, 0x45, 0]);
        assert_eq!(underline(2), [0x1B, 0x2D, 2]);
        assert_eq!(char_size(2, 2), [0x1D, 0x21, 0x11]);
        assert_eq!(char_size(1, 3), [0x1D, 0x21, 0x02]);
        assert_eq!(char_size(0, 9), [0x1D, 0x21, 0x07]);
    }

    #[test]
    fn raster_header_is_little_endian() {
        assert_eq!(
            raster_header(0, 72, 0x0102),
            [0x1D, 0x76, 0x30, 0x00, 72, 0x00, 0x02, 0x01]
        );
    }

    #[test]
    fn feed_and_cut_feeds_before_cutting() {
        assert_eq!(feed_and_cut(true), [0x1B, 0x64, 5, 0x1D, 0x56, 0x00]);
        assert_eq!(feed_and_cut(false), [0x1B, 0x64, 5, 0x1D, 0x56, 0x01]);
    }

    #[test]
    fn qr_code_store_length_includes_header() {
        let bytes = qr_code(6, "hello");
        assert_eq!(&bytes[..9], [0x1D, 0x28, 0x6B, 0x04, 0x00, 0x31, 0x41, 0x32, 0x00]);
        assert_eq!(bytes[16], 6);
        // store block starts after model (9) + size (8) + ecc (8)
        assert_eq!(&bytes[25..33], [0x1D, 0x28, 0x6B, 8, 0, 0x31, 0x50, 0x30]);
        assert_eq!(&bytes[33..38], b"hello");
        assert_eq!(&bytes[38..], [0x1D, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x51, 0x30]);
    }

    #[test]
    fn barcode_is_nul_terminated() {
        let bytes = barcode_default(Symbology::Code39, "AB12");
        assert_eq!(&bytes[..9], [0x1D, 0x48, 2, 0x1D, 0x68, 80, 0x1D, 0x6B, 4]);
        assert_eq!(&bytes[9..13], b"AB12");
        assert_eq!(bytes.last(), Some(&0x00));
    }

    #[test]
    fn cash_drawer_defaults() {
        assert_eq!(cash_drawer_pulse_default(), [0x1B, 0x70, 0, 25, 250]);
    }

    #[test]
    fn combine_preserves_order() {
        let out = combine(&[&initialize(), &bold(true), b"hi", &line_feed()]);
        assert_eq!(out, [0x1B, 0x40, 0x1B, 0x45, 1, b'h', b'i', 0x0A]);
    }
}
