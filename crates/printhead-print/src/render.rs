// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page renderers: turn a received document into one RGBA bitmap per page.
//
// The builtin renderer decodes raster images directly and handles PDFs
// whose pages are a single embedded JPEG (what scan-to-PDF and most phone
// print dialogs produce).  Anything else goes through an external
// rasterizer such as `pdftoppm`.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use image::{ImageFormat, RgbaImage};
use lopdf::{Dictionary, Document, Object, ObjectId};
use printhead_core::config::RendererConfig;
use printhead_core::error::{PrintheadError, Result};
use tracing::{debug, info, instrument, warn};

/// Resolution the external rasterizer is asked for by default, in DPI.
/// 203 DPI is the head's native resolution.
pub const DEFAULT_RENDER_DPI: u32 = 203;

/// Turns a document on disk into page bitmaps, top page first.
pub trait PageRenderer: Send + Sync {
    fn render(&self, path: &Path) -> Result<Vec<RgbaImage>>;
}

/// Build the renderer selected in the configuration.
pub fn renderer_from_config(config: &RendererConfig) -> Arc<dyn PageRenderer> {
    match config {
        RendererConfig::Builtin => Arc::new(BuiltinRenderer),
        RendererConfig::Command { program, args } => {
            Arc::new(CommandRenderer::new(program.clone(), args.clone()))
        }
    }
}

fn render_err(message: impl Into<String>) -> PrintheadError {
    PrintheadError::Render(message.into())
}

// ---------------------------------------------------------------------------
// Builtin
// ---------------------------------------------------------------------------

/// In-process renderer for raster images and image-only PDFs.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinRenderer;

impl PageRenderer for BuiltinRenderer {
    #[instrument(skip_all, fields(path = %path.display()))]
    fn render(&self, path: &Path) -> Result<Vec<RgbaImage>> {
        let data = std::fs::read(path)?;
        if data.starts_with(b"%PDF") {
            return render_pdf_images(&data);
        }
        let image = image::load_from_memory(&data)
            .map_err(|e| render_err(format!("unsupported document: {e}")))?;
        debug!(width = image.width(), height = image.height(), "raster document decoded");
        Ok(vec![image.to_rgba8()])
    }
}

/// Decode the embedded JPEG of every page.
fn render_pdf_images(data: &[u8]) -> Result<Vec<RgbaImage>> {
    let doc = Document::load_mem(data).map_err(|e| render_err(format!("invalid PDF: {e}")))?;
    let pages = doc.get_pages();
    info!(pages = pages.len(), "rendering PDF pages from embedded images");

    let mut out = Vec::with_capacity(pages.len());
    for (number, page_id) in pages {
        let jpeg = page_jpeg(&doc, page_id).ok_or_else(|| {
            render_err(format!(
                "page {number} is not a single JPEG image; configure a command renderer"
            ))
        })?;
        let image = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
            .map_err(|e| render_err(format!("page {number}: {e}")))?;
        out.push(image.to_rgba8());
    }
    Ok(out)
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, object)? {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

/// Page resources, following `/Parent` for inherited entries.
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_object(page_id).ok()?;
    for _ in 0..32 {
        let dict = resolve_dict(doc, node)?;
        if let Ok(resources) = dict.get(b"Resources") {
            return resolve_dict(doc, resources);
        }
        node = dict.get(b"Parent").ok()?;
    }
    None
}

fn is_name(object: Option<&Object>, expected: &[u8]) -> bool {
    matches!(object, Some(Object::Name(name)) if name.as_slice() == expected)
}

fn is_dct(filter: Option<&Object>, doc: &Document) -> bool {
    match filter.and_then(|f| resolve(doc, f)) {
        Some(Object::Name(name)) => name.as_slice() == b"DCTDecode",
        // A single-entry filter array is equivalent to the bare name.
        Some(Object::Array(filters)) => {
            filters.len() == 1 && is_name(filters.first(), b"DCTDecode")
        }
        _ => false,
    }
}

/// The raw JPEG stream of the first DCT-encoded image XObject on a page.
fn page_jpeg(doc: &Document, page_id: ObjectId) -> Option<&[u8]> {
    let resources = page_resources(doc, page_id)?;
    let xobjects = resolve_dict(doc, resources.get(b"XObject").ok()?)?;
    for (_, entry) in xobjects.iter() {
        let Some(Object::Stream(stream)) = resolve(doc, entry) else {
            continue;
        };
        if is_name(stream.dict.get(b"Subtype").ok(), b"Image")
            && is_dct(stream.dict.get(b"Filter").ok(), doc)
        {
            return Some(stream.content.as_slice());
        }
    }
    None
}

// ---------------------------------------------------------------------------
// External command
// ---------------------------------------------------------------------------

/// Renders through an external program that writes one PNG per page.
///
/// `{input}` in the arguments is replaced by the document path and
/// `{output}` by an output prefix inside a scratch directory; every `*.png`
/// written there is collected in page order.  With no arguments the
/// program is invoked poppler-style:
/// `<program> -png -r 203 <input> <output>`.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
}

impl CommandRenderer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `pdftoppm -png -r 203`.
    pub fn pdftoppm() -> Self {
        Self::new("pdftoppm", Vec::new())
    }

    fn arguments(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.display().to_string();
        let output = output.display().to_string();
        if self.args.is_empty() {
            return vec![
                "-png".into(),
                "-r".into(),
                DEFAULT_RENDER_DPI.to_string(),
                input,
                output,
            ];
        }
        self.args
            .iter()
            .map(|a| a.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }
}

/// Page files sorted by the page number in their name (`page-2.png` before
/// `page-10.png`).
fn sorted_pages(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pages: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("png")))
        .collect();
    pages.sort_by_key(|p| {
        let name = p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        (name.len(), name)
    });
    Ok(pages)
}

impl PageRenderer for CommandRenderer {
    #[instrument(skip_all, fields(program = %self.program, path = %path.display()))]
    fn render(&self, path: &Path) -> Result<Vec<RgbaImage>> {
        let scratch = tempfile::tempdir()?;
        let prefix = scratch.path().join("page");
        let args = self.arguments(path, &prefix);

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| render_err(format!("failed to run {}: {e}", self.program)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, stderr = %stderr.trim(), "renderer exited with error");
            return Err(render_err(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }

        let files = sorted_pages(scratch.path())?;
        if files.is_empty() {
            return Err(render_err(format!("{} produced no pages", self.program)));
        }
        files
            .iter()
            .map(|file| {
                image::open(file)
                    .map(|img| img.to_rgba8())
                    .map_err(|e| render_err(format!("{}: {e}", file.display())))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba};
    use lopdf::{Stream, dictionary};
    use std::io::{Cursor, Write};

    fn encoded(image: &RgbaImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        let dynamic = match format {
            ImageFormat::Jpeg => {
                DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image.clone()).to_rgb8())
            }
            _ => DynamicImage::ImageRgba8(image.clone()),
        };
        dynamic.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    fn temp_with(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    /// One-page PDF whose content is a single JPEG image XObject.
    fn jpeg_pdf(jpeg: Vec<u8>, width: u32, height: u32) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), (width as i64).into(), (height as i64).into()],
            "Resources" => dictionary! { "XObject" => dictionary! { "Im0" => image_id } },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn builtin_decodes_png() {
        let img = RgbaImage::from_pixel(40, 20, Rgba([0, 0, 0, 255]));
        let file = temp_with(&encoded(&img, ImageFormat::Png));
        let pages = BuiltinRenderer.render(file.path()).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].dimensions(), (40, 20));
    }

    #[test]
    fn builtin_extracts_jpeg_pages_from_pdf() {
        let img = RgbaImage::from_pixel(64, 32, Rgba([10, 10, 10, 255]));
        let pdf = jpeg_pdf(encoded(&img, ImageFormat::Jpeg), 64, 32);
        let file = temp_with(&pdf);
        let pages = BuiltinRenderer.render(file.path()).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].dimensions(), (64, 32));
    }

    #[test]
    fn builtin_rejects_garbage() {
        let file = temp_with(&[0x42; 100]);
        assert!(matches!(
            BuiltinRenderer.render(file.path()),
            Err(PrintheadError::Render(_))
        ));
    }

    #[test]
    fn command_arguments_substitute_placeholders() {
        let renderer = CommandRenderer::new(
            "mutool",
            vec!["draw".into(), "-o".into(), "{output}-%d.png".into(), "{input}".into()],
        );
        let args = renderer.arguments(Path::new("/tmp/job.pdf"), Path::new("/scratch/page"));
        assert_eq!(args, ["draw", "-o", "/scratch/page-%d.png", "/tmp/job.pdf"]);

        let default = CommandRenderer::pdftoppm().arguments(Path::new("in"), Path::new("out"));
        assert_eq!(default, ["-png", "-r", "203", "in", "out"]);
    }

    #[test]
    fn page_files_sort_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["page-10.png", "page-2.png", "page-1.png", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let names: Vec<String> = sorted_pages(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["page-1.png", "page-2.png", "page-10.png"]);
    }

    #[test]
    fn missing_program_is_a_render_error() {
        let file = temp_with(b"%PDF-1.4");
        let renderer = CommandRenderer::new("printhead-no-such-renderer", Vec::new());
        assert!(matches!(renderer.render(file.path()), Err(PrintheadError::Render(_))));
    }
}
