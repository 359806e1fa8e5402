//! Text extraction with per-unit provenance.
//!
//! The format is chosen by file extension:
//!
//! | Extension | Units |
//! |-----------|-------|
//! | `.pdf` | one per page, numbered from 1 |
//! | `.pptx` | one per slide, numbered from 1 |
//! | `.docx` | a single unit without page |
//! | `.txt`, `.md` | a single unit without page |
//!
//! Extraction never panics on malformed input; it returns an
//! [`ExtractError`] and the ingest pipeline skips the document. Panics
//! raised by the PDF parser are caught and reported as
//! [`ExtractError::Pdf`].

use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use guideline_rag_core::models::PageText;
use quick_xml::events::Event;
use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
}

pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "pptx", "docx", "txt", "md"];

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

pub fn is_supported(path: &Path) -> bool {
    SUPPORTED_EXTENSIONS.contains(&extension(path).as_str())
}

/// Read and extract a file, refusing files larger than `max_bytes`.
pub fn extract_file(path: &Path, max_bytes: u64) -> Result<Vec<PageText>, ExtractError> {
    if !is_supported(path) {
        return Err(ExtractError::UnsupportedFormat(path.display().to_string()));
    }
    let size = std::fs::metadata(path)?.len();
    if size > max_bytes {
        return Err(ExtractError::TooLarge {
            size,
            limit: max_bytes,
        });
    }
    let bytes = std::fs::read(path)?;
    extract_bytes(&bytes, &extension(path))
}

/// Extract in-memory content given its lowercase extension (no dot).
pub fn extract_bytes(bytes: &[u8], ext: &str) -> Result<Vec<PageText>, ExtractError> {
    match ext {
        "pdf" => extract_pdf(bytes),
        "pptx" => extract_pptx(bytes),
        "docx" => Ok(vec![PageText::new(extract_docx(bytes)?, None)]),
        "txt" | "md" => Ok(vec![PageText::new(
            String::from_utf8_lossy(bytes).into_owned(),
            None,
        )]),
        other => Err(ExtractError::UnsupportedFormat(other.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
    let pages = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }))
    .map_err(|payload| {
        ExtractError::Pdf(format!("parser panicked: {}", panic_message(payload.as_ref())))
    })?
    .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText::new(text, Some(i as u32 + 1)))
        .collect())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    paragraph_text(&xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|n| {
            let number = n
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((number, n.to_string()))
        })
        .collect();
    slides.sort();

    let mut pages = Vec::with_capacity(slides.len());
    for (position, (_, name)) in slides.iter().enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, name, MAX_XML_ENTRY_BYTES)?;
        pages.push(PageText::new(paragraph_text(&xml)?, Some(position as u32 + 1)));
    }
    Ok(pages)
}

/// Collect the text of every `<*:t>` run, one line per `<*:p>` paragraph.
///
/// WordprocessingML (`w:`) and DrawingML (`a:`) share this shape.
fn paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}
