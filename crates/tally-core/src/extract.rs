//! Turning uploaded documents into text
//!
//! Delimited exports arrive as text (UTF-8, or ISO-8859-1 from older bank
//! exports). PDF statements go through `pdf-extract`.

use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

const PDF_MAGIC: &[u8] = b"%PDF";
const TEXT_EXTENSIONS: &[&str] = &["csv", "txt", "text"];

/// Extract statement text from an uploaded file
pub fn extract_text(filename: &str, bytes: &[u8]) -> Result<String> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::MalformedInput(format!("{} is empty", filename)));
    }

    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);

    if bytes.starts_with(PDF_MAGIC) || extension.as_deref() == Some("pdf") {
        return extract_pdf(filename, bytes);
    }

    match extension.as_deref() {
        None => decode_text(bytes),
        Some(ext) if TEXT_EXTENSIONS.contains(&ext) => decode_text(bytes),
        Some(ext) => Err(Error::UnsupportedFileType(format!(
            ".{} (expected .csv, .txt or .pdf)",
            ext
        ))),
    }
}

fn extract_pdf(filename: &str, bytes: &[u8]) -> Result<String> {
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(Error::MalformedInput(format!(
            "{} is not a PDF document",
            filename
        )));
    }
    // pdf-extract can panic on malformed font tables
    let text = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| Error::Extraction(format!("{}: extractor panicked", filename)))?
        .map_err(|e| Error::Extraction(format!("{}: {}", filename, e)))?;
    if text.trim().is_empty() {
        return Err(Error::Extraction(format!(
            "{}: no text layer (scanned document?)",
            filename
        )));
    }
    debug!("Extracted {} chars from {}", text.len(), filename);
    Ok(text)
}

/// UTF-8 when valid, otherwise ISO-8859-1 (every byte maps to the same code point)
fn decode_text(bytes: &[u8]) -> Result<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            debug!("Input is not UTF-8, decoding as ISO-8859-1");
            bytes.iter().map(|&b| b as char).collect()
        }
    };
    if text.contains('\0') {
        return Err(Error::MalformedInput(
            "binary content in a text statement".to_string(),
        ));
    }
    Ok(text)
}
