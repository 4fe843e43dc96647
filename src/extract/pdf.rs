use super::{normalize_newlines, ExtractedText};
use crate::error::{KbError, Result};

/// PDF text layer only — images and embedded objects are ignored per §4.4. A
/// password-protected or scanned (image-only) PDF yields an error here, which the
/// caller surfaces as `index_status = error`, not a skip.
pub fn extract_pdf(bytes: &[u8]) -> Result<ExtractedText> {
    let raw = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| KbError::extract_failed("<pdf>", e.to_string()))?;
    let text = normalize_newlines(&raw);
    let mut soft_breaks = Vec::new();
    let mut offset = 0;
    for para in text.split("\n\n") {
        offset += para.len() + 2;
        soft_breaks.push(offset.min(text.len()));
    }
    Ok(ExtractedText { text, soft_breaks })
}
