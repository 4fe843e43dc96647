//! Content extractor (§4.4): a pure function from raw bytes + MIME + path to UTF-8
//! text with normalized newlines, plus the soft-break offsets the chunker prefers to
//! split on. Never panics on a recognized MIME — failures come back as `KbError`,
//! which the indexer turns into a per-file `error` status rather than aborting.

mod office;
mod pdf;
mod structured;
mod text;

use std::path::Path;

use crate::error::Result;

/// Result of extracting a file's textual content.
#[derive(Debug, Clone, Default)]
pub struct ExtractedText {
    pub text: String,
    /// Byte offsets into `text` that are good split points (paragraph/slide/row
    /// boundaries the source format already marked) — the chunker treats these as
    /// preferred splits within its ±10% window (§4.5).
    pub soft_breaks: Vec<usize>,
}

impl ExtractedText {
    fn plain(text: String) -> Self {
        Self {
            text,
            soft_breaks: Vec::new(),
        }
    }
}

/// Map a file's extension to a MIME-ish category string the dispatch table below
/// understands. Deliberately extension-based rather than a sniffing crate — the same
/// convention the teacher's `file::Language` table used for source files.
pub fn detect_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "txt" | "rst" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "json" | "jsonc" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "csv" => "text/csv",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "odt" => "application/vnd.oasis.opendocument.text",
        "odp" => "application/vnd.oasis.opendocument.presentation",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        "pdf" => "application/pdf",
        "rs" | "py" | "js" | "ts" | "tsx" | "jsx" | "go" | "java" | "c" | "h" | "cpp" | "hpp"
        | "cs" | "rb" | "php" | "sh" | "kt" | "swift" | "toml" | "ini" | "sql" => {
            "text/x-source-code"
        }
        _ => "application/octet-stream",
    }
}

/// Extract text from `bytes`, dispatching on `mime`. An unrecognized MIME is not an
/// error: it returns an empty result, which the caller turns into `index_status =
/// indexed, chunk_count = 0` (§4.4).
pub fn extract(bytes: &[u8], mime: &str, path: &Path) -> Result<ExtractedText> {
    match mime {
        "text/plain" | "text/x-source-code" => text::extract_plain(bytes, path),
        "text/markdown" => text::extract_markdown(bytes),
        "text/html" => text::extract_html(bytes),
        "application/json" => structured::extract_json(bytes),
        "application/yaml" => structured::extract_yaml(bytes),
        "text/csv" => structured::extract_csv(bytes),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
            office::extract_docx(bytes)
        }
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
            office::extract_pptx(bytes)
        }
        "application/vnd.oasis.opendocument.text" => office::extract_odt(bytes),
        "application/vnd.oasis.opendocument.presentation" => office::extract_odp(bytes),
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
            office::extract_xlsx(bytes, path)
        }
        "application/vnd.oasis.opendocument.spreadsheet" => office::extract_ods(bytes, path),
        "application/pdf" => pdf::extract_pdf(bytes),
        _ => Ok(ExtractedText::default()),
    }
}

/// Normalize line endings to `\n` — every extractor routes its output through this so
/// downstream chunk boundaries never depend on the source file's line-ending style.
pub(crate) fn normalize_newlines(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_mime_by_extension() {
        assert_eq!(detect_mime(Path::new("a.md")), "text/markdown");
        assert_eq!(detect_mime(Path::new("a.docx")).contains("wordprocessing"), true);
        assert_eq!(detect_mime(Path::new("a.unknownext")), "application/octet-stream");
    }

    #[test]
    fn test_unknown_mime_yields_empty_result() {
        let result = extract(b"whatever", "application/octet-stream", Path::new("a.bin")).unwrap();
        assert!(result.text.is_empty());
    }
}
