use std::path::Path;

use regex::Regex;
use std::sync::OnceLock;

use super::{normalize_newlines, ExtractedText};
use crate::error::Result;

fn blank_line_breaks(text: &str) -> Vec<usize> {
    let mut breaks = Vec::new();
    let mut offset = 0;
    let mut prev_blank = false;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !prev_blank {
                breaks.push(offset);
            }
            prev_blank = true;
        } else {
            prev_blank = false;
        }
        offset += line.len();
    }
    breaks
}

/// Plain text and source code: retained verbatim. For source files a one-line
/// language hint is prefixed so the embedder sees it as context without the
/// extraction pipeline needing AST awareness.
pub fn extract_plain(bytes: &[u8], path: &Path) -> Result<ExtractedText> {
    let raw = String::from_utf8_lossy(bytes);
    let text = normalize_newlines(&raw);

    let is_source = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| super::detect_mime(Path::new(&format!("x.{ext}"))) == "text/x-source-code")
        .unwrap_or(false);

    let text = if is_source {
        let lang = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("text");
        format!("// language: {lang}\n{text}")
    } else {
        text
    };

    let soft_breaks = blank_line_breaks(&text);
    Ok(ExtractedText { text, soft_breaks })
}

/// Markdown: verbatim text (headings/paragraphs are already human-readable), with
/// heading lines treated as strong split points alongside blank-line breaks.
pub fn extract_markdown(bytes: &[u8]) -> Result<ExtractedText> {
    let raw = String::from_utf8_lossy(bytes);
    let text = normalize_newlines(&raw);

    let mut soft_breaks = blank_line_breaks(&text);
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with('#') {
            soft_breaks.push(offset);
        }
        offset += line.len();
    }
    soft_breaks.sort_unstable();
    soft_breaks.dedup();

    Ok(ExtractedText { text, soft_breaks })
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</\1>|<[^>]+>").unwrap())
}

/// HTML: tags stripped, entities left as-is (rare enough in prose not to warrant a
/// dependency), blank-line collapsed paragraphs become the soft-break points.
pub fn extract_html(bytes: &[u8]) -> Result<ExtractedText> {
    let raw = String::from_utf8_lossy(bytes);
    let stripped = tag_regex().replace_all(&raw, "\n");
    let collapsed: String = stripped
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    let text = normalize_newlines(&collapsed);
    let soft_breaks = blank_line_breaks(&text);
    Ok(ExtractedText { text, soft_breaks })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_plain_normalizes_newlines() {
        let result = extract_plain(b"a\r\nb\r\n", Path::new("a.txt")).unwrap();
        assert_eq!(result.text, "a\nb\n");
    }

    #[test]
    fn test_extract_plain_adds_language_hint_for_source() {
        let result = extract_plain(b"fn main() {}", Path::new("main.rs")).unwrap();
        assert!(result.text.starts_with("// language: rs"));
    }

    #[test]
    fn test_extract_html_strips_tags() {
        let result = extract_html(b"<html><body><p>Hello</p><script>evil()</script></body></html>")
            .unwrap();
        assert!(result.text.contains("Hello"));
        assert!(!result.text.contains("evil"));
        assert!(!result.text.contains('<'));
    }

    #[test]
    fn test_markdown_heading_is_soft_break() {
        let result = extract_markdown(b"# Title\nbody text").unwrap();
        assert_eq!(result.soft_breaks, vec![0]);
    }
}
