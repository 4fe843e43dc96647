//! Office/ODF formats: docx/pptx/odt/odp are all zip archives of XML parts; xlsx/ods
//! are handled by `calamine` instead since their cell-grid structure doesn't map onto
//! the same paragraph-flattening approach.

use std::io::{Cursor, Read};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::{normalize_newlines, ExtractedText};
use crate::error::{KbError, Result};

fn read_zip_entry(bytes: &[u8], entry_name: &str) -> Result<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| KbError::extract_failed(entry_name, e.to_string()))?;
    let mut file = archive
        .by_name(entry_name)
        .map_err(|e| KbError::extract_failed(entry_name, e.to_string()))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .map_err(|e| KbError::extract_failed(entry_name, e.to_string()))?;
    Ok(buf)
}

fn list_matching_entries(bytes: &[u8], prefix: &str, suffix: &str) -> Result<Vec<String>> {
    let archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| KbError::extract_failed("<zip>", e.to_string()))?;
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(suffix))
        .map(|n| n.to_string())
        .collect();
    names.sort();
    Ok(names)
}

/// Flatten one XML part's text runs, treating any tag in `paragraph_tags` as a
/// paragraph/slide boundary worth a soft break.
fn extract_xml_text(xml: &[u8], paragraph_tags: &[&str]) -> (String, Vec<usize>) {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut text = String::new();
    let mut soft_breaks = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Text(e)) => {
                if let Ok(s) = e.unescape() {
                    text.push_str(&s);
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                let local = String::from_utf8_lossy(name.as_ref()).to_string();
                if paragraph_tags.iter().any(|t| *t == local) {
                    if !text.ends_with('\n') {
                        text.push('\n');
                    }
                    soft_breaks.push(text.len());
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    (normalize_newlines(&text), soft_breaks)
}

pub fn extract_docx(bytes: &[u8]) -> Result<ExtractedText> {
    let xml = read_zip_entry(bytes, "word/document.xml")?;
    let (text, soft_breaks) = extract_xml_text(&xml, &["w:p"]);
    Ok(ExtractedText { text, soft_breaks })
}

pub fn extract_pptx(bytes: &[u8]) -> Result<ExtractedText> {
    let slides = list_matching_entries(bytes, "ppt/slides/slide", ".xml")?;
    let mut text = String::new();
    let mut soft_breaks = Vec::new();
    for slide in slides {
        let xml = read_zip_entry(bytes, &slide)?;
        let (slide_text, breaks) = extract_xml_text(&xml, &["a:p"]);
        for b in breaks {
            soft_breaks.push(text.len() + b);
        }
        text.push_str(&slide_text);
        if !text.ends_with('\n') {
            text.push('\n');
        }
        soft_breaks.push(text.len());
    }
    Ok(ExtractedText { text, soft_breaks })
}

pub fn extract_odt(bytes: &[u8]) -> Result<ExtractedText> {
    let xml = read_zip_entry(bytes, "content.xml")?;
    let (text, soft_breaks) = extract_xml_text(&xml, &["text:p", "text:h"]);
    Ok(ExtractedText { text, soft_breaks })
}

pub fn extract_odp(bytes: &[u8]) -> Result<ExtractedText> {
    let xml = read_zip_entry(bytes, "content.xml")?;
    let (text, soft_breaks) = extract_xml_text(&xml, &["text:p", "draw:page"]);
    Ok(ExtractedText { text, soft_breaks })
}

/// Spreadsheets: each row becomes one line, cells joined with a separator; a soft
/// break after every sheet and every row keeps the chunker from splitting mid-row.
fn extract_spreadsheet(bytes: &[u8], path: &Path) -> Result<ExtractedText> {
    use calamine::Reader as CalamineReader;

    let cursor = Cursor::new(bytes.to_vec());
    let mut workbook: calamine::Sheets<_> = calamine::open_workbook_auto_from_rs(cursor)
        .map_err(|e| KbError::extract_failed(path.display().to_string(), e.to_string()))?;

    let mut text = String::new();
    let mut soft_breaks = Vec::new();
    let sheet_names = workbook.sheet_names();

    for name in sheet_names {
        let Ok(range) = workbook.worksheet_range(&name) else {
            continue;
        };
        text.push_str(&format!("# {name}\n"));
        for row in range.rows() {
            let line = row
                .iter()
                .map(|cell| cell.to_string())
                .collect::<Vec<_>>()
                .join(" | ");
            text.push_str(&line);
            text.push('\n');
            soft_breaks.push(text.len());
        }
        text.push('\n');
        soft_breaks.push(text.len());
    }

    Ok(ExtractedText { text, soft_breaks })
}

pub fn extract_xlsx(bytes: &[u8], path: &Path) -> Result<ExtractedText> {
    extract_spreadsheet(bytes, path)
}

pub fn extract_ods(bytes: &[u8], path: &Path) -> Result<ExtractedText> {
    extract_spreadsheet(bytes, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_xml_text_splits_on_paragraph() {
        let xml = br#"<doc><w:p>Hello</w:p><w:p>World</w:p></doc>"#;
        let (text, breaks) = extract_xml_text(xml, &["w:p"]);
        assert_eq!(text, "Hello\nWorld\n");
        assert_eq!(breaks, vec![6, 12]);
    }
}
