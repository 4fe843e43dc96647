use super::{normalize_newlines, ExtractedText};
use crate::error::{KbError, Result};

/// JSON: parsed then re-serialized. `serde_json::Map` is a `BTreeMap` by default (the
/// `preserve_order` feature is off), so object keys come out in a stable sorted order
/// regardless of how the source file wrote them.
pub fn extract_json(bytes: &[u8]) -> Result<ExtractedText> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| KbError::extract_failed("<json>", e.to_string()))?;
    let text = serde_json::to_string_pretty(&value)
        .map_err(|e| KbError::extract_failed("<json>", e.to_string()))?;
    Ok(ExtractedText::plain(normalize_newlines(&text)))
}

/// YAML: parsed then re-serialized through the same JSON value representation, which
/// gives the same stable key ordering as `extract_json` instead of YAML's
/// insertion-order mapping.
pub fn extract_yaml(bytes: &[u8]) -> Result<ExtractedText> {
    let value: serde_yaml_ng::Value = serde_yaml_ng::from_slice(bytes)
        .map_err(|e| KbError::extract_failed("<yaml>", e.to_string()))?;
    let json_value: serde_json::Value = serde_json::to_value(&value)
        .map_err(|e| KbError::extract_failed("<yaml>", e.to_string()))?;
    let text = serde_json::to_string_pretty(&json_value)
        .map_err(|e| KbError::extract_failed("<yaml>", e.to_string()))?;
    Ok(ExtractedText::plain(normalize_newlines(&text)))
}

/// CSV: rows rendered as one line each, fields joined with a separator search can
/// still tokenize on. Row order is already stable (it's the file's own order); no
/// resorting needed the way JSON/YAML object keys require.
pub fn extract_csv(bytes: &[u8]) -> Result<ExtractedText> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| KbError::extract_failed("<csv>", e.to_string()))?
        .clone();

    let mut lines = Vec::new();
    lines.push(headers.iter().collect::<Vec<_>>().join(" | "));
    let mut soft_breaks = Vec::new();
    let mut offset = lines[0].len() + 1;

    for record in reader.records() {
        let record = record.map_err(|e| KbError::extract_failed("<csv>", e.to_string()))?;
        let line = record.iter().collect::<Vec<_>>().join(" | ");
        soft_breaks.push(offset);
        offset += line.len() + 1;
        lines.push(line);
    }

    Ok(ExtractedText {
        text: lines.join("\n"),
        soft_breaks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_sorts_keys() {
        let result = extract_json(br#"{"b": 1, "a": 2}"#).unwrap();
        let a_pos = result.text.find("\"a\"").unwrap();
        let b_pos = result.text.find("\"b\"").unwrap();
        assert!(a_pos < b_pos);
    }

    #[test]
    fn test_extract_csv_joins_fields() {
        let result = extract_csv(b"name,age\nAlice,30\nBob,40\n").unwrap();
        assert!(result.text.contains("name | age"));
        assert!(result.text.contains("Alice | 30"));
        assert_eq!(result.soft_breaks.len(), 2);
    }
}
