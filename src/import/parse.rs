//! Import body parsing: JSON arrays, `{ "events": [...] }` envelopes and CSV.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// CSV columns understood by the importer. `payload` holds JSON text.
pub const CSV_COLUMNS: [&str; 5] = ["eventType", "payload", "source", "sourceId", "receivedAt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    Json,
    Csv,
}

impl ImportFormat {
    /// Pick a format from a content type or file name, falling back to sniffing the body.
    pub fn detect(hint: Option<&str>, body: &[u8]) -> Self {
        if let Some(hint) = hint.map(str::to_ascii_lowercase) {
            if hint.contains("csv") {
                return ImportFormat::Csv;
            }
            if hint.contains("json") {
                return ImportFormat::Json;
            }
        }
        match body.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'[') | Some(b'{') => ImportFormat::Json,
            _ => ImportFormat::Csv,
        }
    }
}

/// A CSV row that could not become a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseError {
    /// 1-based line in the input, header included.
    pub line: u64,
    pub message: String,
}

/// Candidates in input order plus rows rejected while parsing.
#[derive(Debug, Default)]
pub struct ParsedImport {
    pub candidates: Vec<Value>,
    pub parse_errors: Vec<ParseError>,
}

pub fn parse(format: ImportFormat, body: &[u8]) -> Result<ParsedImport> {
    match format {
        ImportFormat::Json => Ok(ParsedImport {
            candidates: parse_json(body)?,
            parse_errors: Vec::new(),
        }),
        ImportFormat::Csv => parse_csv(body),
    }
}

/// A JSON array of events, or an object with an `events` array.
pub fn parse_json(body: &[u8]) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Error::Validation(format!("import body is not valid JSON: {e}")))?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("events") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(Error::Validation(
                "import body must be an array or an object with an events array".into(),
            )),
        },
        _ => Err(Error::Validation(
            "import body must be an array or an object with an events array".into(),
        )),
    }
}

/// One candidate object per CSV row. Empty cells are omitted.
pub fn parse_csv(body: &[u8]) -> Result<ParsedImport> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(body);

    let headers = reader.headers()?.clone();
    if !headers.iter().any(|h| h == "eventType") {
        return Err(Error::Validation(format!(
            "CSV header must include eventType (expected columns: {})",
            CSV_COLUMNS.join(", ")
        )));
    }

    let mut parsed = ParsedImport::default();
    for (row, result) in reader.records().enumerate() {
        let fallback_line = row as u64 + 2;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(fallback_line);
                parsed.parse_errors.push(ParseError {
                    line,
                    message: e.to_string(),
                });
                continue;
            }
        };
        let line = record.position().map(|p| p.line()).unwrap_or(fallback_line);

        let mut object = Map::new();
        let mut row_error = None;
        for (header, cell) in headers.iter().zip(record.iter()) {
            if cell.is_empty() {
                continue;
            }
            let value = if header == "payload" {
                match serde_json::from_str(cell) {
                    Ok(value) => value,
                    Err(e) => {
                        row_error = Some(format!("payload is not valid JSON: {e}"));
                        break;
                    }
                }
            } else {
                Value::String(cell.to_string())
            };
            object.insert(header.to_string(), value);
        }

        match row_error {
            Some(message) => parsed.parse_errors.push(ParseError { line, message }),
            None => parsed.candidates.push(Value::Object(object)),
        }
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_format_from_hint_then_body() {
        assert_eq!(ImportFormat::detect(Some("text/csv"), b"[]"), ImportFormat::Csv);
        assert_eq!(ImportFormat::detect(Some("events.json"), b"x"), ImportFormat::Json);
        assert_eq!(ImportFormat::detect(None, b"  [{}]"), ImportFormat::Json);
        assert_eq!(ImportFormat::detect(None, b"eventType,payload"), ImportFormat::Csv);
    }

    #[test]
    fn json_accepts_array_or_envelope() {
        assert_eq!(parse_json(br#"[{"a":1}]"#).unwrap().len(), 1);
        assert_eq!(parse_json(br#"{"events":[{},{}]}"#).unwrap().len(), 2);
        assert!(parse_json(br#"{"items":[]}"#).is_err());
        assert!(parse_json(b"nope").is_err());
    }

    #[test]
    fn csv_rows_become_candidates_and_bad_payloads_are_reported() {
        let body = "eventType,payload,sourceId\n\
                    order.created,\"{\"\"id\"\":1}\",A-1\n\
                    order.created,{not json},A-2\n\
                    order.updated,\"{\"\"id\"\":2}\",\n";
        let parsed = parse_csv(body.as_bytes()).unwrap();
        assert_eq!(parsed.candidates.len(), 2);
        assert_eq!(parsed.candidates[0]["payload"]["id"], 1);
        assert_eq!(parsed.candidates[0]["sourceId"], "A-1");
        assert!(parsed.candidates[1].get("sourceId").is_none());
        assert_eq!(parsed.parse_errors.len(), 1);
        assert_eq!(parsed.parse_errors[0].line, 3);
    }

    #[test]
    fn csv_without_event_type_column_is_rejected() {
        assert!(parse_csv(b"type,payload\nx,{}\n").is_err());
    }
}
