//! File adapter: JSON, NDJSON or CSV on local disk.

use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileFormat {
    Json,
    Ndjson,
    Csv,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSource {
    pub path: String,
    /// Inferred from the extension when absent, JSON otherwise.
    #[serde(default)]
    pub format: Option<FileFormat>,
}

impl FileSource {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(Error::Validation("dataSource.path is required".into()));
        }
        Ok(())
    }

    fn resolved_format(&self) -> FileFormat {
        self.format.unwrap_or_else(|| {
            match Path::new(&self.path)
                .extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_ascii_lowercase)
                .as_deref()
            {
                Some("csv") => FileFormat::Csv,
                Some("ndjson") | Some("jsonl") => FileFormat::Ndjson,
                _ => FileFormat::Json,
            }
        })
    }
}

pub(crate) async fn fetch(source: &FileSource) -> Result<Value> {
    let bytes = tokio::fs::read(&source.path).await?;
    decode(source.resolved_format(), &bytes)
}

fn decode(format: FileFormat, bytes: &[u8]) -> Result<Value> {
    match format {
        FileFormat::Json => Ok(serde_json::from_slice(bytes)?),
        FileFormat::Ndjson => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| Error::Validation(format!("NDJSON file is not UTF-8: {e}")))?;
            let records = text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(serde_json::from_str)
                .collect::<std::result::Result<Vec<Value>, _>>()?;
            Ok(Value::Array(records))
        }
        FileFormat::Csv => {
            let mut reader = csv::Reader::from_reader(bytes);
            let headers = reader.headers()?.clone();
            let mut records = Vec::new();
            for row in reader.records() {
                let row = row?;
                let object: Map<String, Value> = headers
                    .iter()
                    .zip(row.iter())
                    .map(|(h, v)| (h.to_string(), Value::String(v.to_string())))
                    .collect();
                records.push(Value::Object(object));
            }
            Ok(Value::Array(records))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_follows_extension() {
        let src = |p: &str| FileSource {
            path: p.into(),
            format: None,
        };
        assert_eq!(src("a/b.csv").resolved_format(), FileFormat::Csv);
        assert_eq!(src("a/b.jsonl").resolved_format(), FileFormat::Ndjson);
        assert_eq!(src("a/b").resolved_format(), FileFormat::Json);
    }

    #[test]
    fn decodes_each_format() {
        let ndjson = decode(FileFormat::Ndjson, b"{\"a\":1}\n\n{\"a\":2}\n").unwrap();
        assert_eq!(ndjson.as_array().unwrap().len(), 2);

        let csv = decode(FileFormat::Csv, b"id,name\n1,x\n2,y\n").unwrap();
        assert_eq!(csv[1]["name"], "y");
    }
}
