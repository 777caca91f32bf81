//! HTTP pull adapter.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpSource {
    pub url: String,
    /// `GET` (default) or `POST`.
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    /// Dot-separated path to the records inside the response, e.g. `data.items`.
    #[serde(default)]
    pub records_path: Option<String>,
}

impl HttpSource {
    pub(crate) fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.url)
            .map_err(|e| Error::Validation(format!("dataSource.url is invalid: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Validation("dataSource.url must be http or https".into()));
        }
        match self.method.as_deref().map(str::to_ascii_uppercase).as_deref() {
            None | Some("GET") | Some("POST") => Ok(()),
            Some(other) => Err(Error::Validation(format!(
                "dataSource.method must be GET or POST (got {other})"
            ))),
        }
    }
}

pub(crate) async fn fetch(client: &reqwest::Client, source: &HttpSource) -> Result<Value> {
    let is_post = source
        .method
        .as_deref()
        .is_some_and(|m| m.eq_ignore_ascii_case("POST"));
    let mut request = if is_post {
        client.post(&source.url)
    } else {
        client.get(&source.url)
    };
    for (name, value) in &source.headers {
        request = request.header(name, value);
    }
    if let Some(body) = &source.body {
        request = request.json(body);
    }

    let response = request.send().await?.error_for_status()?;
    let value: Value = response.json().await?;

    match &source.records_path {
        Some(path) => select_path(value, path),
        None => Ok(value),
    }
}

fn select_path(mut value: Value, path: &str) -> Result<Value> {
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        value = match value {
            Value::Object(mut map) => map.remove(segment),
            Value::Array(mut items) => segment
                .parse::<usize>()
                .ok()
                .filter(|i| *i < items.len())
                .map(|i| items.swap_remove(i)),
            _ => None,
        }
        .ok_or_else(|| Error::Other(format!("recordsPath {path} not found in response")))?;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_path_walks_objects_and_indices() {
        let body = json!({"data": {"pages": [{"items": [1, 2]}]}});
        assert_eq!(
            select_path(body.clone(), "data.pages.0.items").unwrap(),
            json!([1, 2])
        );
        assert!(select_path(body, "data.missing").is_err());
    }
}
