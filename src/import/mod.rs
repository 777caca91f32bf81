//! Bulk import pipeline.
//!
//! Items are processed sequentially so results keep input order. Every
//! candidate lands in exactly one of `successful`, `failed` or `duplicates`.

pub mod parse;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use serde_json::Value;

use crate::audit::EventAuditStore;
use crate::error::{Error, Result};
use crate::model::*;
use crate::telemetry::metrics;

pub use parse::{ImportFormat, ParseError, ParsedImport};

/// Largest batch accepted. Checked before any item is processed.
pub const MAX_IMPORT_BATCH: usize = 1000;

/// Code given to items left unprocessed after a failure with `continue_on_error` off.
pub const NOT_PROCESSED: &str = "NOT_PROCESSED";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    /// Validate and classify without persisting.
    pub dry_run: bool,
    pub continue_on_error: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            continue_on_error: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessfulItem {
    pub index: usize,
    /// Absent on a dry run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    pub event_type: String,
    pub status: EventStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub index: usize,
    pub code: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateItem {
    pub index: usize,
    pub event_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_event_id: Option<EventId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportResults {
    pub successful: Vec<SuccessfulItem>,
    pub failed: Vec<FailedItem>,
    pub duplicates: Vec<DuplicateItem>,
}

/// How a batch went overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Nothing failed; every item succeeded or every item was a duplicate.
    Complete,
    /// Successes coexist with failures or duplicates.
    Partial,
    /// Nothing succeeded and something failed.
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub success: bool,
    pub dry_run: bool,
    pub summary: ImportSummary,
    pub results: ImportResults,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parse_errors: Vec<ParseError>,
}

impl ImportReport {
    pub fn outcome(&self) -> ImportOutcome {
        let s = &self.summary;
        if s.successful == 0 && s.failed > 0 {
            ImportOutcome::Rejected
        } else if s.successful > 0 && (s.failed > 0 || s.duplicates > 0) {
            ImportOutcome::Partial
        } else {
            ImportOutcome::Complete
        }
    }

    pub fn is_partial(&self) -> bool {
        self.outcome() == ImportOutcome::Partial
    }
}

/// A candidate that passed shape validation.
struct ValidItem {
    event_type: String,
    payload: Value,
    source: String,
    source_id: Option<String>,
    received_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct BulkImporter {
    audit: EventAuditStore,
}

impl BulkImporter {
    pub fn new(audit: EventAuditStore) -> Self {
        Self { audit }
    }

    /// Parse a raw body and import its candidates. Parse errors ride along in the report.
    pub async fn import_body(
        &self,
        org_id: &str,
        format: ImportFormat,
        body: &[u8],
        options: ImportOptions,
    ) -> Result<ImportReport> {
        let parsed = parse::parse(format, body)?;
        let mut report = self.import(org_id, parsed.candidates, options).await?;
        report.parse_errors = parsed.parse_errors;
        Ok(report)
    }

    /// Classify every candidate. Fails as a whole only when the batch is over the cap.
    pub async fn import(
        &self,
        org_id: &str,
        candidates: Vec<Value>,
        options: ImportOptions,
    ) -> Result<ImportReport> {
        if candidates.len() > MAX_IMPORT_BATCH {
            return Err(Error::Validation(format!(
                "import batch of {} events exceeds the maximum of {MAX_IMPORT_BATCH}",
                candidates.len()
            )));
        }

        let mut results = ImportResults::default();
        let mut halted = false;

        for (index, candidate) in candidates.into_iter().enumerate() {
            if halted {
                results.failed.push(FailedItem {
                    index,
                    code: NOT_PROCESSED.to_string(),
                    error: "not processed after an earlier failure".to_string(),
                });
                continue;
            }

            let item = match validate_item(candidate) {
                Ok(item) => item,
                Err(e) => {
                    results.failed.push(FailedItem {
                        index,
                        code: e.code().to_string(),
                        error: e.to_string(),
                    });
                    halted = !options.continue_on_error;
                    continue;
                }
            };

            if options.dry_run {
                results.successful.push(SuccessfulItem {
                    index,
                    event_id: None,
                    event_type: item.event_type,
                    status: EventStatus::Validated,
                });
                continue;
            }

            let event_type = item.event_type.clone();
            match self.record(org_id, item).await {
                Ok(record) => results.successful.push(SuccessfulItem {
                    index,
                    event_id: Some(record.event_id),
                    event_type,
                    status: record.status,
                }),
                Err(Error::DuplicateEvent {
                    event_key,
                    existing_event_id,
                }) => results.duplicates.push(DuplicateItem {
                    index,
                    event_key,
                    existing_event_id,
                }),
                Err(e) => {
                    tracing::warn!(org_id, index, error = %e, "import item failed");
                    results.failed.push(FailedItem {
                        index,
                        code: e.code().to_string(),
                        error: e.to_string(),
                    });
                    halted = !options.continue_on_error;
                }
            }
        }

        let summary = ImportSummary {
            total: results.successful.len() + results.failed.len() + results.duplicates.len(),
            successful: results.successful.len(),
            failed: results.failed.len(),
            duplicates: results.duplicates.len(),
        };
        record_metrics(&summary, options.dry_run);
        tracing::info!(
            org_id,
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            duplicates = summary.duplicates,
            dry_run = options.dry_run,
            "import finished"
        );

        Ok(ImportReport {
            success: summary.failed == 0,
            dry_run: options.dry_run,
            summary,
            results,
            parse_errors: Vec::new(),
        })
    }

    async fn record(&self, org_id: &str, item: ValidItem) -> Result<EventAuditRecord> {
        let mut new = NewEventAudit::new(org_id, item.source, item.event_type, item.payload)
            .id_prefix("imp");
        if let Some(source_id) = item.source_id {
            new = new.source_id(source_id);
        }
        if let Some(at) = item.received_at {
            new = new.received_at(at);
        }
        self.audit.record_event_audit(new).await
    }
}

fn validate_item(candidate: Value) -> Result<ValidItem> {
    let Value::Object(mut object) = candidate else {
        return Err(Error::Validation("event must be an object".into()));
    };

    let event_type = match object.remove("eventType") {
        Some(Value::String(t)) if !t.trim().is_empty() => t.trim().to_string(),
        _ => return Err(Error::Validation("eventType is required".into())),
    };
    let payload = match object.remove("payload") {
        Some(payload @ Value::Object(_)) => payload,
        Some(Value::Null) | None => return Err(Error::Validation("payload is required".into())),
        Some(_) => return Err(Error::Validation("payload must be an object".into())),
    };
    let source = match object.remove("source") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        None | Some(Value::Null) => sources::BULK_IMPORT.to_string(),
        Some(_) => return Err(Error::Validation("source must be a non-empty string".into())),
    };
    let source_id = match object.remove("sourceId") {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    let received_at = match object.remove("receivedAt").or_else(|| object.remove("timestamp")) {
        Some(Value::String(s)) => Some(
            DateTime::parse_from_rfc3339(&s)
                .map(|at| at.with_timezone(&Utc))
                .map_err(|e| Error::Validation(format!("receivedAt is not RFC 3339: {e}")))?,
        ),
        None | Some(Value::Null) => None,
        Some(_) => return Err(Error::Validation("receivedAt must be a string".into())),
    };

    Ok(ValidItem {
        event_type,
        payload,
        source,
        source_id,
        received_at,
    })
}

fn record_metrics(summary: &ImportSummary, dry_run: bool) {
    let counter = metrics::import_items();
    for (outcome, count) in [
        ("successful", summary.successful),
        ("failed", summary.failed),
        ("duplicate", summary.duplicates),
    ] {
        if count > 0 {
            counter.add(
                count as u64,
                &[
                    KeyValue::new("outcome", outcome),
                    KeyValue::new("dry_run", dry_run),
                ],
            );
        }
    }
}
