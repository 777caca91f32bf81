//! Streaming CSV export of filtered event records.
//!
//! [`EventExport`] pages through the store with a keyset cursor, so it never
//! holds more than one chunk and can resume after the last row it emitted.
//! [`ExportStream`] drives it from a producer task through a capacity-1
//! channel: the producer waits while the consumer is not reading, and stops
//! when the stream is dropped, cancelled or past its deadline.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::{Error, Result};
use crate::model::{EventAuditRecord, EventFilters, ExportCursor};
use crate::store::EventStore;

/// Rows fetched and serialized per chunk.
pub const EXPORT_CHUNK_ROWS: u64 = 500;

pub const CSV_HEADER: [&str; 17] = [
    "eventId",
    "orgId",
    "source",
    "sourceId",
    "eventType",
    "eventKey",
    "status",
    "receivedAt",
    "payloadHash",
    "payloadSize",
    "skipCategory",
    "skipReason",
    "integrationsMatched",
    "deliveredCount",
    "failedCount",
    "processingTimeMs",
    "payloadSummary",
];

/// One serialized slice of the export.
#[derive(Debug, Clone)]
pub struct ExportChunk {
    pub bytes: Vec<u8>,
    pub rows: usize,
}

/// Lazy, restartable row sequence over a filtered event set.
pub struct EventExport {
    events: Arc<dyn EventStore>,
    org_id: String,
    filters: EventFilters,
    cursor: Option<ExportCursor>,
    chunk_rows: u64,
    header_written: bool,
    exhausted: bool,
}

impl EventExport {
    pub fn new(events: Arc<dyn EventStore>, org_id: impl Into<String>, filters: EventFilters) -> Self {
        Self {
            events,
            org_id: org_id.into(),
            filters,
            cursor: None,
            chunk_rows: EXPORT_CHUNK_ROWS,
            header_written: false,
            exhausted: false,
        }
    }

    pub fn chunk_rows(mut self, rows: u64) -> Self {
        self.chunk_rows = rows.max(1);
        self
    }

    /// Continue after `cursor`. The header is not repeated.
    pub fn resume(mut self, cursor: ExportCursor) -> Self {
        self.cursor = Some(cursor);
        self.header_written = true;
        self
    }

    /// Position of the last row emitted.
    pub fn cursor(&self) -> Option<&ExportCursor> {
        self.cursor.as_ref()
    }

    /// Next chunk of CSV, or `None` once the result set is exhausted.
    pub async fn next_chunk(&mut self) -> Result<Option<ExportChunk>> {
        if self.exhausted {
            return Ok(None);
        }

        let rows = self
            .events
            .scan_events(&self.org_id, &self.filters, self.cursor.as_ref(), self.chunk_rows)
            .await?;

        if (rows.len() as u64) < self.chunk_rows {
            self.exhausted = true;
        }
        if rows.is_empty() && self.header_written {
            return Ok(None);
        }

        let mut writer = csv::Writer::from_writer(Vec::new());
        if !self.header_written {
            writer.write_record(CSV_HEADER)?;
            self.header_written = true;
        }
        for record in &rows {
            writer.write_record(csv_row(record))?;
        }
        let bytes = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;

        if let Some(last) = rows.last() {
            self.cursor = Some(ExportCursor::of(last));
        }
        Ok(Some(ExportChunk {
            bytes,
            rows: rows.len(),
        }))
    }
}

fn csv_row(record: &EventAuditRecord) -> [String; 17] {
    let opt = |v: Option<&str>| v.unwrap_or_default().to_string();
    [
        record.event_id.to_string(),
        record.org_id.clone(),
        record.source.clone(),
        opt(record.source_id.as_deref()),
        record.event_type.clone(),
        record.event_key.clone(),
        record.status.to_string(),
        record.received_at.to_rfc3339(),
        record.payload_hash.clone(),
        record.payload_size.to_string(),
        opt(record.skip_category.map(|c| c.as_str())),
        opt(record.skip_reason.as_deref()),
        record.delivery_status.integrations_matched.to_string(),
        record.delivery_status.delivered_count.to_string(),
        record.delivery_status.failed_count.to_string(),
        record
            .processing_time_ms
            .map(|ms| ms.to_string())
            .unwrap_or_default(),
        record.payload_summary.to_string(),
    ]
}

/// Counters shared between an export's producer and observers.
#[derive(Debug, Clone, Default)]
pub struct ExportProgress {
    inner: Arc<ProgressInner>,
}

#[derive(Debug, Default)]
struct ProgressInner {
    chunks: AtomicU64,
    rows: AtomicU64,
    finished: CancellationToken,
}

impl ExportProgress {
    /// Chunks fetched from the store so far.
    pub fn chunks_produced(&self) -> u64 {
        self.inner.chunks.load(Ordering::SeqCst)
    }

    pub fn rows_produced(&self) -> u64 {
        self.inner.rows.load(Ordering::SeqCst)
    }

    /// Has the producer task exited?
    pub fn is_finished(&self) -> bool {
        self.inner.finished.is_cancelled()
    }

    /// Wait until the producer task has exited.
    pub async fn wait_finished(&self) {
        self.inner.finished.cancelled().await
    }

    fn record_chunk(&self, rows: usize) {
        self.inner.chunks.fetch_add(1, Ordering::SeqCst);
        self.inner.rows.fetch_add(rows as u64, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.inner.finished.cancel();
    }
}

/// CSV byte chunks from a running export.
///
/// Dropping the stream cancels production.
pub struct ExportStream {
    rx: mpsc::Receiver<Result<Vec<u8>>>,
    cancel: CancellationToken,
    progress: ExportProgress,
    _guard: DropGuard,
}

impl ExportStream {
    /// Spawn the producer. With a deadline, the stream yields
    /// `Error::Timeout` and ends once it elapses.
    pub fn spawn(export: EventExport, deadline: Option<Duration>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let progress = ExportProgress::default();

        tokio::spawn(produce(
            export,
            tx,
            cancel.clone(),
            progress.clone(),
            deadline,
        ));

        Self {
            rx,
            _guard: cancel.clone().drop_guard(),
            cancel,
            progress,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn progress(&self) -> ExportProgress {
        self.progress.clone()
    }
}

impl Stream for ExportStream {
    type Item = Result<Vec<u8>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn produce(
    mut export: EventExport,
    tx: mpsc::Sender<Result<Vec<u8>>>,
    cancel: CancellationToken,
    progress: ExportProgress,
    deadline: Option<Duration>,
) {
    let deadline_at = deadline.map(|d| Instant::now() + d);
    let timeout = || Error::Timeout {
        operation: "export".to_string(),
        timeout_ms: deadline.map(|d| d.as_millis() as u64).unwrap_or_default(),
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = deadline_elapsed(deadline_at) => {
                send_final(&tx, &cancel, Err(timeout())).await;
                break;
            }
            next = export.next_chunk() => next,
        };

        let chunk = match next {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "export aborted");
                send_final(&tx, &cancel, Err(e)).await;
                break;
            }
        };
        progress.record_chunk(chunk.rows);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = deadline_elapsed(deadline_at) => {
                send_final(&tx, &cancel, Err(timeout())).await;
                break;
            }
            sent = tx.send(Ok(chunk.bytes)) => {
                if sent.is_err() {
                    // Consumer went away.
                    break;
                }
            }
        }
    }

    tracing::debug!(
        chunks = progress.chunks_produced(),
        rows = progress.rows_produced(),
        "export producer finished"
    );
    progress.finish();
}

async fn send_final(
    tx: &mpsc::Sender<Result<Vec<u8>>>,
    cancel: &CancellationToken,
    item: Result<Vec<u8>>,
) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tx.send(item) => {}
    }
}
