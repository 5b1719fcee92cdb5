use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

/// Indexing stage for a docset run.
#[derive(Debug, Clone, Copy)]
pub enum Stage {
    Discover,
    Embed,
    Finalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Discover => write!(f, "discover"),
            Stage::Embed => write!(f, "embed"),
            Stage::Finalize => write!(f, "finalize"),
        }
    }
}

/// Batch progress within one document's embedding run.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    pub document_name: String,
    pub batch_index: usize,
    pub batch_count: usize,
    pub chunks_in_batch: usize,
    pub total_chunks: usize,
}

/// Progress counters for one indexing run.
#[derive(Clone)]
pub struct ProgressState {
    pub docset: String,
    pub stage: Stage,
    pub total_docs: i64,
    pub done_docs: i64,
    pub success_docs: i64,
    pub failed_docs: i64,
    pub chunks_done: i64,
    pub last_doc: Option<String>,
    pub started: Instant,
}

impl ProgressState {
    pub fn new(docset: String, total_docs: i64) -> Self {
        Self {
            docset,
            stage: Stage::Discover,
            total_docs,
            done_docs: 0,
            success_docs: 0,
            failed_docs: 0,
            chunks_done: 0,
            last_doc: None,
            started: Instant::now(),
        }
    }

    pub fn docs_per_sec(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 && self.done_docs > 0 {
            self.done_docs as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn eta_seconds(&self) -> u64 {
        let dps = self.docs_per_sec();
        if dps > 0.0 {
            let remaining = self.total_docs - self.done_docs;
            (remaining as f64 / dps) as u64
        } else {
            0
        }
    }

    pub fn percent(&self) -> i64 {
        if self.total_docs > 0 {
            (self.done_docs * 100) / self.total_docs
        } else {
            0
        }
    }
}

/// Appends machine-readable progress lines to a file so long indexing runs
/// can be watched with `tail -f`.
#[derive(Clone)]
pub struct ProgressLogger {
    writer: Arc<Mutex<BufWriter<File>>>,
}

impl ProgressLogger {
    /// Progress failures are plain I/O faults, not engine errors; callers
    /// log them and carry on.
    pub fn new(log_dir: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let log_path = format!("{log_dir}/index_progress.log");

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }

    /// Emit a progress event.
    /// Event types: progress | stage | done | error | batch
    pub async fn emit(
        &self,
        state: &ProgressState,
        event: &str,
        note: Option<&str>,
    ) -> std::io::Result<()> {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        let last_doc = state.last_doc.as_deref().unwrap_or("");
        let note_str = note.unwrap_or("");

        // URL-encode fields that may have spaces
        let last_doc_encoded = urlencoding::encode(last_doc);
        let note_encoded = urlencoding::encode(note_str);

        let line = format!(
            "ts={} docset={} event={} stage={} done={} total={} success={} failed={} chunks={} pct={} dps={:.2} eta_s={} last_doc={} note={}\n",
            ts,
            state.docset,
            event,
            state.stage,
            state.done_docs,
            state.total_docs,
            state.success_docs,
            state.failed_docs,
            state.chunks_done,
            state.percent(),
            state.docs_per_sec(),
            state.eta_seconds(),
            last_doc_encoded,
            note_encoded,
        );

        let mut guard = self.writer.lock().await;
        guard.write_all(line.as_bytes())?;
        guard.flush()?;

        Ok(())
    }

    /// Emit a batch event for incremental updates while embedding one
    /// document's chunks.
    pub async fn emit_batch(
        &self,
        state: &ProgressState,
        batch: &BatchProgress,
    ) -> std::io::Result<()> {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        let doc_encoded = urlencoding::encode(&batch.document_name);
        let batch_pct = if batch.batch_count > 0 {
            (batch.batch_index * 100) / batch.batch_count
        } else {
            0
        };

        let line = format!(
            "ts={} docset={} event=batch stage=embed done={} total={} success={} failed={} chunks={} pct={} last_doc={} current_batch={} total_batches={} batch_pct={} chunks_in_batch={} total_chunks={}\n",
            ts,
            state.docset,
            state.done_docs,
            state.total_docs,
            state.success_docs,
            state.failed_docs,
            state.chunks_done,
            state.percent(),
            doc_encoded,
            batch.batch_index,
            batch.batch_count,
            batch_pct,
            batch.chunks_in_batch,
            batch.total_chunks,
        );

        let mut guard = self.writer.lock().await;
        guard.write_all(line.as_bytes())?;
        guard.flush()?;

        Ok(())
    }
}
