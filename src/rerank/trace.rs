//! Partition trace capture for rerank runs.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{mpsc, Mutex, MutexGuard};
use std::thread;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

/// Side of the pivot a candidate was placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Left,
    Right,
}

/// One partition decision: a candidate compared against the current pivot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionTrace {
    pub timestamp_ms: i64,
    pub comparison_index: usize,
    pub axiom: String,
    pub pivot_id: String,
    pub candidate_id: String,
    pub pivot_rank: usize,
    pub candidate_rank: usize,
    pub preference: f64,
    pub placement: Placement,
    /// The axiom had no opinion and the original ranks decided.
    pub tie_broken: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("trace file error: {0}")]
    Io(#[from] io::Error),
    #[error("cannot encode trace event: {0}")]
    Encode(#[from] serde_json::Error),
    /// The receiving side of the sink is gone.
    #[error("trace sink closed")]
    Closed,
    #[error("trace writer thread panicked")]
    WriterPanicked,
}

/// Destination for partition decisions.
pub trait TraceSink: Send + Sync {
    fn record(&self, event: PartitionTrace) -> Result<(), TraceError>;
}

/// Keeps every event in memory; handy in tests.
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
    events: Mutex<Vec<PartitionTrace>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PartitionTrace> {
        self.buffer().clone()
    }

    // A panicking recorder cannot leave a half-pushed event behind.
    fn buffer(&self) -> MutexGuard<'_, Vec<PartitionTrace>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TraceSink for MemoryTraceSink {
    fn record(&self, event: PartitionTrace) -> Result<(), TraceError> {
        self.buffer().push(event);
        Ok(())
    }
}

/// Streams events as JSON lines to a file.
///
/// Encoding and I/O happen on a dedicated writer thread. Drop the sink, then
/// call [`TraceWorker::join`] to flush the file.
pub struct JsonlTraceSink {
    events: mpsc::Sender<PartitionTrace>,
}

/// Handle on the writer thread of a [`JsonlTraceSink`].
pub struct TraceWorker {
    writer: thread::JoinHandle<Result<usize, TraceError>>,
}

impl TraceWorker {
    /// Wait for the writer to drain its queue; returns the number of lines written.
    pub fn join(self) -> Result<usize, TraceError> {
        self.writer.join().map_err(|_| TraceError::WriterPanicked)?
    }
}

impl JsonlTraceSink {
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, TraceWorker), TraceError> {
        let file = File::create(path)?;
        let (events, queue) = mpsc::channel();
        let writer = thread::Builder::new()
            .name("trace-writer".to_string())
            .spawn(move || drain_to_jsonl(file, queue))?;
        Ok((Self { events }, TraceWorker { writer }))
    }
}

impl TraceSink for JsonlTraceSink {
    fn record(&self, event: PartitionTrace) -> Result<(), TraceError> {
        self.events.send(event).map_err(|_| TraceError::Closed)
    }
}

fn drain_to_jsonl(file: File, queue: mpsc::Receiver<PartitionTrace>) -> Result<usize, TraceError> {
    let mut out = BufWriter::new(file);
    let mut lines = 0;
    for event in queue {
        serde_json::to_writer(&mut out, &event)?;
        out.write_all(b"\n")?;
        lines += 1;
    }
    out.flush()?;
    Ok(lines)
}

pub(crate) fn now_epoch_ms() -> i64 {
    UNIX_EPOCH
        .elapsed()
        .map(|since| since.as_millis() as i64)
        .unwrap_or(0)
}
