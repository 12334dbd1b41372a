//! Raw per-operation event log.
//!
//! One row per completed operation, buffered on a dedicated writer thread
//! and flushed as length-prefixed bincode frames compressed with zstd,
//! the same chunk format the rest of the tooling uses for stored data.
//! An existing file at the target path is overwritten; when a directory
//! is supplied the log lands at `<dir>/rawlog.bin`.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::metrics::OpKind;

use super::{Collector, OpEvent, OpOutcome};

/// Default file name when the target is a directory.
const DEFAULT_FILE_NAME: &str = "rawlog.bin";

/// Rows buffered before a chunk is compressed and written out.
const CHUNK_ROWS: usize = 8_192;

/// zstd compression level, matching the storage chunk writer.
const COMPRESSION_LEVEL: i32 = 3;

/// One completed operation in the raw log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub start_nanos: u64,
    pub end_nanos: u64,
    pub latency_nanos: u64,
    pub kind: OpKind,
    pub success: bool,
    pub error_class: Option<String>,
    pub partition_key: String,
}

/// Error type for raw log failures.
#[derive(Debug)]
pub enum RawLogError {
    Io(std::io::Error),
    Encode(String),
}

impl std::fmt::Display for RawLogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawLogError::Io(e) => write!(f, "I/O error: {}", e),
            RawLogError::Encode(msg) => write!(f, "encode error: {}", msg),
        }
    }
}

impl std::error::Error for RawLogError {}

impl From<std::io::Error> for RawLogError {
    fn from(e: std::io::Error) -> Self {
        RawLogError::Io(e)
    }
}

fn resolve_target(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(DEFAULT_FILE_NAME)
    } else {
        path.to_path_buf()
    }
}

fn write_chunk(out: &mut BufWriter<File>, rows: &[RawEvent]) -> Result<(), RawLogError> {
    let raw = bincode::serialize(rows).map_err(|e| RawLogError::Encode(e.to_string()))?;
    let compressed = zstd::encode_all(&raw[..], COMPRESSION_LEVEL)?;
    out.write_all(&(compressed.len() as u32).to_le_bytes())?;
    out.write_all(&compressed)?;
    Ok(())
}

fn writer_loop(receiver: Receiver<RawEvent>, file: File) {
    let mut out = BufWriter::new(file);
    let mut buffer: Vec<RawEvent> = Vec::with_capacity(CHUNK_ROWS);

    for event in receiver.iter() {
        buffer.push(event);
        if buffer.len() >= CHUNK_ROWS {
            if let Err(e) = write_chunk(&mut out, &buffer) {
                tracing::error!("raw log chunk write failed: {}", e);
            }
            buffer.clear();
        }
    }

    if !buffer.is_empty()
        && let Err(e) = write_chunk(&mut out, &buffer)
    {
        tracing::error!("raw log final chunk write failed: {}", e);
    }
    if let Err(e) = out.flush() {
        tracing::error!("raw log flush failed: {}", e);
    }
}

/// Collector writing every completed operation to the raw log.
///
/// The completion path only enqueues; serialization, compression and file
/// I/O happen on the writer thread.
pub struct RawLogCollector {
    sender: Mutex<Option<Sender<RawEvent>>>,
    writer: Mutex<Option<thread::JoinHandle<()>>>,
    path: PathBuf,
}

impl RawLogCollector {
    /// Opens (and truncates) the target file and starts the writer thread.
    pub fn create(target: &Path) -> Result<Self, RawLogError> {
        let path = resolve_target(target);
        let file = File::create(&path)?;
        let (sender, receiver) = unbounded();
        let writer = thread::spawn(move || writer_loop(receiver, file));
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            writer: Mutex::new(Some(writer)),
            path,
        })
    }

    /// Final path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Collector for RawLogCollector {
    fn collect(&self, event: &OpEvent) {
        let (success, error_class) = match event.outcome {
            OpOutcome::Success => (true, None),
            OpOutcome::Failure { class } => (false, Some(class.clone())),
        };
        let row = RawEvent {
            start_nanos: event.start_nanos,
            end_nanos: event.end_nanos,
            latency_nanos: event.latency_nanos(),
            kind: event.kind,
            success,
            error_class,
            partition_key: event.partition_key.to_string(),
        };
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(row);
        }
    }

    fn flush(&self) {
        self.sender.lock().take();
        if let Some(writer) = self.writer.lock().take() {
            let _ = writer.join();
        }
    }
}

impl Drop for RawLogCollector {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Reads a complete raw log back into memory.
///
/// Intended for tooling and tests, not for the hot path.
pub fn read_raw_log(path: &Path) -> Result<Vec<RawEvent>, RawLogError> {
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;

    let mut rows = Vec::new();
    let mut offset = 0usize;
    while offset + 4 <= data.len() {
        let len = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        offset += 4;
        if offset + len > data.len() {
            return Err(RawLogError::Encode("truncated chunk".to_string()));
        }
        let raw = zstd::decode_all(&data[offset..offset + len])?;
        let mut chunk: Vec<RawEvent> =
            bincode::deserialize(&raw).map_err(|e| RawLogError::Encode(e.to_string()))?;
        rows.append(&mut chunk);
        offset += len;
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(outcome: &OpOutcome) -> OpEvent<'_> {
        OpEvent {
            kind: OpKind::Select,
            partition_key: "key42",
            worker: 0,
            start_nanos: 100,
            end_nanos: 350,
            outcome,
        }
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.bin");

        let collector = RawLogCollector::create(&path).unwrap();
        collector.collect(&sample_event(&OpOutcome::Success));
        let failure = OpOutcome::Failure {
            class: "ReadTimeout".to_string(),
        };
        collector.collect(&sample_event(&failure));
        collector.flush();

        let rows = read_raw_log(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].partition_key, "key42");
        assert_eq!(rows[0].latency_nanos, 250);
        assert!(rows[0].success);
        assert_eq!(rows[1].error_class.as_deref(), Some("ReadTimeout"));
    }

    #[test]
    fn test_directory_target_appends_default_name() {
        let dir = tempfile::tempdir().unwrap();
        let collector = RawLogCollector::create(dir.path()).unwrap();
        assert_eq!(
            collector.path().file_name().unwrap().to_str().unwrap(),
            DEFAULT_FILE_NAME
        );
        collector.flush();
    }

    #[test]
    fn test_existing_file_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.bin");
        std::fs::write(&path, b"stale contents").unwrap();

        let collector = RawLogCollector::create(&path).unwrap();
        collector.collect(&sample_event(&OpOutcome::Success));
        collector.flush();

        let rows = read_raw_log(&path).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_many_rows_span_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.bin");

        let collector = RawLogCollector::create(&path).unwrap();
        for _ in 0..(CHUNK_ROWS + 100) {
            collector.collect(&sample_event(&OpOutcome::Success));
        }
        collector.flush();

        let rows = read_raw_log(&path).unwrap();
        assert_eq!(rows.len(), CHUNK_ROWS + 100);
    }
}
