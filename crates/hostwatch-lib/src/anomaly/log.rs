//! Append-only anomaly log
//!
//! Every anomaly event is written as one JSON object per line. A record is
//! written with a single `write_all` and synced before it counts as durable;
//! if the write fails the file is cut back to its previous length, and a
//! partial trailing line left by a crash is dropped when the log is reopened.
//!
//! Events that could not be written stay queued in memory and are retried on
//! the next cycle, so a full disk never stops monitoring.

use super::detector::AnomalyEvent;
use crate::config::AnomalyLogConfig;
use crate::error::PersistenceError;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

struct LogFile {
    path: PathBuf,
    file: File,
}

impl LogFile {
    /// Open (or create) the log, dropping any partial trailing record
    ///
    /// Returns the last `keep` complete records, read backwards from the end
    /// so a long-lived log is never loaded whole.
    fn open(path: &Path, keep: usize) -> Result<(Self, Vec<u8>), PersistenceError> {
        let open_error = |source| PersistenceError::Open {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(open_error)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(open_error)?;

        let len = file.metadata().map_err(open_error)?.len();
        // One extra newline marks where the oldest kept record begins
        let (tail_start, mut tail) = read_tail(&mut file, len, keep + 1).map_err(open_error)?;

        let complete = tail
            .iter()
            .rposition(|byte| *byte == b'\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        if complete < tail.len() {
            warn!(
                path = %path.display(),
                discarded_bytes = tail.len() - complete,
                "Dropping partial trailing record from anomaly log"
            );
            file.set_len(tail_start + complete as u64).map_err(open_error)?;
            tail.truncate(complete);
        }

        if tail_start > 0 {
            // The first chunk starts part-way through a record
            let first = tail
                .iter()
                .position(|byte| *byte == b'\n')
                .map(|i| i + 1)
                .unwrap_or(tail.len());
            tail.drain(..first);
        }

        Ok((
            Self {
                path: path.to_path_buf(),
                file,
            },
            tail,
        ))
    }

    /// Append one encoded record, rolling back on failure
    fn append(&mut self, line: &[u8]) -> Result<(), PersistenceError> {
        let start = match self.file.metadata() {
            Ok(metadata) => metadata.len(),
            Err(source) => {
                return Err(PersistenceError::Write {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let written = self
            .file
            .write_all(line)
            .and_then(|_| self.file.sync_data());

        if let Err(source) = written {
            if let Err(e) = self.file.set_len(start) {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to roll back partial anomaly record"
                );
            }
            return Err(PersistenceError::Write {
                path: self.path.clone(),
                source,
            });
        }

        Ok(())
    }
}

const TAIL_CHUNK: u64 = 8 * 1024;

/// Read chunks backwards from `len` until `newlines` line ends are buffered
/// or the start of the file is reached
///
/// Returns the offset the buffer starts at along with the buffer.
fn read_tail(file: &mut File, len: u64, newlines: usize) -> io::Result<(u64, Vec<u8>)> {
    let mut start = len;
    let mut tail = Vec::new();
    let mut seen = 0;

    while start > 0 && seen < newlines {
        let size = TAIL_CHUNK.min(start);
        start -= size;

        let mut chunk = vec![0; size as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut chunk)?;

        seen += chunk.iter().filter(|byte| **byte == b'\n').count();
        chunk.extend_from_slice(&tail);
        tail = chunk;
    }

    Ok((start, tail))
}

/// Statistics about the anomaly log
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyLogStats {
    pub recent: usize,
    pub pending: usize,
    /// Unwritten events discarded because the pending queue was full
    pub dropped: u64,
    pub path: Option<PathBuf>,
}

/// Durable, ordered record of anomaly events
pub struct AnomalyLog {
    file: Option<LogFile>,
    recent: VecDeque<AnomalyEvent>,
    pending: VecDeque<AnomalyEvent>,
    retention: usize,
    max_pending: usize,
    write_attempts: u32,
    dropped: u64,
}

impl AnomalyLog {
    /// Open the configured log file, or keep events in memory when no path is set
    ///
    /// The most recent `retention` records already in the file are loaded so
    /// `recent` queries survive a restart; older records are never read.
    pub fn open(config: &AnomalyLogConfig) -> Result<Self, PersistenceError> {
        let mut log = Self::in_memory(config.retention);
        log.max_pending = config.max_pending;
        log.write_attempts = config.write_attempts.max(1);

        let Some(path) = config.path.as_deref() else {
            return Ok(log);
        };

        let (file, contents) = LogFile::open(path, log.retention)?;
        let mut skipped = 0usize;
        for line in contents.split(|byte| *byte == b'\n').filter(|l| !l.is_empty()) {
            match serde_json::from_slice::<AnomalyEvent>(line) {
                Ok(event) => log.remember(event),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(path = %path.display(), skipped, "Skipped unreadable anomaly records");
        }

        info!(
            path = %path.display(),
            loaded = log.recent.len(),
            "Opened anomaly log"
        );
        log.file = Some(file);
        Ok(log)
    }

    /// A log that keeps the last `retention` events in memory only
    pub fn in_memory(retention: usize) -> Self {
        let defaults = AnomalyLogConfig::default();
        Self {
            file: None,
            recent: VecDeque::with_capacity(retention.min(1024)),
            pending: VecDeque::new(),
            retention: retention.max(1),
            max_pending: defaults.max_pending,
            write_attempts: defaults.write_attempts,
            dropped: 0,
        }
    }

    /// Record an event
    ///
    /// The event is immediately visible to [`AnomalyLog::recent`]. An error means
    /// it (and possibly earlier events) is queued for a retry next cycle.
    pub fn record(&mut self, event: AnomalyEvent) -> Result<(), PersistenceError> {
        self.remember(event.clone());

        if self.file.is_none() {
            return Ok(());
        }

        if self.pending.len() >= self.max_pending.max(1) {
            self.pending.pop_front();
            self.dropped += 1;
            warn!(
                max_pending = self.max_pending,
                "Anomaly log pending queue full, dropping oldest unwritten event"
            );
        }
        self.pending.push_back(event);
        self.flush_pending().map(|_| ())
    }

    /// Retry writing queued events, returning how many were written
    pub fn retry_pending(&mut self) -> Result<usize, PersistenceError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let written = self.flush_pending()?;
        debug!(written, "Flushed pending anomaly records");
        Ok(written)
    }

    /// Write queued events in order, stopping at the first one that keeps failing
    fn flush_pending(&mut self) -> Result<usize, PersistenceError> {
        let Some(file) = self.file.as_mut() else {
            self.pending.clear();
            return Ok(0);
        };

        let mut written = 0;
        while let Some(event) = self.pending.front() {
            let mut line = match serde_json::to_vec(event) {
                Ok(line) => line,
                Err(e) => {
                    // Unencodable events can never be written
                    self.pending.pop_front();
                    return Err(e.into());
                }
            };
            line.push(b'\n');

            let mut attempt = 0;
            loop {
                attempt += 1;
                match file.append(&line) {
                    Ok(()) => break,
                    Err(e) if attempt >= self.write_attempts => return Err(e),
                    Err(e) => {
                        debug!(attempt, error = %e, "Anomaly record write failed, retrying");
                    }
                }
            }

            self.pending.pop_front();
            written += 1;
        }

        Ok(written)
    }

    fn remember(&mut self, event: AnomalyEvent) {
        while self.recent.len() >= self.retention {
            self.recent.pop_front();
        }
        self.recent.push_back(event);
    }

    /// The last `k` events, oldest first
    pub fn recent(&self, k: usize) -> Vec<AnomalyEvent> {
        let skip = self.recent.len().saturating_sub(k);
        self.recent.iter().skip(skip).cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path.as_path())
    }

    pub fn stats(&self) -> AnomalyLogStats {
        AnomalyLogStats {
            recent: self.recent.len(),
            pending: self.pending.len(),
            dropped: self.dropped,
            path: self.path().map(Path::to_path_buf),
        }
    }
}
