use crate::raft::types::{LogEntry, LogIndex, Term};
use crate::util::errors::{RaftError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;

/// Persistent append-only log. Indices are 1-based and dense; index 0 is the
/// empty-prefix sentinel with term 0.
pub trait LogStorage: Send {
    /// Append entries at the tail. Entry indices must continue the log
    /// without gaps.
    fn append(&mut self, entries: Vec<LogEntry>) -> Result<()>;
    fn get(&self, index: LogIndex) -> Result<Option<LogEntry>>;
    /// Entries in `[start, end]`, both 1-based and inclusive
    fn get_range(&self, start: LogIndex, end: LogIndex) -> Result<Vec<LogEntry>>;
    fn last_index(&self) -> LogIndex;
    fn last_term(&self) -> Term;
    /// Term of the entry at `index`; 0 for the sentinel index 0, None past
    /// the tail
    fn term_of(&self, index: LogIndex) -> Result<Option<Term>> {
        if index == 0 {
            return Ok(Some(0));
        }
        Ok(self.get(index)?.map(|e| e.term))
    }
    fn has_entry_at(&self, index: LogIndex) -> bool {
        index >= 1 && index <= self.last_index()
    }
    /// Drop the entry at `from_index` and everything after it
    fn truncate(&mut self, from_index: LogIndex) -> Result<()>;
}

/// Volatile log kept in a Vec; the default for demo clusters and tests
#[derive(Default)]
pub struct MemoryLogStorage {
    entries: Vec<LogEntry>,
}

impl MemoryLogStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_dense(&self, entry: &LogEntry) -> Result<()> {
        let expected = self.entries.last().map(|e| e.index).unwrap_or(0) + 1;
        if entry.index != expected {
            return Err(RaftError::LogInconsistency);
        }
        Ok(())
    }
}

impl LogStorage for MemoryLogStorage {
    fn append(&mut self, entries: Vec<LogEntry>) -> Result<()> {
        for entry in entries {
            self.check_dense(&entry)?;
            self.entries.push(entry);
        }
        Ok(())
    }

    fn get(&self, index: LogIndex) -> Result<Option<LogEntry>> {
        if index == 0 {
            return Ok(None);
        }
        Ok(self.entries.get((index - 1) as usize).cloned())
    }

    fn get_range(&self, start: LogIndex, end: LogIndex) -> Result<Vec<LogEntry>> {
        if start == 0 || start > end || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let start_idx = (start - 1) as usize;
        if start_idx >= self.entries.len() {
            return Ok(Vec::new());
        }
        let end_idx = std::cmp::min(end as usize, self.entries.len());

        Ok(self.entries[start_idx..end_idx].to_vec())
    }

    fn last_index(&self) -> LogIndex {
        self.entries.last().map(|e| e.index).unwrap_or(0)
    }

    fn last_term(&self) -> Term {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    fn truncate(&mut self, from_index: LogIndex) -> Result<()> {
        if from_index == 0 {
            return Ok(());
        }
        let keep = (from_index - 1) as usize;
        if keep < self.entries.len() {
            self.entries.truncate(keep);
        }
        Ok(())
    }
}

/// Log persisted as one bincode file, rewritten and fsynced on every
/// mutation. The fsync must complete before any reply that acknowledges the
/// mutation goes out.
pub struct FileLogStorage {
    data_dir: PathBuf,
    mem: MemoryLogStorage,
}

impl FileLogStorage {
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir)?;

        let mut storage = Self {
            data_dir,
            mem: MemoryLogStorage::new(),
        };
        storage.load_from_disk()?;

        Ok(storage)
    }

    fn log_file_path(&self) -> PathBuf {
        self.data_dir.join("log.bin")
    }

    fn load_from_disk(&mut self) -> Result<()> {
        let log_path = self.log_file_path();
        if !log_path.exists() {
            return Ok(());
        }

        let mut file = File::open(&log_path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        if buffer.is_empty() {
            return Ok(());
        }

        let entries: Vec<LogEntry> = bincode::deserialize(&buffer)?;
        tracing::info!("Loaded {} log entries from disk", entries.len());
        self.mem.entries = entries;

        Ok(())
    }

    fn save_to_disk(&self) -> Result<()> {
        let encoded = bincode::serialize(&self.mem.entries)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.log_file_path())?;
        file.write_all(&encoded)?;
        file.sync_all()?;

        Ok(())
    }
}

impl LogStorage for FileLogStorage {
    fn append(&mut self, entries: Vec<LogEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.mem.append(entries)?;
        self.save_to_disk()
    }

    fn get(&self, index: LogIndex) -> Result<Option<LogEntry>> {
        self.mem.get(index)
    }

    fn get_range(&self, start: LogIndex, end: LogIndex) -> Result<Vec<LogEntry>> {
        self.mem.get_range(start, end)
    }

    fn last_index(&self) -> LogIndex {
        self.mem.last_index()
    }

    fn last_term(&self) -> Term {
        self.mem.last_term()
    }

    fn truncate(&mut self, from_index: LogIndex) -> Result<()> {
        let before = self.mem.last_index();
        self.mem.truncate(from_index)?;
        if self.mem.last_index() != before {
            self.save_to_disk()?;
        }
        Ok(())
    }
}
