use crate::raft::types::{NodeId, Term};
use crate::util::errors::Result;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;

/// The slice of per-peer state that must survive a crash: the current term
/// and the vote cast in it. Everything else is rebuilt by the protocol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistentState {
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
}

/// Durable term/vote storage. Writes must be on stable media before the
/// reply that reflects them is sent.
pub trait StateStorage: Send {
    fn save_term(&mut self, term: Term) -> Result<()>;
    fn save_voted_for(&mut self, peer_id: Option<NodeId>) -> Result<()>;
    fn load_state(&self) -> Result<PersistentState>;
}

/// Volatile variant for tests and demo clusters
#[derive(Default)]
pub struct MemoryStateStorage {
    state: PersistentState,
}

impl MemoryStateStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStorage for MemoryStateStorage {
    fn save_term(&mut self, term: Term) -> Result<()> {
        self.state.current_term = term;
        Ok(())
    }

    fn save_voted_for(&mut self, peer_id: Option<NodeId>) -> Result<()> {
        self.state.voted_for = peer_id;
        Ok(())
    }

    fn load_state(&self) -> Result<PersistentState> {
        Ok(self.state.clone())
    }
}

/// Term/vote state as one bincode file, fsynced on every save
pub struct FileStateStorage {
    data_dir: PathBuf,
    state: PersistentState,
}

impl FileStateStorage {
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir)?;

        let mut storage = Self {
            data_dir,
            state: PersistentState::default(),
        };
        storage.state = storage.load_from_disk()?;

        Ok(storage)
    }

    fn state_file_path(&self) -> PathBuf {
        self.data_dir.join("state.bin")
    }

    fn load_from_disk(&self) -> Result<PersistentState> {
        let state_path = self.state_file_path();
        if !state_path.exists() {
            return Ok(PersistentState::default());
        }

        let mut file = File::open(&state_path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        if buffer.is_empty() {
            return Ok(PersistentState::default());
        }

        let state: PersistentState = bincode::deserialize(&buffer)?;
        tracing::info!(
            "Loaded persistent state: term={}, voted_for={:?}",
            state.current_term,
            state.voted_for
        );

        Ok(state)
    }

    fn save_to_disk(&self) -> Result<()> {
        let encoded = bincode::serialize(&self.state)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.state_file_path())?;
        file.write_all(&encoded)?;
        file.sync_all()?;

        Ok(())
    }
}

impl StateStorage for FileStateStorage {
    fn save_term(&mut self, term: Term) -> Result<()> {
        self.state.current_term = term;
        self.save_to_disk()
    }

    fn save_voted_for(&mut self, peer_id: Option<NodeId>) -> Result<()> {
        self.state.voted_for = peer_id;
        self.save_to_disk()
    }

    fn load_state(&self) -> Result<PersistentState> {
        Ok(self.state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_and_load() {
        let mut storage = MemoryStateStorage::new();

        storage.save_term(5).unwrap();
        storage.save_voted_for(Some("node-1".to_string())).unwrap();

        let state = storage.load_state().unwrap();
        assert_eq!(state.current_term, 5);
        assert_eq!(state.voted_for, Some("node-1".to_string()));
    }

    #[test]
    fn file_storage_survives_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().to_path_buf();

        {
            let mut storage = FileStateStorage::new(path.clone()).unwrap();
            storage.save_term(10).unwrap();
            storage.save_voted_for(Some("node-2".to_string())).unwrap();
        }

        let storage = FileStateStorage::new(path).unwrap();
        let state = storage.load_state().unwrap();
        assert_eq!(state.current_term, 10);
        assert_eq!(state.voted_for, Some("node-2".to_string()));
    }

    #[test]
    fn clearing_vote_persists() {
        let temp_dir = TempDir::new().unwrap();
        let mut storage = FileStateStorage::new(temp_dir.path().to_path_buf()).unwrap();

        storage.save_voted_for(Some("node-1".to_string())).unwrap();
        storage.save_voted_for(None).unwrap();

        assert_eq!(storage.load_state().unwrap().voted_for, None);
    }
}
