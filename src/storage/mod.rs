mod log_storage;
mod state_storage;

pub use log_storage::{FileLogStorage, LogStorage, MemoryLogStorage};
pub use state_storage::{FileStateStorage, MemoryStateStorage, PersistentState, StateStorage};
