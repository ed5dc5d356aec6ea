mod config;

pub use config::RaftConfig;
