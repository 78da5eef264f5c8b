pub mod cli;
pub mod commands;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod storage;

pub use config::StorageConfig;
pub use infrastructure::StorageError;
pub use models::{ReviewRecord, SentimentCategory};
pub use storage::{StorageBackend, StorageManager};
