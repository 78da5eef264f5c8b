pub mod error;
pub mod logging;
pub mod retry;

pub use error::{ErrorCategory, StorageError};
pub use logging::{setup_logging, LogFormat, LoggingConfig};
pub use retry::{AttemptOutcome, RetryExecutor, RetryPolicy, RetryRecord, RetryStatistics};
