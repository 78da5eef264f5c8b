use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::ErrorHandlingConfig;
use crate::infrastructure::error::StorageError;

/// 固定延迟重试策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 总尝试次数上限（含第一次）
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub log_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            log_errors: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ErrorHandlingConfig) -> Self {
        let default_delay = Self::default().retry_delay;
        let retry_delay = Duration::try_from_secs_f64(config.retry_delay.max(0.0)).unwrap_or_else(|e| {
            warn!(
                retry_delay = config.retry_delay,
                "invalid retry_delay ({}), using {:?}", e, default_delay
            );
            default_delay
        });

        Self {
            max_retries: config.max_retries,
            retry_delay,
            log_errors: config.log_errors,
        }
    }

    /// max_retries = 0 时仍然执行一次
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// 单次尝试结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Succeeded,
    Failed {
        error: String,
        retryable: bool,
        final_attempt: bool,
    },
}

/// 重试记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryRecord {
    pub id: String,
    pub operation: String,
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub retry_delay: Option<Duration>,
    pub attempted_at: DateTime<Utc>,
}

impl RetryRecord {
    fn new(operation: &str, attempt_number: u32, outcome: AttemptOutcome, retry_delay: Option<Duration>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation: operation.to_string(),
            attempt_number,
            outcome,
            retry_delay,
            attempted_at: Utc::now(),
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Succeeded)
    }
}

/// 重试统计信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryStatistics {
    pub total_operations: u64,
    pub total_attempts: u64,
    pub recovered_operations: u64,
    pub exhausted_operations: u64,
    pub non_retryable_failures: u64,
}

/// 重试执行器：包装每一次远程调用
pub struct RetryExecutor {
    policy: RetryPolicy,
    records: Arc<Mutex<Vec<RetryRecord>>>,
    statistics: Arc<Mutex<RetryStatistics>>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            records: Arc::new(Mutex::new(Vec::new())),
            statistics: Arc::new(Mutex::new(RetryStatistics::default())),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 执行带重试的操作
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match call().await {
                Ok(value) => {
                    self.record(RetryRecord::new(operation, attempt, AttemptOutcome::Succeeded, None));
                    self.update_statistics(|stats| {
                        stats.total_operations += 1;
                        stats.total_attempts += attempt as u64;
                        if attempt > 1 {
                            stats.recovered_operations += 1;
                        }
                    });
                    if attempt > 1 {
                        debug!(operation, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    let final_attempt = !retryable || attempt >= max_attempts;
                    let delay = if final_attempt { None } else { Some(self.policy.retry_delay) };

                    self.record(RetryRecord::new(
                        operation,
                        attempt,
                        AttemptOutcome::Failed {
                            error: e.to_string(),
                            retryable,
                            final_attempt,
                        },
                        delay,
                    ));

                    if final_attempt {
                        self.update_statistics(|stats| {
                            stats.total_operations += 1;
                            stats.total_attempts += attempt as u64;
                            if retryable {
                                stats.exhausted_operations += 1;
                            } else {
                                stats.non_retryable_failures += 1;
                            }
                        });

                        if self.policy.log_errors {
                            error!(operation, attempt, retryable, "remote operation failed: {}", e);
                            if let Some(hint) = e.recovery_hint() {
                                warn!(operation, "{}", hint);
                            }
                        } else {
                            debug!(operation, attempt, retryable, "remote operation failed: {}", e);
                        }
                        return Err(e);
                    }

                    if self.policy.log_errors {
                        warn!(
                            operation,
                            attempt,
                            max_attempts,
                            "retrying in {:?} after error: {}",
                            self.policy.retry_delay,
                            e
                        );
                    } else {
                        debug!(operation, attempt, "retrying after error: {}", e);
                    }

                    tokio::time::sleep(self.policy.retry_delay).await;
                }
            }
        }
    }

    fn record(&self, record: RetryRecord) {
        let mut records = self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        records.push(record);

        // 保持记录数量在合理范围内
        if records.len() > 10000 {
            records.drain(0..1000);
        }
    }

    fn update_statistics(&self, update: impl FnOnce(&mut RetryStatistics)) {
        let mut stats = self.statistics.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        update(&mut stats);
    }

    /// 获取所有尝试记录
    pub fn get_retry_records(&self) -> Vec<RetryRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// 获取指定操作的尝试记录
    pub fn attempts_for(&self, operation: &str) -> Vec<RetryRecord> {
        self.get_retry_records()
            .into_iter()
            .filter(|record| record.operation == operation)
            .collect()
    }

    pub fn get_statistics(&self) -> RetryStatistics {
        self.statistics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn clear_records(&self) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            retry_delay: Duration::from_millis(1),
            log_errors: true,
        }
    }

    #[tokio::test]
    async fn test_retry_with_success() {
        let executor = RetryExecutor::new(policy(3));
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = executor
            .execute("read rows", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(StorageError::timeout("read rows"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        let records = executor.attempts_for("read rows");
        assert_eq!(records.len(), 3);
        assert!(records.last().unwrap().succeeded());

        let stats = executor.get_statistics();
        assert_eq!(stats.recovered_operations, 1);
        assert_eq!(stats.total_attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion() {
        let executor = RetryExecutor::new(policy(2));

        let result: Result<(), _> = executor
            .execute("write rows", || async { Err(StorageError::RateLimited { message: "slow down".into() }) })
            .await;

        assert!(matches!(result, Err(StorageError::RateLimited { .. })));
        let records = executor.get_retry_records();
        assert_eq!(records.len(), 2);
        assert!(matches!(
            records.last().unwrap().outcome,
            AttemptOutcome::Failed { final_attempt: true, retryable: true, .. }
        ));
        assert_eq!(executor.get_statistics().exhausted_operations, 1);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let executor = RetryExecutor::new(policy(5));
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<(), _> = executor
            .execute("open", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::PermissionDenied { message: "not shared".into() })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(executor.get_statistics().non_retryable_failures, 1);
    }

    #[tokio::test]
    async fn test_zero_retries_still_attempts_once() {
        let executor = RetryExecutor::new(policy(0));
        let result = executor.execute("metadata", || async { Ok::<_, StorageError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(executor.get_retry_records().len(), 1);
    }

    #[test]
    fn test_policy_from_config() {
        let config = ErrorHandlingConfig {
            max_retries: 4,
            retry_delay: 1.5,
            log_errors: false,
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.retry_delay, Duration::from_millis(1500));
        assert!(!policy.log_errors);
    }

    #[test]
    fn test_unrepresentable_delay_falls_back_to_default() {
        for retry_delay in [f64::INFINITY, 1e30] {
            let config = ErrorHandlingConfig {
                max_retries: 2,
                retry_delay,
                log_errors: true,
            };
            let policy = RetryPolicy::from_config(&config);
            assert_eq!(policy.retry_delay, Duration::from_secs(5), "retry_delay {}", retry_delay);
            assert_eq!(policy.max_attempts(), 2);
        }

        let negative = ErrorHandlingConfig {
            max_retries: 1,
            retry_delay: -3.0,
            log_errors: true,
        };
        assert_eq!(RetryPolicy::from_config(&negative).retry_delay, Duration::ZERO);
    }
}
