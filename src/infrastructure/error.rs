use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 存储子系统错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("credentials error: {message}")]
    Credentials { message: String, path: Option<String> },

    #[error("authentication failed: {message}")]
    Unauthenticated { message: String },

    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("not found: {resource}")]
    NotFound { resource: String },

    #[error("rate limited: {message}")]
    RateLimited { message: String },

    #[error("timeout: {operation}")]
    Timeout { operation: String },

    #[error("network error: {message}")]
    Network { message: String, url: Option<String> },

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("invalid request ({status}): {message}")]
    InvalidRequest { status: u16, message: String },

    #[error("not connected: {message}")]
    NotConnected { message: String },

    #[error("parse error: {message}")]
    Parsing { message: String, content_type: String },

    #[error("file system error: {message}")]
    FileSystem { message: String, path: Option<String> },
}

impl StorageError {
    /// 检查错误是否可重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::RateLimited { .. }
                | StorageError::Timeout { .. }
                | StorageError::Network { .. }
                | StorageError::Server { .. }
                | StorageError::Unauthenticated { .. }
        )
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self {
            StorageError::Configuration { .. } => ErrorCategory::Configuration,
            StorageError::Credentials { .. } => ErrorCategory::Configuration,
            StorageError::FileSystem { .. } => ErrorCategory::IO,
            StorageError::Unauthenticated { .. } => ErrorCategory::Security,
            StorageError::PermissionDenied { .. } => ErrorCategory::Security,
            StorageError::NotFound { .. } => ErrorCategory::Connection,
            StorageError::NotConnected { .. } => ErrorCategory::Connection,
            StorageError::RateLimited { .. } => ErrorCategory::Transient,
            StorageError::Timeout { .. } => ErrorCategory::Transient,
            StorageError::Network { .. } => ErrorCategory::Transient,
            StorageError::Server { .. } => ErrorCategory::Transient,
            StorageError::InvalidRequest { .. } => ErrorCategory::Data,
            StorageError::Parsing { .. } => ErrorCategory::Data,
        }
    }

    /// 给运维人员的恢复提示
    pub fn recovery_hint(&self) -> Option<&'static str> {
        match self {
            StorageError::RateLimited { .. } => {
                Some("Google Sheets API quota exceeded, try again later")
            }
            StorageError::Unauthenticated { message } | StorageError::Credentials { message, .. }
                if message.contains("invalid_grant") || message.contains("expired or revoked") =>
            {
                Some("authentication issue, check the Google API credentials")
            }
            StorageError::Network { .. } | StorageError::Timeout { .. } => {
                Some("network issue, check the internet connection")
            }
            StorageError::PermissionDenied { .. } => {
                Some("share the spreadsheet with the service account email (Editor access)")
            }
            StorageError::NotFound { .. } => {
                Some("verify the spreadsheet id and that it is shared with the credential identity")
            }
            _ => None,
        }
    }

    /// 创建配置错误
    pub fn config(message: impl Into<String>) -> Self {
        StorageError::Configuration {
            message: message.into(),
        }
    }

    /// 创建凭据错误
    pub fn credentials(message: impl Into<String>, path: Option<String>) -> Self {
        StorageError::Credentials {
            message: message.into(),
            path,
        }
    }

    /// 创建网络错误
    pub fn network(message: impl Into<String>, url: Option<String>) -> Self {
        StorageError::Network {
            message: message.into(),
            url,
        }
    }

    /// 创建超时错误
    pub fn timeout(operation: impl Into<String>) -> Self {
        StorageError::Timeout {
            operation: operation.into(),
        }
    }

    pub fn not_connected(message: impl Into<String>) -> Self {
        StorageError::NotConnected {
            message: message.into(),
        }
    }

    /// 根据 HTTP 状态码和响应体分类远程错误
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = extract_api_message(body);
        let lowered = body.to_lowercase();

        match status {
            429 => StorageError::RateLimited { message },
            403 if lowered.contains("ratelimitexceeded")
                || lowered.contains("quota")
                || lowered.contains("rate_limit_exceeded") =>
            {
                StorageError::RateLimited { message }
            }
            401 => StorageError::Unauthenticated { message },
            403 => StorageError::PermissionDenied { message },
            404 => StorageError::NotFound { resource: message },
            408 | 504 => StorageError::Timeout { operation: message },
            500..=599 => StorageError::Server { status, message },
            _ => StorageError::InvalidRequest { status, message },
        }
    }
}

/// Google API 错误体形如 {"error": {"code": 404, "message": "...", "status": "NOT_FOUND"}}
fn extract_api_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .or_else(|| {
                    value
                        .get("error_description")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                })
        })
        .unwrap_or_else(|| body.trim().chars().take(300).collect())
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Configuration,
    IO,
    Connection,
    Transient,
    Security,
    Data,
}

impl From<std::io::Error> for StorageError {
    fn from(error: std::io::Error) -> Self {
        StorageError::FileSystem {
            message: error.to_string(),
            path: None,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(error: serde_json::Error) -> Self {
        StorageError::Parsing {
            message: error.to_string(),
            content_type: "JSON".to_string(),
        }
    }
}

impl From<toml::de::Error> for StorageError {
    fn from(error: toml::de::Error) -> Self {
        StorageError::Parsing {
            message: error.to_string(),
            content_type: "TOML".to_string(),
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(error: reqwest::Error) -> Self {
        let url = error.url().map(|u| u.to_string());
        if error.is_timeout() {
            StorageError::Timeout {
                operation: url.unwrap_or_else(|| "request".to_string()),
            }
        } else if let Some(status) = error.status() {
            StorageError::from_status(status.as_u16(), &error.to_string())
        } else if error.is_decode() {
            StorageError::Parsing {
                message: error.to_string(),
                content_type: "JSON".to_string(),
            }
        } else {
            StorageError::Network {
                message: error.to_string(),
                url,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(StorageError::from_status(429, ""), StorageError::RateLimited { .. }));
        assert!(matches!(StorageError::from_status(401, ""), StorageError::Unauthenticated { .. }));
        assert!(matches!(StorageError::from_status(403, ""), StorageError::PermissionDenied { .. }));
        assert!(matches!(StorageError::from_status(404, ""), StorageError::NotFound { .. }));
        assert!(matches!(StorageError::from_status(504, ""), StorageError::Timeout { .. }));
        assert!(matches!(StorageError::from_status(503, ""), StorageError::Server { status: 503, .. }));
        assert!(matches!(StorageError::from_status(400, ""), StorageError::InvalidRequest { status: 400, .. }));
    }

    #[test]
    fn test_quota_403_is_rate_limit() {
        let body = r#"{"error":{"code":403,"message":"Quota exceeded","status":"PERMISSION_DENIED","details":[{"reason":"rateLimitExceeded"}]}}"#;
        let error = StorageError::from_status(403, body);
        assert!(matches!(error, StorageError::RateLimited { ref message } if message == "Quota exceeded"));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_retryable_split() {
        assert!(StorageError::timeout("read").is_retryable());
        assert!(StorageError::network("reset", None).is_retryable());
        assert!(!StorageError::credentials("bad key", None).is_retryable());
        assert!(!StorageError::NotFound { resource: "sheet".into() }.is_retryable());
        assert!(!StorageError::PermissionDenied { message: "no".into() }.is_retryable());
    }

    #[test]
    fn test_category() {
        assert_eq!(StorageError::config("x").category(), ErrorCategory::Configuration);
        assert_eq!(StorageError::timeout("x").category(), ErrorCategory::Transient);
        assert_eq!(
            StorageError::PermissionDenied { message: "x".into() }.category(),
            ErrorCategory::Security
        );
    }
}
