use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::infrastructure::error::StorageError;

pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive",
];

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// 令牌在到期前这么久就视为过期
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const ASSERTION_LIFETIME_SECS: i64 = 3600;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// 服务账号密钥
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

/// OAuth 用户授权（refresh token）
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedUserKey {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

/// Google 凭据文件，按 `type` 字段区分
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUserKey),
}

impl Credentials {
    pub fn from_file(path: &Path) -> Result<Self, StorageError> {
        let display = Some(path.display().to_string());
        if !path.exists() {
            return Err(StorageError::credentials("credentials file not found", display));
        }
        let content = fs::read_to_string(path)
            .map_err(|e| StorageError::credentials(format!("cannot read credentials file: {}", e), display.clone()))?;
        Self::from_json(&content).map_err(|e| match e {
            StorageError::Credentials { message, .. } => StorageError::credentials(message, display),
            other => other,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, StorageError> {
        let value: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| StorageError::credentials(format!("credentials file is not valid JSON: {}", e), None))?;

        match value.get("type").and_then(|t| t.as_str()) {
            None => return Err(StorageError::credentials("credentials file has no 'type' field", None)),
            Some("service_account") | Some("authorized_user") => {}
            Some(other) => {
                return Err(StorageError::credentials(
                    format!("unsupported credentials type '{}'", other),
                    None,
                ))
            }
        }

        let credentials: Credentials = serde_json::from_value(value)
            .map_err(|e| StorageError::credentials(format!("incomplete credentials: {}", e), None))?;
        credentials.validate()?;
        Ok(credentials)
    }

    fn validate(&self) -> Result<(), StorageError> {
        match self {
            Credentials::ServiceAccount(key) => {
                if key.client_email.trim().is_empty() {
                    return Err(StorageError::credentials("service account key has an empty client_email", None));
                }
                if !key.private_key.contains("PRIVATE KEY") {
                    return Err(StorageError::credentials(
                        "service account private_key is not a PEM key",
                        None,
                    ));
                }
            }
            Credentials::AuthorizedUser(key) => {
                if key.client_id.trim().is_empty() || key.refresh_token.trim().is_empty() {
                    return Err(StorageError::credentials(
                        "authorized user credentials need client_id and refresh_token",
                        None,
                    ));
                }
            }
        }
        Ok(())
    }

    /// 服务账号邮箱，表格需共享给这个地址
    pub fn client_email(&self) -> Option<&str> {
        match self {
            Credentials::ServiceAccount(key) => Some(&key.client_email),
            Credentials::AuthorizedUser(_) => None,
        }
    }

    pub fn token_uri(&self) -> &str {
        match self {
            Credentials::ServiceAccount(key) => &key.token_uri,
            Credentials::AuthorizedUser(key) => &key.token_uri,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::ServiceAccount(_) => "service_account",
            Credentials::AuthorizedUser(_) => "authorized_user",
        }
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    expires_at: Instant,
}

/// 访问令牌提供者，缓存令牌直到临近过期
pub struct TokenProvider {
    credentials: Credentials,
    client: &'static Client,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenProvider {
    pub fn new(credentials: Credentials, client: &'static Client) -> Self {
        Self {
            credentials,
            client,
            cached: Mutex::new(None),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub async fn access_token(&self) -> Result<String, StorageError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + EXPIRY_MARGIN < token.expires_at {
                return Ok(token.token.clone());
            }
            debug!("cached access token is about to expire, refreshing");
        }

        let token = self.fetch().await?;
        let value = token.token.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// 收到 401 后丢弃缓存的令牌
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    async fn fetch(&self) -> Result<AccessToken, StorageError> {
        let token_uri = self.credentials.token_uri();
        let request = match &self.credentials {
            Credentials::ServiceAccount(key) => {
                let assertion = sign_assertion(key)?;
                self.client
                    .post(token_uri)
                    .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            }
            Credentials::AuthorizedUser(key) => self.client.post(token_uri).form(&[
                ("grant_type", "refresh_token"),
                ("client_id", key.client_id.as_str()),
                ("client_secret", key.client_secret.as_str()),
                ("refresh_token", key.refresh_token.as_str()),
            ]),
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let error = StorageError::from_status(status.as_u16(), &body);
            // 令牌端点的 4xx（invalid_grant 等）重试无用
            return Err(if error.is_retryable() && status.as_u16() != 401 {
                error
            } else {
                StorageError::credentials(format!("token exchange rejected: {}", error), None)
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)?;
        let lifetime = Duration::from_secs(parsed.expires_in.unwrap_or(3600));
        info!(kind = self.credentials.kind(), "obtained access token");

        Ok(AccessToken {
            token: parsed.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }
}

fn sign_assertion(key: &ServiceAccountKey) -> Result<String, StorageError> {
    let now = Utc::now().timestamp();
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: SCOPES.join(" "),
        aud: &key.token_uri,
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };

    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| StorageError::credentials(format!("invalid service account private key: {}", e), None))?;
    encode(&header, &claims, &encoding_key)
        .map_err(|e| StorageError::credentials(format!("cannot sign token assertion: {}", e), None))
}
