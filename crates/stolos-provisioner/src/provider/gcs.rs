// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Object storage for machine configurations.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// Public storage endpoint.
pub const DEFAULT_STORAGE_URL: &str = "https://storage.googleapis.com";
/// OAuth scope for object writes.
pub const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Writes objects to buckets.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create or replace `bucket/name`.
    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        content: &[u8],
        content_type: &str,
    ) -> Result<()>;
}

/// Fields of a service account key file the client needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    /// Service account identity
    pub client_email: String,
    /// PEM-encoded RSA key
    pub private_key: String,
    /// OAuth token endpoint
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

/// How the storage client authenticates.
#[derive(Clone)]
pub enum GcsAuth {
    /// Pre-minted access token
    Token(String),
    /// Service account key exchanged for access tokens
    ServiceAccount(ServiceAccountKey),
}

impl GcsAuth {
    /// Parse a service account key document.
    pub fn from_service_account_json(json: &str) -> Result<Self> {
        Ok(Self::ServiceAccount(serde_json::from_str(json)?))
    }
}

impl std::fmt::Debug for GcsAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.write_str("GcsAuth::Token(..)"),
            Self::ServiceAccount(key) => {
                f.debug_tuple("GcsAuth::ServiceAccount").field(key).finish()
            }
        }
    }
}

#[derive(Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Cloud Storage JSON API client.
pub struct GcsClient {
    http: reqwest::Client,
    storage_url: String,
    auth: GcsAuth,
    token_cache: Mutex<Option<CachedToken>>,
}

impl GcsClient {
    /// Create a client against the public endpoint.
    pub fn new(auth: GcsAuth) -> Result<Self> {
        Self::with_storage_url(auth, DEFAULT_STORAGE_URL)
    }

    /// Create a client against another endpoint.
    pub fn with_storage_url(auth: GcsAuth, storage_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Provider(e.to_string()))?;
        Ok(Self {
            http,
            storage_url: storage_url.trim_end_matches('/').to_string(),
            auth,
            token_cache: Mutex::new(None),
        })
    }

    async fn token(&self) -> Result<String> {
        let key = match &self.auth {
            GcsAuth::Token(token) => return Ok(token.clone()),
            GcsAuth::ServiceAccount(key) => key,
        };

        let mut cache = self.token_cache.lock().await;
        if let Some(cached) = cache.as_ref()
            && cached.expires_at - Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > Utc::now()
        {
            return Ok(cached.token.clone());
        }

        let now = Utc::now().timestamp();
        let claims = JwtClaims {
            iss: &key.client_email,
            scope: STORAGE_SCOPE,
            aud: &key.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| Error::Configuration(format!("invalid service account key: {}", e)))?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|e| Error::Provider(format!("failed to sign token request: {}", e)))?;

        let response = self
            .http
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "token request failed ({}): {}",
                status, body
            )));
        }

        let minted: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;
        debug!(expires_in = minted.expires_in, "Minted storage access token");
        *cache = Some(CachedToken {
            token: minted.access_token.clone(),
            expires_at: Utc::now() + Duration::seconds(minted.expires_in),
        });
        Ok(minted.access_token)
    }
}

#[async_trait]
impl ObjectStore for GcsClient {
    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        content: &[u8],
        content_type: &str,
    ) -> Result<()> {
        let token = self.token().await?;
        let url = format!("{}/upload/storage/v1/b/{}/o", self.storage_url, bucket);
        let response = self
            .http
            .post(&url)
            .query(&[("uploadType", "media"), ("name", name)])
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(content.to_vec())
            .send()
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "upload of gs://{}/{} failed ({}): {}",
                bucket, name, status, body
            )));
        }
        debug!(bucket, name, bytes = content.len(), "Uploaded object");
        Ok(())
    }
}

/// Object store in process memory.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Content of `bucket/name`.
    pub async fn get(&self, bucket: &str, name: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .await
            .get(&format!("{}/{}", bucket, name))
            .cloned()
    }

    /// Every stored `bucket/name` key.
    pub async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        content: &[u8],
        _content_type: &str,
    ) -> Result<()> {
        self.objects
            .lock()
            .await
            .insert(format!("{}/{}", bucket, name), content.to_vec());
        Ok(())
    }
}
