// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GitHub REST implementation of [`GitDataApi`].
//!
//! Authentication is either a fixed token or a GitHub App. App auth signs a
//! short-lived RS256 JWT and exchanges it for an installation token, which is
//! cached until shortly before it expires.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::debug;

use crate::api::{Author, CommitInfo, ContentEntry, GitDataApi, TreeEntry};
use crate::config::{GitHubAuth, GitHubSettings};
use crate::error::{GitOpsError, Result};

const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "stolos-gitops";

/// Installation tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Deserialize)]
struct InstallationToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: ShaRef,
}

#[derive(Debug, Deserialize)]
struct ShaRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    tree: ShaRef,
    #[serde(default)]
    parents: Vec<ShaRef>,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct FileResponse {
    name: String,
    path: String,
    sha: String,
    #[serde(rename = "type")]
    kind: crate::api::ContentKind,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Listing(Vec<ContentEntry>),
    Single(FileResponse),
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Client for one GitHub repository.
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    owner: String,
    repo: String,
    auth: GitHubAuth,
    token_cache: Mutex<Option<CachedToken>>,
}

impl GitHubClient {
    /// Create a client for `owner/repo`.
    pub fn new(
        settings: GitHubSettings,
        owner: impl Into<String>,
        repo: impl Into<String>,
    ) -> Result<Self> {
        let owner = owner.into();
        let repo = repo.into();
        if owner.is_empty() || repo.is_empty() {
            return Err(GitOpsError::Config(
                "repository owner and name are required".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            owner,
            repo,
            auth: settings.auth,
            token_cache: Mutex::new(None),
        })
    }

    /// Repository owner.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Repository name.
    pub fn repo(&self) -> &str {
        &self.repo
    }

    fn repo_url(&self, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_url,
            self.owner,
            self.repo,
            suffix.trim_start_matches('/')
        )
    }

    /// Sign the app JWT used to mint installation tokens.
    fn app_jwt(app_id: &str, private_key: &str) -> Result<String> {
        let now = Utc::now();
        let claims = AppClaims {
            // Backdated to tolerate clock drift.
            iat: (now - Duration::seconds(60)).timestamp(),
            exp: (now + Duration::minutes(10)).timestamp(),
            iss: app_id.to_string(),
        };
        let key = EncodingKey::from_rsa_pem(private_key.as_bytes())?;
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &key,
        )?)
    }

    async fn token(&self) -> Result<String> {
        let (app_id, installation_id, private_key) = match &self.auth {
            GitHubAuth::Token(token) => return Ok(token.clone()),
            GitHubAuth::App {
                app_id,
                installation_id,
                private_key,
            } => (app_id, installation_id, private_key),
        };

        let mut cache = self.token_cache.lock().await;
        if let Some(cached) = cache.as_ref()
            && cached.expires_at - Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > Utc::now()
        {
            return Ok(cached.token.clone());
        }

        let jwt = Self::app_jwt(app_id, private_key)?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url, installation_id
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GitOpsError::Auth(format!(
                "installation token request failed ({}): {}",
                status, body
            )));
        }

        let minted: InstallationToken = response.json().await?;
        debug!(expires_at = %minted.expires_at, "Minted GitHub installation token");
        *cache = Some(CachedToken {
            token: minted.token.clone(),
            expires_at: minted.expires_at,
        });
        Ok(minted.token)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let token = self.token().await?;
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let response = self.send(method, url, body).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status, response).await);
        }
        Ok(response.json().await?)
    }

    /// Like [`request`](Self::request) but maps 404 to `None`.
    async fn request_optional<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let response = self.send(Method::GET, url, None).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(api_error(status, response).await);
        }
        Ok(Some(response.json().await?))
    }
}

async fn api_error(status: StatusCode, response: reqwest::Response) -> GitOpsError {
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&text)
        .map(|b| b.message)
        .unwrap_or(text);
    if status == StatusCode::NOT_FOUND {
        GitOpsError::NotFound(message)
    } else {
        GitOpsError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

fn encode_path(path: &str) -> String {
    path.trim_matches('/').to_string()
}

#[async_trait]
impl GitDataApi for GitHubClient {
    async fn get_ref(&self, branch: &str) -> Result<String> {
        let url = self.repo_url(&format!("git/ref/heads/{}", branch));
        let response: RefResponse = self.request(Method::GET, &url, None).await?;
        Ok(response.object.sha)
    }

    async fn get_commit(&self, sha: &str) -> Result<CommitInfo> {
        let url = self.repo_url(&format!("git/commits/{}", sha));
        let response: CommitResponse = self.request(Method::GET, &url, None).await?;
        Ok(CommitInfo {
            sha: response.sha,
            tree_sha: response.tree.sha,
            parents: response.parents.into_iter().map(|p| p.sha).collect(),
        })
    }

    async fn create_blob(&self, content: &[u8]) -> Result<String> {
        let url = self.repo_url("git/blobs");
        let body = json!({
            "content": STANDARD.encode(content),
            "encoding": "base64",
        });
        let response: ShaRef = self.request(Method::POST, &url, Some(&body)).await?;
        Ok(response.sha)
    }

    async fn create_tree(&self, base_tree: Option<&str>, entries: &[TreeEntry]) -> Result<String> {
        let url = self.repo_url("git/trees");
        let mut body = json!({ "tree": entries });
        if let Some(base) = base_tree {
            body["base_tree"] = Value::String(base.to_string());
        }
        let response: ShaRef = self.request(Method::POST, &url, Some(&body)).await?;
        Ok(response.sha)
    }

    async fn create_commit(
        &self,
        message: &str,
        tree_sha: &str,
        parents: &[String],
        author: &Author,
    ) -> Result<String> {
        let url = self.repo_url("git/commits");
        let signature = json!({
            "name": author.name,
            "email": author.email,
            "date": Utc::now().to_rfc3339(),
        });
        let body = json!({
            "message": message,
            "tree": tree_sha,
            "parents": parents,
            "author": signature,
            "committer": signature,
        });
        let response: ShaRef = self.request(Method::POST, &url, Some(&body)).await?;
        Ok(response.sha)
    }

    async fn update_ref(&self, branch: &str, sha: &str) -> Result<()> {
        let url = self.repo_url(&format!("git/refs/heads/{}", branch));
        let body = json!({ "sha": sha, "force": false });
        let _: Value = self.request(Method::PATCH, &url, Some(&body)).await?;
        Ok(())
    }

    async fn get_tree_recursive(&self, tree_sha: &str) -> Result<Vec<TreeEntry>> {
        let url = self.repo_url(&format!("git/trees/{}?recursive=1", tree_sha));
        let response: TreeResponse = self.request(Method::GET, &url, None).await?;
        // Rebuilding a tree from a partial listing would drop the missing files.
        if response.truncated {
            return Err(GitOpsError::TruncatedTree(tree_sha.to_string()));
        }
        Ok(response.tree)
    }

    async fn get_contents(&self, path: &str, branch: &str) -> Result<Vec<ContentEntry>> {
        let url = self.repo_url(&format!("contents/{}?ref={}", encode_path(path), branch));
        Ok(match self.request_optional::<ContentsResponse>(&url).await? {
            None => Vec::new(),
            Some(ContentsResponse::Listing(entries)) => entries,
            Some(ContentsResponse::Single(file)) => vec![ContentEntry {
                name: file.name,
                path: file.path,
                kind: file.kind,
                sha: file.sha,
            }],
        })
    }

    async fn get_file(&self, path: &str, branch: &str) -> Result<Option<Vec<u8>>> {
        let url = self.repo_url(&format!("contents/{}?ref={}", encode_path(path), branch));
        match self.request_optional::<ContentsResponse>(&url).await? {
            Some(ContentsResponse::Single(FileResponse {
                content: Some(content),
                ..
            })) => {
                // The API wraps base64 at 60 columns.
                let compact: String = content.split_whitespace().collect();
                Ok(Some(STANDARD.decode(compact)?))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_owner_and_repo() {
        let settings = GitHubSettings {
            api_url: "http://localhost".to_string(),
            auth: GitHubAuth::Token("t".to_string()),
        };
        assert!(matches!(
            GitHubClient::new(settings, "", "repo"),
            Err(GitOpsError::Config(_))
        ));
    }

    #[test]
    fn test_app_jwt_rejects_invalid_key() {
        let result = GitHubClient::app_jwt("123", "not a pem key");
        assert!(matches!(result, Err(GitOpsError::Jwt(_))));
    }

    #[test]
    fn test_repo_url_strips_trailing_slash() {
        let settings = GitHubSettings {
            api_url: "https://api.example.com/".to_string(),
            auth: GitHubAuth::Token("t".to_string()),
        };
        let client = GitHubClient::new(settings, "acme", "infra").unwrap();
        assert_eq!(
            client.repo_url("git/blobs"),
            "https://api.example.com/repos/acme/infra/git/blobs"
        );
    }
}
