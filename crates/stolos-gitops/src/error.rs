// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for stolos-gitops.

use thiserror::Error;

/// GitOps errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GitOpsError {
    /// Repository coordinates or credentials are missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP transport failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The hosting API answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message returned by the API.
        message: String,
    },

    /// Authentication against the hosting API failed.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Signing the GitHub App token failed.
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// A ref, commit, tree or blob does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A copy would overwrite an existing path.
    #[error("Destination already exists: {0}")]
    DestinationExists(String),

    /// The source prefix of a copy holds no files.
    #[error("No files found under {0}")]
    NoFilesFound(String),

    /// The API returned an incomplete recursive tree listing.
    #[error("Tree listing for {0} was truncated by the API")]
    TruncatedTree(String),

    /// A path argument was empty or malformed.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Base64 content could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Result type using GitOpsError.
pub type Result<T> = std::result::Result<T, GitOpsError>;
