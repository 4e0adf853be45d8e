// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for stolos-provisioner.

use thiserror::Error;

/// Provisioner errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Repository, cluster or provider configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Environment configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Rendering an infrastructure template failed.
    #[error("Template error: {0}")]
    Template(#[from] stolos_terraform::TemplateError),

    /// The infrastructure engine failed.
    #[error("{0}")]
    Engine(#[from] stolos_terraform::EngineError),

    /// The version-control hosting API failed.
    #[error("Remote API error: {0}")]
    RemoteApi(#[from] stolos_gitops::GitOpsError),

    /// The cloud provider API failed.
    #[error("Provider error: {0}")]
    Provider(String),

    /// A wait or remote query ran out of time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A cluster, node, request or configuration row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The approver rejected the plan.
    #[error("{0}")]
    Rejected(String),

    /// The governing operation was cancelled.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The entity is not in a state that allows the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A node control-plane call failed.
    #[error("Control plane error: {0}")]
    ControlPlane(#[from] crate::controlplane::ControlPlaneError),

    /// The client session is unusable.
    #[error("Session error: {0}")]
    Session(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML machine configuration could not be processed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type using provisioner Error.
pub type Result<T> = std::result::Result<T, Error>;
