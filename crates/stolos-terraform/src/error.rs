// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for stolos-terraform.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from infrastructure engine runs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The engine binary could not be found or started.
    #[error("terraform not installed or not in PATH: {0}")]
    NotInstalled(String),

    /// The engine exited with a non-zero code.
    #[error("terraform {command} failed: Exit code {exit_code}: {stderr}")]
    ExitCode {
        /// Subcommand that failed (`init`, `plan`, ...).
        command: String,
        /// Exit code from the process (-1 when killed by a signal).
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// The run was cancelled and the process group terminated.
    #[error("terraform {0} cancelled")]
    Cancelled(String),

    /// Engine output could not be parsed.
    #[error("Failed to parse terraform output: {0}")]
    Parse(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from template rendering.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TemplateError {
    /// The template file does not exist.
    #[error("Template not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Parsing or evaluating the template failed.
    #[error("Failed to render template {template}: {source}")]
    Render {
        /// Template path relative to the base directory.
        template: String,
        /// Underlying template error.
        #[source]
        source: minijinja::Error,
    },

    /// Reading the template or writing the output failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
