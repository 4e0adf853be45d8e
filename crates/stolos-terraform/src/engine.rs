// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine trait definitions.
//!
//! Defines the abstract interface for infrastructure engine runs against one
//! working directory.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// File the reviewed plan is saved to inside the working directory.
pub const PLAN_FILE: &str = "tfplan.out";

/// One declared output after apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    /// Output value.
    pub value: Value,
    /// Whether the output is marked sensitive.
    #[serde(default)]
    pub sensitive: bool,
}

/// Result of a plan that is shown to an approver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOutput {
    /// Whether applying would change anything.
    pub has_changes: bool,
    /// Human-readable plan text.
    pub text: String,
}

/// Infrastructure engine bound to one working directory.
///
/// Every call takes a cancellation token; cancelling terminates the
/// underlying process and yields [`EngineError::Cancelled`](crate::EngineError::Cancelled).
#[async_trait]
pub trait Engine: Send + Sync {
    /// Working directory the engine runs in.
    fn work_dir(&self) -> &Path;

    /// Initialize providers and the remote state backend.
    async fn init(&self, cancel: &CancellationToken) -> Result<()>;

    /// Plan without saving; returns whether there are changes.
    async fn plan(&self, cancel: &CancellationToken) -> Result<bool>;

    /// Plan into [`PLAN_FILE`] and return the human-readable plan.
    async fn plan_with_output(&self, cancel: &CancellationToken) -> Result<PlanOutput>;

    /// Machine-readable form of the saved plan.
    async fn plan_json(&self, cancel: &CancellationToken) -> Result<String>;

    /// Apply the saved plan (or the configuration when no plan was saved).
    async fn apply(&self, cancel: &CancellationToken) -> Result<()>;

    /// Apply and forward every JSON event line to `lines` as it is emitted.
    async fn apply_streaming(
        &self,
        cancel: &CancellationToken,
        lines: mpsc::Sender<String>,
    ) -> Result<()>;

    /// Destroy everything in the state.
    async fn destroy(&self, cancel: &CancellationToken) -> Result<()>;

    /// Remove a stuck state lock.
    async fn force_unlock(&self, cancel: &CancellationToken, lock_id: &str) -> Result<()>;

    /// Declared outputs of the current state.
    async fn output(&self, cancel: &CancellationToken) -> Result<BTreeMap<String, OutputValue>>;
}

/// Creates engines for scratch working directories.
pub trait EngineFactory: Send + Sync {
    /// Create an engine for `work_dir` with extra environment variables.
    fn create(&self, work_dir: &Path, env: &BTreeMap<String, String>) -> Arc<dyn Engine>;
}
