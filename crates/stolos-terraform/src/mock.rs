// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock engine for testing.
//!
//! Records every call and returns configurable results without spawning
//! any process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::engine::{Engine, EngineFactory, OutputValue, PlanOutput};
use crate::error::{EngineError, Result};

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<String>,
    env: BTreeMap<String, String>,
    has_changes: bool,
    plan_text: String,
    plan_json: String,
    apply_lines: Vec<String>,
    outputs: BTreeMap<String, OutputValue>,
    fail_on: Option<String>,
    apply_delay: Option<Duration>,
    plan_delay: Option<Duration>,
}

/// Mock engine for testing.
///
/// Clones share state, so a test can keep one handle and inspect the calls
/// made through another.
#[derive(Debug, Clone)]
pub struct MockEngine {
    work_dir: PathBuf,
    state: Arc<Mutex<MockState>>,
}

impl MockEngine {
    /// Create a mock whose plan reports changes.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            state: Arc::new(Mutex::new(MockState {
                has_changes: true,
                plan_text: "Plan: 1 to add, 0 to change, 0 to destroy.".to_string(),
                plan_json: r#"{"resource_changes":[]}"#.to_string(),
                ..Default::default()
            })),
        }
    }

    /// Create a mock whose `command` call fails with exit code 1.
    pub fn failing(work_dir: impl Into<PathBuf>, command: &str) -> Self {
        let mock = Self::new(work_dir);
        if let Ok(mut state) = mock.state.try_lock() {
            state.fail_on = Some(command.to_string());
        }
        mock
    }

    /// Set whether plans report changes.
    pub async fn set_has_changes(&self, has_changes: bool) {
        self.state.lock().await.has_changes = has_changes;
    }

    /// Set the human-readable plan text.
    pub async fn set_plan_text(&self, text: &str) {
        self.state.lock().await.plan_text = text.to_string();
    }

    /// Set the machine-readable plan.
    pub async fn set_plan_json(&self, json: &str) {
        self.state.lock().await.plan_json = json.to_string();
    }

    /// Set the JSON event lines emitted by a streaming apply.
    pub async fn set_apply_lines(&self, lines: Vec<String>) {
        self.state.lock().await.apply_lines = lines;
    }

    /// Make streaming apply wait before finishing (for cancellation tests).
    pub async fn set_apply_delay(&self, delay: Duration) {
        self.state.lock().await.apply_delay = Some(delay);
    }

    /// Make `plan_with_output` wait before returning (for overlap tests).
    pub async fn set_plan_delay(&self, delay: Duration) {
        self.state.lock().await.plan_delay = Some(delay);
    }

    /// Add a declared output.
    pub async fn set_output(&self, name: &str, value: serde_json::Value) {
        self.state.lock().await.outputs.insert(
            name.to_string(),
            OutputValue {
                value,
                sensitive: false,
            },
        );
    }

    /// Make the named command fail with exit code 1.
    pub async fn fail_on(&self, command: &str) {
        self.state.lock().await.fail_on = Some(command.to_string());
    }

    /// Commands invoked so far, in order.
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    /// Environment passed by the factory on the last `create`.
    pub async fn env(&self) -> BTreeMap<String, String> {
        self.state.lock().await.env.clone()
    }

    async fn record(&self, command: &str, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled(command.to_string()));
        }
        let mut state = self.state.lock().await;
        state.calls.push(command.to_string());
        if state.fail_on.as_deref() == Some(command) {
            return Err(EngineError::ExitCode {
                command: command.to_string(),
                exit_code: 1,
                stderr: format!("mock {} failure", command),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Engine for MockEngine {
    fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    async fn init(&self, cancel: &CancellationToken) -> Result<()> {
        self.record("init", cancel).await
    }

    async fn plan(&self, cancel: &CancellationToken) -> Result<bool> {
        self.record("plan", cancel).await?;
        Ok(self.state.lock().await.has_changes)
    }

    async fn plan_with_output(&self, cancel: &CancellationToken) -> Result<PlanOutput> {
        self.record("plan", cancel).await?;
        let delay = self.state.lock().await.plan_delay;
        if let Some(delay) = delay {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {
                    return Err(EngineError::Cancelled("plan".to_string()));
                }
            }
        }
        let state = self.state.lock().await;
        Ok(PlanOutput {
            has_changes: state.has_changes,
            text: state.plan_text.clone(),
        })
    }

    async fn plan_json(&self, cancel: &CancellationToken) -> Result<String> {
        self.record("show", cancel).await?;
        Ok(self.state.lock().await.plan_json.clone())
    }

    async fn apply(&self, cancel: &CancellationToken) -> Result<()> {
        self.record("apply", cancel).await
    }

    async fn apply_streaming(
        &self,
        cancel: &CancellationToken,
        lines: mpsc::Sender<String>,
    ) -> Result<()> {
        self.record("apply", cancel).await?;
        let (events, delay) = {
            let state = self.state.lock().await;
            (state.apply_lines.clone(), state.apply_delay)
        };
        for line in events {
            let _ = lines.send(line).await;
        }
        if let Some(delay) = delay {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {
                    return Err(EngineError::Cancelled("apply".to_string()));
                }
            }
        }
        Ok(())
    }

    async fn destroy(&self, cancel: &CancellationToken) -> Result<()> {
        self.record("destroy", cancel).await
    }

    async fn force_unlock(&self, cancel: &CancellationToken, lock_id: &str) -> Result<()> {
        self.record(&format!("force-unlock {}", lock_id), cancel)
            .await
    }

    async fn output(&self, cancel: &CancellationToken) -> Result<BTreeMap<String, OutputValue>> {
        self.record("output", cancel).await?;
        Ok(self.state.lock().await.outputs.clone())
    }
}

/// Factory that hands out one shared [`MockEngine`].
#[derive(Debug, Clone)]
pub struct MockEngineFactory {
    engine: MockEngine,
    work_dirs: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockEngineFactory {
    /// Wrap a mock engine.
    pub fn new(engine: MockEngine) -> Self {
        Self {
            engine,
            work_dirs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The shared mock.
    pub fn engine(&self) -> &MockEngine {
        &self.engine
    }

    /// Working directories engines were created for.
    pub async fn work_dirs(&self) -> Vec<PathBuf> {
        self.work_dirs.lock().await.clone()
    }
}

impl EngineFactory for MockEngineFactory {
    fn create(&self, work_dir: &Path, env: &BTreeMap<String, String>) -> Arc<dyn Engine> {
        if let Ok(mut dirs) = self.work_dirs.try_lock() {
            dirs.push(work_dir.to_path_buf());
        }
        if let Ok(mut state) = self.engine.state.try_lock() {
            state.env = env.clone();
        }
        Arc::new(MockEngine {
            work_dir: work_dir.to_path_buf(),
            state: self.engine.state.clone(),
        })
    }
}
