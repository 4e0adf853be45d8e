// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Terraform CLI engine.
//!
//! Runs the `terraform` binary as a child process in its own process group.
//! Standard output and error are drained concurrently with `wait()` so a
//! chatty child never blocks on a full pipe. Cancellation sends SIGTERM to
//! the whole group and then kills the direct child.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineFactory, OutputValue, PLAN_FILE, PlanOutput};
use crate::error::{EngineError, Result};
use crate::tracker::read_lossy_line;

/// Default binary name, resolved through `PATH`.
pub const DEFAULT_BINARY: &str = "terraform";

/// Captured result of one finished run.
#[derive(Debug)]
struct Captured {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

/// Engine backed by the terraform command line.
#[derive(Debug, Clone)]
pub struct TerraformCli {
    binary: PathBuf,
    work_dir: PathBuf,
    env: BTreeMap<String, String>,
}

impl TerraformCli {
    /// Create an engine for `work_dir` using `terraform` from `PATH`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_BINARY),
            work_dir: work_dir.into(),
            env: BTreeMap::new(),
        }
    }

    /// Use a specific binary instead of the one on `PATH`.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Extra environment variables for every run (credentials, `TF_VAR_*`).
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(&self.work_dir)
            .envs(&self.env)
            .env("TF_IN_AUTOMATION", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    fn spawn(&self, name: &str, args: &[&str]) -> Result<Child> {
        debug!(command = name, work_dir = %self.work_dir.display(), ?args, "Running terraform");
        self.command(args).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::NotInstalled(self.binary.display().to_string())
            } else {
                EngineError::Io(e)
            }
        })
    }

    /// Run to completion and capture output; non-zero exit codes are returned, not raised.
    async fn capture(
        &self,
        name: &str,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Captured> {
        let mut child = self.spawn(name, args)?;
        let pid = child.id();
        let mut stdout_handle = child.stdout.take();
        let mut stderr_handle = child.stderr.take();

        tokio::select! {
            result = async {
                let (status, stdout, stderr) = tokio::join!(
                    child.wait(),
                    async {
                        let mut buf = Vec::new();
                        if let Some(ref mut h) = stdout_handle {
                            let _ = h.read_to_end(&mut buf).await;
                        }
                        buf
                    },
                    async {
                        let mut buf = Vec::new();
                        if let Some(ref mut h) = stderr_handle {
                            let _ = h.read_to_end(&mut buf).await;
                        }
                        buf
                    },
                );
                Ok::<_, EngineError>(Captured {
                    exit_code: status?.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                })
            } => result,
            () = cancel.cancelled() => {
                terminate_group(pid);
                let _ = child.kill().await;
                warn!(command = name, "Terraform run cancelled");
                Err(EngineError::Cancelled(name.to_string()))
            }
        }
    }

    /// Run and fail on any non-zero exit code.
    async fn run(&self, name: &str, args: &[&str], cancel: &CancellationToken) -> Result<String> {
        let captured = self.capture(name, args, cancel).await?;
        if captured.exit_code != 0 {
            return Err(exit_error(name, captured));
        }
        Ok(captured.stdout)
    }

    fn has_saved_plan(&self) -> bool {
        self.work_dir.join(PLAN_FILE).is_file()
    }
}

fn exit_error(name: &str, captured: Captured) -> EngineError {
    EngineError::ExitCode {
        command: name.to_string(),
        exit_code: captured.exit_code,
        stderr: captured.stderr.trim().to_string(),
    }
}

/// SIGTERM the child's process group so provider plugins exit too.
#[cfg(unix)]
fn terminate_group(pid: Option<u32>) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    match signal::killpg(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => debug!(pid = pid, "Sent SIGTERM to terraform process group"),
        Err(nix::errno::Errno::ESRCH) => debug!(pid = pid, "Process group already gone"),
        Err(e) => warn!(pid = pid, error = %e, "Failed to signal process group"),
    }
}

#[cfg(not(unix))]
fn terminate_group(_pid: Option<u32>) {}

#[async_trait]
impl Engine for TerraformCli {
    fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    async fn init(&self, cancel: &CancellationToken) -> Result<()> {
        self.run("init", &["init", "-no-color", "-input=false"], cancel)
            .await?;
        info!(work_dir = %self.work_dir.display(), "Terraform initialized");
        Ok(())
    }

    async fn plan(&self, cancel: &CancellationToken) -> Result<bool> {
        let captured = self
            .capture(
                "plan",
                &["plan", "-no-color", "-input=false", "-detailed-exitcode"],
                cancel,
            )
            .await?;
        match captured.exit_code {
            0 => Ok(false),
            2 => Ok(true),
            _ => Err(exit_error("plan", captured)),
        }
    }

    async fn plan_with_output(&self, cancel: &CancellationToken) -> Result<PlanOutput> {
        let out_arg = format!("-out={}", PLAN_FILE);
        let captured = self
            .capture(
                "plan",
                &[
                    "plan",
                    "-no-color",
                    "-input=false",
                    "-detailed-exitcode",
                    &out_arg,
                ],
                cancel,
            )
            .await?;
        let has_changes = match captured.exit_code {
            0 => false,
            2 => true,
            _ => return Err(exit_error("plan", captured)),
        };
        let text = self
            .run("show", &["show", "-no-color", PLAN_FILE], cancel)
            .await?;
        Ok(PlanOutput { has_changes, text })
    }

    async fn plan_json(&self, cancel: &CancellationToken) -> Result<String> {
        self.run("show", &["show", "-json", "-no-color", PLAN_FILE], cancel)
            .await
    }

    async fn apply(&self, cancel: &CancellationToken) -> Result<()> {
        let mut args = vec!["apply", "-no-color", "-input=false", "-auto-approve"];
        if self.has_saved_plan() {
            args.push(PLAN_FILE);
        }
        self.run("apply", &args, cancel).await?;
        Ok(())
    }

    async fn apply_streaming(
        &self,
        cancel: &CancellationToken,
        lines: mpsc::Sender<String>,
    ) -> Result<()> {
        let mut args = vec!["apply", "-json", "-no-color", "-input=false", "-auto-approve"];
        if self.has_saved_plan() {
            args.push(PLAN_FILE);
        }

        let mut child = self.spawn("apply", &args)?;
        let pid = child.id();
        let stdout_handle = child.stdout.take();
        let mut stderr_handle = child.stderr.take();

        tokio::select! {
            result = async {
                let (status, _, stderr) = tokio::join!(
                    child.wait(),
                    async {
                        if let Some(h) = stdout_handle {
                            forward_lines(BufReader::new(h), &lines).await;
                        }
                    },
                    async {
                        let mut buf = Vec::new();
                        if let Some(ref mut h) = stderr_handle {
                            let _ = h.read_to_end(&mut buf).await;
                        }
                        buf
                    },
                );
                let exit_code = status?.code().unwrap_or(-1);
                if exit_code != 0 {
                    return Err(EngineError::ExitCode {
                        command: "apply".to_string(),
                        exit_code,
                        stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
                    });
                }
                Ok(())
            } => result,
            () = cancel.cancelled() => {
                terminate_group(pid);
                let _ = child.kill().await;
                warn!("Terraform apply cancelled");
                Err(EngineError::Cancelled("apply".to_string()))
            }
        }
    }

    async fn destroy(&self, cancel: &CancellationToken) -> Result<()> {
        self.run(
            "destroy",
            &["destroy", "-no-color", "-input=false", "-auto-approve"],
            cancel,
        )
        .await?;
        Ok(())
    }

    async fn force_unlock(&self, cancel: &CancellationToken, lock_id: &str) -> Result<()> {
        self.run("force-unlock", &["force-unlock", "-force", lock_id], cancel)
            .await?;
        info!(lock_id = lock_id, "Terraform state lock released");
        Ok(())
    }

    async fn output(&self, cancel: &CancellationToken) -> Result<BTreeMap<String, OutputValue>> {
        let stdout = self
            .run("output", &["output", "-json", "-no-color"], cancel)
            .await?;
        if stdout.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&stdout)?)
    }
}

/// Forward every stdout line to `lines` until end of stream.
///
/// The pipe is always drained to the end so the child never dies on a closed
/// stdout. A gone receiver only stops forwarding.
async fn forward_lines<R: AsyncBufRead + Unpin>(mut reader: R, lines: &mpsc::Sender<String>) {
    let mut buf = Vec::new();
    loop {
        match read_lossy_line(&mut reader, &mut buf).await {
            Ok(Some(line)) => {
                let _ = lines.send(line).await;
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read apply output, discarding the rest");
                let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                break;
            }
        }
    }
}

/// Check that the terraform binary can be executed.
pub async fn check_installed(binary: &Path) -> Result<String> {
    let output = Command::new(binary)
        .args(["version", "-json"])
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|_| EngineError::NotInstalled(binary.display().to_string()))?;
    if !output.status.success() {
        return Err(EngineError::NotInstalled(binary.display().to_string()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let version = serde_json::from_str::<serde_json::Value>(&stdout)
        .ok()
        .and_then(|v| v["terraform_version"].as_str().map(str::to_string))
        .unwrap_or_else(|| stdout.lines().next().unwrap_or_default().to_string());
    Ok(version)
}

/// Factory producing [`TerraformCli`] engines.
#[derive(Debug, Clone)]
pub struct TerraformCliFactory {
    binary: PathBuf,
}

impl TerraformCliFactory {
    /// Create a factory for the given binary.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for TerraformCliFactory {
    fn default() -> Self {
        Self::new(DEFAULT_BINARY)
    }
}

impl EngineFactory for TerraformCliFactory {
    fn create(&self, work_dir: &Path, env: &BTreeMap<String, String>) -> Arc<dyn Engine> {
        Arc::new(
            TerraformCli::new(work_dir)
                .with_binary(&self.binary)
                .with_env(env.clone()),
        )
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Write an executable shell script standing in for terraform.
    fn fake_terraform(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("terraform");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn engine(bin_dir: &TempDir, work_dir: &TempDir, body: &str) -> TerraformCli {
        let binary = fake_terraform(bin_dir.path(), body);
        TerraformCli::new(work_dir.path()).with_binary(binary)
    }

    #[tokio::test]
    async fn test_plan_maps_detailed_exit_codes() {
        let bin = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let cancel = CancellationToken::new();

        let no_changes = engine(&bin, &work, "exit 0");
        assert!(!no_changes.plan(&cancel).await.unwrap());

        let changes = engine(
            &bin,
            &work,
            r#"case "$1" in
  plan) exit 2 ;;
  show) echo "Plan: 1 to add, 0 to change, 0 to destroy." ;;
esac"#,
        );
        let output = changes.plan_with_output(&cancel).await.unwrap();
        assert!(output.has_changes);
        assert!(output.text.contains("Plan: 1 to add"));
    }

    #[tokio::test]
    async fn test_failure_carries_exit_code_and_stderr() {
        let bin = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let engine = engine(&bin, &work, "echo 'bad config' >&2; exit 1");

        let err = engine.init(&CancellationToken::new()).await.unwrap_err();
        match err {
            EngineError::ExitCode {
                command,
                exit_code,
                stderr,
            } => {
                assert_eq!(command, "init");
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "bad config");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_env_is_passed_to_child() {
        let bin = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let mut env = BTreeMap::new();
        env.insert("TF_VAR_region".to_string(), "europe-west1".to_string());
        let engine = engine(
            &bin,
            &work,
            r#"echo "{\"region\":{\"value\":\"$TF_VAR_region\",\"sensitive\":false}}""#,
        )
        .with_env(env);

        let outputs = engine.output(&CancellationToken::new()).await.unwrap();
        assert_eq!(outputs["region"].value, "europe-west1");
        assert!(!outputs["region"].sensitive);
    }

    #[tokio::test]
    async fn test_apply_streaming_forwards_lines() {
        let bin = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let engine = engine(&bin, &work, "echo line-one; echo line-two");
        let (tx, mut rx) = mpsc::channel(16);

        engine
            .apply_streaming(&CancellationToken::new(), tx)
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), "line-one");
        assert_eq!(rx.recv().await.unwrap(), "line-two");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_apply_streaming_survives_invalid_utf8() {
        let bin = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let engine = engine(
            &bin,
            &work,
            r#"printf 'bad \377 line\n'
i=0
while [ $i -lt 200 ]; do
  printf '%01000d\n' 0
  i=$((i+1))
done
echo '{"type":"after"}'"#,
        );
        let (tx, mut rx) = mpsc::channel(16);
        let collector = tokio::spawn(async move {
            let mut received = Vec::new();
            while let Some(line) = rx.recv().await {
                received.push(line);
            }
            received
        });

        engine
            .apply_streaming(&CancellationToken::new(), tx)
            .await
            .unwrap();

        let received = collector.await.unwrap();
        assert_eq!(received.len(), 202);
        assert_eq!(received[0], "bad \u{fffd} line");
        assert_eq!(received[201], r#"{"type":"after"}"#);
    }

    #[tokio::test]
    async fn test_cancel_terminates_run() {
        let bin = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let engine = engine(&bin, &work, "sleep 30");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = engine.apply(&cancel).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled(ref c) if c == "apply"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_installed() {
        let work = TempDir::new().unwrap();
        let engine = TerraformCli::new(work.path()).with_binary("/nonexistent/terraform");
        let err = engine.init(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotInstalled(_)));

        let err = check_installed(Path::new("/nonexistent/terraform"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotInstalled(_)));
    }

    #[tokio::test]
    async fn test_check_installed_reads_version() {
        let bin = TempDir::new().unwrap();
        let binary = fake_terraform(bin.path(), r#"echo '{"terraform_version":"1.9.5"}'"#);
        assert_eq!(check_installed(&binary).await.unwrap(), "1.9.5");
    }
}
