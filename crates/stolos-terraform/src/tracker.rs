// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource tracker.
//!
//! Turns the line-delimited JSON event stream of `terraform apply -json`
//! into one [`ResourceUpdate`] per managed resource.
//!
//! ```text
//! plan JSON ──► initialize_with_plan ──► resources (pending)
//!                                             │
//! apply -json ─► handle_line ─┬─ apply_start ──► creating/modifying/deleting
//!                             ├─ apply_complete ► complete (+duration)
//!                             ├─ apply_errored ─► failed (+error)
//!                             ├─ diagnostic ───► log (+error on resource)
//!                             └─ outputs ──────► workflow outputs
//!                                             │
//!                            ProgressSink ◄───┘ resource_update / workflow_update
//! ```
//!
//! Lines that are not JSON are skipped. Data-source addresses never produce
//! an update.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Planned change for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceAction {
    /// Resource will be created.
    Create,
    /// Resource will be updated in place.
    Update,
    /// Resource will be destroyed.
    Delete,
    /// Resource will be destroyed and re-created.
    Replace,
}

/// Lifecycle status of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Planned, not started.
    Pending,
    /// Being created (or replaced).
    Creating,
    /// Being updated in place.
    Modifying,
    /// Being destroyed.
    Deleting,
    /// Finished successfully.
    Complete,
    /// Finished with an error.
    Failed,
    /// Not touched by this run.
    Skipped,
}

impl ResourceStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Creating => "creating",
            Self::Modifying => "modifying",
            Self::Deleting => "deleting",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// One engine-managed resource during a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUpdate {
    /// Engine address, e.g. `module.node_worker_1.google_compute_instance.node`.
    pub id: String,
    /// Last address segment.
    pub name: String,
    /// Resource type.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Provider derived from the type prefix.
    pub provider: String,
    /// Planned action.
    pub action: ResourceAction,
    /// Current status.
    pub status: ResourceStatus,
    /// When the engine started working on the resource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the resource completed or failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Whole seconds between start and completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
    /// `summary[: detail]` of the failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Extra fields from the plan (zone, machine type, ...).
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl ResourceUpdate {
    /// Minimal record for an address the plan did not mention.
    fn synthesized(addr: &str, resource_type: &str) -> Self {
        Self {
            id: addr.to_string(),
            name: resource_name(addr),
            resource_type: resource_type.to_string(),
            provider: provider_from_type(resource_type),
            action: ResourceAction::Create,
            status: ResourceStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_secs: None,
            error: None,
            details: Map::new(),
        }
    }

    fn finish(&mut self, status: ResourceStatus, at: DateTime<Utc>) {
        let started = *self.started_at.get_or_insert(at);
        // Clock skew between lines must not produce a negative duration.
        let completed = at.max(started);
        self.completed_at = Some(completed);
        self.status = status;
        let millis = (completed - started).num_milliseconds();
        self.duration_secs = Some((millis + 500) / 1000);
    }
}

/// Aggregate view of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowUpdate {
    /// Every tracked resource, ordered by address.
    pub resources: Vec<ResourceUpdate>,
    /// Resource count per status.
    pub summary: BTreeMap<String, usize>,
    /// Outputs reported by the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Map<String, Value>>,
}

/// Receiver of tracker progress.
pub trait ProgressSink: Send + Sync {
    /// One resource changed.
    fn resource_update(&self, update: &ResourceUpdate);

    /// Full snapshot.
    fn workflow_update(&self, update: &WorkflowUpdate);

    /// Free-form log line.
    fn log(&self, message: &str);
}

/// Whether `addr` names a data source rather than a managed resource.
pub fn is_data_source(addr: &str) -> bool {
    addr.starts_with("data.") || addr.contains(".data.")
}

/// Provider part of a resource type (`google_compute_instance` → `google`).
pub fn provider_from_type(resource_type: &str) -> String {
    match resource_type.split('_').next() {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => "unknown".to_string(),
    }
}

fn resource_name(addr: &str) -> String {
    addr.rsplit('.').next().unwrap_or(addr).to_string()
}

#[derive(Debug, Deserialize)]
struct EventLine {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(rename = "@timestamp", default)]
    timestamp: Option<String>,
    #[serde(default)]
    hook: Option<Value>,
    #[serde(default)]
    diagnostic: Option<Diagnostic>,
    #[serde(default)]
    outputs: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct Diagnostic {
    #[serde(default)]
    severity: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    detail: String,
    #[serde(default)]
    address: Option<String>,
}

impl Diagnostic {
    fn message(&self) -> String {
        if self.detail.is_empty() {
            self.summary.clone()
        } else {
            format!("{}: {}", self.summary, self.detail)
        }
    }
}

impl EventLine {
    fn at(&self) -> DateTime<Utc> {
        self.timestamp
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now)
    }

    /// `(addr, type)` of the hook resource.
    fn resource(&self) -> Option<(&str, &str)> {
        let resource = self.hook.as_ref()?.get("resource")?;
        let addr = resource.get("addr")?.as_str()?;
        let resource_type = resource
            .get("resource_type")
            .or_else(|| resource.get("type"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        Some((addr, resource_type))
    }
}

/// Tracks resources of one workflow and reports progress to a sink.
pub struct ResourceTracker {
    sink: Arc<dyn ProgressSink>,
    resources: BTreeMap<String, ResourceUpdate>,
    outputs: Option<Map<String, Value>>,
}

impl ResourceTracker {
    /// Create an empty tracker reporting to `sink`.
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            resources: BTreeMap::new(),
            outputs: None,
        }
    }

    /// Seed the tracker with the planned resources.
    pub fn initialize_with_plan(&mut self, planned: Vec<ResourceUpdate>) {
        for resource in planned {
            self.resources.insert(resource.id.clone(), resource);
        }
    }

    /// Tracked resource by address.
    pub fn get(&self, addr: &str) -> Option<&ResourceUpdate> {
        self.resources.get(addr)
    }

    /// Outputs captured from the stream, if any.
    pub fn outputs(&self) -> Option<&Map<String, Value>> {
        self.outputs.as_ref()
    }

    /// Current aggregate view.
    pub fn snapshot(&self) -> WorkflowUpdate {
        let mut summary = BTreeMap::new();
        for resource in self.resources.values() {
            *summary.entry(resource.status.as_str().to_string()).or_insert(0) += 1;
        }
        WorkflowUpdate {
            resources: self.resources.values().cloned().collect(),
            summary,
            outputs: self.outputs.clone(),
        }
    }

    /// Send the current snapshot to the sink.
    pub fn emit_snapshot(&self) {
        self.sink.workflow_update(&self.snapshot());
    }

    /// Process one line of engine output.
    pub fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let event: EventLine = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "Skipping non-JSON engine line");
                return;
            }
        };

        match event.kind.as_str() {
            "apply_start" => {
                if let Some((addr, resource_type)) = event.resource() {
                    if !is_data_source(addr) {
                        self.start(addr, resource_type, event.at());
                    }
                }
            }
            "apply_complete" => {
                if let Some((addr, resource_type)) = event.resource() {
                    if !is_data_source(addr) {
                        self.complete(addr, resource_type, event.at());
                    }
                }
            }
            "apply_errored" => {
                if let Some((addr, resource_type)) = event.resource() {
                    if !is_data_source(addr) {
                        let error = event.diagnostic.as_ref().map(Diagnostic::message);
                        self.fail(addr, resource_type, error, event.at());
                    }
                }
            }
            "diagnostic" => {
                if let Some(diag) = &event.diagnostic {
                    if diag.severity == "error" {
                        warn!(summary = %diag.summary, "Engine reported an error");
                        self.sink.log(&format!("Error: {}", diag.summary));
                        if let Some(resource) = diag
                            .address
                            .as_deref()
                            .and_then(|addr| self.resources.get_mut(addr))
                        {
                            resource.error = Some(diag.message());
                            self.sink.resource_update(resource);
                        }
                    }
                }
            }
            "outputs" => {
                let outputs = event.outputs.clone().or_else(|| {
                    event
                        .hook
                        .as_ref()
                        .and_then(|h| h.get("outputs"))
                        .and_then(Value::as_object)
                        .cloned()
                });
                if let Some(outputs) = outputs {
                    self.outputs = Some(outputs);
                    self.emit_snapshot();
                }
            }
            _ => {}
        }
    }

    /// Read lines until end of stream, then emit a snapshot.
    ///
    /// Invalid UTF-8 is replaced rather than ending the scan.
    pub async fn process_reader<R: AsyncBufRead + Unpin>(
        &mut self,
        mut reader: R,
    ) -> std::io::Result<()> {
        let mut buf = Vec::new();
        while let Some(line) = read_lossy_line(&mut reader, &mut buf).await? {
            self.handle_line(&line);
        }
        self.emit_snapshot();
        Ok(())
    }

    /// Consume lines from a channel until all senders are gone, then emit a snapshot.
    pub async fn process_channel(&mut self, mut lines: mpsc::Receiver<String>) {
        while let Some(line) = lines.recv().await {
            self.handle_line(&line);
        }
        self.emit_snapshot();
    }

    fn entry(&mut self, addr: &str, resource_type: &str) -> &mut ResourceUpdate {
        self.resources
            .entry(addr.to_string())
            .or_insert_with(|| ResourceUpdate::synthesized(addr, resource_type))
    }

    fn start(&mut self, addr: &str, resource_type: &str, at: DateTime<Utc>) {
        let resource = self.entry(addr, resource_type);
        resource.status = match resource.action {
            ResourceAction::Delete => ResourceStatus::Deleting,
            ResourceAction::Update => ResourceStatus::Modifying,
            ResourceAction::Create | ResourceAction::Replace => ResourceStatus::Creating,
        };
        resource.started_at = Some(at);
        let update = resource.clone();
        self.sink.resource_update(&update);
    }

    fn complete(&mut self, addr: &str, resource_type: &str, at: DateTime<Utc>) {
        let resource = self.entry(addr, resource_type);
        resource.finish(ResourceStatus::Complete, at);
        let update = resource.clone();
        self.sink.resource_update(&update);
    }

    fn fail(&mut self, addr: &str, resource_type: &str, error: Option<String>, at: DateTime<Utc>) {
        let resource = self.entry(addr, resource_type);
        resource.finish(ResourceStatus::Failed, at);
        if error.is_some() {
            resource.error = error;
        }
        let update = resource.clone();
        self.sink.resource_update(&update);
    }
}

impl std::fmt::Debug for ResourceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTracker")
            .field("resources", &self.resources.len())
            .field("has_outputs", &self.outputs.is_some())
            .finish()
    }
}

/// Read one line into `buf`, replacing invalid UTF-8. `None` at end of stream.
pub(crate) async fn read_lossy_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf);
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    const INSTANCE_A: &str = "google_compute_instance.a";

    #[derive(Default)]
    struct RecordingSink {
        resources: Mutex<Vec<ResourceUpdate>>,
        workflows: Mutex<Vec<WorkflowUpdate>>,
        logs: Mutex<Vec<String>>,
    }

    impl ProgressSink for RecordingSink {
        fn resource_update(&self, update: &ResourceUpdate) {
            self.resources.lock().unwrap().push(update.clone());
        }
        fn workflow_update(&self, update: &WorkflowUpdate) {
            self.workflows.lock().unwrap().push(update.clone());
        }
        fn log(&self, message: &str) {
            self.logs.lock().unwrap().push(message.to_string());
        }
    }

    fn tracker() -> (Arc<RecordingSink>, ResourceTracker) {
        let sink = Arc::new(RecordingSink::default());
        let tracker = ResourceTracker::new(sink.clone());
        (sink, tracker)
    }

    fn planned(addr: &str, action: ResourceAction) -> ResourceUpdate {
        let mut r = ResourceUpdate::synthesized(addr, "google_compute_instance");
        r.action = action;
        r
    }

    fn hook_line(kind: &str, addr: &str, ts: &str) -> String {
        json!({
            "type": kind,
            "@timestamp": ts,
            "hook": { "resource": { "addr": addr, "resource_type": "google_compute_instance" } }
        })
        .to_string()
    }

    #[test]
    fn test_start_complete_computes_rounded_duration() {
        let (sink, mut tracker) = tracker();
        tracker.initialize_with_plan(vec![planned(INSTANCE_A, ResourceAction::Create)]);

        tracker.handle_line(&hook_line("apply_start", INSTANCE_A, "2025-01-01T10:00:00.000Z"));
        tracker.handle_line(&hook_line("apply_complete", INSTANCE_A, "2025-01-01T10:00:12.600Z"));

        let r = tracker.get(INSTANCE_A).unwrap();
        assert_eq!(r.status, ResourceStatus::Complete);
        assert_eq!(r.duration_secs, Some(13));
        assert!(r.completed_at.unwrap() >= r.started_at.unwrap());

        let statuses: Vec<_> = sink.resources.lock().unwrap().iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![ResourceStatus::Creating, ResourceStatus::Complete]);
    }

    #[test]
    fn test_start_status_follows_planned_action() {
        let (_sink, mut tracker) = tracker();
        tracker.initialize_with_plan(vec![
            planned("x.del", ResourceAction::Delete),
            planned("x.upd", ResourceAction::Update),
            planned("x.rep", ResourceAction::Replace),
        ]);
        for addr in ["x.del", "x.upd", "x.rep"] {
            tracker.handle_line(&hook_line("apply_start", addr, "2025-01-01T10:00:00Z"));
        }
        assert_eq!(tracker.get("x.del").unwrap().status, ResourceStatus::Deleting);
        assert_eq!(tracker.get("x.upd").unwrap().status, ResourceStatus::Modifying);
        assert_eq!(tracker.get("x.rep").unwrap().status, ResourceStatus::Creating);
    }

    #[test]
    fn test_data_sources_never_surface() {
        let (sink, mut tracker) = tracker();
        for (kind, addr) in [
            ("apply_start", "data.google_compute_image.talos"),
            ("apply_complete", "module.node.data.google_project.p"),
            ("apply_errored", "data.google_compute_zones.z"),
        ] {
            tracker.handle_line(&hook_line(kind, addr, "2025-01-01T10:00:01Z"));
        }

        assert!(sink.resources.lock().unwrap().is_empty());
        assert!(tracker.snapshot().resources.is_empty());
    }

    #[test]
    fn test_unknown_ids_are_tracked() {
        let (_sink, mut tracker) = tracker();
        tracker.handle_line(&hook_line(
            "apply_start",
            "module.extra.google_compute_disk.d",
            "2025-01-01T10:00:00Z",
        ));
        let r = tracker.get("module.extra.google_compute_disk.d").unwrap();
        assert_eq!(r.name, "d");
        assert_eq!(r.provider, "google");
        assert_eq!(r.status, ResourceStatus::Creating);

        tracker.handle_line(&hook_line(
            "apply_complete",
            "google_compute_disk.late",
            "2025-01-01T10:00:03Z",
        ));
        let late = tracker.get("google_compute_disk.late").unwrap();
        assert_eq!(late.status, ResourceStatus::Complete);
        assert_eq!(late.duration_secs, Some(0));
    }

    #[test]
    fn test_errored_carries_summary_and_detail() {
        let (_sink, mut tracker) = tracker();
        tracker.initialize_with_plan(vec![planned(INSTANCE_A, ResourceAction::Create)]);
        tracker.handle_line(&hook_line("apply_start", INSTANCE_A, "2025-01-01T10:00:00Z"));
        let line = json!({
            "type": "apply_errored",
            "@timestamp": "2025-01-01T10:00:05Z",
            "hook": { "resource": { "addr": INSTANCE_A } },
            "diagnostic": {
                "severity": "error",
                "summary": "Quota exceeded",
                "detail": "CPUS limit 8"
            }
        });
        tracker.handle_line(&line.to_string());

        let r = tracker.get(INSTANCE_A).unwrap();
        assert_eq!(r.status, ResourceStatus::Failed);
        assert_eq!(r.error.as_deref(), Some("Quota exceeded: CPUS limit 8"));
        assert_eq!(r.duration_secs, Some(5));
    }

    #[test]
    fn test_diagnostic_logs_and_attaches_error() {
        let (sink, mut tracker) = tracker();
        tracker.initialize_with_plan(vec![planned(INSTANCE_A, ResourceAction::Create)]);
        let line = json!({
            "type": "diagnostic",
            "diagnostic": { "severity": "error", "summary": "boom", "address": INSTANCE_A }
        });
        tracker.handle_line(&line.to_string());
        let warning = json!({
            "type": "diagnostic",
            "diagnostic": { "severity": "warning", "summary": "meh" }
        });
        tracker.handle_line(&warning.to_string());

        assert_eq!(*sink.logs.lock().unwrap(), vec!["Error: boom".to_string()]);
        assert_eq!(
            tracker.get(INSTANCE_A).unwrap().error.as_deref(),
            Some("boom")
        );
    }

    #[test]
    fn test_outputs_from_top_level_or_hook() {
        let (sink, mut tracker) = tracker();
        let top = json!({ "type": "outputs", "outputs": { "a": { "value": 1 } } });
        tracker.handle_line(&top.to_string());
        assert_eq!(tracker.outputs().unwrap()["a"]["value"], 1);

        let hooked = json!({ "type": "outputs", "hook": { "outputs": { "b": { "value": 2 } } } });
        tracker.handle_line(&hooked.to_string());
        assert!(tracker.outputs().unwrap().contains_key("b"));
        assert_eq!(sink.workflows.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_process_reader_skips_garbage_and_emits_snapshot() {
        let (sink, mut tracker) = tracker();
        tracker.initialize_with_plan(vec![
            planned(INSTANCE_A, ResourceAction::Create),
            planned("google_compute_instance.b", ResourceAction::Create),
        ]);
        let stream = format!(
            "{}\nthis is not json\n{{\"type\":\n\n{}\n",
            hook_line("apply_start", INSTANCE_A, "2025-01-01T10:00:00Z"),
            hook_line("apply_complete", INSTANCE_A, "2025-01-01T10:00:02Z"),
        );

        tracker.process_reader(stream.as_bytes()).await.unwrap();

        let workflows = sink.workflows.lock().unwrap();
        let last = workflows.last().unwrap();
        assert_eq!(last.resources.len(), 2);
        assert_eq!(last.summary["complete"], 1);
        assert_eq!(last.summary["pending"], 1);
    }

    #[tokio::test]
    async fn test_process_reader_survives_invalid_utf8() {
        let (sink, mut tracker) = tracker();
        tracker.initialize_with_plan(vec![planned(INSTANCE_A, ResourceAction::Create)]);
        let mut stream = b"bad \xff line\n".to_vec();
        stream.extend_from_slice(
            hook_line("apply_complete", INSTANCE_A, "2025-01-01T10:00:02Z").as_bytes(),
        );
        stream.push(b'\n');

        tracker.process_reader(stream.as_slice()).await.unwrap();

        assert_eq!(
            tracker.get(INSTANCE_A).unwrap().status,
            ResourceStatus::Complete
        );
        assert_eq!(sink.workflows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_read_lossy_line() {
        let mut reader: &[u8] = b"one\r\ntw\xffo\nthree";
        let mut buf = Vec::new();
        assert_eq!(read_lossy_line(&mut reader, &mut buf).await.unwrap().as_deref(), Some("one"));
        assert_eq!(
            read_lossy_line(&mut reader, &mut buf).await.unwrap().as_deref(),
            Some("tw\u{fffd}o")
        );
        assert_eq!(read_lossy_line(&mut reader, &mut buf).await.unwrap().as_deref(), Some("three"));
        assert_eq!(read_lossy_line(&mut reader, &mut buf).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_process_channel_until_closed() {
        let (sink, mut tracker) = tracker();
        let (tx, rx) = mpsc::channel(8);
        tx.send(hook_line("apply_start", INSTANCE_A, "2025-01-01T10:00:00Z"))
            .await
            .unwrap();
        drop(tx);

        tracker.process_channel(rx).await;
        assert_eq!(sink.resources.lock().unwrap().len(), 1);
        assert_eq!(sink.workflows.lock().unwrap().len(), 1);
    }
}
