// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Approval-gated cloud node provisioning.
//!
//! One call drives a Provision Request through
//! `planning → awaiting_approval → applying → completed`. Nothing is
//! committed and nothing is applied before the approver says yes; any
//! failure marks the request `failed` and is reported over the session.
//!
//! ```text
//!  render ─► init ─► plan ─► send_plan ─► wait_for_approval
//!                                              │ approved
//!                                              ▼
//!              complete ◄─ node rows ◄─ apply ◄─ commit
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use serde_json::{Value, json};
use stolos_gitops::CommitOutcome;
use stolos_terraform::{
    Engine, EngineFactory, OutputValue, ResourceTracker, TemplateRenderer, Workspace,
    parse_plan_json,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::DEFAULT_APPROVAL_TIMEOUT;
use crate::error::{Error, Result};
use crate::gitops::GitOpsSource;
use crate::infrastructure::{
    NODE_ARCH, fetch_provider_files, node_image, render_node_module, scratch_dir,
};
use crate::machine_config::{DEFAULT_INSTALL_DISK, patch_machine_config};
use crate::models::{
    Cluster, GcpNodeProvisionRequest, NewNode, NodeRole, NodeStatus, ProvisionRequest,
    ProvisionStatus, labels_to_map, node_labels,
};
use crate::naming::{next_node_number, sanitize_name};
use crate::provider::CloudProvider;
use crate::session::ApprovalSession;
use crate::store::Store;

/// Buffered engine lines between the apply process and the tracker.
const APPLY_CHANNEL_CAPACITY: usize = 256;

/// What a completed provisioning run produced.
#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    /// Provision Request id
    pub request_id: Uuid,
    /// Created or reprovisioned nodes
    pub node_ids: Vec<Uuid>,
    /// Human-readable plan
    pub plan: String,
    /// Apply log
    pub apply: String,
}

/// Exclusive right to run one Provision Request in this process.
///
/// Released on drop.
#[derive(Debug)]
pub struct RunClaim {
    runs: Arc<DashSet<Uuid>>,
    request_id: Uuid,
}

impl RunClaim {
    /// Claimed request.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.runs.remove(&self.request_id);
    }
}

/// Runs provisioning workflows for one cloud provider.
pub struct ProvisioningService {
    runs: Arc<DashSet<Uuid>>,
    store: Arc<dyn Store>,
    provider: Arc<dyn CloudProvider>,
    gitops: Arc<dyn GitOpsSource>,
    engines: Arc<dyn EngineFactory>,
    renderer: TemplateRenderer,
    approval_timeout: Duration,
}

impl ProvisioningService {
    /// Create a service with the default approval timeout.
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn CloudProvider>,
        gitops: Arc<dyn GitOpsSource>,
        engines: Arc<dyn EngineFactory>,
        renderer: TemplateRenderer,
    ) -> Self {
        Self {
            runs: Arc::new(DashSet::new()),
            store,
            provider,
            gitops,
            engines,
            renderer,
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
        }
    }

    /// How long to wait for the approver.
    ///
    /// Default: 30 minutes
    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    /// Validate `request` and record it in `planning`.
    pub async fn create_request(
        &self,
        request: &GcpNodeProvisionRequest,
    ) -> Result<ProvisionRequest> {
        request.validate()?;
        let created = self
            .store
            .create_provision_request(self.provider.kind(), &serde_json::to_value(request)?)
            .await?;
        info!(request_id = %created.id, nodes = request.number, "Provision request created");
        Ok(created)
    }

    /// Claim `request_id` for one run. Fails while another run holds it.
    pub fn claim(&self, request_id: Uuid) -> Result<RunClaim> {
        if !self.runs.insert(request_id) {
            return Err(Error::InvalidState(format!(
                "provision request {} is already running",
                request_id
            )));
        }
        Ok(RunClaim {
            runs: self.runs.clone(),
            request_id,
        })
    }

    /// Whether a run currently holds `request_id`.
    pub fn is_running(&self, request_id: Uuid) -> bool {
        self.runs.contains(&request_id)
    }

    /// Claim and run a stored request that has not started yet.
    pub async fn run_request(
        &self,
        request_id: Uuid,
        session: Arc<ApprovalSession>,
        cancel: &CancellationToken,
    ) -> Result<ProvisionOutcome> {
        let claim = self.claim(request_id)?;
        self.run_claimed(claim, session, cancel).await
    }

    /// Run a stored request under an existing claim.
    ///
    /// A request that is no longer `planning` is refused without touching
    /// its stored state.
    pub async fn run_claimed(
        &self,
        claim: RunClaim,
        session: Arc<ApprovalSession>,
        cancel: &CancellationToken,
    ) -> Result<ProvisionOutcome> {
        let request_id = claim.request_id();
        let stored = self
            .store
            .get_provision_request(request_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("provision request {}", request_id)))?;
        if stored.status != ProvisionStatus::Planning {
            return Err(Error::InvalidState(format!(
                "provision request {} is {}",
                request_id, stored.status
            )));
        }
        let request: GcpNodeProvisionRequest = serde_json::from_value(stored.request)?;
        self.drive(&claim, &request, session, cancel).await
    }

    /// Drive one request to `completed` or `failed`.
    pub async fn provision(
        &self,
        request_id: Uuid,
        request: &GcpNodeProvisionRequest,
        session: Arc<ApprovalSession>,
        cancel: &CancellationToken,
    ) -> Result<ProvisionOutcome> {
        let claim = self.claim(request_id)?;
        self.drive(&claim, request, session, cancel).await
    }

    async fn drive(
        &self,
        claim: &RunClaim,
        request: &GcpNodeProvisionRequest,
        session: Arc<ApprovalSession>,
        cancel: &CancellationToken,
    ) -> Result<ProvisionOutcome> {
        let request_id = claim.request_id();
        match self.execute(request_id, request, &session, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let message = e.to_string();
                error!(request_id = %request_id, error = %message, "Provisioning failed");
                if let Err(db) = self.store.fail_provision_request(request_id, &message).await {
                    error!(
                        request_id = %request_id,
                        error = %db,
                        "Failed to mark provision request failed"
                    );
                }
                session.send_status(ProvisionStatus::Failed.as_str());
                session.send_error(&message);
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        request_id: Uuid,
        request: &GcpNodeProvisionRequest,
        session: &Arc<ApprovalSession>,
        cancel: &CancellationToken,
    ) -> Result<ProvisionOutcome> {
        let role = request.validate()?;
        session.send_status(ProvisionStatus::Planning.as_str());

        if !self.provider.is_configured() {
            return Err(Error::Configuration(format!(
                "{} provider is not configured",
                self.provider.provider_name()
            )));
        }
        let cluster = self
            .store
            .get_cluster()
            .await?
            .ok_or_else(|| Error::NotFound("cluster is not initialized".to_string()))?;
        let base_config = cluster.machine_config(role).ok_or_else(|| {
            Error::Configuration(format!("cluster has no {} machine configuration", role))
        })?;
        let image = node_image(self.provider.as_ref())?;
        let committer = self.gitops.committer().await?;
        let provider_name = self.provider.provider_name();

        let names = self.node_names(request).await?;
        info!(request_id = %request_id, nodes = ?names, "Planning node provisioning");
        session.send_log(&format!(
            "Provisioning {} node(s): {}",
            names.len(),
            names.join(", ")
        ));

        let scratch = scratch_dir("stolos-provision-")?;
        let engine = self
            .engines
            .create(scratch.path(), &self.provider.engine_env());
        let workspace = Workspace::new(scratch.path(), self.renderer.clone(), engine.clone());

        let labels = node_labels(self.provider.kind(), role, &request.labels);
        let label_map = labels_to_map(&labels);
        let mut config_objects = Vec::with_capacity(names.len());
        for name in &names {
            let config = patch_machine_config(base_config, name, DEFAULT_INSTALL_DISK, &label_map)?;
            let object = self
                .provider
                .upload_machine_config(name, config.as_bytes())
                .await?;
            session.send_log(&format!("Uploaded machine configuration for {}", name));
            config_objects.push(object);
        }

        render_node_module(&workspace, provider_name, &cluster.name, &image)?;
        let repo_dir = committer.config().working_path(&[provider_name]);
        fetch_provider_files(&committer, &repo_dir, &workspace, true).await?;

        let bucket = self.provider.backend_config().bucket;
        let timestamp = chrono::Utc::now().to_rfc3339();
        for (name, object) in names.iter().zip(&config_objects) {
            let context = json!({
                "Name": name,
                "Timestamp": timestamp,
                "BucketName": bucket,
                "ConfigObject": object,
                "ClusterName": cluster.name,
                "MachineType": request.machine_type,
                "Zone": request.zone,
                "Region": self.provider.region(),
                "Role": role.as_str(),
                "Architecture": NODE_ARCH,
                "DiskSizeGB": request.disk_size_gb,
                "DiskType": request.disk_type,
            });
            workspace.render_template_to_file(
                &format!("{}/node.tf.j2", provider_name),
                &context,
                &format!("node-{}.tf", name),
            )?;
        }

        session.send_log("Initializing infrastructure engine");
        engine.init(cancel).await?;
        session.send_log("Planning changes");
        let plan = engine.plan_with_output(cancel).await?;
        workspace.write_file(&format!("plans/plan-{}.txt", request_id), plan.text.as_bytes())?;

        let mut tracker = ResourceTracker::new(session.clone());
        tracker.initialize_with_plan(parse_plan_json(&engine.plan_json(cancel).await?)?);
        tracker.emit_snapshot();

        self.store.set_plan_output(request_id, &plan.text).await?;
        session.send_log(&plan_summary(plan.has_changes, names.len()));
        session.send_plan(&plan.text);

        self.transition(
            request_id,
            ProvisionStatus::AwaitingApproval,
            &[ProvisionStatus::Planning],
        )
        .await?;
        session.send_status(ProvisionStatus::AwaitingApproval.as_str());
        session.send_approval_request(&format!(
            "Ready to create {} node(s). Please review the plan and approve to continue.",
            names.len()
        ));
        info!(request_id = %request_id, "Waiting for approval");

        let decision = session
            .wait_for_approval(self.approval_timeout, cancel)
            .await?;
        if !decision.approved {
            info!(request_id = %request_id, reason = %decision.message, "Provisioning rejected");
            return Err(Error::Rejected(format!(
                "provisioning rejected: {}",
                decision.message
            )));
        }
        session.send_log("Plan approved");

        let message = format!("Add node configurations: [{}]", names.join(", "));
        match committer
            .commit_directory(scratch.path(), "tf", &repo_dir, &message)
            .await?
        {
            CommitOutcome::Committed { sha } => {
                info!(request_id = %request_id, sha = %sha, "Node configuration committed");
                session.send_log(&format!("Committed node configuration ({})", sha));
            }
            CommitOutcome::NoChanges => {
                session.send_log("Node configuration already committed");
            }
        }

        self.transition(
            request_id,
            ProvisionStatus::Applying,
            &[ProvisionStatus::AwaitingApproval],
        )
        .await?;
        session.send_status(ProvisionStatus::Applying.as_str());
        let apply = apply_with_tracking(engine.as_ref(), &mut tracker, cancel).await?;
        tracker.emit_snapshot();

        let outputs = engine.output(cancel).await?;
        let node_ids = self
            .record_nodes(&cluster, role, &labels, &names, &outputs, session)
            .await?;

        if !self
            .store
            .complete_provision_request(request_id, &node_ids)
            .await?
        {
            return Err(Error::InvalidState(format!(
                "provision request {} is no longer applying",
                request_id
            )));
        }
        info!(request_id = %request_id, nodes = node_ids.len(), "Provisioning completed");
        session.send_complete(json!({
            "node_ids": node_ids,
            "nodes_count": node_ids.len(),
            "plan": plan.text,
            "apply": apply,
        }));
        session.send_status(ProvisionStatus::Completed.as_str());

        Ok(ProvisionOutcome {
            request_id,
            node_ids,
            plan: plan.text,
            apply,
        })
    }

    async fn node_names(&self, request: &GcpNodeProvisionRequest) -> Result<Vec<String>> {
        let prefix = sanitize_name(&request.name_prefix);
        let existing = self.store.list_nodes(None, 0, None).await?;
        let next = next_node_number(&prefix, existing.iter().map(|n| n.name.as_str()));
        Ok((0..request.number)
            .map(|i| sanitize_name(&format!("{}-{}", prefix, next + i)))
            .collect())
    }

    async fn transition(
        &self,
        request_id: Uuid,
        to: ProvisionStatus,
        from: &[ProvisionStatus],
    ) -> Result<()> {
        if self
            .store
            .update_provision_status(request_id, to, from)
            .await?
        {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "provision request {} cannot move to {}",
                request_id, to
            )))
        }
    }

    async fn record_nodes(
        &self,
        cluster: &Cluster,
        role: NodeRole,
        labels: &[String],
        names: &[String],
        outputs: &BTreeMap<String, OutputValue>,
        session: &ApprovalSession,
    ) -> Result<Vec<Uuid>> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let info = outputs.get(&format!("{}_info", name)).map(|o| &o.value);
            if info.is_none() {
                warn!(node = %name, "No instance output for node");
            }
            let field = |key: &str| info.and_then(|v| v.get(key)).and_then(scalar_string);
            let instance_id = field("instance_id");
            let internal_ip = field("internal_ip");

            match self.store.find_node_by_name(name).await? {
                Some(existing) if existing.status == NodeStatus::Active => {
                    warn!(node = %name, "Node is already active, leaving it untouched");
                    session.send_log(&format!("Node {} is already active, skipped", name));
                }
                Some(existing) => {
                    self.store
                        .reprovision_node(
                            existing.id,
                            instance_id.as_deref(),
                            internal_ip.as_deref(),
                        )
                        .await?;
                    ids.push(existing.id);
                }
                None => {
                    let node = self
                        .store
                        .create_node(NewNode {
                            name: name.clone(),
                            status: NodeStatus::Provisioning,
                            role: Some(role),
                            labels: labels.to_vec(),
                            architecture: NODE_ARCH.to_string(),
                            provider: self.provider.kind(),
                            ip_address: internal_ip,
                            mac_address: None,
                            instance_id,
                            cluster_id: Some(cluster.id),
                        })
                        .await?;
                    ids.push(node.id);
                }
            }
        }
        Ok(ids)
    }
}

/// Run a streaming apply while feeding every line to `tracker`. Returns the
/// engine's human-readable messages.
async fn apply_with_tracking(
    engine: &dyn Engine,
    tracker: &mut ResourceTracker,
    cancel: &CancellationToken,
) -> Result<String> {
    let (tx, mut rx) = mpsc::channel::<String>(APPLY_CHANNEL_CAPACITY);
    let mut log = Vec::new();
    let consume = async {
        while let Some(line) = rx.recv().await {
            if let Some(message) = event_message(&line) {
                log.push(message);
            }
            tracker.handle_line(&line);
        }
    };
    let (applied, ()) = tokio::join!(engine.apply_streaming(cancel, tx), consume);
    applied?;
    Ok(log.join("\n"))
}

fn event_message(line: &str) -> Option<String> {
    let event: Value = serde_json::from_str(line).ok()?;
    event.get("@message")?.as_str().map(String::from)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn plan_summary(has_changes: bool, nodes: usize) -> String {
    if has_changes {
        format!("Terraform plan completed\nPlan: {} node(s) to add", nodes)
    } else {
        "Terraform plan completed\nNo changes detected".to_string()
    }
}
