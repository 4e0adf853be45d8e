// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stolos Provisioner - Kubernetes node provisioning
//!
//! This crate adds nodes to a Talos-based Kubernetes cluster. Cloud nodes go
//! through an approval-gated infrastructure run whose configuration is
//! committed to a GitOps repository. On-prem nodes announce themselves,
//! are registered as pending, and are provisioned with a patched machine
//! configuration. Periodic jobs keep node records in line with the cluster.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Web UI / node event listener                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                │ HTTP                          │ WebSocket (JSON frames)
//!                ▼                               ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  stolos-provisioner (This Crate)                         │
//! │                           Port 8080                                      │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌─────────────┐  │
//! │  │ Provisioning │  │Infrastructure│  │    Nodes /   │  │     Job     │  │
//! │  │   Service    │  │   Service    │  │  Event Sink  │  │  Scheduler  │  │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘  └──────┬──────┘  │
//! └─────────┼─────────────────┼─────────────────┼─────────────────┼─────────┘
//!           │                 │                 │                 │
//!           ▼                 ▼                 ▼                 ▼
//! ┌──────────────────┐ ┌──────────────┐ ┌──────────────────┐ ┌────────────┐
//! │ stolos-terraform │ │ stolos-gitops│ │  Node control    │ │ PostgreSQL │
//! │ (engine, tracker)│ │ (commits)    │ │  plane (:50000)  │ │            │
//! └──────────────────┘ └──────────────┘ └──────────────────┘ └────────────┘
//! ```
//!
//! # Provision Request State Machine
//!
//! ```text
//!   ┌──────────┐  plan ready  ┌───────────────────┐ approved ┌──────────┐
//!   │ PLANNING │─────────────►│ AWAITING_APPROVAL │─────────►│ APPLYING │
//!   └────┬─────┘              └─────────┬─────────┘          └────┬─────┘
//!        │                              │ rejected/timeout        │
//!        │ error                        ▼                         ├──────────┐
//!        └─────────────────────────►┌────────┐◄──────── error ────┘          │
//!                                   │ FAILED │                      ┌───────────┐
//!                                   └────────┘                      │ COMPLETED │
//!                                                                   └───────────┘
//! ```
//!
//! Nothing is committed to the repository and nothing is applied before an
//! explicit approval.
//!
//! # Node Status
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `pending` | On-prem node registered, not yet configured |
//! | `provisioning` | Machine configuration applied or instance created |
//! | `active` | Node reports running and ready |
//! | `failed` | Node was active but no longer reports ready |
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `STOLOS_DATABASE_URL` | Yes* | - | PostgreSQL connection string |
//! | `DATABASE_URL` | Yes* | - | Fallback if above not set |
//! | `DB_HOST`, `DB_PORT`, `DB_USER`, `DB_PASSWORD`, `DB_NAME` | Yes* | - | Used without a URL |
//! | `STOLOS_HTTP_PORT` | No | `8080` | HTTP/WebSocket port |
//! | `CLUSTER_NAME` | No | `stolos-cluster` | Cluster singleton name |
//! | `CLUSTER_CONTROLPLANE_CONFIG` | No | - | Base control-plane machine config file |
//! | `CLUSTER_WORKER_CONFIG` | No | - | Base worker machine config file |
//! | `TERRAFORM_BIN` | No | `terraform` | Infrastructure engine binary |
//! | `TERRAFORM_TEMPLATES_DIR` | No | `terraform-templates` | Template directory |
//! | `APPROVAL_TIMEOUT_SECS` | No | `1800` | Approval wait |
//! | `GCP_PROJECT_ID` | No | - | Cloud project |
//! | `GCP_REGION` | No | `us-central1` | Cloud region |
//! | `GCP_SERVICE_ACCOUNT_JSON` | No | - | Service account key |
//! | `GCP_STATE_BUCKET` | No | `{project}-stolos-state` | State and machine config bucket |
//! | `GITHUB_TOKEN` / `GITHUB_APP_*` | No | - | GitOps credentials |
//! | `GITHUB_REPO_OWNER`, `GITHUB_REPO_NAME` | No | - | GitOps repository |
//!
//! # Modules
//!
//! - [`provisioning`]: Approval-gated cloud node provisioning
//! - [`infrastructure`]: Base infrastructure initialize/destroy/status
//! - [`nodes`]: Node queries and on-prem provisioning
//! - [`eventsink`]: Auto-registration of announced nodes
//! - [`jobs`]: Periodic lifecycle reconciliation
//! - [`session`]: WebSocket client sessions
//! - [`server`]: HTTP/WebSocket surface
//! - [`runtime`]: Embeddable runtime

#![deny(missing_docs)]

/// Cluster singleton bootstrap.
pub mod cluster;

/// Server configuration loaded from environment variables.
pub mod config;

/// Node control-plane API.
pub mod controlplane;

/// PostgreSQL queries.
pub mod db;

/// Error types.
pub mod error;

/// Node event handling.
pub mod eventsink;

/// GitOps repository access.
pub mod gitops;

/// Base infrastructure lifecycle.
pub mod infrastructure;

/// Periodic node lifecycle jobs.
pub mod jobs;

/// Machine configuration patching.
pub mod machine_config;

/// Domain models.
pub mod models;

/// Node name helpers.
pub mod naming;

/// Node management.
pub mod nodes;

/// Cloud providers.
pub mod provider;

/// Cloud node provisioning workflow.
pub mod provisioning;

/// Embeddable runtime for stolos-provisioner.
pub mod runtime;

/// HTTP and WebSocket server.
pub mod server;

/// Client sessions.
pub mod session;

/// Persistence.
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use runtime::{ProvisionerRuntime, ProvisionerRuntimeBuilder};
