// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stolos Terraform - infrastructure engine executor
//!
//! Runs the declarative-infrastructure engine against a scratch working
//! directory and reports structured progress.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐   render    ┌──────────────────────────┐
//! │  TemplateRenderer   │────────────►│   Workspace (work dir)   │
//! │  (minijinja, strict)│             └────────────┬─────────────┘
//! └─────────────────────┘                          │ dyn Engine
//!                                   ┌──────────────┴──────────────┐
//!                                   ▼                             ▼
//!                          ┌─────────────────┐           ┌─────────────────┐
//!                          │  TerraformCli   │           │   MockEngine    │
//!                          │ (process group) │           │    (tests)      │
//!                          └────────┬────────┘           └─────────────────┘
//!                                   │ apply -json lines
//!                                   ▼
//!                          ┌─────────────────┐  resource_update / workflow_update
//!                          │ ResourceTracker │──────────────► ProgressSink
//!                          └─────────────────┘
//! ```
//!
//! Plans are always produced before anything is applied: `plan_with_output`
//! saves the plan to `tfplan.out`, and `apply` applies exactly that file.
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TERRAFORM_BIN` | `terraform` | Engine binary, resolved from `PATH` |
//! | `TERRAFORM_TEMPLATES_DIR` | `terraform-templates` | Template base directory |

#![deny(missing_docs)]

/// Subprocess engine.
pub mod cli;
/// Engine trait.
pub mod engine;
/// Error types.
pub mod error;
/// Mock engine for testing.
pub mod mock;
/// Plan JSON parsing.
pub mod plan;
/// Template rendering.
pub mod template;
/// Apply event tracking.
pub mod tracker;
/// Working directory bundle.
pub mod workspace;

pub use cli::{TerraformCli, TerraformCliFactory, check_installed};
pub use engine::{Engine, EngineFactory, OutputValue, PLAN_FILE, PlanOutput};
pub use error::{EngineError, Result, TemplateError};
pub use mock::{MockEngine, MockEngineFactory};
pub use plan::parse_plan_json;
pub use template::TemplateRenderer;
pub use tracker::{
    ProgressSink, ResourceAction, ResourceStatus, ResourceTracker, ResourceUpdate, WorkflowUpdate,
};
pub use workspace::Workspace;
