// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cloud providers.
//!
//! Shared workflow code talks to a [`CloudProvider`]; supporting another
//! cloud means another implementation, never a branch on a provider tag.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::models::ProviderKind;

mod gcp;
mod gcs;

pub use gcp::GcpProvider;
pub use gcs::{GcsAuth, GcsClient, InMemoryObjectStore, ObjectStore, ServiceAccountKey};

/// Remote state location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendConfig {
    /// Bucket holding the state
    pub bucket: String,
    /// Object prefix inside the bucket
    pub prefix: String,
}

/// Node OS image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeImage {
    /// Project or registry the image lives in
    pub project: String,
    /// Image name
    pub name: String,
}

/// Capabilities a cloud provider offers the workflows.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Short name, also the template directory (`gcp`).
    fn provider_name(&self) -> &str;

    /// Provider tag stored on nodes.
    fn kind(&self) -> ProviderKind;

    /// Default region.
    fn region(&self) -> &str;

    /// Whether credentials and project are present.
    fn is_configured(&self) -> bool;

    /// Remote state location.
    fn backend_config(&self) -> BackendConfig;

    /// Environment for the infrastructure engine (credentials, project).
    fn engine_env(&self) -> BTreeMap<String, String>;

    /// Node OS image for `arch`.
    fn node_image(&self, arch: &str) -> Option<NodeImage>;

    /// Values every template of this provider may use.
    fn template_context(&self) -> serde_json::Map<String, serde_json::Value>;

    /// Store a rendered machine configuration where new instances can fetch
    /// it. Returns the object path.
    async fn upload_machine_config(&self, node_name: &str, content: &[u8]) -> Result<String>;
}
