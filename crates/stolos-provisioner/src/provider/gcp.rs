// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Google Cloud provider.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::GcpConfig;
use crate::error::{Error, Result};
use crate::models::ProviderKind;
use crate::provider::{BackendConfig, CloudProvider, NodeImage, ObjectStore};

/// Prefix of machine configuration objects in the state bucket.
pub const MACHINE_CONFIG_PREFIX: &str = "talos-configs";

/// Google Cloud inputs plus the storage used for machine configurations.
pub struct GcpProvider {
    config: GcpConfig,
    storage: Arc<dyn ObjectStore>,
}

impl GcpProvider {
    /// Create a provider.
    pub fn new(config: GcpConfig, storage: Arc<dyn ObjectStore>) -> Self {
        Self { config, storage }
    }

    /// Provider inputs.
    pub fn config(&self) -> &GcpConfig {
        &self.config
    }
}

#[async_trait]
impl CloudProvider for GcpProvider {
    fn provider_name(&self) -> &str {
        "gcp"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gcp
    }

    fn region(&self) -> &str {
        &self.config.region
    }

    fn is_configured(&self) -> bool {
        !self.config.project_id.is_empty() && self.config.service_account_json.is_some()
    }

    fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            bucket: self.config.state_bucket.clone(),
            prefix: "terraform/state".to_string(),
        }
    }

    fn engine_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("GOOGLE_PROJECT".to_string(), self.config.project_id.clone());
        env.insert("GOOGLE_REGION".to_string(), self.config.region.clone());
        if let Some(credentials) = &self.config.service_account_json {
            env.insert("GOOGLE_CREDENTIALS".to_string(), credentials.clone());
        }
        env
    }

    fn node_image(&self, arch: &str) -> Option<NodeImage> {
        let name = match arch {
            "arm64" => &self.config.talos_image_arm64,
            _ => &self.config.talos_image_amd64,
        };
        (!name.is_empty()).then(|| NodeImage {
            project: self.config.talos_image_project.clone(),
            name: name.clone(),
        })
    }

    fn template_context(&self) -> Map<String, Value> {
        let backend = self.backend_config();
        let mut ctx = Map::new();
        ctx.insert("ProjectID".into(), Value::from(self.config.project_id.clone()));
        ctx.insert("Region".into(), Value::from(self.config.region.clone()));
        ctx.insert("BucketName".into(), Value::from(backend.bucket));
        ctx.insert("StatePrefix".into(), Value::from(backend.prefix));
        ctx
    }

    async fn upload_machine_config(&self, node_name: &str, content: &[u8]) -> Result<String> {
        if self.config.state_bucket.is_empty() {
            return Err(Error::Configuration("GCP state bucket is not set".to_string()));
        }
        let object = format!("{}/{}.yaml", MACHINE_CONFIG_PREFIX, node_name);
        self.storage
            .put_object(&self.config.state_bucket, &object, content, "application/x-yaml")
            .await?;
        Ok(object)
    }
}
