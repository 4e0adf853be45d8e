// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-namespace Argo CD manifests.
//!
//! Each namespace gets `namespaces/{ns}/applicationset.yaml`, which generates
//! one Application per directory under `namespaces/{ns}/apps/`.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::committer::{CommitOutcome, GitOpsCommitter};
use crate::error::Result;

/// Prefix of the Kubernetes namespace backing a stolos namespace.
pub const K8S_NAMESPACE_PREFIX: &str = "app-";
/// Root directory of namespace manifests.
pub const NAMESPACES_DIR: &str = "namespaces";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationSet {
    api_version: &'static str,
    kind: &'static str,
    metadata: Metadata,
    spec: ApplicationSetSpec,
}

#[derive(Debug, Serialize)]
struct Metadata {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApplicationSetSpec {
    generators: Vec<Generator>,
    template: ApplicationTemplate,
}

#[derive(Debug, Serialize)]
struct Generator {
    git: GitGenerator,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GitGenerator {
    #[serde(rename = "repoURL")]
    repo_url: String,
    revision: String,
    directories: Vec<DirectoryGenerator>,
}

#[derive(Debug, Serialize)]
struct DirectoryGenerator {
    path: String,
}

#[derive(Debug, Serialize)]
struct ApplicationTemplate {
    metadata: Metadata,
    spec: ApplicationSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationSpec {
    project: String,
    source: ApplicationSource,
    destination: ApplicationDestination,
    sync_policy: SyncPolicy,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationSource {
    #[serde(rename = "repoURL")]
    repo_url: String,
    target_revision: String,
    path: String,
}

#[derive(Debug, Serialize)]
struct ApplicationDestination {
    server: String,
    namespace: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncPolicy {
    automated: AutomatedSync,
    sync_options: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AutomatedSync {
    prune: bool,
    self_heal: bool,
}

/// Render the ApplicationSet manifest for `namespace`.
pub fn application_set_manifest(namespace: &str, repo_url: &str) -> Result<String> {
    let manifest = ApplicationSet {
        api_version: "argoproj.io/v1alpha1",
        kind: "ApplicationSet",
        metadata: Metadata {
            name: format!("{}-apps", namespace),
            namespace: Some("argocd".to_string()),
        },
        spec: ApplicationSetSpec {
            generators: vec![Generator {
                git: GitGenerator {
                    repo_url: repo_url.to_string(),
                    revision: "HEAD".to_string(),
                    directories: vec![DirectoryGenerator {
                        path: format!("{}/{}/apps/*", NAMESPACES_DIR, namespace),
                    }],
                },
            }],
            template: ApplicationTemplate {
                metadata: Metadata {
                    name: format!("{}-{{{{path.basename}}}}", namespace),
                    namespace: None,
                },
                spec: ApplicationSpec {
                    project: "default".to_string(),
                    source: ApplicationSource {
                        repo_url: repo_url.to_string(),
                        target_revision: "HEAD".to_string(),
                        path: "{{path}}".to_string(),
                    },
                    destination: ApplicationDestination {
                        server: "https://kubernetes.default.svc".to_string(),
                        namespace: format!("{}{}", K8S_NAMESPACE_PREFIX, namespace),
                    },
                    sync_policy: SyncPolicy {
                        automated: AutomatedSync {
                            prune: true,
                            self_heal: true,
                        },
                        sync_options: vec!["CreateNamespace=true".to_string()],
                    },
                },
            },
        },
    };
    Ok(serde_yaml::to_string(&manifest)?)
}

impl GitOpsCommitter {
    /// Commit the ApplicationSet and an empty `apps/` directory for `namespace`.
    pub async fn create_namespace_manifests(&self, namespace: &str) -> Result<CommitOutcome> {
        let manifest = application_set_manifest(namespace, &self.config().repo_url())?;

        let mut files = BTreeMap::new();
        files.insert(
            format!("{}/{}/applicationset.yaml", NAMESPACES_DIR, namespace),
            manifest.into_bytes(),
        );
        files.insert(
            format!("{}/{}/apps/.gitkeep", NAMESPACES_DIR, namespace),
            Vec::new(),
        );

        self.commit_files(&files, &format!("Create namespace {}", namespace))
            .await
    }

    /// Remove every manifest of `namespace`.
    pub async fn delete_namespace(&self, namespace: &str) -> Result<CommitOutcome> {
        self.delete_directory(
            &format!("{}/{}", NAMESPACES_DIR, namespace),
            &format!("Delete namespace {}", namespace),
        )
        .await
    }
}
