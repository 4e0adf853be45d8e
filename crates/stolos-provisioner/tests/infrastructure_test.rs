// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Base infrastructure lifecycle tests.

mod common;

use std::collections::BTreeMap;

use common::*;
use serde_json::json;
use stolos_gitops::InMemoryRepository;
use stolos_provisioner::Error;
use stolos_provisioner::config::GcpConfig;
use tokio_util::sync::CancellationToken;

async fn empty_repo_context() -> TestContext {
    TestContext::with_repository(InMemoryRepository::new(BRANCH), gcp_config()).await
}

#[tokio::test]
async fn test_initialize_applies_and_commits() {
    let ctx = empty_repo_context().await;

    let outcome = ctx
        .infrastructure
        .initialize(&CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.applied);
    assert!(outcome.commit.is_committed());
    assert_eq!(ctx.engine().calls().await, vec!["init", "plan", "apply"]);

    let paths = ctx.repo.paths(BRANCH).await;
    for expected in [
        "terraform/gcp/main.tf",
        "terraform/gcp/modules/node/main.tf",
        "terraform/gcp/modules/node/variables.tf",
        "terraform/gcp/modules/node/outputs.tf",
        "terraform/gcp/modules/node/provider.tf",
    ] {
        assert!(paths.contains(&expected.to_string()), "missing {}", expected);
    }

    let main = ctx.repo_file("terraform/gcp/main.tf").await.unwrap();
    assert!(main.contains("test-state"));
    assert!(main.contains("test-project"));
    assert!(main.contains("test-cluster-vpc"));

    let module = ctx.repo_file("terraform/gcp/modules/node/main.tf").await.unwrap();
    assert!(module.contains("talos-images"));
    assert!(module.contains("talos-v1-8-amd64"));

    let head = ctx.repo.head(BRANCH).await.unwrap();
    assert_eq!(
        ctx.repo.message(&head).await.as_deref(),
        Some("Initialize gcp infrastructure")
    );
}

#[tokio::test]
async fn test_initialize_without_changes_skips_apply() {
    let ctx = empty_repo_context().await;
    ctx.engine().set_has_changes(false).await;

    let outcome = ctx
        .infrastructure
        .initialize(&CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.applied);
    assert_eq!(ctx.engine().calls().await, vec!["init", "plan"]);
    assert!(ctx.repo_file("terraform/gcp/main.tf").await.is_some());
}

#[tokio::test]
async fn test_initialize_twice_commits_nothing_new() {
    let ctx = empty_repo_context().await;
    let cancel = CancellationToken::new();

    ctx.infrastructure.initialize(&cancel).await.unwrap();
    let commits = ctx.repo.commit_count().await;
    let outcome = ctx.infrastructure.initialize(&cancel).await.unwrap();

    assert!(!outcome.commit.is_committed());
    assert_eq!(ctx.repo.commit_count().await, commits);
}

#[tokio::test]
async fn test_failed_apply_commits_nothing() {
    let ctx = empty_repo_context().await;
    ctx.engine().fail_on("apply").await;

    let err = ctx
        .infrastructure
        .initialize(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Engine(_)));
    assert_eq!(ctx.repo.commit_count().await, 1);
}

#[tokio::test]
async fn test_status_reports_each_state() {
    let cancel = CancellationToken::new();

    let unconfigured = TestContext::with_repository(
        InMemoryRepository::new(BRANCH),
        GcpConfig {
            project_id: String::new(),
            ..gcp_config()
        },
    )
    .await;
    let status = unconfigured.infrastructure.status(&cancel).await.unwrap();
    assert_eq!(status.status, "unconfigured");
    assert_eq!(status.region, "europe-west1");

    let empty = empty_repo_context().await;
    let status = empty.infrastructure.status(&cancel).await.unwrap();
    assert_eq!(status.status, "not_initialized");
    assert!(empty.engine().calls().await.is_empty());

    let ready = TestContext::new().await;
    ready.engine().set_output("vpc_name", json!("test-cluster-vpc")).await;
    ready.engine().set_output("subnet_name", json!("test-cluster-subnet")).await;
    let status = ready.infrastructure.status(&cancel).await.unwrap();
    assert_eq!(status.status, "ready");
    assert_eq!(status.vpc.as_deref(), Some("test-cluster-vpc"));
    assert_eq!(status.subnet.as_deref(), Some("test-cluster-subnet"));
    assert_eq!(ready.engine().calls().await, vec!["init", "output"]);
}

#[tokio::test]
async fn test_force_unlock() {
    let ctx = TestContext::new().await;
    let cancel = CancellationToken::new();

    assert!(matches!(
        ctx.infrastructure.force_unlock("  ", &cancel).await,
        Err(Error::InvalidRequest(_))
    ));
    assert!(ctx.engine().calls().await.is_empty());

    ctx.infrastructure.force_unlock("1712", &cancel).await.unwrap();
    assert_eq!(ctx.engine().calls().await, vec!["init", "force-unlock 1712"]);
}

#[tokio::test]
async fn test_destroy_removes_provider_directory() {
    let mut files = BTreeMap::new();
    files.insert("terraform/gcp/main.tf".to_string(), MAIN_TF.as_bytes().to_vec());
    files.insert("terraform/gcp/node-worker-1.tf".to_string(), b"# node\n".to_vec());
    files.insert("README.md".to_string(), b"# infra\n".to_vec());
    let repo = InMemoryRepository::with_files(BRANCH, files);
    let ctx = TestContext::with_repository(repo, gcp_config()).await;

    ctx.infrastructure
        .destroy(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(ctx.engine().calls().await, vec!["init", "destroy"]);
    assert_eq!(ctx.repo.paths(BRANCH).await, vec!["README.md".to_string()]);
}

#[tokio::test]
async fn test_destroy_requires_initialized_infrastructure() {
    let ctx = empty_repo_context().await;

    let err = ctx
        .infrastructure
        .destroy(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Configuration(_)));
    assert!(ctx.engine().calls().await.is_empty());
}
