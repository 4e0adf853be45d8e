// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the commit layer against the in-memory repository.

use std::collections::BTreeMap;
use std::sync::Arc;

use stolos_gitops::{
    CommitOutcome, GitOpsCommitter, GitOpsConfig, GitOpsError, InMemoryRepository,
};

fn files(pairs: &[(&str, &str)]) -> BTreeMap<String, Vec<u8>> {
    pairs
        .iter()
        .map(|(p, c)| (p.to_string(), c.as_bytes().to_vec()))
        .collect()
}

fn committer(repo: &Arc<InMemoryRepository>) -> GitOpsCommitter {
    GitOpsCommitter::new(repo.clone(), GitOpsConfig::new("acme", "infra"))
}

// ============================================================================
// commit_files
// ============================================================================

#[tokio::test]
async fn test_commit_files_creates_single_commit() {
    let repo = Arc::new(InMemoryRepository::new("main"));
    let committer = committer(&repo);
    let before = repo.head("main").await.unwrap();

    let outcome = committer
        .commit_files(
            &files(&[("terraform/gcp/main.tf", "a"), ("terraform/gcp/node-x.tf", "b")]),
            "Add node configurations: [x]",
        )
        .await
        .unwrap();

    let CommitOutcome::Committed { sha } = outcome else {
        panic!("expected a commit");
    };
    assert_eq!(repo.head("main").await.unwrap(), sha);
    assert_eq!(repo.parents(&sha).await, vec![before]);
    assert_eq!(repo.commit_count().await, 2);
    assert_eq!(
        repo.message(&sha).await.unwrap(),
        "Add node configurations: [x]"
    );

    let author = repo.author(&sha).await.unwrap();
    assert_eq!(author.name, "Stolos Bot");
    assert_eq!(author.email, "bot@stolos.cloud");
}

#[tokio::test]
async fn test_commit_same_files_twice_is_noop() {
    let repo = Arc::new(InMemoryRepository::new("main"));
    let committer = committer(&repo);
    let set = files(&[("a.tf", "1"), ("b.tf", "2")]);

    let first = committer.commit_files(&set, "first").await.unwrap();
    assert!(first.is_committed());
    let head = repo.head("main").await.unwrap();

    let second = committer.commit_files(&set, "second").await.unwrap();
    assert_eq!(second, CommitOutcome::NoChanges);
    assert_eq!(repo.head("main").await.unwrap(), head);
    assert_eq!(repo.commit_count().await, 2);
}

#[tokio::test]
async fn test_commit_keeps_unrelated_paths_and_resolves_all_submitted() {
    let repo = Arc::new(InMemoryRepository::with_files(
        "main",
        files(&[("keep/me.txt", "kept"), ("dir/same.txt", "same")]),
    ));
    let committer = committer(&repo);

    committer
        .commit_files(
            &files(&[
                ("dir/same.txt", "same"),
                ("dir/new1.txt", "one"),
                ("dir/new2.txt", "two"),
            ]),
            "three files",
        )
        .await
        .unwrap();

    assert_eq!(repo.file("main", "dir/same.txt").await.unwrap(), b"same");
    assert_eq!(repo.file("main", "dir/new1.txt").await.unwrap(), b"one");
    assert_eq!(repo.file("main", "dir/new2.txt").await.unwrap(), b"two");
    assert_eq!(repo.file("main", "keep/me.txt").await.unwrap(), b"kept");
}

#[tokio::test]
async fn test_moved_branch_head_becomes_parent() {
    let repo = Arc::new(InMemoryRepository::new("main"));
    let committer = committer(&repo);
    let original = repo.head("main").await.unwrap();

    repo.simulate_concurrent_commit("main", files(&[("other.txt", "theirs")]))
        .await;

    let outcome = committer
        .commit_files(&files(&[("mine.txt", "ours")]), "mine")
        .await
        .unwrap();
    let CommitOutcome::Committed { sha } = outcome else {
        panic!("expected a commit");
    };

    let parents = repo.parents(&sha).await;
    assert_eq!(parents.len(), 1);
    assert_ne!(parents[0], original);
    assert_eq!(repo.parents(&parents[0]).await, vec![original]);
    assert_eq!(repo.file("main", "mine.txt").await.unwrap(), b"ours");
}

#[tokio::test]
async fn test_commit_empty_set_is_noop() {
    let repo = Arc::new(InMemoryRepository::new("main"));
    let outcome = committer(&repo)
        .commit_files(&BTreeMap::new(), "nothing")
        .await
        .unwrap();
    assert_eq!(outcome, CommitOutcome::NoChanges);
    assert_eq!(repo.commit_count().await, 1);
}

#[tokio::test]
async fn test_commit_to_missing_branch_fails_without_commit() {
    let repo = Arc::new(InMemoryRepository::new("main"));
    let mut config = GitOpsConfig::new("acme", "infra");
    config.branch = "release".to_string();
    let committer = GitOpsCommitter::new(repo.clone(), config);

    let result = committer.commit_files(&files(&[("a", "b")]), "x").await;
    assert!(matches!(result, Err(GitOpsError::NotFound(_))));
    assert_eq!(repo.commit_count().await, 1);
}

// ============================================================================
// commit_directory
// ============================================================================

#[tokio::test]
async fn test_commit_directory_picks_extension_under_base_path() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("main.tf"), "terraform {}").unwrap();
    std::fs::write(dir.path().join("plan.txt"), "ignored").unwrap();
    std::fs::create_dir_all(dir.path().join("modules/node")).unwrap();
    std::fs::write(dir.path().join("modules/node/main.tf"), "module").unwrap();

    let repo = Arc::new(InMemoryRepository::new("main"));
    committer(&repo)
        .commit_directory(dir.path(), "tf", "terraform/gcp", "infra")
        .await
        .unwrap();

    let mut paths = repo.paths("main").await;
    paths.sort();
    assert_eq!(
        paths,
        vec!["terraform/gcp/main.tf", "terraform/gcp/modules/node/main.tf"]
    );
}

// ============================================================================
// duplicate_directory
// ============================================================================

#[tokio::test]
async fn test_duplicate_directory_reuses_blobs() {
    let repo = Arc::new(InMemoryRepository::with_files(
        "main",
        files(&[
            ("scaffolds/web/deploy.yaml", "deploy"),
            ("scaffolds/web/svc/service.yaml", "svc"),
            ("scaffolds/webapp/other.yaml", "not copied"),
        ]),
    ));
    let committer = committer(&repo);

    let outcome = committer
        .duplicate_directory("/scaffolds/web", "namespaces/dev/apps/web/", false)
        .await
        .unwrap();
    let CommitOutcome::Committed { sha } = outcome else {
        panic!("expected a commit");
    };

    assert_eq!(repo.blob_writes().await, 0);
    assert_eq!(
        repo.message(&sha).await.unwrap(),
        "Copy scaffolds/web -> namespaces/dev/apps/web"
    );
    assert_eq!(
        repo.file("main", "namespaces/dev/apps/web/deploy.yaml")
            .await
            .unwrap(),
        b"deploy"
    );
    assert_eq!(
        repo.file("main", "namespaces/dev/apps/web/svc/service.yaml")
            .await
            .unwrap(),
        b"svc"
    );
    assert!(
        repo.file("main", "namespaces/dev/apps/web/other.yaml")
            .await
            .is_none()
    );
}

#[tokio::test]
async fn test_duplicate_directory_rejects_existing_destination() {
    let repo = Arc::new(InMemoryRepository::with_files(
        "main",
        files(&[("src/a.txt", "new"), ("dst/a.txt", "old")]),
    ));
    let committer = committer(&repo);

    let result = committer.duplicate_directory("src", "dst", false).await;
    assert!(matches!(result, Err(GitOpsError::DestinationExists(p)) if p == "dst/a.txt"));
    assert_eq!(repo.commit_count().await, 1);

    committer
        .duplicate_directory("src", "dst", true)
        .await
        .unwrap();
    assert_eq!(repo.file("main", "dst/a.txt").await.unwrap(), b"new");
}

#[tokio::test]
async fn test_duplicate_empty_source_fails() {
    let repo = Arc::new(InMemoryRepository::new("main"));
    let result = committer(&repo)
        .duplicate_directory("missing", "dst", false)
        .await;
    assert!(matches!(result, Err(GitOpsError::NoFilesFound(p)) if p == "missing"));
}

// ============================================================================
// delete_directory / namespaces / scaffolds
// ============================================================================

#[tokio::test]
async fn test_delete_directory_removes_only_target() {
    let repo = Arc::new(InMemoryRepository::with_files(
        "main",
        files(&[
            ("namespaces/dev/applicationset.yaml", "x"),
            ("namespaces/dev/apps/.gitkeep", ""),
            ("namespaces/dev2/applicationset.yaml", "y"),
        ]),
    ));
    let committer = committer(&repo);

    let outcome = committer
        .delete_directory("namespaces/dev", "Delete namespace dev")
        .await
        .unwrap();
    assert!(outcome.is_committed());
    assert_eq!(
        repo.paths("main").await,
        vec!["namespaces/dev2/applicationset.yaml"]
    );

    let again = committer
        .delete_directory("namespaces/dev", "Delete namespace dev")
        .await
        .unwrap();
    assert_eq!(again, CommitOutcome::NoChanges);
}

#[tokio::test]
async fn test_namespace_lifecycle() {
    let repo = Arc::new(InMemoryRepository::new("main"));
    let committer = committer(&repo);

    let created = committer.create_namespace_manifests("team-a").await.unwrap();
    let CommitOutcome::Committed { sha } = created else {
        panic!("expected a commit");
    };
    assert_eq!(repo.message(&sha).await.unwrap(), "Create namespace team-a");
    let manifest = repo
        .file("main", "namespaces/team-a/applicationset.yaml")
        .await
        .unwrap();
    assert!(String::from_utf8(manifest).unwrap().contains("app-team-a"));
    assert_eq!(
        repo.file("main", "namespaces/team-a/apps/.gitkeep")
            .await
            .unwrap(),
        b""
    );

    committer.delete_namespace("team-a").await.unwrap();
    assert!(repo.paths("main").await.is_empty());
}

#[tokio::test]
async fn test_list_scaffolds_returns_directories_only() {
    let repo = Arc::new(InMemoryRepository::with_files(
        "main",
        files(&[
            ("scaffolds/web/a.yaml", "a"),
            ("scaffolds/worker/b.yaml", "b"),
            ("scaffolds/README.md", "readme"),
        ]),
    ));
    let scaffolds = committer(&repo).list_scaffolds().await.unwrap();
    assert_eq!(scaffolds, vec!["web", "worker"]);
}
