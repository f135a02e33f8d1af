//! Integration-level scenarios from spec.md §8 that need several
//! components wired together: a namespace with `task` bound to a live
//! `TaskService`, driving allocation and the full redirection chain.

use std::sync::Arc;

use nsvfs_core::{BindMode, Ctx, FileService, MemFs, Namespace, TaskService};

async fn bind_task_service(ns: &Arc<Namespace>, tasks: Arc<TaskService>) {
    let fs: Arc<dyn FileService> = tasks;
    ns.bind(fs, ".", "task", BindMode::After)
        .await
        .expect("bind task service");
}

#[tokio::test]
async fn scenario_5_task_allocation_via_bound_task_service() {
    let ns = Namespace::new(None);
    let tasks = TaskService::new();
    bind_task_service(&ns, tasks.clone()).await;

    let root: Arc<dyn FileService> = ns.clone();
    let ctx = Ctx::detached();

    let handle = root.open("task/new/ns", &ctx).await.unwrap();
    let mut buf = [0u8; 16];
    let n = handle.read(&mut buf).await.unwrap();
    let text = std::str::from_utf8(&buf[..n]).unwrap();
    assert!(text.ends_with('\n'));
    let id: u64 = text.trim().parse().expect("numeric id");

    let dir = root.open("task/.", &ctx).await.unwrap();
    let listing = dir.readdir().await.unwrap();
    assert!(listing.iter().any(|e| e.name == id.to_string()));
}

#[tokio::test]
async fn scenario_6_shell_redirection_chain_reaches_cmd_file() {
    let ns = Namespace::new(None);
    let tasks = TaskService::new();
    bind_task_service(&ns, tasks.clone()).await;

    let root: Arc<dyn FileService> = ns.clone();
    let ctx = Ctx::detached();

    let handle = root.open("task/new/ns", &ctx).await.unwrap();
    let mut buf = [0u8; 16];
    let n = handle.read(&mut buf).await.unwrap();
    let id = std::str::from_utf8(&buf[..n]).unwrap().trim().to_string();

    let path = format!("task/{id}/cmd");
    let cmd_handle = root.create(&path, &ctx).await.expect("create cmd through full chain");
    cmd_handle.write(b"hello").await.unwrap();

    let reread = root.open(&path, &ctx).await.unwrap();
    let mut out = [0u8; 5];
    let n = reread.read(&mut out).await.unwrap();
    assert_eq!(&out[..n], b"hello");
}

#[tokio::test]
async fn unbound_path_is_not_exist_everywhere() {
    let ns = Namespace::new(None);
    let ctx = Ctx::detached();
    let fs: Arc<dyn FileService> = ns;
    let err = fs.open("nowhere/at/all", &ctx).await.unwrap_err();
    assert_eq!(*err.kind(), nsvfs_core::CoreError::NotExist);
}

#[tokio::test]
async fn clone_idempotence_diverges_after_fork() {
    let original = Namespace::new(None);
    let leaf = MemFs::new();
    original
        .bind(leaf, ".", "mnt", BindMode::After)
        .await
        .unwrap();

    let before = original.list_bindings().await;
    let forked = original.clone_for(None).await;
    assert_eq!(forked.list_bindings().await.keys().collect::<Vec<_>>(),
               before.keys().collect::<Vec<_>>());

    let other_leaf = MemFs::new();
    forked
        .bind(other_leaf, ".", "extra", BindMode::After)
        .await
        .unwrap();

    let after_original = original.list_bindings().await;
    assert_eq!(
        after_original.keys().collect::<Vec<_>>(),
        before.keys().collect::<Vec<_>>(),
        "mutating the fork must not affect the original"
    );
    assert!(forked.list_bindings().await.contains_key("extra"));
}

#[tokio::test]
async fn readdir_is_deterministic_across_repeated_calls() {
    let ns = Namespace::new(None);
    let a = MemFs::new();
    let b = MemFs::new();
    ns.bind(a, ".", "a", BindMode::After).await.unwrap();
    ns.bind(b, ".", "b", BindMode::After).await.unwrap();

    let fs: Arc<dyn FileService> = ns;
    let ctx = Ctx::detached();

    let first = fs.open(".", &ctx).await.unwrap().readdir().await.unwrap();
    let second = fs.open(".", &ctx).await.unwrap().readdir().await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn alloc_remove_round_trip_leaves_registry_unchanged() {
    let tasks = TaskService::new();
    let fs: Arc<dyn FileService> = tasks.clone();
    let ctx = Ctx::detached();

    let before = fs.open(".", &ctx).await.unwrap().readdir().await.unwrap();

    let task = tasks.alloc("ns", None).await.unwrap();
    tasks.remove(task.id()).await.unwrap();

    let after = fs.open(".", &ctx).await.unwrap().readdir().await.unwrap();
    assert_eq!(before, after);
}

#[test]
fn longest_prefix_uniqueness_across_path_lengths() {
    use nsvfs_core::path::match_paths;

    let keys = vec!["a", "a/b", "a/b/c", "zz"];
    let matches = match_paths(keys, "a/b/c/d");
    assert_eq!(matches, vec!["a/b/c", "a/b", "a"]);
}
