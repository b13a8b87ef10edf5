//! Cross-capability integration tests for `InMemoryWorld`, driven entirely
//! through the `World` trait object the way `func-core`'s nodes see it.
//! `lib.rs`'s own `#[cfg(test)]` module checks each capability in isolation;
//! these exercise combinations a real graph would actually produce: a
//! watch that only resolves once a matching write lands, a multi-host
//! scheduler round, and a pool acquire/release cycle checked against the
//! unrelated local-value store it must not leak into.
//!
//! `InMemoryWorld`'s seed helpers (`put_resource`, `seed_str_map`, ...) live
//! on the concrete type, not the `World` trait object `func-core` actually
//! holds, so every test here keeps an `Arc<InMemoryWorld>` for seeding
//! alongside an `Arc<dyn World>` coerced from the same allocation for the
//! capability calls under test.

use std::sync::Arc;
use std::time::Duration;

use func_core::world::{Fs, Local, ResCollect, ResFilter, ResItem, ResWatch, Scheduler, Session, ShellOutput, StrMapGet, StrMapSet, StrMapWatch, World};
use func_world::InMemoryWorld;

#[tokio::test]
async fn res_watch_resolves_once_a_matching_resource_is_published() {
    let concrete = Arc::new(InMemoryWorld::new("h1"));
    let world: Arc<dyn World> = concrete.clone();

    let watcher = {
        let world = world.clone();
        tokio::spawn(async move { world.res_watch("file").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!watcher.is_finished());

    concrete
        .put_resource(ResItem { kind: "file".into(), name: "a".into(), host: "h1".into(), data: serde_json::json!(1) })
        .await;

    watcher.await.unwrap().unwrap();

    let found = world.res_collect(&[ResFilter { kind: "file".into(), name: String::new(), host: String::new() }]).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "a");
}

#[tokio::test]
async fn str_map_set_and_seed_compose_into_one_namespace_view() {
    let concrete = Arc::new(InMemoryWorld::new("h1"));
    let world: Arc<dyn World> = concrete.clone();

    world.str_map_set("ns", "from-h1").await.unwrap();

    let mut seeded = std::collections::HashMap::new();
    seeded.insert("h2".to_string(), "from-h2".to_string());
    concrete.seed_str_map("ns", seeded.clone()).await;

    // seed_str_map overwrites the whole namespace (bypasses the per-host
    // merge str_map_set does), so only the seeded view survives.
    let map = world.str_map_get("ns").await.unwrap();
    assert_eq!(map, seeded);
}

#[tokio::test]
async fn str_map_watch_wakes_on_a_set_from_another_task() {
    let concrete = Arc::new(InMemoryWorld::new("h1"));
    let world: Arc<dyn World> = concrete;

    let watcher = {
        let world = world.clone();
        tokio::spawn(async move { world.str_map_watch("ns").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    world.str_map_set("ns", "hello").await.unwrap();
    watcher.await.unwrap().unwrap();
}

#[tokio::test]
async fn pool_acquire_and_local_value_store_do_not_cross_contaminate() {
    let concrete = Arc::new(InMemoryWorld::new("h1"));
    let world: Arc<dyn World> = concrete;

    let first = world.pool_acquire("workers", "alice").await.unwrap();
    let again = world.pool_acquire("workers", "alice").await.unwrap();
    assert_eq!(first, again);

    world.pool_release("workers", "alice").await.unwrap();
    let reused = world.pool_acquire("workers", "bob").await.unwrap();
    assert_eq!(reused, first);

    // pool state lives entirely in `Pools`, not the local value store that
    // shares the same "workers" string as a key in this test by coincidence.
    assert_eq!(world.value_get("workers").await.unwrap(), None);
}

#[tokio::test]
async fn fs_watch_resolves_after_a_seeded_write_and_content_is_then_readable() {
    let concrete = Arc::new(InMemoryWorld::new("h1"));
    let world: Arc<dyn World> = concrete.clone();

    let watcher = {
        let world = world.clone();
        tokio::spawn(async move { world.watch("/etc/hosts").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!watcher.is_finished());

    concrete.seed_file("/etc/hosts", "localhost\n").await;
    watcher.await.unwrap().unwrap();

    assert_eq!(world.read_to_string("/etc/hosts").await.unwrap(), "localhost\n");
}

#[tokio::test]
async fn fs_read_of_an_unseeded_path_reports_not_found() {
    let world: Arc<dyn World> = Arc::new(InMemoryWorld::new("h1"));
    assert!(world.read_to_string("/nope").await.is_err());
}

#[tokio::test]
async fn scheduler_session_rotates_across_cluster_members_and_honors_max() {
    let world: Arc<dyn World> = Arc::new(InMemoryWorld::new("h1").with_cluster_members(vec!["h1".into(), "h2".into(), "h3".into()]));

    let mut session = world.acquire("leader-election", serde_json::json!({"strategy": "rr", "max": 2})).await.unwrap();
    let first = session.next().await.unwrap();
    let second = session.next().await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2);
    assert_ne!(first, second);
}

#[tokio::test]
async fn shell_run_returns_mocked_output_and_a_synthetic_success_otherwise() {
    let concrete = Arc::new(InMemoryWorld::new("h1"));
    concrete.mock_command("echo hi", ShellOutput { stdout: "hi\n".into(), stderr: String::new(), status: 0 }).await;
    let world: Arc<dyn World> = concrete;

    let out = world.run("echo hi").await.unwrap();
    assert_eq!(out.stdout, "hi\n");
    assert_eq!(out.status, 0);

    let unmocked = world.run("echo unmocked").await.unwrap();
    assert_eq!(unmocked.stdout, "");
    assert_eq!(unmocked.status, 0);
}
