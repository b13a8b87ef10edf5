//! In-memory [`World`] implementation: the reference capability backend the
//! CLI and test suites run against, grounded in the teacher's
//! `InMemoryCheckpointSaver` (`langgraph-checkpoint::memory`) — thread-safe,
//! ephemeral, zero external dependencies, with test-only helpers for seeding
//! and inspecting state beyond what the trait itself exposes.

pub mod error;
mod pool;
mod scheduler;
mod store;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as Json;

use func_core::error::{FuncError, Result};
use func_core::world::{
    Fs, Local, ResCollect, ResFilter, ResItem, ResWatch, Scheduler, Session, Shell, ShellOutput, StrMapGet,
    StrMapSet, StrMapWatch, World,
};

use pool::Pools;
use scheduler::InMemoryScheduler;
use store::Store;

/// Single-process stand-in for every `World` capability. Construct with
/// this host's name; `with_cluster_members` extends the scheduler's
/// membership list for tests that exercise multi-host scheduling.
pub struct InMemoryWorld {
    hostname: String,
    resources: Store<Vec<ResItem>>,
    str_maps: Store<HashMap<String, String>>,
    locals: Store<Option<Json>>,
    fs: Store<Option<String>>,
    pools: Pools,
    scheduler: InMemoryScheduler,
    shell_mocks: tokio::sync::Mutex<HashMap<String, ShellOutput>>,
}

impl InMemoryWorld {
    pub fn new(hostname: impl Into<String>) -> Self {
        let hostname = hostname.into();
        Self {
            scheduler: InMemoryScheduler::new(vec![hostname.clone()]),
            hostname,
            resources: Store::new(),
            str_maps: Store::new(),
            locals: Store::new(),
            fs: Store::new(),
            pools: Pools::new(),
            shell_mocks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn with_cluster_members(mut self, members: Vec<String>) -> Self {
        self.scheduler = InMemoryScheduler::new(members);
        self
    }

    /// Test/seed helper: publish one exported resource, notifying any open
    /// `res_watch(kind)` callers.
    pub async fn put_resource(&self, item: ResItem) {
        self.resources
            .update(&item.kind.clone(), |items| {
                if let Some(existing) = items.iter_mut().find(|i| i.name == item.name && i.host == item.host) {
                    *existing = item.clone();
                } else {
                    items.push(item.clone());
                }
            })
            .await;
    }

    /// Test/seed helper: write a namespace's whole host→value map directly,
    /// bypassing `str_map_set`'s single-host-write semantics.
    pub async fn seed_str_map(&self, namespace: &str, map: HashMap<String, String>) {
        self.str_maps.set(namespace, map).await;
    }

    /// Test/seed helper: set a local key's JSON value, notifying watchers.
    pub async fn set_local(&self, key: &str, value: Json) {
        self.locals.set(key, Some(value)).await;
    }

    /// Test/seed helper: publish file contents, notifying `Fs::watch`.
    pub async fn seed_file(&self, path: &str, contents: impl Into<String>) {
        self.fs.set(path, Some(contents.into())).await;
    }

    /// Register a canned response for `Shell::run(command)`. Commands with
    /// no registered mock echo back a synthetic success, since this world
    /// never actually spawns a process.
    pub async fn mock_command(&self, command: impl Into<String>, output: ShellOutput) {
        self.shell_mocks.lock().await.insert(command.into(), output);
    }
}

#[async_trait]
impl ResWatch for InMemoryWorld {
    async fn res_watch(&self, kind: &str) -> Result<()> {
        let mut rx = self.resources.watch(kind).await;
        rx.changed().await.map_err(|_| FuncError::EndOfStream)
    }
}

#[async_trait]
impl ResCollect for InMemoryWorld {
    async fn res_collect(&self, filters: &[ResFilter]) -> Result<Vec<ResItem>> {
        let mut out = Vec::new();
        for filter in filters {
            let Some(items) = self.resources.get(&filter.kind).await else { continue };
            for item in items {
                let name_ok = filter.name.is_empty() || item.name == filter.name;
                let host_ok = filter.host.is_empty() || item.host == filter.host;
                if name_ok && host_ok {
                    out.push(item);
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl StrMapWatch for InMemoryWorld {
    async fn str_map_watch(&self, namespace: &str) -> Result<()> {
        let mut rx = self.str_maps.watch(namespace).await;
        rx.changed().await.map_err(|_| FuncError::EndOfStream)
    }
}

#[async_trait]
impl StrMapGet for InMemoryWorld {
    async fn str_map_get(&self, namespace: &str) -> Result<HashMap<String, String>> {
        Ok(self.str_maps.get(namespace).await.unwrap_or_default())
    }
}

#[async_trait]
impl StrMapSet for InMemoryWorld {
    async fn str_map_set(&self, namespace: &str, value: &str) -> Result<()> {
        let host = self.hostname.clone();
        let value = value.to_string();
        self.str_maps.update(namespace, |map| { map.insert(host, value); }).await;
        Ok(())
    }
}

#[async_trait]
impl Scheduler for InMemoryWorld {
    async fn acquire(&self, namespace: &str, opts: Json) -> Result<Box<dyn Session>> {
        self.scheduler.acquire(namespace, opts).await
    }
}

#[async_trait]
impl Local for InMemoryWorld {
    async fn value_watch(&self, key: &str) -> Result<()> {
        let mut rx = self.locals.watch(key).await;
        rx.changed().await.map_err(|_| FuncError::EndOfStream)
    }

    async fn value_get(&self, key: &str) -> Result<Option<Json>> {
        Ok(self.locals.get(key).await.flatten())
    }

    async fn pool_acquire(&self, pool: &str, uid: &str) -> Result<i64> {
        Ok(self.pools.acquire(pool, uid).await)
    }

    async fn pool_release(&self, pool: &str, uid: &str) -> Result<()> {
        self.pools.release(pool, uid).await;
        Ok(())
    }
}

#[async_trait]
impl Fs for InMemoryWorld {
    async fn read_to_string(&self, path: &str) -> Result<String> {
        self.fs
            .get(path)
            .await
            .flatten()
            .ok_or_else(|| crate::error::WorldError::NotFound(path.to_string()).into())
    }

    async fn watch(&self, path: &str) -> Result<()> {
        let mut rx = self.fs.watch(path).await;
        rx.changed().await.map_err(|_| FuncError::EndOfStream)
    }
}

#[async_trait]
impl Shell for InMemoryWorld {
    async fn run(&self, command: &str) -> Result<ShellOutput> {
        let mocks = self.shell_mocks.lock().await;
        match mocks.get(command) {
            Some(out) => Ok(out.clone()),
            None => Ok(ShellOutput { stdout: String::new(), stderr: String::new(), status: 0 }),
        }
    }
}

impl World for InMemoryWorld {}
