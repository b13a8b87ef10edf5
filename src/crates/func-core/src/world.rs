//! The capability interface world-coupled nodes are built against (spec
//! §4.5). `func-core` only defines the trait; `func-world` ships the
//! in-memory implementation nodes actually run against in tests and the
//! reference CLI.
//!
//! Grouped into sub-traits the way the node modules consume them — a node
//! depends on exactly the capability it needs (`ResWatch`, `Scheduler`, …)
//! rather than the whole `World`, but `World: ResWatch + ... ` is the
//! concrete object every node is actually handed, so a single
//! `Arc<dyn World>` threads through `init`/`stream`/`call` unchanged.
//!
//! Every `*_watch` method follows one convention: it awaits the next change
//! (or the current state, on the first call) and resolves to `Ok(())`; a
//! watch that closes without error resolves to `Err(FuncError::EndOfStream)`
//! rather than some out-of-band sentinel, so every world-coupled node's
//! `stream` loop handles graceful shutdown the same way `Schedule` does.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as Json;

use crate::error::Result;

/// One `{kind, name, host}` filter for `ResCollect`. An empty `host` means
/// "any host" (spec §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResFilter {
    pub kind: String,
    pub name: String,
    pub host: String,
}

/// One exported-resource blob matching a `ResCollect` filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ResItem {
    pub kind: String,
    pub name: String,
    pub host: String,
    pub data: Json,
}

/// Exported-resource convergence: `ResWatch` signals that resources of a
/// kind changed, `ResCollect` pulls the blobs currently matching a filter
/// set.
#[async_trait]
pub trait ResWatch: Send + Sync {
    /// Await the next change to resources of `kind`, or the current state
    /// on the first call.
    async fn res_watch(&self, kind: &str) -> Result<()>;
}

#[async_trait]
pub trait ResCollect: Send + Sync {
    async fn res_collect(&self, filters: &[ResFilter]) -> Result<Vec<ResItem>>;
}

/// The host-keyed shared namespace backing `Exchange`/`KVLookup`. Spec §4.5
/// invariant: once a primary key (the namespace) has been observed, the
/// world never associates that node with a different namespace.
#[async_trait]
pub trait StrMapWatch: Send + Sync {
    /// Await the next change to `namespace`'s host→value map, or its
    /// current contents on the first call.
    async fn str_map_watch(&self, namespace: &str) -> Result<()>;
}

#[async_trait]
pub trait StrMapGet: Send + Sync {
    async fn str_map_get(&self, namespace: &str) -> Result<HashMap<String, String>>;
}

#[async_trait]
pub trait StrMapSet: Send + Sync {
    /// Write this host's value into `namespace`.
    async fn str_map_set(&self, namespace: &str, value: &str) -> Result<()>;
}

/// Cluster-leasing scheduler backing `Schedule`: a node claims a named
/// slot and receives a session that advances as long as the lease is held.
/// `opts` carries the non-zero-valued fields of `{strategy,max,reuse,ttl}`
/// only — zero-valued fields are omitted per spec §4.5.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn acquire(&self, namespace: &str, opts: Json) -> Result<Box<dyn Session>>;
}

#[async_trait]
pub trait Session: Send + Sync {
    /// Block until this session's next scheduling result is available, or
    /// the lease is lost (in which case this returns `Err`).
    async fn next(&mut self) -> Result<Vec<String>>;
}

/// Host-local (not cluster-wide) scalar and pool access.
#[async_trait]
pub trait Local: Send + Sync {
    async fn value_watch(&self, key: &str) -> Result<()>;
    async fn value_get(&self, key: &str) -> Result<Option<Json>>;
    async fn pool_acquire(&self, pool: &str, uid: &str) -> Result<i64>;
    async fn pool_release(&self, pool: &str, uid: &str) -> Result<()>;
}

/// Filesystem access backing the file-reader node.
#[async_trait]
pub trait Fs: Send + Sync {
    async fn read_to_string(&self, path: &str) -> Result<String>;
    /// Await the next change to `path`'s contents or metadata.
    async fn watch(&self, path: &str) -> Result<()>;
}

/// Shell/system-command execution backing the `system` node.
#[async_trait]
pub trait Shell: Send + Sync {
    async fn run(&self, command: &str) -> Result<ShellOutput>;
}

#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

/// The full capability set a world-coupled node is built against.
pub trait World: ResWatch + ResCollect + StrMapWatch + StrMapGet + StrMapSet + Scheduler + Local + Fs + Shell {}
impl<T> World for T where T: ResWatch + ResCollect + StrMapWatch + StrMapGet + StrMapSet + Scheduler + Local + Fs + Shell {}
