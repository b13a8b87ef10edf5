//! Top-level entry point: `new_engine` (spec §6) plus the `EngineConfig`
//! ambient-stack surface (SPEC_FULL.md §2 — hostname, debug, strict-unknown-
//! keys for `Schedule`, and channel capacity all live here so the loader has
//! one place to configure a run).
//!
//! `Engine::run` mirrors the teacher's cooperative-cancellation pattern in
//! `pregel/executor.rs`/`pregel/loop_impl.rs`: hold a `watch::Sender<bool>`,
//! flip it once, and let every node's `stream` loop observe the closed
//! channel and exit on its own. The engine never force-aborts a node task.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::Result;
use crate::graph::{EngineCore, NodeIndex, NodeSummary, Txn};
use crate::node::Node;
use crate::registry::Registry;
use crate::world::World;

/// Configuration carried by a single engine run. `strict_unknown_keys`
/// governs the host-JSON-to-`Value` loader boundary (func-cli), not any
/// node's own behavior: a `Schedule` config value is a closed `Type::Struct`
/// once it reaches the graph, so "unknown key" only means anything at the
/// point raw JSON is converted into a typed constant.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub hostname: String,
    pub debug: bool,
    pub strict_unknown_keys: bool,
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            debug: false,
            strict_unknown_keys: false,
            channel_capacity: 1,
        }
    }
}

/// A running function graph: the shared [`EngineCore`] plus the shutdown
/// switch `run` uses to wind everything down.
pub struct Engine {
    core: Arc<EngineCore>,
    config: EngineConfig,
    shutdown_tx: watch::Sender<bool>,
}

/// Construct a fresh engine over `world`. Mirrors spec §6's
/// `new_engine(world, logger, debug)`; `logger` is ambient (the crate uses
/// `tracing` throughout rather than an injected logger handle).
pub fn new_engine(world: Arc<dyn World>, config: EngineConfig) -> Engine {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let registry = Arc::new(Registry::new());
    let core = EngineCore::new(
        registry,
        world,
        config.hostname.clone(),
        config.debug,
        shutdown_rx,
        config.channel_capacity,
    );
    Engine { core, config, shutdown_tx }
}

impl Engine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.core.registry
    }

    /// Open a top-level transaction not owned by any existing node. Used by
    /// the loader to seed the initial graph; `usize::MAX` is a sentinel
    /// owner index that never collides with a real node (`apply_commit`
    /// rejects self-edges by index, and no node is ever allocated there).
    pub fn txn(&self) -> Txn {
        Txn::new(self.core.clone(), usize::MAX)
    }

    /// Seed a node directly, bypassing the transaction machinery. Used by
    /// the loader for the graph's initial top-level vertices.
    pub async fn seed(
        &self,
        name: impl Into<String>,
        node: Box<dyn Node>,
        in_edges: Vec<(NodeIndex, String)>,
    ) -> Result<NodeIndex> {
        self.core.seed(name, node, in_edges).await
    }

    pub async fn describe(&self) -> Vec<NodeSummary> {
        self.core.describe().await
    }

    /// Run until `cancel` resolves, then signal every node's stream task to
    /// exit. Per spec §5, shutdown is cooperative: this returns as soon as
    /// the signal is sent, without waiting for node tasks to drain.
    pub async fn run(&self, cancel: impl std::future::Future<Output = ()>) -> Result<()> {
        cancel.await;
        self.shutdown();
        Ok(())
    }

    /// Signal shutdown without waiting on an external future. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::test_support::noop_world;

    #[tokio::test]
    async fn shutdown_is_observed_by_a_fresh_receiver() {
        let engine = new_engine(noop_world(), EngineConfig::default());
        let mut rx = engine.core.shutdown.clone();
        assert!(!*rx.borrow());
        engine.shutdown();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn run_signals_shutdown_once_cancel_resolves() {
        let engine = new_engine(noop_world(), EngineConfig::default());
        let mut rx = engine.core.shutdown.clone();
        engine.run(async {}).await.unwrap();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
