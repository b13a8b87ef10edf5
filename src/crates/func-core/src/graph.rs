//! The live graph: an arena of nodes addressed by stable index, plus the
//! transactional handle ([`Txn`]) rewriting nodes use to mutate it in place.
//!
//! Spec §9 calls for "an arena + indices graph rather than owned references"
//! so that rewriting fragments can reference the rewriting node itself (for
//! join edges) without fighting the borrow checker. [`NodeIndex`] is a plain
//! `usize` into the arena; edges are recorded on the consumer side as
//! `(upstream NodeIndex, arg name)` pairs.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{FuncError, Result};
use crate::node::{ArgsFrame, CleanupCtx, InitCtx, Node, NodeInfo, StreamCtx};
use crate::registry::Registry;
use crate::value::Value;
use crate::world::World;

/// Stable index of a node within a [`Graph`]'s arena. Never reused while the
/// node it names is live; freed slots are recycled but always through a
/// fresh allocation, never by silently aliasing an old index.
pub type NodeIndex = usize;

/// A not-yet-committed reference to a vertex added earlier in the same
/// pending transaction, or to an already-live node.
#[derive(Debug, Clone, Copy)]
pub enum VertexRef {
    Existing(NodeIndex),
    Pending(usize),
}

impl From<NodeIndex> for VertexRef {
    fn from(idx: NodeIndex) -> Self {
        VertexRef::Existing(idx)
    }
}

/// A prebuilt fragment merged wholesale via [`Txn::add_graph`] — the shape
/// higher-order nodes use to splice in a function value's body.
pub struct GraphFragment {
    pub(crate) vertices: Vec<(String, Box<dyn Node>)>,
    pub(crate) edges: Vec<(VertexRef, VertexRef, String)>,
    /// Which fragment vertex is the fragment's single output.
    pub(crate) output: VertexRef,
}

impl GraphFragment {
    pub fn builder() -> GraphFragmentBuilder {
        GraphFragmentBuilder::default()
    }
}

#[derive(Default)]
pub struct GraphFragmentBuilder {
    vertices: Vec<(String, Box<dyn Node>)>,
    edges: Vec<(VertexRef, VertexRef, String)>,
    next_pending: usize,
}

impl GraphFragmentBuilder {
    pub fn add_vertex(&mut self, name: impl Into<String>, node: Box<dyn Node>) -> VertexRef {
        let id = self.next_pending;
        self.next_pending += 1;
        self.vertices.push((name.into(), node));
        VertexRef::Pending(id)
    }

    pub fn add_edge(&mut self, from: VertexRef, to: VertexRef, arg: impl Into<String>) {
        self.edges.push((from, to, arg.into()));
    }

    pub fn finish(self, output: VertexRef) -> GraphFragment {
        GraphFragment { vertices: self.vertices, edges: self.edges, output }
    }
}

enum PendingOp {
    AddVertex { pending_id: usize, name: String, node: Box<dyn Node> },
    AddEdge { from: VertexRef, to: VertexRef, arg: String },
    DeleteVertex(NodeIndex),
    AddGraph { fragment: GraphFragment, pending_base: usize },
}

/// What a single `commit()` added, so the owning node's next `reverse()`
/// removes exactly that and nothing else (spec §8: "the set of nodes added
/// by N is exactly the set removed by the next reverse — no leaks").
/// `added_nodes` preserves the order vertices were introduced in across the
/// whole batch (`add_vertex` calls first, then each `add_graph`'s vertices
/// in fragment order) so a caller that built the batch can correlate a
/// particular call with its resulting index.
#[derive(Debug, Clone, Default)]
pub struct TxnRecord {
    pub added_nodes: Vec<NodeIndex>,
}

/// Transactional handle used by a rewriting node to mutate the graph.
///
/// Each rewriting node owns one long-lived `Txn` (handed to it at `init`)
/// and reuses it across rewrite episodes: `reverse()` undoes whatever the
/// handle's last `commit()` added (a no-op the first time), pending ops
/// accumulate via `add_vertex`/`add_edge`/`delete_vertex`/`add_graph`, and
/// `commit()` applies them atomically and remembers the new record.
pub struct Txn {
    pub(crate) core: Arc<EngineCore>,
    pub(crate) owner: NodeIndex,
    pending: Vec<PendingOp>,
    next_pending: usize,
    last_commit: Option<TxnRecord>,
}

impl Txn {
    pub(crate) fn new(core: Arc<EngineCore>, owner: NodeIndex) -> Self {
        Self { core, owner, pending: Vec::new(), next_pending: 0, last_commit: None }
    }

    pub fn add_vertex(&mut self, name: impl Into<String>, node: Box<dyn Node>) -> VertexRef {
        let id = self.next_pending;
        self.next_pending += 1;
        self.pending.push(PendingOp::AddVertex { pending_id: id, name: name.into(), node });
        VertexRef::Pending(id)
    }

    pub fn add_edge(&mut self, from: VertexRef, to: VertexRef, arg: impl Into<String>) {
        self.pending.push(PendingOp::AddEdge { from, to, arg: arg.into() });
    }

    pub fn delete_vertex(&mut self, idx: NodeIndex) {
        self.pending.push(PendingOp::DeleteVertex(idx));
    }

    /// Merge a prebuilt fragment; returns a reference to its output vertex,
    /// usable in further `add_edge` calls within this same pending batch.
    pub fn add_graph(&mut self, fragment: GraphFragment) -> VertexRef {
        let base = self.next_pending;
        self.next_pending += fragment.vertices.len();
        let out = match fragment.output {
            VertexRef::Pending(p) => VertexRef::Pending(base + p),
            existing => existing,
        };
        self.pending.push(PendingOp::AddGraph { fragment, pending_base: base });
        out
    }

    /// Drop the pending (uncommitted) op list. Does not reverse anything
    /// already committed.
    pub fn erase(&mut self) {
        self.pending.clear();
        self.next_pending = 0;
    }

    /// Apply the pending ops atomically, spawn the new nodes' stream tasks,
    /// and remember the result so the next `reverse()` can undo it.
    pub async fn commit(&mut self) -> Result<TxnRecord> {
        let ops = std::mem::take(&mut self.pending);
        self.next_pending = 0;
        let record = self.core.clone().apply_commit(self.owner, ops).await?;
        self.last_commit = Some(record.clone());
        Ok(record)
    }

    /// Undo the last `commit()` made through this handle. A no-op if
    /// nothing has been committed yet.
    pub async fn reverse(&mut self) -> Result<()> {
        if let Some(record) = self.last_commit.take() {
            self.core.clone().apply_reverse(record).await?;
        }
        Ok(())
    }

    /// Mark `idx` so a future `reverse()` on *any* handle does not delete
    /// it — used for the retained channel-source node that keeps feeding a
    /// higher-order node's triggering values across rebuilds (spec §4.4).
    pub async fn mark_erase(&self, idx: NodeIndex) {
        self.core.mark_erase(idx).await;
    }

    /// Subscribe directly to an arbitrary live node's output, bypassing the
    /// named-argument edge mechanism. Higher-order nodes use this to relay
    /// a freshly built subgraph's result as their own output without
    /// wiring an edge back into themselves (which `commit` forbids — see
    /// [`EngineCore::apply_commit`]).
    pub async fn subscribe(&self, idx: NodeIndex) -> Result<watch::Receiver<Option<Value>>> {
        self.core.subscribe(idx).await
    }
}

pub(crate) struct LiveNode {
    pub name: String,
    pub erase: bool,
    pub info: NodeInfo,
    pub output_tx: watch::Sender<Option<Value>>,
    pub in_edges: Vec<(NodeIndex, String)>,
    pub task: Option<JoinHandle<Result<()>>>,
}

#[derive(Default)]
struct GraphState {
    nodes: Vec<Option<LiveNode>>,
    free: Vec<NodeIndex>,
}

/// Shared engine state backing every [`Txn`] and every node's stream task.
/// The `state` mutex is the one serialization point spec §5 requires:
/// "the engine processes commit and reverse sequentially".
pub struct EngineCore {
    state: Mutex<GraphState>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) world: Arc<dyn World>,
    pub(crate) hostname: String,
    pub(crate) debug: bool,
    pub(crate) shutdown: watch::Receiver<bool>,
    pub(crate) channel_capacity: usize,
}

impl EngineCore {
    pub(crate) fn new(
        registry: Arc<Registry>,
        world: Arc<dyn World>,
        hostname: String,
        debug: bool,
        shutdown: watch::Receiver<bool>,
        channel_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GraphState::default()),
            registry,
            world,
            hostname,
            debug,
            shutdown,
            channel_capacity,
        })
    }

    /// Allocate a fresh top-level node outside of any transaction (used by
    /// the loader to seed the initial graph). Returns the index and spawns
    /// its stream task immediately.
    pub async fn seed(
        self: &Arc<Self>,
        name: impl Into<String>,
        node: Box<dyn Node>,
        in_edges: Vec<(NodeIndex, String)>,
    ) -> Result<NodeIndex> {
        let mut state = self.state.lock().await;
        let idx = Self::alloc(&mut state);
        drop(state);
        self.spawn(idx, name.into(), node, in_edges).await?;
        Ok(idx)
    }

    fn alloc(state: &mut GraphState) -> NodeIndex {
        if let Some(idx) = state.free.pop() {
            idx
        } else {
            let idx = state.nodes.len();
            state.nodes.push(None);
            idx
        }
    }

    async fn spawn(
        self: &Arc<Self>,
        idx: NodeIndex,
        name: String,
        mut node: Box<dyn Node>,
        in_edges: Vec<(NodeIndex, String)>,
    ) -> Result<()> {
        let info = node.info();
        let (output_tx, _rx) = watch::channel(None);

        let upstream: Vec<(String, watch::Receiver<Option<Value>>)> = {
            let state = self.state.lock().await;
            let mut v = Vec::with_capacity(in_edges.len());
            for (up_idx, arg) in &in_edges {
                let up = state
                    .nodes
                    .get(*up_idx)
                    .and_then(|n| n.as_ref())
                    .ok_or_else(|| FuncError::Txn(format!("edge source {up_idx} does not exist")))?;
                v.push((arg.clone(), up.output_tx.subscribe()));
            }
            v
        };

        let core = self.clone();
        let out_tx_for_task = output_tx.clone();
        let shutdown = self.shutdown.clone();
        let txn = Txn::new(core.clone(), idx);

        let task = tokio::spawn(async move {
            let init_ctx = InitCtx {
                txn,
                hostname: core.hostname.clone(),
                world: core.world.clone(),
                debug: core.debug,
            };
            node.init(init_ctx).await?;

            let (args_tx, args_rx) = mpsc::channel::<ArgsFrame>(core.channel_capacity);
            let agg_handle = spawn_aggregator(upstream, args_tx, shutdown.clone());

            let stream_ctx = StreamCtx {
                input: args_rx,
                output: out_tx_for_task,
                hostname: core.hostname.clone(),
                world: core.world.clone(),
                debug: core.debug,
                shutdown,
            };
            let result = node.stream(stream_ctx).await;
            agg_handle.abort();
            let cleanup_ctx = CleanupCtx { hostname: core.hostname.clone() };
            node.cleanup(&cleanup_ctx).await?;
            result
        });

        let mut state = self.state.lock().await;
        state.nodes[idx] = Some(LiveNode {
            name,
            erase: false,
            info,
            output_tx,
            in_edges,
            task: Some(task),
        });
        Ok(())
    }

    pub(crate) async fn mark_erase(&self, idx: NodeIndex) {
        let mut state = self.state.lock().await;
        if let Some(Some(n)) = state.nodes.get_mut(idx) {
            n.erase = true;
        }
    }

    pub(crate) async fn subscribe(&self, idx: NodeIndex) -> Result<watch::Receiver<Option<Value>>> {
        let state = self.state.lock().await;
        state
            .nodes
            .get(idx)
            .and_then(|n| n.as_ref())
            .map(|n| n.output_tx.subscribe())
            .ok_or_else(|| FuncError::Txn(format!("subscribe: node {idx} does not exist")))
    }

    /// Apply a batch of pending ops atomically: allocate arena slots for
    /// every new vertex first (so edges within the batch can reference each
    /// other regardless of op order), then resolve edges, apply deletes,
    /// and finally spawn the new vertices' stream tasks.
    pub(crate) async fn apply_commit(self: Arc<Self>, owner: NodeIndex, ops: Vec<PendingOp>) -> Result<TxnRecord> {
        let mut pending_to_real: HashMap<usize, NodeIndex> = HashMap::new();
        let mut new_vertices: Vec<(usize, String, Box<dyn Node>)> = Vec::new();
        let mut raw_edges: Vec<(VertexRef, VertexRef, String)> = Vec::new();
        let mut deletes: Vec<NodeIndex> = Vec::new();

        for op in ops {
            match op {
                PendingOp::AddVertex { pending_id, name, node } => {
                    new_vertices.push((pending_id, name, node));
                }
                PendingOp::AddGraph { fragment, pending_base } => {
                    for (i, (name, node)) in fragment.vertices.into_iter().enumerate() {
                        new_vertices.push((pending_base + i, name, node));
                    }
                    raw_edges.extend(fragment.edges);
                }
                PendingOp::AddEdge { from, to, arg } => raw_edges.push((from, to, arg)),
                PendingOp::DeleteVertex(idx) => deletes.push(idx),
            }
        }

        // Pass 1: reserve an arena slot for every new vertex up front.
        {
            let mut state = self.state.lock().await;
            for (pending_id, _, _) in &new_vertices {
                let idx = Self::alloc(&mut state);
                pending_to_real.insert(*pending_id, idx);
            }
        }

        let resolve = |r: VertexRef| -> Result<NodeIndex> {
            match r {
                VertexRef::Existing(idx) => Ok(idx),
                VertexRef::Pending(id) => pending_to_real
                    .get(&id)
                    .copied()
                    .ok_or_else(|| FuncError::Txn(format!("unresolved pending vertex {id}"))),
            }
        };

        // Pass 2: group resolved edges by consumer, rejecting edges into
        // nodes that already existed before this commit — this engine only
        // wires inputs at spawn time, matching how every higher-order node
        // wires a freshly built subgraph rather than patching a live one.
        let mut in_edges: HashMap<NodeIndex, Vec<(NodeIndex, String)>> = HashMap::new();
        let new_indices: std::collections::HashSet<NodeIndex> = pending_to_real.values().copied().collect();
        for (from, to, arg) in raw_edges {
            let from_idx = resolve(from)?;
            let to_idx = resolve(to)?;
            if !new_indices.contains(&to_idx) {
                return Err(FuncError::Txn(format!(
                    "edge target {to_idx} is not part of this commit's new vertices"
                )));
            }
            in_edges.entry(to_idx).or_default().push((from_idx, arg));
        }

        // Pass 3: apply deletes.
        for idx in deletes {
            let mut state = self.state.lock().await;
            if let Some(slot) = state.nodes.get_mut(idx) {
                if let Some(mut live) = slot.take() {
                    if let Some(task) = live.task.take() {
                        task.abort();
                    }
                    state.free.push(idx);
                } else {
                    return Err(FuncError::Txn(format!("delete_vertex: {idx} does not exist")));
                }
            }
        }

        // Pass 4: spawn every new vertex with its resolved inbound edges.
        let mut added = Vec::with_capacity(new_vertices.len());
        for (pending_id, name, node) in new_vertices {
            let idx = pending_to_real[&pending_id];
            let edges = in_edges.remove(&idx).unwrap_or_default();
            self.spawn(idx, name, node, edges).await?;
            added.push(idx);
        }

        let _ = owner;
        Ok(TxnRecord { added_nodes: added })
    }

    /// Undo a commit: abort and free every node it added, skipping any
    /// node marked via [`Txn::mark_erase`].
    pub(crate) async fn apply_reverse(self: Arc<Self>, record: TxnRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        for idx in record.added_nodes {
            let keep = matches!(&state.nodes.get(idx), Some(Some(n)) if n.erase);
            if keep {
                continue;
            }
            if let Some(slot) = state.nodes.get_mut(idx) {
                if let Some(mut live) = slot.take() {
                    if let Some(task) = live.task.take() {
                        task.abort();
                    }
                    state.free.push(idx);
                }
            }
        }
        Ok(())
    }
}

/// One committed vertex's shape, for `Engine::describe()` (SPEC_FULL §4's
/// tooling supplement). Read-only, never consulted by `stream`/`call`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NodeSummary {
    pub index: NodeIndex,
    pub name: String,
    pub sig: String,
    pub pure: bool,
    pub in_edges: Vec<(NodeIndex, String)>,
}

impl EngineCore {
    /// Walk the live graph and summarize every committed vertex. Used only
    /// by the CLI's `graph-info` subcommand; never touches a node's channels.
    pub async fn describe(&self) -> Vec<NodeSummary> {
        let state = self.state.lock().await;
        state
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                slot.as_ref().map(|n| NodeSummary {
                    index: idx,
                    name: n.name.clone(),
                    sig: n.info.sig.to_string(),
                    pure: n.info.pure,
                    in_edges: n.in_edges.clone(),
                })
            })
            .collect()
    }
}

fn spawn_aggregator(
    upstream: Vec<(String, watch::Receiver<Option<Value>>)>,
    out: mpsc::Sender<ArgsFrame>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if upstream.is_empty() {
            // Source node: emit a single empty args frame so `stream` can
            // start, then exit — there is nothing further to aggregate.
            let _ = out.send(ArgsFrame::default()).await;
            return;
        }

        let streams = upstream.into_iter().map(|(name, rx)| {
            tokio_stream::wrappers::WatchStream::new(rx)
                .filter_map(move |v| {
                    let name = name.clone();
                    futures::future::ready(v.map(|val| (name, val)))
                })
                .boxed()
        });
        let mut merged = futures::stream::select_all(streams);

        let mut frame = ArgsFrame::default();
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                item = merged.next() => {
                    let Some((name, value)) = item else { return };
                    let unchanged = frame.get(&name).is_some_and(|p| crate::value::cmp(p, &value).is_none());
                    frame.insert(name, value);
                    if !unchanged && out.send(frame.clone()).await.is_err() {
                        return;
                    }
                }
            }
        }
    })
}
