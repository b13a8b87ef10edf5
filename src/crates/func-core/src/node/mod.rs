//! The uniform node contract (spec §4): every vertex in the graph, from a
//! `Const` to `Schedule`, implements [`Node`]. Hooks the contract calls
//! "optional" (`infer`, `call`, `cleanup`) are modeled as default methods
//! returning a sentinel that means "this node does not implement this
//! capability" — the engine checks that sentinel rather than downcasting to
//! a capability trait object, which keeps node storage a single
//! `Box<dyn Node>` slot in the arena.

pub mod higher_order;
pub mod primitive;
pub mod structural;
pub mod world_coupled;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::Result;
use crate::graph::Txn;
use crate::value::{Type, Value, VarId};
use crate::world::World;

/// The aggregated current value of every inbound edge, keyed by the
/// argument name the consuming node declared via [`Node::arg_name`].
/// Source nodes (no inbound edges) receive a single empty frame so their
/// `stream` can start.
pub type ArgsFrame = HashMap<String, Value>;

/// Context handed to [`Node::init`]. The node stores whatever it needs
/// (typically just `txn` and `world`) on itself; this struct is consumed
/// once and not retained by the engine.
pub struct InitCtx {
    pub txn: Txn,
    pub hostname: String,
    pub world: std::sync::Arc<dyn World>,
    pub debug: bool,
}

/// Context handed to [`Node::stream`] for the lifetime of the node's single
/// long-running task.
pub struct StreamCtx {
    pub input: mpsc::Receiver<ArgsFrame>,
    pub output: watch::Sender<Option<Value>>,
    pub hostname: String,
    pub world: std::sync::Arc<dyn World>,
    pub debug: bool,
    pub shutdown: watch::Receiver<bool>,
}

impl StreamCtx {
    /// Send a value, deduplicating against the last sent value per spec
    /// §4 ("glitch-free behaviour is not guaranteed, but value
    /// deduplication is"). Closing (dropping `output`) is the node's own
    /// responsibility on return from `stream`.
    pub fn emit(&self, value: Value) {
        let changed = match &*self.output.borrow() {
            Some(prev) => crate::value::cmp(prev, &value).is_some(),
            None => true,
        };
        if changed {
            let _ = self.output.send(Some(value));
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Context handed to [`Node::call`]. Call is synchronous speculation: no
/// channels, just the world and a read-only hostname/debug pair.
pub struct CallCtx {
    pub hostname: String,
    pub world: std::sync::Arc<dyn World>,
    pub debug: bool,
}

pub struct CleanupCtx {
    pub hostname: String,
}

/// Static, build-time facts about a node, queried by the engine and the
/// speculative evaluator (spec §4: `sig`, `pure`, `memo`, `fast`, `spec`,
/// `err`).
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub sig: Type,
    /// No observable side effects beyond its return value.
    pub pure: bool,
    /// Repeated calls with equal args may be served from a cache.
    pub memo: bool,
    /// Cheap enough to run outside the scheduled graph (e.g. during
    /// inference or validation).
    pub fast: bool,
    /// Safe to invoke via `call()` ahead of the graph actually reaching
    /// this node (`pure && fast` is necessary but not sufficient; some
    /// world-coupled nodes are fast but never speculatable).
    pub spec: bool,
    /// This node's `stream` can return a `FuncError` other than
    /// `EndOfStream` under normal operation (used by validators to flag
    /// nodes that need explicit error-handling wiring downstream).
    pub err: bool,
}

impl NodeInfo {
    pub fn pure_fast(sig: Type) -> Self {
        Self { sig, pure: true, memo: true, fast: true, spec: true, err: false }
    }

    pub fn world_coupled(sig: Type) -> Self {
        Self { sig, pure: false, memo: false, fast: false, spec: false, err: true }
    }
}

/// A resolver-time invariant an `infer` implementation emits alongside a
/// resolved type, consumed by the unification solver in `resolver.rs`.
#[derive(Debug, Clone)]
pub enum Invariant {
    /// Two placeholders must resolve to the same ground type.
    SameAs(VarId, VarId),
    /// A placeholder must resolve to exactly this ground type.
    Equals(VarId, Type),
    /// A placeholder must resolve to `list[elem]` for some `elem`, itself
    /// recorded under a fresh id.
    ElemOf(VarId, VarId),
}

/// Partially-resolved type information available to `infer` before the
/// solver has finished: each argument's signature, possibly still
/// containing `Type::Var` placeholders.
#[derive(Debug, Clone, Default)]
pub struct PartialType {
    pub args: Vec<Type>,
}

/// Constant argument values already known at inference time (e.g. a
/// literal struct field name), used by nodes like `Get` whose output type
/// depends on a constant argument rather than purely on input types.
#[derive(Debug, Clone, Default)]
pub struct PartialValues {
    pub consts: HashMap<usize, Value>,
}

/// The uniform node contract (spec §4).
///
/// All object-safe methods; nodes are stored as `Box<dyn Node>` in the graph
/// arena.
#[async_trait]
pub trait Node: Send + Sync {
    /// Name of the `i`th positional argument, used to label inbound edges.
    fn arg_name(&self, i: usize) -> &str;

    /// Attempt to resolve this node's polymorphic output type and emit any
    /// invariants needed by the solver. Returns `None` for nodes whose
    /// signature is already fully ground at construction (most primitive
    /// and world-coupled nodes) — the engine treats `None` as "infer is not
    /// a capability this node implements", not as a failure.
    fn infer(&self, _partial: &PartialType, _consts: &PartialValues) -> Option<Result<(Type, Vec<Invariant>)>> {
        None
    }

    /// Specialize this node to a fully ground signature. Must be
    /// idempotent: calling `build` twice with the same signature leaves
    /// the node in the same state (spec §8).
    fn build(&mut self, sig: Type) -> Result<()>;

    /// Reject an internally inconsistent signature or configuration after
    /// `build`. Most nodes accept anything `build` accepted.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn info(&self) -> NodeInfo;

    /// Shallow copy preserving only the fields `build` produced — never
    /// runtime channel state, which is re-created by `init`.
    fn copy(&self) -> Box<dyn Node>;

    /// Called once before `stream`, handing the node its runtime handles.
    async fn init(&mut self, ctx: InitCtx) -> Result<()>;

    /// The node's single long-running task. Must close its output
    /// (by returning, which drops `ctx.output`) exactly once.
    async fn stream(&mut self, ctx: StreamCtx) -> Result<()>;

    /// Synchronous/speculative evaluation, valid only when
    /// `info().pure && info().fast && info().spec`. The default
    /// implementation signals the capability is absent; the resolver and
    /// tests check `info()` before ever calling this.
    async fn call(&self, _ctx: &CallCtx, _args: ArgsFrame) -> Result<Value> {
        Err(crate::error::FuncError::CannotSpeculate("node does not implement call".into()))
    }

    /// Run when the node's task is about to be torn down (deleted by a
    /// rewrite, or engine shutdown). Most rewriting nodes call
    /// `ctx` is intentionally minimal; a node that needs to reverse a
    /// transaction keeps its own `Txn` handle from `init` for that.
    async fn cleanup(&mut self, _ctx: &CleanupCtx) -> Result<()> {
        Ok(())
    }
}

