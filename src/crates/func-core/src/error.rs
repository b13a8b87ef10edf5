//! Error taxonomy for the reactive function runtime (spec §7).
//!
//! Each variant documents its propagation rule. `FuncError` is the single
//! error type nodes, the resolver, and the graph engine all return; lower
//! level errors from channels and the world capability layer fold into it
//! via `#[from]`, in the manner of `langgraph_core::error::GraphError`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FuncError>;

/// Runtime error taxonomy.
///
/// | Kind | Propagation |
/// |---|---|
/// | [`FuncError::Type`] | fatal at load time; the graph never starts |
/// | [`FuncError::Programming`] | fatal; bubbles up, engine tears down |
/// | [`FuncError::CannotSpeculate`] | returned to the caller of `call()`; caller may retry later |
/// | [`FuncError::World`] | surfaced as fatal by the node that saw it |
/// | [`FuncError::EndOfStream`] | not an error condition; the node's `stream` returns cleanly |
/// | [`FuncError::User`] | fatal (the DSL's `panic` function) |
/// | [`FuncError::Interrupt`] | internal sentinel, interpreted by the engine only |
#[derive(Error, Debug)]
pub enum FuncError {
    /// `build()` rejected an inconsistent or non-ground signature.
    #[error("type error: {0}")]
    Type(String),

    /// A node contract was violated — e.g. a struct is missing an expected
    /// field, or a capability was invoked out of lifecycle order.
    #[error("programming error: {0}")]
    Programming(String),

    /// `call()` was invoked on a node that is not `pure && fast && spec`, or
    /// before `init()`. Not a failure: the caller (the solver, or a test)
    /// should fall back to running the node inside a live graph.
    #[error("cannot speculate: {0}")]
    CannotSpeculate(String),

    /// The world capability layer reported a transient failure (RPC error,
    /// lease denied, ...). World-coupled nodes treat this as fatal for
    /// themselves; an outer supervisor may restart the engine.
    #[error("world error: {0}")]
    World(String),

    /// A watch stream closed without error. Not a failure: the node that
    /// observes this returns from `stream` cleanly, propagating
    /// end-of-stream to its output.
    #[error("end of stream")]
    EndOfStream,

    /// The DSL-level `panic` function was invoked with a truthy/non-empty
    /// argument.
    #[error("panic: {0}")]
    User(String),

    /// A higher-order node's `call()` observed that a rewrite is required.
    /// This is a distinguished sentinel interpreted only by the engine —
    /// never surfaced to DSL authors or treated as a normal error.
    #[error("interrupt: graph rebuild requested by {node}")]
    Interrupt { node: String },

    /// The unification solver could not resolve every placeholder, or two
    /// invariants conflicted.
    #[error("unification error: {0}")]
    Unify(String),

    /// A transaction was committed or reversed out of order, or referenced
    /// an index that no longer exists.
    #[error("transaction error: {0}")]
    Txn(String),

    #[error("channel send failed: {0}")]
    Send(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for FuncError {
    fn from(e: tokio::sync::mpsc::error::SendError<T>) -> Self {
        FuncError::Send(e.to_string())
    }
}
