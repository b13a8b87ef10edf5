//! Typed reactive dataflow runtime for the mgmtlang function graph: a graph
//! of function-valued nodes rewritten in place as its own computation
//! proceeds, driven by a typed value model and a small resolver for the
//! handful of polymorphic node kinds (`map`, `for`, `forkv`, `call`).

pub mod engine;
pub mod error;
pub mod graph;
pub mod node;
pub mod registry;
pub mod resolver;
pub mod value;
pub mod world;

pub use engine::{new_engine, Engine, EngineConfig};
pub use error::{FuncError, Result};
pub use graph::{NodeIndex, NodeSummary, Txn, VertexRef};
pub use node::{Invariant, Node, NodeInfo, PartialType, PartialValues};
pub use value::{Type, Value};
pub use world::World;
