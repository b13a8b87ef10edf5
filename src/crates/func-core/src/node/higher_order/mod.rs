//! Subgraph-rewriting nodes (spec §4.4) — the hardest part of the runtime.
//! Each submodule implements one node but shares the common protocol:
//!
//! 1. observe a trigger value;
//! 2. decide whether its *shape* changed (not merely its value);
//! 3. if so, `txn.reverse()` the previous subgraph, build a new one, `txn.commit()`;
//! 4. push the triggering value through a [`RetainedSource`] marked
//!    `erase()` so `reverse()` never tears it down.

pub mod call;
pub mod expr_if;
pub mod for_node;
pub mod map;
pub mod stmt_if;

use tokio::sync::mpsc;

use crate::error::{FuncError, Result};
use crate::graph::{NodeIndex, Txn};
use crate::node::primitive::ChannelSource;
use crate::value::{Type, Value};

/// A channel-backed source vertex created once by a rewriting node and
/// kept alive across every subsequent rebuild. Lets the freshly-built
/// subgraph keep observing the node's triggering value (the list being
/// mapped over, the map being iterated, the active branch's captured
/// environment, ...) without that observation itself forcing a rebuild.
pub struct RetainedSource {
    idx: Option<NodeIndex>,
    tx: Option<mpsc::Sender<Value>>,
    ty: Type,
}

impl RetainedSource {
    pub fn new(ty: Type) -> Self {
        Self { idx: None, tx: None, ty }
    }

    /// Create the source on first use (a standalone commit, immediately
    /// marked `erase`), or return its existing index.
    pub async fn ensure(&mut self, txn: &mut Txn, name: &str) -> Result<NodeIndex> {
        if let Some(idx) = self.idx {
            return Ok(idx);
        }
        let (tx, rx) = mpsc::channel(1);
        let node = Box::new(ChannelSource::new(self.ty.clone(), rx));
        txn.add_vertex(name, node);
        let record = txn.commit().await?;
        let idx = *record
            .added_nodes
            .first()
            .ok_or_else(|| FuncError::Programming("RetainedSource: commit produced no vertex".into()))?;
        txn.mark_erase(idx).await;
        self.idx = Some(idx);
        self.tx = Some(tx);
        Ok(idx)
    }

    pub fn index(&self) -> Option<NodeIndex> {
        self.idx
    }

    /// Push a new value of the triggering input through to whatever
    /// extractor nodes currently read from this source.
    pub async fn push(&self, value: Value) -> Result<()> {
        if let Some(tx) = &self.tx {
            tx.send(value).await.map_err(|e| FuncError::Send(e.to_string()))?;
        }
        Ok(())
    }
}

/// Extracts `list[index]` from a retained list source.
pub struct ListIndex {
    index: usize,
    elem_ty: Type,
}

impl ListIndex {
    pub fn new(index: usize, elem_ty: Type) -> Self {
        Self { index, elem_ty }
    }
}

#[async_trait::async_trait]
impl crate::node::Node for ListIndex {
    fn arg_name(&self, _i: usize) -> &str {
        "list"
    }

    fn build(&mut self, _sig: Type) -> Result<()> {
        Ok(())
    }

    fn info(&self) -> crate::node::NodeInfo {
        crate::node::NodeInfo::pure_fast(Type::Func(
            vec![Type::List(Box::new(self.elem_ty.clone()))],
            Box::new(self.elem_ty.clone()),
        ))
    }

    fn copy(&self) -> Box<dyn crate::node::Node> {
        Box::new(ListIndex { index: self.index, elem_ty: self.elem_ty.clone() })
    }

    async fn init(&mut self, _ctx: crate::node::InitCtx) -> Result<()> {
        Ok(())
    }

    async fn stream(&mut self, mut ctx: crate::node::StreamCtx) -> Result<()> {
        while let Some(frame) = ctx.input.recv().await {
            ctx.emit(self.project(&frame)?);
        }
        Ok(())
    }

    async fn call(&self, _ctx: &crate::node::CallCtx, args: crate::node::ArgsFrame) -> Result<Value> {
        self.project(&args)
    }
}

impl ListIndex {
    fn project(&self, frame: &crate::node::ArgsFrame) -> Result<Value> {
        match frame.get("list") {
            Some(Value::List(_, items)) => items
                .get(self.index)
                .cloned()
                .ok_or_else(|| FuncError::Programming(format!("ListIndex: index {} out of range", self.index))),
            other => Err(FuncError::Programming(format!("ListIndex: expected list, got {other:?}"))),
        }
    }
}

/// Extracts `map[key]`'s current value from a retained map source, for a
/// constant `key` fixed at build time (keys never change across a rebuild
/// — only value-set membership does).
pub struct MapProject {
    key: Value,
    val_ty: Type,
}

impl MapProject {
    pub fn new(key: Value, val_ty: Type) -> Self {
        Self { key, val_ty }
    }
}

#[async_trait::async_trait]
impl crate::node::Node for MapProject {
    fn arg_name(&self, _i: usize) -> &str {
        "map"
    }

    fn build(&mut self, _sig: Type) -> Result<()> {
        Ok(())
    }

    fn info(&self) -> crate::node::NodeInfo {
        crate::node::NodeInfo::pure_fast(Type::Func(
            vec![Type::Map(Box::new(self.key.type_of()), Box::new(self.val_ty.clone()))],
            Box::new(self.val_ty.clone()),
        ))
    }

    fn copy(&self) -> Box<dyn crate::node::Node> {
        Box::new(MapProject { key: self.key.clone(), val_ty: self.val_ty.clone() })
    }

    async fn init(&mut self, _ctx: crate::node::InitCtx) -> Result<()> {
        Ok(())
    }

    async fn stream(&mut self, mut ctx: crate::node::StreamCtx) -> Result<()> {
        while let Some(frame) = ctx.input.recv().await {
            ctx.emit(self.project(&frame)?);
        }
        Ok(())
    }

    async fn call(&self, _ctx: &crate::node::CallCtx, args: crate::node::ArgsFrame) -> Result<Value> {
        self.project(&args)
    }
}

impl MapProject {
    fn project(&self, frame: &crate::node::ArgsFrame) -> Result<Value> {
        match frame.get("map") {
            Some(Value::Map(_, _, pairs)) => pairs
                .iter()
                .find(|(k, _)| crate::value::cmp(k, &self.key).is_none())
                .map(|(_, v)| v.clone())
                .ok_or_else(|| FuncError::Programming("MapProject: key not present".into())),
            other => Err(FuncError::Programming(format!("MapProject: expected map, got {other:?}"))),
        }
    }
}

/// Compare two lists of keys for set-equality under the `Cmp` relation,
/// order-independent — spec §4.4.3: "same keys in any order ⇒ no rebuild".
pub fn same_key_set(a: &[Value], b: &[Value]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|k| b.iter().any(|k2| crate::value::cmp(k, k2).is_none()))
}
