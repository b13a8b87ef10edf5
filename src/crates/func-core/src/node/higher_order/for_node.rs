//! `For` / `ForKV` (spec §4.4.3): iterate a list or map purely for the
//! side-effecting resource statements the body wires up, emitting a unit
//! sentinel once the iteration's subgraph is in place. Unlike `Map`, the
//! body is not a single `FuncValue` but two closures supplied by the
//! loader: `append_iter` wires one iteration's statements into the
//! transaction, `clear_iter` is notified of the length being torn down.
//!
//! There is no dedicated `Unit` type in the structural type grammar; the
//! empty struct `struct{}` serves as it, matching spec §3's container
//! grammar exactly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{FuncError, Result};
use crate::graph::{Txn, VertexRef};
use crate::node::higher_order::{same_key_set, ListIndex, MapProject, RetainedSource};
use crate::node::primitive::Const;
use crate::node::{ArgsFrame, CallCtx, InitCtx, Node, NodeInfo, StreamCtx};
use crate::value::{Type, Value};

/// The unit sentinel value: an empty struct.
pub fn unit() -> Value {
    Value::Struct(vec![], HashMap::new())
}

pub fn unit_type() -> Type {
    Type::Struct(vec![])
}

pub type AppendList = Arc<dyn Fn(&mut Txn, usize, VertexRef) -> Result<()> + Send + Sync>;
pub type ClearList = Arc<dyn Fn(usize) + Send + Sync>;
pub type AppendMap = Arc<dyn Fn(&mut Txn, &str, VertexRef, VertexRef) -> Result<()> + Send + Sync>;
pub type ClearMap = Arc<dyn Fn(usize) + Send + Sync>;

pub struct For {
    elem_ty: Type,
    append: AppendList,
    clear: ClearList,
    txn: Option<Txn>,
    source: RetainedSource,
    current_len: Option<usize>,
}

impl For {
    pub fn new(elem_ty: Type, append: AppendList, clear: ClearList) -> Self {
        Self {
            source: RetainedSource::new(Type::List(Box::new(elem_ty.clone()))),
            elem_ty,
            append,
            clear,
            txn: None,
            current_len: None,
        }
    }

    async fn rebuild(&mut self, len: usize) -> Result<()> {
        let txn = self.txn.as_mut().expect("init must run before stream");
        if let Some(prev_len) = self.current_len {
            (self.clear)(prev_len);
        }
        txn.reverse().await?;

        let source_idx = self.source.ensure(txn, "for_list_source").await?;
        for i in 0..len {
            let value_node = txn.add_vertex(format!("for_elem_{i}"), Box::new(ListIndex::new(i, self.elem_ty.clone())));
            txn.add_edge(VertexRef::Existing(source_idx), value_node, "list");
            (self.append)(txn, i, value_node)?;
        }
        txn.commit().await?;
        self.current_len = Some(len);
        Ok(())
    }
}

#[async_trait]
impl Node for For {
    fn arg_name(&self, i: usize) -> &str {
        assert_eq!(i, 0, "For has exactly one input: the iterated list");
        "list"
    }

    fn build(&mut self, sig: Type) -> Result<()> {
        if let Type::Func(params, out) = &sig {
            if let [Type::List(elem)] = params.as_slice() {
                if **out == unit_type() {
                    self.elem_ty = (**elem).clone();
                    return Ok(());
                }
            }
        }
        Err(FuncError::Type(format!("For: bad signature {sig}")))
    }

    fn info(&self) -> NodeInfo {
        NodeInfo::world_coupled(Type::Func(vec![Type::List(Box::new(self.elem_ty.clone()))], Box::new(unit_type())))
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(For {
            source: RetainedSource::new(Type::List(Box::new(self.elem_ty.clone()))),
            elem_ty: self.elem_ty.clone(),
            append: self.append.clone(),
            clear: self.clear.clone(),
            txn: None,
            current_len: None,
        })
    }

    async fn init(&mut self, ctx: InitCtx) -> Result<()> {
        self.txn = Some(ctx.txn);
        Ok(())
    }

    async fn stream(&mut self, mut ctx: StreamCtx) -> Result<()> {
        while let Some(frame) = ctx.input.recv().await {
            let Some(Value::List(_, items)) = frame.get("list").cloned() else {
                return Err(FuncError::Programming("For: expected list arg".into()));
            };
            if self.current_len != Some(items.len()) {
                self.rebuild(items.len()).await?;
                ctx.emit(unit());
            }
            self.source.push(Value::List(self.elem_ty.clone(), items)).await?;
        }
        Ok(())
    }

    async fn call(&self, _ctx: &CallCtx, _args: ArgsFrame) -> Result<Value> {
        Err(FuncError::CannotSpeculate("For requires a live graph to wire its body".into()))
    }
}

pub struct ForKV {
    key_ty: Type,
    val_ty: Type,
    append: AppendMap,
    clear: ClearMap,
    txn: Option<Txn>,
    source: RetainedSource,
    current_keys: Vec<Value>,
}

impl ForKV {
    pub fn new(key_ty: Type, val_ty: Type, append: AppendMap, clear: ClearMap) -> Self {
        Self {
            source: RetainedSource::new(Type::Map(Box::new(key_ty.clone()), Box::new(val_ty.clone()))),
            key_ty,
            val_ty,
            append,
            clear,
            txn: None,
            current_keys: Vec::new(),
        }
    }

    async fn rebuild(&mut self, keys: &[Value]) -> Result<()> {
        let txn = self.txn.as_mut().expect("init must run before stream");
        (self.clear)(self.current_keys.len());
        txn.reverse().await?;

        let source_idx = self.source.ensure(txn, "forkv_map_source").await?;
        for key in keys {
            let ptr_key = format!("{key:?}");
            let key_node = txn.add_vertex(format!("forkv_key_{ptr_key}"), Box::new(Const::new(key.clone())));
            let val_node = txn.add_vertex(format!("forkv_val_{ptr_key}"), Box::new(MapProject::new(key.clone(), self.val_ty.clone())));
            txn.add_edge(VertexRef::Existing(source_idx), val_node, "map");
            (self.append)(txn, &ptr_key, key_node, val_node)?;
        }
        txn.commit().await?;
        self.current_keys = keys.to_vec();
        Ok(())
    }
}

#[async_trait]
impl Node for ForKV {
    fn arg_name(&self, i: usize) -> &str {
        assert_eq!(i, 0, "ForKV has exactly one input: the iterated map");
        "map"
    }

    fn build(&mut self, sig: Type) -> Result<()> {
        if let Type::Func(params, out) = &sig {
            if let [Type::Map(k, v)] = params.as_slice() {
                if **out == unit_type() {
                    self.key_ty = (**k).clone();
                    self.val_ty = (**v).clone();
                    return Ok(());
                }
            }
        }
        Err(FuncError::Type(format!("ForKV: bad signature {sig}")))
    }

    fn info(&self) -> NodeInfo {
        NodeInfo::world_coupled(Type::Func(
            vec![Type::Map(Box::new(self.key_ty.clone()), Box::new(self.val_ty.clone()))],
            Box::new(unit_type()),
        ))
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(ForKV {
            source: RetainedSource::new(Type::Map(Box::new(self.key_ty.clone()), Box::new(self.val_ty.clone()))),
            key_ty: self.key_ty.clone(),
            val_ty: self.val_ty.clone(),
            append: self.append.clone(),
            clear: self.clear.clone(),
            txn: None,
            current_keys: Vec::new(),
        })
    }

    async fn init(&mut self, ctx: InitCtx) -> Result<()> {
        self.txn = Some(ctx.txn);
        Ok(())
    }

    async fn stream(&mut self, mut ctx: StreamCtx) -> Result<()> {
        while let Some(frame) = ctx.input.recv().await {
            let Some(Value::Map(_, _, pairs)) = frame.get("map").cloned() else {
                return Err(FuncError::Programming("ForKV: expected map arg".into()));
            };
            let keys: Vec<Value> = pairs.iter().map(|(k, _)| k.clone()).collect();
            if !same_key_set(&keys, &self.current_keys) {
                self.rebuild(&keys).await?;
                ctx.emit(unit());
            }
            self.source.push(Value::Map(self.key_ty.clone(), self.val_ty.clone(), pairs)).await?;
        }
        Ok(())
    }

    async fn call(&self, _ctx: &CallCtx, _args: ArgsFrame) -> Result<Value> {
        Err(FuncError::CannotSpeculate("ForKV requires a live graph to wire its body".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_is_the_empty_struct() {
        assert_eq!(unit().type_of(), unit_type());
        assert_eq!(unit_type(), Type::Struct(vec![]));
    }
}
