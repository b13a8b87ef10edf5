//! `Collect` / `Res` (spec §4.5): pulls exported-resource blobs of a fixed
//! `kind` (the primary key) matching a filter set computed from the second
//! argument, which may be a single name, a list of names, or a list of
//! `{name, host}` structs — the shape is resolved once at `build()` time,
//! matching the resolver's "collect / schedule: first string arg
//! determines domain" pattern (spec §4.6).
//!
//! A returned item's `data` (an arbitrary JSON blob in the world's terms)
//! is surfaced as its JSON-text encoding in a `str` field — the structural
//! type grammar has no "any" type, so this is the node's own concrete
//! choice of ground type, not a capability of the world interface itself.
//!
//! `with_retry` wraps the `ResCollect::res_collect` RPC in a `RetryPolicy`
//! (SPEC_FULL §4).

use async_trait::async_trait;

use crate::error::{FuncError, Result};
use crate::node::world_coupled::RetryPolicy;
use crate::node::{ArgsFrame, CallCtx, InitCtx, Node, NodeInfo, StreamCtx};
use crate::value::{Type, Value};
use crate::world::{ResFilter, ResItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NamesShape {
    Single,
    List,
    StructList,
}

fn struct_shape_type() -> Type {
    Type::Struct(vec![("name".into(), Type::Str), ("host".into(), Type::Str)])
}

fn item_type() -> Type {
    Type::Struct(vec![
        ("kind".into(), Type::Str),
        ("name".into(), Type::Str),
        ("host".into(), Type::Str),
        ("data".into(), Type::Str),
    ])
}

fn out_type() -> Type {
    Type::List(Box::new(item_type()))
}

pub struct Collect {
    shape: NamesShape,
    kind: Option<String>,
    last_names: Option<Value>,
    retry: Option<RetryPolicy>,
}

impl Collect {
    pub fn new() -> Self {
        Self { shape: NamesShape::Single, kind: None, last_names: None, retry: None }
    }

    /// Retry a transient `ResCollect::res_collect` failure up to
    /// `policy.attempts` times.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    async fn recompute(&self, ctx: &StreamCtx, kind: &str, names: &Value) -> Result<()> {
        let filters = self.filters_from(kind, names)?;
        if filters.is_empty() {
            ctx.emit(Value::List(item_type(), Vec::new()));
            return Ok(());
        }
        let items = match &self.retry {
            Some(policy) => policy.run(|| ctx.world.res_collect(&filters)).await?,
            None => ctx.world.res_collect(&filters).await?,
        };
        for item in &items {
            self.validate_item(kind, item)?;
        }
        let values = items.iter().map(Collect::item_to_value).collect();
        ctx.emit(Value::List(item_type(), values));
        Ok(())
    }

    fn filters_from(&self, kind: &str, names: &Value) -> Result<Vec<ResFilter>> {
        match (self.shape, names) {
            (NamesShape::Single, Value::Str(name)) => {
                if name.is_empty() {
                    Ok(Vec::new())
                } else {
                    Ok(vec![ResFilter { kind: kind.into(), name: name.clone(), host: String::new() }])
                }
            }
            (NamesShape::List, Value::List(_, items)) => items
                .iter()
                .map(|v| match v {
                    Value::Str(name) => Ok(ResFilter { kind: kind.into(), name: name.clone(), host: String::new() }),
                    other => Err(FuncError::Programming(format!("Collect: expected str in names list, got {other:?}"))),
                })
                .collect(),
            (NamesShape::StructList, Value::List(_, items)) => items
                .iter()
                .map(|v| match v {
                    Value::Struct(_, fields) => {
                        let name = match fields.get("name") {
                            Some(Value::Str(s)) => s.clone(),
                            _ => return Err(FuncError::Programming("Collect: missing str \"name\" field".into())),
                        };
                        let host = match fields.get("host") {
                            Some(Value::Str(s)) => s.clone(),
                            _ => return Err(FuncError::Programming("Collect: missing str \"host\" field".into())),
                        };
                        Ok(ResFilter { kind: kind.into(), name, host })
                    }
                    other => Err(FuncError::Programming(format!("Collect: expected struct in names list, got {other:?}"))),
                })
                .collect(),
            (shape, other) => Err(FuncError::Programming(format!(
                "Collect: names arg {other:?} does not match resolved shape {shape:?}"
            ))),
        }
    }

    fn validate_item(&self, kind: &str, item: &ResItem) -> Result<()> {
        if item.host.is_empty() || item.host == "*" {
            return Err(FuncError::Programming(format!("Collect: result item has invalid host {:?}", item.host)));
        }
        if item.name.is_empty() {
            return Err(FuncError::Programming("Collect: result item has empty name".into()));
        }
        if item.data.is_null() {
            return Err(FuncError::Programming("Collect: result item has empty data".into()));
        }
        if item.kind != kind {
            return Err(FuncError::Programming(format!(
                "Collect: result item kind {:?} does not match requested kind {kind:?}",
                item.kind
            )));
        }
        Ok(())
    }

    fn item_to_value(item: &ResItem) -> Value {
        let mut v = Value::new_struct(item_type_fields());
        v.set("kind", Value::Str(item.kind.clone())).expect("declared field");
        v.set("name", Value::Str(item.name.clone())).expect("declared field");
        v.set("host", Value::Str(item.host.clone())).expect("declared field");
        v.set("data", Value::Str(item.data.to_string())).expect("declared field");
        v
    }
}

fn item_type_fields() -> Vec<(String, Type)> {
    match item_type() {
        Type::Struct(fields) => fields,
        _ => unreachable!(),
    }
}

impl Default for Collect {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for Collect {
    fn arg_name(&self, i: usize) -> &str {
        match i {
            0 => "kind",
            1 => "names",
            _ => unreachable!("Collect has exactly 2 inputs"),
        }
    }

    fn build(&mut self, sig: Type) -> Result<()> {
        if let Type::Func(params, out) = &sig {
            if let [Type::Str, names_ty] = params.as_slice() {
                if **out == out_type() {
                    self.shape = match names_ty {
                        Type::Str => NamesShape::Single,
                        Type::List(elem) if **elem == Type::Str => NamesShape::List,
                        Type::List(elem) if **elem == struct_shape_type() => NamesShape::StructList,
                        _ => return Err(FuncError::Type(format!("Collect: unsupported names shape {names_ty}"))),
                    };
                    return Ok(());
                }
            }
        }
        Err(FuncError::Type(format!("Collect: bad signature {sig}")))
    }

    fn info(&self) -> NodeInfo {
        let names_ty = match self.shape {
            NamesShape::Single => Type::Str,
            NamesShape::List => Type::List(Box::new(Type::Str)),
            NamesShape::StructList => Type::List(Box::new(struct_shape_type())),
        };
        NodeInfo::world_coupled(Type::Func(vec![Type::Str, names_ty], Box::new(out_type())))
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(Collect {
            shape: self.shape,
            kind: self.kind.clone(),
            last_names: None,
            retry: self.retry.clone(),
        })
    }

    async fn init(&mut self, _ctx: InitCtx) -> Result<()> {
        Ok(())
    }

    async fn stream(&mut self, mut ctx: StreamCtx) -> Result<()> {
        loop {
            tokio::select! {
                frame = ctx.input.recv() => {
                    let Some(frame) = frame else { return Ok(()) };
                    // The per-edge aggregator delivers one key at a time, so
                    // a node with more than one input can see a frame that
                    // doesn't carry every argument yet — wait for the next
                    // one rather than treating that as a programming error.
                    let kind = match frame.get("kind") {
                        None => continue,
                        Some(Value::Str(s)) => s.clone(),
                        Some(other) => {
                            return Err(FuncError::Programming(format!("Collect: expected str \"kind\" arg, got {other:?}")));
                        }
                    };
                    let Some(names) = frame.get("names").cloned() else { continue };
                    match &self.kind {
                        None => self.kind = Some(kind.clone()),
                        Some(prev) if *prev != kind => {
                            return Err(FuncError::Programming(format!(
                                "Collect: primary key changed from {prev:?} to {kind:?}"
                            )));
                        }
                        _ => {}
                    }
                    self.recompute(&ctx, &kind, &names).await?;
                    self.last_names = Some(names);
                }
                res = watch_if_known(&ctx.world, &self.kind) => {
                    match res {
                        Ok(()) => {
                            if let (Some(kind), Some(names)) = (self.kind.clone(), self.last_names.clone()) {
                                self.recompute(&ctx, &kind, &names).await?;
                            }
                        }
                        Err(FuncError::EndOfStream) => return Ok(()),
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    async fn call(&self, _ctx: &CallCtx, _args: ArgsFrame) -> Result<Value> {
        Err(FuncError::CannotSpeculate("Collect requires a live resource watch".into()))
    }
}

async fn watch_if_known(world: &std::sync::Arc<dyn crate::world::World>, kind: &Option<String>) -> Result<()> {
    match kind {
        Some(kind) => world.res_watch(kind).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_retry_constructs_a_collect_carrying_the_policy() {
        let node = Collect::new().with_retry(RetryPolicy::new(3, std::time::Duration::from_millis(1)));
        assert!(node.retry.is_some());
    }
}
