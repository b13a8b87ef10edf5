//! `Exchange` / `KVLookup` (spec §4.5): both reader and writer of a shared
//! namespace. Every input value change writes this host's value via
//! `StrMapSet`; independently, every watch event re-reads the whole
//! namespace via `StrMapGet` and emits it as `map[str,str]`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{FuncError, Result};
use crate::node::{ArgsFrame, CallCtx, InitCtx, Node, NodeInfo, StreamCtx};
use crate::value::{Type, Value};
use crate::world::World;

fn out_type() -> Type {
    Type::Map(Box::new(Type::Str), Box::new(Type::Str))
}

pub struct Exchange {
    namespace: Option<String>,
    last_written: Option<String>,
}

impl Exchange {
    pub fn new() -> Self {
        Self { namespace: None, last_written: None }
    }
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}

async fn watch_if_known(world: &Arc<dyn World>, ns: &Option<String>) -> Result<()> {
    match ns {
        Some(ns) => world.str_map_watch(ns).await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl Node for Exchange {
    fn arg_name(&self, i: usize) -> &str {
        match i {
            0 => "ns",
            1 => "value",
            _ => unreachable!("Exchange has exactly 2 inputs"),
        }
    }

    fn build(&mut self, sig: Type) -> Result<()> {
        let expected = Type::Func(vec![Type::Str, Type::Str], Box::new(out_type()));
        if sig != expected {
            return Err(FuncError::Type(format!("Exchange: expected {expected}, got {sig}")));
        }
        Ok(())
    }

    fn info(&self) -> NodeInfo {
        NodeInfo::world_coupled(Type::Func(vec![Type::Str, Type::Str], Box::new(out_type())))
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(Exchange::new())
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
                    // an early frame may be missing a key — wait for a
                    // complete one rather than treating that as fatal.
                    let ns = match frame.get("ns") {
                        None => continue,
                        Some(Value::Str(s)) => s.clone(),
                        Some(other) => {
                            return Err(FuncError::Programming(format!("Exchange: expected str \"ns\" arg, got {other:?}")));
                        }
                    };
                    let value = match frame.get("value") {
                        None => continue,
                        Some(Value::Str(s)) => s.clone(),
                        Some(other) => {
                            return Err(FuncError::Programming(format!(
                                "Exchange: expected str \"value\" arg, got {other:?}"
                            )));
                        }
                    };
                    match &self.namespace {
                        None => self.namespace = Some(ns.clone()),
                        Some(prev) if *prev != ns => {
                            return Err(FuncError::Programming(format!(
                                "Exchange: primary key changed from {prev:?} to {ns:?}"
                            )));
                        }
                        _ => {}
                    }
                    if self.last_written.as_deref() != Some(value.as_str()) {
                        ctx.world.str_map_set(&ns, &value).await?;
                        self.last_written = Some(value);
                    }
                }
                res = watch_if_known(&ctx.world, &self.namespace) => {
                    match res {
                        Ok(()) => {
                            let ns = self.namespace.clone().expect("watch only resolves once ns is known");
                            let map = ctx.world.str_map_get(&ns).await?;
                            let pairs = map.into_iter().map(|(k, v)| (Value::Str(k), Value::Str(v))).collect();
                            ctx.emit(Value::Map(Type::Str, Type::Str, pairs));
                        }
                        Err(FuncError::EndOfStream) => return Ok(()),
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    async fn call(&self, _ctx: &CallCtx, _args: ArgsFrame) -> Result<Value> {
        Err(FuncError::CannotSpeculate("Exchange requires a live namespace watch".into()))
    }
}
