//! `ExprIf` (spec §4.4.5): like `StmtIf`, but the active branch produces a
//! value the node relays downstream, not just statements. Rebuilds on
//! condition flip exactly like `StmtIf`; the branch's result is collected
//! through a `ChannelSink` and forwarded via `call`'s sibling relay loop,
//! the same protocol `Call` and `Map` use.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{FuncError, Result};
use crate::graph::{Txn, VertexRef};
use crate::node::higher_order::RetainedSource;
use crate::node::primitive::ChannelSink;
use crate::node::{ArgsFrame, CallCtx, InitCtx, Node, NodeInfo, StreamCtx};
use crate::value::{FuncValue, Type, Value};

pub struct ExprIf {
    env_ty: Type,
    out_ty: Type,
    then_branch: FuncValue,
    else_branch: FuncValue,
    txn: Option<Txn>,
    env_source: RetainedSource,
    current_branch: Option<bool>,
    sink_rx: Option<mpsc::Receiver<Value>>,
}

impl ExprIf {
    pub fn new(env_ty: Type, out_ty: Type, then_branch: FuncValue, else_branch: FuncValue) -> Self {
        Self {
            env_source: RetainedSource::new(env_ty.clone()),
            env_ty,
            out_ty,
            then_branch,
            else_branch,
            txn: None,
            current_branch: None,
            sink_rx: None,
        }
    }

    async fn rebuild(&mut self, cond: bool) -> Result<()> {
        let txn = self.txn.as_mut().expect("init must run before stream");
        txn.reverse().await?;

        let source_idx = self.env_source.ensure(txn, "expr_if_env_source").await?;
        let branch = if cond { &self.then_branch } else { &self.else_branch };
        let output = branch.build(txn, &[VertexRef::Existing(source_idx)])?;

        let (tx, rx) = mpsc::channel(1);
        let sink = txn.add_vertex("expr_if_sink", Box::new(ChannelSink::new("v", self.out_ty.clone(), tx)));
        txn.add_edge(output, sink, "v");
        txn.commit().await?;

        self.sink_rx = Some(rx);
        self.current_branch = Some(cond);
        Ok(())
    }
}

#[async_trait]
impl Node for ExprIf {
    fn arg_name(&self, i: usize) -> &str {
        match i {
            0 => "cond",
            1 => "env",
            _ => unreachable!("ExprIf has exactly 2 inputs"),
        }
    }

    fn build(&mut self, sig: Type) -> Result<()> {
        if let Type::Func(params, out) = &sig {
            if let [Type::Bool, env] = params.as_slice() {
                self.env_ty = env.clone();
                self.out_ty = (**out).clone();
                return Ok(());
            }
        }
        Err(FuncError::Type(format!("ExprIf: bad signature {sig}")))
    }

    fn info(&self) -> NodeInfo {
        NodeInfo::world_coupled(Type::Func(vec![Type::Bool, self.env_ty.clone()], Box::new(self.out_ty.clone())))
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(ExprIf::new(self.env_ty.clone(), self.out_ty.clone(), self.then_branch.clone(), self.else_branch.clone()))
    }

    async fn init(&mut self, ctx: InitCtx) -> Result<()> {
        self.txn = Some(ctx.txn);
        Ok(())
    }

    async fn stream(&mut self, mut ctx: StreamCtx) -> Result<()> {
        loop {
            tokio::select! {
                frame = ctx.input.recv() => {
                    let Some(frame) = frame else { return Ok(()) };
                    // The per-edge aggregator delivers one key at a time, so
                    // an early frame may still be missing "cond" or "env" —
                    // wait for a complete one rather than failing on it.
                    let cond = match frame.get("cond") {
                        None => continue,
                        Some(Value::Bool(b)) => *b,
                        Some(other) => {
                            return Err(FuncError::Programming(format!("ExprIf: expected bool \"cond\" arg, got {other:?}")));
                        }
                    };
                    let Some(env) = frame.get("env").cloned() else { continue };
                    if self.current_branch != Some(cond) {
                        self.rebuild(cond).await?;
                    }
                    self.env_source.push(env).await?;
                }
                Some(v) = recv_opt(&mut self.sink_rx) => {
                    ctx.emit(v);
                }
                else => return Ok(()),
            }
        }
    }

    async fn call(&self, _ctx: &CallCtx, _args: ArgsFrame) -> Result<Value> {
        Err(FuncError::CannotSpeculate("ExprIf requires a live graph to wire its branch".into()))
    }
}

async fn recv_opt(rx: &mut Option<mpsc::Receiver<Value>>) -> Option<Value> {
    match rx {
        Some(r) => r.recv().await,
        None => std::future::pending().await,
    }
}
