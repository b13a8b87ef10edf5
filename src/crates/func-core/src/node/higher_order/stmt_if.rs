//! `StmtIf` (spec §4.4.4): captures an environment and picks one of two
//! statement-producing branches by a boolean condition. Only the active
//! branch's subgraph ever exists; flipping the condition reverses it and
//! builds the other one. Produces no meaningful value of its own — like
//! `For`, it emits the unit sentinel once per build so the engine's "every
//! output produces at least one value" rule is satisfied.

use async_trait::async_trait;

use crate::error::{FuncError, Result};
use crate::graph::{Txn, VertexRef};
use crate::node::higher_order::for_node::{unit, unit_type};
use crate::node::higher_order::RetainedSource;
use crate::node::{ArgsFrame, CallCtx, InitCtx, Node, NodeInfo, StreamCtx};
use crate::value::{FuncValue, Type, Value};

pub struct StmtIf {
    env_ty: Type,
    then_branch: FuncValue,
    else_branch: FuncValue,
    txn: Option<Txn>,
    env_source: RetainedSource,
    current_branch: Option<bool>,
}

impl StmtIf {
    pub fn new(env_ty: Type, then_branch: FuncValue, else_branch: FuncValue) -> Self {
        Self {
            env_source: RetainedSource::new(env_ty.clone()),
            env_ty,
            then_branch,
            else_branch,
            txn: None,
            current_branch: None,
        }
    }

    async fn rebuild(&mut self, cond: bool) -> Result<()> {
        let txn = self.txn.as_mut().expect("init must run before stream");
        txn.reverse().await?;

        let source_idx = self.env_source.ensure(txn, "stmt_if_env_source").await?;
        let branch = if cond { &self.then_branch } else { &self.else_branch };
        branch.build(txn, &[VertexRef::Existing(source_idx)])?;
        txn.commit().await?;
        self.current_branch = Some(cond);
        Ok(())
    }
}

#[async_trait]
impl Node for StmtIf {
    fn arg_name(&self, i: usize) -> &str {
        match i {
            0 => "cond",
            1 => "env",
            _ => unreachable!("StmtIf has exactly 2 inputs"),
        }
    }

    fn build(&mut self, sig: Type) -> Result<()> {
        if let Type::Func(params, out) = &sig {
            if let [Type::Bool, env] = params.as_slice() {
                if **out == unit_type() {
                    self.env_ty = env.clone();
                    return Ok(());
                }
            }
        }
        Err(FuncError::Type(format!("StmtIf: bad signature {sig}")))
    }

    fn info(&self) -> NodeInfo {
        NodeInfo::world_coupled(Type::Func(vec![Type::Bool, self.env_ty.clone()], Box::new(unit_type())))
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(StmtIf::new(self.env_ty.clone(), self.then_branch.clone(), self.else_branch.clone()))
    }

    async fn init(&mut self, ctx: InitCtx) -> Result<()> {
        self.txn = Some(ctx.txn);
        Ok(())
    }

    async fn stream(&mut self, mut ctx: StreamCtx) -> Result<()> {
        while let Some(frame) = ctx.input.recv().await {
            // The per-edge aggregator delivers one key at a time, so an
            // early frame may still be missing "cond" or "env" — wait for
            // a complete one rather than failing on it.
            let cond = match frame.get("cond") {
                None => continue,
                Some(Value::Bool(b)) => *b,
                Some(other) => {
                    return Err(FuncError::Programming(format!("StmtIf: expected bool \"cond\" arg, got {other:?}")));
                }
            };
            let Some(env) = frame.get("env").cloned() else { continue };
            if self.current_branch != Some(cond) {
                self.rebuild(cond).await?;
                ctx.emit(unit());
            }
            self.env_source.push(env).await?;
        }
        Ok(())
    }

    async fn call(&self, _ctx: &CallCtx, _args: ArgsFrame) -> Result<Value> {
        Err(FuncError::CannotSpeculate("StmtIf requires a live graph to wire its branch".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branches_are_distinct_by_identity() {
        let sig = Type::Func(vec![Type::Int], Box::new(unit_type()));
        let then_branch = FuncValue::new(sig.clone(), |_txn, _args| unreachable!());
        let else_branch = FuncValue::new(sig, |_txn, _args| unreachable!());
        assert_ne!(then_branch.identity(), else_branch.identity());
    }
}
