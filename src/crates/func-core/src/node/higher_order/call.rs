//! `Call` (spec §4.4.1): applies a `FuncValue` to a fixed list of
//! already-existing argument nodes, rebuilding only when the function
//! value's *identity* changes.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{FuncError, Result};
use crate::graph::{NodeIndex, Txn, VertexRef};
use crate::node::primitive::ChannelSink;
use crate::node::{ArgsFrame, CallCtx, InitCtx, Node, NodeInfo, StreamCtx};
use crate::value::{FuncValue, Type, Value};

pub struct Call {
    arg_nodes: Vec<NodeIndex>,
    out_ty: Type,
    txn: Option<Txn>,
    current: Option<FuncValue>,
    sink_rx: Option<mpsc::Receiver<Value>>,
}

impl Call {
    pub fn new(arg_nodes: Vec<NodeIndex>, out_ty: Type) -> Self {
        Self { arg_nodes, out_ty, txn: None, current: None, sink_rx: None }
    }

    async fn rebuild(&mut self, f: &FuncValue) -> Result<()> {
        let txn = self.txn.as_mut().expect("init must run before stream");
        txn.reverse().await?;

        let args: Vec<VertexRef> = self.arg_nodes.iter().map(|&idx| VertexRef::Existing(idx)).collect();
        let output = f.build(txn, &args)?;
        let (tx, rx) = mpsc::channel(1);
        let sink = txn.add_vertex("call_sink", Box::new(ChannelSink::new("v", self.out_ty.clone(), tx)));
        txn.add_edge(output, sink, "v");
        txn.commit().await?;

        self.sink_rx = Some(rx);
        Ok(())
    }
}

#[async_trait]
impl Node for Call {
    fn arg_name(&self, i: usize) -> &str {
        assert_eq!(i, 0, "Call has exactly one named input: the function value");
        "fn"
    }

    fn build(&mut self, sig: Type) -> Result<()> {
        if let Type::Func(params, out) = &sig {
            if params.len() == 1 {
                self.out_ty = (**out).clone();
                return Ok(());
            }
        }
        Err(FuncError::Type(format!("Call: bad signature {sig}")))
    }

    fn info(&self) -> NodeInfo {
        NodeInfo::world_coupled(Type::Func(
            vec![Type::Func(vec![], Box::new(self.out_ty.clone()))],
            Box::new(self.out_ty.clone()),
        ))
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(Call { arg_nodes: self.arg_nodes.clone(), out_ty: self.out_ty.clone(), txn: None, current: None, sink_rx: None })
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
                    let Some(Value::Func(f)) = frame.get("fn").cloned() else {
                        return Err(FuncError::Programming("Call: \"fn\" arg is not a function value".into()));
                    };
                    let is_new = self.current.as_ref().map(|c| c.identity() != f.identity()).unwrap_or(true);
                    if is_new {
                        self.rebuild(&f).await?;
                        self.current = Some(f);
                    }
                }
                Some(v) = recv_opt(&mut self.sink_rx) => {
                    ctx.emit(v);
                }
                else => return Ok(()),
            }
        }
    }
}

/// `tokio::select!` needs a future even when the receiver doesn't exist
/// yet (before the first rebuild); this adapts `Option<Receiver>` into one
/// that never resolves while empty.
async fn recv_opt(rx: &mut Option<mpsc::Receiver<Value>>) -> Option<Value> {
    match rx {
        Some(r) => r.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebuild_triggers_only_on_identity_change() {
        let sig = Type::Func(vec![Type::Int], Box::new(Type::Int));
        let f1 = FuncValue::new(sig.clone(), |_txn, _args| unreachable!());
        let f2 = f1.clone();
        let f3 = FuncValue::new(sig, |_txn, _args| unreachable!());
        assert!(f1.identity() == f2.identity());
        assert!(f1.identity() != f3.identity());
    }
}
