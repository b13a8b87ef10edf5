//! Primitive nodes: sources and sinks with no graph-rewriting behavior
//! (spec §4.3, primitive half).

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::value::{Type, Value};

use super::{ArgsFrame, CallCtx, InitCtx, Node, NodeInfo, StreamCtx};

/// No inputs; emits the configured `Value` exactly once, then closes.
pub struct Const {
    value: Value,
}

impl Const {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

#[async_trait]
impl Node for Const {
    fn arg_name(&self, _i: usize) -> &str {
        unreachable!("Const has no inputs")
    }

    fn build(&mut self, sig: Type) -> Result<()> {
        let expected = Type::Func(vec![], Box::new(self.value.type_of()));
        if sig != expected {
            return Err(crate::error::FuncError::Type(format!(
                "Const: signature {sig} does not match value type {}",
                self.value.type_of()
            )));
        }
        Ok(())
    }

    fn info(&self) -> NodeInfo {
        NodeInfo::pure_fast(Type::Func(vec![], Box::new(self.value.type_of())))
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(Const { value: self.value.clone() })
    }

    async fn init(&mut self, _ctx: InitCtx) -> Result<()> {
        Ok(())
    }

    async fn stream(&mut self, ctx: StreamCtx) -> Result<()> {
        ctx.emit(self.value.clone());
        Ok(())
    }

    async fn call(&self, _ctx: &CallCtx, _args: ArgsFrame) -> Result<Value> {
        Ok(self.value.clone())
    }
}

/// One input edge named by the binding site; forwards the current value
/// unchanged. Exists only to make the graph well-typed at bind sites (a
/// `let`/parameter reference).
pub struct Var {
    name: String,
    ty: Type,
}

impl Var {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self { name: name.into(), ty }
    }
}

#[async_trait]
impl Node for Var {
    fn arg_name(&self, i: usize) -> &str {
        assert_eq!(i, 0, "Var has exactly one input");
        &self.name
    }

    fn build(&mut self, sig: Type) -> Result<()> {
        match &sig {
            Type::Func(params, out) if params.len() == 1 && params[0] == **out => {
                self.ty = (**out).clone();
                Ok(())
            }
            other => Err(crate::error::FuncError::Type(format!("Var: expected func(T)->T, got {other}"))),
        }
    }

    fn info(&self) -> NodeInfo {
        NodeInfo::pure_fast(Type::Func(vec![self.ty.clone()], Box::new(self.ty.clone())))
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(Var { name: self.name.clone(), ty: self.ty.clone() })
    }

    async fn init(&mut self, _ctx: InitCtx) -> Result<()> {
        Ok(())
    }

    async fn stream(&mut self, mut ctx: StreamCtx) -> Result<()> {
        while let Some(frame) = ctx.input.recv().await {
            if let Some(v) = frame.get(&self.name) {
                ctx.emit(v.clone());
            }
        }
        Ok(())
    }

    async fn call(&self, _ctx: &CallCtx, args: ArgsFrame) -> Result<Value> {
        args.get(&self.name)
            .cloned()
            .ok_or_else(|| crate::error::FuncError::Programming(format!("Var: missing arg {:?}", self.name)))
    }
}

/// Adapter between the graph's edge protocol and a locally-owned typed
/// channel: no graph inputs, emits whatever is pushed onto `rx`.
pub struct ChannelSource {
    ty: Type,
    rx: Option<mpsc::Receiver<Value>>,
}

impl ChannelSource {
    pub fn new(ty: Type, rx: mpsc::Receiver<Value>) -> Self {
        Self { ty, rx: Some(rx) }
    }
}

#[async_trait]
impl Node for ChannelSource {
    fn arg_name(&self, _i: usize) -> &str {
        unreachable!("ChannelSource has no inputs")
    }

    fn build(&mut self, sig: Type) -> Result<()> {
        let expected = Type::Func(vec![], Box::new(self.ty.clone()));
        if sig != expected {
            return Err(crate::error::FuncError::Type(format!("ChannelSource: expected {expected}, got {sig}")));
        }
        Ok(())
    }

    fn info(&self) -> NodeInfo {
        NodeInfo { pure: false, memo: false, fast: false, spec: false, err: false, sig: Type::Func(vec![], Box::new(self.ty.clone())) }
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(ChannelSource { ty: self.ty.clone(), rx: None })
    }

    async fn init(&mut self, _ctx: InitCtx) -> Result<()> {
        Ok(())
    }

    async fn stream(&mut self, ctx: StreamCtx) -> Result<()> {
        let mut rx = self
            .rx
            .take()
            .ok_or_else(|| crate::error::FuncError::Programming("ChannelSource: stream called twice".into()))?;
        while let Some(v) = rx.recv().await {
            if ctx.is_shutting_down() {
                break;
            }
            ctx.emit(v);
        }
        Ok(())
    }
}

/// Writes each received value onto a locally-owned typed channel, and also
/// forwards it on its graph output — the engine requires every output to
/// produce at least one value, so a pure sink still has to re-emit.
pub struct ChannelSink {
    arg: String,
    ty: Type,
    tx: mpsc::Sender<Value>,
}

impl ChannelSink {
    pub fn new(arg: impl Into<String>, ty: Type, tx: mpsc::Sender<Value>) -> Self {
        Self { arg: arg.into(), ty, tx }
    }
}

#[async_trait]
impl Node for ChannelSink {
    fn arg_name(&self, i: usize) -> &str {
        assert_eq!(i, 0);
        &self.arg
    }

    fn build(&mut self, sig: Type) -> Result<()> {
        let expected = Type::Func(vec![self.ty.clone()], Box::new(self.ty.clone()));
        if sig != expected {
            return Err(crate::error::FuncError::Type(format!("ChannelSink: expected {expected}, got {sig}")));
        }
        Ok(())
    }

    fn info(&self) -> NodeInfo {
        NodeInfo { pure: false, memo: false, fast: false, spec: false, err: true, sig: Type::Func(vec![self.ty.clone()], Box::new(self.ty.clone())) }
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(ChannelSink { arg: self.arg.clone(), ty: self.ty.clone(), tx: self.tx.clone() })
    }

    async fn init(&mut self, _ctx: InitCtx) -> Result<()> {
        Ok(())
    }

    async fn stream(&mut self, mut ctx: StreamCtx) -> Result<()> {
        while let Some(frame) = ctx.input.recv().await {
            if let Some(v) = frame.get(&self.arg) {
                let _ = self.tx.send(v.clone()).await;
                ctx.emit(v.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CallCtx {
        CallCtx { hostname: "test".into(), world: crate::world::test_support::noop_world(), debug: false }
    }

    #[tokio::test]
    async fn const_call_returns_configured_value() {
        let node = Const::new(Value::Int(42));
        assert_eq!(node.call(&ctx(), ArgsFrame::default()).await.unwrap(), Value::Int(42));
    }

    #[tokio::test]
    async fn var_call_forwards_named_arg() {
        let node = Var::new("x", Type::Int);
        let mut args = ArgsFrame::default();
        args.insert("x".into(), Value::Int(7));
        assert_eq!(node.call(&ctx(), args).await.unwrap(), Value::Int(7));
    }
}
