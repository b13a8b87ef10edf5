//! Structural nodes: fixed-shape combinators over an already-wired input
//! struct, none of which rewrite the graph (spec §4.3, structural half).

use async_trait::async_trait;

use crate::error::{FuncError, Result};
use crate::value::{Type, Value};

use super::{ArgsFrame, CallCtx, InitCtx, Node, NodeInfo, StreamCtx};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeKind {
    List,
    Map,
    Struct,
}

/// Builds a list, map, or struct from N inputs. Input struct fields are
/// positional (`0`..`N-1`) for lists, `key:i`/`val:i` pairs for maps, or the
/// declared field names for structs.
pub struct Composite {
    kind: CompositeKind,
    elem: Type,    // List element type, or Map value type
    key_ty: Type,  // Map key type only
    fields: Vec<(String, Type)>, // Struct only
    n: usize,
    arg_names: Vec<String>,
}

impl Composite {
    pub fn list(elem: Type, n: usize) -> Self {
        let arg_names = (0..n).map(|i| i.to_string()).collect();
        Self { kind: CompositeKind::List, elem, key_ty: Type::Str, fields: vec![], n, arg_names }
    }

    pub fn map(key_ty: Type, val_ty: Type, n: usize) -> Self {
        let arg_names = (0..n).flat_map(|i| [format!("key:{i}"), format!("val:{i}")]).collect();
        Self { kind: CompositeKind::Map, elem: val_ty, key_ty, fields: vec![], n, arg_names }
    }

    pub fn strct(fields: Vec<(String, Type)>) -> Self {
        let n = fields.len();
        let arg_names = fields.iter().map(|(name, _)| name.clone()).collect();
        Self { kind: CompositeKind::Struct, elem: Type::Bool, key_ty: Type::Str, fields, n, arg_names }
    }

    fn out_type(&self) -> Type {
        match self.kind {
            CompositeKind::List => Type::List(Box::new(self.elem.clone())),
            CompositeKind::Map => Type::Map(Box::new(self.key_ty.clone()), Box::new(self.elem.clone())),
            CompositeKind::Struct => Type::Struct(self.fields.clone()),
        }
    }

    fn zero(&self) -> Value {
        self.out_type().zero()
    }

    fn assemble(&self, frame: &ArgsFrame) -> Result<Value> {
        match self.kind {
            CompositeKind::List => {
                let mut items = Vec::with_capacity(self.n);
                for i in 0..self.n {
                    let v = frame
                        .get(&i.to_string())
                        .cloned()
                        .ok_or_else(|| FuncError::Programming(format!("Composite(list): missing element {i}")))?;
                    items.push(v);
                }
                Ok(Value::List(self.elem.clone(), items))
            }
            CompositeKind::Map => {
                let mut pairs = Vec::with_capacity(self.n);
                for i in 0..self.n {
                    let k = frame
                        .get(&format!("key:{i}"))
                        .cloned()
                        .ok_or_else(|| FuncError::Programming(format!("Composite(map): missing key {i}")))?;
                    let v = frame
                        .get(&format!("val:{i}"))
                        .cloned()
                        .ok_or_else(|| FuncError::Programming(format!("Composite(map): missing val {i}")))?;
                    pairs.push((k, v));
                }
                Ok(Value::Map(self.key_ty.clone(), self.elem.clone(), pairs))
            }
            CompositeKind::Struct => {
                let mut out = Value::new_struct(self.fields.clone());
                for (name, _) in &self.fields {
                    let v = frame
                        .get(name)
                        .cloned()
                        .ok_or_else(|| FuncError::Programming(format!("Composite(struct): missing field {name:?}")))?;
                    out.set(name, v)?;
                }
                Ok(out)
            }
        }
    }
}

#[async_trait]
impl Node for Composite {
    fn arg_name(&self, i: usize) -> &str {
        &self.arg_names[i]
    }

    fn build(&mut self, _sig: Type) -> Result<()> {
        Ok(())
    }

    fn info(&self) -> NodeInfo {
        let params = match self.kind {
            CompositeKind::List => vec![self.elem.clone(); self.n],
            CompositeKind::Map => (0..self.n).flat_map(|_| [self.key_ty.clone(), self.elem.clone()]).collect(),
            CompositeKind::Struct => self.fields.iter().map(|(_, t)| t.clone()).collect(),
        };
        NodeInfo::pure_fast(Type::Func(params, Box::new(self.out_type())))
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(Composite {
            kind: self.kind,
            elem: self.elem.clone(),
            key_ty: self.key_ty.clone(),
            fields: self.fields.clone(),
            n: self.n,
            arg_names: self.arg_names.clone(),
        })
    }

    async fn init(&mut self, _ctx: InitCtx) -> Result<()> {
        Ok(())
    }

    async fn stream(&mut self, mut ctx: StreamCtx) -> Result<()> {
        let mut ticked = false;
        while let Some(frame) = ctx.input.recv().await {
            // The per-edge aggregator delivers one key at a time, so an
            // early frame may still be missing an input — wait for a
            // complete one rather than failing on it.
            match self.assemble(&frame) {
                Ok(v) => {
                    ticked = true;
                    ctx.emit(v);
                }
                Err(_) if !ticked => continue,
                Err(e) => return Err(e),
            }
        }
        if !ticked {
            ctx.emit(self.zero());
        }
        Ok(())
    }

    async fn call(&self, _ctx: &CallCtx, args: ArgsFrame) -> Result<Value> {
        self.assemble(&args)
    }
}

/// Ternary value operator: `condition ? a : b`. Never rewrites the graph.
pub struct IfExpr {
    out_ty: Type,
}

impl IfExpr {
    pub fn new(out_ty: Type) -> Self {
        Self { out_ty }
    }
}

#[async_trait]
impl Node for IfExpr {
    fn arg_name(&self, i: usize) -> &str {
        match i {
            0 => "condition",
            1 => "a",
            2 => "b",
            _ => unreachable!("IfExpr has exactly 3 inputs"),
        }
    }

    fn build(&mut self, sig: Type) -> Result<()> {
        match &sig {
            Type::Func(params, out) if params.len() == 3 && params[0] == Type::Bool && params[1] == **out && params[2] == **out => {
                self.out_ty = (**out).clone();
                Ok(())
            }
            other => Err(FuncError::Type(format!("IfExpr: bad signature {other}"))),
        }
    }

    fn info(&self) -> NodeInfo {
        NodeInfo::pure_fast(Type::Func(vec![Type::Bool, self.out_ty.clone(), self.out_ty.clone()], Box::new(self.out_ty.clone())))
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(IfExpr { out_ty: self.out_ty.clone() })
    }

    async fn init(&mut self, _ctx: InitCtx) -> Result<()> {
        Ok(())
    }

    async fn stream(&mut self, mut ctx: StreamCtx) -> Result<()> {
        let mut ticked = false;
        while let Some(frame) = ctx.input.recv().await {
            // The per-edge aggregator delivers one key at a time, so an
            // early frame may still be missing the condition or the active
            // branch — wait for a complete one rather than failing on it.
            match self.eval(&frame) {
                Ok(v) => {
                    ticked = true;
                    ctx.emit(v);
                }
                Err(_) if !ticked => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn call(&self, _ctx: &CallCtx, args: ArgsFrame) -> Result<Value> {
        self.eval(&args)
    }
}

impl IfExpr {
    fn eval(&self, frame: &ArgsFrame) -> Result<Value> {
        let cond = match frame.get("condition") {
            Some(Value::Bool(b)) => *b,
            None => return Err(FuncError::Programming("IfExpr: condition not yet available".into())),
            other => return Err(FuncError::Programming(format!("IfExpr: condition must be bool, got {other:?}"))),
        };
        let branch = if cond { "a" } else { "b" };
        frame
            .get(branch)
            .cloned()
            .ok_or_else(|| FuncError::Programming(format!("IfExpr: missing branch {branch:?}")))
    }
}

/// Dual-input sink: forwards `useful`, ignores `dummy`. Used beneath
/// rewriting higher-order nodes as a stable join point, so downstream
/// consumers depend on the rewriter's identity rather than on whatever
/// transient subgraph it most recently built.
pub struct Output {
    ty: Type,
}

impl Output {
    pub fn new(ty: Type) -> Self {
        Self { ty }
    }
}

#[async_trait]
impl Node for Output {
    fn arg_name(&self, i: usize) -> &str {
        match i {
            0 => "useful",
            1 => "dummy",
            _ => unreachable!("Output has exactly 2 inputs"),
        }
    }

    fn build(&mut self, sig: Type) -> Result<()> {
        if let Type::Func(params, out) = &sig {
            if params.len() == 2 && params[0] == **out {
                self.ty = (**out).clone();
                return Ok(());
            }
        }
        Err(FuncError::Type(format!("Output: bad signature {sig}")))
    }

    fn info(&self) -> NodeInfo {
        NodeInfo::pure_fast(Type::Func(vec![self.ty.clone(), Type::Bool], Box::new(self.ty.clone())))
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(Output { ty: self.ty.clone() })
    }

    async fn init(&mut self, _ctx: InitCtx) -> Result<()> {
        Ok(())
    }

    async fn stream(&mut self, mut ctx: StreamCtx) -> Result<()> {
        while let Some(frame) = ctx.input.recv().await {
            if let Some(v) = frame.get("useful") {
                ctx.emit(v.clone());
            }
        }
        Ok(())
    }

    async fn call(&self, _ctx: &CallCtx, args: ArgsFrame) -> Result<Value> {
        args.get("useful")
            .cloned()
            .ok_or_else(|| FuncError::Programming("Output: missing useful arg".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CallCtx {
        CallCtx { hostname: "test".into(), world: crate::world::test_support::noop_world(), debug: false }
    }

    #[tokio::test]
    async fn composite_struct_build_then_project_round_trips() {
        let fields = vec![("x".into(), Type::Int), ("y".into(), Type::Bool)];
        let node = Composite::strct(fields);
        let mut args = ArgsFrame::default();
        args.insert("x".into(), Value::Int(5));
        args.insert("y".into(), Value::Bool(true));
        let built = node.call(&ctx(), args).await.unwrap();
        assert_eq!(built.get_field("x").unwrap(), &Value::Int(5));
        assert_eq!(built.get_field("y").unwrap(), &Value::Bool(true));
    }

    #[tokio::test]
    async fn if_expr_picks_branch_by_condition() {
        let node = IfExpr::new(Type::Int);
        let mut args = ArgsFrame::default();
        args.insert("condition".into(), Value::Bool(true));
        args.insert("a".into(), Value::Int(1));
        args.insert("b".into(), Value::Int(2));
        assert_eq!(node.call(&ctx(), args.clone()).await.unwrap(), Value::Int(1));
        args.insert("condition".into(), Value::Bool(false));
        assert_eq!(node.call(&ctx(), args).await.unwrap(), Value::Int(2));
    }

    #[tokio::test]
    async fn output_forwards_useful_ignores_dummy() {
        let node = Output::new(Type::Int);
        let mut args = ArgsFrame::default();
        args.insert("useful".into(), Value::Int(9));
        args.insert("dummy".into(), Value::Bool(false));
        assert_eq!(node.call(&ctx(), args).await.unwrap(), Value::Int(9));
    }
}
