//! `Map` (spec §4.4.2): applies a function value once per element of a
//! list via per-element extractor nodes, joined back into a single
//! output-list node. Rebuilds only on a shape change — function identity
//! or list *length* — never on a length-preserving element change.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{FuncError, Result};
use crate::graph::{Txn, VertexRef};
use crate::node::higher_order::{ListIndex, RetainedSource};
use crate::node::primitive::ChannelSink;
use crate::node::structural::Composite;
use crate::node::{ArgsFrame, CallCtx, InitCtx, Invariant, Node, NodeInfo, PartialType, PartialValues, StreamCtx};
use crate::value::{FuncValue, Type, Value};

pub struct Map {
    elem_in: Type,
    elem_out: Type,
    txn: Option<Txn>,
    list_source: RetainedSource,
    current_fn_identity: Option<usize>,
    current_len: Option<usize>,
    output_rx: Option<mpsc::Receiver<Value>>,
}

impl Map {
    pub fn new(elem_in: Type, elem_out: Type) -> Self {
        Self {
            list_source: RetainedSource::new(Type::List(Box::new(elem_in.clone()))),
            elem_in,
            elem_out,
            txn: None,
            current_fn_identity: None,
            current_len: None,
            output_rx: None,
        }
    }

    async fn rebuild(&mut self, f: &FuncValue, len: usize) -> Result<()> {
        let txn = self.txn.as_mut().expect("init must run before stream");
        txn.reverse().await?;

        let source_idx = self.list_source.ensure(txn, "map_list_source").await?;

        let mut element_outputs = Vec::with_capacity(len);
        for i in 0..len {
            let elem = txn.add_vertex(format!("map_elem_{i}"), Box::new(ListIndex::new(i, self.elem_in.clone())));
            txn.add_edge(VertexRef::Existing(source_idx), elem, "list");
            let body_out = f.build(txn, &[elem])?;
            element_outputs.push(body_out);
        }

        let join = txn.add_vertex("map_join", Box::new(Composite::list(self.elem_out.clone(), len)));
        for (i, out_ref) in element_outputs.into_iter().enumerate() {
            txn.add_edge(out_ref, join, i.to_string());
        }

        let (tx, rx) = mpsc::channel(1);
        let sink = txn.add_vertex("map_sink", Box::new(ChannelSink::new("v", Type::List(Box::new(self.elem_out.clone())), tx)));
        txn.add_edge(join, sink, "v");

        txn.commit().await?;
        self.output_rx = Some(rx);
        self.current_len = Some(len);
        Ok(())
    }
}

#[async_trait]
impl Node for Map {
    fn arg_name(&self, i: usize) -> &str {
        match i {
            0 => "fn",
            1 => "list",
            _ => unreachable!("Map has exactly 2 inputs"),
        }
    }

    /// Resolver pattern from spec §4.6 ("map / for / forkv / call: the
    /// body's parameter type is unified with the element type of the
    /// collection"): whichever side is still a placeholder adopts the
    /// other's element type via an `ElemOf`/`Equals` invariant, rather than
    /// requiring the loader to already know both.
    fn infer(&self, partial: &PartialType, _consts: &PartialValues) -> Option<Result<(Type, Vec<Invariant>)>> {
        let fn_ty = partial.args.first()?;
        let list_ty = partial.args.get(1)?;
        let (fn_params, fn_out) = match fn_ty {
            Type::Func(p, o) => (p.clone(), (**o).clone()),
            other => return Some(Err(FuncError::Type(format!("Map: expected a function value, got {other}")))),
        };
        if fn_params.len() != 1 {
            return Some(Err(FuncError::Type("Map: body must take exactly one argument".into())));
        }

        let mut invariants = Vec::new();
        let elem_in = match (&fn_params[0], list_ty) {
            (Type::Var(body_var), Type::List(elem)) => {
                invariants.push(Invariant::Equals(*body_var, (**elem).clone()));
                (**elem).clone()
            }
            (body_param, Type::List(elem)) if body_param == elem.as_ref() => (**elem).clone(),
            (body_param, Type::List(elem)) => {
                return Some(Err(FuncError::Type(format!(
                    "Map: body expects {body_param}, list yields {elem}"
                ))))
            }
            (body_param, Type::Var(list_var)) => {
                invariants.push(Invariant::Equals(*list_var, Type::List(Box::new(body_param.clone()))));
                body_param.clone()
            }
            (_, other) => return Some(Err(FuncError::Type(format!("Map: expected a list, got {other}")))),
        };

        let sig = Type::Func(
            vec![fn_ty.clone(), Type::List(Box::new(elem_in))],
            Box::new(Type::List(Box::new(fn_out))),
        );
        Some(Ok((sig, invariants)))
    }

    fn build(&mut self, sig: Type) -> Result<()> {
        if let Type::Func(params, out) = &sig {
            if let [Type::Func(fparams, fout), Type::List(elem_in)] = params.as_slice() {
                if let Type::List(out_elem) = out.as_ref() {
                    if fparams.len() == 1 && fparams[0] == **elem_in && **out_elem == **fout {
                        self.elem_in = (**elem_in).clone();
                        self.elem_out = (**fout).clone();
                        return Ok(());
                    }
                }
            }
        }
        Err(FuncError::Type(format!("Map: bad signature {sig}")))
    }

    fn info(&self) -> NodeInfo {
        NodeInfo::world_coupled(Type::Func(
            vec![
                Type::Func(vec![self.elem_in.clone()], Box::new(self.elem_out.clone())),
                Type::List(Box::new(self.elem_in.clone())),
            ],
            Box::new(Type::List(Box::new(self.elem_out.clone()))),
        ))
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(Map::new(self.elem_in.clone(), self.elem_out.clone()))
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
                    // an early frame may still be missing "fn" or "list" —
                    // wait for a complete one rather than failing on it.
                    let (Some(fn_val), Some(list_val)) = (frame.get("fn").cloned(), frame.get("list").cloned()) else {
                        continue;
                    };
                    let (Value::Func(f), Value::List(_, items)) = (fn_val, list_val) else {
                        return Err(FuncError::Programming("Map: expected fn and list args".into()));
                    };
                    let shape_changed = self.current_fn_identity != Some(f.identity()) || self.current_len != Some(items.len());
                    if shape_changed {
                        self.rebuild(&f, items.len()).await?;
                        self.current_fn_identity = Some(f.identity());
                    }
                    self.list_source.push(Value::List(self.elem_in.clone(), items)).await?;
                }
                Some(v) = recv_opt(&mut self.output_rx) => {
                    ctx.emit(v);
                }
                else => return Ok(()),
            }
        }
    }

    async fn call(&self, _ctx: &CallCtx, _args: ArgsFrame) -> Result<Value> {
        Err(FuncError::CannotSpeculate("Map requires a live graph to apply its body".into()))
    }
}

async fn recv_opt(rx: &mut Option<mpsc::Receiver<Value>>) -> Option<Value> {
    match rx {
        Some(r) => r.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::higher_order::same_key_set;

    #[test]
    fn shape_change_detection_is_length_not_value() {
        let a = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
        let b = vec![Value::Int(9), Value::Int(8), Value::Int(7)];
        assert_eq!(a.len(), b.len());
        assert!(same_key_set(
            &[Value::Str("a".into())],
            &[Value::Str("a".into())]
        ));
    }

    #[test]
    fn infer_unifies_polymorphic_body_param_with_list_elem() {
        use crate::resolver::{fresh_var, resolve};

        let body_var = fresh_var();
        let partial = PartialType {
            args: vec![
                Type::Func(vec![Type::Var(body_var)], Box::new(Type::Var(body_var))),
                Type::List(Box::new(Type::Int)),
            ],
        };
        let mut node = Map::new(Type::Bool, Type::Bool); // placeholder fields; infer ignores them
        let sig = resolve(&mut node, &partial, &PartialValues::default()).unwrap();
        assert_eq!(
            sig,
            Type::Func(
                vec![
                    Type::Func(vec![Type::Int], Box::new(Type::Int)),
                    Type::List(Box::new(Type::Int)),
                ],
                Box::new(Type::List(Box::new(Type::Int))),
            )
        );
    }
}
