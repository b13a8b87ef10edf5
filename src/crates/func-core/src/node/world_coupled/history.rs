//! `History(value, size:int) -> []T` — resolves spec §9's open question
//! about the node's ring buffer and retention window (SPEC_FULL.md §4):
//! `size` is an explicit, required constructor argument rather than a
//! hidden constant. Retains the last `size` values of `value` and emits
//! the growing (then sliding) window as a list on every change.
//!
//! No side effects beyond its own return value (`pure`), but its output
//! depends on accumulated history rather than purely on the latest input,
//! so it is not `memo`-eligible and not safe to `call()` speculatively —
//! `spec=false`. Per spec §5, the ring buffer is read by both `stream`
//! (writer) and would be read by `call` if implemented, so it is guarded
//! by its own lock rather than the engine's transactional handle.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{FuncError, Result};
use crate::node::{ArgsFrame, CallCtx, InitCtx, Node, NodeInfo, StreamCtx};
use crate::value::{Type, Value};

pub struct History {
    elem_ty: Type,
    size: usize,
    buffer: Mutex<VecDeque<Value>>,
}

impl History {
    pub fn new(elem_ty: Type, size: usize) -> Self {
        assert!(size > 0, "History: size must be positive");
        Self { elem_ty, size, buffer: Mutex::new(VecDeque::with_capacity(size)) }
    }
}

#[async_trait]
impl Node for History {
    fn arg_name(&self, i: usize) -> &str {
        assert_eq!(i, 0, "History has exactly one streamed input: the watched value");
        "value"
    }

    fn build(&mut self, sig: Type) -> Result<()> {
        let expected = Type::Func(vec![self.elem_ty.clone()], Box::new(Type::List(Box::new(self.elem_ty.clone()))));
        if sig != expected {
            return Err(FuncError::Type(format!("History: expected {expected}, got {sig}")));
        }
        Ok(())
    }

    fn info(&self) -> NodeInfo {
        NodeInfo {
            sig: Type::Func(vec![self.elem_ty.clone()], Box::new(Type::List(Box::new(self.elem_ty.clone())))),
            pure: true,
            memo: false,
            fast: true,
            spec: false,
            err: false,
        }
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(History::new(self.elem_ty.clone(), self.size))
    }

    async fn init(&mut self, _ctx: InitCtx) -> Result<()> {
        Ok(())
    }

    async fn stream(&mut self, mut ctx: StreamCtx) -> Result<()> {
        while let Some(frame) = ctx.input.recv().await {
            let value = frame
                .get("value")
                .cloned()
                .ok_or_else(|| FuncError::Programming("History: missing \"value\" arg".into()))?;
            let window: Vec<Value> = {
                let mut buf = self.buffer.lock();
                buf.push_back(value);
                while buf.len() > self.size {
                    buf.pop_front();
                }
                buf.iter().cloned().collect()
            };
            ctx.emit(Value::List(self.elem_ty.clone(), window));
        }
        Ok(())
    }

    async fn call(&self, _ctx: &CallCtx, _args: ArgsFrame) -> Result<Value> {
        Err(FuncError::CannotSpeculate("History's output depends on accumulated state, not just its args".into()))
    }
}
