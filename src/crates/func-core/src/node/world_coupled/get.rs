//! `Get` and its typed variants (spec §4.5): reads a host-local value store
//! by `key` (the primary key), returning `struct{value:T, ready:bool}`.
//! `ready=false` means the store has nothing for `key` yet and `value` is
//! `T`'s zero. A stored value whose runtime type disagrees with `T` is a
//! fatal error — callers who know `T` ahead of time should use a typed
//! constructor (`get_bool`/`get_str`/`get_int`/`get_float`) so `build`
//! catches the mismatch instead of deferring to a runtime surprise.
//!
//! `with_retry` wraps the `Local::value_get` RPC in a `RetryPolicy`
//! (SPEC_FULL §4) for hosts where the local-value store is itself a
//! flaky remote call rather than truly local.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{FuncError, Result};
use crate::node::world_coupled::RetryPolicy;
use crate::node::{ArgsFrame, CallCtx, InitCtx, Node, NodeInfo, StreamCtx};
use crate::value::{Type, Value};
use crate::world::World;

fn out_type(ty: &Type) -> Type {
    Type::Struct(vec![("value".into(), ty.clone()), ("ready".into(), Type::Bool)])
}

pub struct Get {
    fixed_ty: Option<Type>,
    ty: Type,
    key: Option<String>,
    retry: Option<RetryPolicy>,
}

impl Get {
    /// Polymorphic `Get`: `T` is whatever the resolver settles `build`'s
    /// signature to.
    pub fn new() -> Self {
        Self { fixed_ty: None, ty: Type::Bool, key: None, retry: None }
    }

    /// A typed variant (`get_bool`/`get_str`/`get_int`/`get_float`): `T` is
    /// fixed up front; `build` rejects any other resolved type.
    pub fn typed(ty: Type) -> Self {
        Self { ty: ty.clone(), fixed_ty: Some(ty), key: None, retry: None }
    }

    /// Retry a transient `Local::value_get` failure up to `policy.attempts` times.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    async fn recompute(&self, world: &Arc<dyn World>, key: &str) -> Result<Value> {
        let raw = match &self.retry {
            Some(policy) => policy.run(|| world.value_get(key)).await?,
            None => world.value_get(key).await?,
        };
        let mut out = Value::new_struct(out_struct_fields(&self.ty));
        match raw {
            None => {
                out.set("value", self.ty.zero())?;
                out.set("ready", Value::Bool(false))?;
            }
            Some(json) => {
                let value = Value::from_host(&self.ty, json).map_err(|_| {
                    FuncError::Type(format!("Get: stored value for {key:?} does not match declared type {}", self.ty))
                })?;
                out.set("value", value)?;
                out.set("ready", Value::Bool(true))?;
            }
        }
        Ok(out)
    }
}

fn out_struct_fields(ty: &Type) -> Vec<(String, Type)> {
    match out_type(ty) {
        Type::Struct(fields) => fields,
        _ => unreachable!(),
    }
}

pub fn get_bool() -> Get {
    Get::typed(Type::Bool)
}
pub fn get_str() -> Get {
    Get::typed(Type::Str)
}
pub fn get_int() -> Get {
    Get::typed(Type::Int)
}
pub fn get_float() -> Get {
    Get::typed(Type::Float)
}

impl Default for Get {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for Get {
    fn arg_name(&self, i: usize) -> &str {
        assert_eq!(i, 0, "Get has exactly one input: the lookup key");
        "key"
    }

    fn build(&mut self, sig: Type) -> Result<()> {
        if let Type::Func(params, out) = &sig {
            if let [Type::Str] = params.as_slice() {
                if let Type::Struct(fields) = out.as_ref() {
                    if let Some((_, value_ty)) = fields.iter().find(|(name, _)| name == "value") {
                        if let Some(fixed) = &self.fixed_ty {
                            if fixed != value_ty {
                                return Err(FuncError::Type(format!(
                                    "Get: typed variant fixed to {fixed}, but resolved T is {value_ty}"
                                )));
                            }
                        }
                        self.ty = value_ty.clone();
                        return Ok(());
                    }
                }
            }
        }
        Err(FuncError::Type(format!("Get: bad signature {sig}")))
    }

    fn info(&self) -> NodeInfo {
        NodeInfo::world_coupled(Type::Func(vec![Type::Str], Box::new(out_type(&self.ty))))
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(Get {
            fixed_ty: self.fixed_ty.clone(),
            ty: self.ty.clone(),
            key: None,
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
                    let Some(Value::Str(key)) = frame.get("key").cloned() else {
                        return Err(FuncError::Programming("Get: expected str \"key\" arg".into()));
                    };
                    match &self.key {
                        None => self.key = Some(key.clone()),
                        Some(prev) if *prev != key => {
                            return Err(FuncError::Programming(format!(
                                "Get: primary key changed from {prev:?} to {key:?}"
                            )));
                        }
                        _ => {}
                    }
                    let value = self.recompute(&ctx.world, &key).await?;
                    ctx.emit(value);
                }
                res = watch_if_known(&ctx.world, &self.key) => {
                    match res {
                        Ok(()) => {
                            let key = self.key.clone().expect("watch only resolves once key is known");
                            let value = self.recompute(&ctx.world, &key).await?;
                            ctx.emit(value);
                        }
                        Err(FuncError::EndOfStream) => return Ok(()),
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    async fn call(&self, _ctx: &CallCtx, _args: ArgsFrame) -> Result<Value> {
        Err(FuncError::CannotSpeculate("Get requires a live local-value watch".into()))
    }
}

async fn watch_if_known(world: &Arc<dyn World>, key: &Option<String>) -> Result<()> {
    match key {
        Some(key) => world.value_watch(key).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_retry_constructs_a_get_carrying_the_policy() {
        let node = get_bool().with_retry(RetryPolicy::new(3, std::time::Duration::from_millis(1)));
        assert!(node.retry.is_some());
    }

    #[tokio::test]
    async fn recompute_reports_not_ready_against_an_empty_store() {
        let node = get_int();
        let world = crate::world::test_support::noop_world();
        let value = node.recompute(&world, "k").await.unwrap();
        assert_eq!(value.get_field("ready").unwrap(), &Value::Bool(false));
        assert_eq!(value.get_field("value").unwrap(), &Value::Int(0));
    }
}
