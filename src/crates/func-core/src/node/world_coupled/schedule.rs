//! `Schedule` (spec §4.5): opens a cluster-leasing session under a
//! namespace and emits the session's current host assignment as `[]str`
//! on every scheduling result. The namespace is the primary key; the
//! `{strategy,max,reuse,ttl}` config may vary tick to tick without forcing
//! a new session, but changing the namespace after the first tick is fatal.
//!
//! `Scheduler::acquire` is the one RPC this node needs retried (lease
//! contention, leader election) — see `RetryPolicy` (SPEC_FULL §4).

use async_trait::async_trait;
use serde_json::json;

use crate::error::{FuncError, Result};
use crate::node::world_coupled::RetryPolicy;
use crate::node::{ArgsFrame, CallCtx, InitCtx, Node, NodeInfo, StreamCtx};
use crate::value::{Type, Value};
use crate::world::Session;

fn out_type() -> Type {
    Type::List(Box::new(Type::Str))
}

fn config_fields() -> Vec<(String, Type)> {
    vec![
        ("strategy".into(), Type::Str),
        ("max".into(), Type::Int),
        ("reuse".into(), Type::Bool),
        ("ttl".into(), Type::Int),
    ]
}

fn config_type() -> Type {
    Type::Struct(config_fields())
}

/// Builds the scheduler options payload, omitting zero-valued fields and
/// defaulting `strategy` to `"rr"` when absent (spec §4.5).
fn config_to_opts(cfg: &Value) -> Result<serde_json::Value> {
    let Value::Struct(_, fields) = cfg else {
        return Err(FuncError::Programming("Schedule: config arg is not a struct".into()));
    };
    let mut opts = serde_json::Map::new();
    let strategy = match fields.get("strategy") {
        Some(Value::Str(s)) if !s.is_empty() => s.clone(),
        _ => "rr".to_string(),
    };
    opts.insert("strategy".into(), json!(strategy));
    if let Some(Value::Int(max)) = fields.get("max") {
        if *max != 0 {
            opts.insert("max".into(), json!(max));
        }
    }
    if let Some(Value::Bool(reuse)) = fields.get("reuse") {
        if *reuse {
            opts.insert("reuse".into(), json!(reuse));
        }
    }
    if let Some(Value::Int(ttl)) = fields.get("ttl") {
        if *ttl != 0 {
            opts.insert("ttl".into(), json!(ttl));
        }
    }
    Ok(serde_json::Value::Object(opts))
}

pub struct Schedule {
    namespace: Option<String>,
    session: Option<Box<dyn Session>>,
    retry: Option<RetryPolicy>,
}

impl Schedule {
    pub fn new() -> Self {
        Self { namespace: None, session: None, retry: None }
    }

    /// Retry a transient `Scheduler::acquire` failure (lease denied,
    /// leader election in progress) up to `policy.attempts` times.
    pub fn with_retry(policy: RetryPolicy) -> Self {
        Self { namespace: None, session: None, retry: Some(policy) }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for Schedule {
    fn arg_name(&self, i: usize) -> &str {
        match i {
            0 => "ns",
            1 => "config",
            _ => unreachable!("Schedule has exactly 2 inputs"),
        }
    }

    fn build(&mut self, sig: Type) -> Result<()> {
        let expected = Type::Func(vec![Type::Str, config_type()], Box::new(out_type()));
        if sig != expected {
            return Err(FuncError::Type(format!("Schedule: expected {expected}, got {sig}")));
        }
        Ok(())
    }

    fn info(&self) -> NodeInfo {
        NodeInfo::world_coupled(Type::Func(vec![Type::Str, config_type()], Box::new(out_type())))
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(Schedule { namespace: None, session: None, retry: self.retry.clone() })
    }

    async fn init(&mut self, _ctx: InitCtx) -> Result<()> {
        Ok(())
    }

    async fn stream(&mut self, mut ctx: StreamCtx) -> Result<()> {
        while let Some(frame) = ctx.input.recv().await {
            // The per-edge aggregator delivers one key at a time, so the
            // first frame or two may not carry every argument yet — wait
            // for a complete one instead of failing on a partial frame.
            let ns = match frame.get("ns") {
                None => continue,
                Some(Value::Str(s)) => s.clone(),
                Some(other) => {
                    return Err(FuncError::Programming(format!("Schedule: expected str \"ns\" arg, got {other:?}")));
                }
            };
            if self.session.is_none() && frame.get("config").is_none() {
                continue;
            }
            match &self.namespace {
                None => self.namespace = Some(ns.clone()),
                Some(prev) if *prev != ns => {
                    return Err(FuncError::Programming(format!(
                        "Schedule: primary key changed from {prev:?} to {ns:?}"
                    )));
                }
                _ => {}
            }

            if self.session.is_none() {
                let config = frame
                    .get("config")
                    .cloned()
                    .ok_or_else(|| FuncError::Programming("Schedule: missing \"config\" arg".into()))?;
                let opts = config_to_opts(&config)?;
                let session = match &self.retry {
                    Some(policy) => policy.run(|| ctx.world.acquire(&ns, opts.clone())).await?,
                    None => ctx.world.acquire(&ns, opts).await?,
                };
                self.session = Some(session);
            }

            let session = self.session.as_mut().expect("just ensured Some above");
            match session.next().await {
                Ok(hosts) => {
                    let items = hosts.into_iter().map(Value::Str).collect();
                    ctx.emit(Value::List(Type::Str, items));
                }
                Err(FuncError::EndOfStream) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn call(&self, _ctx: &CallCtx, _args: ArgsFrame) -> Result<Value> {
        Err(FuncError::CannotSpeculate("Schedule requires a live cluster lease".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_strategy_and_omits_zero_fields() {
        let mut cfg = Value::new_struct(config_fields());
        cfg.set("strategy", Value::Str(String::new())).unwrap();
        cfg.set("max", Value::Int(0)).unwrap();
        cfg.set("reuse", Value::Bool(false)).unwrap();
        cfg.set("ttl", Value::Int(0)).unwrap();
        let opts = config_to_opts(&cfg).unwrap();
        assert_eq!(opts, json!({"strategy": "rr"}));
    }

    #[test]
    fn config_keeps_non_zero_fields() {
        let mut cfg = Value::new_struct(config_fields());
        cfg.set("strategy", Value::Str("bin-packing".into())).unwrap();
        cfg.set("max", Value::Int(3)).unwrap();
        cfg.set("reuse", Value::Bool(true)).unwrap();
        cfg.set("ttl", Value::Int(60)).unwrap();
        let opts = config_to_opts(&cfg).unwrap();
        assert_eq!(opts, json!({"strategy": "bin-packing", "max": 3, "reuse": true, "ttl": 60}));
    }

    #[test]
    fn with_retry_constructs_a_schedule_carrying_the_policy() {
        let node = Schedule::with_retry(RetryPolicy::new(4, std::time::Duration::from_millis(1)));
        assert!(node.retry.is_some());
    }
}
