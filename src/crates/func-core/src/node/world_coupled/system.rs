//! The `system` node (spec §4.5): runs a shell command and emits its
//! stdout as `[]str`, one element per line. Unlike the watch-backed
//! world-coupled nodes, a shell command has no natural primary key — it
//! simply re-runs whenever the `command` argument changes.
//!
//! The one RPC it makes (`World::run`) is the one world-coupled call most
//! worth retrying — shell dispatch is the kind of thing that flakes on a
//! loaded host — so it's the node that exercises `RetryPolicy` (SPEC_FULL
//! §4's retry-hook supplement, grounded on the teacher's
//! `pregel::types::RetryPolicy`/`retry.rs`).

use async_trait::async_trait;

use crate::error::{FuncError, Result};
use crate::node::world_coupled::RetryPolicy;
use crate::node::{ArgsFrame, CallCtx, InitCtx, Node, NodeInfo, StreamCtx};
use crate::value::{Type, Value};

fn out_type() -> Type {
    Type::List(Box::new(Type::Str))
}

pub struct System {
    last_command: Option<String>,
    retry: Option<RetryPolicy>,
}

impl System {
    pub fn new() -> Self {
        Self { last_command: None, retry: None }
    }

    /// Retry transient `World::run` failures up to `policy.attempts` times.
    pub fn with_retry(policy: RetryPolicy) -> Self {
        Self { last_command: None, retry: Some(policy) }
    }
}

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for System {
    fn arg_name(&self, i: usize) -> &str {
        assert_eq!(i, 0, "System has exactly one input: the command");
        "command"
    }

    fn build(&mut self, sig: Type) -> Result<()> {
        let expected = Type::Func(vec![Type::Str], Box::new(out_type()));
        if sig != expected {
            return Err(FuncError::Type(format!("System: expected {expected}, got {sig}")));
        }
        Ok(())
    }

    fn info(&self) -> NodeInfo {
        NodeInfo::world_coupled(Type::Func(vec![Type::Str], Box::new(out_type())))
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(System { last_command: None, retry: self.retry.clone() })
    }

    async fn init(&mut self, _ctx: InitCtx) -> Result<()> {
        Ok(())
    }

    async fn stream(&mut self, mut ctx: StreamCtx) -> Result<()> {
        while let Some(frame) = ctx.input.recv().await {
            let Some(Value::Str(command)) = frame.get("command").cloned() else {
                return Err(FuncError::Programming("System: expected str \"command\" arg".into()));
            };
            if self.last_command.as_deref() == Some(command.as_str()) {
                continue;
            }
            let output = match &self.retry {
                Some(policy) => policy.run(|| ctx.world.run(&command)).await?,
                None => ctx.world.run(&command).await?,
            };
            if output.status != 0 {
                return Err(FuncError::World(format!(
                    "System: command {command:?} exited with status {}: {}",
                    output.status, output.stderr
                )));
            }
            let lines = output.stdout.lines().map(|l| Value::Str(l.to_string())).collect();
            ctx.emit(Value::List(Type::Str, lines));
            self.last_command = Some(command);
        }
        Ok(())
    }

    async fn call(&self, _ctx: &CallCtx, _args: ArgsFrame) -> Result<Value> {
        Err(FuncError::CannotSpeculate("System requires a live shell call".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn retry_policy_succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result: Result<u32> = policy
            .run(|| async {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(FuncError::World("transient".into()))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_policy_gives_up_after_exhausting_attempts() {
        let calls = Mutex::new(0u32);
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let result: Result<()> = policy
            .run(|| async {
                *calls.lock().unwrap() += 1;
                Err(FuncError::World("still failing".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn with_retry_constructs_a_system_carrying_the_policy() {
        let sys = System::with_retry(RetryPolicy::new(5, Duration::from_millis(1)));
        assert!(sys.retry.is_some());
    }
}
