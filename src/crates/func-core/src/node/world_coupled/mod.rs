//! World-coupled nodes (spec §4.5) — the only nodes that escape the pure
//! graph. Each submodule implements one node, but they share a protocol:
//!
//! 1. on the first input, remember the primary key (kind/namespace/key)
//!    and open the matching watch;
//! 2. a later change to the primary key is a fatal `Programming` error;
//! 3. on every watch event, recompute and emit only if `Cmp` differs from
//!    the last emitted value;
//! 4. a watch closing without error is a graceful end-of-stream.

pub mod collect;
pub mod exchange;
pub mod file;
pub mod get;
pub mod history;
pub mod schedule;
pub mod system;

/// Optional retry policy for the *world* RPC a node makes (not for graph
/// rewrites) — attempts capped, fixed backoff between them. Absent (`None`)
/// means "call once, surface the error".
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: std::time::Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: std::time::Duration) -> Self {
        Self { attempts, backoff }
    }

    pub async fn run<T, F, Fut>(&self, mut f: F) -> crate::error::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = crate::error::Result<T>>,
    {
        let mut last_err = None;
        for attempt in 0..self.attempts.max(1) {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < self.attempts {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }
        Err(last_err.expect("attempts.max(1) guarantees at least one iteration"))
    }
}
