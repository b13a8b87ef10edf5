//! In-memory `Scheduler`/`Session` (spec §4.5): a single-process stand-in
//! for cluster leasing. Every namespace has a fixed membership list (this
//! host by default, extendable via [`InMemoryWorld::with_cluster_members`]
//! for multi-host tests); `Session::next` hands back the prefix of that
//! list capped by the config's `max`, honoring the `"rr"` (round-robin)
//! default strategy by rotating the starting offset on every call.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use func_core::error::Result;
use func_core::world::Session;
use serde_json::Value as Json;
use tokio::sync::Mutex;

use crate::error::WorldError;

pub struct InMemoryScheduler {
    members: Arc<Vec<String>>,
}

impl InMemoryScheduler {
    pub fn new(members: Vec<String>) -> Self {
        Self { members: Arc::new(members) }
    }

    pub async fn acquire(&self, _namespace: &str, opts: Json) -> Result<Box<dyn Session>> {
        let max = opts.get("max").and_then(Json::as_u64).map(|v| v as usize);
        let strategy = opts.get("strategy").and_then(Json::as_str).unwrap_or("rr").to_string();
        Ok(Box::new(InMemorySession {
            members: self.members.clone(),
            max,
            strategy,
            offset: AtomicUsize::new(0),
            revoked: Mutex::new(false),
        }))
    }
}

struct InMemorySession {
    members: Arc<Vec<String>>,
    max: Option<usize>,
    strategy: String,
    offset: AtomicUsize,
    revoked: Mutex<bool>,
}

#[async_trait]
impl Session for InMemorySession {
    async fn next(&mut self) -> Result<Vec<String>> {
        if *self.revoked.lock().await {
            return Err(WorldError::LeaseRevoked.into());
        }
        if self.members.is_empty() {
            return Ok(Vec::new());
        }
        let want = self.max.unwrap_or(self.members.len()).min(self.members.len());
        let start = if self.strategy == "rr" {
            self.offset.fetch_add(1, Ordering::Relaxed) % self.members.len()
        } else {
            0
        };
        let assigned = (0..want).map(|i| self.members[(start + i) % self.members.len()].clone()).collect();
        Ok(assigned)
    }
}

impl InMemorySession {
    /// Test hook: simulate losing the lease. The next call to `next` then
    /// fails with the same graceful end-of-stream every other watch closure
    /// uses.
    #[cfg(test)]
    pub(crate) async fn revoke(&self) {
        *self.revoked.lock().await = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_robin_rotates_start_offset() {
        let sched = InMemoryScheduler::new(vec!["a".into(), "b".into(), "c".into()]);
        let mut session = sched.acquire("ns", serde_json::json!({"strategy": "rr"})).await.unwrap();
        let first = session.next().await.unwrap();
        let second = session.next().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[tokio::test]
    async fn max_caps_the_assignment_size() {
        let sched = InMemoryScheduler::new(vec!["a".into(), "b".into(), "c".into()]);
        let mut session = sched.acquire("ns", serde_json::json!({"max": 2})).await.unwrap();
        assert_eq!(session.next().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn revoked_session_ends_the_stream() {
        let mut session = InMemorySession {
            members: Arc::new(vec!["a".into()]),
            max: None,
            strategy: "rr".into(),
            offset: AtomicUsize::new(0),
            revoked: Mutex::new(false),
        };
        session.revoke().await;
        assert!(matches!(session.next().await, Err(func_core::error::FuncError::EndOfStream)));
    }
}
