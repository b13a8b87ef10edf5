//! `Local.Pool` (spec §4.5): allocate/recall a unique non-zero integer for a
//! `uid` within a named pool, reusing the lowest free slot once released.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;

#[derive(Default)]
struct PoolState {
    assigned: HashMap<String, i64>,
    used: HashSet<i64>,
}

impl PoolState {
    fn lowest_free(&self) -> i64 {
        let mut candidate = 1;
        while self.used.contains(&candidate) {
            candidate += 1;
        }
        candidate
    }
}

#[derive(Default)]
pub struct Pools {
    pools: Mutex<HashMap<String, PoolState>>,
}

impl Pools {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, pool: &str, uid: &str) -> i64 {
        let mut pools = self.pools.lock().await;
        let state = pools.entry(pool.to_string()).or_default();
        if let Some(id) = state.assigned.get(uid) {
            return *id;
        }
        let id = state.lowest_free();
        state.used.insert(id);
        state.assigned.insert(uid.to_string(), id);
        id
    }

    pub async fn release(&self, pool: &str, uid: &str) {
        let mut pools = self.pools.lock().await;
        if let Some(state) = pools.get_mut(pool) {
            if let Some(id) = state.assigned.remove(uid) {
                state.used.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reacquiring_the_same_uid_returns_the_same_id() {
        let pools = Pools::new();
        let a = pools.acquire("p", "alice").await;
        let b = pools.acquire("p", "alice").await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn released_slots_are_reused() {
        let pools = Pools::new();
        let a = pools.acquire("p", "alice").await;
        pools.release("p", "alice").await;
        let b = pools.acquire("p", "bob").await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn ids_are_never_zero() {
        let pools = Pools::new();
        assert!(pools.acquire("p", "alice").await > 0);
    }
}
