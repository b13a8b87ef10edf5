//! Function registry: maps a dotted/slashed lookup name to the [`FuncValue`]
//! builder used to materialize it, the way `langgraph_core`'s node registry
//! maps a name to a compiled subgraph factory.
//!
//! Names are module-scoped with `/` as the separator (`"net/is_up"`).
//! Identifiers starting with `_` are reserved for runtime-internal entries
//! (synthetic extractor/index nodes higher-order rewrites install) and are
//! rejected from `register`.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{FuncError, Result};
use crate::value::FuncValue;

#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, FuncValue>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, value: FuncValue) -> Result<()> {
        let name = name.into();
        if name.split('/').any(|seg| seg.starts_with('_')) {
            return Err(FuncError::Programming(format!(
                "{name:?}: identifiers starting with '_' are reserved"
            )));
        }
        let mut entries = self.entries.write().expect("registry lock poisoned");
        if entries.contains_key(&name) {
            return Err(FuncError::Programming(format!("{name:?} is already registered")));
        }
        entries.insert(name, value);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<FuncValue> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| FuncError::Programming(format!("no such function {name:?}")))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.read().expect("registry lock poisoned").keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Type;

    fn dummy(sig: Type) -> FuncValue {
        FuncValue::new(sig, |_txn, _args| unreachable!())
    }

    #[test]
    fn rejects_reserved_and_duplicate_names() {
        let reg = Registry::new();
        let sig = Type::Func(vec![Type::Int], Box::new(Type::Int));
        assert!(reg.register("net/is_up", dummy(sig.clone())).is_ok());
        assert!(reg.register("net/is_up", dummy(sig.clone())).is_err());
        assert!(reg.register("_internal", dummy(sig)).is_err());
    }

    #[test]
    fn lookup_reports_missing_names() {
        let reg = Registry::new();
        assert!(reg.lookup("missing").is_err());
    }
}
