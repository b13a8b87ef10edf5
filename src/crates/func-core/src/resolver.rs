//! Polymorphic resolver (spec §4.6, §9): drives a node's optional `infer`
//! hook to a fully-ground signature before the loader ever calls `build`.
//!
//! Per spec §9 ("Polymorphic resolution: represent unification variables as
//! fresh integer IDs with a union-find solver outside the graph engine; the
//! engine never sees variables"), [`Solver`] is a plain union-find over
//! [`VarId`]s plus a structural unifier over [`Type`]. Nothing here is
//! grounded in the teacher, which has no polymorphic type layer of its own
//! (`langgraph-core`'s channels are dynamically typed `serde_json::Value`);
//! the algorithm comes directly from spec §9's own description.

use std::collections::HashMap;

use crate::error::{FuncError, Result};
use crate::node::{Invariant, Node, PartialType, PartialValues};
use crate::value::{next_var_id, Type, VarId};

/// Mint a fresh unification variable id, scoped to one `infer` call or one
/// resolver run — never meaningful across runs.
pub fn fresh_var() -> VarId {
    next_var_id()
}

/// Union-find over unification variables, plus the structural types they
/// have been bound to so far. One `Solver` is scoped to a single call site's
/// resolution; it is discarded once `build` has been invoked.
#[derive(Default)]
pub struct Solver {
    parent: HashMap<VarId, VarId>,
    bound: HashMap<VarId, Type>,
}

impl Solver {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&mut self, id: VarId) -> VarId {
        match self.parent.get(&id).copied() {
            Some(p) if p != id => {
                let root = self.find(p);
                self.parent.insert(id, root);
                root
            }
            _ => id,
        }
    }

    /// Record one resolver-emitted invariant.
    pub fn apply(&mut self, inv: &Invariant) -> Result<()> {
        match inv {
            Invariant::SameAs(a, b) => self.unify(&Type::Var(*a), &Type::Var(*b)),
            Invariant::Equals(v, ty) => self.unify(&Type::Var(*v), ty),
            Invariant::ElemOf(list_var, elem_var) => {
                self.unify(&Type::Var(*list_var), &Type::List(Box::new(Type::Var(*elem_var))))
            }
        }
    }

    /// Structural unification. Two ground shapes must match exactly;
    /// variables bind to whatever they're unified against, transitively.
    pub fn unify(&mut self, a: &Type, b: &Type) -> Result<()> {
        match (a, b) {
            (Type::Var(id), other) | (other, Type::Var(id)) if !matches!(other, Type::Var(_)) => {
                self.bind(*id, other.clone())
            }
            (Type::Var(a_id), Type::Var(b_id)) => {
                let (ra, rb) = (self.find(*a_id), self.find(*b_id));
                if ra != rb {
                    self.parent.insert(ra, rb);
                    if let Some(ty) = self.bound.remove(&ra) {
                        self.bind(rb, ty)?;
                    }
                }
                Ok(())
            }
            (Type::List(x), Type::List(y)) => self.unify(x, y),
            (Type::Map(k1, v1), Type::Map(k2, v2)) => {
                self.unify(k1, k2)?;
                self.unify(v1, v2)
            }
            (Type::Struct(f1), Type::Struct(f2)) => {
                if f1.len() != f2.len() {
                    return Err(FuncError::Unify(format!("struct arity mismatch: {a} vs {b}")));
                }
                for ((n1, t1), (n2, t2)) in f1.iter().zip(f2.iter()) {
                    if n1 != n2 {
                        return Err(FuncError::Unify(format!("struct field mismatch: {n1:?} vs {n2:?}")));
                    }
                    self.unify(t1, t2)?;
                }
                Ok(())
            }
            (Type::Func(p1, o1), Type::Func(p2, o2)) => {
                if p1.len() != p2.len() {
                    return Err(FuncError::Unify(format!("arity mismatch: {a} vs {b}")));
                }
                for (x, y) in p1.iter().zip(p2.iter()) {
                    self.unify(x, y)?;
                }
                self.unify(o1, o2)
            }
            (x, y) if x == y => Ok(()),
            (x, y) => Err(FuncError::Unify(format!("cannot unify {x} with {y}"))),
        }
    }

    fn bind(&mut self, id: VarId, ty: Type) -> Result<()> {
        let root = self.find(id);
        if let Type::Var(other) = &ty {
            let other_root = self.find(*other);
            if other_root == root {
                return Ok(());
            }
        }
        match self.bound.get(&root).cloned() {
            Some(existing) => self.unify(&existing, &ty),
            None => {
                if occurs(root, &ty) {
                    return Err(FuncError::Unify(format!("infinite type: ?{root} occurs in {ty}")));
                }
                self.bound.insert(root, ty);
                Ok(())
            }
        }
    }

    /// Substitute every resolved variable in `ty`. Fails if any variable is
    /// still unbound — spec §3: "only fully-ground types may reach the
    /// graph engine".
    pub fn resolve(&mut self, ty: &Type) -> Result<Type> {
        match ty {
            Type::Var(id) => {
                let root = self.find(*id);
                match self.bound.get(&root).cloned() {
                    Some(bound) => self.resolve(&bound),
                    None => Err(FuncError::Unify(format!("unresolved variable ?{id}"))),
                }
            }
            Type::List(elem) => Ok(Type::List(Box::new(self.resolve(elem)?))),
            Type::Map(k, v) => Ok(Type::Map(Box::new(self.resolve(k)?), Box::new(self.resolve(v)?))),
            Type::Struct(fields) => {
                let resolved = fields
                    .iter()
                    .map(|(name, t)| Ok((name.clone(), self.resolve(t)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Type::Struct(resolved))
            }
            Type::Func(params, out) => {
                let params = params.iter().map(|t| self.resolve(t)).collect::<Result<Vec<_>>>()?;
                Ok(Type::Func(params, Box::new(self.resolve(out)?)))
            }
            ground => Ok(ground.clone()),
        }
    }
}

fn occurs(root: VarId, ty: &Type) -> bool {
    match ty {
        Type::Var(id) => *id == root,
        Type::List(t) => occurs(root, t),
        Type::Map(k, v) => occurs(root, k) || occurs(root, v),
        Type::Struct(fields) => fields.iter().any(|(_, t)| occurs(root, t)),
        Type::Func(params, out) => params.iter().any(|t| occurs(root, t)) || occurs(root, out),
        _ => false,
    }
}

/// Resolve one polymorphic call site end to end: invoke `infer`, solve its
/// invariants, and `build` the node against the ground result. Nodes whose
/// signature is already ground at construction (the common case — most
/// primitive and world-coupled nodes) never implement `infer`; the loader
/// calls `build` on those directly and never goes through this function.
pub fn resolve(node: &mut dyn Node, partial: &PartialType, consts: &PartialValues) -> Result<Type> {
    let Some(inferred) = node.infer(partial, consts) else {
        return Err(FuncError::Programming(
            "resolve: node does not implement infer; call build directly with an already-ground signature".into(),
        ));
    };
    let (sig, invariants) = inferred?;
    let mut solver = Solver::new();
    for inv in &invariants {
        solver.apply(inv)?;
    }
    let ground = solver.resolve(&sig)?;
    if !ground.is_ground() {
        return Err(FuncError::Unify(format!("resolve: signature still carries variables after solving: {ground}")));
    }
    node.build(ground.clone())?;
    node.validate()?;
    Ok(ground)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unifies_var_against_ground_type() {
        let mut s = Solver::new();
        let v = fresh_var();
        s.unify(&Type::Var(v), &Type::Int).unwrap();
        assert_eq!(s.resolve(&Type::Var(v)).unwrap(), Type::Int);
    }

    #[test]
    fn elem_of_invariant_derives_list_type() {
        let mut s = Solver::new();
        let list_v = fresh_var();
        let elem_v = fresh_var();
        s.apply(&Invariant::ElemOf(list_v, elem_v)).unwrap();
        s.apply(&Invariant::Equals(elem_v, Type::Str)).unwrap();
        assert_eq!(s.resolve(&Type::Var(list_v)).unwrap(), Type::List(Box::new(Type::Str)));
    }

    #[test]
    fn same_as_propagates_through_transitively_joined_vars() {
        let mut s = Solver::new();
        let (a, b, c) = (fresh_var(), fresh_var(), fresh_var());
        s.apply(&Invariant::SameAs(a, b)).unwrap();
        s.apply(&Invariant::SameAs(b, c)).unwrap();
        s.apply(&Invariant::Equals(c, Type::Bool)).unwrap();
        assert_eq!(s.resolve(&Type::Var(a)).unwrap(), Type::Bool);
    }

    #[test]
    fn conflicting_equals_invariants_fail() {
        let mut s = Solver::new();
        let v = fresh_var();
        s.apply(&Invariant::Equals(v, Type::Int)).unwrap();
        assert!(s.apply(&Invariant::Equals(v, Type::Str)).is_err());
    }

    #[test]
    fn unresolved_variable_is_rejected() {
        let mut s = Solver::new();
        let v = fresh_var();
        assert!(s.resolve(&Type::Var(v)).is_err());
    }
}
