//! Structural types and tagged values that flow along graph edges.
//!
//! `Type` is the structural type grammar from the spec: primitives, ordered
//! containers, function signatures, and unification placeholders. `Value` is
//! the corresponding tagged value. Every `Value` carries the `Type` it was
//! built with, and equality between values is always structural — see
//! [`cmp`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::error::{FuncError, Result};
use crate::graph::{Txn, VertexRef};

/// Fresh identifier for a polymorphic placeholder (`?1`, `?2`, ...).
///
/// Two `Type::Var` values are the same variable iff their ids match — ids are
/// only meaningful within a single inference run, minted by
/// [`fresh_var`](crate::resolver::fresh_var).
pub type VarId = u64;

static NEXT_VAR: AtomicU64 = AtomicU64::new(1);

/// Mint a fresh, globally unique unification variable id.
pub fn next_var_id() -> VarId {
    NEXT_VAR.fetch_add(1, AtomicOrdering::Relaxed)
}

/// A structural type tag.
///
/// `Type` is compared structurally (`#[derive(PartialEq)]`), not by name —
/// two `Struct` types with the same fields in the same order are equal even
/// if they came from different call sites. A type is *fully ground* when
/// [`Type::is_ground`] returns `true`; only ground types may reach the graph
/// engine, per spec §3.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Type {
    Bool,
    Int,
    Float,
    Str,
    List(Box<Type>),
    Map(Box<Type>, Box<Type>),
    /// Ordered struct fields: order matters for equality and for `Value::Set`.
    Struct(Vec<(String, Type)>),
    /// `func(params...) -> out`.
    Func(Vec<Type>, Box<Type>),
    /// A unification placeholder. Never reaches the graph engine.
    Var(VarId),
}

impl Type {
    /// Parse the small structural type grammar, e.g. `list[int]`,
    /// `map[str,int]`, `struct{x:int;y:float}`, `func(int,str)->bool`.
    pub fn parse(s: &str) -> Result<Type> {
        let mut p = Parser { s: s.trim(), pos: 0 };
        let ty = p.parse_type()?;
        p.skip_ws();
        if p.pos != p.s.len() {
            return Err(FuncError::Type(format!("trailing input after type: {:?}", &p.s[p.pos..])));
        }
        Ok(ty)
    }

    /// `true` if no `Var` placeholder appears anywhere in this type.
    pub fn is_ground(&self) -> bool {
        match self {
            Type::Bool | Type::Int | Type::Float | Type::Str => true,
            Type::List(t) => t.is_ground(),
            Type::Map(k, v) => k.is_ground() && v.is_ground(),
            Type::Struct(fields) => fields.iter().all(|(_, t)| t.is_ground()),
            Type::Func(params, out) => params.iter().all(Type::is_ground) && out.is_ground(),
            Type::Var(_) => false,
        }
    }

    /// The zero value for this type: `false`, `0`, `0.0`, `""`, or an empty
    /// container of the declared element type.
    pub fn zero(&self) -> Value {
        match self {
            Type::Bool => Value::Bool(false),
            Type::Int => Value::Int(0),
            Type::Float => Value::Float(0.0),
            Type::Str => Value::Str(String::new()),
            Type::List(elem) => Value::List((**elem).clone(), Vec::new()),
            Type::Map(k, v) => Value::Map((**k).clone(), (**v).clone(), Vec::new()),
            Type::Struct(fields) => Value::Struct(fields.clone(), HashMap::new()),
            Type::Func(params, out) => {
                let sig = Type::Func(params.clone(), out.clone());
                Value::Func(FuncValue::zero(sig))
            }
            Type::Var(_) => panic!("zero() called on a non-ground type"),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Str => write!(f, "str"),
            Type::List(t) => write!(f, "list[{t}]"),
            Type::Map(k, v) => write!(f, "map[{k},{v}]"),
            Type::Struct(fields) => {
                write!(f, "struct{{")?;
                for (i, (name, t)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ";")?;
                    }
                    write!(f, "{name}:{t}")?;
                }
                write!(f, "}}")
            }
            Type::Func(params, out) => {
                write!(f, "func(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ")->{out}")
            }
            Type::Var(id) => write!(f, "?{id}"),
        }
    }
}

struct Parser<'a> {
    s: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while self.s[self.pos..].starts_with(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.s[self.pos..].chars().next()
    }

    fn expect(&mut self, c: char) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(FuncError::Type(format!("expected '{c}' at {:?}", &self.s[self.pos..])))
        }
    }

    fn ident(&mut self) -> Result<&'a str> {
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(FuncError::Type(format!("expected identifier at {:?}", &self.s[self.pos..])));
        }
        Ok(&self.s[start..self.pos])
    }

    fn parse_type(&mut self) -> Result<Type> {
        self.skip_ws();
        let word = self.ident()?;
        match word {
            "bool" => Ok(Type::Bool),
            "int" => Ok(Type::Int),
            "float" => Ok(Type::Float),
            "str" => Ok(Type::Str),
            "list" => {
                self.expect('[')?;
                let elem = self.parse_type()?;
                self.expect(']')?;
                Ok(Type::List(Box::new(elem)))
            }
            "map" => {
                self.expect('[')?;
                let k = self.parse_type()?;
                self.expect(',')?;
                let v = self.parse_type()?;
                self.expect(']')?;
                Ok(Type::Map(Box::new(k), Box::new(v)))
            }
            "struct" => {
                self.expect('{')?;
                let mut fields = Vec::new();
                self.skip_ws();
                if self.peek() != Some('}') {
                    loop {
                        let name = self.ident()?.to_string();
                        self.expect(':')?;
                        let ty = self.parse_type()?;
                        fields.push((name, ty));
                        self.skip_ws();
                        if self.peek() == Some(';') {
                            self.pos += 1;
                            continue;
                        }
                        break;
                    }
                }
                self.expect('}')?;
                Ok(Type::Struct(fields))
            }
            "func" => {
                self.expect('(')?;
                let mut params = Vec::new();
                self.skip_ws();
                if self.peek() != Some(')') {
                    loop {
                        params.push(self.parse_type()?);
                        self.skip_ws();
                        if self.peek() == Some(',') {
                            self.pos += 1;
                            continue;
                        }
                        break;
                    }
                }
                self.expect(')')?;
                self.expect('-')?;
                self.expect('>')?;
                let out = self.parse_type()?;
                Ok(Type::Func(params, Box::new(out)))
            }
            other => Err(FuncError::Type(format!("unknown type keyword {other:?}"))),
        }
    }
}

/// A first-class function value: a builder closure that, given a
/// transactional graph handle and an ordered list of argument vertex
/// references, accumulates the corresponding subgraph as pending ops on
/// `txn` and returns a reference to its single output vertex.
///
/// Arguments are [`VertexRef`] rather than a bare [`NodeIndex`] because a
/// higher-order node's rebuild often wires a function body to an extractor
/// node created earlier in the *same* uncommitted batch (Map's per-element
/// `ListIndex`, For's per-entry value node) — such a vertex has no real
/// index yet. `build` itself never calls `commit`, so a caller can build
/// several bodies (one per element) into the same transaction before
/// committing once.
///
/// Equality is reference equality on the underlying builder (spec §4.4.1):
/// function values are not required to have value equality, only identity.
#[derive(Clone)]
pub struct FuncValue {
    sig: Type,
    builder: Arc<dyn Fn(&mut Txn, &[VertexRef]) -> Result<VertexRef> + Send + Sync>,
}

impl FuncValue {
    pub fn new(
        sig: Type,
        builder: impl Fn(&mut Txn, &[VertexRef]) -> Result<VertexRef> + Send + Sync + 'static,
    ) -> Self {
        Self { sig, builder: Arc::new(builder) }
    }

    /// A builder that always fails; used as the zero value of a function
    /// type (never actually invoked by well-typed graphs).
    fn zero(sig: Type) -> Self {
        Self::new(sig, |_txn, _args| {
            Err(FuncError::Programming("zero FuncValue invoked".into()))
        })
    }

    pub fn sig(&self) -> &Type {
        &self.sig
    }

    /// Add this function value's body to `txn` as pending ops, wired to
    /// `args`. Returns a reference to the body's output vertex.
    pub fn build(&self, txn: &mut Txn, args: &[VertexRef]) -> Result<VertexRef> {
        (self.builder)(txn, args)
    }

    /// Stable identity for this builder, used to detect "the same
    /// `FuncValue`" across ticks without requiring value equality.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.builder) as *const () as usize
    }
}

impl PartialEq for FuncValue {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl fmt::Debug for FuncValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FuncValue({}, id={:#x})", self.sig, self.identity())
    }
}

/// A tagged value matching [`Type`].
///
/// Containers preserve insertion order (`Map`) or positional order (`List`,
/// `Struct`'s field list) exactly as declared in spec §3.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Element type plus the ordered elements.
    List(Type, Vec<Value>),
    /// Key/value types plus insertion-ordered pairs.
    Map(Type, Type, Vec<(Value, Value)>),
    /// Declared field order/types plus the current field→value mapping.
    Struct(Vec<(String, Type)>, HashMap<String, Value>),
    Func(FuncValue),
}

impl Value {
    /// The `Type` this value was constructed with. Always agrees
    /// structurally with any `Type` used to build it (spec §3 invariant).
    pub fn type_of(&self) -> Type {
        match self {
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::Str(_) => Type::Str,
            Value::List(t, _) => Type::List(Box::new(t.clone())),
            Value::Map(k, v, _) => Type::Map(Box::new(k.clone()), Box::new(v.clone())),
            Value::Struct(fields, _) => Type::Struct(fields.clone()),
            Value::Func(f) => f.sig().clone(),
        }
    }

    /// Construct an empty struct value ready for `Set`.
    pub fn new_struct(fields: Vec<(String, Type)>) -> Value {
        Value::Struct(fields, HashMap::new())
    }

    /// Assign `field` to `value`, enforcing field presence and type.
    /// Overwrites on duplicate `Set`, as spec §4.2 allows.
    pub fn set(&mut self, field: &str, value: Value) -> Result<()> {
        match self {
            Value::Struct(decl, map) => {
                let declared = decl
                    .iter()
                    .find(|(name, _)| name == field)
                    .map(|(_, t)| t.clone())
                    .ok_or_else(|| FuncError::Programming(format!("struct has no field {field:?}")))?;
                if value.type_of() != declared {
                    return Err(FuncError::Type(format!(
                        "field {field:?} expects {declared}, got {}",
                        value.type_of()
                    )));
                }
                map.insert(field.to_string(), value);
                Ok(())
            }
            other => Err(FuncError::Programming(format!("Set called on non-struct value {other:?}"))),
        }
    }

    pub fn get_field(&self, field: &str) -> Result<&Value> {
        match self {
            Value::Struct(_, map) => map
                .get(field)
                .ok_or_else(|| FuncError::Programming(format!("struct missing field {field:?}"))),
            other => Err(FuncError::Programming(format!("get_field on non-struct value {other:?}"))),
        }
    }

    /// Convert to an untyped host representation for embedding in foreign
    /// contexts (templating, tests). See spec §4.2 `Value()`.
    pub fn to_host(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::json!(b),
            Value::Int(i) => serde_json::json!(i),
            Value::Float(f) => serde_json::json!(f),
            Value::Str(s) => serde_json::json!(s),
            Value::List(_, items) => serde_json::Value::Array(items.iter().map(Value::to_host).collect()),
            Value::Map(_, _, pairs) => {
                // Host maps are string-keyed; non-string keys are rendered via Display.
                let mut obj = serde_json::Map::new();
                for (k, v) in pairs {
                    let key = match k {
                        Value::Str(s) => s.clone(),
                        other => format!("{other:?}"),
                    };
                    obj.insert(key, v.to_host());
                }
                serde_json::Value::Object(obj)
            }
            Value::Struct(decl, map) => {
                let mut obj = serde_json::Map::new();
                for (name, _) in decl {
                    if let Some(v) = map.get(name) {
                        obj.insert(name.clone(), v.to_host());
                    }
                }
                serde_json::Value::Object(obj)
            }
            Value::Func(_) => serde_json::Value::String("<func>".to_string()),
        }
    }

    /// Reconstruct a `Value` of the given ground `Type` from a host
    /// representation. Inverse of [`Value::to_host`] for ground values
    /// (spec §8 round-trip law).
    pub fn from_host(ty: &Type, host: serde_json::Value) -> Result<Value> {
        match (ty, host) {
            (Type::Bool, serde_json::Value::Bool(b)) => Ok(Value::Bool(b)),
            (Type::Int, serde_json::Value::Number(n)) => n
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| FuncError::Type("expected integer".into())),
            (Type::Float, serde_json::Value::Number(n)) => n
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| FuncError::Type("expected float".into())),
            (Type::Str, serde_json::Value::String(s)) => Ok(Value::Str(s)),
            (Type::List(elem), serde_json::Value::Array(items)) => {
                let values = items
                    .into_iter()
                    .map(|v| Value::from_host(elem, v))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::List((**elem).clone(), values))
            }
            (Type::Map(k, v), serde_json::Value::Object(obj)) => {
                if **k != Type::Str {
                    return Err(FuncError::Type("from_host only supports string-keyed maps".into()));
                }
                let mut pairs = Vec::with_capacity(obj.len());
                for (key, val) in obj {
                    pairs.push((Value::Str(key), Value::from_host(v, val)?));
                }
                Ok(Value::Map((**k).clone(), (**v).clone(), pairs))
            }
            (Type::Struct(decl), serde_json::Value::Object(obj)) => {
                let mut map = HashMap::new();
                for (name, field_ty) in decl {
                    let raw = obj
                        .get(name)
                        .cloned()
                        .ok_or_else(|| FuncError::Type(format!("missing field {name:?}")))?;
                    map.insert(name.clone(), Value::from_host(field_ty, raw)?);
                }
                Ok(Value::Struct(decl.clone(), map))
            }
            (ty, host) => Err(FuncError::Type(format!("cannot convert {host} into {ty}"))),
        }
    }
}

/// Structural equality, explicitly re-exposed as a named comparator per
/// spec §4.2 (`Cmp`). Returns `None` when `a` and `b` are equal, or
/// `Some(reason)` with a short diagnostic of the first difference found.
///
/// `cmp` is reflexive, symmetric, and transitive on values of equal `Type`
/// (spec §8), since it reduces to structural `PartialEq`.
pub fn cmp(a: &Value, b: &Value) -> Option<String> {
    if a == b {
        None
    } else if a.type_of() != b.type_of() {
        Some(format!("type mismatch: {} vs {}", a.type_of(), b.type_of()))
    } else {
        Some(format!("{a:?} != {b:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_primitives_and_containers() {
        assert_eq!(Type::parse("int").unwrap(), Type::Int);
        assert_eq!(Type::parse("list[str]").unwrap(), Type::List(Box::new(Type::Str)));
        assert_eq!(
            Type::parse("map[str,int]").unwrap(),
            Type::Map(Box::new(Type::Str), Box::new(Type::Int))
        );
        assert_eq!(
            Type::parse("struct{x:int;y:float}").unwrap(),
            Type::Struct(vec![("x".into(), Type::Int), ("y".into(), Type::Float)])
        );
        assert_eq!(
            Type::parse("func(int,str)->bool").unwrap(),
            Type::Func(vec![Type::Int, Type::Str], Box::new(Type::Bool))
        );
    }

    #[test]
    fn zero_values_are_empty() {
        assert_eq!(Type::Int.zero(), Value::Int(0));
        assert_eq!(Type::Bool.zero(), Value::Bool(false));
        match Type::List(Box::new(Type::Int)).zero() {
            Value::List(_, items) => assert!(items.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn struct_set_enforces_field_type() {
        let mut s = Value::new_struct(vec![("x".into(), Type::Int)]);
        assert!(s.set("x", Value::Int(1)).is_ok());
        assert!(s.set("x", Value::Str("no".into())).is_err());
        assert!(s.set("missing", Value::Int(1)).is_err());
    }

    #[test]
    fn cmp_is_equivalence_relation() {
        let a = Value::Int(1);
        let b = Value::Int(1);
        let c = Value::Int(2);
        assert!(cmp(&a, &b).is_none());
        assert!(cmp(&b, &a).is_none());
        assert!(cmp(&a, &c).is_some());
    }

    #[test]
    fn host_round_trip_for_ground_values() {
        let ty = Type::Struct(vec![("x".into(), Type::Int), ("ok".into(), Type::Bool)]);
        let mut v = Value::new_struct(vec![("x".into(), Type::Int), ("ok".into(), Type::Bool)]);
        v.set("x", Value::Int(7)).unwrap();
        v.set("ok", Value::Bool(true)).unwrap();
        let host = v.to_host();
        let back = Value::from_host(&ty, host).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn func_value_equality_is_by_identity() {
        let sig = Type::Func(vec![Type::Int], Box::new(Type::Int));
        let f1 = FuncValue::new(sig.clone(), |_txn, _args| unreachable!());
        let f2 = f1.clone();
        let f3 = FuncValue::new(sig, |_txn, _args| unreachable!());
        assert_eq!(f1, f2);
        assert_ne!(f1, f3);
    }
}
