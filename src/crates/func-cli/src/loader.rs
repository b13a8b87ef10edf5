//! JSON graph loader: turns a [`GraphDef`] (nodes + edges) into a live
//! `Engine`. Grounded on the teacher's `langgraph-core::yaml` loader
//! (`YamlGraphDef` → `HashMap` of named nodes plus a `Vec` of edges), with
//! JSON standing in for YAML per the graph-description format chosen here.
//!
//! The loader only knows fully-ground node kinds — `map`/`for`/`forkv`/
//! `call`/`composite` are the DSL compiler's job (out of scope here), so
//! this catalog builds every node with its signature already resolved and
//! calls [`func_core::Node::build`] itself; `Engine::seed` never does.

use std::collections::{HashMap, HashSet, VecDeque};

use func_core::node::primitive::{Const, Var};
use func_core::node::structural::{Composite, IfExpr, Output};
use func_core::node::world_coupled::{collect, exchange, file, get, history, schedule, system};
use func_core::{Engine, EngineConfig, FuncError, Node, NodeIndex, Result, Type, Value};
use serde::Deserialize;
use serde_json::Value as Json;

/// A named node plus its construction parameters, flattened from JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeDef {
    pub kind: String,
    #[serde(flatten)]
    pub params: HashMap<String, Json>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EdgeDef {
    pub from: String,
    pub to: String,
    pub arg: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphDef {
    pub nodes: HashMap<String, NodeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
}

fn param<'a>(def: &'a NodeDef, name: &str) -> Result<&'a Json> {
    def.params
        .get(name)
        .ok_or_else(|| FuncError::Programming(format!("node {:?}: missing param {name:?}", def.kind)))
}

fn param_str<'a>(def: &'a NodeDef, name: &str) -> Result<&'a str> {
    param(def, name)?
        .as_str()
        .ok_or_else(|| FuncError::Programming(format!("node {:?}: param {name:?} must be a string", def.kind)))
}

fn param_type(def: &NodeDef, name: &str) -> Result<Type> {
    Type::parse(param_str(def, name)?)
}

fn param_usize(def: &NodeDef, name: &str) -> Result<usize> {
    param(def, name)?
        .as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| FuncError::Programming(format!("node {:?}: param {name:?} must be a non-negative integer", def.kind)))
}

/// Recursively check that every JSON object's keys are a subset of the
/// `Type::Struct` fields it's destined for, before handing off to
/// `Value::from_host`. This is where `EngineConfig::strict_unknown_keys`
/// actually bites: `Type::Struct` is already closed once a `Value` exists,
/// so "unknown key" can only be observed while the data is still raw JSON.
pub fn from_host_checked(ty: &Type, host: Json, strict: bool) -> Result<Value> {
    if strict {
        check_unknown_keys(ty, &host)?;
    }
    Value::from_host(ty, host)
}

fn check_unknown_keys(ty: &Type, host: &Json) -> Result<()> {
    match (ty, host) {
        (Type::Struct(fields), Json::Object(obj)) => {
            let known: HashSet<&str> = fields.iter().map(|(name, _)| name.as_str()).collect();
            for key in obj.keys() {
                if !known.contains(key.as_str()) {
                    return Err(FuncError::Type(format!("unknown field {key:?} for struct type {ty}")));
                }
            }
            for (name, field_ty) in fields {
                if let Some(v) = obj.get(name) {
                    check_unknown_keys(field_ty, v)?;
                }
            }
            Ok(())
        }
        (Type::List(elem), Json::Array(items)) => {
            for item in items {
                check_unknown_keys(elem, item)?;
            }
            Ok(())
        }
        (Type::Map(_, val_ty), Json::Object(obj)) => {
            for v in obj.values() {
                check_unknown_keys(val_ty, v)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn get_out_type(ty: &Type) -> Type {
    Type::Struct(vec![("value".into(), ty.clone()), ("ready".into(), Type::Bool)])
}

/// Builds and `build()`s one node from its JSON definition. Restricted to
/// node kinds whose expected signature can be computed directly from the
/// definition's own fields, with no resolver involved.
pub fn build_node(def: &NodeDef, config: &EngineConfig) -> Result<Box<dyn Node>> {
    let mut node: Box<dyn Node> = match def.kind.as_str() {
        "const" => {
            let ty = param_type(def, "type")?;
            let host = param(def, "value")?.clone();
            let value = from_host_checked(&ty, host, config.strict_unknown_keys)?;
            Box::new(Const::new(value))
        }
        "var" => {
            let name = param_str(def, "name")?.to_string();
            let ty = param_type(def, "type")?;
            Box::new(Var::new(name, ty))
        }
        "history" => {
            let elem_ty = param_type(def, "elem_type")?;
            let size = param_usize(def, "size")?;
            Box::new(history::History::new(elem_ty, size))
        }
        "get" => {
            let ty = param_type(def, "type")?;
            let mut g = get::Get::new();
            g.build(Type::Func(vec![Type::Str], Box::new(get_out_type(&ty))))?;
            return Ok(Box::new(g));
        }
        "get_bool" => Box::new(get::get_bool()),
        "get_str" => Box::new(get::get_str()),
        "get_int" => Box::new(get::get_int()),
        "get_float" => Box::new(get::get_float()),
        "schedule" => Box::new(schedule::Schedule::new()),
        "exchange" => Box::new(exchange::Exchange::new()),
        "collect" => Box::new(collect::Collect::new()),
        "file" => Box::new(file::FileReader::new()),
        "system" => Box::new(system::System::new()),
        "output" => {
            let ty = param_type(def, "type")?;
            Box::new(Output::new(ty))
        }
        "if_expr" => {
            let ty = param_type(def, "type")?;
            Box::new(IfExpr::new(ty))
        }
        "list" => {
            let elem_ty = param_type(def, "elem_type")?;
            let n = param_usize(def, "n")?;
            Box::new(Composite::list(elem_ty, n))
        }
        other => return Err(FuncError::Programming(format!("unknown node kind {other:?}"))),
    };

    // Typed variants and history already have a concrete, self-consistent
    // signature; `build` on them is a no-op sanity check against it.
    let sig = node.info().sig;
    node.build(sig)?;
    Ok(node)
}

/// Order `def.nodes` so every node's upstream edges are already seeded
/// (Kahn's algorithm over the edge list), then seed them into `engine`.
/// Returns the live graph's name→index map for `graph-info` reporting.
pub async fn load_graph(def: &GraphDef, engine: &Engine) -> Result<HashMap<String, NodeIndex>> {
    let mut indegree: HashMap<&str, usize> = def.nodes.keys().map(|n| (n.as_str(), 0)).collect();
    let mut incoming: HashMap<&str, Vec<&EdgeDef>> = HashMap::new();
    for edge in &def.edges {
        if !def.nodes.contains_key(&edge.from) {
            return Err(FuncError::Programming(format!("edge references unknown source node {:?}", edge.from)));
        }
        if !def.nodes.contains_key(&edge.to) {
            return Err(FuncError::Programming(format!("edge references unknown target node {:?}", edge.to)));
        }
        *indegree.get_mut(edge.to.as_str()).expect("validated above") += 1;
        incoming.entry(edge.to.as_str()).or_default().push(edge);
    }

    let mut ready_vec: Vec<&str> = Vec::new();
    for (name, degree) in indegree.iter() {
        if *degree == 0 {
            ready_vec.push(*name);
        }
    }
    ready_vec.sort();
    let mut queue: VecDeque<&str> = ready_vec.into();

    let mut order: Vec<&str> = Vec::with_capacity(def.nodes.len());
    let mut remaining = indegree.clone();
    let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &def.edges {
        outgoing.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
    }

    while let Some(name) = queue.pop_front() {
        order.push(name);
        if let Some(downstream) = outgoing.get(name) {
            let mut newly_ready = Vec::new();
            for &next in downstream {
                let d = remaining.get_mut(next).expect("node present");
                *d -= 1;
                if *d == 0 {
                    newly_ready.push(next);
                }
            }
            newly_ready.sort();
            for n in newly_ready {
                queue.push_back(n);
            }
        }
    }

    if order.len() != def.nodes.len() {
        return Err(FuncError::Programming("graph definition has a cycle".into()));
    }

    let mut indices: HashMap<String, NodeIndex> = HashMap::new();
    for name in order {
        let node_def = &def.nodes[name];
        let node = build_node(node_def, engine.config())?;
        let in_edges = incoming
            .get(name)
            .into_iter()
            .flatten()
            .map(|edge| {
                let up_idx = *indices
                    .get(&edge.from)
                    .expect("upstream node seeded earlier by topological order");
                (up_idx, edge.arg.clone())
            })
            .collect();
        let idx = engine.seed(name.to_string(), node, in_edges).await?;
        indices.insert(name.to_string(), idx);
    }

    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use func_core::new_engine;
    use std::sync::Arc;

    fn world() -> Arc<dyn func_core::World> {
        Arc::new(func_world::InMemoryWorld::new("h1"))
    }

    #[test]
    fn strict_mode_rejects_unknown_struct_keys() {
        let ty = Type::Struct(vec![("x".into(), Type::Int)]);
        let host = serde_json::json!({"x": 1, "y": 2});
        assert!(from_host_checked(&ty, host.clone(), true).is_err());
        assert!(from_host_checked(&ty, host, false).is_ok());
    }

    #[test]
    fn strict_mode_recurses_into_list_elements() {
        let ty = Type::List(Box::new(Type::Struct(vec![("x".into(), Type::Int)])));
        let host = serde_json::json!([{"x": 1, "bogus": true}]);
        assert!(from_host_checked(&ty, host, true).is_err());
    }

    #[tokio::test]
    async fn load_graph_seeds_in_dependency_order() {
        let engine = new_engine(world(), EngineConfig::default());
        let mut nodes = HashMap::new();
        nodes.insert(
            "src".to_string(),
            NodeDef {
                kind: "const".into(),
                params: HashMap::from([
                    ("type".to_string(), serde_json::json!("int")),
                    ("value".to_string(), serde_json::json!(1)),
                ]),
            },
        );
        nodes.insert(
            "passthrough".to_string(),
            NodeDef {
                kind: "var".into(),
                params: HashMap::from([
                    ("name".to_string(), serde_json::json!("x")),
                    ("type".to_string(), serde_json::json!("int")),
                ]),
            },
        );
        let def = GraphDef {
            nodes,
            edges: vec![EdgeDef { from: "src".into(), to: "passthrough".into(), arg: "x".into() }],
        };
        let indices = load_graph(&def, &engine).await.unwrap();
        assert_eq!(indices.len(), 2);
        let summaries = engine.describe().await;
        assert_eq!(summaries.len(), 2);
    }

    #[tokio::test]
    async fn load_graph_rejects_a_cycle() {
        let engine = new_engine(world(), EngineConfig::default());
        let mut nodes = HashMap::new();
        for name in ["a", "b"] {
            nodes.insert(
                name.to_string(),
                NodeDef {
                    kind: "var".into(),
                    params: HashMap::from([
                        ("name".to_string(), serde_json::json!("x")),
                        ("type".to_string(), serde_json::json!("int")),
                    ]),
                },
            );
        }
        let def = GraphDef {
            nodes,
            edges: vec![
                EdgeDef { from: "a".into(), to: "b".into(), arg: "x".into() },
                EdgeDef { from: "b".into(), to: "a".into(), arg: "x".into() },
            ],
        };
        assert!(load_graph(&def, &engine).await.is_err());
    }
}
