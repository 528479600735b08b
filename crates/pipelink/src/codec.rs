//! # Value Codec
//!
//! `deref` turns a live value into its wire form: every function leaf is
//! replaced by the id of a `callback` node and the dotted path to that leaf is
//! appended to `refs`. `reref` runs on the receiving side and puts the real
//! values back at those paths.
//!
//! Paths join keys with `.`, so a map key containing a dot cannot be
//! addressed; peers on the other end split paths the same way.
//!
//! Nesting is bounded by `MAX_NESTING_DEPTH`; anything deeper, such as an
//! object that contains itself, is cut off to `Null`.

use crate::command::CommandId;
use crate::error::Error;
use crate::error::Result;
use crate::graph::Graph;
use crate::value::Function;
use crate::value::MAX_NESTING_DEPTH;
use crate::value::Value;

/// Encodes `value` for transmission through `graph`, recording substituted paths in `refs`.
pub fn deref(value: &Value, graph: &Graph, refs: &mut Vec<String>) -> Value {
    let mut path = Vec::new();
    walk(value, graph, refs, &mut path)
}

fn walk(value: &Value, graph: &Graph, refs: &mut Vec<String>, path: &mut Vec<String>) -> Value {
    if path.len() > MAX_NESTING_DEPTH {
        return Value::Null;
    }
    match value {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                path.push(index.to_string());
                out.push(walk(item, graph, refs, path));
                path.pop();
            }
            Value::Array(out)
        }
        Value::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(key, item)| (key.clone(), child(key, item, graph, refs, path)))
                .collect(),
        ),
        Value::Object(object) => Value::Map(
            object
                .entries()
                .into_iter()
                .map(|(key, item)| {
                    let encoded = child(&key, &item, graph, refs, path);
                    (key, encoded)
                })
                .collect(),
        ),
        Value::Stub(stub) if stub.graph().ptr_eq(graph) => {
            refs.push(path.join("."));
            id_value(stub.id())
        }
        Value::Stub(stub) => {
            // A stub of another session behaves like any local function.
            let forward = stub.clone();
            let function = Function::new(move |_, args| Ok(Value::Stub(forward.call(args))));
            refs.push(path.join("."));
            id_value(graph.callback_id(&function))
        }
        Value::Function(function) => {
            refs.push(path.join("."));
            id_value(graph.callback_id(function))
        }
        Value::Deferred(_) => Value::Null,
        primitive => primitive.clone(),
    }
}

fn child(
    key: &str,
    item: &Value,
    graph: &Graph,
    refs: &mut Vec<String>,
    path: &mut Vec<String>,
) -> Value {
    path.push(key.to_string());
    let encoded = walk(item, graph, refs, path);
    path.pop();
    encoded
}

fn id_value(id: CommandId) -> Value {
    Value::Int(id as i64)
}

/// Decodes a wire value, replacing the id at each path in `refs` with `context(id)`.
///
/// An empty path means `value` itself is the reference.
pub fn reref<F>(mut value: Value, refs: &[String], context: F) -> Result<Value>
where
    F: Fn(CommandId) -> Result<Value>,
{
    for path in refs {
        if path.is_empty() {
            return context(leaf_id(&value, path)?);
        }

        let mut keys: Vec<&str> = path.split('.').collect();
        let last = keys.pop().unwrap_or_default();

        let mut slot = &mut value;
        for key in keys {
            slot = match child_mut(slot, key) {
                Some(next) => next,
                None => return Err(unresolved(path)),
            };
        }
        let Some(leaf) = child_mut(slot, last) else {
            return Err(unresolved(path));
        };
        let id = leaf_id(leaf, path)?;
        *leaf = context(id)?;
    }
    Ok(value)
}

fn child_mut<'a>(value: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    match value {
        Value::Array(items) => key.parse::<usize>().ok().and_then(move |i| items.get_mut(i)),
        Value::Map(entries) => entries.get_mut(key),
        _ => None,
    }
}

fn leaf_id(value: &Value, path: &str) -> Result<CommandId> {
    match value {
        Value::Int(id) if *id >= 0 => Ok(*id as CommandId),
        other => Err(Error::Malformed(format!(
            "expected a reference id at '{}', found {}",
            path,
            other.kind()
        ))),
    }
}

fn unresolved(path: &str) -> Error {
    Error::Malformed(format!("reference path '{}' does not resolve", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::config::SessionConfig;
    use crate::duplex::Signal;
    use crate::value::Object;

    fn graph() -> Graph {
        Graph::new(&SessionConfig::default(), Signal::new())
    }

    fn noop() -> Function {
        Function::new(|_, _| Ok(Value::Null))
    }

    #[test]
    fn test_primitives_pass_through() {
        let g = graph();
        let mut refs = Vec::new();
        let value = Value::from(vec![Value::from(1), Value::from("a"), Value::Null]);
        assert_eq!(deref(&value, &g, &mut refs), value);
        assert!(refs.is_empty());
    }

    #[test]
    fn test_function_paths_are_dotted() {
        let g = graph();
        let mut inner = BTreeMap::new();
        inner.insert("onload".to_string(), Value::from(noop()));
        let value = Value::from(vec![Value::from(1), Value::Map(inner)]);

        let mut refs = Vec::new();
        let encoded = deref(&value, &g, &mut refs);

        assert_eq!(refs, vec!["1.onload".to_string()]);
        let onload = encoded.get_property("1").unwrap().get_property("onload").unwrap();
        assert!(onload.as_int().is_some());
    }

    #[test]
    fn test_same_function_same_id() {
        let g = graph();
        let f = noop();
        let mut refs = Vec::new();
        let args = Value::from(vec![Value::from(f.clone()), Value::from(f)]);
        let encoded = deref(&args, &g, &mut refs);

        assert_eq!(refs, vec!["0".to_string(), "1".to_string()]);
        assert_eq!(encoded.get_property("0").unwrap(), encoded.get_property("1").unwrap());
    }

    #[test]
    fn test_own_stub_encodes_as_its_id() {
        let g = graph();
        let stub = g.root().get("body");
        let mut refs = Vec::new();
        let encoded = deref(&Value::from(stub.clone()), &g, &mut refs);

        assert_eq!(refs, vec![String::new()]);
        assert_eq!(encoded, Value::Int(stub.id() as i64));
    }

    #[test]
    fn test_objects_encode_as_maps() {
        let g = graph();
        let object = Object::new().with("x", 1).with("cb", noop());
        let mut refs = Vec::new();
        let encoded = deref(&Value::from(object), &g, &mut refs);

        assert_eq!(refs, vec!["cb".to_string()]);
        assert_eq!(encoded.get_property("x").unwrap(), Value::Int(1));
    }

    #[test]
    fn test_reref_root_path() {
        let out = reref(Value::Int(3), &[String::new()], |id| {
            Ok(Value::from(format!("node {}", id)))
        })
        .unwrap();
        assert_eq!(out, Value::from("node 3"));
    }

    #[test]
    fn test_reref_rejects_bad_paths() {
        let value = Value::from(vec![Value::from("not an id")]);
        assert!(matches!(
            reref(value.clone(), &["0".to_string()], |_| Ok(Value::Null)),
            Err(Error::Malformed(_))
        ));
        assert!(matches!(
            reref(value, &["4.x".to_string()], |_| Ok(Value::Null)),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn test_reref_propagates_missing_context() {
        let value = Value::from(vec![Value::from(12)]);
        let result = reref(value, &["0".to_string()], |id| Err(Error::UnknownTarget(id)));
        assert!(matches!(result, Err(Error::UnknownTarget(12))));
    }

    #[test]
    fn test_cyclic_object_is_cut_off() {
        let g = graph();
        let f = noop();
        let object = Object::new().with("cb", f.clone());
        object.set("me", object.clone());

        let mut refs = Vec::new();
        let encoded = deref(&Value::from(object.clone()), &g, &mut refs);

        let mut depth = 0;
        let mut cursor = encoded;
        while let Value::Map(mut entries) = cursor {
            cursor = entries.remove("me").unwrap_or_default();
            depth += 1;
        }
        assert_eq!(cursor, Value::Null);
        assert_eq!(depth, MAX_NESTING_DEPTH + 1);

        // one callback, referenced from every level whose children were kept
        assert_eq!(refs.len(), MAX_NESTING_DEPTH);
        assert_eq!(refs[1], "me.cb");
        assert!(g.local_callback(g.callback_id(&f)).is_some());
        object.remove("me");
    }

    #[test]
    fn test_foreign_stub_becomes_callback() {
        let g = graph();
        let other = graph();
        let mut refs = Vec::new();
        let encoded = deref(&Value::from(other.root()), &g, &mut refs);

        let id = encoded.as_int().unwrap() as CommandId;
        assert!(g.local_callback(id).is_some());
    }
}
