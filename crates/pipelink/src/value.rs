//! # Values
//!
//! The dynamic values a session moves around: primitives, containers that are
//! copied by value, shared objects and functions that are passed by reference,
//! deferred results, and stubs standing in for remote values.
//!
//! ## Invariants
//!
//! - `Array` and `Map` are plain data and carry no identity.
//! - `Object` and `Function` compare by identity; clones share state.
//! - A `Function` keeps its `FunctionKey` for life, across every clone.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::Shared;

use crate::stub::Stub;

/// Values nested deeper than this are cut off to `Null` when copied for the
/// wire. Shared objects may contain themselves.
pub(crate) const MAX_NESTING_DEPTH: usize = 64;

/// The host environment's ordinary failures.
///
/// Nothing in the protocol catches these; they travel up to whoever drove the
/// failing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// A property was read or written on a value without properties.
    NotAnObject { kind: &'static str, key: String },
    /// Something other than a function was invoked.
    NotCallable(&'static str),
    /// An array was written past its end; arrays grow by at most one element.
    IndexOutOfRange { index: usize, len: usize },
    /// A function failed with a message.
    Thrown(String),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject { kind, key } => {
                write!(f, "cannot access property '{}' of {}", key, kind)
            }
            Self::NotCallable(kind) => write!(f, "{} is not a function", kind),
            Self::IndexOutOfRange { index, len } => {
                write!(f, "index {} is out of range for an array of length {}", index, len)
            }
            Self::Thrown(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Fault {}

pub type Result<T> = std::result::Result<T, Fault>;

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(Object),
    Function(Function),
    Deferred(Deferred),
    Stub(Stub),
}

impl Value {
    /// Short name of the variant, used in faults and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
            Self::Deferred(_) => "deferred",
            Self::Stub(_) => "stub",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of either number variant.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_stub(&self) -> Option<&Stub> {
        match self {
            Self::Stub(s) => Some(s),
            _ => None,
        }
    }

    /// Reads `key` off this value.
    ///
    /// Missing keys read as `Null`. Arrays and strings answer `length`, and
    /// arrays also answer numeric indices. Reading off a stub issues a remote
    /// `get` and returns the new stub.
    pub fn get_property(&self, key: &str) -> Result<Value> {
        match self {
            Self::Map(entries) => Ok(entries.get(key).cloned().unwrap_or_default()),
            Self::Object(object) => Ok(object.get(key).unwrap_or_default()),
            Self::Function(function) => Ok(function.props().get(key).unwrap_or_default()),
            Self::Array(items) => {
                if key == "length" {
                    return Ok(Self::Int(items.len() as i64));
                }
                let item = key.parse::<usize>().ok().and_then(|i| items.get(i));
                Ok(item.cloned().unwrap_or_default())
            }
            Self::String(s) if key == "length" => Ok(Self::Int(s.chars().count() as i64)),
            Self::Stub(stub) => Ok(Self::Stub(stub.get(key))),
            Self::Null => Err(Fault::NotAnObject { kind: self.kind(), key: key.to_string() }),
            _ => Ok(Self::Null),
        }
    }

    /// Assigns `key` on this value.
    ///
    /// Plain containers are updated in place; objects and functions update the
    /// shared property bag every clone sees.
    pub fn set_property(&mut self, key: &str, value: Value) -> Result<()> {
        match self {
            Self::Map(entries) => {
                entries.insert(key.to_string(), value);
                Ok(())
            }
            Self::Object(object) => {
                object.set(key, value);
                Ok(())
            }
            Self::Function(function) => {
                function.props().set(key, value);
                Ok(())
            }
            Self::Array(items) => {
                let Ok(index) = key.parse::<usize>() else {
                    return Err(Fault::NotAnObject { kind: "array", key: key.to_string() });
                };
                match index.cmp(&items.len()) {
                    std::cmp::Ordering::Less => items[index] = value,
                    std::cmp::Ordering::Equal => items.push(value),
                    std::cmp::Ordering::Greater => {
                        return Err(Fault::IndexOutOfRange { index, len: items.len() });
                    }
                }
                Ok(())
            }
            Self::Stub(stub) => {
                stub.set(key, value);
                Ok(())
            }
            other => Err(Fault::NotAnObject { kind: other.kind(), key: key.to_string() }),
        }
    }

    /// Invokes this value with `this` as the receiver.
    pub fn call(&self, this: &Value, args: Vec<Value>) -> Result<Value> {
        match self {
            Self::Function(function) => function.call(this, args),
            Self::Stub(stub) => Ok(Self::Stub(stub.call(args))),
            other => Err(Fault::NotCallable(other.kind())),
        }
    }

    /// A detached copy suitable for handing to the other peer.
    ///
    /// Objects flatten into maps of their properties. Functions, deferreds and
    /// stubs cannot be cloned and become `Null`.
    pub fn snapshot(&self) -> Value {
        self.snapshot_at(0)
    }

    fn snapshot_at(&self, depth: usize) -> Value {
        if depth > MAX_NESTING_DEPTH {
            return Self::Null;
        }
        match self {
            Self::Array(items) => {
                Self::Array(items.iter().map(|v| v.snapshot_at(depth + 1)).collect())
            }
            Self::Map(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.snapshot_at(depth + 1)))
                    .collect(),
            ),
            Self::Object(object) => Self::Map(
                object
                    .entries()
                    .into_iter()
                    .map(|(k, v)| (k, v.snapshot_at(depth + 1)))
                    .collect(),
            ),
            Self::Function(_) | Self::Deferred(_) | Self::Stub(_) => Self::Null,
            primitive => primitive.clone(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => *a as f64 == *b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => a.key() == b.key(),
            (Self::Deferred(a), Self::Deferred(b)) => a.ptr_eq(b),
            (Self::Stub(a), Self::Stub(b)) => a.graph().ptr_eq(b.graph()) && a.id() == b.id(),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Bool(b) => write!(f, "Bool({})", b),
            Self::Int(i) => write!(f, "Int({})", i),
            Self::Float(x) => write!(f, "Float({})", x),
            Self::String(s) => write!(f, "String({:?})", s),
            Self::Array(items) => f.debug_list().entries(items).finish(),
            Self::Map(entries) => f.debug_map().entries(entries).finish(),
            Self::Object(object) => write!(f, "Object({} props)", object.len()),
            Self::Function(function) => write!(f, "Function(#{})", function.key().0),
            Self::Deferred(_) => write!(f, "Deferred"),
            Self::Stub(stub) => write!(f, "{:?}", stub),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Self::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Self::Map(entries)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Self::Object(o)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Self::Function(f)
    }
}

impl From<Deferred> for Value {
    fn from(d: Deferred) -> Self {
        Self::Deferred(d)
    }
}

impl From<Stub> for Value {
    fn from(s: Stub) -> Self {
        Self::Stub(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A shared, mutable property bag.
#[derive(Clone, Default)]
pub struct Object {
    props: Arc<DashMap<String, Value>>,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy when assembling an exposed API.
    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.props.get(key).map(|v| v.value().clone())
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.props.insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.props.remove(key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// All properties, sorted by key.
    pub fn entries(&self) -> Vec<(String, Value)> {
        let mut entries: Vec<_> = self
            .props
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.props, &other.props)
    }
}

/// Stable identity token of a function, shared by all of its clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionKey(pub u64);

static NEXT_FUNCTION_KEY: AtomicU64 = AtomicU64::new(1);

type Body = dyn Fn(&Value, Vec<Value>) -> Result<Value> + Send + Sync;

/// A callable value with a receiver, arguments and its own properties.
#[derive(Clone)]
pub struct Function {
    key: FunctionKey,
    body: Arc<Body>,
    props: Object,
}

impl Function {
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&Value, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Self::with_props(Object::new(), body)
    }

    /// Creates a function whose properties live in `props`.
    pub fn with_props<F>(props: Object, body: F) -> Self
    where
        F: Fn(&Value, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            key: FunctionKey(NEXT_FUNCTION_KEY.fetch_add(1, Ordering::Relaxed)),
            body: Arc::new(body),
            props,
        }
    }

    pub fn key(&self) -> FunctionKey {
        self.key
    }

    pub fn props(&self) -> &Object {
        &self.props
    }

    pub fn call(&self, this: &Value, args: Vec<Value>) -> Result<Value> {
        (self.body)(this, args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function(#{})", self.key.0)
    }
}

/// A value that will be available later; every clone observes the same outcome.
#[derive(Clone)]
pub struct Deferred(Shared<BoxFuture<'static, Result<Value>>>);

impl Deferred {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        Self(future.boxed().shared())
    }

    pub fn ready(value: Value) -> Self {
        Self::new(futures::future::ready(Ok(value)))
    }

    pub fn rejected(fault: Fault) -> Self {
        Self::new(futures::future::ready(Err(fault)))
    }

    /// Adopts `value` if it is already deferred, otherwise wraps it.
    pub fn settle(value: Value) -> Self {
        match value {
            Value::Deferred(deferred) => deferred,
            other => Self::ready(other),
        }
    }

    /// Waits for the outcome, flattening deferreds that settle to deferreds.
    pub async fn wait(&self) -> Result<Value> {
        let mut value = self.0.clone().await?;
        while let Value::Deferred(inner) = value {
            value = inner.0.clone().await?;
        }
        Ok(value)
    }

    pub fn ptr_eq(&self, other: &Deferred) -> bool {
        self.0.ptr_eq(&other.0)
    }
}
