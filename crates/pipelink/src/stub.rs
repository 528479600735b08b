//! # Remote References
//!
//! A [`Stub`] is a handle on the result of a remote operation that may not
//! have run yet. Reading, writing or invoking through it allocates a new node,
//! transmits the command and returns a new stub straight away, so arbitrarily
//! long chains go out before a single roundtrip completes.

use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::warn;

use crate::codec;
use crate::command::CommandId;
use crate::command::Op;
use crate::command::ROOT;
use crate::driver;
use crate::error::Result;
use crate::graph::Graph;
use crate::value::Value;

/// The `get` a stub came from: the receiver for a method call on it.
#[derive(Clone)]
struct Origin {
    target: CommandId,
    key: Arc<str>,
}

#[derive(Clone)]
pub struct Stub {
    graph: Graph,
    id: CommandId,
    epoch: u64,
    origin: Option<Origin>,
}

impl Stub {
    pub(crate) fn bind(graph: Graph, id: CommandId, origin: Option<(CommandId, Arc<str>)>) -> Self {
        let epoch = graph.epoch();
        Self {
            graph,
            id,
            epoch,
            origin: origin.map(|(target, key)| Origin { target, key }),
        }
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// True once the owning session has been disposed; the root never goes stale.
    pub fn is_stale(&self) -> bool {
        self.id != ROOT && self.epoch != self.graph.epoch()
    }

    fn check(&self, kind: &str) {
        if self.is_stale() {
            warn!(peer = %self.graph.name(), id = self.id, kind, "operating on a disposed stub");
        }
    }

    /// Reads `key` on the remote value.
    pub fn get(&self, key: impl Into<String>) -> Stub {
        self.check("get");
        self.graph.issue(Op::Get { key: key.into() }, Some(self.id))
    }

    /// Property read as a forwarding handle sees it.
    ///
    /// Returns `None` for the reserved key on a stub produced by invoking a
    /// reserved-key `get`, so that result is never taken for an awaitable.
    pub fn read(&self, key: impl Into<String>) -> Option<Stub> {
        let key = key.into();
        if key == self.graph.reserved_key() && self.graph.is_wrapper(self.id) {
            return None;
        }
        Some(self.get(key))
    }

    /// Assigns `key` on the remote value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Stub {
        self.check("set");
        let mut refs = Vec::new();
        let value = codec::deref(&value.into(), &self.graph, &mut refs);
        self.graph.issue(Op::Set { key: key.into(), value, refs }, Some(self.id))
    }

    /// Invokes the remote value.
    ///
    /// When this stub came from a `get`, the object it was read from is the
    /// receiver.
    pub fn call<I>(&self, args: I) -> Stub
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.check("apply");
        let args = Value::Array(args.into_iter().map(Into::into).collect());
        let mut refs = Vec::new();
        let args = match codec::deref(&args, &self.graph, &mut refs) {
            Value::Array(items) => items,
            other => vec![other],
        };

        let receiver = self.origin.as_ref().map(|o| o.target);
        let stub = self.graph.issue(Op::Apply { receiver, args, refs }, Some(self.id));

        let reserved = self
            .origin
            .as_ref()
            .is_some_and(|o| &*o.key == self.graph.reserved_key());
        if reserved {
            self.graph.mark_wrapper(stub.id);
        }
        stub
    }

    /// Registers `on_resolve` with the remote value's continuation method.
    ///
    /// `None` when this stub is itself such a registration.
    pub fn then(&self, on_resolve: impl Into<Value>) -> Option<Stub> {
        let key = self.graph.reserved_key().to_string();
        Some(self.read(key)?.call([on_resolve.into()]))
    }

    /// Fetches the concrete remote value.
    pub async fn resolve(&self) -> Result<Value> {
        driver::resolve(self).await
    }

    /// Ends the session this stub belongs to.
    pub fn dispose(&self) {
        driver::dispose(self)
    }
}

impl fmt::Debug for Stub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stub")
            .field("peer", &self.graph.name())
            .field("id", &self.id)
            .finish()
    }
}

impl IntoFuture for Stub {
    type Output = Result<Value>;
    type IntoFuture = BoxFuture<'static, Result<Value>>;

    fn into_future(self) -> Self::IntoFuture {
        async move { self.resolve().await }.boxed()
    }
}
