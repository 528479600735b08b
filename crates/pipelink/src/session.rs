//! # Session
//!
//! One end of an RPC session: a [`Graph`] for the commands this peer issues,
//! an [`Executor`] for the commands it receives, and the port joining both to
//! the outside world.
//!
//! The port's register side subscribes to everything the session emits; its
//! send side is inbound delivery. Wiring the port to a transport in both
//! directions is all a session needs to talk to its peer.

use std::sync::Arc;

use tracing::debug;
use tracing::error;

use crate::command::Command;
use crate::command::Op;
use crate::config::SessionConfig;
use crate::duplex::Duplex;
use crate::duplex::Signal;
use crate::error::Error;
use crate::error::Result;
use crate::executor::Executor;
use crate::graph::Graph;
use crate::stub::Stub;
use crate::value::Value;

#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    output: Signal<Command>,
    graph: Graph,
    executor: Executor,
}

impl Session {
    /// Creates a session exposing `root_api` to the peer.
    pub fn new(root_api: impl Into<Value>) -> Self {
        Self::with_config(root_api, SessionConfig::default())
    }

    pub fn with_config(root_api: impl Into<Value>, config: SessionConfig) -> Self {
        let output = Signal::new();
        let graph = Graph::new(&config, output.clone());
        let executor = Executor::new(root_api.into(), &config, output.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                output,
                graph,
                executor,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn graph(&self) -> &Graph {
        &self.inner.graph
    }

    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    /// Everything the session emits, graph and executor alike.
    pub(crate) fn output(&self) -> &Signal<Command> {
        &self.inner.output
    }

    /// A stub for the peer's exposed root.
    pub fn root(&self) -> Stub {
        self.inner.graph.root()
    }

    /// The session's port: handlers receive outbound commands, values are delivered inbound.
    pub fn port(&self) -> Duplex<Command> {
        let output = self.inner.output.clone();
        let session = self.clone();
        Duplex::new(
            move |handler| {
                output.subscribe(handler);
                Ok(())
            },
            move |command| session.deliver(command),
        )
    }

    /// Dispatches one inbound command.
    ///
    /// Replies (`event`, `load`) go to the graph, everything else to the
    /// executor. Errors are returned untouched; the caller decides the session
    /// is dead.
    pub fn deliver(&self, command: Command) -> Result<()> {
        let peer = self.inner.config.peer_name();
        debug!(
            peer = %peer,
            id = ?command.id,
            target = ?command.target,
            kind = command.kind(),
            "receive"
        );

        let result = match command.op {
            Op::Event { value } => {
                let target = reply_target(command.target, "event")?;
                self.inner.graph.event(target, &value)
            }
            Op::Load { value } => {
                let target = reply_target(command.target, "load")?;
                self.inner.graph.load(target, value)
            }
            _ => self.inner.executor.execute(&command),
        };

        if let Err(e) = &result {
            error!(peer = %peer, error = %e, "inbound command failed");
        }
        result
    }

    /// Marks the session dead: every waiting `resolve` fails with `error`, and
    /// so does every later one.
    pub fn sever(&self, error: Error) {
        debug!(peer = %self.inner.config.peer_name(), error = %error, "session severed");
        self.inner.graph.fail(error);
    }
}

fn reply_target(target: Option<u64>, kind: &str) -> Result<u64> {
    target.ok_or_else(|| Error::Malformed(format!("'{}' without a target", kind)))
}

/// Creates a session over `root_api` and returns its port and the peer's root stub.
pub fn create_session(root_api: impl Into<Value>) -> (Duplex<Command>, Stub) {
    let session = Session::new(root_api);
    (session.port(), session.root())
}
