//! # Driver Loop
//!
//! Runs application logic against a remote peer as a sequence of steps. Every
//! remote operation between two steps is pipelined; a step that yields a stub
//! is the only place the driver waits, for exactly one fetch/load roundtrip.
//!
//! Two shapes are offered: [`Program`], an explicit state machine fed the
//! resolved value of its previous yield, and [`rpc_fn`], plain async code in
//! which each `stub.resolve().await` is a step.

use std::future::Future;

use tracing::debug;

use crate::command::Op;
use crate::config::SessionConfig;
use crate::error::Error;
use crate::error::Result;
use crate::session::Session;
use crate::stub::Stub;
use crate::value::Value;

/// What a program produced when resumed.
#[derive(Debug)]
pub enum Step {
    /// Wants this value back, resolved if it is a stub, on the next resume.
    Yield(Value),
    /// Finished; the value is resolved the same way and returned from the run.
    Done(Value),
}

/// Application logic written as a resumable state machine.
pub trait Program: Send {
    /// Advances the program. The first call receives `Null`.
    fn resume(&mut self, input: Value) -> Result<Step>;
}

impl<F> Program for F
where
    F: FnMut(Value) -> Result<Step> + Send,
{
    fn resume(&mut self, input: Value) -> Result<Step> {
        self(input)
    }
}

/// Forces `stub` to its concrete remote value.
///
/// Every call is its own roundtrip; nothing is cached.
pub async fn resolve(stub: &Stub) -> Result<Value> {
    let graph = stub.graph();
    if let Some(fault) = graph.fault() {
        return Err(fault);
    }
    if stub.is_stale() {
        return Err(Error::Disposed);
    }

    let rx = graph.await_load(stub.id());
    graph.command(Op::Fetch, Some(stub.id()))?;
    // Severed after the check above but before the continuation was queued
    if let Some(fault) = graph.fault() {
        return Err(fault);
    }
    rx.await.map_err(|_| Error::ChannelClosed)?
}

/// Ends the session `stub` belongs to, locally and on the peer.
pub fn dispose(stub: &Stub) {
    let graph = stub.graph();
    debug!(peer = %graph.name(), "disposing session");
    graph.reset();
    let _ = graph.command(Op::Dispose, Some(stub.id()));
}

/// Drives `program` against `root` until it is done, then disposes the session.
pub async fn drive<P: Program>(root: Stub, mut program: P) -> Result<Value> {
    let mut input = Value::Null;
    loop {
        let (value, done) = match program.resume(input)? {
            Step::Yield(value) => (value, false),
            Step::Done(value) => (value, true),
        };

        let value = match value {
            Value::Stub(stub) => stub.resolve().await?,
            value => value,
        };

        if done {
            root.dispose();
            return Ok(value);
        }
        input = value;
    }
}

/// Creates a session exposing `root_api` and prepares `make(root)` to be driven.
///
/// Wire `session.port()` to a transport before awaiting the returned future.
pub fn rpc<M, P>(
    root_api: impl Into<Value>,
    make: M,
) -> (Session, impl Future<Output = Result<Value>> + Send)
where
    M: FnOnce(Stub) -> P,
    P: Program,
{
    rpc_with(root_api, SessionConfig::default(), make)
}

pub fn rpc_with<M, P>(
    root_api: impl Into<Value>,
    config: SessionConfig,
    make: M,
) -> (Session, impl Future<Output = Result<Value>> + Send)
where
    M: FnOnce(Stub) -> P,
    P: Program,
{
    let session = Session::with_config(root_api, config);
    let root = session.root();
    let program = make(root.clone());
    (session, drive(root, program))
}

/// Like [`rpc`], with the application logic as async code.
pub fn rpc_fn<F, Fut>(
    root_api: impl Into<Value>,
    f: F,
) -> (Session, impl Future<Output = Result<Value>>)
where
    F: FnOnce(Stub) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let session = Session::new(root_api);
    let root = session.root();
    let work = f(root.clone());
    let run = async move {
        let outcome = work.await;
        root.dispose();
        outcome
    };
    (session, run)
}
