//! # Command Graph
//!
//! The issuing side's half of a session: it allocates node ids, transmits
//! every command it creates, and keeps the bookkeeping needed to answer what
//! comes back.
//!
//! ## State
//!
//! - `pending`: fetch continuations, FIFO per id, completed by `load`.
//! - `callbacks`: local functions handed out as arguments, by callback id.
//! - `registry`: function identity to callback id. It holds keys only, so a
//!   function nothing else references is not kept alive by it.
//! - `wrappers`: ids produced by invoking a reserved-key `get`.
//!
//! Ids are allocated from a counter that disposal does not reset; disposal
//! advances the epoch instead.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::DashSet;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::command::Command;
use crate::command::CommandId;
use crate::command::Op;
use crate::command::ROOT;
use crate::config::SessionConfig;
use crate::duplex::Signal;
use crate::error::Error;
use crate::error::Result;
use crate::stub::Stub;
use crate::value::Function;
use crate::value::FunctionKey;
use crate::value::Value;

type Continuation = oneshot::Sender<Result<Value>>;

#[derive(Clone)]
pub struct Graph {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    reserved_key: String,
    next_id: AtomicU64,
    epoch: AtomicU64,
    output: Signal<Command>,
    pending: DashMap<CommandId, VecDeque<Continuation>>,
    callbacks: DashMap<CommandId, Function>,
    registry: DashMap<FunctionKey, CommandId>,
    wrappers: DashSet<CommandId>,
    fault: OnceLock<Error>,
}

impl Graph {
    /// Creates a graph transmitting through `output`. Id 0 goes to the root.
    pub(crate) fn new(config: &SessionConfig, output: Signal<Command>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: config.peer_name().to_string(),
                reserved_key: config.awaiting_key().to_string(),
                next_id: AtomicU64::new(ROOT + 1),
                epoch: AtomicU64::new(0),
                output,
                pending: DashMap::new(),
                callbacks: DashMap::new(),
                registry: DashMap::new(),
                wrappers: DashSet::new(),
                fault: OnceLock::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn reserved_key(&self) -> &str {
        &self.inner.reserved_key
    }

    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::Acquire)
    }

    /// The next id that will be allocated.
    pub fn peek_id(&self) -> CommandId {
        self.inner.next_id.load(Ordering::Relaxed)
    }

    /// First transmit failure seen by this graph, if any.
    pub fn fault(&self) -> Option<Error> {
        self.inner.fault.get().cloned()
    }

    pub fn ptr_eq(&self, other: &Graph) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// A stub bound to the peer's root object.
    pub fn root(&self) -> Stub {
        Stub::bind(self.clone(), ROOT, None)
    }

    fn next_id(&self) -> CommandId {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends `command` to every subscriber of the graph's port.
    pub(crate) fn transmit(&self, command: Command) -> Result<()> {
        debug!(
            peer = %self.inner.name,
            id = ?command.id,
            target = ?command.target,
            kind = command.kind(),
            "emit"
        );
        let result = self.inner.output.emit(command);
        if let Err(e) = &result {
            error!(peer = %self.inner.name, error = %e, "transmit failed");
            let _ = self.inner.fault.set(e.clone());
        }
        result
    }

    /// Allocates an id for `op`, transmits it and returns the id.
    pub(crate) fn command(&self, op: Op, target: Option<CommandId>) -> Result<CommandId> {
        let id = self.next_id();
        self.transmit(Command::new(id, target, op))?;
        Ok(id)
    }

    /// Like [`Graph::command`], but hands back a stub bound to the new node.
    ///
    /// Never fails: a transmit error is kept as the graph's fault and reported
    /// by the next `resolve`.
    pub(crate) fn issue(&self, op: Op, target: Option<CommandId>) -> Stub {
        let key = match (&op, target) {
            (Op::Get { key }, Some(target)) => Some((target, Arc::<str>::from(key.as_str()))),
            _ => None,
        };
        let id = self.next_id();
        let _ = self.transmit(Command::new(id, target, op));
        Stub::bind(self.clone(), id, key)
    }

    /// Callback id for `function`, minting and transmitting one on first use.
    pub(crate) fn callback_id(&self, function: &Function) -> CommandId {
        if let Some(id) = self.inner.registry.get(&function.key()) {
            return *id;
        }

        let id = self.next_id();
        self.inner.callbacks.insert(id, function.clone());
        self.inner.registry.insert(function.key(), id);
        let _ = self.transmit(Command::new(id, None, Op::Callback));
        id
    }

    /// The local function registered under callback `id`.
    pub fn local_callback(&self, id: CommandId) -> Option<Function> {
        self.inner.callbacks.get(&id).map(|f| f.value().clone())
    }

    /// Drops the registration of `function`; its next use mints a new id.
    pub fn forget(&self, function: &Function) -> bool {
        match self.inner.registry.remove(&function.key()) {
            Some((_, id)) => {
                self.inner.callbacks.remove(&id);
                true
            }
            None => false,
        }
    }

    pub(crate) fn mark_wrapper(&self, id: CommandId) {
        self.inner.wrappers.insert(id);
    }

    pub fn is_wrapper(&self, id: CommandId) -> bool {
        self.inner.wrappers.contains(&id)
    }

    /// Queues a continuation for the next `load` of `id`.
    pub(crate) fn await_load(&self, id: CommandId) -> oneshot::Receiver<Result<Value>> {
        let (tx, rx) = oneshot::channel();
        self.inner.pending.entry(id).or_default().push_back(tx);
        rx
    }

    /// Number of fetches still waiting for their `load`.
    pub fn pending(&self) -> usize {
        self.inner.pending.iter().map(|e| e.value().len()).sum()
    }

    /// Completes the oldest continuation waiting on `target`.
    pub(crate) fn load(&self, target: CommandId, value: Value) -> Result<()> {
        let continuation = self
            .inner
            .pending
            .get_mut(&target)
            .and_then(|mut queue| queue.pop_front());
        self.inner.pending.remove_if(&target, |_, queue| queue.is_empty());

        match continuation {
            // Ignore if the caller stopped waiting
            Some(tx) => {
                let _ = tx.send(Ok(value));
            }
            None => warn!(peer = %self.inner.name, target, "load without a pending fetch"),
        }
        Ok(())
    }

    /// Runs the local function behind callback `target` on behalf of the peer.
    ///
    /// Each argument arrives as a stub reading the peer's parked slot.
    pub(crate) fn event(&self, target: CommandId, slots: &[u64]) -> Result<()> {
        let callback = self
            .local_callback(target)
            .ok_or(Error::UnknownCallback(target))?;

        let args = slots
            .iter()
            .map(|slot| Value::Stub(self.issue(Op::Get { key: slot.to_string() }, Some(target))))
            .collect();

        callback.call(&Value::Null, args)?;
        Ok(())
    }

    /// Latches `error` as the graph's fault and fails everything waiting.
    ///
    /// The first fault wins; later `resolve`s report it without transmitting.
    pub(crate) fn fail(&self, error: Error) {
        let _ = self.inner.fault.set(error.clone());
        self.fail_pending(error);
    }

    /// Fails every waiting continuation with `error`.
    pub(crate) fn fail_pending(&self, error: Error) {
        let keys: Vec<CommandId> = self.inner.pending.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, queue)) = self.inner.pending.remove(&key) {
                for tx in queue {
                    let _ = tx.send(Err(error.clone()));
                }
            }
        }
    }

    /// Discards all local session state and starts a new epoch.
    pub(crate) fn reset(&self) {
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        self.inner.callbacks.clear();
        self.inner.registry.clear();
        self.inner.wrappers.clear();
        self.fail_pending(Error::Disposed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> Graph {
        Graph::new(&SessionConfig::default(), Signal::new())
    }

    #[test]
    fn test_ids_start_after_root() {
        let g = graph();
        assert_eq!(g.root().id(), ROOT);
        assert_eq!(g.command(Op::Fetch, Some(ROOT)).unwrap(), 1);
        assert_eq!(g.command(Op::Fetch, Some(ROOT)).unwrap(), 2);
    }

    #[test]
    fn test_callback_registry_dedupes_and_forgets() {
        let g = graph();
        let f = Function::new(|_, _| Ok(Value::Null));

        let first = g.callback_id(&f);
        assert_eq!(g.callback_id(&f.clone()), first);
        assert!(g.local_callback(first).is_some());

        assert!(g.forget(&f));
        assert!(g.local_callback(first).is_none());
        assert_ne!(g.callback_id(&f), first);
    }

    #[test]
    fn test_load_completes_fifo() {
        let g = graph();
        let mut first = g.await_load(4);
        let mut second = g.await_load(4);

        g.load(4, Value::from(1)).unwrap();
        assert_eq!(first.try_recv().unwrap().unwrap(), Value::Int(1));
        assert!(second.try_recv().is_err());

        g.load(4, Value::from(2)).unwrap();
        assert_eq!(second.try_recv().unwrap().unwrap(), Value::Int(2));
        assert_eq!(g.pending(), 0);
    }

    #[test]
    fn test_fail_latches_first_fault() {
        let g = graph();
        let mut waiting = g.await_load(3);

        g.fail(Error::ChannelClosed);
        g.fail(Error::Disposed);

        assert!(matches!(waiting.try_recv().unwrap(), Err(Error::ChannelClosed)));
        assert!(matches!(g.fault(), Some(Error::ChannelClosed)));
        assert_eq!(g.pending(), 0);
    }

    #[test]
    fn test_reset_keeps_counter_and_fails_pending() {
        let g = graph();
        let _ = g.command(Op::Fetch, Some(ROOT));
        let mut waiting = g.await_load(1);
        let before = g.peek_id();

        g.reset();

        assert_eq!(g.peek_id(), before);
        assert_eq!(g.epoch(), 1);
        assert!(matches!(waiting.try_recv().unwrap(), Err(Error::Disposed)));
    }

    #[test]
    fn test_event_for_unknown_callback() {
        let g = graph();
        assert!(matches!(g.event(9, &[0]), Err(Error::UnknownCallback(9))));
    }
}
