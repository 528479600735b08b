//! # Executor
//!
//! Applies the peer's commands to the real exposed object graph.
//!
//! The context maps the peer's node ids to the values its commands produced;
//! id 0 is the exposed root. Values are cloned out of the context before any
//! user function runs, so a function may re-enter the session freely.
//!
//! ## Invariants
//!
//! - Only this executor writes the context, and only by inserting new ids,
//!   except for `dispose`, which truncates it back to the root.
//! - A command naming an id with no value fails with `UnknownTarget`.
//! - A slot parked by a materialized callback is handed out once: the `get`
//!   that reads it also removes it, so a long-lived listener does not grow.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::DashSet;
use tokio::runtime::Handle;
use tracing::error;
use tracing::warn;

use crate::codec;
use crate::command::Command;
use crate::command::CommandId;
use crate::command::Op;
use crate::command::ROOT;
use crate::config::SessionConfig;
use crate::duplex::Signal;
use crate::error::Error;
use crate::error::Result;
use crate::value::Deferred;
use crate::value::Fault;
use crate::value::Function;
use crate::value::Object;
use crate::value::Value;

pub struct Executor {
    name: String,
    reserved_key: String,
    root: Value,
    context: DashMap<CommandId, Value>,
    callbacks: DashSet<CommandId>,
    output: Signal<Command>,
}

impl Executor {
    pub(crate) fn new(root: Value, config: &SessionConfig, output: Signal<Command>) -> Self {
        let context = DashMap::new();
        context.insert(ROOT, root.clone());
        Self {
            name: config.peer_name().to_string(),
            reserved_key: config.awaiting_key().to_string(),
            root,
            context,
            callbacks: DashSet::new(),
            output,
        }
    }

    /// The value produced for `id`.
    pub fn lookup(&self, id: CommandId) -> Result<Value> {
        self.context
            .get(&id)
            .map(|v| v.value().clone())
            .ok_or(Error::UnknownTarget(id))
    }

    /// Number of ids with a value, the root included.
    pub fn len(&self) -> usize {
        self.context.len()
    }

    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
    }

    /// Applies one inbound command.
    pub fn execute(&self, command: &Command) -> Result<()> {
        match &command.op {
            Op::Get { key } => self.get(node(command)?, target(command)?, key),
            Op::Set { key, value, refs } => {
                self.set(node(command)?, target(command)?, key, value, refs)
            }
            Op::Apply { receiver, args, refs } => {
                self.apply(node(command)?, target(command)?, *receiver, args, refs)
            }
            Op::Callback => {
                self.callback(node(command)?);
                Ok(())
            }
            Op::Fetch => self.fetch(target(command)?),
            Op::Dispose => {
                self.dispose();
                Ok(())
            }
            Op::Root => Ok(()),
            Op::Event { .. } | Op::Load { .. } => Err(Error::Malformed(format!(
                "'{}' is answered by the graph, not the executor",
                command.kind()
            ))),
        }
    }

    fn get(&self, id: CommandId, target: CommandId, key: &str) -> Result<()> {
        let value = self.lookup(target)?;
        let result = if key == self.reserved_key {
            continuation(Deferred::settle(value))
        } else if self.callbacks.contains(&target) {
            value
                .as_function()
                .and_then(|f| f.props().remove(key))
                .unwrap_or_default()
        } else {
            value.get_property(key)?
        };
        self.context.insert(id, result);
        Ok(())
    }

    // The assigned value is filed under the set command's own id.
    fn set(
        &self,
        id: CommandId,
        target: CommandId,
        key: &str,
        value: &Value,
        refs: &[String],
    ) -> Result<()> {
        let value = codec::reref(value.clone(), refs, |id| self.lookup(id))?;
        {
            let mut slot = self.context.get_mut(&target).ok_or(Error::UnknownTarget(target))?;
            slot.value_mut().set_property(key, value.clone())?;
        }
        self.context.insert(id, value);
        Ok(())
    }

    fn apply(
        &self,
        id: CommandId,
        target: CommandId,
        receiver: Option<CommandId>,
        args: &[Value],
        refs: &[String],
    ) -> Result<()> {
        let function = self.lookup(target)?;
        let this = match receiver {
            Some(receiver) => self.lookup(receiver)?,
            None => Value::Null,
        };
        let args = Value::Array(args.to_vec());
        let args = match codec::reref(args, refs, |id| self.lookup(id))? {
            Value::Array(items) => items,
            other => vec![other],
        };

        let result = function.call(&this, args)?;
        self.context.insert(id, result);
        Ok(())
    }

    /// Stands in for a function the peer passed us.
    ///
    /// Calling it parks each argument in a fresh slot on the function itself
    /// and tells the peer which slots to read.
    fn callback(&self, id: CommandId) {
        let slots = Object::new();
        let parked = slots.clone();
        let counter = Arc::new(AtomicU64::new(0));
        let output = self.output.clone();

        let function = Function::with_props(slots, move |_, args| {
            let value = args
                .into_iter()
                .map(|arg| {
                    let slot = counter.fetch_add(1, Ordering::Relaxed);
                    parked.set(slot.to_string(), arg);
                    slot
                })
                .collect();
            output
                .emit(Command::event(id, value))
                .map_err(|e| Fault::Thrown(e.to_string()))?;
            Ok(Value::Null)
        });

        self.callbacks.insert(id);
        self.context.insert(id, Value::Function(function));
    }

    fn fetch(&self, target: CommandId) -> Result<()> {
        match self.lookup(target)? {
            Value::Deferred(deferred) => {
                let handle = Handle::try_current().map_err(|_| Error::NoRuntime)?;
                let output = self.output.clone();
                let peer = self.name.clone();
                handle.spawn(async move {
                    let value = match deferred.wait().await {
                        Ok(value) => value.snapshot(),
                        Err(fault) => {
                            warn!(peer = %peer, target, %fault, "deferred value failed");
                            Value::Null
                        }
                    };
                    if let Err(e) = output.emit(Command::load(target, value)) {
                        error!(peer = %peer, target, error = %e, "failed to deliver load");
                    }
                });
                Ok(())
            }
            value => self.output.emit(Command::load(target, value.snapshot())),
        }
    }

    fn dispose(&self) {
        self.callbacks.clear();
        self.context.retain(|id, _| *id == ROOT);
        self.context.insert(ROOT, self.root.clone());
    }
}

/// The continuation-registration method bound to a deferred value.
///
/// Called as `(on_resolve, on_reject?)`; returns a deferred of whichever
/// handler ran.
fn continuation(deferred: Deferred) -> Value {
    Value::Function(Function::new(move |_, args| {
        let mut args = args.into_iter();
        let on_resolve = args.next().unwrap_or_default();
        let on_reject = args.next().unwrap_or_default();

        let handle =
            Handle::try_current().map_err(|_| Fault::Thrown(Error::NoRuntime.to_string()))?;
        let deferred = deferred.clone();
        let task = handle.spawn(async move {
            match deferred.wait().await {
                Ok(value) if on_resolve.is_null() => Ok(value),
                Ok(value) => on_resolve.call(&Value::Null, vec![value]),
                Err(fault) if on_reject.is_null() => Err(fault),
                Err(fault) => on_reject.call(&Value::Null, vec![Value::String(fault.to_string())]),
            }
        });

        Ok(Value::Deferred(Deferred::new(async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(Fault::Thrown(e.to_string())),
            }
        })))
    }))
}

fn node(command: &Command) -> Result<CommandId> {
    command
        .id
        .ok_or_else(|| Error::Malformed(format!("'{}' without an id", command.kind())))
}

fn target(command: &Command) -> Result<CommandId> {
    command
        .target
        .ok_or_else(|| Error::Malformed(format!("'{}' without a target", command.kind())))
}
