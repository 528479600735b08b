//! # Commands
//!
//! The records two peers exchange. Every record names the operation (`kind`),
//! the node it operates on (`target`) and, for operations that produce a
//! value, the id the result is filed under.
//!
//! The tag strings and field names are the protocol; `receiver` travels as
//! `self` on the wire.

use crate::value::Value;

/// Index of a node in a Graph's id space.
pub type CommandId = u64;

/// Id of the root node: the exposed object on the executing side.
pub const ROOT: CommandId = 0;

/// Operation-specific payload of a [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Root,
    Get {
        key: String,
    },
    Set {
        key: String,
        value: Value,
        refs: Vec<String>,
    },
    Apply {
        receiver: Option<CommandId>,
        args: Vec<Value>,
        refs: Vec<String>,
    },
    Callback,
    /// Slot numbers under which a materialized callback parked its arguments.
    Event {
        value: Vec<u64>,
    },
    Fetch,
    Load {
        value: Value,
    },
    Dispose,
}

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Absent for `event` and `load`, which are replies rather than graph nodes.
    pub id: Option<CommandId>,
    /// Absent for `root` and `callback`.
    pub target: Option<CommandId>,
    pub op: Op,
}

impl Command {
    pub fn new(id: CommandId, target: Option<CommandId>, op: Op) -> Self {
        Self { id: Some(id), target, op }
    }

    pub fn event(target: CommandId, slots: Vec<u64>) -> Self {
        Self { id: None, target: Some(target), op: Op::Event { value: slots } }
    }

    pub fn load(target: CommandId, value: Value) -> Self {
        Self { id: None, target: Some(target), op: Op::Load { value } }
    }

    /// The protocol's type tag.
    pub fn kind(&self) -> &'static str {
        match self.op {
            Op::Root => "root",
            Op::Get { .. } => "get",
            Op::Set { .. } => "set",
            Op::Apply { .. } => "apply",
            Op::Callback => "callback",
            Op::Event { .. } => "event",
            Op::Fetch => "fetch",
            Op::Load { .. } => "load",
            Op::Dispose => "dispose",
        }
    }
}
