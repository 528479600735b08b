//! # pipelink
//!
//! Drive an object graph living in another context over any duplex message
//! channel, without waiting on each remote step.
//!
//! ## Architecture
//!
//! Operations on a [`Stub`] are recorded as [`Command`]s in the session's
//! [`Graph`] and sent at once; the peer's [`Executor`] replays them against
//! the real objects. Function arguments travel as callback ids and are called
//! back through `event` commands. Only [`Stub::resolve`] waits, for one
//! fetch/load roundtrip.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pipelink::{args, ChannelTransport, Function, Object, Session, Value};
//!
//! # async fn demo() -> pipelink::Result<()> {
//! let api = Object::new().with("add", Function::new(|_, args| {
//!     let sum = args.iter().filter_map(Value::as_int).sum::<i64>();
//!     Ok(Value::Int(sum))
//! }));
//!
//! let (left, right) = ChannelTransport::pair();
//! let server = Session::new(api);
//! let client = Session::new(Value::Null);
//! pipelink::connect(&server, Arc::new(left))?;
//! pipelink::connect(&client, Arc::new(right))?;
//!
//! let sum = client.root().get("add").call(args![2, 3]);
//! assert_eq!(sum.resolve().await?, Value::Int(5));
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod codec;
pub mod command;
pub mod config;
pub mod driver;
pub mod duplex;
pub mod error;
pub mod executor;
pub mod graph;
pub mod session;
pub mod stub;
pub mod transport;
pub mod value;

pub use channel::ChannelTransport;
pub use codec::{deref, reref};
pub use command::{Command, CommandId, Op, ROOT};
pub use config::SessionConfig;
pub use driver::{Program, Step, dispose, drive, resolve, rpc, rpc_fn, rpc_with};
pub use duplex::{Duplex, Handler, Input, Signal};
pub use error::{Error, Result};
pub use executor::Executor;
pub use graph::Graph;
pub use session::{Session, create_session};
pub use stub::Stub;
pub use transport::{Transport, connect};
pub use value::{Deferred, Fault, Function, FunctionKey, Object, Value};

/// Builds an argument list, converting each expression into a [`Value`].
#[macro_export]
macro_rules! args {
    ($($arg:expr),* $(,)?) => {{
        let args: ::std::vec::Vec<$crate::Value> = vec![$($crate::Value::from($arg)),*];
        args
    }};
}
