//! # Transport Abstraction
//!
//! The boundary to whatever actually carries commands between peers.
//!
//! ## Philosophy
//!
//! - **Verbatim**: A transport moves whole [`Command`] records, in order,
//!   without loss or duplication. It never inspects them.
//! - **Non-blocking send**: `send` queues and returns; issuing a command must
//!   never wait on the network.
//! - **Fatal failures**: There is no retry layer. When the inbound stream ends
//!   or errors, the session on top of it is dead.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::runtime::Handle;
use tracing::debug;
use tracing::error;

use crate::command::Command;
use crate::duplex::Duplex;
use crate::duplex::Handler;
use crate::session::Session;

/// Errors that occur at the transport layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A channel that carries commands to the peer and yields the peer's commands.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Queues `command` for the peer.
    fn send(&self, command: Command) -> Result<()>;

    /// Waits for the next inbound command; `None` once the peer has gone away.
    async fn recv(&self) -> Result<Option<Command>>;
}

type OnClose = Arc<dyn Fn(crate::Error) + Send + Sync>;

/// Bridges `transport` into a port.
///
/// Sending writes to the transport. Registering a handler spawns the pump
/// that feeds it inbound commands; a transport has one reader, so only one
/// handler may register.
pub fn duplex(transport: Arc<dyn Transport>) -> Duplex<Command> {
    duplex_with(transport, Arc::new(|_: crate::Error| {}))
}

/// Like [`duplex`], calling `on_close` with the reason when the pump stops.
pub fn duplex_with(transport: Arc<dyn Transport>, on_close: OnClose) -> Duplex<Command> {
    let reader = transport.clone();
    let pumping = Arc::new(AtomicBool::new(false));

    Duplex::new(
        move |handler| {
            if pumping.swap(true, Ordering::AcqRel) {
                return Err(crate::Error::AlreadySubscribed);
            }
            let handle = Handle::try_current().map_err(|_| crate::Error::NoRuntime)?;
            handle.spawn(pump(reader.clone(), handler, on_close.clone()));
            Ok(())
        },
        move |command| transport.send(command).map_err(crate::Error::from),
    )
}

/// Reads the transport until it ends, handing each command to `handler`.
async fn pump(transport: Arc<dyn Transport>, handler: Handler<Command>, on_close: OnClose) {
    let reason = loop {
        match transport.recv().await {
            Ok(Some(command)) => {
                if let Err(e) = handler(command) {
                    error!(error = %e, "error handling command in pump");
                    break e;
                }
            }
            Ok(None) => {
                debug!("transport stream closed");
                break crate::Error::Transport(Error::ConnectionLost("Stream closed".into()));
            }
            Err(e) => {
                error!(error = %e, "transport error in pump");
                break crate::Error::Transport(e);
            }
        }
    };

    on_close(reason);
}

/// Wires `session` to `transport` in both directions.
///
/// When the pump stops, the session is severed so no `resolve` waits forever,
/// and it lets go of the transport, so the peer sees the stream end as well.
pub fn connect(session: &Session, transport: Arc<dyn Transport>) -> crate::Result<()> {
    let writer = transport.clone();
    let token = session.output().subscribe(Arc::new(move |command: Command| {
        writer.send(command).map_err(crate::Error::from)
    }));

    let severed = session.clone();
    let link = duplex_with(
        transport,
        Arc::new(move |reason: crate::Error| {
            severed.output().unsubscribe(token);
            severed.sever(reason);
        }),
    );
    link.pipe(&session.port())?;
    Ok(())
}
