//! Peers in one process, joined by tokio channels.
//!
//! Two sessions on separate tasks, such as a page script and an embedded
//! frame, or the two sides of a test, can talk without any byte encoding:
//! commands are moved across whole.

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::command::Command;
use crate::transport;
use crate::transport::Transport;

/// One end of an in-process link. Obtain both ends from [`ChannelTransport::pair`].
///
/// Dropping an end hangs up: the other end's `recv` yields `None` once it has
/// drained what was already sent, and its `send` fails.
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<Command>,
    inbound: Mutex<mpsc::UnboundedReceiver<Command>>,
}

impl ChannelTransport {
    /// Two ends, each receiving what the other sends.
    pub fn pair() -> (Self, Self) {
        let (to_right, from_left) = mpsc::unbounded_channel();
        let (to_left, from_right) = mpsc::unbounded_channel();
        let left = Self {
            outbound: to_right,
            inbound: Mutex::new(from_right),
        };
        let right = Self {
            outbound: to_left,
            inbound: Mutex::new(from_left),
        };
        (left, right)
    }

    /// True once the other end has been dropped.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    fn send(&self, command: Command) -> transport::Result<()> {
        self.outbound
            .send(command)
            .map_err(|rejected| {
                transport::Error::ConnectionLost(format!(
                    "peer hung up before '{}' was sent",
                    rejected.0.kind()
                ))
            })
    }

    async fn recv(&self) -> transport::Result<Option<Command>> {
        Ok(self.inbound.lock().await.recv().await)
    }
}
