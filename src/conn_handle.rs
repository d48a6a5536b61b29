//! A small, cheaply-cloneable handle onto the Connection Manager's
//! outbound queue and current nick, handed out to every `Context`.
//!
//! Kept separate from the Connection Manager itself (`connection.rs`)
//! so that handler units only ever see the narrow "send a message / ask
//! my current nick" surface, never the socket or reconnect state.

use ircbot_wire::Message;
use tokio::sync::{mpsc, oneshot, watch};

/// One queued outbound message plus the one-shot the writer task
/// fulfills once `write_message` for it has returned, so `send` can
/// wait for the write rather than just for queue space.
pub(crate) type OutboundItem = (Message, oneshot::Sender<()>);

#[derive(Clone)]
pub struct ConnHandle {
    outbound: mpsc::Sender<OutboundItem>,
    nick: watch::Receiver<String>,
}

impl ConnHandle {
    pub(crate) fn new(outbound: mpsc::Sender<OutboundItem>, nick: watch::Receiver<String>) -> Self {
        ConnHandle { outbound, nick }
    }

    /// Send a message to the server. Per spec.md §4.2, outbound send is
    /// synchronous: this returns only after the Connection Manager's
    /// writer task has completed the write to the socket (or given up
    /// on it, e.g. because the connection dropped), preserving ordering
    /// and back-pressure for anything the caller does afterward. The
    /// manager is the only thing that ever touches the socket, per
    /// spec.md §5.
    pub async fn send(&self, msg: Message) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.outbound.send((msg, ack_tx)).await.is_err() {
            return;
        }
        let _ = ack_rx.await;
    }

    /// Current nick, as a fresh owned snapshot (the nick can change
    /// concurrently on a successful `NICK`, so there is no stable `&str`
    /// to hand back).
    pub fn current_nick(&self) -> String {
        self.nick.borrow().clone()
    }
}
