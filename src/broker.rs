//! Callback Broker (spec.md §4.5): tracks one-shot predicate callbacks
//! from suspended handlers and delivers the first matching message.
//!
//! Runs as its own task, driven by an `mpsc` command channel, so that
//! `register`/`deliver`/`cancel` are serialized the same way every
//! other piece of shared state in this crate is (spec.md §5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ircbot_wire::Message;
use tokio::sync::{mpsc, oneshot};

use crate::pattern::{Pattern, DEFAULT_CHARCLASS};

type Payload = (Message, HashMap<String, String>);

struct PendingCallback {
    requester_id: u64,
    pattern: Pattern,
    chan: Option<String>,
    nick: Option<String>,
    reply_sink: oneshot::Sender<Option<Payload>>,
}

enum BrokerCmd {
    Register(PendingCallback),
    Deliver(Box<Message>),
    Cancel(u64),
}

/// Cloneable handle to the Callback Broker task.
#[derive(Clone)]
pub struct BrokerHandle {
    tx: mpsc::Sender<BrokerCmd>,
    next_id: std::sync::Arc<AtomicU64>,
}

impl BrokerHandle {
    /// Suspend until a future PRIVMSG satisfies `pattern` (and the
    /// `chan`/`nick` filters, `None` meaning "any"), or `timeout`
    /// elapses. Predicate construction follows spec.md §4.5.
    pub async fn await_resp(
        &self,
        pattern: &str,
        chan: Option<&str>,
        nick: Option<&str>,
        timeout: Duration,
        capture_charclass: &str,
    ) -> Option<Payload> {
        let compiled = if has_placeholder(pattern) {
            Pattern::template(pattern, capture_charclass).ok()?
        } else {
            Pattern::literal(pattern)
        };

        let requester_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_sink, reply_rx) = oneshot::channel();
        let pending = PendingCallback {
            requester_id,
            pattern: compiled,
            chan: chan.map(str::to_owned),
            nick: nick.map(str::to_owned),
            reply_sink,
        };
        if self.tx.send(BrokerCmd::Register(pending)).await.is_err() {
            return None;
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(_)) => None,
            Err(_elapsed) => {
                let _ = self.tx.send(BrokerCmd::Cancel(requester_id)).await;
                None
            }
        }
    }

    /// Feed an inbound PRIVMSG to every pending predicate, in
    /// registration order (spec.md §4.5 `Deliver`).
    pub async fn deliver(&self, msg: Message) {
        let _ = self.tx.send(BrokerCmd::Deliver(Box::new(msg))).await;
    }
}

fn has_placeholder(pattern: &str) -> bool {
    pattern
        .split_whitespace()
        .any(|tok| tok.starts_with(':') || tok.starts_with('~'))
}

struct BrokerActor {
    pending: Vec<PendingCallback>,
}

impl BrokerActor {
    fn register(&mut self, cb: PendingCallback) {
        self.pending.push(cb);
    }

    fn deliver(&mut self, msg: Message) {
        let hit_idx = self.pending.iter().position(|cb| predicate_matches(cb, &msg));
        if let Some(idx) = hit_idx {
            let cb = self.pending.remove(idx);
            let captures = cb.pattern.matches(&msg.trailing).unwrap_or_default();
            let _ = cb.reply_sink.send(Some((msg, captures)));
        }
    }

    fn cancel(&mut self, requester_id: u64) {
        self.pending.retain(|cb| cb.requester_id != requester_id);
    }

    async fn run(mut self, mut rx: mpsc::Receiver<BrokerCmd>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                BrokerCmd::Register(cb) => self.register(cb),
                BrokerCmd::Deliver(msg) => self.deliver(*msg),
                BrokerCmd::Cancel(id) => self.cancel(id),
            }
        }
    }
}

fn predicate_matches(cb: &PendingCallback, msg: &Message) -> bool {
    if msg.command != "PRIVMSG" {
        return false;
    }
    if let Some(want_chan) = &cb.chan {
        if msg.args.first() != Some(want_chan) {
            return false;
        }
    }
    if let Some(want_nick) = &cb.nick {
        if msg.source_nick() != want_nick {
            return false;
        }
    }
    cb.pattern.matches(&msg.trailing).is_some()
}

/// Spawn the Callback Broker task and return a handle to it.
pub fn spawn() -> BrokerHandle {
    let (tx, rx) = mpsc::channel(256);
    let actor = BrokerActor { pending: Vec::new() };
    tokio::spawn(actor.run(rx));
    BrokerHandle {
        tx,
        next_id: std::sync::Arc::new(AtomicU64::new(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn privmsg(chan: &str, nick: &str, text: &str) -> Message {
        let mut m = Message::new("PRIVMSG").with_args([chan]).with_trailing(text);
        m.user = Some(ircbot_wire::Prefix {
            nick: nick.to_owned(),
            name: "u".into(),
            rdns: "h".into(),
        });
        m
    }

    #[tokio::test]
    async fn delivers_on_literal_match() {
        let broker = spawn();
        let b2 = broker.clone();
        let waiter = tokio::spawn(async move {
            b2.await_resp("go", Some("#c"), Some("alice"), Duration::from_secs(1), DEFAULT_CHARCLASS)
                .await
        });
        tokio::task::yield_now().await;
        broker.deliver(privmsg("#c", "alice", "go")).await;
        let result = waiter.await.unwrap();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn await_resp_timeout_resumes_with_none() {
        let broker = spawn();
        let result = broker
            .await_resp("go", Some("#c"), Some("alice"), Duration::from_millis(50), DEFAULT_CHARCLASS)
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn when_trigger_scenario_resolves_captures() {
        let broker = spawn();
        let b2 = broker.clone();
        let waiter = tokio::spawn(async move {
            b2.await_resp("hi", None, Some("alice"), Duration::from_secs(1), DEFAULT_CHARCLASS)
                .await
        });
        tokio::task::yield_now().await;
        broker.deliver(privmsg("#c", "alice", "hi")).await;
        let (msg, _captures) = waiter.await.unwrap().unwrap();
        assert_eq!(msg.trailing, "hi");
    }

    #[tokio::test]
    async fn non_matching_predicate_stays_pending() {
        let broker = spawn();
        let b2 = broker.clone();
        let waiter = tokio::spawn(async move {
            b2.await_resp("go", Some("#c"), Some("alice"), Duration::from_millis(200), DEFAULT_CHARCLASS)
                .await
        });
        tokio::task::yield_now().await;
        broker.deliver(privmsg("#c", "bob", "go")).await;
        broker.deliver(privmsg("#other", "alice", "go")).await;
        broker.deliver(privmsg("#c", "alice", "not-it")).await;
        let result = waiter.await.unwrap();
        assert!(result.is_none());
        broker.deliver(privmsg("#c", "alice", "go")).await;
    }
}
