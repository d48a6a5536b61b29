//! The `Context` record passed explicitly to every handler body.
//!
//! Design Notes (spec.md §9) flags macro-based reply primitives that
//! implicitly close over a lexically-bound `message` variable, and
//! calls for passing a `Context` record (message + connection handle +
//! unit name) explicitly to every handler instead. This is that record.

use std::collections::HashMap;

use ircbot_wire::Message;

use crate::broker::BrokerHandle;
use crate::channel_supervisor::ChannelSupervisor;
use crate::conn_handle::ConnHandle;
use std::sync::Arc;

/// Resolve the reply target for an inbound message, per spec.md §4.4
/// "Recipient resolution".
///
/// For PRIVMSG/NOTICE: if `args[0]` equals the bot's own nick, this was
/// a direct message and the real counterpart is the sender; otherwise
/// `args[0]` is the channel the message was addressed to. For JOIN, the
/// recipient is `trailing` (the channel).
pub fn resolve_target(msg: &Message, bot_nick: &str) -> Option<String> {
    match msg.command.as_str() {
        "PRIVMSG" | "NOTICE" => {
            let first = msg.args.first()?;
            if first == bot_nick {
                Some(msg.source_nick().to_owned())
            } else {
                Some(first.clone())
            }
        }
        "JOIN" => Some(msg.trailing.clone()),
        _ => msg.args.first().cloned(),
    }
}

/// True if `msg` was sent to a channel (as opposed to a direct message
/// to the bot).
pub fn is_channel_addressed(msg: &Message, bot_nick: &str) -> bool {
    match msg.command.as_str() {
        "PRIVMSG" | "NOTICE" => msg.args.first().is_some_and(|t| t != bot_nick),
        _ => false,
    }
}

/// Everything a handler body needs, passed explicitly rather than
/// captured by a macro.
#[derive(Clone)]
pub struct Context {
    pub message: Message,
    /// Named captures from the pattern that matched, if any.
    pub captures: HashMap<String, String>,
    pub unit_name: Arc<str>,
    pub conn: ConnHandle,
    pub channels: Arc<ChannelSupervisor>,
    pub broker: BrokerHandle,
}

impl Context {
    /// Send PRIVMSG to the originating channel if the message was
    /// channel-addressed, else back to the originating nick (spec.md
    /// §4.4 `reply`).
    pub async fn reply(&self, text: &str) {
        let nick = self.conn.current_nick();
        if let Some(target) = resolve_target(&self.message, &nick) {
            self.conn.send(crate::outbound::privmsg(&target, text)).await;
        }
    }

    /// Send PRIVMSG directly to the originating nick regardless of
    /// addressing (spec.md §4.4 `reply_priv`).
    pub async fn reply_priv(&self, text: &str) {
        let nick = self.message.source_nick();
        if !nick.is_empty() {
            self.conn.send(crate::outbound::privmsg(nick, text)).await;
        }
    }

    /// Same target resolution as `reply`, but NOTICE (spec.md §4.4
    /// `reply_notice`).
    pub async fn reply_notice(&self, text: &str) {
        let nick = self.conn.current_nick();
        if let Some(target) = resolve_target(&self.message, &nick) {
            self.conn.send(crate::outbound::notice(&target, text)).await;
        }
    }

    /// Same target resolution as `reply_priv`, but NOTICE (spec.md §4.4
    /// `reply_priv_notice`).
    pub async fn reply_priv_notice(&self, text: &str) {
        let nick = self.message.source_nick();
        if !nick.is_empty() {
            self.conn.send(crate::outbound::notice(nick, text)).await;
        }
    }

    /// Suspend until a future message matches `pattern`, or `timeout`
    /// elapses (spec.md §4.5 `await_resp`).
    pub async fn await_resp(
        &self,
        pattern: &str,
        chan: Option<&str>,
        nick: Option<&str>,
        timeout: std::time::Duration,
        capture_charclass: &str,
    ) -> Option<(Message, HashMap<String, String>)> {
        self.broker
            .await_resp(pattern, chan, nick, timeout, capture_charclass)
            .await
    }
}
