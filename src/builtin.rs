//! Built-in Protocol Handler (spec.md §4.7): the always-registered
//! handler unit that keeps Channel Actor state and the bot's own nick
//! in sync with what the server reports, plus minimal handshake
//! housekeeping (PING/PONG, welcome-triggered JOIN, nick-in-use retry).
//!
//! Registered into the `ModuleRegistry` like any other `HandlerUnit`
//! (spec.md §4.7's "via the Module Registry like any other command"),
//! just always present rather than user-authored.

use std::sync::Arc;

use async_trait::async_trait;
use ircbot_wire::Message;

use crate::channel_supervisor::ChannelSupervisor;
use crate::context::Context;
use crate::match_engine::{MatchTable, MatchTableBuilder};
use crate::registry::HandlerUnit;

/// The built-in handler reacts to commands (`001`, `353`, `433`,
/// membership changes) that don't fit the Match Engine's
/// PRIVMSG-trailing-pattern model, so it switches on `command` directly
/// in `dispatch` instead of going through a compiled `MatchTable`. It
/// still carries an (empty) one to satisfy `HandlerUnit::match_table`.
pub struct BuiltinHandler {
    startup_channels: Vec<String>,
    empty_table: MatchTable,
}

impl BuiltinHandler {
    pub fn new(startup_channels: Vec<String>) -> Self {
        BuiltinHandler {
            startup_channels,
            empty_table: MatchTableBuilder::new("builtin").build().expect("empty table always compiles"),
        }
    }

    async fn handle(&self, ctx: &Context) {
        match ctx.message.command.as_str() {
            "PING" => {
                ctx.conn.send(crate::outbound::pong(&ctx.message.trailing)).await;
            }
            "001" => {
                for chan in &self.startup_channels {
                    ctx.channels.get_or_create(chan);
                    ctx.conn.send(crate::outbound::join(chan)).await;
                }
            }
            "353" => self.handle_names(&ctx.message, &ctx.channels).await,
            "PRIVMSG" => {
                if let Some(chan_name) = ctx.message.args.first() {
                    if let Some(chan) = ctx.channels.get(chan_name) {
                        chan.log_message(ctx.message.clone()).await;
                    }
                }
            }
            "433" => {
                let offending = ctx.message.args.get(1).map(String::as_str).unwrap_or_default();
                ctx.conn.send(crate::outbound::nick(&format!("{offending}_"))).await;
            }
            "JOIN" => {
                let chan = ctx.channels.get_or_create(&ctx.message.trailing);
                chan.set_user(ctx.message.source_nick()).await;
            }
            "PART" => {
                if let Some(chan_name) = ctx.message.args.first() {
                    if let Some(chan) = ctx.channels.get(chan_name) {
                        chan.del_user(ctx.message.source_nick()).await;
                    }
                }
            }
            "QUIT" => {
                let nick = ctx.message.source_nick();
                for chan_name in ctx.channels.known_channels() {
                    if let Some(chan) = ctx.channels.get(&chan_name) {
                        chan.del_user(nick).await;
                    }
                }
            }
            "NICK" => {
                let old = ctx.message.source_nick();
                let new = &ctx.message.trailing;
                for chan_name in ctx.channels.known_channels() {
                    if let Some(chan) = ctx.channels.get(&chan_name) {
                        chan.rename_user(old, new).await;
                    }
                }
            }
            "MODE" => self.handle_mode(&ctx.message, &ctx.channels).await,
            _ => {}
        }
    }

    /// `353`: `args = [bot, "=", chan]`, `trailing` is the space-split,
    /// sigil-prefixed member list (spec.md §4.7, §8 parsing fixtures).
    async fn handle_names(&self, msg: &Message, channels: &ChannelSupervisor) {
        let Some(chan_name) = msg.args.get(2) else {
            return;
        };
        let chan = channels.get_or_create(chan_name);
        for token in msg.trailing.split_whitespace() {
            chan.set_user(token).await;
        }
    }

    /// Only `+v`/`+h`/`+o` on `args = [chan, modestr, nick]` are
    /// understood; anything else (removals, compound strings, case
    /// variants) is ignored per spec.md §4.7/§6 "Unknown MODE string".
    async fn handle_mode(&self, msg: &Message, channels: &ChannelSupervisor) {
        let (Some(chan_name), Some(modestr), Some(nick)) =
            (msg.args.first(), msg.args.get(1), msg.args.get(2))
        else {
            return;
        };

        let sigil = match modestr.as_str() {
            "+v" => '+',
            "+h" | "+o" => '@',
            _ => {
                log::warn!("ignoring unrecognized MODE string {modestr:?} on {chan_name}");
                return;
            }
        };
        channels
            .get_or_create(chan_name)
            .set_user(&format!("{sigil}{nick}"))
            .await;
    }
}

#[async_trait]
impl HandlerUnit for BuiltinHandler {
    fn name(&self) -> &str {
        "builtin"
    }

    fn match_table(&self) -> &MatchTable {
        &self.empty_table
    }

    async fn dispatch(&self, ctx: Context) {
        self.handle(&ctx).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker;
    use crate::conn_handle::ConnHandle;
    use tokio::sync::{mpsc, watch};

    fn ctx_for(msg: Message) -> (Context, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(16);
        let (_nick_tx, nick_rx) = watch::channel("bot".to_string());
        let conn = ConnHandle::new(tx, nick_rx);
        let ctx = Context {
            message: msg,
            captures: Default::default(),
            unit_name: Arc::from("builtin"),
            conn,
            channels: Arc::new(ChannelSupervisor::new()),
            broker: broker::spawn(),
        };
        (ctx, rx)
    }

    fn with_prefix(mut msg: Message, nick: &str) -> Message {
        msg.user = Some(ircbot_wire::Prefix {
            nick: nick.to_owned(),
            name: "u".into(),
            rdns: "h".into(),
        });
        msg
    }

    #[tokio::test]
    async fn ping_replies_pong_with_same_trailing() {
        let handler = BuiltinHandler::new(vec![]);
        let (ctx, mut rx) = ctx_for(Message::new("PING").with_trailing("server.example"));
        handler.dispatch(ctx).await;
        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.command, "PONG");
        assert_eq!(reply.trailing, "server.example");
    }

    #[tokio::test]
    async fn welcome_joins_every_configured_channel() {
        let handler = BuiltinHandler::new(vec!["#a".into(), "#b".into()]);
        let (ctx, mut rx) = ctx_for(Message::new("001"));
        handler.dispatch(ctx).await;
        let mut joined = vec![rx.recv().await.unwrap().args[0].clone()];
        joined.push(rx.recv().await.unwrap().args[0].clone());
        joined.sort();
        assert_eq!(joined, vec!["#a".to_string(), "#b".to_string()]);
    }

    #[tokio::test]
    async fn nick_in_use_retries_with_underscore() {
        let handler = BuiltinHandler::new(vec![]);
        let msg = Message::new("433").with_args(["*", "bot"]).with_trailing("Nickname in use");
        let (ctx, mut rx) = ctx_for(msg);
        handler.dispatch(ctx).await;
        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.command, "NICK");
        assert_eq!(reply.args, vec!["bot_".to_string()]);
    }

    #[tokio::test]
    async fn membership_scenario_from_spec() {
        let handler = BuiltinHandler::new(vec![]);
        let channels = Arc::new(ChannelSupervisor::new());

        let names = Message::new("353")
            .with_args(["bot", "=", "#c"])
            .with_trailing("@alice +bob carol");
        let (mut ctx, _rx) = ctx_for(names);
        ctx.channels = channels.clone();
        handler.dispatch(ctx).await;

        let part = with_prefix(Message::new("PART").with_args(["#c"]), "alice");
        let (mut ctx, _rx) = ctx_for(part);
        ctx.channels = channels.clone();
        handler.dispatch(ctx).await;

        let nick_change = with_prefix(Message::new("NICK").with_trailing("robert"), "bob");
        let (mut ctx, _rx) = ctx_for(nick_change);
        ctx.channels = channels.clone();
        handler.dispatch(ctx).await;

        let chan = channels.get("#c").unwrap();
        assert!(chan.get_user("alice").await.is_none());
        assert!(chan.get_user("bob").await.is_none());
        assert_eq!(chan.get_user("robert").await.unwrap().mode, crate::channel::MemberMode::Voice);
        assert_eq!(chan.get_user("carol").await.unwrap().mode, crate::channel::MemberMode::Normal);
    }

    #[tokio::test]
    async fn reconnect_survival_rejoins_known_channels() {
        let handler = BuiltinHandler::new(vec!["#a".into(), "#b".into()]);
        let channels = Arc::new(ChannelSupervisor::new());
        channels.get_or_create("#a");
        channels.get_or_create("#b");
        channels.get("#a").unwrap().set_user("@alice").await;

        let (mut ctx, mut rx) = ctx_for(Message::new("001"));
        ctx.channels = channels.clone();
        handler.dispatch(ctx).await;

        let mut rejoined = vec![rx.recv().await.unwrap().args[0].clone()];
        rejoined.push(rx.recv().await.unwrap().args[0].clone());
        rejoined.sort();
        assert_eq!(rejoined, vec!["#a".to_string(), "#b".to_string()]);

        let mut known = channels.known_channels();
        known.sort();
        assert_eq!(known, vec!["#a".to_string(), "#b".to_string()]);
        assert_eq!(
            channels.get("#a").unwrap().get_user("alice").await.unwrap().mode,
            crate::channel::MemberMode::Op
        );
    }

    #[tokio::test]
    async fn mode_plus_o_promotes_member() {
        let handler = BuiltinHandler::new(vec![]);
        let channels = Arc::new(ChannelSupervisor::new());
        channels.get_or_create("#c").set_user("dave").await;

        let mode_msg = Message::new("MODE").with_args(["#c", "+o", "dave"]);
        let (mut ctx, _rx) = ctx_for(mode_msg);
        ctx.channels = channels.clone();
        handler.dispatch(ctx).await;

        assert_eq!(
            channels.get("#c").unwrap().get_user("dave").await.unwrap().mode,
            crate::channel::MemberMode::Op
        );
    }

    #[tokio::test]
    async fn privmsg_is_logged_to_the_addressed_channel_buffer() {
        let handler = BuiltinHandler::new(vec![]);
        let channels = Arc::new(ChannelSupervisor::new());
        channels.get_or_create("#c");

        let msg = with_prefix(
            Message::new("PRIVMSG").with_args(["#c"]).with_trailing("hi there"),
            "alice",
        );
        let (mut ctx, _rx) = ctx_for(msg);
        ctx.channels = channels.clone();
        handler.dispatch(ctx).await;

        let logged = channels.get("#c").unwrap().get_buffer(|buf| buf[0].trailing.clone()).await;
        assert_eq!(logged.as_deref(), Some("hi there"));
    }

    #[tokio::test]
    async fn privmsg_to_unknown_channel_is_not_logged() {
        let handler = BuiltinHandler::new(vec![]);
        let channels = Arc::new(ChannelSupervisor::new());

        let msg = Message::new("PRIVMSG").with_args(["#unseen"]).with_trailing("hi");
        let (mut ctx, _rx) = ctx_for(msg);
        ctx.channels = channels.clone();
        handler.dispatch(ctx).await;

        assert!(channels.get("#unseen").is_none());
    }

    #[tokio::test]
    async fn unknown_mode_string_is_ignored() {
        let handler = BuiltinHandler::new(vec![]);
        let channels = Arc::new(ChannelSupervisor::new());
        channels.get_or_create("#c").set_user("dave").await;

        let mode_msg = Message::new("MODE").with_args(["#c", "-v", "dave"]);
        let (mut ctx, _rx) = ctx_for(mode_msg);
        ctx.channels = channels.clone();
        handler.dispatch(ctx).await;

        assert_eq!(
            channels.get("#c").unwrap().get_user("dave").await.unwrap().mode,
            crate::channel::MemberMode::Normal
        );
    }
}
