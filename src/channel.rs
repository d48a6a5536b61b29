//! Channel Actor (spec.md §4.6): the single serialization point for a
//! joined channel's membership and message buffer.
//!
//! Each channel is a `tokio::spawn`'d task driven by an `mpsc` command
//! channel, following the same owning-task-behind-a-cloneable-handle
//! shape `libtiny_client::State` uses for its connection state,
//! generalized here to a true separate task since spec.md §5 requires
//! per-channel mutations to be serialized through message passing, not
//! through a `Rc<RefCell<_>>` shared within one task.

use std::collections::{HashMap, VecDeque};

use ircbot_wire::Message;
use tokio::sync::{mpsc, oneshot};

/// Number of PRIVMSGs retained per channel (spec.md §3).
pub const BUFFER_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberMode {
    Normal,
    Voice,
    Op,
}

impl MemberMode {
    /// Determine mode from a NAMES/JOIN sigil-prefixed nick, per
    /// spec.md §3: `%`, `@`, `&`, `~` all mean op (they subsume
    /// half-op/op/admin/owner); `+` is voice; no sigil is normal.
    fn from_sigil(c: char) -> Option<MemberMode> {
        match c {
            '%' | '@' | '&' | '~' => Some(MemberMode::Op),
            '+' => Some(MemberMode::Voice),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMember {
    pub nick: String,
    pub mode: MemberMode,
}

/// Split a NAMES/JOIN token like `@alice` into (mode, bare nick).
fn split_sigil(token: &str) -> (MemberMode, &str) {
    match token.chars().next().and_then(MemberMode::from_sigil) {
        Some(mode) => (mode, &token[1..]),
        None => (MemberMode::Normal, token),
    }
}

enum ChannelCmd {
    SetUser(String),
    GetUser(String, oneshot::Sender<Option<ChannelMember>>),
    DelUser(String),
    RenameUser(String, String),
    LogMessage(Box<Message>),
    GetBuffer(Box<dyn FnOnce(&VecDeque<Message>) + Send>),
    MemberCount(oneshot::Sender<usize>),
}

/// A cheaply-cloneable handle to a running Channel Actor. Dropping the
/// last handle (and the supervisor's copy) stops the actor.
#[derive(Clone)]
pub struct ChannelHandle {
    name: String,
    tx: mpsc::Sender<ChannelCmd>,
}

impl ChannelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Determine mode from the leading sigil character, strip it, and
    /// upsert the member (spec.md §4.6 `set_user`).
    pub async fn set_user(&self, nick_with_sigil: &str) {
        let _ = self
            .tx
            .send(ChannelCmd::SetUser(nick_with_sigil.to_owned()))
            .await;
    }

    pub async fn get_user(&self, nick: &str) -> Option<ChannelMember> {
        let (resp_tx, resp_rx) = oneshot::channel();
        if self
            .tx
            .send(ChannelCmd::GetUser(nick.to_owned(), resp_tx))
            .await
            .is_err()
        {
            return None;
        }
        resp_rx.await.unwrap_or(None)
    }

    pub async fn del_user(&self, nick: &str) {
        let _ = self.tx.send(ChannelCmd::DelUser(nick.to_owned())).await;
    }

    pub async fn rename_user(&self, old: &str, new: &str) {
        let _ = self
            .tx
            .send(ChannelCmd::RenameUser(old.to_owned(), new.to_owned()))
            .await;
    }

    pub async fn log_message(&self, msg: Message) {
        let _ = self.tx.send(ChannelCmd::LogMessage(Box::new(msg))).await;
    }

    /// Apply `f` to a snapshot of the buffer (newest-first) and return
    /// its result (spec.md §4.6 `get_buffer`).
    pub async fn get_buffer<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&[Message]) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (resp_tx, resp_rx) = oneshot::channel();
        let job: Box<dyn FnOnce(&VecDeque<Message>) + Send> = Box::new(move |buf| {
            let snapshot: Vec<Message> = buf.iter().cloned().collect();
            let _ = resp_tx.send(f(&snapshot));
        });
        if self.tx.send(ChannelCmd::GetBuffer(job)).await.is_err() {
            return None;
        }
        resp_rx.await.ok()
    }

    pub async fn member_count(&self) -> usize {
        let (resp_tx, resp_rx) = oneshot::channel();
        if self.tx.send(ChannelCmd::MemberCount(resp_tx)).await.is_err() {
            return 0;
        }
        resp_rx.await.unwrap_or(0)
    }
}

struct ChannelActor {
    name: String,
    members: HashMap<String, ChannelMember>,
    buffer: VecDeque<Message>,
}

impl ChannelActor {
    fn new(name: String) -> Self {
        ChannelActor {
            name,
            members: HashMap::new(),
            buffer: VecDeque::new(),
        }
    }

    fn set_user(&mut self, nick_with_sigil: &str) {
        let (mode, nick) = split_sigil(nick_with_sigil);
        self.members.insert(
            nick.to_owned(),
            ChannelMember {
                nick: nick.to_owned(),
                mode,
            },
        );
    }

    fn log_message(&mut self, msg: Message) {
        self.buffer.push_front(msg);
        while self.buffer.len() > BUFFER_CAPACITY {
            self.buffer.pop_back();
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<ChannelCmd>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                ChannelCmd::SetUser(nick_with_sigil) => self.set_user(&nick_with_sigil),
                ChannelCmd::GetUser(nick, resp) => {
                    let _ = resp.send(self.members.get(&nick).cloned());
                }
                ChannelCmd::DelUser(nick) => {
                    self.members.remove(&nick);
                }
                ChannelCmd::RenameUser(old, new) => {
                    if let Some(mut member) = self.members.remove(&old) {
                        member.nick = new.clone();
                        self.members.insert(new, member);
                    }
                }
                ChannelCmd::LogMessage(msg) => self.log_message(*msg),
                ChannelCmd::GetBuffer(job) => job(&self.buffer),
                ChannelCmd::MemberCount(resp) => {
                    let _ = resp.send(self.members.len());
                }
            }
        }
        log::debug!("channel actor for {} shutting down", self.name);
    }
}

/// Spawn a new Channel Actor task for `name` and return a handle to it.
pub fn spawn(name: impl Into<String>) -> ChannelHandle {
    let name = name.into();
    let (tx, rx) = mpsc::channel(256);
    let actor = ChannelActor::new(name.clone());
    tokio::spawn(actor.run(rx));
    ChannelHandle { name, tx }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_user_parses_sigil() {
        let chan = spawn("#chan");
        chan.set_user("@alice").await;
        chan.set_user("+bob").await;
        chan.set_user("carol").await;

        assert_eq!(chan.get_user("alice").await.unwrap().mode, MemberMode::Op);
        assert_eq!(chan.get_user("bob").await.unwrap().mode, MemberMode::Voice);
        assert_eq!(
            chan.get_user("carol").await.unwrap().mode,
            MemberMode::Normal
        );
    }

    #[tokio::test]
    async fn membership_scenario_from_spec() {
        // join #c (our nick bot), 353 names reply, PART alice, NICK bob -> robert
        let chan = spawn("#c");
        for tok in ["@alice", "+bob", "carol"] {
            chan.set_user(tok).await;
        }
        chan.del_user("alice").await;
        chan.rename_user("bob", "robert").await;

        assert!(chan.get_user("alice").await.is_none());
        assert!(chan.get_user("bob").await.is_none());
        assert_eq!(
            chan.get_user("robert").await.unwrap().mode,
            MemberMode::Voice
        );
        assert_eq!(
            chan.get_user("carol").await.unwrap().mode,
            MemberMode::Normal
        );
        assert_eq!(chan.member_count().await, 2);
    }

    #[tokio::test]
    async fn rename_nonexistent_user_is_noop() {
        let chan = spawn("#c");
        chan.rename_user("ghost", "phantom").await;
        assert!(chan.get_user("phantom").await.is_none());
    }

    #[tokio::test]
    async fn buffer_drops_oldest_past_capacity() {
        let chan = spawn("#c");
        for i in 0..(BUFFER_CAPACITY + 5) {
            chan.log_message(
                Message::new("PRIVMSG")
                    .with_args(["#c"])
                    .with_trailing(format!("msg{i}")),
            )
            .await;
        }
        let len = chan.get_buffer(|buf| buf.len()).await.unwrap();
        assert_eq!(len, BUFFER_CAPACITY);
        let newest = chan.get_buffer(|buf| buf[0].trailing.clone()).await.unwrap();
        assert_eq!(newest, format!("msg{}", BUFFER_CAPACITY + 4));
    }
}
