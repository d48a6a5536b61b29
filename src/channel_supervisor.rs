//! Process-wide channel name → actor handle table (spec.md §4.6, §5).
//!
//! Backed by `dashmap::DashMap` rather than a bare `Mutex`/`RwLock`
//! around a `HashMap`, matching the corpus's (`slircd-ng`) choice for
//! this exact "concurrently read, single-writer-per-key" shape (spec.md
//! §5, "Shared state"). The supervisor itself is the sole writer: it's
//! the only thing that inserts or removes entries, which is what makes
//! the single-writer-per-key invariant hold even though the map allows
//! concurrent access.

use dashmap::DashMap;

use crate::channel::{self, ChannelHandle};

#[derive(Default)]
pub struct ChannelSupervisor {
    channels: DashMap<String, ChannelHandle>,
}

impl ChannelSupervisor {
    pub fn new() -> Self {
        ChannelSupervisor {
            channels: DashMap::new(),
        }
    }

    /// Get the handle for `name`, spawning a new Channel Actor if this
    /// is the first time we've seen it (e.g. on JOIN).
    pub fn get_or_create(&self, name: &str) -> ChannelHandle {
        self.channels
            .entry(name.to_owned())
            .or_insert_with(|| channel::spawn(name))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<ChannelHandle> {
        self.channels.get(name).map(|e| e.clone())
    }

    /// Names of every channel actor currently known, used to re-JOIN
    /// on reconnect (spec.md §4.2 Reconnect).
    pub fn known_channels(&self) -> Vec<String> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_reuses_existing_actor() {
        let sup = ChannelSupervisor::new();
        let a = sup.get_or_create("#chan");
        a.set_user("@alice").await;
        let b = sup.get_or_create("#chan");
        assert_eq!(b.get_user("alice").await.unwrap().nick, "alice");
    }

    #[test]
    fn known_channels_lists_every_created_channel() {
        let sup = ChannelSupervisor::new();
        sup.get_or_create("#a");
        sup.get_or_create("#b");
        let mut names = sup.known_channels();
        names.sort();
        assert_eq!(names, vec!["#a".to_string(), "#b".to_string()]);
    }
}
