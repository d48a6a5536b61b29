//! Dispatch-and-routing framework for building IRC bots: handler units
//! declare which commands and textual patterns they react to, and
//! `Bot` connects to a server, parses every inbound line, fans it out
//! to every registered unit, and routes outbound replies back over the
//! connection.
//!
//! Grounded in `libtiny_client`/`libtiny_wire`'s split, generalized
//! from an IRC client library into a full bot framework around this
//! crate's own match engine, channel actors, and callback broker.

pub mod broker;
pub mod builtin;
pub mod channel;
pub mod channel_supervisor;
mod connection;
pub mod conn_handle;
pub mod context;
pub mod config;
pub mod error;
mod liveness;
pub mod match_engine;
pub mod outbound;
pub mod pattern;
pub mod registry;
mod stream;

pub use error::{Error, Result};
pub use ircbot_wire::{Message, ParseError, Prefix};

use std::sync::Arc;

use channel_supervisor::ChannelSupervisor;
use config::Config;
use conn_handle::ConnHandle;
use registry::{HandlerUnit, ModuleRegistry};
use tokio::sync::mpsc;

/// Wires together the Connection Manager, Module Registry, Channel
/// Supervisor, and Callback Broker (spec.md §2 dataflow) and drives
/// them until the connection is torn down for good.
pub struct Bot {
    registry: ModuleRegistry,
    conn: ConnHandle,
    channels: Arc<ChannelSupervisor>,
    broker: broker::BrokerHandle,
    inbound: mpsc::Receiver<ircbot_wire::Message>,
}

impl Bot {
    /// Validate `config`, spin up the Connection Manager, and register
    /// the always-on Built-in Protocol Handler. Returns before any
    /// socket I/O happens; call `register` for user-authored handler
    /// units, then `run`.
    pub fn new(config: Config) -> Result<Bot> {
        config.validate()?;
        let config = Arc::new(config);

        let channels = Arc::new(ChannelSupervisor::new());
        let broker = broker::spawn();
        let (conn, inbound) = connection::spawn(config.clone(), channels.clone());

        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(builtin::BuiltinHandler::new(config.channels.clone())));

        Ok(Bot {
            registry,
            conn,
            channels,
            broker,
            inbound,
        })
    }

    /// Register a user-authored handler unit (spec.md §4.3). Idempotent
    /// on `unit.name()`.
    pub fn register(&mut self, unit: Arc<dyn HandlerUnit>) {
        self.registry.register(unit);
    }

    pub fn unregister(&mut self, name: &str) {
        self.registry.unregister(name);
    }

    /// A handle callable from outside the dispatch loop, e.g. for a
    /// host application driving the bot from another task.
    pub fn conn_handle(&self) -> ConnHandle {
        self.conn.clone()
    }

    pub fn channels(&self) -> Arc<ChannelSupervisor> {
        self.channels.clone()
    }

    /// Drive the bot forever: decode inbound messages, resolve any
    /// suspended `await_resp` callbacks, and broadcast to every
    /// registered handler unit (spec.md §2 dataflow). Returns only if
    /// the Connection Manager's inbound channel closes, which happens
    /// when its task has been dropped rather than merely reconnecting.
    pub async fn run(mut self) {
        while let Some(msg) = self.inbound.recv().await {
            self.broker.deliver(msg.clone()).await;
            self.registry
                .broadcast(msg, self.conn.clone(), self.channels.clone(), self.broker.clone())
                .await;
        }
        log::info!("bot: inbound channel closed, stopping");
    }
}
