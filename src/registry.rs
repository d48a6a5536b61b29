//! Module Registry (spec.md §4.3): the process-wide set of handler
//! units, and fan-out of every inbound message to each of them.
//!
//! Rust has no dynamic module scanning, so "registering a module" is
//! adding a `Box<dyn HandlerUnit>` to this registry at startup rather
//! than discovering it at runtime (spec.md §9 Design Notes).

use std::sync::Arc;

use async_trait::async_trait;
use ircbot_wire::Message;
use tokio::sync::mpsc;

use crate::context::Context;
use crate::match_engine::MatchTable;

/// A compiled handler unit. `dispatch` is never hand-written; it is
/// produced by `MatchTableBuilder::build` and simply forwards into the
/// compiled `MatchTable` (spec.md §4.3's `HandlerUnit`).
#[async_trait]
pub trait HandlerUnit: Send + Sync {
    fn name(&self) -> &str;
    fn match_table(&self) -> &MatchTable;

    async fn dispatch(&self, ctx: Context) {
        self.match_table().dispatch(ctx).await;
    }
}

/// Wraps a compiled `MatchTable` as a ready-to-register `HandlerUnit`.
/// Most handler units need nothing beyond the compiled table, so this
/// saves implementors from writing a one-line `impl HandlerUnit` by
/// hand for every unit.
pub struct CompiledUnit {
    table: MatchTable,
}

impl CompiledUnit {
    pub fn new(table: MatchTable) -> Self {
        CompiledUnit { table }
    }
}

#[async_trait]
impl HandlerUnit for CompiledUnit {
    fn name(&self) -> &str {
        self.table.unit_name()
    }

    fn match_table(&self) -> &MatchTable {
        &self.table
    }
}

/// One registered unit's mailbox: a dedicated task owns the unit and
/// drains `rx` in order, so messages handed to the same unit are
/// dispatched strictly FIFO (spec.md §4.3/§5), the same shape as the
/// Channel Actor and Connection Manager's own persistent task/`mpsc`
/// loops.
struct UnitSlot {
    name: String,
    tx: mpsc::Sender<Context>,
}

async fn run_unit(unit: Arc<dyn HandlerUnit>, mut rx: mpsc::Receiver<Context>) {
    while let Some(ctx) = rx.recv().await {
        unit.dispatch(ctx).await;
    }
}

/// Registers handler units and broadcasts inbound messages to each in
/// registration order. Each unit runs on its own persistent task, so a
/// panic or slow handler in one unit does not block or affect another
/// (spec.md §4.3 isolation requirement), while messages delivered to
/// the same unit are processed one at a time in the order they arrived.
pub struct ModuleRegistry {
    units: Vec<UnitSlot>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        ModuleRegistry { units: Vec::new() }
    }

    /// Idempotent: registering a unit whose `name()` is already present
    /// replaces the existing registration rather than adding a
    /// duplicate (spec.md §4.3 idempotence requirement). The replaced
    /// unit's task drains whatever is already queued for it and then
    /// exits, once its sender side is dropped here.
    pub fn register(&mut self, unit: Arc<dyn HandlerUnit>) {
        let name = unit.name().to_owned();
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run_unit(unit, rx));

        if let Some(slot) = self.units.iter_mut().find(|u| u.name == name) {
            slot.tx = tx;
        } else {
            self.units.push(UnitSlot { name, tx });
        }
    }

    pub fn unregister(&mut self, name: &str) {
        self.units.retain(|u| u.name != name);
    }

    pub fn unit_names(&self) -> Vec<String> {
        self.units.iter().map(|u| u.name.clone()).collect()
    }

    /// Build a `Context` for `msg` and hand it to every registered
    /// unit's mailbox, in registration order. Awaiting each send keeps
    /// delivery ordered with respect to socket arrival order: the next
    /// inbound message isn't broadcast until this one has been queued
    /// (in order) to every unit.
    pub async fn broadcast(
        &self,
        msg: Message,
        conn: crate::conn_handle::ConnHandle,
        channels: Arc<crate::channel_supervisor::ChannelSupervisor>,
        broker: crate::broker::BrokerHandle,
    ) {
        for unit in &self.units {
            log::trace!("dispatching {:?} to unit {:?}", msg.command, unit.name);
            let ctx = Context {
                message: msg.clone(),
                captures: Default::default(),
                unit_name: Arc::from(unit.name.as_str()),
                conn: conn.clone(),
                channels: channels.clone(),
                broker: broker.clone(),
            };
            if unit.tx.send(ctx).await.is_err() {
                log::warn!("unit {:?} task has exited, dropping message", unit.name);
            }
        }
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
