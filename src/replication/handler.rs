//! Peer Endpoint Handler
//!
//! Served on the replication port of every node. Backups apply
//! `replicate_*` requests from the primary without re-validating them,
//! and answer the coordinator's clock polls and corrections.

use std::sync::Arc;

use super::{required, Envelope, Operation, Payload, PeerKind};
use crate::clock::{LogicalClock, PhysicalClock};
use crate::network::RequestHandler;
use crate::state::StateStore;
use crate::error::Result;

/// Handler for the replication endpoint
pub struct PeerHandler {
    store: Arc<StateStore>,
    clock: Arc<LogicalClock>,
    physical: Arc<PhysicalClock>,
    /// Called after every applied replicated operation
    on_applied: Option<Box<dyn Fn() + Send + Sync>>,
}

impl PeerHandler {
    pub fn new(store: Arc<StateStore>, clock: Arc<LogicalClock>, physical: Arc<PhysicalClock>) -> Self {
        Self {
            store,
            clock,
            physical,
            on_applied: None,
        }
    }

    /// Run `hook` after each applied operation (used to request persistence)
    pub fn on_applied(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_applied = Some(Box::new(hook));
        self
    }
}

#[async_trait::async_trait]
impl RequestHandler for PeerHandler {
    async fn handle(&self, request: Envelope) -> Result<Envelope> {
        self.clock.observe(request.data.clock);

        let Some(kind) = PeerKind::parse(&request.service) else {
            tracing::warn!("Unknown replication service: {}", request.service);
            return Ok(request.reply(Payload::error(self.clock.tick(), "Replication service not found")));
        };

        let data = match kind {
            PeerKind::Replicate(op_kind) => {
                let op = Operation::from_payload(op_kind, &request.data);
                self.store.apply_replicated(&op).await;
                if let Some(hook) = &self.on_applied {
                    hook();
                }
                Payload::ok(self.clock.tick())
            }
            PeerKind::Clock => {
                let mut data = Payload::ok(self.clock.tick());
                data.time = Some(self.physical.now_ms());
                data
            }
            PeerKind::ClockAdjust => {
                let offset = required(&request.data.offset, "offset", "clock_adjust")?;
                self.physical.adjust(offset);
                Payload::ok(self.clock.tick())
            }
        };

        Ok(request.reply(data))
    }

    fn clock(&self) -> &LogicalClock {
        &self.clock
    }
}
