//! Realtime Channel Registry.
//!
//! Maps a client id to its live outbound channel and, while a job runs for
//! that client, to the job's interaction gate. Sends never fail the caller:
//! an unregistered client simply does not receive the event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::jobs::events::{InboundMessage, OutboundEvent};
use crate::jobs::gate::InteractionGate;
use crate::jobs::record::{ClientId, JobId};

pub type ConnectionId = u64;
pub type EventSender = mpsc::UnboundedSender<OutboundEvent>;

struct Channel {
    connection: ConnectionId,
    tx: EventSender,
}

struct Binding {
    job_id: JobId,
    gate: Arc<InteractionGate>,
}

#[derive(Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<ClientId, Channel>>,
    bindings: RwLock<HashMap<ClientId, Binding>>,
    next_connection: AtomicU64,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the channel for `client_id`, replacing any previous one.
    pub fn register(&self, client_id: &str, tx: EventSender) -> ConnectionId {
        let connection = self.next_connection.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = write(&self.channels).insert(client_id.to_string(), Channel { connection, tx });
        if previous.is_some() {
            debug!(client_id, "replaced existing channel");
        }
        connection
    }

    pub fn unregister(&self, client_id: &str) {
        write(&self.channels).remove(client_id);
    }

    /// Drop the channel only if it is still the one opened by `connection`.
    /// A reconnect may have replaced it already.
    pub fn release(&self, client_id: &str, connection: ConnectionId) -> bool {
        let mut channels = write(&self.channels);
        match channels.get(client_id) {
            Some(ch) if ch.connection == connection => {
                channels.remove(client_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        read(&self.channels).contains_key(client_id)
    }

    pub fn connected_clients(&self) -> usize {
        read(&self.channels).len()
    }

    /// Fire-and-forget delivery. Returns whether the event was queued.
    pub fn send(&self, client_id: &str, event: OutboundEvent) -> bool {
        let channels = read(&self.channels);
        let Some(channel) = channels.get(client_id) else {
            debug!(client_id, kind = event.kind(), "no channel; event not delivered");
            return false;
        };
        if channel.tx.send(event).is_err() {
            debug!(client_id, "channel closed; event not delivered");
            return false;
        }
        true
    }

    /// Associate the client with the job that may prompt it.
    pub fn bind(&self, client_id: &str, job_id: &str, gate: Arc<InteractionGate>) {
        write(&self.bindings).insert(
            client_id.to_string(),
            Binding {
                job_id: job_id.to_string(),
                gate,
            },
        );
    }

    /// Remove the binding if it still belongs to `job_id`.
    pub fn unbind(&self, client_id: &str, job_id: &str) {
        let mut bindings = write(&self.bindings);
        if bindings.get(client_id).is_some_and(|b| b.job_id == job_id) {
            bindings.remove(client_id);
        }
    }

    pub fn active_job(&self, client_id: &str) -> Option<JobId> {
        read(&self.bindings).get(client_id).map(|b| b.job_id.clone())
    }

    /// Dispatch an operator message to the gate of the client's bound job.
    /// Returns false when the message was discarded.
    pub fn route_inbound(&self, client_id: &str, msg: InboundMessage) -> bool {
        let gate = read(&self.bindings).get(client_id).map(|b| b.gate.clone());
        match gate {
            Some(gate) => gate.deliver(msg),
            None => {
                warn!(client_id, action = %msg.action, "no job bound to client; dropping operator message");
                false
            }
        }
    }
}
