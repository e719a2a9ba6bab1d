//! Registry of running containers
//!
//! Maps the 12-character short id used by the sample source to the identity
//! resolved at container start and the counter baselines used for deltas.

use super::ContainerFilter;
use crate::collector::ContainerInspector;
use crate::models::{short_id, ContainerIdentity, ContainerRecord, CounterName};
use anyhow::Result;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Outcome of resolving a started container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Identity resolved and stored under the short key
    Registered(String),
    /// Identity resolved but rejected by the container filter
    Filtered,
    /// The container stopped or restarted while its identity was resolved
    Superseded,
}

/// A start in progress, issued before the container is inspected
#[derive(Debug)]
pub struct StartTicket {
    container_id: String,
    key: String,
    generation: u64,
}

/// Registry of containers with resolved identity
pub struct ContainerRegistry {
    /// Map of short id -> record
    containers: DashMap<String, ContainerRecord>,
    /// Map of short id -> generation of the start being resolved
    pending: DashMap<String, u64>,
    next_generation: AtomicU64,
    filter: ContainerFilter,
}

impl Default for ContainerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRegistry {
    /// Create a registry admitting every container
    pub fn new() -> Self {
        Self::with_filter(ContainerFilter::default())
    }

    pub fn with_filter(filter: ContainerFilter) -> Self {
        Self {
            containers: DashMap::new(),
            pending: DashMap::new(),
            next_generation: AtomicU64::new(0),
            filter,
        }
    }

    /// Resolve identity for a started container and register it.
    ///
    /// The container stays invisible until this completes. A failed
    /// inspection leaves no record.
    pub async fn on_start(
        &self,
        container_id: &str,
        inspector: &dyn ContainerInspector,
    ) -> Result<StartOutcome> {
        let ticket = self.begin_start(container_id);
        self.complete_start(ticket, inspector).await
    }

    /// Record that a start is being resolved. A later `on_stop` or
    /// `begin_start` for the same key invalidates the ticket.
    pub fn begin_start(&self, container_id: &str) -> StartTicket {
        let key = short_id(container_id).to_string();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(key.clone(), generation);

        StartTicket {
            container_id: container_id.to_string(),
            key,
            generation,
        }
    }

    /// Inspect the container and register it if the ticket is still current
    pub async fn complete_start(
        &self,
        ticket: StartTicket,
        inspector: &dyn ContainerInspector,
    ) -> Result<StartOutcome> {
        let identity = match inspector.inspect(&ticket.container_id).await {
            Ok(identity) => identity,
            Err(e) => {
                self.release(&ticket);
                return Err(e);
            }
        };

        if !self.filter.admits(&identity) {
            debug!(container_id = %ticket.container_id, name = %identity.name, "Container filtered out");
            self.release(&ticket);
            return Ok(StartOutcome::Filtered);
        }

        // Registering under the pending entry lock orders it against on_stop
        let registered = match self.pending.get(&ticket.key) {
            Some(current) if *current == ticket.generation => {
                self.register(&ticket.key, identity);
                true
            }
            _ => false,
        };
        self.release(&ticket);

        if registered {
            Ok(StartOutcome::Registered(ticket.key))
        } else {
            debug!(container_id = %ticket.container_id, "Start superseded before registration");
            Ok(StartOutcome::Superseded)
        }
    }

    fn release(&self, ticket: &StartTicket) {
        self.pending
            .remove_if(&ticket.key, |_, generation| *generation == ticket.generation);
    }

    /// Insert or overwrite the record for a short key
    pub fn register(&self, key: &str, identity: ContainerIdentity) {
        debug!(key = %key, name = %identity.name, "Registering container");
        self.containers
            .insert(key.to_string(), ContainerRecord::new(identity));
    }

    /// Remove a container and cancel any start still being resolved;
    /// accepts the full id or the short key
    pub fn on_stop(&self, container_id: &str) -> Option<ContainerRecord> {
        let key = short_id(container_id);
        debug!(key = %key, "Unregistering container");
        self.pending.remove(key);
        self.containers.remove(key).map(|(_, v)| v)
    }

    /// Get a snapshot of the record for a short key
    pub fn lookup(&self, key: &str) -> Option<ContainerRecord> {
        self.containers.get(key).map(|r| r.clone())
    }

    /// Upsert the last-seen cumulative value for a counter.
    ///
    /// Returns false when the container is not registered.
    pub fn record_previous_counter(&self, key: &str, counter: CounterName, value: u64) -> bool {
        match self.containers.get_mut(key) {
            Some(mut entry) => {
                entry.previous_counters.insert(counter, value);
                true
            }
            None => false,
        }
    }

    /// Run `f` against the record while holding its entry lock, so a
    /// read-modify-write of counter baselines is atomic per container
    pub(crate) fn update<R>(&self, key: &str, f: impl FnOnce(&mut ContainerRecord) -> R) -> Option<R> {
        self.containers.get_mut(key).map(|mut entry| f(&mut *entry))
    }

    /// Get the number of registered containers
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}
