//! Per-consumer reference counting.
//!
//! A consumer is a bus peer identity. An entry exists exactly while its
//! reference count is positive.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::MINIMUM_INTERVAL_MS;

/// One consumer's registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerRegistration {
    pub reference_count: u32,
    /// Requested update interval in milliseconds, 0 for no preference.
    pub update_interval_ms: u32,
}

/// Why a `set_update_interval` call was ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InactiveConsumer;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    consumers: BTreeMap<String, ConsumerRegistration>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment `consumer`'s count. Returns true when this made the registry
    /// go from empty to non-empty.
    pub fn add_reference(&mut self, consumer: &str) -> bool {
        let was_empty = self.consumers.is_empty();
        let entry = self.consumers.entry(consumer.to_string()).or_default();
        entry.reference_count += 1;
        debug!(consumer, count = entry.reference_count, "Reference added");
        was_empty
    }

    /// Decrement `consumer`'s count (never below zero), dropping the entry at
    /// zero. Returns true when the entry was removed.
    pub fn remove_reference(&mut self, consumer: &str) -> bool {
        let Some(entry) = self.consumers.get_mut(consumer) else {
            debug!(consumer, "RemoveReference from unknown consumer");
            return false;
        };
        entry.reference_count = entry.reference_count.saturating_sub(1);
        if entry.reference_count == 0 {
            self.consumers.remove(consumer);
            debug!(consumer, "Consumer released");
            return true;
        }
        false
    }

    /// Drop every reference held by `consumer`. Returns true if it had any.
    pub fn remove_consumer(&mut self, consumer: &str) -> bool {
        self.consumers.remove(consumer).is_some()
    }

    pub fn set_update_interval(
        &mut self,
        consumer: &str,
        interval_ms: u32,
    ) -> Result<(), InactiveConsumer> {
        match self.consumers.get_mut(consumer) {
            Some(entry) => {
                entry.update_interval_ms = interval_ms;
                Ok(())
            }
            None => {
                warn!(consumer, "Only active users can call SetOptions");
                Err(InactiveConsumer)
            }
        }
    }

    /// Smallest non-zero requested interval, never below
    /// [`MINIMUM_INTERVAL_MS`]; the floor when nobody asked for one.
    pub fn minimum_requested_interval(&self) -> u32 {
        self.consumers
            .values()
            .map(|c| c.update_interval_ms)
            .filter(|&ms| ms != 0)
            .min()
            .map_or(MINIMUM_INTERVAL_MS, |ms| ms.max(MINIMUM_INTERVAL_MS))
    }

    pub fn contains(&self, consumer: &str) -> bool {
        self.consumers.contains_key(consumer)
    }

    pub fn get(&self, consumer: &str) -> Option<&ConsumerRegistration> {
        self.consumers.get(consumer)
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn total_references(&self) -> u32 {
        self.consumers.values().map(|c| c.reference_count).sum()
    }
}
