//! Bounded diagnostic trace of dispatched events.
//!
//! Append-only ring. Old records are dropped first. Nothing reads the trace
//! for correctness.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::SystemTime;

use crate::events::types::Event;
use crate::runtime::affinity::Actor;

#[derive(Debug, Clone)]
pub struct EventRecord {
    pub event: Arc<dyn Event>,
    pub origin_actor: Actor,
    pub simulation_tick: u64,
    pub timestamp: SystemTime,
}

#[derive(Debug)]
pub(crate) struct EventTrace {
    records: VecDeque<EventRecord>,
    capacity: usize,
}

impl EventTrace {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub(crate) fn push(&mut self, record: EventRecord) {
        if !self.is_enabled() {
            return;
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub(crate) fn snapshot(&self) -> Vec<EventRecord> {
        self.records.iter().cloned().collect()
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }
}
