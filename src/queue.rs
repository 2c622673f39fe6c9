//! Per-instance event queue.
//!
//! FIFO, bounded. The `timer` event is coalesced: while one is pending,
//! further timers are dropped. Every other event is kept as posted,
//! duplicates included.

use std::collections::VecDeque;

use crate::model::EventRecord;

/// What happened to a posted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Accepted,
    /// Queue at capacity; event dropped.
    Full,
    /// A timer is already pending; event dropped.
    Coalesced,
    /// Instance not running; event dropped before reaching the queue.
    NotRunning,
}

impl Enqueue {
    pub fn is_accepted(self) -> bool {
        self == Enqueue::Accepted
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Enqueue::Accepted => "accepted",
            Enqueue::Full => "full",
            Enqueue::Coalesced => "coalesced",
            Enqueue::NotRunning => "not_running",
        }
    }
}

#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<EventRecord>,
    capacity: usize,
    timer_queued: bool,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(32)),
            capacity,
            timer_queued: false,
        }
    }

    pub fn push(&mut self, record: EventRecord) -> Enqueue {
        if self.events.len() >= self.capacity {
            return Enqueue::Full;
        }
        if record.is_timer() {
            if self.timer_queued {
                return Enqueue::Coalesced;
            }
            self.timer_queued = true;
        }
        self.events.push_back(record);
        Enqueue::Accepted
    }

    pub fn pop(&mut self) -> Option<EventRecord> {
        let record = self.events.pop_front()?;
        if record.is_timer() {
            self.timer_queued = false;
        }
        Some(record)
    }

    pub fn clear(&mut self) {
        self.timer_queued = false;
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the pending events, oldest first.
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.events.iter().cloned().collect()
    }
}
