//! Pending hardware interrupts

use std::mem;

/// A queued interrupt: which module raised it and at what priority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interrupt {
    pub source: String,
    pub priority: i32,
}

/// Interrupts waiting for dispatch, ascending by priority. Equal priorities
/// keep their arrival order.
#[derive(Debug, Default)]
pub struct InterruptQueue {
    entries: Vec<Interrupt>,
}

impl InterruptQueue {
    pub fn new() -> Self {
        InterruptQueue::default()
    }

    /// Queue an interrupt. A source that is already queued is left where it
    /// is and `false` is returned.
    pub fn insert(&mut self, interrupt: Interrupt) -> bool {
        if self.entries.iter().any(|e| e.source == interrupt.source) {
            return false;
        }

        let at = self
            .entries
            .iter()
            .position(|e| e.priority > interrupt.priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, interrupt);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interrupt> {
        self.entries.iter()
    }

    /// Empty the queue, returning the entries in dispatch order
    pub fn take(&mut self) -> Vec<Interrupt> {
        mem::take(&mut self.entries)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
