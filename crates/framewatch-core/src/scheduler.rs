//! Periodic sender scheduling

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::field::SlotId;
use crate::recovery::ActiveSender;

#[derive(Debug, Clone, Copy)]
struct Entry {
    period: Duration,
    next_due: Instant,
}

/// Due times of the running periodic senders
#[derive(Debug, Clone, Default)]
pub struct PeriodicScheduler {
    entries: BTreeMap<SlotId, Entry>,
}

impl PeriodicScheduler {
    /// Empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) a sender, first due one period from `now`
    pub fn start(&mut self, id: SlotId, period: Duration, now: Instant) {
        let period = period.max(Duration::from_millis(1));
        self.entries.insert(
            id,
            Entry {
                period,
                next_due: now + period,
            },
        );
    }

    /// Stop a sender
    pub fn stop(&mut self, id: SlotId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Stop every sender
    pub fn stop_all(&mut self) {
        self.entries.clear();
    }

    /// Whether a sender is running
    pub fn is_active(&self, id: SlotId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Running senders and their periods
    pub fn active(&self) -> Vec<ActiveSender> {
        self.entries
            .iter()
            .map(|(id, entry)| ActiveSender {
                id: *id,
                period: entry.period,
            })
            .collect()
    }

    /// Senders due at `now`, each rescheduled one period later.
    ///
    /// A sender that fell several periods behind fires once and resumes from
    /// `now`.
    pub fn due(&mut self, now: Instant) -> Vec<SlotId> {
        let mut due = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            if entry.next_due <= now {
                due.push(*id);
                entry.next_due += entry.period;
                if entry.next_due <= now {
                    entry.next_due = now + entry.period;
                }
            }
        }
        due
    }

    /// Earliest due time, if any sender runs
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|e| e.next_due).min()
    }
}
