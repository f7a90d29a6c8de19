//! Relay scheduler: at most one notification in flight.
//!
//! The scheduler only tracks identifiers and timing. The manager owns the
//! notifications themselves and pushes the actual sink events based on the
//! `Submission` returned here, so a queued notification that is updated
//! before delivery goes out with its latest parameters.

use crate::types::{NotificationId, NotificationKind, RelayInterval};
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, warn};

/// A notification waiting for (or undergoing) delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: NotificationId,
    pub kind: NotificationKind,
    pub interval: RelayInterval,
}

/// Outcome of submitting a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    /// Push it to the sinks now.
    Deliver,
    /// Parked in the wait queue at this position.
    Queued { position: usize },
    /// Queue full (or already pending); not relayed.
    Dropped,
}

/// Single-in-flight relay state.
#[derive(Debug)]
pub struct RelayScheduler {
    /// Notification currently holding the relay.
    in_flight: Option<NotificationId>,
    /// One-shot timer deadline for the in-flight notification.
    deadline: Option<Instant>,
    queue: VecDeque<QueueEntry>,
    max_queue: usize,
}

impl RelayScheduler {
    pub fn new(max_queue: usize) -> Self {
        Self {
            in_flight: None,
            deadline: None,
            queue: VecDeque::new(),
            max_queue,
        }
    }

    /// Offer a notification for delivery.
    pub fn submit(&mut self, entry: QueueEntry, now: Instant) -> Submission {
        if self.in_flight == Some(entry.id) || self.is_queued(entry.id) {
            debug!(id = %entry.id, "notification already pending relay");
            return Submission::Dropped;
        }

        if self.in_flight.is_none() {
            match entry.interval {
                RelayInterval::Immediate => {}
                RelayInterval::Timed(interval) => {
                    self.in_flight = Some(entry.id);
                    self.deadline = Some(now + interval);
                }
                RelayInterval::UntilRemoved => {
                    self.in_flight = Some(entry.id);
                }
            }
            return Submission::Deliver;
        }

        if self.queue.len() >= self.max_queue {
            warn!(
                id = %entry.id,
                max_queue = self.max_queue,
                "wait queue full, notification will not be relayed"
            );
            return Submission::Dropped;
        }

        let position = self.insert_position(entry.kind);
        self.queue.insert(position, entry);
        Submission::Queued { position }
    }

    /// System events go before the first application event; application
    /// events go to the tail.
    fn insert_position(&self, kind: NotificationKind) -> usize {
        match kind {
            NotificationKind::ApplicationEvent => self.queue.len(),
            NotificationKind::SystemEvent => self
                .queue
                .iter()
                .position(|e| e.kind != NotificationKind::SystemEvent)
                .unwrap_or(self.queue.len()),
        }
    }

    /// Release the relay and hand back the next waiting notification, which
    /// the caller should `submit` again.
    pub fn advance(&mut self) -> Option<QueueEntry> {
        self.in_flight = None;
        self.deadline = None;
        self.queue.pop_front()
    }

    /// Drop a waiting notification. Returns false if it was not queued.
    pub fn remove_queued(&mut self, id: NotificationId) -> bool {
        match self.queue.iter().position(|e| e.id == id) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn is_queued(&self, id: NotificationId) -> bool {
        self.queue.iter().any(|e| e.id == id)
    }

    pub fn is_in_flight(&self, id: NotificationId) -> bool {
        self.in_flight == Some(id)
    }

    pub fn in_flight(&self) -> Option<NotificationId> {
        self.in_flight
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// When the relay timer fires, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn timer_due(&self, now: Instant) -> bool {
        self.deadline.map_or(false, |d| d <= now)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Waiting notifications in delivery order.
    pub fn queued_ids(&self) -> Vec<NotificationId> {
        self.queue.iter().map(|e| e.id).collect()
    }
}
