//! Sink types.

use crate::error::Result;
use crate::params::NotificationParameters;
use crate::types::{GroupId, Notification, NotificationId};
use serde::{Deserialize, Serialize};

/// Configuration for a sink.
#[derive(Clone, Debug)]
pub struct SinkConfig {
    /// Max buffered events before the sink is dropped.
    /// Default: 1000
    ///
    /// A dropped sink stays unsubscribed and may not even receive its
    /// `Dropped` notice. `NotificationManager::restore` sends one event per
    /// restored group and notification in a single burst, so a sink that
    /// subscribes before restore and drains afterwards needs room for all
    /// of them.
    pub buffer_size: usize,

    /// Which events to receive.
    pub filter: SinkFilter,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: SinkFilter::all(),
        }
    }
}

/// Event selection for a sink.
#[derive(Clone, Debug, Default)]
pub struct SinkFilter {
    /// Notification updates, removals and restorations.
    pub include_notifications: bool,

    /// Group updates and removals.
    pub include_groups: bool,
}

impl SinkFilter {
    pub fn notifications() -> Self {
        Self {
            include_notifications: true,
            ..Default::default()
        }
    }

    pub fn groups() -> Self {
        Self {
            include_groups: true,
            ..Default::default()
        }
    }

    pub fn all() -> Self {
        Self {
            include_notifications: true,
            include_groups: true,
        }
    }

    pub(crate) fn matches(&self, event: &SinkEvent) -> bool {
        match event {
            SinkEvent::GroupUpdated { .. } | SinkEvent::GroupRemoved { .. } => {
                self.include_groups
            }
            SinkEvent::NotificationUpdated { .. }
            | SinkEvent::NotificationRemoved { .. }
            | SinkEvent::NotificationRestored { .. } => self.include_notifications,
            SinkEvent::Dropped { .. } => true,
        }
    }
}

/// Events pushed to sinks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkEvent {
    // --- Group Events ---
    /// A group was added or changed.
    GroupUpdated {
        group_id: GroupId,
        parameters: NotificationParameters,
    },

    /// A group was removed (after all of its notifications).
    GroupRemoved { group_id: GroupId },

    // --- Notification Events ---
    /// A notification was delivered or changed after delivery.
    NotificationUpdated { notification: Notification },

    /// A notification was removed.
    NotificationRemoved { notification_id: NotificationId },

    /// A notification came back from the journal at startup.
    NotificationRestored { notification: Notification },

    // --- Lifecycle Events ---
    /// This sink was dropped.
    Dropped { reason: DropReason },
}

impl SinkEvent {
    /// JSON encoding for transports that carry text.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Why a sink was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Receiver went away.
    Disconnected,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SinkId(pub u64);

/// Receiving end of a sink.
pub struct SinkHandle {
    pub id: SinkId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<SinkEvent>,
}

impl SinkHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<SinkEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<SinkEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> std::result::Result<SinkEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Take every event that is already buffered.
    pub fn drain(&self) -> Vec<SinkEvent> {
        self.receiver.try_iter().collect()
    }
}
