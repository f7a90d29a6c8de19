//! Sink registry for broadcasting manager events.

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::types::{DropReason, SinkConfig, SinkEvent, SinkHandle, SinkId};

/// Internal sink state.
struct Sink {
    config: SinkConfig,
    sender: Sender<SinkEvent>,
}

impl Sink {
    /// Try to send an event. On failure, says why the sink must go.
    fn try_send(&self, event: SinkEvent) -> Result<(), DropReason> {
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DropReason::BufferOverflow),
            Err(TrySendError::Disconnected(_)) => Err(DropReason::Disconnected),
        }
    }
}

/// Holds the sinks and fans events out to them.
///
/// Shared between the manager thread and any thread that subscribes.
pub struct SinkRegistry {
    /// Active sinks by ID.
    sinks: RwLock<HashMap<SinkId, Sink>>,
    /// Counter for generating sink IDs.
    next_id: AtomicU64,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self {
            sinks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a sink. Events broadcast from now on reach it.
    pub fn subscribe(&self, config: SinkConfig) -> SinkHandle {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size);

        self.sinks.write().insert(id, Sink { config, sender });
        debug!(sink = id.0, "sink subscribed");

        SinkHandle { id, receiver }
    }

    /// Remove a sink.
    pub fn unsubscribe(&self, id: SinkId) {
        let mut sinks = self.sinks.write();
        if let Some(sink) = sinks.remove(&id) {
            // Best effort
            let _ = sink.sender.try_send(SinkEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.read().len()
    }

    /// Send an event to every matching sink. Sinks that fail to receive are
    /// dropped.
    pub fn broadcast(&self, event: SinkEvent) {
        let mut to_remove = Vec::new();

        {
            let sinks = self.sinks.read();
            for (id, sink) in sinks.iter() {
                if sink.config.filter.matches(&event) {
                    if let Err(reason) = sink.try_send(event.clone()) {
                        to_remove.push((*id, reason));
                    }
                }
            }
        }

        if !to_remove.is_empty() {
            let mut sinks = self.sinks.write();
            for (id, reason) in to_remove {
                if let Some(sink) = sinks.remove(&id) {
                    warn!(sink = id.0, ?reason, "dropping sink");
                    // Might fail, that's ok
                    let _ = sink.sender.try_send(SinkEvent::Dropped { reason });
                }
            }
        }
    }
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::NotificationParameters;
    use crate::sinks::SinkFilter;
    use crate::types::{GroupId, NotificationId};
    use std::time::Duration;

    fn removed(id: u32) -> SinkEvent {
        SinkEvent::NotificationRemoved {
            notification_id: NotificationId(id),
        }
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let registry = SinkRegistry::new();

        let handle = registry.subscribe(SinkConfig::default());
        assert_eq!(registry.sink_count(), 1);

        registry.unsubscribe(handle.id);
        assert_eq!(registry.sink_count(), 0);

        let event = handle.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(
            event,
            SinkEvent::Dropped {
                reason: DropReason::Unsubscribed
            }
        );
    }

    #[test]
    fn test_broadcast_reaches_every_sink() {
        let registry = SinkRegistry::new();
        let first = registry.subscribe(SinkConfig::default());
        let second = registry.subscribe(SinkConfig::default());

        registry.broadcast(removed(3));

        assert_eq!(first.drain(), vec![removed(3)]);
        assert_eq!(second.drain(), vec![removed(3)]);
    }

    #[test]
    fn test_filter_skips_other_events() {
        let registry = SinkRegistry::new();
        let groups_only = registry.subscribe(SinkConfig {
            filter: SinkFilter::groups(),
            ..Default::default()
        });

        registry.broadcast(removed(1));
        registry.broadcast(SinkEvent::GroupUpdated {
            group_id: GroupId(1),
            parameters: NotificationParameters::new(),
        });

        let events = groups_only.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SinkEvent::GroupUpdated { .. }));
    }

    #[test]
    fn test_drop_slow_sink() {
        let registry = SinkRegistry::new();
        let _handle = registry.subscribe(SinkConfig {
            buffer_size: 2,
            ..Default::default()
        });

        for i in 0..10 {
            registry.broadcast(removed(i));
        }

        assert_eq!(registry.sink_count(), 0);
    }

    #[test]
    fn test_drop_disconnected_sink() {
        let registry = SinkRegistry::new();
        let handle = registry.subscribe(SinkConfig::default());
        drop(handle);

        registry.broadcast(removed(1));
        assert_eq!(registry.sink_count(), 0);
    }

    #[test]
    fn test_event_json() {
        let json = removed(5).to_json().unwrap();
        assert_eq!(json, r#"{"type":"notification_removed","notification_id":5}"#);
    }
}
