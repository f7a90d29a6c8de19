//! Event-type store trait and in-memory implementation.

use crate::error::Result;
use crate::params::{NotificationParameters, ParamValue};
use std::collections::BTreeMap;

/// A change reported by an event-type store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventTypeChange {
    /// Defaults for the event type were added or changed.
    Modified(String),
    /// The event type no longer exists.
    Uninstalled(String),
}

/// Read access to event-type defaults plus a change feed.
pub trait EventTypeStore {
    /// Every key that has a default for `event_type`.
    fn all_keys(&self, event_type: &str) -> Vec<String>;

    /// The default for `key`, if `event_type` defines one.
    fn value(&self, event_type: &str, key: &str) -> Option<ParamValue>;

    fn contains(&self, event_type: &str, key: &str) -> bool {
        self.value(event_type, key).is_some()
    }

    /// All defaults of an event type as a parameter set.
    fn defaults(&self, event_type: &str) -> NotificationParameters {
        self.all_keys(event_type)
            .into_iter()
            .filter_map(|key| {
                let value = self.value(event_type, &key)?;
                Some((key, value))
            })
            .collect()
    }

    /// Changes since the previous call, oldest first.
    fn refresh(&mut self) -> Result<Vec<EventTypeChange>> {
        Ok(Vec::new())
    }
}

/// Event types held in memory. Installs and uninstalls are recorded and
/// handed out by `refresh`.
#[derive(Debug, Default)]
pub struct MemoryEventTypeStore {
    types: BTreeMap<String, NotificationParameters>,
    changes: Vec<EventTypeChange>,
}

impl MemoryEventTypeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style install that does not record a change.
    pub fn with_type(mut self, event_type: &str, defaults: NotificationParameters) -> Self {
        self.types.insert(event_type.to_string(), defaults);
        self
    }

    /// Add or replace an event type.
    pub fn install(&mut self, event_type: &str, defaults: NotificationParameters) {
        self.types.insert(event_type.to_string(), defaults);
        self.changes
            .push(EventTypeChange::Modified(event_type.to_string()));
    }

    /// Remove an event type. Returns false if it was not installed.
    pub fn uninstall(&mut self, event_type: &str) -> bool {
        if self.types.remove(event_type).is_some() {
            self.changes
                .push(EventTypeChange::Uninstalled(event_type.to_string()));
            true
        } else {
            false
        }
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

impl EventTypeStore for MemoryEventTypeStore {
    fn all_keys(&self, event_type: &str) -> Vec<String> {
        self.types
            .get(event_type)
            .map(|params| params.keys().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn value(&self, event_type: &str, key: &str) -> Option<ParamValue> {
        self.types.get(event_type)?.get(key).cloned()
    }

    fn refresh(&mut self) -> Result<Vec<EventTypeChange>> {
        Ok(std::mem::take(&mut self.changes))
    }
}
