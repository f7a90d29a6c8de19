//! Core types for the notification manager.

use crate::params::{NotificationParameters, PERSISTENT_KEY};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unique identifier for a notification. Never zero.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub u32);

impl fmt::Debug for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NotificationId({})", self.0)
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a notification group. Never zero.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u32);

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier handed out to producers by `allocate_user_id`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct UserId(pub u32);

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

/// Seconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_secs())
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Delivery class of a notification, fixed at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    /// `class = "system"`. Jumps ahead of application events in the wait
    /// queue and is never persistent.
    SystemEvent,
    ApplicationEvent,
}

/// How long a delivered notification keeps the relay busy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayInterval {
    /// Deliver and clear at once; the relay is never busy.
    Immediate,
    /// Busy until the timer fires (or the notification is removed).
    Timed(Duration),
    /// Busy until the in-flight notification is removed.
    UntilRemoved,
}

impl RelayInterval {
    /// Map a signed millisecond count: 0 is immediate, positive is timed,
    /// negative waits for removal.
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            0 => RelayInterval::Immediate,
            ms if ms > 0 => RelayInterval::Timed(Duration::from_millis(ms as u64)),
            _ => RelayInterval::UntilRemoved,
        }
    }

    /// Inverse of `from_millis`; `UntilRemoved` maps to -1.
    pub fn as_millis(&self) -> i64 {
        match self {
            RelayInterval::Immediate => 0,
            RelayInterval::Timed(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
            RelayInterval::UntilRemoved => -1,
        }
    }
}

impl Default for RelayInterval {
    fn default() -> Self {
        RelayInterval::Timed(Duration::from_millis(5000))
    }
}

/// A single notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,

    /// Owning group (`None` = ungrouped).
    pub group_id: Option<GroupId>,

    pub user_id: UserId,

    /// Effective parameters: event-type defaults with the supplied
    /// parameters merged over them.
    pub parameters: NotificationParameters,

    pub kind: NotificationKind,

    /// Relay interval stamped at creation.
    pub relay_interval: RelayInterval,

    /// What producers supplied plus manager-stamped fields.
    #[serde(skip)]
    pub(crate) supplied: NotificationParameters,
}

impl Notification {
    pub fn timestamp(&self) -> u64 {
        self.parameters.timestamp()
    }

    /// Persistent unless the effective parameters say otherwise.
    pub fn is_persistent(&self) -> bool {
        self.parameters.get_bool(PERSISTENT_KEY).unwrap_or(true)
    }

    pub fn event_type(&self) -> Option<String> {
        self.parameters.event_type()
    }

    /// The parameters as supplied, without event-type defaults.
    pub fn supplied_parameters(&self) -> &NotificationParameters {
        &self.supplied
    }
}

/// A group of related notifications.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationGroup {
    pub id: GroupId,
    pub user_id: UserId,
    /// Effective parameters, including the derived `timestamp`.
    pub parameters: NotificationParameters,
    #[serde(skip)]
    pub(crate) supplied: NotificationParameters,
}

impl NotificationGroup {
    /// Latest member timestamp (0 with no members).
    pub fn timestamp(&self) -> u64 {
        self.parameters.timestamp()
    }

    pub fn event_type(&self) -> Option<String> {
        self.parameters.event_type()
    }

    pub fn supplied_parameters(&self) -> &NotificationParameters {
        &self.supplied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_interval_from_millis() {
        assert_eq!(RelayInterval::from_millis(0), RelayInterval::Immediate);
        assert_eq!(
            RelayInterval::from_millis(250),
            RelayInterval::Timed(Duration::from_millis(250))
        );
        assert_eq!(RelayInterval::from_millis(-5), RelayInterval::UntilRemoved);
    }

    #[test]
    fn test_relay_interval_millis_roundtrip() {
        for ms in [0, 1, 5000, -1] {
            assert_eq!(RelayInterval::from_millis(ms).as_millis(), ms);
        }
    }

    #[test]
    fn test_persistent_defaults_true() {
        let notification = Notification {
            id: NotificationId(1),
            group_id: None,
            user_id: UserId(1),
            parameters: NotificationParameters::new(),
            kind: NotificationKind::ApplicationEvent,
            relay_interval: RelayInterval::default(),
            supplied: NotificationParameters::new(),
        };
        assert!(notification.is_persistent());

        let transient = Notification {
            parameters: NotificationParameters::new().with(PERSISTENT_KEY, false),
            ..notification
        };
        assert!(!transient.is_persistent());
    }

    #[test]
    fn test_timestamp_now_is_recent() {
        // 2020-01-01
        assert!(Timestamp::now().0 > 1_577_836_800);
    }
}
