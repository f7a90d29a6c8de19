//! # Notification Manager
//!
//! A broker between notification producers and the sinks that display
//! them. Producers add, update and remove notifications and groups; the
//! manager stores them, persists them, and relays them one at a time.
//!
//! ## Core Concepts
//!
//! - **Notifications**: Parameter sets owned by a user, optionally grouped
//! - **Groups**: Containers whose timestamp tracks their newest member
//! - **Relay**: One notification in flight, the rest in a bounded wait queue
//!   where system events jump ahead of application events
//! - **Event types**: Default parameters merged under what producers supply
//! - **Journal**: Write-through state and notification records, restored at
//!   startup; transient notifications are dropped after a device boot
//!
//! ## Example
//!
//! ```ignore
//! use notification_manager::{
//!     ManagerConfig, MemoryEventTypeStore, NotificationManager, NotificationParameters,
//!     SinkConfig,
//! };
//!
//! let mut manager = NotificationManager::new(
//!     ManagerConfig {
//!         data_dir: "./notifications".into(),
//!         ..Default::default()
//!     },
//!     MemoryEventTypeStore::new(),
//! )?;
//!
//! let sink = manager.subscribe(SinkConfig::default());
//! manager.restore();
//!
//! let user = manager.allocate_user_id();
//! let group = manager.add_group(user, NotificationParameters::new())?;
//! let id = manager.add_notification(
//!     user,
//!     NotificationParameters::new().with("summary", "New mail"),
//!     Some(group),
//! )?;
//!
//! // Removals are deferred
//! manager.remove_notification(user, id)?;
//! manager.process_pending();
//! ```

pub mod error;
pub mod event_types;
pub mod journal;
pub mod manager;
pub mod params;
pub mod scheduler;
pub mod service;
pub mod sinks;
pub mod types;

// Re-exports
pub use error::{ManagerError, Result};
pub use event_types::{
    EventTypeChange, EventTypeStore, FileEventTypeStore, MemoryEventTypeStore,
    DEFAULT_MAX_EVENT_TYPE_FILES,
};
pub use journal::{Journal, StartKind};
pub use manager::{ManagerConfig, NotificationManager, PendingWork, RestoreSummary};
pub use params::{NotificationParameters, ParamValue};
pub use scheduler::{QueueEntry, RelayScheduler, Submission};
pub use service::{ManagerHandle, ManagerService, ServiceConfig};
pub use sinks::{
    DropReason, SinkConfig, SinkEvent, SinkFilter, SinkHandle, SinkId, SinkRegistry,
};
pub use types::*;
