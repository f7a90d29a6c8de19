//! Sink registry for pushing lifecycle events to consumers.
//!
//! Every sink owns a bounded channel. After each committed mutation the
//! manager broadcasts events synchronously to every matching sink:
//! - Group updates and removals
//! - Notification deliveries, updates and removals
//! - Notifications restored at startup
//!
//! A sink that cannot keep up (full buffer) or has gone away is dropped.
//!
//! # Example
//!
//! ```ignore
//! let handle = manager.sinks().subscribe(SinkConfig::default());
//!
//! loop {
//!     match handle.recv() {
//!         Ok(SinkEvent::NotificationUpdated { notification }) => show(notification),
//!         Ok(SinkEvent::NotificationRemoved { notification_id }) => hide(notification_id),
//!         Ok(SinkEvent::Dropped { .. }) | Err(_) => break,
//!         Ok(_) => {}
//!     }
//! }
//! ```

mod registry;
mod types;

pub use registry::SinkRegistry;
pub use types::{DropReason, SinkConfig, SinkEvent, SinkFilter, SinkHandle, SinkId};
