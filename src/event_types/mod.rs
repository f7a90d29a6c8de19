//! Event-type defaults.
//!
//! An event type names a category of notifications and supplies default
//! parameters for it. Stores report changes as `EventTypeChange`s which the
//! manager folds back into existing notifications and groups:
//! - `Modified`: effective parameters are recomputed
//! - `Uninstalled`: every notification and group of that type is removed
//!
//! # Example
//!
//! ```ignore
//! let mut store = MemoryEventTypeStore::new();
//! store.install("email", NotificationParameters::new().with("class", "app"));
//!
//! assert!(store.contains("email", "class"));
//! assert_eq!(store.refresh()?, vec![EventTypeChange::Modified("email".into())]);
//! ```

mod file;
mod store;

pub use file::{FileEventTypeStore, DEFAULT_MAX_EVENT_TYPE_FILES};
pub use store::{EventTypeChange, EventTypeStore, MemoryEventTypeStore};
