//! Event types loaded from a directory of `.conf` files.
//!
//! Each `<event-type>.conf` file holds `key=value` lines. Lines starting with
//! `#` and blank lines are ignored. Values are typed with
//! `ParamValue::parse_text`.

use crate::error::Result;
use crate::params::{NotificationParameters, ParamValue};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::store::{EventTypeChange, EventTypeStore};

/// Default upper bound on configuration files read from the directory.
pub const DEFAULT_MAX_EVENT_TYPE_FILES: usize = 100;

/// File extension of event-type definitions.
const CONF_EXTENSION: &str = "conf";

/// Event types backed by a configuration directory.
pub struct FileEventTypeStore {
    dir: PathBuf,
    max_files: usize,
    types: BTreeMap<String, NotificationParameters>,
}

impl FileEventTypeStore {
    /// Load every definition in `dir`. A missing directory yields an empty
    /// store that picks up files once the directory appears.
    pub fn open(dir: impl AsRef<Path>, max_files: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let types = Self::scan(&dir, max_files)?;
        debug!(dir = %dir.display(), count = types.len(), "loaded event types");
        Ok(Self {
            dir,
            max_files,
            types,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    fn scan(dir: &Path, max_files: usize) -> Result<BTreeMap<String, NotificationParameters>> {
        let mut types = BTreeMap::new();
        if !dir.exists() {
            return Ok(types);
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|e| e.to_str()) == Some(CONF_EXTENSION)
            })
            .collect();
        paths.sort();

        if paths.len() > max_files {
            warn!(
                dir = %dir.display(),
                found = paths.len(),
                max_files,
                "too many event type files, ignoring the rest"
            );
            paths.truncate(max_files);
        }

        for path in paths {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match fs::read_to_string(&path) {
                Ok(content) => {
                    types.insert(name.to_string(), parse_conf(&content));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable event type file");
                }
            }
        }

        Ok(types)
    }
}

/// Parse `key=value` lines into a parameter set.
fn parse_conf(content: &str) -> NotificationParameters {
    let mut params = NotificationParameters::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if !key.is_empty() {
                params.insert(key, ParamValue::parse_text(value));
            }
        }
    }
    params
}

impl EventTypeStore for FileEventTypeStore {
    fn all_keys(&self, event_type: &str) -> Vec<String> {
        self.types
            .get(event_type)
            .map(|params| params.keys().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn value(&self, event_type: &str, key: &str) -> Option<ParamValue> {
        self.types.get(event_type)?.get(key).cloned()
    }

    /// Re-read the directory and diff against what was loaded before.
    fn refresh(&mut self) -> Result<Vec<EventTypeChange>> {
        let fresh = Self::scan(&self.dir, self.max_files)?;
        let mut changes = Vec::new();

        for name in self.types.keys() {
            if !fresh.contains_key(name) {
                changes.push(EventTypeChange::Uninstalled(name.clone()));
            }
        }
        for (name, params) in &fresh {
            if self.types.get(name) != Some(params) {
                changes.push(EventTypeChange::Modified(name.clone()));
            }
        }

        if !changes.is_empty() {
            debug!(count = changes.len(), "event types changed on disk");
        }
        self.types = fresh;
        Ok(changes)
    }
}
