//! Write-through persistence of manager state.
//!
//! Two records live in the data directory and are rewritten in full after
//! every relevant mutation:
//!
//! - `state.data`: last-used user id and every group
//! - `notifications.data`: every notification (deleted when there are none)
//!
//! Both start with a 4-byte magic and a format version, followed by frames of
//! `len (u32 LE) | MessagePack body | crc32 (u32 LE)`. Parameters are stored
//! as supplied; event-type defaults are re-applied on restore.
//!
//! A boot marker in a temporary directory tells a fresh device boot (marker
//! absent) from a process restart within the same boot (marker present).

use crate::error::{ManagerError, Result};
use crate::params::NotificationParameters;
use crate::types::{
    GroupId, Notification, NotificationGroup, NotificationId, NotificationKind, RelayInterval,
    UserId,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Magic bytes for the state record.
const STATE_MAGIC: &[u8; 4] = b"NMS\0";

/// Magic bytes for the notifications record.
const NOTIFICATIONS_MAGIC: &[u8; 4] = b"NMN\0";

/// Current record format version.
const JOURNAL_VERSION: u8 = 1;

/// Frames larger than this are treated as corruption.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

pub const STATE_FILE_NAME: &str = "state.data";
pub const NOTIFICATIONS_FILE_NAME: &str = "notifications.data";
pub const BOOT_MARKER_NAME: &str = "notification-manager.boot";

/// Persisted form of a group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: GroupId,
    pub user_id: UserId,
    pub parameters: NotificationParameters,
}

impl From<&NotificationGroup> for GroupRecord {
    fn from(group: &NotificationGroup) -> Self {
        Self {
            id: group.id,
            user_id: group.user_id,
            parameters: group.supplied.clone(),
        }
    }
}

/// Persisted form of a notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: NotificationId,
    pub group_id: Option<GroupId>,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub relay_interval: RelayInterval,
    pub parameters: NotificationParameters,
}

impl From<&Notification> for NotificationRecord {
    fn from(notification: &Notification) -> Self {
        Self {
            id: notification.id,
            group_id: notification.group_id,
            user_id: notification.user_id,
            kind: notification.kind,
            relay_interval: notification.relay_interval,
            parameters: notification.supplied.clone(),
        }
    }
}

/// Contents of the state record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateRecord {
    pub last_user_id: UserId,
    pub groups: Vec<GroupRecord>,
}

/// Whether this process started right after a device boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartKind {
    /// Boot marker was absent: only persistent notifications survive.
    FirstStart,
    /// Boot marker was present: everything stored is restored.
    SubsequentStart,
}

/// Reads and rewrites the persisted records.
#[derive(Debug)]
pub struct Journal {
    dir: PathBuf,
    boot_marker: PathBuf,
    start_kind: Option<StartKind>,
}

impl Journal {
    pub fn new(data_dir: impl AsRef<Path>, boot_marker_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: data_dir.as_ref().to_path_buf(),
            boot_marker: boot_marker_dir.as_ref().join(BOOT_MARKER_NAME),
            start_kind: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE_NAME)
    }

    pub fn notifications_path(&self) -> PathBuf {
        self.dir.join(NOTIFICATIONS_FILE_NAME)
    }

    pub fn boot_marker_path(&self) -> &Path {
        &self.boot_marker
    }

    /// Create the data directory if needed.
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Rewrite the state record.
    pub fn save_state<'a>(
        &self,
        last_user_id: UserId,
        groups: impl IntoIterator<Item = &'a NotificationGroup>,
    ) -> Result<()> {
        self.ensure_dir()?;
        let mut writer = Self::create(&self.state_path(), STATE_MAGIC)?;
        writer.write_all(&last_user_id.0.to_le_bytes())?;

        let mut count = 0usize;
        for group in groups {
            write_frame(&mut writer, &GroupRecord::from(group))?;
            count += 1;
        }
        Self::finish(writer)?;

        debug!(groups = count, last_user_id = last_user_id.0, "saved state record");
        Ok(())
    }

    /// Rewrite the notifications record, or delete it when there is nothing
    /// to store.
    pub fn save_notifications<'a>(
        &self,
        notifications: impl IntoIterator<Item = &'a Notification>,
    ) -> Result<()> {
        self.ensure_dir()?;
        let mut notifications = notifications.into_iter().peekable();
        let path = self.notifications_path();

        if notifications.peek().is_none() {
            match fs::remove_file(&path) {
                Ok(()) => debug!("removed empty notifications record"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(());
        }

        let mut writer = Self::create(&path, NOTIFICATIONS_MAGIC)?;
        let mut count = 0usize;
        for notification in notifications {
            write_frame(&mut writer, &NotificationRecord::from(notification))?;
            count += 1;
        }
        Self::finish(writer)?;

        debug!(notifications = count, "saved notifications record");
        Ok(())
    }

    /// Read the state record. `None` if it does not exist.
    pub fn load_state(&self) -> Result<Option<StateRecord>> {
        let Some(mut reader) = Self::open(&self.state_path(), STATE_MAGIC)? else {
            return Ok(None);
        };

        let mut user_bytes = [0u8; 4];
        reader.read_exact(&mut user_bytes)?;
        let last_user_id = UserId(u32::from_le_bytes(user_bytes));

        let groups = read_frames(&mut reader, STATE_FILE_NAME);
        Ok(Some(StateRecord {
            last_user_id,
            groups,
        }))
    }

    /// Read the notifications record. Empty if it does not exist.
    pub fn load_notifications(&self) -> Result<Vec<NotificationRecord>> {
        match Self::open(&self.notifications_path(), NOTIFICATIONS_MAGIC)? {
            Some(mut reader) => Ok(read_frames(&mut reader, NOTIFICATIONS_FILE_NAME)),
            None => Ok(Vec::new()),
        }
    }

    /// Decide (once per journal) whether this is the first start after boot.
    /// The first call creates the boot marker when it is missing.
    pub fn start_kind(&mut self) -> StartKind {
        if let Some(kind) = self.start_kind {
            return kind;
        }

        let kind = if self.boot_marker.exists() {
            StartKind::SubsequentStart
        } else {
            if let Err(e) = self.create_boot_marker() {
                warn!(
                    path = %self.boot_marker.display(),
                    error = %e,
                    "failed to create boot marker"
                );
            }
            StartKind::FirstStart
        };

        info!(?kind, "determined start kind");
        self.start_kind = Some(kind);
        kind
    }

    fn create_boot_marker(&self) -> Result<()> {
        if let Some(parent) = self.boot_marker.parent() {
            fs::create_dir_all(parent)?;
        }
        File::create(&self.boot_marker)?;
        Ok(())
    }

    fn create(path: &Path, magic: &[u8; 4]) -> Result<BufWriter<File>> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(magic)?;
        writer.write_all(&[JOURNAL_VERSION])?;
        Ok(writer)
    }

    fn finish(writer: BufWriter<File>) -> Result<()> {
        let file = writer
            .into_inner()
            .map_err(|e| ManagerError::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(())
    }

    fn open(path: &Path, magic: &[u8; 4]) -> Result<Option<BufReader<File>>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);

        let mut found = [0u8; 4];
        reader.read_exact(&mut found)?;
        if &found != magic {
            return Err(ManagerError::InvalidFormat(format!(
                "invalid magic in {}",
                path.display()
            )));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != JOURNAL_VERSION {
            return Err(ManagerError::InvalidFormat(format!(
                "unsupported version {} in {}",
                version[0],
                path.display()
            )));
        }

        Ok(Some(reader))
    }
}

fn write_frame<T: Serialize>(writer: &mut impl Write, value: &T) -> Result<()> {
    let encoded = rmp_serde::to_vec(value)?;

    let len = u32::try_from(encoded.len())
        .map_err(|_| ManagerError::Serialization("record too large".into()))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&encoded)?;
    writer.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;

    Ok(())
}

/// Read one frame. `Ok(None)` at a clean end of file.
fn read_frame<T: DeserializeOwned>(reader: &mut impl BufRead) -> Result<Option<T>> {
    if reader.fill_buf()?.is_empty() {
        return Ok(None);
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(ManagerError::Corruption(format!("frame of {len} bytes")));
    }

    let mut encoded = vec![0u8; len];
    reader.read_exact(&mut encoded)?;

    let mut checksum_bytes = [0u8; 4];
    reader.read_exact(&mut checksum_bytes)?;
    let expected = u32::from_le_bytes(checksum_bytes);
    let got = crc32fast::hash(&encoded);
    if expected != got {
        return Err(ManagerError::ChecksumMismatch { expected, got });
    }

    Ok(Some(rmp_serde::from_slice(&encoded)?))
}

/// Read frames until end of file. A damaged frame ends the read; whatever
/// came before it is kept.
fn read_frames<T: DeserializeOwned>(reader: &mut impl BufRead, name: &str) -> Vec<T> {
    let mut records = Vec::new();
    loop {
        match read_frame(reader) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => break,
            Err(e) => {
                warn!(
                    file = name,
                    error = %e,
                    kept = records.len(),
                    "stopped reading damaged record"
                );
                break;
            }
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn group(id: u32, user: u32) -> NotificationGroup {
        let params = NotificationParameters::new().with("title", format!("group {id}"));
        NotificationGroup {
            id: GroupId(id),
            user_id: UserId(user),
            parameters: params.clone(),
            supplied: params,
        }
    }

    fn notification(id: u32, group: Option<u32>) -> Notification {
        let params = NotificationParameters::new()
            .with("body", format!("n{id}"))
            .with("timestamp", 100i64 + i64::from(id));
        Notification {
            id: NotificationId(id),
            group_id: group.map(GroupId),
            user_id: UserId(7),
            parameters: params.clone(),
            kind: NotificationKind::ApplicationEvent,
            relay_interval: RelayInterval::Timed(Duration::from_millis(3000)),
            supplied: params,
        }
    }

    fn journal(dir: &TempDir) -> Journal {
        Journal::new(dir.path().join("data"), dir.path().join("tmp"))
    }

    #[test]
    fn test_state_roundtrip() {
        let dir = TempDir::new().unwrap();
        let journal = journal(&dir);
        let groups = vec![group(1, 3), group(2, 4)];

        journal.save_state(UserId(9), &groups).unwrap();
        let state = journal.load_state().unwrap().unwrap();

        assert_eq!(state.last_user_id, UserId(9));
        assert_eq!(state.groups.len(), 2);
        assert_eq!(state.groups[1].id, GroupId(2));
        assert_eq!(state.groups[1].user_id, UserId(4));
        assert_eq!(
            state.groups[0].parameters.get_string("title").as_deref(),
            Some("group 1")
        );
    }

    #[test]
    fn test_notifications_roundtrip() {
        let dir = TempDir::new().unwrap();
        let journal = journal(&dir);
        let notifications = vec![notification(1, None), notification(4, Some(2))];

        journal.save_notifications(&notifications).unwrap();
        let records = journal.load_notifications().unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0], NotificationRecord::from(&notifications[0]));
        assert_eq!(records[1].group_id, Some(GroupId(2)));
        assert_eq!(
            records[1].relay_interval,
            RelayInterval::Timed(Duration::from_millis(3000))
        );
    }

    #[test]
    fn test_empty_notifications_delete_file() {
        let dir = TempDir::new().unwrap();
        let journal = journal(&dir);

        journal.save_notifications(&[notification(1, None)]).unwrap();
        assert!(journal.notifications_path().exists());

        journal.save_notifications(&Vec::<Notification>::new()).unwrap();
        assert!(!journal.notifications_path().exists());

        // Deleting twice is fine
        journal.save_notifications(&Vec::<Notification>::new()).unwrap();
        assert!(journal.load_notifications().unwrap().is_empty());
    }

    #[test]
    fn test_missing_files() {
        let dir = TempDir::new().unwrap();
        let journal = journal(&dir);

        assert!(journal.load_state().unwrap().is_none());
        assert!(journal.load_notifications().unwrap().is_empty());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = TempDir::new().unwrap();
        let journal = journal(&dir);
        journal.ensure_dir().unwrap();
        fs::write(journal.state_path(), b"XXXX\x01\x00\x00\x00\x00").unwrap();

        assert!(matches!(
            journal.load_state(),
            Err(ManagerError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let dir = TempDir::new().unwrap();
        let journal = journal(&dir);
        journal.ensure_dir().unwrap();
        let mut bytes = NOTIFICATIONS_MAGIC.to_vec();
        bytes.push(JOURNAL_VERSION + 1);
        fs::write(journal.notifications_path(), bytes).unwrap();

        assert!(matches!(
            journal.load_notifications(),
            Err(ManagerError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_damaged_tail_keeps_prefix() {
        let dir = TempDir::new().unwrap();
        let journal = journal(&dir);
        journal
            .save_notifications(&[notification(1, None), notification(2, None)])
            .unwrap();

        // Flip the last byte (part of the second frame's checksum)
        let path = journal.notifications_path();
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let records = journal.load_notifications().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, NotificationId(1));
    }

    #[test]
    fn test_truncated_frame_keeps_prefix() {
        let dir = TempDir::new().unwrap();
        let journal = journal(&dir);
        journal
            .save_notifications(&[notification(1, None), notification(2, None)])
            .unwrap();

        let path = journal.notifications_path();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 6]).unwrap();

        assert_eq!(journal.load_notifications().unwrap().len(), 1);
    }

    #[test]
    fn test_boot_marker() {
        let dir = TempDir::new().unwrap();

        let mut first = journal(&dir);
        assert!(!first.boot_marker_path().exists());
        assert_eq!(first.start_kind(), StartKind::FirstStart);
        assert!(first.boot_marker_path().exists());
        // Decided once per journal
        assert_eq!(first.start_kind(), StartKind::FirstStart);

        let mut second = journal(&dir);
        assert_eq!(second.start_kind(), StartKind::SubsequentStart);
    }
}
