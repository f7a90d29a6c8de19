//! The notification manager: containers, relay, persistence and event-type
//! propagation tied together.

use crate::error::{ManagerError, Result};
use crate::event_types::{EventTypeChange, EventTypeStore};
use crate::journal::{Journal, NotificationRecord, StartKind};
use crate::params::{NotificationParameters, CLASS_KEY, PERSISTENT_KEY, SYSTEM_CLASS, TIMESTAMP_KEY};
use crate::scheduler::{QueueEntry, RelayScheduler, Submission};
use crate::sinks::{SinkConfig, SinkEvent, SinkHandle, SinkRegistry};
use crate::types::{
    GroupId, Notification, NotificationGroup, NotificationId, NotificationKind, RelayInterval,
    Timestamp, UserId,
};
use fs2::FileExt;
use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Manager configuration.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Directory holding the state and notifications records.
    pub data_dir: PathBuf,

    /// Directory for the boot marker. Must be cleared on device boot.
    pub boot_marker_dir: PathBuf,

    /// How long a delivered notification holds the relay.
    pub relay_interval: RelayInterval,

    /// Wait queue capacity.
    pub max_wait_queue: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./notifications"),
            boot_marker_dir: std::env::temp_dir(),
            relay_interval: RelayInterval::default(),
            max_wait_queue: 100,
        }
    }
}

/// Work deferred until the current operation has finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingWork {
    RemoveNotification(NotificationId),
    RemoveGroup(GroupId),
}

/// What `restore` brought back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestoreSummary {
    pub start_kind: StartKind,
    pub groups: usize,
    pub notifications: usize,
    /// Non-persistent notifications discarded on a first start.
    pub discarded: usize,
}

/// Central broker between producers and sinks.
///
/// All methods run to completion on the caller's thread. Producer-facing
/// removals are deferred: they are queued and carried out by
/// `process_pending`.
pub struct NotificationManager<S: EventTypeStore> {
    config: ManagerConfig,

    /// Lock file for exclusive access to the data directory.
    _lock_file: File,

    event_types: S,
    journal: Journal,
    scheduler: RelayScheduler,
    sinks: Arc<SinkRegistry>,

    notifications: BTreeMap<NotificationId, Notification>,
    groups: BTreeMap<GroupId, NotificationGroup>,
    last_user_id: UserId,

    pending: VecDeque<PendingWork>,
}

impl<S: EventTypeStore> NotificationManager<S> {
    /// Create a manager with empty containers. Call `restore` once, after
    /// the sinks that should see restored entities have subscribed.
    pub fn new(config: ManagerConfig, event_types: S) -> Result<Self> {
        let journal = Journal::new(&config.data_dir, &config.boot_marker_dir);
        journal.ensure_dir()?;
        let lock_file = Self::acquire_lock(&config.data_dir)?;
        let scheduler = RelayScheduler::new(config.max_wait_queue);

        Ok(Self {
            config,
            _lock_file: lock_file,
            event_types,
            journal,
            scheduler,
            sinks: Arc::new(SinkRegistry::new()),
            notifications: BTreeMap::new(),
            groups: BTreeMap::new(),
            last_user_id: UserId(0),
            pending: VecDeque::new(),
        })
    }

    // --- Restoration ---

    /// Load groups and notifications from the journal.
    ///
    /// Groups come first, each announced with `GroupUpdated`. Notifications
    /// follow with `NotificationRestored`; on the first start after a boot
    /// only persistent ones are kept. The notifications record is rewritten
    /// afterwards so discarded ones are gone for good.
    ///
    /// Events are broadcast as they are produced. A sink whose buffer cannot
    /// hold the whole burst is dropped (see `SinkConfig::buffer_size`).
    pub fn restore(&mut self) -> RestoreSummary {
        let mut groups = 0;
        match self.journal.load_state() {
            Ok(Some(state)) => {
                self.last_user_id = state.last_user_id;
                for record in state.groups {
                    let group = NotificationGroup {
                        id: record.id,
                        user_id: record.user_id,
                        parameters: effective_parameters(&self.event_types, &record.parameters),
                        supplied: record.parameters,
                    };
                    self.sinks.broadcast(SinkEvent::GroupUpdated {
                        group_id: group.id,
                        parameters: group.parameters.clone(),
                    });
                    self.groups.insert(group.id, group);
                    groups += 1;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not read state record"),
        }

        let start_kind = self.journal.start_kind();
        let records = match self.journal.load_notifications() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "could not read notifications record");
                Vec::new()
            }
        };

        let mut notifications = 0;
        let mut discarded = 0;
        for record in records {
            let notification = self.notification_from_record(record);
            if start_kind == StartKind::FirstStart && !notification.is_persistent() {
                discarded += 1;
                continue;
            }
            self.sinks.broadcast(SinkEvent::NotificationRestored {
                notification: notification.clone(),
            });
            self.notifications.insert(notification.id, notification);
            notifications += 1;
        }

        self.persist_notifications();

        // Discarded transients may have been the newest in their group
        let group_ids: Vec<GroupId> = self.groups.keys().copied().collect();
        for id in group_ids {
            self.refresh_group_timestamp(Some(id));
        }

        let summary = RestoreSummary {
            start_kind,
            groups,
            notifications,
            discarded,
        };
        info!(?summary, "restored notification state");
        summary
    }

    fn notification_from_record(&self, record: NotificationRecord) -> Notification {
        Notification {
            id: record.id,
            group_id: record.group_id,
            user_id: record.user_id,
            parameters: effective_parameters(&self.event_types, &record.parameters),
            kind: record.kind,
            relay_interval: record.relay_interval,
            supplied: record.parameters,
        }
    }

    // --- Producer Operations ---

    /// Hand out a fresh user id and persist the counter.
    pub fn allocate_user_id(&mut self) -> UserId {
        let next = match self.last_user_id.0.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        self.last_user_id = UserId(next);
        self.persist_state();
        self.last_user_id
    }

    /// Add a notification, optionally into an existing group.
    ///
    /// The notification is stamped with a timestamp (unless one was
    /// supplied), classified, stored, persisted and offered to the relay.
    pub fn add_notification(
        &mut self,
        user: UserId,
        parameters: NotificationParameters,
        group: Option<GroupId>,
    ) -> Result<NotificationId> {
        if let Some(group_id) = group {
            if !self.groups.contains_key(&group_id) {
                return Err(ManagerError::InvalidGroupReference(group_id));
            }
        }

        let id = self.next_notification_id()?;

        let mut supplied = parameters;
        supplied.insert(TIMESTAMP_KEY, stamp(&supplied));
        let mut effective = effective_parameters(&self.event_types, &supplied);

        let kind = determine_kind(&effective);
        if kind == NotificationKind::SystemEvent {
            supplied.insert(PERSISTENT_KEY, false);
            effective.insert(PERSISTENT_KEY, false);
        }

        let notification = Notification {
            id,
            group_id: group,
            user_id: user,
            parameters: effective,
            kind,
            relay_interval: self.config.relay_interval,
            supplied,
        };
        self.notifications.insert(id, notification);
        debug!(id = %id, user = user.0, ?kind, "notification added");

        self.persist_notifications();
        self.submit(id);
        self.refresh_group_timestamp(group);

        Ok(id)
    }

    /// Merge new parameters into a notification.
    ///
    /// The timestamp is refreshed unless one is supplied. A notification
    /// still in the wait queue goes out with the new values when its turn
    /// comes; otherwise sinks get `NotificationUpdated` now.
    pub fn update_notification(
        &mut self,
        user: UserId,
        id: NotificationId,
        parameters: NotificationParameters,
    ) -> Result<()> {
        let Some(notification) = self.notifications.get_mut(&id) else {
            return Err(ManagerError::NotificationNotFound(id));
        };

        let mut incoming = parameters;
        incoming.insert(TIMESTAMP_KEY, stamp(&incoming));
        notification.supplied.merge(&incoming);
        if notification.kind == NotificationKind::SystemEvent {
            notification.supplied.insert(PERSISTENT_KEY, false);
        }
        notification.parameters = effective_parameters(&self.event_types, &notification.supplied);
        let group = notification.group_id;
        debug!(id = %id, user = user.0, "notification updated");

        self.persist_notifications();

        if !self.scheduler.is_queued(id) {
            if let Some(notification) = self.notifications.get(&id) {
                self.sinks.broadcast(SinkEvent::NotificationUpdated {
                    notification: notification.clone(),
                });
            }
        }

        self.refresh_group_timestamp(group);
        Ok(())
    }

    /// Request removal of a notification. The removal itself happens in
    /// `process_pending`.
    pub fn remove_notification(&mut self, user: UserId, id: NotificationId) -> Result<()> {
        if !self.notifications.contains_key(&id) {
            return Err(ManagerError::NotificationNotFound(id));
        }
        debug!(id = %id, user = user.0, "notification removal requested");
        self.pending.push_back(PendingWork::RemoveNotification(id));
        Ok(())
    }

    /// Create a group.
    pub fn add_group(&mut self, user: UserId, parameters: NotificationParameters) -> Result<GroupId> {
        let id = self.next_group_id()?;
        let group = NotificationGroup {
            id,
            user_id: user,
            parameters: effective_parameters(&self.event_types, &parameters),
            supplied: parameters,
        };
        let announced = group.parameters.clone();
        self.groups.insert(id, group);
        debug!(group = %id, user = user.0, "group added");

        self.persist_state();
        self.sinks.broadcast(SinkEvent::GroupUpdated {
            group_id: id,
            parameters: announced,
        });

        Ok(id)
    }

    /// Merge new parameters into a group.
    pub fn update_group(
        &mut self,
        user: UserId,
        id: GroupId,
        parameters: NotificationParameters,
    ) -> Result<()> {
        if !self.apply_group_update(id, &parameters) {
            return Err(ManagerError::GroupNotFound(id));
        }
        debug!(group = %id, user = user.0, "group updated");
        Ok(())
    }

    /// Request removal of a group and all of its notifications. The removal
    /// itself happens in `process_pending`.
    pub fn remove_group(&mut self, user: UserId, id: GroupId) -> Result<()> {
        if !self.groups.contains_key(&id) {
            return Err(ManagerError::GroupNotFound(id));
        }
        debug!(group = %id, user = user.0, "group removal requested");
        self.pending.push_back(PendingWork::RemoveGroup(id));
        Ok(())
    }

    // --- Sink Requests ---

    /// Queue a removal on behalf of a sink (e.g. the user dismissed it).
    pub fn request_removal(&mut self, id: NotificationId) {
        self.pending.push_back(PendingWork::RemoveNotification(id));
    }

    /// Remove every notification in a group, keeping the group. False if
    /// the group had no notifications.
    pub fn remove_notifications_in_group(&mut self, group: GroupId) -> bool {
        let ids = self.member_ids(group);
        !ids.is_empty() && self.remove_batch_now(&ids) == ids.len()
    }

    // --- Deferred Work ---

    /// Carry out deferred removals, including any queued while draining.
    /// Returns how many items were processed.
    pub fn process_pending(&mut self) -> usize {
        let mut processed = 0;
        while let Some(work) = self.pending.pop_front() {
            match work {
                PendingWork::RemoveNotification(id) => {
                    self.remove_notification_now(id);
                }
                PendingWork::RemoveGroup(id) => {
                    self.remove_group_now(id);
                }
            }
            processed += 1;
        }
        processed
    }

    /// Deferred removals not yet carried out.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Remove a notification immediately. A queued notification disappears
    /// silently; otherwise sinks get `NotificationRemoved`, and if it was
    /// in flight the relay moves on to the next one.
    pub fn remove_notification_now(&mut self, id: NotificationId) -> bool {
        let Some(removed) = self.notifications.remove(&id) else {
            return false;
        };
        debug!(id = %id, "notification removed");

        self.persist_notifications();

        if !self.scheduler.remove_queued(id) {
            self.sinks.broadcast(SinkEvent::NotificationRemoved {
                notification_id: id,
            });

            if self.scheduler.is_in_flight(id) {
                self.relay_next();
            }
        }

        self.refresh_group_timestamp(removed.group_id);
        true
    }

    /// Remove a group immediately: members first, then the group itself.
    /// Every member produces `NotificationRemoved` before `GroupRemoved`.
    pub fn remove_group_now(&mut self, id: GroupId) -> bool {
        if self.groups.remove(&id).is_none() {
            return false;
        }

        let members = self.member_ids(id);
        self.remove_batch_now(&members);

        self.persist_state();
        self.sinks.broadcast(SinkEvent::GroupRemoved { group_id: id });
        debug!(group = %id, "group removed");
        true
    }

    // --- Relay ---

    /// When the relay timer fires, if armed.
    pub fn relay_deadline(&self) -> Option<Instant> {
        self.scheduler.deadline()
    }

    /// Fire the relay timer now. No-op (false) if it is not armed.
    pub fn relay_timeout(&mut self) -> bool {
        if self.scheduler.deadline().is_none() {
            return false;
        }
        self.relay_next();
        true
    }

    /// Fire the relay timer if its deadline has passed.
    pub fn poll_relay_timer(&mut self, now: Instant) -> bool {
        if !self.scheduler.timer_due(now) {
            return false;
        }
        self.relay_next();
        true
    }

    /// The notification currently holding the relay.
    pub fn in_flight(&self) -> Option<NotificationId> {
        self.scheduler.in_flight()
    }

    /// Notifications waiting for the relay, in delivery order.
    pub fn wait_queue(&self) -> Vec<NotificationId> {
        self.scheduler.queued_ids()
    }

    fn submit(&mut self, id: NotificationId) {
        let Some(notification) = self.notifications.get(&id) else {
            return;
        };
        let entry = QueueEntry {
            id,
            kind: notification.kind,
            interval: notification.relay_interval,
        };

        match self.scheduler.submit(entry, Instant::now()) {
            Submission::Deliver => {
                debug!(id = %id, "relaying notification");
                self.sinks.broadcast(SinkEvent::NotificationUpdated {
                    notification: notification.clone(),
                });
            }
            Submission::Queued { position } => {
                debug!(id = %id, position, "notification waiting for relay");
            }
            Submission::Dropped => {}
        }
    }

    fn relay_next(&mut self) {
        while let Some(entry) = self.scheduler.advance() {
            if self.notifications.contains_key(&entry.id) {
                self.submit(entry.id);
                break;
            }
        }
    }

    // --- Event Types ---

    /// Recompute parameters of everything using `event_type` and push the
    /// results out as updates.
    pub fn event_type_modified(&mut self, event_type: &str) {
        let notifications: Vec<(UserId, NotificationId, NotificationParameters)> = self
            .notifications
            .values()
            .filter(|n| n.event_type().as_deref() == Some(event_type))
            .map(|n| (n.user_id, n.id, n.supplied.clone()))
            .collect();
        let groups: Vec<(UserId, GroupId, NotificationParameters)> = self
            .groups
            .values()
            .filter(|g| g.event_type().as_deref() == Some(event_type))
            .map(|g| (g.user_id, g.id, g.supplied.clone()))
            .collect();

        info!(
            event_type,
            notifications = notifications.len(),
            groups = groups.len(),
            "event type modified"
        );

        for (user, id, supplied) in notifications {
            if let Err(e) = self.update_notification(user, id, supplied) {
                warn!(id = %id, error = %e, "failed to re-apply event type");
            }
        }
        for (user, id, supplied) in groups {
            if let Err(e) = self.update_group(user, id, supplied) {
                warn!(group = %id, error = %e, "failed to re-apply event type");
            }
        }
    }

    /// Remove every notification and group using `event_type`.
    pub fn event_type_uninstalled(&mut self, event_type: &str) {
        let notifications: Vec<NotificationId> = self
            .notifications
            .values()
            .filter(|n| n.event_type().as_deref() == Some(event_type))
            .map(|n| n.id)
            .collect();
        let groups: Vec<GroupId> = self
            .groups
            .values()
            .filter(|g| g.event_type().as_deref() == Some(event_type))
            .map(|g| g.id)
            .collect();

        info!(
            event_type,
            notifications = notifications.len(),
            groups = groups.len(),
            "event type uninstalled"
        );

        // Members of doomed groups must not be relayed in between either
        let mut doomed = notifications.clone();
        for group in &groups {
            doomed.extend(self.member_ids(*group));
        }
        self.withdraw_from_relay(&doomed);

        self.remove_batch_now(&notifications);
        for id in groups {
            self.remove_group_now(id);
        }
    }

    /// Dispatch one store change to `event_type_modified` or
    /// `event_type_uninstalled`.
    pub fn apply_event_type_change(&mut self, change: &EventTypeChange) {
        match change {
            EventTypeChange::Modified(event_type) => self.event_type_modified(event_type),
            EventTypeChange::Uninstalled(event_type) => self.event_type_uninstalled(event_type),
        }
    }

    /// Pull changes from the event-type store and apply them in order.
    /// Returns the number of changes applied.
    pub fn refresh_event_types(&mut self) -> Result<usize> {
        let changes = self.event_types.refresh()?;
        for change in &changes {
            self.apply_event_type_change(change);
        }
        Ok(changes.len())
    }

    /// The event-type store defaults are read from.
    pub fn event_types(&self) -> &S {
        &self.event_types
    }

    /// Mutable access for stores that are edited in-process. Edits take
    /// effect on the next `refresh_event_types`.
    pub fn event_types_mut(&mut self) -> &mut S {
        &mut self.event_types
    }

    // --- Queries ---

    /// Look up a notification by id.
    pub fn notification(&self, id: NotificationId) -> Option<&Notification> {
        self.notifications.get(&id)
    }

    /// Look up a group by id.
    pub fn group(&self, id: GroupId) -> Option<&NotificationGroup> {
        self.groups.get(&id)
    }

    /// All notifications in ascending id order.
    pub fn notifications(&self) -> impl Iterator<Item = &Notification> {
        self.notifications.values()
    }

    /// All groups in ascending id order.
    pub fn groups(&self) -> impl Iterator<Item = &NotificationGroup> {
        self.groups.values()
    }

    /// Ids of every notification owned by `user`.
    pub fn notification_ids(&self, user: UserId) -> Vec<NotificationId> {
        self.notifications
            .values()
            .filter(|n| n.user_id == user)
            .map(|n| n.id)
            .collect()
    }

    /// Copies of every notification owned by `user`.
    pub fn notifications_for_user(&self, user: UserId) -> Vec<Notification> {
        self.notifications
            .values()
            .filter(|n| n.user_id == user)
            .cloned()
            .collect()
    }

    /// Copies of every group owned by `user`.
    pub fn groups_for_user(&self, user: UserId) -> Vec<NotificationGroup> {
        self.groups
            .values()
            .filter(|g| g.user_id == user)
            .cloned()
            .collect()
    }

    /// Notifications of `user` in `group`.
    pub fn notification_count_in_group(&self, user: UserId, group: GroupId) -> usize {
        self.notifications
            .values()
            .filter(|n| n.group_id == Some(group) && n.user_id == user)
            .count()
    }

    /// Number of stored notifications.
    pub fn notification_count(&self) -> usize {
        self.notifications.len()
    }

    /// Number of stored groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Most recently allocated user id (0 before the first allocation).
    pub fn last_user_id(&self) -> UserId {
        self.last_user_id
    }

    // --- Sinks ---

    /// Shared sink registry; subscribe from any thread.
    pub fn sinks(&self) -> Arc<SinkRegistry> {
        Arc::clone(&self.sinks)
    }

    /// Register a sink on the shared registry.
    pub fn subscribe(&self, config: SinkConfig) -> SinkHandle {
        self.sinks.subscribe(config)
    }

    /// Configuration the manager was created with.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Directory holding the journal records and the lock file.
    pub fn data_dir(&self) -> &Path {
        self.journal.dir()
    }

    // --- Private Helpers ---

    fn apply_group_update(&mut self, id: GroupId, parameters: &NotificationParameters) -> bool {
        let Some(group) = self.groups.get_mut(&id) else {
            return false;
        };
        group.supplied.merge(parameters);
        group.parameters = effective_parameters(&self.event_types, &group.supplied);
        let announced = group.parameters.clone();

        self.persist_state();
        self.sinks.broadcast(SinkEvent::GroupUpdated {
            group_id: id,
            parameters: announced,
        });
        true
    }

    fn member_ids(&self, group: GroupId) -> Vec<NotificationId> {
        self.notifications
            .values()
            .filter(|n| n.group_id == Some(group))
            .map(|n| n.id)
            .collect()
    }

    /// Take these notifications out of the wait queue so removing an
    /// in-flight one cannot relay another of them.
    fn withdraw_from_relay(&mut self, ids: &[NotificationId]) {
        for id in ids {
            self.scheduler.remove_queued(*id);
        }
    }

    /// Remove a set of notifications, each with `NotificationRemoved`.
    /// Returns how many existed.
    fn remove_batch_now(&mut self, ids: &[NotificationId]) -> usize {
        self.withdraw_from_relay(ids);

        let mut removed = 0;
        for id in ids {
            if self.remove_notification_now(*id) {
                removed += 1;
            }
        }
        removed
    }

    /// Set a group's timestamp to its newest member's (0 with no members).
    fn refresh_group_timestamp(&mut self, group: Option<GroupId>) {
        let Some(id) = group else {
            return;
        };
        let Some(current) = self.groups.get(&id).map(NotificationGroup::timestamp) else {
            return;
        };

        let newest = self
            .notifications
            .values()
            .filter(|n| n.group_id == Some(id))
            .map(Notification::timestamp)
            .max()
            .unwrap_or(0);

        if current != newest {
            let update = NotificationParameters::new().with(TIMESTAMP_KEY, newest);
            self.apply_group_update(id, &update);
        }
    }

    fn next_notification_id(&self) -> Result<NotificationId> {
        (1..=u32::MAX)
            .map(NotificationId)
            .find(|id| !self.notifications.contains_key(id))
            .ok_or(ManagerError::IdsExhausted)
    }

    fn next_group_id(&self) -> Result<GroupId> {
        (1..=u32::MAX)
            .map(GroupId)
            .find(|id| !self.groups.contains_key(id))
            .ok_or(ManagerError::IdsExhausted)
    }

    fn persist_notifications(&self) {
        if let Err(e) = self.journal.save_notifications(self.notifications.values()) {
            warn!(error = %e, "failed to save notifications record");
        }
    }

    fn persist_state(&self) {
        if let Err(e) = self.journal.save_state(self.last_user_id, self.groups.values()) {
            warn!(error = %e, "failed to save state record");
        }
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| ManagerError::Locked)?;

        Ok(lock_file)
    }
}

/// Event-type defaults with the supplied parameters merged over them.
fn effective_parameters<S: EventTypeStore>(
    event_types: &S,
    supplied: &NotificationParameters,
) -> NotificationParameters {
    match supplied.event_type() {
        Some(event_type) => event_types.defaults(&event_type).overlaid_with(supplied),
        None => supplied.clone(),
    }
}

fn determine_kind(parameters: &NotificationParameters) -> NotificationKind {
    if parameters.get_string(CLASS_KEY).as_deref() == Some(SYSTEM_CLASS) {
        NotificationKind::SystemEvent
    } else {
        NotificationKind::ApplicationEvent
    }
}

/// The supplied timestamp, or now when it is missing or zero.
fn stamp(parameters: &NotificationParameters) -> u64 {
    match parameters.timestamp() {
        0 => Timestamp::now().0,
        supplied => supplied,
    }
}
