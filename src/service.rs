//! Runs a `NotificationManager` on its own thread.
//!
//! Producers and sinks talk to the thread through a cloneable
//! `ManagerHandle`. The loop waits on three sources at once:
//! - Requests from handles
//! - The relay timer, when armed
//! - An optional event-type refresh ticker
//!
//! Deferred removals are carried out after every wake-up, so a removal
//! requested by one call is visible to the next.

use crate::error::{ManagerError, Result};
use crate::event_types::EventTypeStore;
use crate::manager::NotificationManager;
use crate::params::NotificationParameters;
use crate::sinks::{SinkConfig, SinkHandle, SinkRegistry};
use crate::types::{GroupId, Notification, NotificationGroup, NotificationId, UserId};
use crossbeam_channel::{at, bounded, never, select, tick, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Service thread configuration.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// How often to poll the event-type store for changes (`None` = never).
    /// Default: 5 seconds
    pub event_type_refresh: Option<Duration>,

    /// Requests that may wait before callers block.
    /// Default: 256
    pub request_buffer: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            event_type_refresh: Some(Duration::from_secs(5)),
            request_buffer: 256,
        }
    }
}

type Job<S> = Box<dyn FnOnce(&mut NotificationManager<S>) + Send>;

enum Request<S: EventTypeStore> {
    Run(Job<S>),
    Shutdown,
}

/// Spawns the service thread.
pub struct ManagerService;

impl ManagerService {
    /// Move `manager` onto a new thread. Restore it first if restored state
    /// is wanted; sinks may subscribe before or after.
    pub fn spawn<S>(manager: NotificationManager<S>, config: ServiceConfig) -> Result<ManagerHandle<S>>
    where
        S: EventTypeStore + Send + 'static,
    {
        let (requests, receiver) = bounded(config.request_buffer);
        let sinks = manager.sinks();

        let thread = thread::Builder::new()
            .name("notification-manager".to_string())
            .spawn(move || run_loop(manager, receiver, config))?;

        info!("notification manager service started");

        Ok(ManagerHandle {
            requests,
            sinks,
            thread: Arc::new(Mutex::new(Some(thread))),
        })
    }
}

fn run_loop<S: EventTypeStore>(
    mut manager: NotificationManager<S>,
    requests: Receiver<Request<S>>,
    config: ServiceConfig,
) -> NotificationManager<S> {
    let refresh = match config.event_type_refresh {
        Some(period) => tick(period),
        None => never(),
    };

    loop {
        let relay_timer = match manager.relay_deadline() {
            Some(deadline) => at(deadline),
            None => never(),
        };

        select! {
            recv(requests) -> request => match request {
                Ok(Request::Run(job)) => job(&mut manager),
                Ok(Request::Shutdown) | Err(_) => break,
            },
            recv(relay_timer) -> fired => {
                if let Ok(now) = fired {
                    manager.poll_relay_timer(now);
                }
            },
            recv(refresh) -> _ => {
                match manager.refresh_event_types() {
                    Ok(0) => {}
                    Ok(changes) => debug!(changes, "applied event type changes"),
                    Err(e) => warn!(error = %e, "event type refresh failed"),
                }
            },
        }

        manager.process_pending();
    }

    manager.process_pending();
    info!("notification manager service stopped");
    manager
}

/// Cloneable handle to a running service.
pub struct ManagerHandle<S: EventTypeStore> {
    requests: Sender<Request<S>>,
    sinks: Arc<SinkRegistry>,
    thread: Arc<Mutex<Option<JoinHandle<NotificationManager<S>>>>>,
}

impl<S: EventTypeStore> Clone for ManagerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            requests: self.requests.clone(),
            sinks: Arc::clone(&self.sinks),
            thread: Arc::clone(&self.thread),
        }
    }
}

impl<S: EventTypeStore + 'static> ManagerHandle<S> {
    /// Run `f` on the service thread and wait for its result.
    pub fn execute<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut NotificationManager<S>) -> R + Send + 'static,
    {
        let (reply, response) = bounded(1);
        let job: Job<S> = Box::new(move |manager| {
            let _ = reply.send(f(manager));
        });

        self.requests
            .send(Request::Run(job))
            .map_err(|_| ManagerError::ServiceStopped)?;
        response.recv().map_err(|_| ManagerError::ServiceStopped)
    }

    /// Queue `f` without waiting for it.
    fn post<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut NotificationManager<S>) + Send + 'static,
    {
        self.requests
            .send(Request::Run(Box::new(f)))
            .map_err(|_| ManagerError::ServiceStopped)
    }

    // --- Producer Operations ---

    pub fn allocate_user_id(&self) -> Result<UserId> {
        self.execute(|m| m.allocate_user_id())
    }

    pub fn add_notification(
        &self,
        user: UserId,
        parameters: NotificationParameters,
        group: Option<GroupId>,
    ) -> Result<NotificationId> {
        self.execute(move |m| m.add_notification(user, parameters, group))?
    }

    pub fn update_notification(
        &self,
        user: UserId,
        id: NotificationId,
        parameters: NotificationParameters,
    ) -> Result<()> {
        self.execute(move |m| m.update_notification(user, id, parameters))?
    }

    /// Returns once the removal is queued; it is carried out right after.
    pub fn remove_notification(&self, user: UserId, id: NotificationId) -> Result<()> {
        self.execute(move |m| m.remove_notification(user, id))?
    }

    pub fn add_group(&self, user: UserId, parameters: NotificationParameters) -> Result<GroupId> {
        self.execute(move |m| m.add_group(user, parameters))?
    }

    pub fn update_group(
        &self,
        user: UserId,
        id: GroupId,
        parameters: NotificationParameters,
    ) -> Result<()> {
        self.execute(move |m| m.update_group(user, id, parameters))?
    }

    pub fn remove_group(&self, user: UserId, id: GroupId) -> Result<()> {
        self.execute(move |m| m.remove_group(user, id))?
    }

    // --- Sink Requests ---

    /// A sink asks for a notification to go away (e.g. dismissed by the
    /// user). Unknown ids are ignored.
    pub fn request_removal(&self, id: NotificationId) -> Result<()> {
        self.post(move |m| m.request_removal(id))
    }

    /// A sink asks for every notification in a group to go away.
    pub fn clear_group(&self, group: GroupId) -> Result<bool> {
        self.execute(move |m| m.remove_notifications_in_group(group))
    }

    pub fn subscribe(&self, config: SinkConfig) -> SinkHandle {
        self.sinks.subscribe(config)
    }

    pub fn sinks(&self) -> Arc<SinkRegistry> {
        Arc::clone(&self.sinks)
    }

    // --- Queries ---

    pub fn notification(&self, id: NotificationId) -> Result<Option<Notification>> {
        self.execute(move |m| m.notification(id).cloned())
    }

    pub fn notification_ids(&self, user: UserId) -> Result<Vec<NotificationId>> {
        self.execute(move |m| m.notification_ids(user))
    }

    pub fn notifications_for_user(&self, user: UserId) -> Result<Vec<Notification>> {
        self.execute(move |m| m.notifications_for_user(user))
    }

    pub fn groups_for_user(&self, user: UserId) -> Result<Vec<NotificationGroup>> {
        self.execute(move |m| m.groups_for_user(user))
    }

    pub fn notification_count_in_group(&self, user: UserId, group: GroupId) -> Result<usize> {
        self.execute(move |m| m.notification_count_in_group(user, group))
    }

    /// Pull event-type changes now instead of waiting for the ticker.
    pub fn refresh_event_types(&self) -> Result<usize> {
        self.execute(|m| m.refresh_event_types())?
    }

    // --- Lifecycle ---

    /// Ask the loop to stop. Requests already queued are handled first.
    pub fn shutdown(&self) -> Result<()> {
        self.requests
            .send(Request::Shutdown)
            .map_err(|_| ManagerError::ServiceStopped)
    }

    /// Wait for the thread to exit and take the manager back. Only the
    /// first caller across all clones gets it.
    pub fn join(&self) -> Result<NotificationManager<S>> {
        let thread = self.thread.lock().take().ok_or(ManagerError::ServiceStopped)?;
        thread.join().map_err(|_| ManagerError::ServiceStopped)
    }

    /// Shut down and join in one step.
    pub fn stop(self) -> Result<NotificationManager<S>> {
        let started = Instant::now();
        self.shutdown()?;
        let manager = self.join()?;
        debug!(elapsed = ?started.elapsed(), "service joined");
        Ok(manager)
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .lock()
            .as_ref()
            .map_or(false, |thread| !thread.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_types::MemoryEventTypeStore;
    use crate::manager::ManagerConfig;
    use crate::params::{CLASS_KEY, EVENT_TYPE_KEY};
    use crate::sinks::SinkEvent;
    use crate::types::RelayInterval;
    use tempfile::TempDir;

    fn spawn(dir: &TempDir, interval: RelayInterval) -> ManagerHandle<MemoryEventTypeStore> {
        let config = ManagerConfig {
            data_dir: dir.path().join("data"),
            boot_marker_dir: dir.path().join("tmp"),
            relay_interval: interval,
            max_wait_queue: 10,
        };
        let manager = NotificationManager::new(config, MemoryEventTypeStore::new()).unwrap();
        let service = ServiceConfig {
            event_type_refresh: None,
            ..Default::default()
        };
        ManagerService::spawn(manager, service).unwrap()
    }

    fn app() -> NotificationParameters {
        NotificationParameters::new().with(CLASS_KEY, "app")
    }

    #[test]
    fn test_add_through_handle() {
        let dir = TempDir::new().unwrap();
        let handle = spawn(&dir, RelayInterval::Immediate);
        let sink = handle.subscribe(SinkConfig::default());

        let user = handle.allocate_user_id().unwrap();
        let id = handle.add_notification(user, app(), None).unwrap();

        let event = sink.recv_timeout(Duration::from_secs(1)).unwrap();
        match event {
            SinkEvent::NotificationUpdated { notification } => assert_eq!(notification.id, id),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(handle.notification_ids(user).unwrap(), vec![id]);

        let manager = handle.stop().unwrap();
        assert_eq!(manager.notification_count(), 1);
    }

    #[test]
    fn test_removal_visible_to_next_call() {
        let dir = TempDir::new().unwrap();
        let handle = spawn(&dir, RelayInterval::Immediate);

        let id = handle.add_notification(UserId(1), app(), None).unwrap();
        handle.remove_notification(UserId(1), id).unwrap();

        assert_eq!(handle.notification(id).unwrap(), None);
        handle.stop().unwrap();
    }

    #[test]
    fn test_sink_requests() {
        let dir = TempDir::new().unwrap();
        let handle = spawn(&dir, RelayInterval::Immediate);

        let group = handle.add_group(UserId(1), NotificationParameters::new()).unwrap();
        let single = handle.add_notification(UserId(1), app(), None).unwrap();
        handle.add_notification(UserId(1), app(), Some(group)).unwrap();
        handle.add_notification(UserId(1), app(), Some(group)).unwrap();

        handle.request_removal(single).unwrap();
        assert!(handle.clear_group(group).unwrap());

        assert!(handle.notification_ids(UserId(1)).unwrap().is_empty());
        assert_eq!(handle.groups_for_user(UserId(1)).unwrap().len(), 1);
        handle.stop().unwrap();
    }

    #[test]
    fn test_relay_timer_advances_queue() {
        let dir = TempDir::new().unwrap();
        let handle = spawn(&dir, RelayInterval::Timed(Duration::from_millis(20)));
        let sink = handle.subscribe(SinkConfig::default());

        let first = handle.add_notification(UserId(1), app(), None).unwrap();
        let second = handle.add_notification(UserId(1), app(), None).unwrap();

        let delivered: Vec<NotificationId> = (0..2)
            .filter_map(|_| match sink.recv_timeout(Duration::from_secs(2)) {
                Ok(SinkEvent::NotificationUpdated { notification }) => Some(notification.id),
                _ => None,
            })
            .collect();
        assert_eq!(delivered, vec![first, second]);

        handle.stop().unwrap();
    }

    #[test]
    fn test_event_type_refresh_via_handle() {
        let dir = TempDir::new().unwrap();
        let handle = spawn(&dir, RelayInterval::Immediate);

        handle
            .execute(|m| {
                m.event_types_mut()
                    .install("chat", NotificationParameters::new().with("icon", "a"));
            })
            .unwrap();
        let id = handle
            .add_notification(
                UserId(1),
                NotificationParameters::new().with(EVENT_TYPE_KEY, "chat"),
                None,
            )
            .unwrap();
        handle.refresh_event_types().unwrap();

        handle
            .execute(|m| {
                m.event_types_mut().uninstall("chat");
            })
            .unwrap();
        assert_eq!(handle.refresh_event_types().unwrap(), 1);
        assert_eq!(handle.notification(id).unwrap(), None);

        handle.stop().unwrap();
    }

    #[test]
    fn test_calls_after_shutdown_fail() {
        let dir = TempDir::new().unwrap();
        let handle = spawn(&dir, RelayInterval::Immediate);
        let other = handle.clone();

        handle.shutdown().unwrap();
        handle.join().unwrap();

        assert!(matches!(
            other.allocate_user_id(),
            Err(ManagerError::ServiceStopped)
        ));
        assert!(matches!(other.join(), Err(ManagerError::ServiceStopped)));
        assert!(!other.is_running());
    }
}
