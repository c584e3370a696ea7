// Data service boundary and its local implementation

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::changes::{ChangeHub, Subscription, SubscriptionHandle};
use crate::error::ServiceError;
use crate::filter::Query;
use crate::models::{ChangeEvent, ChangeKind, NewTask, PriorityUpdate, Task, TaskPatch};
use crate::store::{MAX_TITLE_LEN, Store};

/// CRUD and change subscription over the `tasks` collection.
///
/// Writes name the owner explicitly; a write against another owner's task
/// fails with [`ServiceError::NotFound`].
#[async_trait]
pub trait DataService: Send + Sync {
    /// All of the query owner's tasks, ordered as requested
    async fn query(&self, query: &Query) -> Result<Vec<Task>, ServiceError>;

    async fn insert(&self, task: NewTask) -> Result<Task, ServiceError>;

    async fn update(&self, owner_id: &str, id: &str, patch: TaskPatch) -> Result<(), ServiceError>;

    async fn delete(&self, owner_id: &str, id: &str) -> Result<(), ServiceError>;

    /// Write several priorities at once.
    ///
    /// The default issues one independent update per row; services that can
    /// should override this with a single atomic write.
    async fn update_priorities(&self, owner_id: &str, updates: &[PriorityUpdate]) -> Result<(), ServiceError> {
        apply_priorities_individually(self, owner_id, updates).await
    }

    /// Start receiving change events for one owner
    fn subscribe(&self, owner_id: &str) -> Result<Subscription, ServiceError>;

    fn unsubscribe(&self, handle: SubscriptionHandle);
}

/// Issue one priority update per row.
///
/// Every row is attempted even after a failure; the first error is returned.
/// Rows that succeeded stay written.
pub async fn apply_priorities_individually<S>(
    service: &S,
    owner_id: &str,
    updates: &[PriorityUpdate],
) -> Result<(), ServiceError>
where
    S: DataService + ?Sized,
{
    let mut first_error = None;
    for update in updates {
        if let Err(e) = service
            .update(owner_id, &update.id, TaskPatch::priority(update.priority))
            .await
        {
            debug!(id = %update.id, error = %e, "Priority write failed");
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Data service backed by a local JSONL + SQLite store
pub struct LocalDataService {
    store: Mutex<Store>,
    hub: ChangeHub,
}

impl LocalDataService {
    pub fn open<P: AsRef<Path>>(path: P) -> eyre::Result<Self> {
        Ok(Self::new(Store::open(path)?))
    }

    pub fn new(store: Store) -> Self {
        Self {
            store: Mutex::new(store),
            hub: ChangeHub::new(),
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    /// Rebuild the cache from the log
    pub fn sync(&self) -> eyre::Result<usize> {
        let count = self.store()?.sync()?;
        self.hub.publish_resync();
        Ok(count)
    }

    /// Pick up writes made by other processes.
    ///
    /// Resyncs the cache if the log moved past it, then tells every
    /// subscriber to reload. Returns whether anything changed.
    pub fn poll_external(&self) -> eyre::Result<bool> {
        {
            let mut store = self.store()?;
            if !store.has_external_changes()? {
                return Ok(false);
            }
            if store.is_stale()? {
                store.sync()?;
            }
            store.acknowledge_external_changes()?;
        }
        let notified = self.hub.publish_resync();
        info!(notified, "Picked up external task changes");
        Ok(true)
    }

    fn store(&self) -> eyre::Result<MutexGuard<'_, Store>> {
        self.store
            .lock()
            .map_err(|_| eyre::eyre!("Task store lock poisoned"))
    }

    fn store_for_service(&self) -> Result<MutexGuard<'_, Store>, ServiceError> {
        self.store().map_err(ServiceError::backend)
    }
}

fn check_title(title: &str) -> Result<(), ServiceError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ServiceError::Invalid("title cannot be empty".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ServiceError::Invalid(format!("title longer than {} characters", MAX_TITLE_LEN)));
    }
    Ok(())
}

#[async_trait]
impl DataService for LocalDataService {
    async fn query(&self, query: &Query) -> Result<Vec<Task>, ServiceError> {
        self.store_for_service()?.query(query).map_err(ServiceError::backend)
    }

    async fn insert(&self, task: NewTask) -> Result<Task, ServiceError> {
        check_title(&task.title)?;
        let task = self.store_for_service()?.insert(task).map_err(ServiceError::backend)?;
        self.hub.publish(ChangeEvent::row(ChangeKind::Insert, &task));
        Ok(task)
    }

    async fn update(&self, owner_id: &str, id: &str, patch: TaskPatch) -> Result<(), ServiceError> {
        if let Some(title) = &patch.title {
            check_title(title)?;
        }
        let task = self
            .store_for_service()?
            .update(owner_id, id, &patch)
            .map_err(ServiceError::backend)?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;
        self.hub.publish(ChangeEvent::row(ChangeKind::Update, &task));
        Ok(())
    }

    async fn delete(&self, owner_id: &str, id: &str) -> Result<(), ServiceError> {
        let removed = self
            .store_for_service()?
            .delete(owner_id, id)
            .map_err(ServiceError::backend)?;
        // Deleting a missing row is not an error, but nothing changed
        if let Some(task) = removed {
            self.hub.publish(ChangeEvent::row(ChangeKind::Delete, &task));
        }
        Ok(())
    }

    async fn update_priorities(&self, owner_id: &str, updates: &[PriorityUpdate]) -> Result<(), ServiceError> {
        let changed = self
            .store_for_service()?
            .update_priorities(owner_id, updates)
            .map_err(ServiceError::backend)?;
        for task in &changed {
            self.hub.publish(ChangeEvent::row(ChangeKind::Update, task));
        }
        Ok(())
    }

    fn subscribe(&self, owner_id: &str) -> Result<Subscription, ServiceError> {
        if owner_id.trim().is_empty() {
            return Err(ServiceError::Invalid("owner id cannot be empty".to_string()));
        }
        Ok(self.hub.subscribe(owner_id))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.hub.unsubscribe(handle);
    }
}
