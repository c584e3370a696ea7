// Instrumented data service for unit tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::changes::{Subscription, SubscriptionHandle};
use crate::error::ServiceError;
use crate::filter::Query;
use crate::models::{NewTask, PriorityUpdate, Task, TaskPatch};
use crate::service::{DataService, LocalDataService, apply_priorities_individually};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub queries: usize,
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
    pub priority_batches: usize,
    pub subscribes: usize,
    pub unsubscribes: usize,
}

/// Wraps a [`LocalDataService`], counting calls and injecting failures
pub struct InstrumentedService {
    inner: LocalDataService,
    counts: Mutex<CallCounts>,
    priority_writes: Mutex<Vec<PriorityUpdate>>,
    fail_fetches: AtomicBool,
    fail_writes: AtomicBool,
    fail_subscribes: AtomicBool,
    fail_priority_ids: Mutex<Vec<String>>,
    batch_priorities: AtomicBool,
}

pub fn instrumented() -> (TempDir, Arc<InstrumentedService>) {
    let temp = TempDir::new().unwrap();
    let inner = LocalDataService::open(temp.path()).unwrap();
    (temp, Arc::new(InstrumentedService::new(inner)))
}

impl InstrumentedService {
    pub fn new(inner: LocalDataService) -> Self {
        Self {
            inner,
            counts: Mutex::new(CallCounts::default()),
            priority_writes: Mutex::new(Vec::new()),
            fail_fetches: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_subscribes: AtomicBool::new(false),
            fail_priority_ids: Mutex::new(Vec::new()),
            batch_priorities: AtomicBool::new(true),
        }
    }

    pub fn counts(&self) -> CallCounts {
        self.counts.lock().unwrap().clone()
    }

    /// Every priority written so far, in call order
    pub fn priority_writes(&self) -> Vec<PriorityUpdate> {
        self.priority_writes.lock().unwrap().clone()
    }

    pub fn reset_priority_writes(&self) {
        self.priority_writes.lock().unwrap().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscribes(&self, fail: bool) {
        self.fail_subscribes.store(fail, Ordering::SeqCst);
    }

    /// Make priority writes for this task fail
    pub fn fail_priority_for(&self, id: &str) {
        self.fail_priority_ids.lock().unwrap().push(id.to_string());
    }

    /// Use per-row priority writes instead of the transactional batch
    pub fn use_individual_priority_writes(&self) {
        self.batch_priorities.store(false, Ordering::SeqCst);
    }

    fn check_writes(&self) -> Result<(), ServiceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ServiceError::Backend("write rejected".to_string()));
        }
        Ok(())
    }

    fn check_priority(&self, id: &str) -> Result<(), ServiceError> {
        self.check_writes()?;
        if self.fail_priority_ids.lock().unwrap().iter().any(|f| f == id) {
            return Err(ServiceError::Backend(format!("priority write rejected for {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl DataService for InstrumentedService {
    async fn query(&self, query: &Query) -> Result<Vec<Task>, ServiceError> {
        self.counts.lock().unwrap().queries += 1;
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(ServiceError::Backend("connection refused".to_string()));
        }
        self.inner.query(query).await
    }

    async fn insert(&self, task: NewTask) -> Result<Task, ServiceError> {
        self.counts.lock().unwrap().inserts += 1;
        self.check_writes()?;
        self.inner.insert(task).await
    }

    async fn update(&self, owner_id: &str, id: &str, patch: TaskPatch) -> Result<(), ServiceError> {
        self.counts.lock().unwrap().updates += 1;
        if let Some(priority) = patch.priority {
            self.priority_writes.lock().unwrap().push(PriorityUpdate {
                id: id.to_string(),
                priority,
            });
            self.check_priority(id)?;
        } else {
            self.check_writes()?;
        }
        self.inner.update(owner_id, id, patch).await
    }

    async fn delete(&self, owner_id: &str, id: &str) -> Result<(), ServiceError> {
        self.counts.lock().unwrap().deletes += 1;
        self.check_writes()?;
        self.inner.delete(owner_id, id).await
    }

    async fn update_priorities(&self, owner_id: &str, updates: &[PriorityUpdate]) -> Result<(), ServiceError> {
        if !self.batch_priorities.load(Ordering::SeqCst) {
            return apply_priorities_individually(self, owner_id, updates).await;
        }
        self.counts.lock().unwrap().priority_batches += 1;
        self.priority_writes.lock().unwrap().extend_from_slice(updates);
        for update in updates {
            self.check_priority(&update.id)?;
        }
        self.inner.update_priorities(owner_id, updates).await
    }

    fn subscribe(&self, owner_id: &str) -> Result<Subscription, ServiceError> {
        self.counts.lock().unwrap().subscribes += 1;
        if self.fail_subscribes.load(Ordering::SeqCst) {
            return Err(ServiceError::Backend("realtime channel unavailable".to_string()));
        }
        self.inner.subscribe(owner_id)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.counts.lock().unwrap().unsubscribes += 1;
        self.inner.unsubscribe(handle);
    }
}
