// Task store: the owner's task list and the loop that keeps it in step with the data service

use std::sync::Arc;

use tracing::{debug, warn};

use crate::changes::Subscription;
use crate::error::{ServiceError, TodoError};
use crate::filter::Query;
use crate::models::{ChangeEvent, SortMode, Task};
use crate::reorder::PriorityWritePolicy;
use crate::service::DataService;

/// One in-flight refresh.
///
/// Obtained from [`TaskStore::begin_refresh`], fetched independently of the
/// store, and handed back to [`TaskStore::finish_refresh`].
#[derive(Debug, Clone)]
pub struct RefreshTicket {
    seq: u64,
    query: Query,
}

impl RefreshTicket {
    pub async fn fetch<S>(&self, service: &S) -> Result<Vec<Task>, ServiceError>
    where
        S: DataService + ?Sized,
    {
        service.query(&self.query).await
    }
}

/// Materialized, ordered view of one owner's tasks.
///
/// The list is always rebuilt by a full query, never patched. Every change
/// notification (this client's own writes included) triggers a refresh, and
/// refreshes are sequence-numbered so a slow fetch cannot overwrite a newer one.
pub struct TaskStore<S: DataService> {
    pub(crate) service: Arc<S>,
    pub(crate) owner_id: String,
    pub(crate) sort: SortMode,
    pub(crate) tasks: Vec<Task>,
    pub(crate) priority_writes: PriorityWritePolicy,
    subscription: Option<Subscription>,
    in_flight: usize,
    issued_seq: u64,
    applied_seq: u64,
    last_error: Option<TodoError>,
}

impl<S: DataService> TaskStore<S> {
    /// Create an unmounted store; nothing is fetched until [`mount`](Self::mount)
    pub fn new(service: Arc<S>, owner_id: impl Into<String>, sort: SortMode) -> Self {
        Self {
            service,
            owner_id: owner_id.into(),
            sort,
            tasks: Vec::new(),
            priority_writes: PriorityWritePolicy::default(),
            subscription: None,
            in_flight: 0,
            issued_seq: 0,
            applied_seq: 0,
            last_error: None,
        }
    }

    pub fn with_priority_writes(mut self, policy: PriorityWritePolicy) -> Self {
        self.priority_writes = policy;
        self
    }

    /// Current list in display order
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn sort(&self) -> SortMode {
        self.sort
    }

    /// True while any fetch or write is outstanding
    pub fn is_loading(&self) -> bool {
        self.in_flight > 0
    }

    /// Most recent failure, kept for the presentation layer
    pub fn last_error(&self) -> Option<&TodoError> {
        self.last_error.as_ref()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    // ========================================================================
    // Subscription lifecycle
    // ========================================================================

    /// Subscribe to the current owner's changes and load the list.
    ///
    /// The list is loaded even when the subscription cannot be established;
    /// the subscription error is returned first, then any fetch error.
    pub async fn mount(&mut self) -> Result<(), TodoError> {
        let subscribed = self.resubscribe();
        let refreshed = self.refresh().await;
        subscribed.and(refreshed)
    }

    /// Switch owner and/or sort mode.
    ///
    /// Any change tears down the previous subscription before the new one is
    /// established, then reloads. Setting the same view on a mounted store is
    /// a no-op.
    pub async fn set_view(&mut self, owner_id: impl Into<String>, sort: SortMode) -> Result<(), TodoError> {
        let owner_id = owner_id.into();
        if self.is_subscribed() && owner_id == self.owner_id && sort == self.sort {
            return Ok(());
        }
        if owner_id != self.owner_id {
            self.tasks.clear();
        }
        self.owner_id = owner_id;
        self.sort = sort;
        self.mount().await
    }

    pub async fn set_sort(&mut self, sort: SortMode) -> Result<(), TodoError> {
        let owner_id = self.owner_id.clone();
        self.set_view(owner_id, sort).await
    }

    /// Cancel the change subscription. In-flight calls are not cancelled.
    pub fn unmount(&mut self) {
        if let Some(sub) = self.subscription.take() {
            self.service.unsubscribe(sub.handle);
            debug!(owner = %self.owner_id, "Unmounted task store");
        }
    }

    fn resubscribe(&mut self) -> Result<(), TodoError> {
        self.unmount();
        match self.service.subscribe(&self.owner_id) {
            Ok(sub) => {
                debug!(owner = %self.owner_id, sort = %self.sort, subscription = sub.handle.id(), "Mounted task store");
                self.subscription = Some(sub);
                Ok(())
            }
            Err(e) => Err(self.record(TodoError::subscription(e))),
        }
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Reload the whole list from the service
    pub async fn refresh(&mut self) -> Result<(), TodoError> {
        let ticket = self.begin_refresh();
        let service = Arc::clone(&self.service);
        let result = ticket.fetch(service.as_ref()).await;
        self.finish_refresh(ticket, result).map(|_| ())
    }

    /// Start a refresh for the current view
    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.in_flight += 1;
        RefreshTicket {
            seq: self.next_seq(),
            query: Query::for_owner(&self.owner_id).order_by(self.sort),
        }
    }

    /// Apply a fetched result.
    ///
    /// Returns `Ok(true)` if the list was replaced and `Ok(false)` if the
    /// result was older than the view already applied (or was for a view no
    /// longer current) and got discarded. On failure the previous list stays
    /// in place. The loading flag is released either way.
    pub fn finish_refresh(
        &mut self,
        ticket: RefreshTicket,
        result: Result<Vec<Task>, ServiceError>,
    ) -> Result<bool, TodoError> {
        self.in_flight = self.in_flight.saturating_sub(1);

        // Stale results are dropped whether they succeeded or not
        if ticket.seq <= self.applied_seq {
            debug!(seq = ticket.seq, applied = self.applied_seq, ok = result.is_ok(), "Discarding stale refresh");
            return Ok(false);
        }
        if ticket.query.owner_id != self.owner_id || ticket.query.order_by != self.sort {
            debug!(seq = ticket.seq, ok = result.is_ok(), "Discarding refresh for previous view");
            return Ok(false);
        }

        let tasks = match result {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(seq = ticket.seq, error = %e, "Refresh failed");
                return Err(self.record(TodoError::fetch(e)));
            }
        };

        debug!(seq = ticket.seq, count = tasks.len(), "Applied refresh");
        self.applied_seq = ticket.seq;
        self.tasks = tasks;
        Ok(true)
    }

    /// Mark a local change as the newest view so older fetches are discarded
    pub(crate) fn claim_view(&mut self) -> u64 {
        self.applied_seq = self.next_seq();
        self.applied_seq
    }

    /// True if nothing newer than `seq` has been applied
    pub(crate) fn is_current(&self, seq: u64) -> bool {
        self.applied_seq == seq
    }

    fn next_seq(&mut self) -> u64 {
        self.issued_seq += 1;
        self.issued_seq
    }

    // ========================================================================
    // Change notifications
    // ========================================================================

    /// Wait for the next change notification.
    ///
    /// Returns `None` when not mounted or when the service closed the channel.
    pub async fn next_change(&mut self) -> Option<ChangeEvent> {
        match self.subscription.as_mut() {
            Some(sub) => sub.events.recv().await,
            None => None,
        }
    }

    /// React to a change notification by reloading the list
    pub async fn handle_change(&mut self, event: ChangeEvent) -> Result<(), TodoError> {
        if event.owner_id != self.owner_id {
            return Ok(());
        }
        debug!(kind = ?event.kind, task = ?event.task_id, "Change notification");
        self.refresh().await
    }

    /// Handle every notification already queued, one refresh each.
    ///
    /// Returns how many were handled; stops at the first failed refresh.
    pub async fn drain_changes(&mut self) -> Result<usize, TodoError> {
        let mut handled = 0;
        while let Some(event) = self.try_next_change() {
            self.handle_change(event).await?;
            handled += 1;
        }
        Ok(handled)
    }

    fn try_next_change(&mut self) -> Option<ChangeEvent> {
        self.subscription.as_mut()?.events.try_recv().ok()
    }

    // ========================================================================
    // Write bookkeeping shared by mutations and reorder
    // ========================================================================

    pub(crate) fn begin_write(&mut self) {
        self.in_flight += 1;
    }

    pub(crate) fn end_write(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    pub(crate) fn record(&mut self, err: TodoError) -> TodoError {
        self.last_error = Some(err.clone());
        err
    }
}

impl<S: DataService> Drop for TaskStore<S> {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeKind, NewTask, PriorityUpdate};
    use crate::testing::{InstrumentedService, instrumented};
    use chrono::NaiveDate;

    fn titles<S: DataService>(store: &TaskStore<S>) -> Vec<String> {
        store.tasks().iter().map(|t| t.title.clone()).collect()
    }

    async fn seed(service: &InstrumentedService, titles: &[&str]) -> Vec<Task> {
        let mut out = Vec::new();
        for title in titles {
            out.push(service.insert(NewTask::new("alice", *title, None)).await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_mount_subscribes_and_loads() {
        let (_temp, service) = instrumented();
        seed(&service, &["A", "B"]).await;

        let mut store = TaskStore::new(Arc::clone(&service), "alice", SortMode::CreatedAt);
        assert!(store.tasks().is_empty());

        store.mount().await.unwrap();
        assert!(store.is_subscribed());
        assert!(!store.is_loading());
        assert_eq!(titles(&store), vec!["A", "B"]);
        assert_eq!(service.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_orders_by_sort_mode() {
        let (_temp, service) = instrumented();
        let a = service
            .insert(NewTask::new("alice", "A", NaiveDate::from_ymd_opt(2026, 9, 1)))
            .await
            .unwrap();
        let b = service.insert(NewTask::new("alice", "B", None)).await.unwrap();
        let c = service
            .insert(NewTask::new("alice", "C", NaiveDate::from_ymd_opt(2026, 3, 1)))
            .await
            .unwrap();
        service
            .update_priorities(
                "alice",
                &[
                    PriorityUpdate { id: b.id.clone(), priority: 0 },
                    PriorityUpdate { id: a.id.clone(), priority: 1 },
                    PriorityUpdate { id: c.id.clone(), priority: 2 },
                ],
            )
            .await
            .unwrap();

        let mut store = TaskStore::new(Arc::clone(&service), "alice", SortMode::CreatedAt);
        store.mount().await.unwrap();
        assert_eq!(titles(&store), vec!["A", "B", "C"]);

        store.set_sort(SortMode::DueDate).await.unwrap();
        assert_eq!(titles(&store), vec!["C", "A", "B"]);

        store.set_sort(SortMode::Priority).await.unwrap();
        assert_eq!(titles(&store), vec!["B", "A", "C"]);
    }

    #[tokio::test]
    async fn test_changing_view_replaces_subscription() {
        let (_temp, service) = instrumented();
        let mut store = TaskStore::new(Arc::clone(&service), "alice", SortMode::CreatedAt);
        store.mount().await.unwrap();

        store.set_sort(SortMode::Priority).await.unwrap();
        store.set_view("bob", SortMode::Priority).await.unwrap();
        store.set_view("bob", SortMode::DueDate).await.unwrap();

        assert_eq!(service.subscriber_count(), 1);
        assert_eq!(service.counts().subscribes, 4);
        assert_eq!(service.counts().unsubscribes, 3);
    }

    #[tokio::test]
    async fn test_same_view_is_a_no_op() {
        let (_temp, service) = instrumented();
        let mut store = TaskStore::new(Arc::clone(&service), "alice", SortMode::CreatedAt);
        store.mount().await.unwrap();
        let queries = service.counts().queries;

        store.set_view("alice", SortMode::CreatedAt).await.unwrap();
        assert_eq!(service.counts().queries, queries);
        assert_eq!(service.counts().subscribes, 1);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let (_temp, service) = instrumented();
        {
            let mut store = TaskStore::new(Arc::clone(&service), "alice", SortMode::CreatedAt);
            store.mount().await.unwrap();
            assert_eq!(service.subscriber_count(), 1);
        }
        assert_eq!(service.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_list() {
        let (_temp, service) = instrumented();
        seed(&service, &["A"]).await;
        let mut store = TaskStore::new(Arc::clone(&service), "alice", SortMode::CreatedAt);
        store.mount().await.unwrap();

        seed(&service, &["B"]).await;
        service.fail_fetches(true);
        let err = store.refresh().await.unwrap_err();

        assert!(matches!(err, TodoError::Fetch(_)));
        assert!(err.to_string().starts_with("Error loading tasks:"));
        assert_eq!(store.last_error(), Some(&err));
        assert!(!store.is_loading());
        assert_eq!(titles(&store), vec!["A"]);

        service.fail_fetches(false);
        store.refresh().await.unwrap();
        assert_eq!(titles(&store), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_stale_refresh_is_discarded() {
        let (_temp, service) = instrumented();
        seed(&service, &["A"]).await;
        let mut store = TaskStore::new(Arc::clone(&service), "alice", SortMode::CreatedAt);

        // Early refresh fetches before B exists
        let early = store.begin_refresh();
        let early_result = early.fetch(service.as_ref()).await;

        seed(&service, &["B"]).await;
        let late = store.begin_refresh();
        let late_result = late.fetch(service.as_ref()).await;
        assert!(store.is_loading());

        // The later request lands first, the slow early one after it
        assert!(store.finish_refresh(late, late_result).unwrap());
        assert!(!store.finish_refresh(early, early_result).unwrap());

        assert_eq!(titles(&store), vec!["A", "B"]);
        assert!(!store.is_loading());
    }

    #[tokio::test]
    async fn test_stale_failed_refresh_is_discarded() {
        let (_temp, service) = instrumented();
        seed(&service, &["A"]).await;
        let mut store = TaskStore::new(Arc::clone(&service), "alice", SortMode::CreatedAt);

        service.fail_fetches(true);
        let early = store.begin_refresh();
        let early_result = early.fetch(service.as_ref()).await;
        assert!(early_result.is_err());

        service.fail_fetches(false);
        let late = store.begin_refresh();
        let late_result = late.fetch(service.as_ref()).await;

        assert!(store.finish_refresh(late, late_result).unwrap());
        assert!(!store.finish_refresh(early, early_result).unwrap());

        assert!(store.last_error().is_none());
        assert_eq!(titles(&store), vec!["A"]);
        assert!(!store.is_loading());
    }

    #[tokio::test]
    async fn test_refresh_for_previous_view_is_discarded() {
        let (_temp, service) = instrumented();
        seed(&service, &["A"]).await;
        let mut store = TaskStore::new(Arc::clone(&service), "alice", SortMode::CreatedAt);
        store.mount().await.unwrap();

        let ticket = store.begin_refresh();
        let result = ticket.fetch(service.as_ref()).await;
        store.set_view("bob", SortMode::CreatedAt).await.unwrap();

        assert!(!store.finish_refresh(ticket, result).unwrap());
        assert!(store.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_every_notification_triggers_a_refresh() {
        let (_temp, service) = instrumented();
        let mut store = TaskStore::new(Arc::clone(&service), "alice", SortMode::CreatedAt);
        store.mount().await.unwrap();
        let queries = service.counts().queries;

        // A write from some other client
        seed(&service, &["A", "B"]).await;

        let event = store.next_change().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        store.handle_change(event).await.unwrap();
        assert_eq!(store.drain_changes().await.unwrap(), 1);

        assert_eq!(service.counts().queries, queries + 2);
        assert_eq!(titles(&store), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_next_change_when_unmounted() {
        let (_temp, service) = instrumented();
        let mut store = TaskStore::new(Arc::clone(&service), "alice", SortMode::CreatedAt);
        assert!(store.next_change().await.is_none());
        assert_eq!(store.drain_changes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_subscription_failure_is_surfaced() {
        let (_temp, service) = instrumented();
        let mut store = TaskStore::new(Arc::clone(&service), "", SortMode::CreatedAt);
        let err = store.mount().await.unwrap_err();
        assert!(matches!(err, TodoError::Subscription(_)));
        assert!(!store.is_subscribed());
    }

    #[tokio::test]
    async fn test_mount_loads_list_without_change_channel() {
        let (_temp, service) = instrumented();
        seed(&service, &["A"]).await;
        service.fail_subscribes(true);

        let mut store = TaskStore::new(Arc::clone(&service), "alice", SortMode::CreatedAt);
        let err = store.mount().await.unwrap_err();

        assert!(matches!(err, TodoError::Subscription(_)));
        assert_eq!(store.last_error(), Some(&err));
        assert!(!store.is_subscribed());
        assert!(!store.is_loading());
        assert_eq!(titles(&store), vec!["A"]);

        // Switching owner still loads the new owner's list
        service.insert(NewTask::new("bob", "B", None)).await.unwrap();
        store.set_view("bob", SortMode::CreatedAt).await.unwrap_err();
        assert_eq!(titles(&store), vec!["B"]);

        service.fail_subscribes(false);
        store.mount().await.unwrap();
        assert!(store.is_subscribed());
    }
}
