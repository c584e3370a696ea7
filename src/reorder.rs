// Drag-to-reorder: move one task to a new display slot and persist the new priorities

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ServiceError, TodoError, WriteAction};
use crate::models::{PriorityUpdate, Task};
use crate::service::DataService;
use crate::sync::TaskStore;

/// Which tasks get a priority write after a move
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityWritePolicy {
    /// Rewrite every task in the list
    #[default]
    All,
    /// Only tasks whose stored priority differs from their new index
    Changed,
}

/// Result of a reorder gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderOutcome {
    /// Dropped outside a target or on an invalid index; nothing happened
    Cancelled,
    /// The list was reordered and this many priorities were written
    Moved { writes: usize },
}

/// Move the element at `from` so it ends up at `to`.
///
/// Elements between the two positions shift by one slot. Returns false and
/// leaves `items` untouched if either index is out of range.
pub fn move_item<T>(items: &mut Vec<T>, from: usize, to: usize) -> bool {
    if from >= items.len() || to >= items.len() {
        return false;
    }
    let item = items.remove(from);
    items.insert(to, item);
    true
}

/// Priority writes needed so that index `i` holds `priority = i`.
///
/// `previous` maps task id to the priority stored before the move.
pub fn plan_priority_writes(
    ordered: &[Task],
    previous: &HashMap<&str, i64>,
    policy: PriorityWritePolicy,
) -> Vec<PriorityUpdate> {
    ordered
        .iter()
        .enumerate()
        .filter(|(index, task)| match policy {
            PriorityWritePolicy::All => true,
            PriorityWritePolicy::Changed => previous.get(task.id.as_str()) != Some(&(*index as i64)),
        })
        .map(|(index, task)| PriorityUpdate {
            id: task.id.clone(),
            priority: index as i64,
        })
        .collect()
}

/// A reorder applied to the local list whose priorities are not saved yet.
///
/// Obtained from [`TaskStore::begin_reorder`], persisted with
/// [`persist`](Self::persist) independently of the store, and handed back to
/// [`TaskStore::finish_reorder`].
#[derive(Debug)]
pub struct PendingReorder {
    seq: u64,
    owner_id: String,
    snapshot: Vec<Task>,
    writes: Vec<PriorityUpdate>,
}

impl PendingReorder {
    pub fn writes(&self) -> &[PriorityUpdate] {
        &self.writes
    }

    pub async fn persist<S>(&self, service: &S) -> Result<(), ServiceError>
    where
        S: DataService + ?Sized,
    {
        if self.writes.is_empty() {
            return Ok(());
        }
        service.update_priorities(&self.owner_id, &self.writes).await
    }
}

impl<S: DataService> TaskStore<S> {
    /// Apply a drag gesture from `source` to `destination` and save it.
    ///
    /// A missing destination means the gesture was cancelled. If persisting
    /// the priorities fails the previous order is restored. The new order is
    /// only observable through [`tasks`](Self::tasks) once this returns; use
    /// [`begin_reorder`](Self::begin_reorder) to render it while the write is
    /// pending.
    pub async fn reorder(&mut self, source: usize, destination: Option<usize>) -> Result<ReorderOutcome, TodoError> {
        let Some(pending) = self.begin_reorder(source, destination) else {
            return Ok(ReorderOutcome::Cancelled);
        };
        let service = Arc::clone(&self.service);
        let result = pending.persist(service.as_ref()).await;
        self.finish_reorder(pending, result)
    }

    /// Move the task locally and plan its priority writes.
    ///
    /// Returns `None` for a cancelled gesture or out-of-range indices. The new
    /// order shows up in [`tasks`](Self::tasks) immediately and the store
    /// counts as loading until [`finish_reorder`](Self::finish_reorder).
    pub fn begin_reorder(&mut self, source: usize, destination: Option<usize>) -> Option<PendingReorder> {
        let Some(destination) = destination else {
            debug!(source, "Reorder cancelled");
            return None;
        };

        let snapshot = self.tasks.clone();
        if !move_item(&mut self.tasks, source, destination) {
            warn!(source, destination, len = snapshot.len(), "Reorder index out of range, ignoring");
            return None;
        }

        let writes = {
            let previous: HashMap<&str, i64> = snapshot.iter().map(|t| (t.id.as_str(), t.priority)).collect();
            plan_priority_writes(&self.tasks, &previous, self.priority_writes)
        };
        for (index, task) in self.tasks.iter_mut().enumerate() {
            task.priority = index as i64;
        }

        debug!(source, destination, writes = writes.len(), "Reordered locally");
        self.begin_write();
        Some(PendingReorder {
            // Any fetch already in flight predates this order
            seq: self.claim_view(),
            owner_id: self.owner_id.clone(),
            snapshot,
            writes,
        })
    }

    /// Settle a pending reorder with the result of persisting it.
    ///
    /// On failure the pre-gesture order comes back, unless a newer refresh
    /// has replaced the list in the meantime.
    pub fn finish_reorder(
        &mut self,
        pending: PendingReorder,
        result: Result<(), ServiceError>,
    ) -> Result<ReorderOutcome, TodoError> {
        self.end_write();

        match result {
            Ok(()) => Ok(ReorderOutcome::Moved {
                writes: pending.writes.len(),
            }),
            Err(e) => {
                if self.is_current(pending.seq) && pending.owner_id == self.owner_id {
                    warn!(error = %e, "Reorder failed, restoring previous order");
                    self.tasks = pending.snapshot;
                } else {
                    warn!(error = %e, "Reorder failed after a newer refresh, keeping current list");
                }
                Err(self.record(TodoError::write(WriteAction::Reorder, e)))
            }
        }
    }
}
