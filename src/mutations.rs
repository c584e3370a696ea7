// Add, edit, toggle and delete on the task store

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::error::{ServiceError, TodoError, WriteAction};
use crate::models::{NewTask, Task, TaskPatch};
use crate::service::DataService;
use crate::sync::TaskStore;

impl<S: DataService> TaskStore<S> {
    /// Create a task for the current owner.
    ///
    /// A blank title is ignored: no write happens and `Ok(None)` is returned.
    pub async fn add(&mut self, title: &str, due_date: Option<NaiveDate>) -> Result<Option<Task>, TodoError> {
        if title.trim().is_empty() {
            debug!("Ignoring add with blank title");
            return Ok(None);
        }

        let service = self.service.clone();
        let new_task = NewTask::new(self.owner_id.clone(), title.trim(), due_date);
        let task = self.write(WriteAction::Add, service.insert(new_task)).await?;
        self.refresh().await?;
        Ok(Some(task))
    }

    /// Flip a task's completion flag
    pub async fn toggle_complete(&mut self, task: &Task) -> Result<(), TodoError> {
        let service = self.service.clone();
        let owner_id = self.owner_id.clone();
        self.write(
            WriteAction::Update,
            service.update(&owner_id, &task.id, TaskPatch::completion(!task.is_complete)),
        )
        .await?;
        self.refresh().await
    }

    /// Change a task's title and due date.
    ///
    /// A blank title is ignored and returns `Ok(false)`.
    pub async fn edit(&mut self, task: &Task, new_title: &str, new_due_date: Option<NaiveDate>) -> Result<bool, TodoError> {
        if new_title.trim().is_empty() {
            debug!(id = %task.id, "Ignoring edit with blank title");
            return Ok(false);
        }

        let service = self.service.clone();
        let owner_id = self.owner_id.clone();
        self.write(
            WriteAction::Update,
            service.update(&owner_id, &task.id, TaskPatch::details(new_title.trim(), new_due_date)),
        )
        .await?;
        self.refresh().await?;
        Ok(true)
    }

    pub async fn delete(&mut self, task: &Task) -> Result<(), TodoError> {
        let service = self.service.clone();
        let owner_id = self.owner_id.clone();
        self.write(WriteAction::Delete, service.delete(&owner_id, &task.id))
            .await?;
        self.refresh().await
    }

    /// Await a write with the loading flag held; failures are recorded and
    /// leave the list untouched.
    async fn write<T, F>(&mut self, action: WriteAction, fut: F) -> Result<T, TodoError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        self.begin_write();
        let result = fut.await;
        self.end_write();

        result.map_err(|e| {
            warn!(%action, error = %e, "Write failed");
            self.record(TodoError::write(action, e))
        })
    }
}
