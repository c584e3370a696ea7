// todolist - Personal task list with a synchronized view and drag-to-reorder

pub mod changes;
pub mod config;
pub mod error;
pub mod filter;
pub mod jsonl;
pub mod models;
pub mod mutations;
pub mod reorder;
pub mod service;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use changes::{Subscription, SubscriptionHandle};
pub use config::Config;
pub use error::{ServiceError, TodoError, WriteAction};
pub use filter::Query;
pub use models::{ChangeEvent, ChangeKind, NewTask, PriorityUpdate, SortMode, Task, TaskPatch, now_ms};
pub use reorder::{PendingReorder, PriorityWritePolicy, ReorderOutcome, move_item};
pub use service::{DataService, LocalDataService};
pub use store::Store;
pub use sync::{RefreshTicket, TaskStore};
