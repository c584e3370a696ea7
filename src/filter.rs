// Owner-scoped query with ordering

use crate::models::SortMode;

/// Query over the tasks collection.
///
/// Every query is scoped to a single owner; there is no way to read
/// across owners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Owner whose tasks are returned
    pub owner_id: String,
    /// Primary order key
    pub order_by: SortMode,
    /// Direction of the primary key
    pub ascending: bool,
}

impl Query {
    pub fn for_owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            order_by: SortMode::default(),
            ascending: true,
        }
    }

    pub fn order_by(mut self, order_by: SortMode) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn ascending(mut self, ascending: bool) -> Self {
        self.ascending = ascending;
        self
    }

    /// SQL `ORDER BY` clause for this query.
    ///
    /// Tasks without a due date sort after dated ones when ascending and
    /// before them when descending. Ties fall back to creation order then id.
    pub(crate) fn order_clause(&self) -> String {
        let dir = if self.ascending { "ASC" } else { "DESC" };
        match self.order_by {
            SortMode::CreatedAt => format!("ORDER BY created_at {dir}, id {dir}"),
            SortMode::DueDate => format!("ORDER BY due_date IS NULL {dir}, due_date {dir}, created_at ASC, id ASC"),
            SortMode::Priority => format!("ORDER BY priority {dir}, created_at ASC, id ASC"),
        }
    }
}
