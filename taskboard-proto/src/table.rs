//! Reference task table with the remote store's RPC semantics.
//!
//! [`TaskTable`] is the authoritative row set behind both the in-process test
//! store and the WebSocket store server. Every call is scoped to an owner id,
//! and each successful mutation returns the [`ChangeEvent`] the change feed
//! should publish. Failures are raised as PostgreSQL error codes and mapped
//! through [`Failure::from_code`], the way a database-backed store reports
//! them.

use chrono::Utc;
use serde_json::Value;

use crate::column::ColumnSet;
use crate::failure::Failure;
use crate::row::{ChangeEvent, encode_row};
use crate::task::{
    MAX_TASK_TITLE_LENGTH, NewTask, Status, Task, TaskId, TaskPatch, ValidationError,
    normalize_tags, validate_title,
};

/// In-memory task table.
#[derive(Debug, Clone)]
pub struct TaskTable {
    /// Rows in creation order; pulls walk it backwards.
    rows: Vec<Task>,
    /// Whether the schema has the optional column.
    has_optional_column: bool,
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskTable {
    /// Creates an empty table with the full schema.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            rows: Vec::new(),
            has_optional_column: true,
        }
    }

    /// Creates an empty table whose schema lacks the optional column.
    #[must_use]
    pub const fn legacy() -> Self {
        Self {
            rows: Vec::new(),
            has_optional_column: false,
        }
    }

    /// Whether the schema has the optional column.
    #[must_use]
    pub const fn has_optional_column(&self) -> bool {
        self.has_optional_column
    }

    /// Number of rows across all owners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Looks up a row by id regardless of owner.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.rows.iter().find(|t| &t.id == id)
    }

    /// Column set the table's own rows are encoded with.
    const fn native_columns(&self) -> ColumnSet {
        if self.has_optional_column {
            ColumnSet::Full
        } else {
            ColumnSet::Reduced
        }
    }

    /// Returns every row owned by `owner_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Failure::Unauthorized`] for an empty owner and
    /// [`Failure::UnknownColumn`] if `columns` asks for a column the schema
    /// lacks.
    pub fn pull(&self, owner_id: &str, columns: ColumnSet) -> Result<Vec<Value>, Failure> {
        check_owner(owner_id)?;
        self.check_columns(columns, false)?;
        Ok(self
            .rows
            .iter()
            .rev()
            .filter(|t| t.created_by == owner_id)
            .map(|t| encode_row(t, columns))
            .collect())
    }

    /// Creates a task owned by `owner_id` and returns its new id.
    ///
    /// # Errors
    ///
    /// Returns [`Failure::Unauthorized`], [`Failure::UnknownColumn`], or
    /// [`Failure::Unknown`] for a title the store rejects.
    pub fn create(
        &mut self,
        owner_id: &str,
        new_task: NewTask,
        columns: ColumnSet,
    ) -> Result<(TaskId, ChangeEvent), Failure> {
        check_owner(owner_id)?;
        self.check_columns(columns, new_task.sprint_id.is_some())?;
        let title = validate_title(&new_task.title, MAX_TASK_TITLE_LENGTH)
            .map_err(rejected_title)?;

        let now = Utc::now();
        let mut task = Task::new(TaskId::generate().as_str(), title, Status::Todo, owner_id);
        task.description = new_task.description;
        task.tags = normalize_tags(&new_task.tags);
        task.sprint_id = new_task.sprint_id;
        task.created_at = Some(now);
        task.updated_at = Some(now);
        set_status(&mut task, new_task.status);

        let id = task.id.clone();
        let event = ChangeEvent::insert(encode_row(&task, self.native_columns()));
        self.rows.push(task);
        Ok((id, event))
    }

    /// Applies the present fields of `patch` to an owned row.
    ///
    /// Returns `None` when no row with that id belongs to `owner_id`.
    ///
    /// # Errors
    ///
    /// Same as [`create`](Self::create).
    pub fn update(
        &mut self,
        owner_id: &str,
        id: &TaskId,
        patch: &TaskPatch,
        columns: ColumnSet,
    ) -> Result<Option<ChangeEvent>, Failure> {
        check_owner(owner_id)?;
        self.check_columns(columns, patch.touches_optional_column())?;
        let title = match &patch.title {
            Some(t) => Some(
                validate_title(t, MAX_TASK_TITLE_LENGTH).map_err(rejected_title)?,
            ),
            None => None,
        };
        let status = patch.status;
        let patch = TaskPatch {
            title,
            tags: patch.tags.as_deref().map(normalize_tags),
            status: None,
            ..patch.clone()
        };
        self.modify(owner_id, id, |task| {
            patch.apply_to(task);
            if let Some(status) = status {
                set_status(task, status);
            }
        })
    }

    /// Sets the status of an owned row, stamping or clearing `completed_at`.
    ///
    /// # Errors
    ///
    /// Returns [`Failure::Unauthorized`] for an empty owner.
    pub fn move_task(
        &mut self,
        owner_id: &str,
        id: &TaskId,
        status: Status,
    ) -> Result<Option<ChangeEvent>, Failure> {
        check_owner(owner_id)?;
        self.modify(owner_id, id, |task| set_status(task, status))
    }

    /// Removes an owned row.
    ///
    /// # Errors
    ///
    /// Returns [`Failure::Unauthorized`] for an empty owner.
    pub fn delete(&mut self, owner_id: &str, id: &TaskId) -> Result<Option<ChangeEvent>, Failure> {
        check_owner(owner_id)?;
        let Some(pos) = self
            .rows
            .iter()
            .position(|t| &t.id == id && t.created_by == owner_id)
        else {
            return Ok(None);
        };
        let old = self.rows.remove(pos);
        Ok(Some(ChangeEvent::delete(encode_row(
            &old,
            self.native_columns(),
        ))))
    }

    /// Inserts a fully formed row, bypassing owner checks.
    ///
    /// Used to seed fixtures, including rows owned by other users.
    pub fn insert_row(&mut self, mut task: Task) -> ChangeEvent {
        if !self.has_optional_column {
            task.sprint_id = None;
        }
        let event = ChangeEvent::insert(encode_row(&task, self.native_columns()));
        self.rows.retain(|t| t.id != task.id);
        self.rows.push(task);
        event
    }

    fn modify(
        &mut self,
        owner_id: &str,
        id: &TaskId,
        f: impl FnOnce(&mut Task),
    ) -> Result<Option<ChangeEvent>, Failure> {
        let columns = self.native_columns();
        let Some(task) = self
            .rows
            .iter_mut()
            .find(|t| &t.id == id && t.created_by == owner_id)
        else {
            return Ok(None);
        };
        let old = encode_row(task, columns);
        f(task);
        task.updated_at = Some(Utc::now());
        Ok(Some(ChangeEvent::update(encode_row(task, columns), Some(old))))
    }

    /// Fails with `42703` naming the first requested column the schema lacks.
    fn check_columns(&self, columns: ColumnSet, writes_optional: bool) -> Result<(), Failure> {
        let requested = if writes_optional {
            ColumnSet::Full
        } else {
            columns
        };
        let native = self.native_columns();
        match requested.names().into_iter().find(|c| !native.contains(c)) {
            Some(column) => Err(Failure::from_code(
                "42703",
                Some(column),
                &format!("column \"{column}\" does not exist"),
            )),
            None => Ok(()),
        }
    }
}

fn check_owner(owner_id: &str) -> Result<(), Failure> {
    if owner_id.trim().is_empty() {
        Err(Failure::from_code("42501", None, "permission denied for table tasks"))
    } else {
        Ok(())
    }
}

/// A title the table's check constraint rejects.
fn rejected_title(e: ValidationError) -> Failure {
    Failure::from_code("23514", None, &e.to_string())
}

/// Entering `done` stamps `completed_at`; leaving it clears the stamp.
fn set_status(task: &mut Task, status: Status) {
    if status == Status::Done && task.status != Status::Done {
        task.completed_at = Some(Utc::now());
    } else if status != Status::Done {
        task.completed_at = None;
    }
    task.status = status;
}
