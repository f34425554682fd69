//! Row and change-event encoding.
//!
//! Rows travel as JSON objects keyed by column name. Decoding is lenient for
//! optional columns (null, missing and unknown all read as absent) and strict
//! for `id`, `title`, `status` and `created_by`. A row that fails the strict
//! part is malformed and reported as [`RowError`]; callers drop it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::column::{ColumnSet, OPTIONAL_COLUMN};
use crate::task::{Priority, Status, Task, TaskId, normalize_tags};

/// Errors from decoding rows and change events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowError {
    /// The row is not a JSON object or is missing a required column.
    #[error("malformed row: {0}")]
    Malformed(String),
    /// A change event lacks the row its kind requires.
    #[error("{kind} event without {side} row")]
    MissingRow {
        /// Event kind.
        kind: ChangeKind,
        /// Which side (`new` or `old`) was missing.
        side: &'static str,
    },
}

/// Wire shape of a row, before normalization.
#[derive(Debug, Deserialize)]
struct RawRow {
    id: String,
    title: String,
    status: Status,
    created_by: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    story_points: Option<u32>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    assignee_id: Option<String>,
    #[serde(default)]
    sprint_id: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
}

impl From<RawRow> for Task {
    fn from(raw: RawRow) -> Self {
        Self {
            id: TaskId::new(raw.id),
            title: raw.title,
            description: raw.description.unwrap_or_default(),
            status: raw.status,
            priority: raw.priority.and_then(|p| p.parse::<Priority>().ok()),
            story_points: raw.story_points,
            tags: normalize_tags(&raw.tags.unwrap_or_default()),
            created_by: raw.created_by,
            assignee_id: raw.assignee_id,
            sprint_id: raw.sprint_id,
            due_date: raw.due_date.as_deref().and_then(parse_due_date),
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            completed_at: raw.completed_at,
        }
    }
}

/// Accepts `YYYY-MM-DD` or a full timestamp whose date part is used.
fn parse_due_date(s: &str) -> Option<NaiveDate> {
    let date = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Decodes one row.
///
/// # Errors
///
/// Returns [`RowError::Malformed`] if a required column is missing or has the
/// wrong type, or if the status is unknown.
pub fn decode_row(value: &Value) -> Result<Task, RowError> {
    RawRow::deserialize(value)
        .map(Task::from)
        .map_err(|e| RowError::Malformed(e.to_string()))
}

/// Encodes a task as a row restricted to the given column set.
#[must_use]
pub fn encode_row(task: &Task, columns: ColumnSet) -> Value {
    let mut row = serde_json::json!({
        "id": task.id,
        "title": task.title,
        "description": task.description,
        "status": task.status,
        "priority": task.priority,
        "story_points": task.story_points,
        "tags": task.tags,
        "created_by": task.created_by,
        "assignee_id": task.assignee_id,
        "sprint_id": task.sprint_id,
        "due_date": task.due_date,
        "created_at": task.created_at,
        "updated_at": task.updated_at,
        "completed_at": task.completed_at,
    });
    if !columns.includes_optional()
        && let Some(map) = row.as_object_mut()
    {
        map.remove(OPTIONAL_COLUMN);
    }
    row
}

/// Kind of a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// A row was created.
    Insert,
    /// A row was modified.
    Update,
    /// A row was removed.
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// A raw change notification as delivered by the feed.
///
/// Rows are kept undecoded so that a malformed notification can be dropped
/// without failing the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: ChangeKind,
    /// Row after the change (insert and update).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
    /// Row before the change (update and delete). May carry only the id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
}

impl ChangeEvent {
    /// Builds an insert event carrying the new row.
    #[must_use]
    pub const fn insert(new: Value) -> Self {
        Self {
            kind: ChangeKind::Insert,
            new: Some(new),
            old: None,
        }
    }

    /// Builds an update event carrying both rows.
    #[must_use]
    pub const fn update(new: Value, old: Option<Value>) -> Self {
        Self {
            kind: ChangeKind::Update,
            new: Some(new),
            old,
        }
    }

    /// Builds a delete event carrying the old row.
    #[must_use]
    pub const fn delete(old: Value) -> Self {
        Self {
            kind: ChangeKind::Delete,
            new: None,
            old: Some(old),
        }
    }

    /// Owner ids named by the `new` and `old` rows, where present.
    pub fn owners(&self) -> impl Iterator<Item = &str> {
        [self.new.as_ref(), self.old.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(|row| row.get("created_by").and_then(Value::as_str))
    }

    /// Decodes the event into a [`Change`].
    ///
    /// # Errors
    ///
    /// Returns [`RowError::MissingRow`] if the row the kind needs is absent, or
    /// [`RowError::Malformed`] if it cannot be decoded.
    pub fn decode(&self) -> Result<Change, RowError> {
        match self.kind {
            ChangeKind::Insert => {
                decode_row(require_row(self.new.as_ref(), self.kind, "new")?).map(Change::Insert)
            }
            ChangeKind::Update => {
                decode_row(require_row(self.new.as_ref(), self.kind, "new")?).map(Change::Update)
            }
            ChangeKind::Delete => {
                let old = require_row(self.old.as_ref(), self.kind, "old")?;
                let id = old
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RowError::Malformed("delete event old row has no id".into()))?;
                Ok(Change::Delete(TaskId::new(id)))
            }
        }
    }
}

fn require_row<'a>(
    row: Option<&'a Value>,
    kind: ChangeKind,
    side: &'static str,
) -> Result<&'a Value, RowError> {
    row.ok_or(RowError::MissingRow { kind, side })
}

/// A decoded change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Authoritative row of a new task.
    Insert(Task),
    /// Authoritative row after an update.
    Update(Task),
    /// Identifier of a removed task.
    Delete(TaskId),
}

impl Change {
    /// Identifier the change refers to.
    #[must_use]
    pub const fn id(&self) -> &TaskId {
        match self {
            Self::Insert(task) | Self::Update(task) => &task.id,
            Self::Delete(id) => id,
        }
    }
}
