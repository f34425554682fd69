//! Task model for the task board.
//!
//! Defines the [`Task`] record, its identifier and scope types, the status and
//! priority enums, and the outbound shapes ([`NewTask`], [`TaskPatch`]) used by
//! mutation calls. Local constraint checks live here so the client and the
//! store enforce the same rules.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed task title length in characters.
pub const MAX_TASK_TITLE_LENGTH: usize = 256;

/// Maximum number of tags kept on a task.
pub const MAX_TAGS: usize = 10;

/// Errors raised by local constraint checks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Task title is empty after trimming.
    #[error("task title cannot be empty")]
    TitleEmpty,
    /// Task title exceeds the maximum length.
    #[error("task title too long (max {max} characters)")]
    TitleTooLong {
        /// The limit that was exceeded.
        max: usize,
    },
    /// A status string did not name a known board column.
    #[error("invalid status: {0:?} (expected todo, inprogress or done)")]
    InvalidStatus(String),
    /// A priority string did not name a known priority.
    #[error("invalid priority: {0:?} (expected low, medium or high)")]
    InvalidPriority(String),
    /// The scope has no owner id.
    #[error("scope owner id cannot be empty")]
    EmptyScope,
}

/// Opaque task identifier assigned by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wraps an identifier issued by the store.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Issues a fresh time-ordered identifier (UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The owner filter a board is bound to.
///
/// Only tasks whose `created_by` equals the scope's owner id are visible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(String);

impl Scope {
    /// Creates a scope for the given owner id.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyScope`] if the owner id is blank.
    pub fn new(owner_id: impl Into<String>) -> Result<Self, ValidationError> {
        let owner_id = owner_id.into();
        if owner_id.trim().is_empty() {
            return Err(ValidationError::EmptyScope);
        }
        Ok(Self(owner_id))
    }

    /// Returns the owner id this scope filters on.
    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.0
    }

    /// Whether a row created by `owner` belongs to this scope.
    #[must_use]
    pub fn admits(&self, owner: &str) -> bool {
        self.0 == owner
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Board column a task sits in. Any status may move to any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Not started.
    Todo,
    /// Being worked on.
    #[serde(rename = "inprogress")]
    InProgress,
    /// Finished.
    Done,
}

impl Status {
    /// All statuses in board display order.
    pub const ALL: [Self; 3] = [Self::Todo, Self::InProgress, Self::Done];

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "inprogress",
            Self::Done => "done",
        }
    }

    /// Column heading shown on the board.
    #[must_use]
    pub const fn column_name(self) -> &'static str {
        match self {
            Self::Todo => "To Do",
            Self::InProgress => "In Progress",
            Self::Done => "Done",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "todo" => Ok(Self::Todo),
            "inprogress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(ValidationError::InvalidStatus(s.to_string())),
        }
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Low priority.
    Low,
    /// Medium priority.
    Medium,
    /// High priority.
    High,
}

impl Priority {
    /// Wire name of the priority.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(ValidationError::InvalidPriority(s.to_string())),
        }
    }
}

/// A task record as held by the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned identifier.
    pub id: TaskId,
    /// Non-empty title.
    pub title: String,
    /// Free-form description, may be empty.
    pub description: String,
    /// Board column.
    pub status: Status,
    /// Optional priority.
    pub priority: Option<Priority>,
    /// Optional estimate.
    pub story_points: Option<u32>,
    /// Normalized tags, in insertion order.
    pub tags: Vec<String>,
    /// Owner id; the authorization boundary.
    pub created_by: String,
    /// Optional assignee user id.
    pub assignee_id: Option<String>,
    /// Optional sprint reference. Absent on stores without the column.
    pub sprint_id: Option<String>,
    /// Optional due date.
    pub due_date: Option<NaiveDate>,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time.
    pub updated_at: Option<DateTime<Utc>>,
    /// When the task entered `done`.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Builds a minimal task with the given identity, for tests and stubs.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        status: Status,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: TaskId::new(id),
            title: title.into(),
            description: String::new(),
            status,
            priority: None,
            story_points: None,
            tags: Vec::new(),
            created_by: created_by.into(),
            assignee_id: None,
            sprint_id: None,
            due_date: None,
            created_at: None,
            updated_at: None,
            completed_at: None,
        }
    }
}

/// Outbound payload for creating a task. The store returns only the new id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    /// Title, trimmed.
    pub title: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Initial column.
    pub status: Status,
    /// Normalized tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Optional sprint reference (the optional column).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sprint_id: Option<String>,
}

impl NewTask {
    /// Starts a new task in the `todo` column.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            status: Status::Todo,
            tags: Vec::new(),
            sprint_id: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the initial column.
    #[must_use]
    pub const fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Sets the tags. They are normalized by [`validated`](Self::validated).
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Places the task in a sprint.
    #[must_use]
    pub fn with_sprint(mut self, sprint_id: impl Into<String>) -> Self {
        self.sprint_id = Some(sprint_id.into());
        self
    }

    /// Checks local constraints and returns the normalized payload.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::TitleEmpty`] or
    /// [`ValidationError::TitleTooLong`] for a bad title.
    pub fn validated(self, max_title_len: usize) -> Result<Self, ValidationError> {
        Ok(Self {
            title: validate_title(&self.title, max_title_len)?,
            tags: normalize_tags(&self.tags),
            ..self
        })
    }
}

/// Partial update of a task. Only present fields are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// New priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// New estimate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_points: Option<u32>,
    /// Replacement tag list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// New sprint reference (the optional column).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sprint_id: Option<String>,
}

impl TaskPatch {
    /// Whether the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.story_points.is_none()
            && self.tags.is_none()
            && self.sprint_id.is_none()
    }

    /// Whether the patch writes the optional sprint column.
    #[must_use]
    pub const fn touches_optional_column(&self) -> bool {
        self.sprint_id.is_some()
    }

    /// Checks local constraints and returns the normalized patch.
    ///
    /// # Errors
    ///
    /// Returns a title error if a present title is empty or too long.
    pub fn validated(self, max_title_len: usize) -> Result<Self, ValidationError> {
        let title = match self.title {
            Some(ref t) => Some(validate_title(t, max_title_len)?),
            None => None,
        };
        let tags = self.tags.as_deref().map(normalize_tags);
        Ok(Self {
            title,
            tags,
            ..self
        })
    }

    /// Applies the patch to a task in place.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            task.description.clone_from(description);
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = Some(priority);
        }
        if let Some(points) = self.story_points {
            task.story_points = Some(points);
        }
        if let Some(tags) = &self.tags {
            task.tags.clone_from(tags);
        }
        if let Some(sprint_id) = &self.sprint_id {
            task.sprint_id = Some(sprint_id.clone());
        }
    }
}

/// Trims a title and checks it against the length limit.
///
/// # Errors
///
/// Returns [`ValidationError::TitleEmpty`] or [`ValidationError::TitleTooLong`].
pub fn validate_title(title: &str, max_len: usize) -> Result<String, ValidationError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::TitleEmpty);
    }
    if trimmed.chars().count() > max_len {
        return Err(ValidationError::TitleTooLong { max: max_len });
    }
    Ok(trimmed.to_string())
}

/// Normalizes a tag list: trim, lowercase, drop empties, dedupe keeping the
/// first occurrence, cap at [`MAX_TAGS`].
pub fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len().min(MAX_TAGS));
    for raw in tags {
        if out.len() == MAX_TAGS {
            break;
        }
        let tag = raw.as_ref().trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}
