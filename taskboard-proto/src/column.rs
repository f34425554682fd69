//! Column capability of the remote task table.
//!
//! Older store deployments lack the `sprint_id` column. Callers ask for a
//! [`ColumnSet`] and the store either honors it or fails with an unknown-column
//! error, after which the client falls back to [`ColumnSet::Reduced`].

use serde::{Deserialize, Serialize};

/// Name of the column that may be missing on older stores.
pub const OPTIONAL_COLUMN: &str = "sprint_id";

/// Columns every store deployment carries.
pub const REQUIRED_COLUMNS: &[&str] = &[
    "id",
    "title",
    "description",
    "status",
    "priority",
    "story_points",
    "tags",
    "created_by",
    "assignee_id",
    "due_date",
    "created_at",
    "updated_at",
    "completed_at",
];

/// The shape of a query or mutation with respect to the optional column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnSet {
    /// All columns, including [`OPTIONAL_COLUMN`].
    #[default]
    Full,
    /// Every column except [`OPTIONAL_COLUMN`].
    Reduced,
}

impl ColumnSet {
    /// Whether this set includes the optional column.
    #[must_use]
    pub const fn includes_optional(self) -> bool {
        matches!(self, Self::Full)
    }

    /// Whether the named column is part of this set.
    #[must_use]
    pub fn contains(self, column: &str) -> bool {
        REQUIRED_COLUMNS.contains(&column) || (self.includes_optional() && column == OPTIONAL_COLUMN)
    }

    /// Column names in this set, in row order.
    #[must_use]
    pub fn names(self) -> Vec<&'static str> {
        let mut names = REQUIRED_COLUMNS.to_vec();
        if self.includes_optional() {
            names.insert(9, OPTIONAL_COLUMN);
        }
        names
    }
}
