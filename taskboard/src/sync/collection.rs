//! The local task collection.
//!
//! [`TaskCollection`] is the single owner of the in-memory board. Pull
//! results, change notifications and optimistic patches all go through its
//! idempotent merge operations, each of which reports whether the visible
//! snapshot changed.

use std::collections::{HashMap, HashSet, VecDeque};

use taskboard_proto::task::{Scope, Status, Task, TaskId};

/// How many removed ids are remembered as [`SyncState::Absent`]. Older ones
/// read as [`SyncState::Unknown`] again.
pub const RETIRED_CAPACITY: usize = 1024;

/// Sync state of one identifier as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// Never seen.
    Unknown,
    /// An optimistic status patch is applied but not yet confirmed.
    OptimisticPending,
    /// Last written by a pull or a notification.
    Reconciled,
    /// Seen, then removed.
    Absent,
}

/// Removed ids, oldest evicted first.
#[derive(Debug, Clone, Default)]
struct Retired {
    order: VecDeque<TaskId>,
    ids: HashSet<TaskId>,
}

impl Retired {
    fn contains(&self, id: &TaskId) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: &TaskId) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id.clone());
        while self.order.len() > RETIRED_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, id: &TaskId) {
        if self.ids.remove(id) {
            self.order.retain(|existing| existing != id);
        }
    }
}

/// One status column of the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardColumn {
    /// Status the column holds.
    pub status: Status,
    /// Column heading.
    pub title: &'static str,
    /// Tasks in collection order.
    pub tasks: Vec<Task>,
}

/// Ordered mapping of task id to task, filtered to one scope.
#[derive(Debug, Clone)]
pub struct TaskCollection {
    scope: Scope,
    /// Display order; insertion order of first appearance.
    order: Vec<TaskId>,
    tasks: HashMap<TaskId, Task>,
    pending: HashSet<TaskId>,
    retired: Retired,
}

impl TaskCollection {
    /// Creates an empty collection for `scope`.
    #[must_use]
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            order: Vec::new(),
            tasks: HashMap::new(),
            pending: HashSet::new(),
            retired: Retired::default(),
        }
    }

    /// The scope rows are filtered against.
    #[must_use]
    pub const fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Looks up a task.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Tasks in display order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Task> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .cloned()
            .collect()
    }

    /// Tasks grouped into the three status columns, in board order.
    #[must_use]
    pub fn board(&self) -> Vec<BoardColumn> {
        Status::ALL
            .into_iter()
            .map(|status| BoardColumn {
                status,
                title: status.column_name(),
                tasks: self
                    .order
                    .iter()
                    .filter_map(|id| self.tasks.get(id))
                    .filter(|task| task.status == status)
                    .cloned()
                    .collect(),
            })
            .collect()
    }

    /// Sync state of `id`.
    #[must_use]
    pub fn sync_state(&self, id: &TaskId) -> SyncState {
        if self.tasks.contains_key(id) {
            if self.pending.contains(id) {
                SyncState::OptimisticPending
            } else {
                SyncState::Reconciled
            }
        } else if self.retired.contains(id) {
            SyncState::Absent
        } else {
            SyncState::Unknown
        }
    }

    fn admits(&self, task: &Task) -> bool {
        if self.scope.admits(&task.created_by) {
            true
        } else {
            tracing::debug!(
                task_id = %task.id,
                owner = %task.created_by,
                "discarding out-of-scope row"
            );
            false
        }
    }

    fn mark_reconciled(&mut self, id: &TaskId) {
        self.pending.remove(id);
        self.retired.remove(id);
    }

    /// Replaces the whole collection with `rows`.
    ///
    /// Duplicate ids keep the position of their first occurrence and the
    /// content of their last. Out-of-scope rows are dropped.
    pub fn replace_all(&mut self, rows: Vec<Task>) -> bool {
        let mut order = Vec::with_capacity(rows.len());
        let mut tasks = HashMap::with_capacity(rows.len());
        for task in rows {
            if !self.admits(&task) {
                continue;
            }
            if !tasks.contains_key(&task.id) {
                order.push(task.id.clone());
            }
            tasks.insert(task.id.clone(), task);
        }

        let changed = order != self.order || tasks != self.tasks;
        for id in &self.order {
            if !tasks.contains_key(id) {
                self.retired.insert(id);
            }
        }
        self.pending.retain(|id| tasks.contains_key(id));
        for id in &order {
            self.mark_reconciled(id);
        }
        self.order = order;
        self.tasks = tasks;
        changed
    }

    /// Adds `task` if its id is absent.
    pub fn apply_insert(&mut self, task: Task) -> bool {
        if !self.admits(&task) {
            return false;
        }
        if self.tasks.contains_key(&task.id) {
            tracing::debug!(task_id = %task.id, "duplicate insert ignored");
            return false;
        }
        self.mark_reconciled(&task.id);
        self.order.push(task.id.clone());
        self.tasks.insert(task.id.clone(), task);
        true
    }

    /// Replaces the entry with the same id in place, or appends it.
    pub fn apply_update(&mut self, task: Task) -> bool {
        if !self.admits(&task) {
            return false;
        }
        self.mark_reconciled(&task.id);
        match self.tasks.get_mut(&task.id) {
            Some(existing) if *existing == task => false,
            Some(existing) => {
                *existing = task;
                true
            }
            None => {
                self.order.push(task.id.clone());
                self.tasks.insert(task.id.clone(), task);
                true
            }
        }
    }

    /// Removes `id` if present.
    pub fn apply_delete(&mut self, id: &TaskId) -> bool {
        if self.tasks.remove(id).is_none() {
            return false;
        }
        self.order.retain(|existing| existing != id);
        self.pending.remove(id);
        self.retired.insert(id);
        true
    }

    /// Rewrites the status of an existing task ahead of confirmation.
    pub fn apply_optimistic_status(&mut self, id: &TaskId, status: Status) -> bool {
        let Some(task) = self.tasks.get_mut(id) else {
            return false;
        };
        self.pending.insert(id.clone());
        if task.status == status {
            return false;
        }
        task.status = status;
        true
    }
}
