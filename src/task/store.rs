// src/task/store.rs

//! In-memory task collection.
//!
//! Inside one process the scheduler loop owns the store behind a single
//! async mutex ([`SharedTaskStore`]). Manual commands run as separate
//! processes and edit the task file; the runtime folds those edits back in
//! with [`TaskStore::merge_external`] before it ticks or saves.

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::{PunchclockError, Result};
use crate::task::model::{Task, TaskId};

pub type SharedTaskStore = Arc<Mutex<TaskStore>>;

#[derive(Debug, Default, Clone)]
pub struct TaskStore {
    tasks: Vec<Task>,
    dirty: bool,
}

impl TaskStore {
    /// Build a store from persisted records, fixing any that violate the
    /// lifecycle invariants.
    pub fn new(mut tasks: Vec<Task>) -> Self {
        for task in tasks.iter_mut() {
            task.normalize();
        }
        Self {
            tasks,
            dirty: false,
        }
    }

    pub fn into_shared(self) -> SharedTaskStore {
        Arc::new(Mutex::new(self))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Clone of every task, for handing to the persistence layer.
    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.clone()
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    /// Mutable access; the store is considered changed afterwards.
    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        let task = self.tasks.iter_mut().find(|t| t.id() == id)?;
        self.dirty = true;
        Some(task)
    }

    /// Look up a task by full id or by the short prefix shown in listings.
    pub fn resolve(&self, needle: &str) -> Result<TaskId> {
        let needle = needle.trim().to_lowercase();
        let matches: Vec<TaskId> = self
            .tasks
            .iter()
            .map(Task::id)
            .filter(|id| id.to_string().replace('-', "").starts_with(&needle.replace('-', "")))
            .collect();

        match matches.as_slice() {
            [one] => Ok(*one),
            [] => Err(PunchclockError::TaskNotFound(needle)),
            _ => Err(PunchclockError::InvalidTask(format!(
                "id prefix '{needle}' matches {} tasks",
                matches.len()
            ))),
        }
    }

    pub fn add(&mut self, task: Task) -> TaskId {
        let id = task.id();
        info!(task = %id, name = %task.name, date = %task.date(), "task added");
        self.tasks.push(task);
        self.dirty = true;
        id
    }

    pub fn remove(&mut self, id: TaskId) -> Result<Task> {
        let idx = self
            .tasks
            .iter()
            .position(|t| t.id() == id)
            .ok_or_else(|| PunchclockError::TaskNotFound(id.to_string()))?;
        self.dirty = true;
        Ok(self.tasks.remove(idx))
    }

    /// Ids of the tasks scheduled on `day`, ordered by check-in then
    /// check-out time.
    pub fn ids_for_day(&self, day: NaiveDate) -> Vec<TaskId> {
        let mut todays: Vec<&Task> = self.tasks.iter().filter(|t| t.date() == day).collect();
        todays.sort_by_key(|t| (t.check_in_time(), t.check_out_time()));
        todays.into_iter().map(Task::id).collect()
    }

    /// Manual progress edit. Clears any location restriction, as the user
    /// has taken over.
    pub fn set_progress(&mut self, id: TaskId, check_in_done: bool, check_out_done: bool) -> Result<()> {
        let task = self
            .get_mut(id)
            .ok_or_else(|| PunchclockError::TaskNotFound(id.to_string()))?;
        task.set_progress(check_in_done, check_out_done);
        task.clear_restriction();
        debug!(task = %id, check_in_done, check_out_done, "manual progress update");
        Ok(())
    }

    pub fn complete(&mut self, id: TaskId) -> Result<()> {
        self.set_progress(id, true, true)
    }

    /// Manual reset: clear progress, restriction, abnormal state and repair
    /// marks.
    pub fn reset(&mut self, id: TaskId) -> Result<()> {
        let task = self
            .get_mut(id)
            .ok_or_else(|| PunchclockError::TaskNotFound(id.to_string()))?;
        task.reset();
        info!(task = %id, "task reset");
        Ok(())
    }

    /// Clear the restriction on every task. Returns how many were cleared.
    pub fn clear_restrictions(&mut self) -> usize {
        let mut cleared = 0;
        for task in self.tasks.iter_mut().filter(|t| t.is_restricted()) {
            task.clear_restriction();
            cleared += 1;
        }
        if cleared > 0 {
            self.dirty = true;
            info!(cleared, "cleared network restrictions");
        }
        cleared
    }

    /// Apply edits another writer made to the persisted list.
    ///
    /// `base` is the list as this store last read or wrote it, `disk` is
    /// the list as it is now. Tasks added on disk are added, tasks removed
    /// on disk are removed, and tasks whose record changed on disk replace
    /// the in-memory copy (the manual edit wins). Everything else keeps the
    /// in-memory state. Returns how many tasks were touched.
    pub fn merge_external(&mut self, base: &[Task], disk: &[Task]) -> usize {
        let known = |list: &[Task], id: TaskId| list.iter().any(|t| t.id() == id);

        let before = self.tasks.len();
        self.tasks
            .retain(|t| !(known(base, t.id()) && !known(disk, t.id())));
        let mut applied = before - self.tasks.len();

        for theirs in disk {
            let id = theirs.id();
            let changed = match base.iter().find(|b| b.id() == id) {
                Some(ours) => ours != theirs,
                None => !known(&self.tasks, id),
            };
            if !changed {
                continue;
            }

            let mut theirs = theirs.clone();
            theirs.normalize();
            match self.tasks.iter_mut().find(|t| t.id() == id) {
                Some(slot) => *slot = theirs,
                None => self.tasks.push(theirs),
            }
            applied += 1;
        }

        if applied > 0 {
            info!(applied, "merged task edits made outside the runtime");
        }
        applied
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Returns whether anything changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}
