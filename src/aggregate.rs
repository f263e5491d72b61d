//! Per-key rollups ("all tasks") embedded in each routine.
//!
//! One entry per distinct task key. `ids` mirrors the task rows of that key in
//! the routine one-to-one, soft-deleted rows included (they carry
//! `deleted_on` and drop out of every counter).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{TaskInstance, TaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdEntry {
    pub id: String,
    pub starts_at: DateTime<Utc>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_on: Option<DateTime<Utc>>,
}

impl IdEntry {
    pub fn from_instance(t: &TaskInstance) -> Self {
        Self {
            id: t.id.clone(),
            starts_at: t.starts_at,
            status: t.status,
            deleted_on: t.deleted_on,
        }
    }

    pub fn is_live(&self) -> bool {
        self.deleted_on.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllTaskAggregate {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub part: String,
    pub concern: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instruction: String,
    pub total: usize,
    pub completed: usize,
    /// Live occurrences that expired without a reported outcome.
    pub unknown: usize,
    pub ids: Vec<IdEntry>,
}

impl AllTaskAggregate {
    pub fn empty(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: String::new(),
            icon: String::new(),
            color: String::new(),
            part: String::new(),
            concern: String::new(),
            description: String::new(),
            instruction: String::new(),
            total: 0,
            completed: 0,
            unknown: 0,
            ids: Vec::new(),
        }
    }

    /// Display metadata copied from one instance; no ids yet.
    pub fn from_instance(t: &TaskInstance) -> Self {
        Self {
            key: t.key.clone(),
            name: t.name.clone(),
            icon: t.icon.clone(),
            color: t.color.clone(),
            part: t.part.clone(),
            concern: t.concern.clone(),
            description: t.description.clone(),
            instruction: t.instruction.clone(),
            ..Self::empty(t.key.clone())
        }
    }

    pub fn recount(&mut self) {
        self.ids.sort_by(|a, b| a.starts_at.cmp(&b.starts_at).then_with(|| a.id.cmp(&b.id)));
        let live = || self.ids.iter().filter(|e| e.is_live());
        self.total = live().count();
        self.completed = live().filter(|e| e.status == TaskStatus::Completed).count();
        self.unknown = live().filter(|e| e.status == TaskStatus::Expired).count();
    }

    pub fn live_ids(&self) -> impl Iterator<Item = &IdEntry> {
        self.ids.iter().filter(|e| e.is_live())
    }
}

/// Group instances by key. Entry order follows first appearance.
pub fn build_all_tasks(instances: &[TaskInstance]) -> Vec<AllTaskAggregate> {
    let mut out: Vec<AllTaskAggregate> = Vec::new();
    for t in instances {
        let idx = match out.iter().position(|a| a.key == t.key) {
            Some(i) => i,
            None => {
                out.push(AllTaskAggregate::from_instance(t));
                out.len() - 1
            }
        };
        out[idx].ids.push(IdEntry::from_instance(t));
    }
    for a in &mut out {
        a.recount();
    }
    out
}

/// Merge two aggregate lists by key, de-duplicating ids by instance id.
/// Entries are never dropped here, even when their ids are empty.
pub fn combine_all_tasks(
    old_all_tasks: Vec<AllTaskAggregate>,
    new_all_tasks: Vec<AllTaskAggregate>,
) -> Vec<AllTaskAggregate> {
    let mut out = old_all_tasks;
    for mut incoming in new_all_tasks {
        match out.iter_mut().find(|a| a.key == incoming.key) {
            Some(existing) => {
                for entry in incoming.ids {
                    if !existing.ids.iter().any(|e| e.id == entry.id) {
                        existing.ids.push(entry);
                    }
                }
            }
            None => {
                let mut seen = std::collections::HashSet::new();
                incoming.ids.retain(|e| seen.insert(e.id.clone()));
                out.push(incoming);
            }
        }
    }
    for a in &mut out {
        a.recount();
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct InstancePatch {
    pub status: Option<TaskStatus>,
    pub starts_at: Option<DateTime<Utc>>,
    pub deleted_on: Option<DateTime<Utc>>,
}

/// Patch one id tuple in place and recount its entry. Returns false when the
/// key or id isn't present (drift; the reconciliation pass repairs it).
pub fn patch_instance(
    all_tasks: &mut [AllTaskAggregate],
    key: &str,
    id: &str,
    patch: &InstancePatch,
) -> bool {
    let Some(agg) = all_tasks.iter_mut().find(|a| a.key == key) else {
        return false;
    };
    let Some(entry) = agg.ids.iter_mut().find(|e| e.id == id) else {
        return false;
    };
    if let Some(s) = patch.status {
        entry.status = s;
    }
    if let Some(at) = patch.starts_at {
        entry.starts_at = at;
    }
    if let Some(d) = patch.deleted_on {
        entry.deleted_on = Some(d);
    }
    agg.recount();
    true
}

/// Take one id tuple out of the rollup (the instance moved elsewhere).
/// An entry left without ids goes with it.
pub fn remove_instance(all_tasks: &mut Vec<AllTaskAggregate>, key: &str, id: &str) -> bool {
    let Some(pos) = all_tasks.iter().position(|a| a.key == key) else {
        return false;
    };
    let agg = &mut all_tasks[pos];
    let before = agg.ids.len();
    agg.ids.retain(|e| e.id != id);
    let removed = agg.ids.len() != before;
    if agg.ids.is_empty() {
        all_tasks.remove(pos);
    } else {
        agg.recount();
    }
    removed
}

#[cfg(test)]
#[path = "aggregate_tests.rs"]
mod aggregate_tests;
