use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::reconcile::reconcile_in;
use super::*;
use crate::aggregate::{patch_instance, InstancePatch};
use crate::db::{routines, tasks, RegimenDB};

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeStatus {
    /// Explicit instances. Either this or `routine_id` (optionally narrowed
    /// by `key`) must be given.
    #[serde(default)]
    pub task_ids: Option<Vec<String>>,
    #[serde(default)]
    pub routine_id: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    pub status: TaskStatus,
}

#[derive(Debug, Serialize)]
pub struct StatusOutcome {
    pub tasks: Vec<TaskInstance>,
    pub routines: Vec<Routine>,
    #[serde(skip)]
    pub events: Vec<Event>,
}

/// Complete or cancel ACTIVE instances.
///
/// Only ACTIVE rows transition; anything else in the selection is left as is.
/// A routine follows when every live instance ends up in the new status.
pub fn change_status(db: &RegimenDB, req: ChangeStatus) -> Result<StatusOutcome, RegimenError> {
    let (routine_status, counter) = match req.status {
        TaskStatus::Completed => (RoutineStatus::Completed, Counter::TasksCompleted),
        TaskStatus::Canceled => (RoutineStatus::Canceled, Counter::TasksCanceled),
        other => {
            return Err(RegimenError::InvalidStatus(format!(
                "{other} can't be set directly; use completed or canceled"
            )))
        }
    };
    let explicit = req.task_ids.as_ref().is_some_and(|ids| !ids.is_empty());
    if !explicit && req.routine_id.is_none() {
        return Err(RegimenError::Validation("task_ids or routine_id is required".into()));
    }
    let now = crate::db::now();

    db.with_tx(|tx| {
        let selected: Vec<TaskInstance> = match (&req.task_ids, &req.routine_id) {
            (Some(ids), _) if !ids.is_empty() => tasks::tasks_by_ids(tx, ids)?,
            (_, Some(rid)) => match &req.key {
                Some(key) => tasks::live_tasks_by_key(tx, rid, key)?,
                None => tasks::live_tasks_by_routine(tx, rid)?,
            },
            _ => Vec::new(),
        };
        let candidates: Vec<String> = selected
            .iter()
            .filter(|t| t.is_live() && t.status == TaskStatus::Active)
            .map(|t| t.id.clone())
            .collect();
        let completed_at = (req.status == TaskStatus::Completed).then_some(now);
        let changed = tasks::set_status_if_active(tx, &candidates, req.status, completed_at)?;
        if changed.is_empty() {
            return Err(RegimenError::declined(format!("no active tasks to mark {}", req.status)));
        }

        let updated = tasks::tasks_by_ids(tx, &changed)?;
        let touched: BTreeSet<&str> = updated.iter().map(|t| t.routine_id.as_str()).collect();
        let patch = InstancePatch { status: Some(req.status), ..Default::default() };
        let mut out_routines = Vec::new();
        for rid in touched {
            let Some(mut routine) = routines::get_routine(tx, rid)? else { continue };
            for t in updated.iter().filter(|t| t.routine_id == rid) {
                if !patch_instance(&mut routine.all_tasks, &t.key, &t.id, &patch) {
                    debug!(routine_id = rid, task_id = %t.id, "tuple missing from rollup");
                }
            }
            routines::save_routine(tx, &mut routine)?;
            // promotion below reads the rollup, so it must match the rows first
            reconcile_in(tx, rid, now)?;
            let Some(mut routine) = routines::get_routine(tx, rid)? else { continue };

            let all_done = {
                let mut live = routine.all_tasks.iter().flat_map(|a| a.live_ids()).peekable();
                live.peek().is_some() && live.all(|e| e.status == req.status)
            };
            if all_done && routine.status == RoutineStatus::Active {
                routine.status = routine_status;
                info!(routine_id = rid, status = %routine_status, "routine finished");
                routines::save_routine(tx, &mut routine)?;
            }
            out_routines.push(routine);
        }

        info!(changed = changed.len(), status = %req.status, "task status changed");
        let user_id = updated.first().map(|t| t.user_id.clone()).unwrap_or_default();
        let events = vec![Event::new(&user_id, counter, changed.len())];
        Ok(StatusOutcome { tasks: updated, routines: out_routines, events })
    })
}
