use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::reconcile::reconcile_in;
use super::*;
use crate::aggregate::{patch_instance, InstancePatch};
use crate::db::{routines, tasks, RegimenDB};
use crate::schedule::{self, sort_tasks_in_schedule_by_date};

const MAX_DELETE_IDS: usize = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteTasks {
    pub task_ids: Vec<String>,
    /// Also delete every live occurrence of the same key in the same routine.
    #[serde(default)]
    pub all_of_key: bool,
}

#[derive(Debug, Serialize)]
pub struct DeleteOutcome {
    pub deleted: Vec<String>,
    /// Routines left with no live instance, now soft-deleted.
    pub routines_deleted: Vec<String>,
    pub routines: Vec<Routine>,
    #[serde(skip)]
    pub events: Vec<Event>,
}

/// Soft-delete instances and keep their routines' views in step.
///
/// Ids that are unknown or already deleted are ignored, so repeating a delete
/// is harmless.
pub fn delete_tasks(db: &RegimenDB, req: DeleteTasks) -> Result<DeleteOutcome, RegimenError> {
    if req.task_ids.is_empty() {
        return Err(RegimenError::Validation("task_ids must not be empty".into()));
    }
    if req.task_ids.len() > MAX_DELETE_IDS {
        return Err(RegimenError::Validation(format!("too many task_ids (max {MAX_DELETE_IDS})")));
    }
    let now = crate::db::now();

    db.with_tx(|tx| {
        let requested: Vec<TaskInstance> = tasks::tasks_by_ids(tx, &req.task_ids)?
            .into_iter()
            .filter(TaskInstance::is_live)
            .collect();
        let mut targets: Vec<TaskInstance> = Vec::new();
        for t in requested {
            let group = if req.all_of_key {
                tasks::live_tasks_by_key(tx, &t.routine_id, &t.key)?
            } else {
                vec![t]
            };
            for g in group {
                if !targets.iter().any(|x| x.id == g.id) {
                    targets.push(g);
                }
            }
        }
        let ids: Vec<String> = targets.iter().map(|t| t.id.clone()).collect();
        let deleted = tasks::soft_delete_tasks(tx, &ids, now)?;

        let touched: BTreeSet<&str> = targets.iter().map(|t| t.routine_id.as_str()).collect();
        let mut routines_deleted = Vec::new();
        let mut out = Vec::new();
        for rid in touched {
            let Some(mut routine) = routines::get_routine(tx, rid)? else { continue };
            let patch = InstancePatch { deleted_on: Some(now), ..Default::default() };
            for t in targets.iter().filter(|t| t.routine_id == rid) {
                patch_instance(&mut routine.all_tasks, &t.key, &t.id, &patch);
                schedule::remove_instance(&mut routine.final_schedule, &t.id);
            }
            routine.final_schedule = sort_tasks_in_schedule_by_date(routine.final_schedule);
            if tasks::count_live_in_routine(tx, rid)? == 0 && routine.deleted_on.is_none() {
                routine.deleted_on = Some(now);
                routines_deleted.push(rid.to_string());
            } else {
                routine.refresh_bounds(now);
            }
            routine.concerns_from_tasks();
            routines::save_routine(tx, &mut routine)?;
            // catches tuples the patch above couldn't find
            reconcile_in(tx, rid, now)?;
            if let Some(r) = routines::get_routine(tx, rid)? {
                out.push(r);
            }
        }

        let user_id = targets.first().map(|t| t.user_id.clone()).unwrap_or_default();
        info!(
            requested = req.task_ids.len(),
            deleted = deleted.len(),
            routines_deleted = routines_deleted.len(),
            "tasks deleted"
        );
        let events = if deleted.is_empty() {
            Vec::new()
        } else {
            vec![Event::new(&user_id, Counter::TasksDeleted, deleted.len())]
        };
        Ok(DeleteOutcome { deleted, routines_deleted, routines: out, events })
    })
}
