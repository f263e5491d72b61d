use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::*;
use crate::aggregate::{self, build_all_tasks, combine_all_tasks};
use crate::db::{routines, tasks, RegimenDB};
use crate::schedule::{self, add_task_to_schedule, sort_tasks_in_schedule_by_date};

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleTask {
    pub task_id: String,
    /// Target calendar day in the source routine's zone.
    pub new_date: NaiveDate,
    /// Shift every ACTIVE occurrence of the key in the routine by the same
    /// number of days.
    #[serde(default)]
    pub all_of_key: bool,
}

#[derive(Debug, Serialize)]
pub struct RescheduleOutcome {
    pub source: Routine,
    pub destination: Routine,
    pub tasks: Vec<TaskInstance>,
    #[serde(skip)]
    pub events: Vec<Event>,
}

/// Move occurrences to another day, re-parenting them to whichever routine
/// covers that day (or a new one).
///
/// Destination lookup: an ACTIVE routine of the same user and part whose
/// range contains the new dates, else the nearest one starting after them,
/// else a fresh routine. A source left without live rows is soft-deleted.
pub fn reschedule_task(db: &RegimenDB, req: RescheduleTask) -> Result<RescheduleOutcome, RegimenError> {
    validate_id("task_id", &req.task_id)?;
    let now = crate::db::now();

    db.with_tx(|tx| {
        let task = tasks::get_task(tx, &req.task_id)?
            .filter(TaskInstance::is_live)
            .ok_or(RegimenError::NotFound)?;
        if task.status != TaskStatus::Active {
            return Err(RegimenError::declined("only active tasks can be rescheduled"));
        }
        let mut source = routines::require_routine(tx, &task.routine_id)?;
        let src_tz = source.tz();
        let target = dates::midnight_of(req.new_date, src_tz);
        let delta = (req.new_date - dates::date_key(task.starts_at, src_tz)).num_days();
        if delta == 0 {
            return Err(RegimenError::declined("the task is already on that date"));
        }

        let mut moving: Vec<TaskInstance> = if req.all_of_key {
            tasks::live_tasks_by_key(tx, &source.id, &task.key)?
                .into_iter()
                .filter(|t| t.status == TaskStatus::Active)
                .collect()
        } else {
            vec![task.clone()]
        };

        for m in &moving {
            schedule::remove_instance(&mut source.final_schedule, &m.id);
            aggregate::remove_instance(&mut source.all_tasks, &m.key, &m.id);
        }
        for m in &mut moving {
            m.starts_at = dates::shift_days(m.starts_at, delta, src_tz);
            m.expires_at = dates::shift_days(m.expires_at, delta, src_tz);
        }
        let lo = moving.iter().map(|m| m.starts_at).min().unwrap_or(target);
        let hi = moving.iter().map(|m| m.starts_at).max().unwrap_or(target);

        let found = match routines::find_covering_routine(tx, &source.user_id, &source.part, lo, hi)? {
            Some(r) => Some(r),
            None => routines::find_next_routine(tx, &source.user_id, &source.part, lo)?,
        };

        let (destination, is_new) = match found {
            Some(r) if r.id == source.id => {
                add_moved(&mut source, &mut moving)?;
                source.refresh_bounds(now);
                source.concerns_from_tasks();
                routines::save_routine(tx, &mut source)?;
                (source.clone(), false)
            }
            found => {
                let is_new = found.is_none();
                let mut dest = found.unwrap_or_else(|| {
                    empty_routine(&source.user_id, &source.part, &source.time_zone, now)
                });
                add_moved(&mut dest, &mut moving)?;
                dest.refresh_bounds(now);
                dest.concerns_from_tasks();
                if is_new {
                    routines::insert_routine(tx, &dest)?;
                } else {
                    routines::save_routine(tx, &mut dest)?;
                }

                source.final_schedule = sort_tasks_in_schedule_by_date(source.final_schedule);
                if !source.refresh_bounds(now) {
                    info!(routine_id = %source.id, "last task moved out, routine deleted");
                }
                source.concerns_from_tasks();
                routines::save_routine(tx, &mut source)?;
                (dest, is_new)
            }
        };

        for m in &moving {
            tasks::move_task(tx, &m.id, &m.routine_id, m.starts_at, m.expires_at)?;
        }

        info!(
            task_id = %task.id,
            moved = moving.len(),
            days = delta,
            source_id = %source.id,
            destination_id = %destination.id,
            new_routine = is_new,
            "tasks rescheduled"
        );
        let events = vec![Event::new(&source.user_id, Counter::TasksRescheduled, moving.len())];
        Ok(RescheduleOutcome { source, destination, tasks: moving, events })
    })
}

/// Put already re-dated rows into `dest`'s views and point them at it.
/// Declines when `dest` already has a live occurrence of the key that day.
fn add_moved(dest: &mut Routine, moving: &mut [TaskInstance]) -> Result<(), RegimenError> {
    let tz = dest.tz();
    for m in moving.iter() {
        let day = dates::date_key(m.starts_at, tz);
        let clash = dest
            .all_tasks
            .iter()
            .filter(|a| a.key == m.key)
            .flat_map(|a| a.live_ids())
            .any(|e| e.id != m.id && dates::date_key(e.starts_at, tz) == day);
        if clash {
            return Err(RegimenError::declined(format!(
                "'{}' is already scheduled on {day}",
                m.name
            )));
        }
    }
    for m in moving.iter_mut() {
        m.routine_id = dest.id.clone();
    }
    let added = build_all_tasks(moving);
    for a in &added {
        add_task_to_schedule(&mut dest.final_schedule, &a.key, &a.concern, &a.ids, tz);
    }
    dest.all_tasks = combine_all_tasks(std::mem::take(&mut dest.all_tasks), added);
    dest.final_schedule = sort_tasks_in_schedule_by_date(std::mem::take(&mut dest.final_schedule));
    Ok(())
}
