use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

use super::*;
use crate::access::AccessPolicy;
use crate::db::{routines, tasks, users, RegimenDB};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneMode {
    #[default]
    Copy,
    Steal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloneRoutine {
    /// Who receives the copy.
    pub user_id: String,
    pub source_routine_id: String,
    #[serde(default)]
    pub mode: CloneMode,
    /// First day of the cloned schedule; today when absent.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Only these keys; all keys when absent.
    #[serde(default)]
    pub task_keys: Option<Vec<String>>,
}

/// Duplicate a routine, one's own or (with access) someone else's, so that
/// it starts at `start_date`.
pub fn clone_routine(
    db: &RegimenDB,
    access: &dyn AccessPolicy,
    req: CloneRoutine,
) -> Result<RoutineOutcome, RegimenError> {
    validate_id("user_id", &req.user_id)?;
    validate_id("source_routine_id", &req.source_routine_id)?;

    let source = db
        .get_routine(&req.source_routine_id)?
        .filter(|r| r.deleted_on.is_none())
        .ok_or(RegimenError::NotFound)?;
    let foreign = source.user_id != req.user_id;
    if foreign && !access.can_clone(&req.user_id, &source.user_id, &source.part)? {
        return Err(RegimenError::declined("you don't have access to this routine"));
    }
    let now = crate::db::now();

    db.with_tx(|tx| {
        let source = routines::require_routine(tx, &source.id)?;
        let rows: Vec<TaskInstance> = tasks::live_tasks_by_routine(tx, &source.id)?
            .into_iter()
            .filter(|t| {
                req.task_keys
                    .as_ref()
                    .map_or(true, |keys| keys.iter().any(|k| k == &t.key))
            })
            .collect();
        let Some(earliest) = rows.iter().map(|t| t.starts_at).min() else {
            return Err(RegimenError::declined("nothing to copy from this routine"));
        };

        let tz_name = users::get_user(tx, &req.user_id)?
            .map_or_else(|| source.time_zone.clone(), |u| u.time_zone);
        let tz = dates::parse_time_zone(&tz_name)?;
        let start = start_of(req.start_date, tz, now);
        let shift = shift_to(earliest, source.tz(), start, tz);

        let mut routine = empty_routine(&req.user_id, &source.part, &tz_name, now);
        if foreign {
            let owner_name = users::get_user(tx, &source.user_id)?
                .map_or_else(|| source.user_id.clone(), |u| u.name);
            match req.mode {
                CloneMode::Copy => routine.copied_from = Some(owner_name),
                CloneMode::Steal => routine.stolen_from = Some(owner_name),
            }
        }
        let cooldown = dates::shift_days(start, WINDOW_DAYS, tz);
        let copies: Vec<TaskInstance> = rows
            .iter()
            .map(|t| {
                let mut c = shifted_copy(t, shift, &routine.id, &req.user_id, now);
                c.next_can_start_date = Some(cooldown);
                c
            })
            .collect();

        rebuild_views(&mut routine, &copies, now);
        routines::insert_routine(tx, &routine)?;
        tasks::insert_tasks(tx, &copies)?;

        info!(
            routine_id = %routine.id,
            source_id = %source.id,
            user_id = %req.user_id,
            tasks = copies.len(),
            foreign,
            "routine cloned"
        );
        let counter = match req.mode {
            CloneMode::Copy => Counter::TasksCopied,
            CloneMode::Steal => Counter::TasksStolen,
        };
        Ok(RoutineOutcome::new(routine, copies, counter))
    })
}
