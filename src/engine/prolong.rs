use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, info};

use super::*;
use crate::db::{routines, tasks, users, RegimenDB};

const MAX_LOOKBACK_DAYS: i64 = 60;

#[derive(Debug, Clone, Deserialize)]
pub struct ProlongRoutine {
    pub user_id: String,
    pub part: String,
    /// First day of the new cycle; today when absent.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub lookback_days: Option<i64>,
    /// Overrides the concern list stored on the user's profile.
    #[serde(default)]
    pub concerns: Option<Vec<String>>,
}

/// Carry the cadence of recently finished tasks into a new cycle.
///
/// Rows get fresh ids, so proof and analytics history stays keyed to the
/// instance it was recorded against.
pub fn prolong_routine(db: &RegimenDB, req: ProlongRoutine) -> Result<RoutineOutcome, RegimenError> {
    validate_id("user_id", &req.user_id)?;
    validate_id("part", &req.part)?;
    let lookback = req.lookback_days.unwrap_or(DEFAULT_LOOKBACK_DAYS);
    if !(1..=MAX_LOOKBACK_DAYS).contains(&lookback) {
        return Err(RegimenError::Validation(format!(
            "lookback_days must be 1..={MAX_LOOKBACK_DAYS}"
        )));
    }
    let now = crate::db::now();

    db.with_tx(|tx| {
        let profile = users::get_user(tx, &req.user_id)?;
        let tz_name = profile.as_ref().map_or_else(|| "UTC".to_string(), |p| p.time_zone.clone());
        let tz = dates::parse_time_zone(&tz_name)?;
        let start = start_of(req.start_date, tz, now);
        let window_end = dates::shift_days(start, WINDOW_DAYS, tz);

        // no concern list at all means nothing to filter against
        let current: Option<HashSet<String>> = req
            .concerns
            .clone()
            .or_else(|| profile.as_ref().map(|p| p.concerns_for(&req.part)))
            .map(|cs| cs.into_iter().collect());

        let cooling: HashMap<String, DateTime<Utc>> =
            tasks::cooldowns(tx, &req.user_id, start)?.into_iter().collect();

        let candidates: Vec<TaskInstance> = tasks::prolong_candidates(
            tx,
            &req.user_id,
            &req.part,
            dates::shift_days(start, -lookback, tz),
            start,
        )?
        .into_iter()
        .filter(|t| {
            // if the task is not required by the latest concerns, don't carry it over
            let wanted = current.as_ref().map_or(true, |cs| cs.contains(&t.concern));
            if !wanted {
                debug!(task_id = %t.id, concern = %t.concern, "concern resolved, not prolonging");
            }
            wanted && !cooling.contains_key(&t.key)
        })
        .collect();

        let Some(earliest) = candidates.iter().map(|t| t.starts_at).min() else {
            return Err(match cooling.values().min() {
                Some(free) => RegimenError::declined_until(
                    "these tasks can't be prolonged yet",
                    dates::date_key(*free, tz),
                ),
                None => RegimenError::declined("no tasks to prolong"),
            });
        };
        let shift = shift_to(earliest, tz, start, tz);

        let mut routine = empty_routine(&req.user_id, req.part.trim(), &tz_name, now);
        let mut seen: HashSet<(String, NaiveDate)> = HashSet::new();
        let mut rows = Vec::new();
        for t in &candidates {
            let mut row = shifted_copy(t, shift, &routine.id, &req.user_id, now);
            // a lookback longer than one cycle would otherwise spill past the window
            if row.starts_at >= window_end {
                continue;
            }
            if !seen.insert((row.key.clone(), dates::date_key(row.starts_at, tz))) {
                continue;
            }
            row.next_can_start_date = Some(window_end);
            rows.push(row);
        }

        rebuild_views(&mut routine, &rows, now);
        routines::insert_routine(tx, &routine)?;
        tasks::insert_tasks(tx, &rows)?;

        let sources: BTreeSet<&str> = candidates.iter().map(|t| t.routine_id.as_str()).collect();
        let mut replaced = 0;
        for id in sources {
            let Some(mut old) = routines::get_routine(tx, id)? else { continue };
            let still_running = old
                .all_tasks
                .iter()
                .flat_map(|a| a.live_ids())
                .any(|e| e.status == TaskStatus::Active);
            if old.status == RoutineStatus::Active && old.deleted_on.is_none() && !still_running {
                old.status = RoutineStatus::Replaced;
                routines::save_routine(tx, &mut old)?;
                replaced += 1;
            }
        }

        info!(
            routine_id = %routine.id,
            user_id = %routine.user_id,
            tasks = rows.len(),
            shifted_days = shift.days,
            replaced,
            "routine prolonged"
        );
        Ok(RoutineOutcome::new(routine, rows, Counter::TasksProlonged))
    })
}
