use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

use super::*;
use crate::db::{routines, tasks, users, RegimenDB};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoutine {
    pub user_id: String,
    pub part: String,
    /// Falls back to the user's profile zone, then UTC.
    #[serde(default)]
    pub time_zone: Option<String>,
    /// Calendar date in the routine's zone; today when absent.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    pub templates: Vec<TaskTemplate>,
}

/// Expand templates into dated rows and persist them with a new routine.
///
/// Keys still on cooldown from an earlier cycle are skipped and reported in
/// `skipped_keys`; when nothing is left the request is declined with the
/// date the first key frees up.
pub fn create_routine(db: &RegimenDB, req: CreateRoutine) -> Result<RoutineOutcome, RegimenError> {
    validate_id("user_id", &req.user_id)?;
    validate_id("part", &req.part)?;
    validate_templates(&req.templates)?;
    if let Some(tz) = &req.time_zone {
        dates::parse_time_zone(tz)?;
    }
    let now = crate::db::now();

    db.with_tx(|tx| {
        let profile = users::get_user(tx, &req.user_id)?;
        let tz_name = req
            .time_zone
            .clone()
            .or_else(|| profile.map(|p| p.time_zone))
            .unwrap_or_else(|| "UTC".into());
        let tz = dates::parse_time_zone(&tz_name)?;
        let start = start_of(req.start_date, tz, now);

        let cooling: HashMap<String, DateTime<Utc>> =
            tasks::cooldowns(tx, &req.user_id, start)?.into_iter().collect();

        let mut routine = empty_routine(&req.user_id, req.part.trim(), &tz_name, now);
        let mut rows = Vec::new();
        let mut skipped = Vec::new();
        let mut earliest_free: Option<DateTime<Utc>> = None;
        for t in &req.templates {
            let key = t.key.trim();
            if let Some(until) = cooling.get(key) {
                skipped.push(key.to_string());
                earliest_free = Some(earliest_free.map_or(*until, |e| e.min(*until)));
                continue;
            }
            rows.extend(expand_template(t, &req.user_id, &routine.id, &routine.part, start, tz, now));
        }

        if rows.is_empty() {
            let free = earliest_free.unwrap_or(start);
            return Err(RegimenError::declined_until(
                "these tasks are already scheduled for this week",
                dates::date_key(free, tz),
            ));
        }

        rebuild_views(&mut routine, &rows, now);
        routines::insert_routine(tx, &routine)?;
        tasks::insert_tasks(tx, &rows)?;

        info!(
            routine_id = %routine.id,
            user_id = %routine.user_id,
            part = %routine.part,
            tasks = rows.len(),
            skipped = skipped.len(),
            "routine created"
        );
        let mut out = RoutineOutcome::new(routine, rows, Counter::TasksCreated);
        out.skipped_keys = skipped;
        Ok(out)
    })
}
