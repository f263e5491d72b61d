use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use super::*;
use crate::aggregate::{AllTaskAggregate, IdEntry};
use crate::db::{routines, tasks, RegimenDB};

#[derive(Debug, Default, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    /// Routines whose stored views disagreed with their rows.
    pub fixed: Vec<String>,
}

/// Rebuild one routine's rollup, schedule and bounds from its rows and write
/// it back if anything differs. Entries with no rows left are kept (empty),
/// matching what incremental edits leave behind. Returns whether it saved.
pub(crate) fn reconcile_in(
    c: &Connection,
    routine_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, RegimenError> {
    let Some(stored) = routines::get_routine(c, routine_id)? else {
        return Ok(false);
    };
    let rows = tasks::tasks_by_routine(c, routine_id)?;

    let mut all_tasks: Vec<AllTaskAggregate> = stored
        .all_tasks
        .iter()
        .map(|a| AllTaskAggregate { ids: Vec::new(), ..a.clone() })
        .collect();
    for t in &rows {
        let idx = match all_tasks.iter().position(|a| a.key == t.key) {
            Some(i) => i,
            None => {
                all_tasks.push(AllTaskAggregate::from_instance(t));
                all_tasks.len() - 1
            }
        };
        if all_tasks[idx].name.is_empty() {
            let ids = std::mem::take(&mut all_tasks[idx].ids);
            all_tasks[idx] = AllTaskAggregate { ids, ..AllTaskAggregate::from_instance(t) };
        }
        all_tasks[idx].ids.push(IdEntry::from_instance(t));
    }
    for a in &mut all_tasks {
        a.recount();
    }

    let mut fresh = stored.clone();
    fresh.all_tasks = all_tasks;
    fresh.final_schedule = build_schedule(&rows, stored.tz());
    if fresh.refresh_bounds(now) {
        fresh.deleted_on = None;
    }
    fresh.concerns_from_tasks();

    if fresh == stored {
        return Ok(false);
    }
    warn!(
        routine_id,
        rows = rows.len(),
        was_deleted = stored.deleted_on.is_some(),
        "routine views drifted from rows, rewriting"
    );
    routines::save_routine(c, &mut fresh)?;
    Ok(true)
}

/// Reconcile the given routines, one transaction each.
pub fn reconcile_routines(db: &RegimenDB, ids: &[String]) -> Result<ReconcileReport, RegimenError> {
    let now = crate::db::now();
    let mut report = ReconcileReport::default();
    for id in ids {
        report.checked += 1;
        if db.with_tx(|tx| reconcile_in(tx, id, now))? {
            report.fixed.push(id.clone());
        }
    }
    Ok(report)
}

/// Sweep every routine that isn't soft-deleted.
pub fn reconcile_all(db: &RegimenDB) -> Result<ReconcileReport, RegimenError> {
    let ids = db.read(routines::live_routine_ids)?;
    let report = reconcile_routines(db, &ids)?;
    if !report.fixed.is_empty() {
        info!(checked = report.checked, fixed = report.fixed.len(), "reconcile pass done");
    }
    Ok(report)
}
