use std::collections::BTreeSet;

use serde::Serialize;
use tracing::info;

use super::reconcile::reconcile_in;
use super::*;
use crate::db::{routines, tasks, RegimenDB};

#[derive(Debug, Default, Serialize)]
pub struct ExpireReport {
    pub tasks_expired: usize,
    pub routines_expired: usize,
}

/// Age out ACTIVE instances whose window closed before `now`, then routines
/// that are past their last day with nothing left ACTIVE.
pub fn expire_overdue(db: &RegimenDB, now: DateTime<Utc>) -> Result<ExpireReport, RegimenError> {
    db.with_tx(|tx| {
        let overdue = tasks::overdue_active(tx, now)?;
        let ids: Vec<String> = overdue.iter().map(|t| t.id.clone()).collect();
        let tasks_expired = tasks::set_expired(tx, &ids)?;

        let touched: BTreeSet<&str> = overdue.iter().map(|t| t.routine_id.as_str()).collect();
        for rid in touched {
            reconcile_in(tx, rid, now)?;
        }

        let mut routines_expired = 0;
        for mut r in routines::stale_active_routines(tx, now)? {
            let running = r
                .all_tasks
                .iter()
                .flat_map(|a| a.live_ids())
                .any(|e| e.status == TaskStatus::Active);
            if running {
                continue;
            }
            r.status = RoutineStatus::Expired;
            routines::save_routine(tx, &mut r)?;
            routines_expired += 1;
        }

        if tasks_expired > 0 || routines_expired > 0 {
            info!(tasks_expired, routines_expired, "expired overdue work");
        }
        Ok(ExpireReport { tasks_expired, routines_expired })
    })
}
