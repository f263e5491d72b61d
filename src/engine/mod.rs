//! Routine consistency engine.
//!
//! Every operation runs in one IMMEDIATE transaction that covers the task
//! rows and every routine document it touches, so the three views (rows,
//! `all_tasks`, `final_schedule`) commit together. Routine writes bump
//! `revision`. [`reconcile_routines`] rebuilds the views from rows and is the
//! repair path for drift from anything outside this module.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::aggregate::build_all_tasks;
use crate::analytics::{Counter, Event};
use crate::dates;
use crate::db::{new_id, Routine, RoutineStatus, TaskInstance, TaskStatus};
use crate::error::RegimenError;
use crate::schedule::build_schedule;

mod clone;
mod create;
mod delete;
mod expire;
mod prolong;
mod reconcile;
mod reschedule;
mod status;

pub use clone::{clone_routine, CloneMode, CloneRoutine};
pub use create::{create_routine, CreateRoutine};
pub use delete::{delete_tasks, DeleteOutcome, DeleteTasks};
pub use expire::{expire_overdue, ExpireReport};
pub use prolong::{prolong_routine, ProlongRoutine};
pub use reconcile::{reconcile_all, reconcile_routines, ReconcileReport};
pub use reschedule::{reschedule_task, RescheduleOutcome, RescheduleTask};
pub use status::{change_status, ChangeStatus, StatusOutcome};

/// Length of one scheduling cycle.
pub const WINDOW_DAYS: i64 = 7;
/// Occurrences per key that fit in one cycle; the rest is deferred.
pub const MAX_PER_WINDOW: u32 = 7;
pub const DEFAULT_LOOKBACK_DAYS: i64 = 8;

const MAX_TEMPLATES: usize = 50;
const MAX_KEY_LEN: usize = 64;
const MAX_TEXT_LEN: usize = 2048;

/// What to schedule: one task key and how often per week.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskTemplate {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: String,
    pub concern: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instruction: String,
    /// Occurrences wanted per 7-day window.
    pub total: u32,
}

fn validate_templates(templates: &[TaskTemplate]) -> Result<(), RegimenError> {
    if templates.is_empty() {
        return Err(RegimenError::Validation("at least one task template is required".into()));
    }
    if templates.len() > MAX_TEMPLATES {
        return Err(RegimenError::Validation(format!("too many templates (max {MAX_TEMPLATES})")));
    }
    for t in templates {
        let key = t.key.trim();
        if key.is_empty() || key.chars().count() > MAX_KEY_LEN {
            return Err(RegimenError::Validation(format!(
                "task key must be 1..={MAX_KEY_LEN} characters"
            )));
        }
        if t.name.trim().is_empty() {
            return Err(RegimenError::Validation(format!("task '{key}' needs a name")));
        }
        if t.concern.trim().is_empty() {
            return Err(RegimenError::Validation(format!("task '{key}' needs a concern")));
        }
        if t.description.chars().count() > MAX_TEXT_LEN || t.instruction.chars().count() > MAX_TEXT_LEN {
            return Err(RegimenError::Validation(format!("task '{key}' text too long")));
        }
        if t.total == 0 {
            return Err(RegimenError::Validation(format!("task '{key}' total must be positive")));
        }
    }
    let mut keys: Vec<&str> = templates.iter().map(|t| t.key.trim()).collect();
    keys.sort_unstable();
    if keys.windows(2).any(|w| w[0] == w[1]) {
        return Err(RegimenError::Validation("duplicate task key in templates".into()));
    }
    Ok(())
}

pub(crate) fn validate_id(field: &str, v: &str) -> Result<(), RegimenError> {
    if v.trim().is_empty() {
        return Err(RegimenError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Day offsets of each occurrence within one window: `min(total, 7)`
/// occurrences spaced `round(max(7 / total, 1))` days apart.
pub fn occurrence_offsets(total: u32) -> Vec<i64> {
    if total == 0 {
        return Vec::new();
    }
    let count = total.min(MAX_PER_WINDOW) as i64;
    let spacing = (WINDOW_DAYS as f64 / total as f64).max(1.0).round() as i64;
    (0..count).map(|i| i * spacing).collect()
}

pub(crate) fn expand_template(
    t: &TaskTemplate,
    user_id: &str,
    routine_id: &str,
    part: &str,
    start: DateTime<Utc>,
    tz: Tz,
    now: DateTime<Utc>,
) -> Vec<TaskInstance> {
    let cooldown_until = dates::shift_days(start, WINDOW_DAYS, tz);
    occurrence_offsets(t.total)
        .into_iter()
        .map(|offset| {
            let starts_at = dates::shift_days(start, offset, tz);
            TaskInstance {
                id: new_id(),
                user_id: user_id.to_string(),
                routine_id: routine_id.to_string(),
                key: t.key.trim().to_string(),
                name: t.name.trim().to_string(),
                icon: t.icon.clone(),
                color: t.color.clone(),
                part: part.to_string(),
                concern: t.concern.trim().to_string(),
                description: t.description.clone(),
                instruction: t.instruction.clone(),
                status: TaskStatus::Active,
                starts_at,
                expires_at: dates::shift_days(starts_at, 1, tz),
                completed_at: None,
                deleted_on: None,
                next_can_start_date: Some(cooldown_until),
                proof_id: None,
                created_at: now,
            }
        })
        .collect()
}

/// Where a copy moves: calendar days forward, read in `from`, landing in `to`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Shift {
    pub days: i64,
    pub from: Tz,
    pub to: Tz,
}

impl Shift {
    pub fn apply(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        dates::shift_days_into(ts, self.days, self.from, self.to)
    }
}

/// Calendar days from the local day of `earliest` in `from` to `start`'s
/// local day in `to`.
pub(crate) fn shift_to(earliest: DateTime<Utc>, from: Tz, start: DateTime<Utc>, to: Tz) -> Shift {
    let days = (dates::date_key(start, to) - dates::date_key(earliest, from)).num_days();
    Shift { days, from, to }
}

/// Fresh copy of `t` for another cycle or owner: new id, shifted dates,
/// personalization cleared.
pub(crate) fn shifted_copy(
    t: &TaskInstance,
    shift: Shift,
    routine_id: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> TaskInstance {
    TaskInstance {
        id: new_id(),
        user_id: user_id.to_string(),
        routine_id: routine_id.to_string(),
        status: TaskStatus::Active,
        starts_at: shift.apply(t.starts_at),
        expires_at: shift.apply(t.expires_at),
        completed_at: None,
        deleted_on: None,
        next_can_start_date: t.next_can_start_date.map(|d| shift.apply(d)),
        proof_id: None,
        created_at: now,
        ..t.clone()
    }
}

pub(crate) fn empty_routine(
    user_id: &str,
    part: &str,
    time_zone: &str,
    now: DateTime<Utc>,
) -> Routine {
    Routine {
        id: new_id(),
        user_id: user_id.to_string(),
        part: part.to_string(),
        concerns: Vec::new(),
        status: RoutineStatus::Active,
        all_tasks: Vec::new(),
        final_schedule: Default::default(),
        time_zone: time_zone.to_string(),
        starts_at: now,
        last_date: now,
        created_at: now,
        deleted_on: None,
        copied_from: None,
        stolen_from: None,
        revision: 0,
    }
}

/// Derive both embedded views and the bounds from a full row set.
pub(crate) fn rebuild_views(routine: &mut Routine, rows: &[TaskInstance], now: DateTime<Utc>) {
    let tz = routine.tz();
    routine.all_tasks = build_all_tasks(rows);
    routine.final_schedule = build_schedule(rows, tz);
    routine.refresh_bounds(now);
    routine.concerns_from_tasks();
}

/// Local midnight of `date`, or of today when absent.
pub(crate) fn start_of(date: Option<NaiveDate>, tz: Tz, now: DateTime<Utc>) -> DateTime<Utc> {
    match date {
        Some(d) => dates::midnight_of(d, tz),
        None => dates::set_to_midnight(now, tz),
    }
}

/// Created routine plus its rows.
#[derive(Debug, Serialize)]
pub struct RoutineOutcome {
    pub routine: Routine,
    pub tasks: Vec<TaskInstance>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_keys: Vec<String>,
    #[serde(skip)]
    pub events: Vec<Event>,
}

impl RoutineOutcome {
    fn new(routine: Routine, tasks: Vec<TaskInstance>, counter: Counter) -> Self {
        let events = vec![Event::new(&routine.user_id, counter, tasks.len())];
        Self { routine, tasks, skipped_keys: Vec::new(), events }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_task_fills_the_week() {
        assert_eq!(occurrence_offsets(7), vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn twice_weekly_is_four_days_apart() {
        assert_eq!(occurrence_offsets(2), vec![0, 4]);
    }

    #[test]
    fn overflow_is_capped_at_seven() {
        assert_eq!(occurrence_offsets(12), vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn offsets_match_spacing_formula() {
        for total in 1..=20u32 {
            let offs = occurrence_offsets(total);
            assert_eq!(offs.len() as u32, total.min(7), "total={total}");
            let spacing = (7.0 / total as f64).max(1.0).round() as i64;
            for w in offs.windows(2) {
                assert_eq!(w[1] - w[0], spacing, "total={total}");
            }
            assert!(offs.iter().all(|o| *o < 7), "total={total} leaks out of the window");
        }
    }

    #[test]
    fn template_validation() {
        let t = |key: &str, total| TaskTemplate {
            key: key.into(),
            name: "Walk".into(),
            icon: String::new(),
            color: String::new(),
            concern: "posture".into(),
            description: String::new(),
            instruction: String::new(),
            total,
        };
        assert!(validate_templates(&[]).is_err());
        assert!(validate_templates(&[t("walk", 0)]).is_err());
        assert!(validate_templates(&[t("", 2)]).is_err());
        assert!(validate_templates(&[t("walk", 2), t("walk", 3)]).is_err());
        assert!(validate_templates(&[t("walk", 2), t("stretch", 3)]).is_ok());
    }
}
