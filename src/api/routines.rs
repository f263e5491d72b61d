//! Routine handlers: create (templates or planner), prolong, clone, reads.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

use super::{blocking, parse_body, record};
use crate::db::{self, RoutineStatus};
use crate::engine::{self, TaskTemplate};
use crate::error::RegimenError;
use crate::progress::ProgressTicker;
use crate::retry::with_retry;
use crate::schedule::{merge_schedules, ScheduleMap};
use crate::{dates, planner, AppState};

const MAX_SCHEDULE_DAYS: i64 = 92;

#[derive(Deserialize)]
pub(super) struct CreateBody {
    user_id: String,
    part: String,
    #[serde(default)]
    time_zone: Option<String>,
    #[serde(default)]
    start_date: Option<NaiveDate>,
    /// Explicit templates. When absent the planner proposes them.
    #[serde(default)]
    templates: Option<Vec<TaskTemplate>>,
    /// Planner input; defaults to the profile's concerns for the part.
    #[serde(default)]
    concerns: Option<Vec<String>>,
}

/// POST /routines
pub(super) async fn create_routine(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, RegimenError> {
    let body: CreateBody = parse_body(&body)?;
    let mut progress_id = None;

    let templates = match body.templates {
        Some(t) => t,
        None => {
            let cfg = state.planner.clone().ok_or(RegimenError::PlannerNotConfigured)?;
            let concerns = match body.concerns.clone() {
                Some(cs) => cs,
                None => {
                    let db = state.db.clone();
                    let user_id = body.user_id.clone();
                    let part = body.part.clone();
                    blocking(move || db.get_user(&user_id))
                        .await??
                        .map(|u| u.concerns_for(&part))
                        .unwrap_or_default()
                }
            };
            if concerns.is_empty() {
                return Err(RegimenError::Validation("no concerns to plan for".into()));
            }

            let db = state.db.clone();
            let user_id = body.user_id.clone();
            let p = blocking(move || db.create_progress(&user_id, "plan_routine")).await??;
            progress_id = Some(p.id.clone());
            let ticker = ProgressTicker::start(state.db.clone(), p.id, Duration::from_secs(2), 5);

            let plan = state
                .retry
                .run("plan_routine", || planner::plan_routine(&cfg, &body.part, &concerns))
                .await;
            match plan {
                Ok(plan) => {
                    ticker.finish().await;
                    planner::solutions_to_templates(&plan)
                }
                Err(e) => {
                    ticker.fail(&e.to_string()).await;
                    return Err(e);
                }
            }
        }
    };

    let req = engine::CreateRoutine {
        user_id: body.user_id,
        part: body.part,
        time_zone: body.time_zone,
        start_date: body.start_date,
        templates,
    };
    let db = state.db.clone();
    let mut out = with_retry(&state.retry, "create_routine", move || {
        engine::create_routine(&db, req.clone())
    })
    .await?;
    record(&state, &mut out.events);

    let mut v = serde_json::to_value(&out).map_err(|e| RegimenError::Internal(e.to_string()))?;
    if let (Some(id), Some(obj)) = (progress_id, v.as_object_mut()) {
        obj.insert("progress_id".into(), serde_json::Value::String(id));
    }
    Ok(Json(v))
}

/// POST /routines/prolong
pub(super) async fn prolong_routine(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<engine::RoutineOutcome>, RegimenError> {
    let req: engine::ProlongRoutine = parse_body(&body)?;
    let db = state.db.clone();
    let mut out = with_retry(&state.retry, "prolong_routine", move || {
        engine::prolong_routine(&db, req.clone())
    })
    .await?;
    record(&state, &mut out.events);
    Ok(Json(out))
}

/// POST /routines/clone
pub(super) async fn clone_routine(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<engine::RoutineOutcome>, RegimenError> {
    let req: engine::CloneRoutine = parse_body(&body)?;
    let db = state.db.clone();
    let access = state.access.clone();
    let mut out = with_retry(&state.retry, "clone_routine", move || {
        engine::clone_routine(&db, access.as_ref(), req.clone())
    })
    .await?;
    record(&state, &mut out.events);
    Ok(Json(out))
}

#[derive(Deserialize)]
pub(super) struct ListParams {
    user_id: String,
    part: Option<String>,
    status: Option<String>,
}

/// GET /routines?user_id=..&part=..&status=..
pub(super) async fn list_routines(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<db::Routine>>, RegimenError> {
    let status = params.status.as_deref().map(str::parse::<RoutineStatus>).transpose()?;
    let db = state.db.clone();
    let list = blocking(move || db.list_routines(&params.user_id, params.part.as_deref(), status))
        .await??;
    Ok(Json(list))
}

/// GET /routines/{id}
pub(super) async fn get_routine(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<db::Routine>, RegimenError> {
    let db = state.db.clone();
    blocking(move || db.get_routine(&id))
        .await??
        .ok_or(RegimenError::NotFound)
        .map(Json)
}

#[derive(Deserialize)]
pub(super) struct TasksParams {
    #[serde(default)]
    include_deleted: bool,
}

/// GET /routines/{id}/tasks
pub(super) async fn routine_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<TasksParams>,
) -> Result<Json<Vec<db::TaskInstance>>, RegimenError> {
    let db = state.db.clone();
    let tasks = blocking(move || {
        db.get_routine(&id)?.ok_or(RegimenError::NotFound)?;
        db.routine_tasks(&id, params.include_deleted)
    })
    .await??;
    Ok(Json(tasks))
}

#[derive(Deserialize)]
pub(super) struct ScheduleParams {
    user_id: String,
    part: Option<String>,
    from: String,
    to: Option<String>,
}

/// GET /schedule?user_id=..&from=YYYY-MM-DD[&to=..][&part=..]
///
/// What's due per day across the user's live routines. `to` defaults to a
/// week after `from`.
pub(super) async fn due_schedule(
    State(state): State<AppState>,
    Query(params): Query<ScheduleParams>,
) -> Result<Json<ScheduleMap>, RegimenError> {
    let from = dates::parse_date(&params.from)?;
    let to = match params.to.as_deref() {
        Some(s) => dates::parse_date(s)?,
        None => from + chrono::Duration::days(engine::WINDOW_DAYS - 1),
    };
    if to < from || (to - from).num_days() > MAX_SCHEDULE_DAYS {
        return Err(RegimenError::Validation(format!(
            "range must be 0..={MAX_SCHEDULE_DAYS} days"
        )));
    }
    let db = state.db.clone();
    let routines = blocking(move || db.list_routines(&params.user_id, params.part.as_deref(), None))
        .await??;
    info!(routines = routines.len(), %from, %to, "schedule view");
    Ok(Json(merge_schedules(routines.iter().map(|r| &r.final_schedule), from, to)))
}
