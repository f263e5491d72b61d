//! Routine documents.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::*;

const ROUTINE_COLS: &str = "id, user_id, part, concerns, status, all_tasks, final_schedule, \
    time_zone, starts_at, last_date, created_at, deleted_on, copied_from, stolen_from, revision";

fn row_to_routine(row: &Row) -> rusqlite::Result<Routine> {
    let status: String = row.get("status")?;
    let concerns: String = row.get("concerns")?;
    let all_tasks: String = row.get("all_tasks")?;
    let schedule: String = row.get("final_schedule")?;
    Ok(Routine {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        part: row.get("part")?,
        concerns: serde_json::from_str(&concerns).unwrap_or_default(),
        status: status.parse().unwrap_or(RoutineStatus::Active),
        all_tasks: serde_json::from_str(&all_tasks).unwrap_or_default(),
        final_schedule: serde_json::from_str(&schedule).unwrap_or_default(),
        time_zone: row.get("time_zone")?,
        starts_at: from_ms(row.get("starts_at")?),
        last_date: from_ms(row.get("last_date")?),
        created_at: from_ms(row.get("created_at")?),
        deleted_on: opt_from_ms(row.get("deleted_on")?),
        copied_from: row.get("copied_from")?,
        stolen_from: row.get("stolen_from")?,
        revision: row.get("revision")?,
    })
}

fn json<T: serde::Serialize>(v: &T) -> Result<String, RegimenError> {
    serde_json::to_string(v).map_err(|e| RegimenError::Internal(format!("encode: {e}")))
}

fn query_routines<P: rusqlite::Params>(
    c: &Connection,
    where_clause: &str,
    order: &str,
    p: P,
) -> Result<Vec<Routine>, RegimenError> {
    let sql = format!("SELECT {ROUTINE_COLS} FROM routines WHERE {where_clause} ORDER BY {order}");
    let mut stmt = c.prepare(&sql)?;
    let rows = stmt.query_map(p, row_to_routine)?.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn insert_routine(c: &Connection, r: &Routine) -> Result<(), RegimenError> {
    c.execute(
        &format!(
            "INSERT INTO routines ({ROUTINE_COLS}) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)"
        ),
        params![
            r.id,
            r.user_id,
            r.part,
            json(&r.concerns)?,
            r.status.as_str(),
            json(&r.all_tasks)?,
            json(&r.final_schedule)?,
            r.time_zone,
            to_ms(r.starts_at),
            to_ms(r.last_date),
            to_ms(r.created_at),
            r.deleted_on.map(to_ms),
            r.copied_from,
            r.stolen_from,
            r.revision,
        ],
    )?;
    Ok(())
}

pub fn get_routine(c: &Connection, id: &str) -> Result<Option<Routine>, RegimenError> {
    let sql = format!("SELECT {ROUTINE_COLS} FROM routines WHERE id = ?1");
    Ok(c.query_row(&sql, [id], row_to_routine).optional()?)
}

pub fn require_routine(c: &Connection, id: &str) -> Result<Routine, RegimenError> {
    get_routine(c, id)?.ok_or(RegimenError::NotFound)
}

/// Write back every mutable field and bump the revision.
pub fn save_routine(c: &Connection, r: &mut Routine) -> Result<(), RegimenError> {
    let n = c.execute(
        "UPDATE routines SET concerns = ?2, status = ?3, all_tasks = ?4, final_schedule = ?5, \
         starts_at = ?6, last_date = ?7, deleted_on = ?8, copied_from = ?9, stolen_from = ?10, \
         revision = revision + 1 WHERE id = ?1",
        params![
            r.id,
            json(&r.concerns)?,
            r.status.as_str(),
            json(&r.all_tasks)?,
            json(&r.final_schedule)?,
            to_ms(r.starts_at),
            to_ms(r.last_date),
            r.deleted_on.map(to_ms),
            r.copied_from,
            r.stolen_from,
        ],
    )?;
    if n == 0 {
        return Err(RegimenError::NotFound);
    }
    r.revision += 1;
    Ok(())
}

pub fn list_routines(
    c: &Connection,
    user_id: &str,
    part: Option<&str>,
    status: Option<RoutineStatus>,
    include_deleted: bool,
) -> Result<Vec<Routine>, RegimenError> {
    let deleted = if include_deleted { "" } else { " AND deleted_on IS NULL" };
    let where_clause = format!(
        "user_id = ?1 AND (?2 IS NULL OR part = ?2) AND (?3 IS NULL OR status = ?3){deleted}"
    );
    query_routines(
        c,
        &where_clause,
        "starts_at, created_at",
        params![user_id, part, status.map(RoutineStatus::as_str)],
    )
}

/// Live ACTIVE routine of the user/part whose range contains `[from, to]`.
pub fn find_covering_routine(
    c: &Connection,
    user_id: &str,
    part: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Option<Routine>, RegimenError> {
    Ok(query_routines(
        c,
        "user_id = ?1 AND part = ?2 AND status = 'active' AND deleted_on IS NULL \
         AND starts_at <= ?3 AND last_date >= ?4",
        "starts_at LIMIT 1",
        params![user_id, part, to_ms(from), to_ms(to)],
    )?
    .pop())
}

/// Nearest live ACTIVE routine of the user/part that starts after `after`.
pub fn find_next_routine(
    c: &Connection,
    user_id: &str,
    part: &str,
    after: DateTime<Utc>,
) -> Result<Option<Routine>, RegimenError> {
    Ok(query_routines(
        c,
        "user_id = ?1 AND part = ?2 AND status = 'active' AND deleted_on IS NULL \
         AND starts_at > ?3",
        "starts_at LIMIT 1",
        params![user_id, part, to_ms(after)],
    )?
    .pop())
}

/// Ids of every routine not yet soft-deleted.
pub fn live_routine_ids(c: &Connection) -> Result<Vec<String>, RegimenError> {
    let mut stmt = c.prepare("SELECT id FROM routines WHERE deleted_on IS NULL ORDER BY created_at")?;
    let ids = stmt.query_map([], |r| r.get(0))?.collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// ACTIVE routines whose last day closed before `before`.
pub fn stale_active_routines(
    c: &Connection,
    before: DateTime<Utc>,
) -> Result<Vec<Routine>, RegimenError> {
    query_routines(
        c,
        "status = 'active' AND deleted_on IS NULL AND last_date < ?1",
        "starts_at",
        [to_ms(before)],
    )
}

impl RegimenDB {
    pub fn get_routine(&self, id: &str) -> Result<Option<Routine>, RegimenError> {
        get_routine(&*self.conn()?, id)
    }

    pub fn list_routines(
        &self,
        user_id: &str,
        part: Option<&str>,
        status: Option<RoutineStatus>,
    ) -> Result<Vec<Routine>, RegimenError> {
        list_routines(&*self.conn()?, user_id, part, status, false)
    }
}
