//! Task instance rows. No business rules here; these are the source of truth
//! the rollups are derived from.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::*;

const TASK_COLS: &str = "id, user_id, routine_id, key, name, icon, color, part, concern, \
    description, instruction, status, starts_at, expires_at, completed_at, deleted_on, \
    next_can_start_date, proof_id, created_at";

fn row_to_task(row: &Row) -> rusqlite::Result<TaskInstance> {
    let status: String = row.get("status")?;
    Ok(TaskInstance {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        routine_id: row.get("routine_id")?,
        key: row.get("key")?,
        name: row.get("name")?,
        icon: row.get("icon")?,
        color: row.get("color")?,
        part: row.get("part")?,
        concern: row.get("concern")?,
        description: row.get("description")?,
        instruction: row.get("instruction")?,
        status: status.parse().unwrap_or(TaskStatus::Active),
        starts_at: from_ms(row.get("starts_at")?),
        expires_at: from_ms(row.get("expires_at")?),
        completed_at: opt_from_ms(row.get("completed_at")?),
        deleted_on: opt_from_ms(row.get("deleted_on")?),
        next_can_start_date: opt_from_ms(row.get("next_can_start_date")?),
        proof_id: row.get("proof_id")?,
        created_at: from_ms(row.get("created_at")?),
    })
}

fn query_tasks<P: rusqlite::Params>(
    c: &Connection,
    where_clause: &str,
    p: P,
) -> Result<Vec<TaskInstance>, RegimenError> {
    let sql = format!(
        "SELECT {TASK_COLS} FROM tasks WHERE {where_clause} ORDER BY starts_at, key, id"
    );
    let mut stmt = c.prepare(&sql)?;
    let rows = stmt.query_map(p, row_to_task)?.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn insert_tasks(c: &Connection, tasks: &[TaskInstance]) -> Result<(), RegimenError> {
    let mut stmt = c.prepare(&format!(
        "INSERT INTO tasks ({TASK_COLS}) \
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)"
    ))?;
    for t in tasks {
        stmt.execute(params![
            t.id,
            t.user_id,
            t.routine_id,
            t.key,
            t.name,
            t.icon,
            t.color,
            t.part,
            t.concern,
            t.description,
            t.instruction,
            t.status.as_str(),
            to_ms(t.starts_at),
            to_ms(t.expires_at),
            t.completed_at.map(to_ms),
            t.deleted_on.map(to_ms),
            t.next_can_start_date.map(to_ms),
            t.proof_id,
            to_ms(t.created_at),
        ])?;
    }
    Ok(())
}

pub fn get_task(c: &Connection, id: &str) -> Result<Option<TaskInstance>, RegimenError> {
    let sql = format!("SELECT {TASK_COLS} FROM tasks WHERE id = ?1");
    Ok(c.query_row(&sql, [id], row_to_task).optional()?)
}

pub fn tasks_by_ids(c: &Connection, ids: &[String]) -> Result<Vec<TaskInstance>, RegimenError> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(t) = get_task(c, id)? {
            if !out.iter().any(|o: &TaskInstance| o.id == t.id) {
                out.push(t);
            }
        }
    }
    Ok(out)
}

/// Every row of a routine, soft-deleted ones included.
pub fn tasks_by_routine(c: &Connection, routine_id: &str) -> Result<Vec<TaskInstance>, RegimenError> {
    query_tasks(c, "routine_id = ?1", [routine_id])
}

pub fn live_tasks_by_routine(
    c: &Connection,
    routine_id: &str,
) -> Result<Vec<TaskInstance>, RegimenError> {
    query_tasks(c, "routine_id = ?1 AND deleted_on IS NULL", [routine_id])
}

pub fn live_tasks_by_key(
    c: &Connection,
    routine_id: &str,
    key: &str,
) -> Result<Vec<TaskInstance>, RegimenError> {
    query_tasks(c, "routine_id = ?1 AND key = ?2 AND deleted_on IS NULL", params![routine_id, key])
}

/// Aged-out instances a new cycle can be prolonged from.
pub fn prolong_candidates(
    c: &Connection,
    user_id: &str,
    part: &str,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<TaskInstance>, RegimenError> {
    query_tasks(
        c,
        "user_id = ?1 AND part = ?2 AND status IN ('expired', 'completed') \
         AND deleted_on IS NULL AND starts_at >= ?3 AND starts_at < ?4",
        params![user_id, part, to_ms(since), to_ms(until)],
    )
}

/// Keys of `user_id` still cooling down at `at`, with the date they free up.
pub fn cooldowns(
    c: &Connection,
    user_id: &str,
    at: DateTime<Utc>,
) -> Result<Vec<(String, DateTime<Utc>)>, RegimenError> {
    let mut stmt = c.prepare(
        "SELECT key, MAX(next_can_start_date) FROM tasks \
         WHERE user_id = ?1 AND deleted_on IS NULL AND status != 'canceled' \
         AND next_can_start_date > ?2 GROUP BY key",
    )?;
    let rows = stmt
        .query_map(params![user_id, to_ms(at)], |r| {
            Ok((r.get::<_, String>(0)?, from_ms(r.get(1)?)))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Marks rows deleted; already-deleted rows keep their original stamp.
/// Returns the ids actually changed.
pub fn soft_delete_tasks(
    c: &Connection,
    ids: &[String],
    at: DateTime<Utc>,
) -> Result<Vec<String>, RegimenError> {
    let mut changed = Vec::new();
    let mut stmt =
        c.prepare("UPDATE tasks SET deleted_on = ?2 WHERE id = ?1 AND deleted_on IS NULL")?;
    for id in ids {
        if stmt.execute(params![id, to_ms(at)])? == 1 {
            changed.push(id.clone());
        }
    }
    Ok(changed)
}

/// Move ACTIVE rows to `status`. The `status = 'active'` filter keeps a row
/// canceled by a concurrent request from being flipped back.
pub fn set_status_if_active(
    c: &Connection,
    ids: &[String],
    status: TaskStatus,
    completed_at: Option<DateTime<Utc>>,
) -> Result<Vec<String>, RegimenError> {
    let mut changed = Vec::new();
    let mut stmt = c.prepare(
        "UPDATE tasks SET status = ?2, completed_at = ?3 \
         WHERE id = ?1 AND status = 'active' AND deleted_on IS NULL",
    )?;
    for id in ids {
        if stmt.execute(params![id, status.as_str(), completed_at.map(to_ms)])? == 1 {
            changed.push(id.clone());
        }
    }
    Ok(changed)
}

/// Re-date and re-parent one row.
pub fn move_task(
    c: &Connection,
    id: &str,
    routine_id: &str,
    starts_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<bool, RegimenError> {
    let n = c.execute(
        "UPDATE tasks SET routine_id = ?2, starts_at = ?3, expires_at = ?4 WHERE id = ?1",
        params![id, routine_id, to_ms(starts_at), to_ms(expires_at)],
    )?;
    Ok(n == 1)
}

pub fn count_live_in_routine(c: &Connection, routine_id: &str) -> Result<usize, RegimenError> {
    let n: i64 = c.query_row(
        "SELECT COUNT(*) FROM tasks WHERE routine_id = ?1 AND deleted_on IS NULL",
        [routine_id],
        |r| r.get(0),
    )?;
    Ok(n as usize)
}

/// ACTIVE rows whose due window closed before `now`.
pub fn overdue_active(c: &Connection, now: DateTime<Utc>) -> Result<Vec<TaskInstance>, RegimenError> {
    query_tasks(
        c,
        "status = 'active' AND deleted_on IS NULL AND expires_at <= ?1",
        [to_ms(now)],
    )
}

pub fn set_expired(c: &Connection, ids: &[String]) -> Result<usize, RegimenError> {
    let mut stmt =
        c.prepare("UPDATE tasks SET status = 'expired' WHERE id = ?1 AND status = 'active'")?;
    let mut n = 0;
    for id in ids {
        n += stmt.execute([id])?;
    }
    Ok(n)
}

impl RegimenDB {
    pub fn get_task(&self, id: &str) -> Result<Option<TaskInstance>, RegimenError> {
        get_task(&*self.conn()?, id)
    }

    pub fn routine_tasks(
        &self,
        routine_id: &str,
        include_deleted: bool,
    ) -> Result<Vec<TaskInstance>, RegimenError> {
        let c = self.conn()?;
        if include_deleted {
            tasks_by_routine(&c, routine_id)
        } else {
            live_tasks_by_routine(&c, routine_id)
        }
    }
}
