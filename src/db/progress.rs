//! Polling records for long-running operations (UI feedback only).

use rusqlite::{params, OptionalExtension};

use super::*;

#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub id: String,
    pub user_id: String,
    pub operation: String,
    /// 0..=100
    pub value: i64,
    pub done: bool,
    /// Set when the operation ended in failure; `done` is true then too.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RegimenDB {
    pub fn create_progress(&self, user_id: &str, operation: &str) -> Result<Progress, RegimenError> {
        let p = Progress {
            id: new_id(),
            user_id: user_id.to_string(),
            operation: operation.to_string(),
            value: 0,
            done: false,
            error: None,
            updated_at: Utc::now(),
        };
        self.conn()?.execute(
            "INSERT INTO progress (id, user_id, operation, value, done, updated_at) \
             VALUES (?1, ?2, ?3, 0, 0, ?4)",
            params![p.id, p.user_id, p.operation, to_ms(p.updated_at)],
        )?;
        Ok(p)
    }

    /// Advance by `step`, never past `cap` and never once finished.
    pub fn bump_progress(&self, id: &str, step: i64, cap: i64) -> Result<(), RegimenError> {
        self.conn()?.execute(
            "UPDATE progress SET value = MIN(value + ?2, ?3), updated_at = ?4 \
             WHERE id = ?1 AND done = 0",
            params![id, step, cap, to_ms(Utc::now())],
        )?;
        Ok(())
    }

    pub fn finish_progress(&self, id: &str) -> Result<(), RegimenError> {
        self.conn()?.execute(
            "UPDATE progress SET value = 100, done = 1, updated_at = ?2 WHERE id = ?1",
            params![id, to_ms(Utc::now())],
        )?;
        Ok(())
    }

    /// End the record without reaching 100.
    pub fn fail_progress(&self, id: &str, error: &str) -> Result<(), RegimenError> {
        self.conn()?.execute(
            "UPDATE progress SET done = 1, error = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, error, to_ms(Utc::now())],
        )?;
        Ok(())
    }

    pub fn get_progress(&self, id: &str) -> Result<Option<Progress>, RegimenError> {
        Ok(self
            .conn()?
            .query_row(
                "SELECT id, user_id, operation, value, done, error, updated_at FROM progress \
                 WHERE id = ?1",
                [id],
                |r| {
                    Ok(Progress {
                        id: r.get(0)?,
                        user_id: r.get(1)?,
                        operation: r.get(2)?,
                        value: r.get(3)?,
                        done: r.get::<_, i64>(4)? != 0,
                        error: r.get(5)?,
                        updated_at: from_ms(r.get(6)?),
                    })
                },
            )
            .optional()?)
    }
}
