//! SQLite-backed document store for routines, task instances and profiles.
//!
//! Embedded documents (`all_tasks`, `final_schedule`, concern lists) live in
//! JSON text columns; timestamps are epoch milliseconds.

pub mod progress;
pub mod routines;
pub mod tasks;
pub mod users;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::aggregate::AllTaskAggregate;
use crate::dates;
use crate::error::RegimenError;
use crate::schedule::ScheduleMap;

pub use progress::Progress;
pub use users::{Concern, Purchase, UserInput, UserProfile};

/// Set busy_timeout on every connection handed out by the pool.
/// Prevents SQLITE_BUSY under concurrent write pressure (maintenance + API).
#[derive(Debug)]
struct BusyTimeoutCustomizer;
impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for BusyTimeoutCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(())
    }
}

type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Active,
    Completed,
    Expired,
    #[serde(alias = "cancelled")]
    Canceled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = RegimenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "expired" => Ok(Self::Expired),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            _ => Err(RegimenError::InvalidStatus(s.to_string())),
        }
    }
}

/// Routine lifecycle. Everything but `Active` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutineStatus {
    Active,
    Expired,
    Canceled,
    Replaced,
    Completed,
}

impl RoutineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Canceled => "canceled",
            Self::Replaced => "replaced",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for RoutineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutineStatus {
    type Err = RegimenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            "replaced" => Ok(Self::Replaced),
            "completed" => Ok(Self::Completed),
            _ => Err(RegimenError::InvalidStatus(s.to_string())),
        }
    }
}

/// One dated occurrence of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: String,
    pub user_id: String,
    pub routine_id: String,
    pub key: String,
    pub name: String,
    pub icon: String,
    pub color: String,
    pub part: String,
    pub concern: String,
    pub description: String,
    pub instruction: String,
    pub status: TaskStatus,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_can_start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TaskInstance {
    pub fn is_live(&self) -> bool {
        self.deleted_on.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routine {
    pub id: String,
    pub user_id: String,
    pub part: String,
    pub concerns: Vec<String>,
    pub status: RoutineStatus,
    pub all_tasks: Vec<AllTaskAggregate>,
    pub final_schedule: ScheduleMap,
    pub time_zone: String,
    pub starts_at: DateTime<Utc>,
    pub last_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copied_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stolen_from: Option<String>,
    /// Bumped on every write.
    pub revision: i64,
}

impl Routine {
    /// Zone the schedule is bucketed in. Stored zones are validated on the
    /// way in, so the UTC fallback only covers hand-edited rows.
    pub fn tz(&self) -> Tz {
        dates::parse_time_zone(&self.time_zone).unwrap_or(chrono_tz::UTC)
    }

    /// Re-derive `starts_at`/`last_date` from the rollup. A routine with no
    /// live instance left is soft-deleted. Returns whether anything is live.
    pub fn refresh_bounds(&mut self, now: DateTime<Utc>) -> bool {
        match dates::get_min_and_max_routine_dates(&self.all_tasks) {
            Some((lo, hi)) => {
                self.starts_at = lo;
                self.last_date = hi;
                true
            }
            None => {
                if self.deleted_on.is_none() {
                    self.deleted_on = Some(now);
                }
                false
            }
        }
    }

    pub fn concerns_from_tasks(&mut self) {
        let mut concerns: Vec<String> = Vec::new();
        for a in &self.all_tasks {
            if a.total > 0 && !concerns.contains(&a.concern) {
                concerns.push(a.concern.clone());
            }
        }
        if !concerns.is_empty() {
            self.concerns = concerns;
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Stats {
    pub routines: usize,
    pub active_routines: usize,
    pub tasks: usize,
    pub live_tasks: usize,
    pub users: usize,
}

pub(crate) fn to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub(crate) fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub(crate) fn opt_from_ms(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(from_ms)
}

/// Current time at the millisecond precision rows are stored with, so
/// timestamps embedded in routine JSON match their row columns exactly.
pub fn now() -> DateTime<Utc> {
    from_ms(to_ms(Utc::now()))
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    time_zone TEXT NOT NULL DEFAULT 'UTC',
    concerns TEXT NOT NULL DEFAULT '[]',
    public_parts TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS purchases (
    id TEXT PRIMARY KEY,
    buyer_id TEXT NOT NULL,
    seller_id TEXT NOT NULL,
    part TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_purchases_pair ON purchases(buyer_id, seller_id, part);

CREATE TABLE IF NOT EXISTS routines (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    part TEXT NOT NULL,
    concerns TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'active',
    all_tasks TEXT NOT NULL DEFAULT '[]',
    final_schedule TEXT NOT NULL DEFAULT '{}',
    time_zone TEXT NOT NULL DEFAULT 'UTC',
    starts_at INTEGER NOT NULL,
    last_date INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    deleted_on INTEGER,
    copied_from TEXT,
    stolen_from TEXT,
    revision INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_routines_user ON routines(user_id, part, status);
CREATE INDEX IF NOT EXISTS idx_routines_range ON routines(starts_at, last_date);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    routine_id TEXT NOT NULL,
    key TEXT NOT NULL,
    name TEXT NOT NULL,
    icon TEXT NOT NULL DEFAULT '',
    color TEXT NOT NULL DEFAULT '',
    part TEXT NOT NULL,
    concern TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    instruction TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'active',
    starts_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    completed_at INTEGER,
    deleted_on INTEGER,
    next_can_start_date INTEGER,
    proof_id TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_routine ON tasks(routine_id, key);
CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id, part, status);
CREATE INDEX IF NOT EXISTS idx_tasks_expiry ON tasks(status, expires_at);

CREATE TABLE IF NOT EXISTS progress (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    operation TEXT NOT NULL,
    value INTEGER NOT NULL DEFAULT 0,
    done INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS regimen_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// SQLite-backed routine store.
pub struct RegimenDB {
    pool: Pool<SqliteConnectionManager>,
}

impl RegimenDB {
    pub(crate) fn conn(&self) -> Result<PooledConn, RegimenError> {
        self.pool.get().map_err(|e| RegimenError::Pool(e.to_string()))
    }

    /// Open (or create) a database at the given path.
    /// Pool size defaults to 8 (1 writer + 7 readers in WAL mode).
    pub fn open(path: &str) -> Result<Self, RegimenError> {
        let pool_size = if path == ":memory:" { 2 } else { 8 };
        let manager = if path == ":memory:" {
            // Shared cache so all pool connections see the same in-memory DB.
            // Each test gets a unique name to avoid cross-test pollution.
            let name = new_id();
            SqliteConnectionManager::file(format!("file:{name}?mode=memory&cache=shared"))
        } else {
            SqliteConnectionManager::file(path)
        };
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_customizer(Box::new(BusyTimeoutCustomizer))
            .build(manager)
            .map_err(|e| RegimenError::Pool(e.to_string()))?;

        let conn = pool.get().map_err(|e| RegimenError::Pool(e.to_string()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        if conn.prepare("SELECT proof_id FROM tasks LIMIT 0").is_err() {
            conn.execute("ALTER TABLE tasks ADD COLUMN proof_id TEXT", [])?;
        }
        if conn.prepare("SELECT error FROM progress LIMIT 0").is_err() {
            conn.execute("ALTER TABLE progress ADD COLUMN error TEXT", [])?;
        }
        if conn.prepare("SELECT revision FROM routines LIMIT 0").is_err() {
            conn.execute(
                "ALTER TABLE routines ADD COLUMN revision INTEGER NOT NULL DEFAULT 0",
                [],
            )?;
        }
        drop(conn);
        Ok(Self { pool })
    }

    /// Run `f` inside one IMMEDIATE transaction. The write lock is taken up
    /// front so read-modify-write of routine documents can't interleave.
    /// Dropping the transaction on error rolls it back.
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, RegimenError>,
    ) -> Result<T, RegimenError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Read-only access on a pooled connection.
    pub fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, RegimenError>,
    ) -> Result<T, RegimenError> {
        let conn = self.conn()?;
        f(&conn)
    }

    pub fn get_meta(&self, key: &str) -> Option<String> {
        self.conn().ok().and_then(|c| {
            c.query_row("SELECT value FROM regimen_meta WHERE key = ?1", [key], |r| r.get(0))
                .ok()
        })
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), RegimenError> {
        let c = self.conn()?;
        c.execute(
            "INSERT OR REPLACE INTO regimen_meta (key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    pub fn stats(&self) -> Result<Stats, RegimenError> {
        let c = self.conn()?;
        let count = |sql: &str| -> Result<usize, RegimenError> {
            Ok(c.query_row(sql, [], |r| r.get::<_, i64>(0))? as usize)
        };
        Ok(Stats {
            routines: count("SELECT COUNT(*) FROM routines WHERE deleted_on IS NULL")?,
            active_routines: count(
                "SELECT COUNT(*) FROM routines WHERE deleted_on IS NULL AND status = 'active'",
            )?,
            tasks: count("SELECT COUNT(*) FROM tasks")?,
            live_tasks: count("SELECT COUNT(*) FROM tasks WHERE deleted_on IS NULL")?,
            users: count("SELECT COUNT(*) FROM users")?,
        })
    }
}

#[cfg(test)]
mod meta_tests {
    use super::*;

    #[test]
    fn meta_get_set() {
        let db = RegimenDB::open(":memory:").unwrap();
        assert_eq!(db.get_meta("nonexistent"), None);
        db.set_meta("last_maintenance_ms", "1234567890").unwrap();
        assert_eq!(db.get_meta("last_maintenance_ms"), Some("1234567890".to_string()));
        db.set_meta("last_maintenance_ms", "9999999999").unwrap();
        assert_eq!(db.get_meta("last_maintenance_ms"), Some("9999999999".to_string()));
    }

    #[test]
    fn status_parsing() {
        assert_eq!("Completed".parse::<TaskStatus>().unwrap(), TaskStatus::Completed);
        assert_eq!("cancelled".parse::<TaskStatus>().unwrap(), TaskStatus::Canceled);
        assert!("done".parse::<TaskStatus>().is_err());
        assert_eq!("replaced".parse::<RoutineStatus>().unwrap(), RoutineStatus::Replaced);
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let db = RegimenDB::open(":memory:").unwrap();
        let r: Result<(), RegimenError> = db.with_tx(|tx| {
            tx.execute("INSERT INTO regimen_meta (key, value) VALUES ('a', '1')", [])?;
            Err(RegimenError::declined("nope"))
        });
        assert!(r.is_err());
        assert_eq!(db.get_meta("a"), None);
    }
}
