//! User profiles (current concerns, time zone, sharing) and purchases.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::*;

const MAX_NAME_LEN: usize = 128;
const MAX_CONCERNS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concern {
    pub name: String,
    pub part: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub time_zone: String,
    pub concerns: Vec<Concern>,
    /// Parts whose routines anyone may clone.
    pub public_parts: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn concerns_for(&self, part: &str) -> Vec<String> {
        self.concerns
            .iter()
            .filter(|c| c.part == part)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn tz(&self) -> Tz {
        dates::parse_time_zone(&self.time_zone).unwrap_or(chrono_tz::UTC)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UserInput {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub concerns: Option<Vec<Concern>>,
    #[serde(default)]
    pub public_parts: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub part: String,
    pub created_at: DateTime<Utc>,
}

fn validate_user(input: &UserInput) -> Result<(), RegimenError> {
    if input.id.trim().is_empty() {
        return Err(RegimenError::Validation("user id must not be empty".into()));
    }
    if input.name.trim().is_empty() || input.name.chars().count() > MAX_NAME_LEN {
        return Err(RegimenError::Validation(format!(
            "name must be 1..={MAX_NAME_LEN} characters"
        )));
    }
    if let Some(tz) = &input.time_zone {
        dates::parse_time_zone(tz)?;
    }
    if let Some(cs) = &input.concerns {
        if cs.len() > MAX_CONCERNS {
            return Err(RegimenError::Validation(format!("too many concerns (max {MAX_CONCERNS})")));
        }
        if cs.iter().any(|c| c.name.trim().is_empty() || c.part.trim().is_empty()) {
            return Err(RegimenError::Validation("concern name/part must not be empty".into()));
        }
    }
    Ok(())
}

fn row_to_user(row: &Row) -> rusqlite::Result<UserProfile> {
    let concerns: String = row.get("concerns")?;
    let public_parts: String = row.get("public_parts")?;
    Ok(UserProfile {
        id: row.get("id")?,
        name: row.get("name")?,
        time_zone: row.get("time_zone")?,
        concerns: serde_json::from_str(&concerns).unwrap_or_default(),
        public_parts: serde_json::from_str(&public_parts).unwrap_or_default(),
        created_at: from_ms(row.get("created_at")?),
        updated_at: from_ms(row.get("updated_at")?),
    })
}

pub fn get_user(c: &Connection, id: &str) -> Result<Option<UserProfile>, RegimenError> {
    Ok(c.query_row(
        "SELECT id, name, time_zone, concerns, public_parts, created_at, updated_at \
         FROM users WHERE id = ?1",
        [id],
        row_to_user,
    )
    .optional()?)
}

/// Insert or update. Fields left out of the input keep their stored value.
pub fn upsert_user(c: &Connection, input: UserInput) -> Result<UserProfile, RegimenError> {
    validate_user(&input)?;
    let now = Utc::now();
    let existing = get_user(c, &input.id)?;
    let profile = UserProfile {
        id: input.id.trim().to_string(),
        name: input.name.trim().to_string(),
        time_zone: input
            .time_zone
            .or_else(|| existing.as_ref().map(|u| u.time_zone.clone()))
            .unwrap_or_else(|| "UTC".into()),
        concerns: input
            .concerns
            .or_else(|| existing.as_ref().map(|u| u.concerns.clone()))
            .unwrap_or_default(),
        public_parts: input
            .public_parts
            .or_else(|| existing.as_ref().map(|u| u.public_parts.clone()))
            .unwrap_or_default(),
        created_at: existing.as_ref().map_or(now, |u| u.created_at),
        updated_at: now,
    };
    let concerns = serde_json::to_string(&profile.concerns).unwrap_or_else(|_| "[]".into());
    let public_parts = serde_json::to_string(&profile.public_parts).unwrap_or_else(|_| "[]".into());
    c.execute(
        "INSERT INTO users (id, name, time_zone, concerns, public_parts, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
         ON CONFLICT(id) DO UPDATE SET name = ?2, time_zone = ?3, concerns = ?4, \
         public_parts = ?5, updated_at = ?7",
        params![
            profile.id,
            profile.name,
            profile.time_zone,
            concerns,
            public_parts,
            to_ms(profile.created_at),
            to_ms(profile.updated_at),
        ],
    )?;
    Ok(profile)
}

pub fn insert_purchase(
    c: &Connection,
    buyer_id: &str,
    seller_id: &str,
    part: &str,
) -> Result<Purchase, RegimenError> {
    if buyer_id.trim().is_empty() || seller_id.trim().is_empty() || part.trim().is_empty() {
        return Err(RegimenError::Validation("buyer, seller and part are required".into()));
    }
    if buyer_id == seller_id {
        return Err(RegimenError::Validation("buyer and seller must differ".into()));
    }
    let p = Purchase {
        id: new_id(),
        buyer_id: buyer_id.to_string(),
        seller_id: seller_id.to_string(),
        part: part.to_string(),
        created_at: Utc::now(),
    };
    c.execute(
        "INSERT INTO purchases (id, buyer_id, seller_id, part, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![p.id, p.buyer_id, p.seller_id, p.part, to_ms(p.created_at)],
    )?;
    Ok(p)
}

pub fn has_purchase(
    c: &Connection,
    buyer_id: &str,
    seller_id: &str,
    part: &str,
) -> Result<bool, RegimenError> {
    let n: i64 = c.query_row(
        "SELECT COUNT(*) FROM purchases WHERE buyer_id = ?1 AND seller_id = ?2 AND part = ?3",
        params![buyer_id, seller_id, part],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

impl RegimenDB {
    pub fn get_user(&self, id: &str) -> Result<Option<UserProfile>, RegimenError> {
        get_user(&*self.conn()?, id)
    }

    pub fn upsert_user(&self, input: UserInput) -> Result<UserProfile, RegimenError> {
        upsert_user(&*self.conn()?, input)
    }

    pub fn insert_purchase(
        &self,
        buyer_id: &str,
        seller_id: &str,
        part: &str,
    ) -> Result<Purchase, RegimenError> {
        insert_purchase(&*self.conn()?, buyer_id, seller_id, part)
    }

    pub fn has_purchase(&self, buyer_id: &str, seller_id: &str, part: &str) -> Result<bool, RegimenError> {
        has_purchase(&*self.conn()?, buyer_id, seller_id, part)
    }
}
