//! Who may clone whose routine.

use crate::db::users;
use crate::error::RegimenError;
use crate::SharedDB;

pub trait AccessPolicy: Send + Sync {
    /// Whether `requester_id` may copy `owner_id`'s routine for `part`.
    fn can_clone(&self, requester_id: &str, owner_id: &str, part: &str) -> Result<bool, RegimenError>;
}

/// Entitlements from the local store: the owner lists the part as public, or
/// the requester bought it from the owner.
pub struct StoreAccess {
    db: SharedDB,
}

impl StoreAccess {
    pub fn new(db: SharedDB) -> Self {
        Self { db }
    }
}

impl AccessPolicy for StoreAccess {
    fn can_clone(&self, requester_id: &str, owner_id: &str, part: &str) -> Result<bool, RegimenError> {
        if requester_id == owner_id {
            return Ok(true);
        }
        self.db.read(|c| {
            let public = users::get_user(c, owner_id)?
                .is_some_and(|owner| owner.public_parts.iter().any(|p| p == part));
            Ok(public || users::has_purchase(c, requester_id, owner_id, part)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{RegimenDB, UserInput};
    use std::sync::Arc;

    fn user(id: &str, public_parts: &[&str]) -> UserInput {
        UserInput {
            id: id.into(),
            name: id.to_uppercase(),
            time_zone: None,
            concerns: None,
            public_parts: Some(public_parts.iter().map(|s| s.to_string()).collect()),
        }
    }

    #[test]
    fn public_part_or_purchase_grants_access() {
        let db = Arc::new(RegimenDB::open(":memory:").unwrap());
        db.upsert_user(user("alice", &["face"])).unwrap();
        db.upsert_user(user("bob", &[])).unwrap();
        let access = StoreAccess::new(db.clone());

        assert!(access.can_clone("bob", "alice", "face").unwrap());
        assert!(!access.can_clone("bob", "alice", "body").unwrap());
        assert!(!access.can_clone("alice", "bob", "face").unwrap());

        db.insert_purchase("bob", "alice", "body").unwrap();
        assert!(access.can_clone("bob", "alice", "body").unwrap());
        assert!(access.can_clone("bob", "bob", "anything").unwrap());
    }
}
