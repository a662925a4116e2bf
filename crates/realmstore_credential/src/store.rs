//! Stored credential persistence.

use crate::error::{CredentialError, CredentialResult};
use crate::model::StoredCredential;
use parking_lot::RwLock;
use realmstore_core::EntityId;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Gap between the priorities of adjacent credentials.
pub const PRIORITY_STEP: i64 = 10;

/// Persistence for an identity's stored credentials.
///
/// Listings are ordered by ascending priority.
pub trait CredentialStore: Send + Sync {
    /// Stores a new credential after the identity's existing ones.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn create(&self, credential: StoredCredential) -> CredentialResult<StoredCredential>;

    /// Replaces a stored credential.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::UnknownCredential`] if it is not stored.
    fn update(&self, credential: &StoredCredential) -> CredentialResult<()>;

    /// Removes a credential. Returns false if it was not stored.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn remove(&self, user_id: &str, id: EntityId) -> CredentialResult<bool>;

    /// Looks up one credential of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn get(&self, user_id: &str, id: EntityId) -> CredentialResult<Option<StoredCredential>>;

    /// Every credential of `user_id`, by priority.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn list(&self, user_id: &str) -> CredentialResult<Vec<StoredCredential>>;

    /// Credentials of `user_id` of one type, by priority.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn list_by_type(&self, user_id: &str, credential_type: &str) -> CredentialResult<Vec<StoredCredential>> {
        Ok(self
            .list(user_id)?
            .into_iter()
            .filter(|c| c.credential_type == credential_type)
            .collect())
    }

    /// The credential of `user_id` with the given label and type.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn by_name_and_type(
        &self,
        user_id: &str,
        name: &str,
        credential_type: &str,
    ) -> CredentialResult<Option<StoredCredential>> {
        Ok(self
            .list_by_type(user_id, credential_type)?
            .into_iter()
            .find(|c| c.user_label.as_deref() == Some(name)))
    }

    /// Moves credential `id` directly after `new_previous`, or first when
    /// `None`. Returns false if either credential is not stored.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn move_to(&self, user_id: &str, id: EntityId, new_previous: Option<EntityId>) -> CredentialResult<bool> {
        let Some(reordered) = plan_move(self.list(user_id)?, id, new_previous) else {
            return Ok(false);
        };
        for credential in &reordered {
            self.update(credential)?;
        }
        Ok(true)
    }
}

/// Reorders `credentials` (in priority order) for a move and renumbers
/// priorities in [`PRIORITY_STEP`] increments. Returns only the credentials
/// whose priority changed, or `None` if `id` or `new_previous` is missing.
pub(crate) fn plan_move(
    mut credentials: Vec<StoredCredential>,
    id: EntityId,
    new_previous: Option<EntityId>,
) -> Option<Vec<StoredCredential>> {
    let ours = credentials.iter().position(|c| c.id == id)?;
    let mut target = match new_previous {
        Some(prev) => credentials.iter().position(|c| c.id == prev)? + 1,
        None => 0,
    };
    let moved = credentials.remove(ours);
    if target > ours {
        target -= 1;
    }
    credentials.insert(target, moved);

    let mut changed = Vec::new();
    for (position, mut credential) in (1..).zip(credentials) {
        let expected = position * PRIORITY_STEP;
        if credential.priority != expected {
            credential.priority = expected;
            changed.push(credential);
        }
    }
    Some(changed)
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: RwLock<HashMap<String, Vec<StoredCredential>>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn create(&self, mut credential: StoredCredential) -> CredentialResult<StoredCredential> {
        let mut all = self.credentials.write();
        let owned = all.entry(credential.user_id.clone()).or_default();
        credential.priority = owned.iter().map(|c| c.priority).max().unwrap_or(0) + PRIORITY_STEP;
        if credential.created_date == 0 {
            credential.created_date = now_millis();
        }
        owned.push(credential.clone());
        Ok(credential)
    }

    fn update(&self, credential: &StoredCredential) -> CredentialResult<()> {
        let mut all = self.credentials.write();
        let slot = all
            .get_mut(&credential.user_id)
            .and_then(|owned| owned.iter_mut().find(|c| c.id == credential.id))
            .ok_or(CredentialError::UnknownCredential { id: credential.id })?;
        *slot = credential.clone();
        Ok(())
    }

    fn remove(&self, user_id: &str, id: EntityId) -> CredentialResult<bool> {
        let mut all = self.credentials.write();
        let Some(owned) = all.get_mut(user_id) else {
            return Ok(false);
        };
        let before = owned.len();
        owned.retain(|c| c.id != id);
        Ok(owned.len() != before)
    }

    fn get(&self, user_id: &str, id: EntityId) -> CredentialResult<Option<StoredCredential>> {
        Ok(self
            .credentials
            .read()
            .get(user_id)
            .and_then(|owned| owned.iter().find(|c| c.id == id).cloned()))
    }

    fn list(&self, user_id: &str) -> CredentialResult<Vec<StoredCredential>> {
        let mut owned = self
            .credentials
            .read()
            .get(user_id)
            .cloned()
            .unwrap_or_default();
        owned.sort_by_key(|c| c.priority);
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(store: &MemoryCredentialStore) -> Vec<EntityId> {
        store.list("u1").unwrap().iter().map(|c| c.id).collect()
    }

    #[test]
    fn create_appends_by_priority() {
        let store = MemoryCredentialStore::new();
        let a = store.create(StoredCredential::new("u1", "password")).unwrap();
        let b = store.create(StoredCredential::new("u1", "otp").with_label("phone")).unwrap();
        assert_eq!(a.priority, 10);
        assert_eq!(b.priority, 20);
        assert!(b.created_date > 0);
        assert_eq!(ids(&store), vec![a.id, b.id]);
        assert_eq!(
            store.by_name_and_type("u1", "phone", "otp").unwrap().map(|c| c.id),
            Some(b.id)
        );
        assert!(store.list("u2").unwrap().is_empty());
    }

    #[test]
    fn move_reorders() {
        let store = MemoryCredentialStore::new();
        let a = store.create(StoredCredential::new("u1", "password")).unwrap().id;
        let b = store.create(StoredCredential::new("u1", "otp")).unwrap().id;
        let c = store.create(StoredCredential::new("u1", "otp")).unwrap().id;

        assert!(store.move_to("u1", c, None).unwrap());
        assert_eq!(ids(&store), vec![c, a, b]);

        assert!(store.move_to("u1", c, Some(b)).unwrap());
        assert_eq!(ids(&store), vec![a, b, c]);

        assert!(store.move_to("u1", a, Some(b)).unwrap());
        assert_eq!(ids(&store), vec![b, a, c]);

        assert!(!store.move_to("u1", EntityId::new(), None).unwrap());
        assert!(!store.move_to("u1", a, Some(EntityId::new())).unwrap());
    }

    #[test]
    fn update_and_remove() {
        let store = MemoryCredentialStore::new();
        let mut cred = store.create(StoredCredential::new("u1", "password")).unwrap();
        cred.user_label = Some("main".into());
        store.update(&cred).unwrap();
        assert_eq!(store.get("u1", cred.id).unwrap(), Some(cred.clone()));

        assert!(store.remove("u1", cred.id).unwrap());
        assert!(!store.remove("u1", cred.id).unwrap());
        assert!(matches!(
            store.update(&cred),
            Err(CredentialError::UnknownCredential { .. })
        ));
    }

    proptest! {
        #[test]
        fn planned_move_renumbers_everything(
            count in 1usize..8,
            from in 0usize..8,
            after in prop::option::of(0usize..8),
        ) {
            let credentials: Vec<StoredCredential> = (0..count)
                .map(|i| {
                    let mut c = StoredCredential::new("u1", "otp");
                    c.priority = (i as i64 + 1) * PRIORITY_STEP;
                    c
                })
                .collect();
            let id = credentials[from % count].id;
            let previous = after.map(|a| credentials[a % count].id);

            let changed = plan_move(credentials.clone(), id, previous).unwrap();
            let mut order = credentials.clone();
            for c in &changed {
                if let Some(slot) = order.iter_mut().find(|o| o.id == c.id) {
                    slot.priority = c.priority;
                }
            }
            order.sort_by_key(|c| c.priority);
            let priorities: Vec<i64> = order.iter().map(|c| c.priority).collect();
            let expected: Vec<i64> = (1..=count as i64).map(|p| p * PRIORITY_STEP).collect();
            prop_assert_eq!(priorities, expected);
            match previous {
                None => {
                    prop_assert_eq!(order[0].id, id);
                }
                Some(prev) if prev != id => {
                    let at = order.iter().position(|c| c.id == prev).unwrap();
                    prop_assert_eq!(order[at + 1].id, id);
                }
                Some(_) => {}
            }
        }
    }
}
