//! Credential store over storage transactions.

use crate::error::{CredentialError, CredentialResult};
use crate::kind::{self, CREATED_DATE, CREDENTIAL_DATA, SECRET, USER_LABEL};
use crate::model::StoredCredential;
use crate::store::{now_millis, plan_move, CredentialStore, PRIORITY_STEP};
use realmstore_core::{
    Capability, CoreResult, Criteria, Delegate, Document, EntityId, Operator, StorageEngine,
    StorageTransaction, Store, Value,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Credential store keeping credentials as `credential` entities.
///
/// Each operation runs in its own storage transaction. Only engines
/// declaring [`Capability::CredentialAuth`] may hold credentials.
pub struct TransactionalCredentialStore<E: StorageEngine> {
    store: Arc<Store<E>>,
}

impl<E: StorageEngine> TransactionalCredentialStore<E> {
    /// Creates the store and registers the `credential` kind.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::MisconfiguredStore`] if the engine is not
    /// authoritative for credentials.
    pub fn new(store: Arc<Store<E>>) -> CredentialResult<Self> {
        let engine = store.engine();
        if !engine.capabilities().contains(Capability::CredentialAuth) {
            return Err(CredentialError::misconfigured_store(format!(
                "engine '{}' does not declare credential authority",
                engine.name()
            )));
        }
        if store.schema(kind::KIND).is_err() {
            store.register_kind(kind::schema());
        }
        Ok(Self { store })
    }

    fn run<T>(&self, work: impl FnOnce(&mut StorageTransaction<E>) -> CoreResult<T>) -> CredentialResult<T> {
        Ok(self.store.transaction(kind::KIND, work)?)
    }
}

fn core_fields(credential: &StoredCredential) -> Document {
    let mut core = Document::new();
    core.insert(kind::USER_ID.name(), credential.user_id.as_str());
    core.insert(kind::TYPE.name(), credential.credential_type.as_str());
    core.insert(kind::PRIORITY.name(), credential.priority);
    core.insert(CREATED_DATE, credential.created_date);
    if let Some(label) = &credential.user_label {
        core.insert(USER_LABEL, label.as_str());
    }
    core.insert(CREDENTIAL_DATA, credential.credential_data.clone());
    core
}

fn from_delegate(delegate: &mut Delegate) -> CoreResult<StoredCredential> {
    let id = delegate.id();
    let secret_data = delegate.group(SECRET)?.clone();
    let core = delegate.core()?;
    let text = |field: &str| {
        core.get(field)
            .and_then(Value::as_text)
            .map(str::to_string)
    };
    let integer = |field: &str| core.get(field).and_then(Value::as_integer).unwrap_or(0);
    Ok(StoredCredential {
        id,
        user_id: text(kind::USER_ID.name()).unwrap_or_default(),
        credential_type: text(kind::TYPE.name()).unwrap_or_default(),
        user_label: text(USER_LABEL),
        created_date: integer(CREATED_DATE),
        priority: integer(kind::PRIORITY.name()),
        credential_data: core
            .get(CREDENTIAL_DATA)
            .and_then(Value::as_map)
            .cloned()
            .map(Document::from)
            .unwrap_or_default(),
        secret_data,
    })
}

fn owned_by(delegate: &mut Delegate, user_id: &str) -> CoreResult<bool> {
    Ok(delegate.get_text(kind::USER_ID.name())?.as_deref() == Some(user_id))
}

fn read_owned(
    txn: &mut StorageTransaction<impl StorageEngine>,
    user_id: &str,
    id: EntityId,
) -> CoreResult<Option<Delegate>> {
    match txn.read(id)? {
        Some(mut delegate) => {
            if owned_by(&mut delegate, user_id)? {
                Ok(Some(delegate))
            } else {
                Ok(None)
            }
        }
        None => Ok(None),
    }
}

fn list_owned(txn: &mut StorageTransaction<impl StorageEngine>, user_id: &str) -> CoreResult<Vec<StoredCredential>> {
    let criteria = Criteria::compare(kind::USER_ID, Operator::Eq, [user_id])?;
    txn.query(&criteria)?
        .map(|delegate| delegate.and_then(|mut d| from_delegate(&mut d)))
        .collect()
}

fn write_back(txn: &mut StorageTransaction<impl StorageEngine>, delegate: &mut Delegate, credential: &StoredCredential) -> CoreResult<()> {
    for (field, value) in core_fields(credential) {
        delegate.set(&field, value)?;
    }
    if credential.user_label.is_none() {
        delegate.unset(USER_LABEL)?;
    }
    delegate.replace_group(SECRET, credential.secret_data.clone())?;
    txn.update(delegate)
}

impl<E: StorageEngine> CredentialStore for TransactionalCredentialStore<E> {
    fn create(&self, mut credential: StoredCredential) -> CredentialResult<StoredCredential> {
        let created = self.run(|txn| {
            let last = list_owned(txn, &credential.user_id)?
                .iter()
                .map(|c| c.priority)
                .max()
                .unwrap_or(0);
            credential.priority = last + PRIORITY_STEP;
            if credential.created_date == 0 {
                credential.created_date = now_millis();
            }
            let groups = BTreeMap::from([(SECRET.to_string(), credential.secret_data.clone())]);
            let delegate = txn.create_with_groups(core_fields(&credential), groups)?;
            credential.id = delegate.id();
            Ok(credential)
        })?;
        tracing::debug!(user_id = %created.user_id, credential = %created.id, credential_type = %created.credential_type, "credential created");
        Ok(created)
    }

    fn update(&self, credential: &StoredCredential) -> CredentialResult<()> {
        let found = self.run(|txn| match read_owned(txn, &credential.user_id, credential.id)? {
            Some(mut delegate) => {
                write_back(txn, &mut delegate, credential)?;
                Ok(true)
            }
            None => Ok(false),
        })?;
        if found {
            Ok(())
        } else {
            Err(CredentialError::UnknownCredential { id: credential.id })
        }
    }

    fn remove(&self, user_id: &str, id: EntityId) -> CredentialResult<bool> {
        self.run(|txn| match read_owned(txn, user_id, id)? {
            Some(_) => txn.remove(id),
            None => Ok(false),
        })
    }

    fn get(&self, user_id: &str, id: EntityId) -> CredentialResult<Option<StoredCredential>> {
        self.run(|txn| match read_owned(txn, user_id, id)? {
            Some(mut delegate) => from_delegate(&mut delegate).map(Some),
            None => Ok(None),
        })
    }

    fn list(&self, user_id: &str) -> CredentialResult<Vec<StoredCredential>> {
        self.run(|txn| list_owned(txn, user_id))
    }

    fn move_to(&self, user_id: &str, id: EntityId, new_previous: Option<EntityId>) -> CredentialResult<bool> {
        self.run(|txn| {
            let Some(changed) = plan_move(list_owned(txn, user_id)?, id, new_previous) else {
                return Ok(false);
            };
            for credential in &changed {
                if let Some(mut delegate) = txn.read(credential.id)? {
                    delegate.set(kind::PRIORITY.name(), credential.priority)?;
                    txn.update(&mut delegate)?;
                }
            }
            Ok(true)
        })
    }
}

impl<E: StorageEngine> fmt::Debug for TransactionalCredentialStore<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalCredentialStore")
            .field("store", &self.store)
            .finish()
    }
}
