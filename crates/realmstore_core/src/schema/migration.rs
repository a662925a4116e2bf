//! Forward-only schema migrations.
//!
//! Records carry the schema version they were written with. When a record
//! older than its kind's current version is read, every migration from its
//! version up to the current one is applied to the core fields in order.
//! Nothing is rewritten in storage until the entity is next written, at
//! which point it is stamped with the current version.

use crate::error::{CoreError, CoreResult};
use crate::types::SchemaVersion;
use realmstore_codec::Document;
use std::fmt;

/// Upgrades core fields from one schema version to the next.
pub trait SchemaMigration: Send + Sync {
    /// The version this migration upgrades from. It produces
    /// `from_version().next()`.
    fn from_version(&self) -> SchemaVersion;

    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Rewrites `core` in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored fields cannot be upgraded.
    fn upgrade(&self, core: &mut Document) -> CoreResult<()>;
}

impl fmt::Debug for dyn SchemaMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaMigration({} from {})", self.name(), self.from_version())
    }
}

/// Renames a core field.
#[derive(Debug, Clone)]
pub struct RenameField {
    from_version: SchemaVersion,
    old_name: String,
    new_name: String,
    label: String,
}

impl RenameField {
    /// Creates a rename of `old_name` to `new_name` applied to records at
    /// `from_version`.
    pub fn new(
        from_version: SchemaVersion,
        old_name: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Self {
        let old_name = old_name.into();
        let new_name = new_name.into();
        let label = format!("rename {old_name} to {new_name}");
        Self {
            from_version,
            old_name,
            new_name,
            label,
        }
    }
}

impl SchemaMigration for RenameField {
    fn from_version(&self) -> SchemaVersion {
        self.from_version
    }

    fn name(&self) -> &str {
        &self.label
    }

    fn upgrade(&self, core: &mut Document) -> CoreResult<()> {
        if let Some(value) = core.remove(&self.old_name) {
            if core.contains_key(&self.new_name) {
                return Err(CoreError::invalid_prior_state(format!(
                    "cannot rename '{}': '{}' already present",
                    self.old_name, self.new_name
                )));
            }
            core.insert(self.new_name.clone(), value);
        }
        Ok(())
    }
}

/// Upgrades `core` from `stored` to `current` using `migrations`.
///
/// Returns the number of migrations applied.
pub(crate) fn migrate(
    kind: &str,
    migrations: &[std::sync::Arc<dyn SchemaMigration>],
    stored: SchemaVersion,
    current: SchemaVersion,
    core: &mut Document,
) -> CoreResult<usize> {
    if stored > current {
        return Err(CoreError::invalid_prior_state(format!(
            "{kind} record written with {stored}, newest known layout is {current}"
        )));
    }

    let mut version = stored;
    let mut applied = 0;
    while version < current {
        let step = migrations
            .iter()
            .find(|m| m.from_version() == version)
            .ok_or_else(|| {
                CoreError::invalid_prior_state(format!(
                    "{kind} has no migration from {version}"
                ))
            })?;
        step.upgrade(core)?;
        tracing::trace!(kind, migration = step.name(), from = %version, "migrated record");
        version = version.next();
        applied += 1;
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn migrations() -> Vec<Arc<dyn SchemaMigration>> {
        vec![
            Arc::new(RenameField::new(SchemaVersion::new(1), "userId", "user_id")),
            Arc::new(RenameField::new(SchemaVersion::new(2), "realm", "realm_id")),
        ]
    }

    #[test]
    fn applies_every_step_in_order() {
        let mut core = Document::new();
        core.insert("userId", "u1");
        core.insert("realm", "master");

        let applied = migrate(
            "user-session",
            &migrations(),
            SchemaVersion::new(1),
            SchemaVersion::new(3),
            &mut core,
        )
        .unwrap();

        assert_eq!(applied, 2);
        assert_eq!(core.get("user_id").and_then(|v| v.as_text()), Some("u1"));
        assert_eq!(core.get("realm_id").and_then(|v| v.as_text()), Some("master"));
        assert!(!core.contains_key("userId"));
    }

    #[test]
    fn current_records_are_untouched() {
        let mut core = Document::new();
        core.insert("userId", "u1");
        let applied = migrate(
            "user-session",
            &migrations(),
            SchemaVersion::new(3),
            SchemaVersion::new(3),
            &mut core,
        )
        .unwrap();
        assert_eq!(applied, 0);
        assert!(core.contains_key("userId"));
    }

    #[test]
    fn newer_layout_is_rejected() {
        let mut core = Document::new();
        let err = migrate(
            "user-session",
            &migrations(),
            SchemaVersion::new(4),
            SchemaVersion::new(3),
            &mut core,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPriorState { .. }));
    }

    #[test]
    fn gap_in_chain_is_rejected() {
        let mut core = Document::new();
        let err = migrate(
            "user-session",
            &migrations(),
            SchemaVersion::new(1),
            SchemaVersion::new(5),
            &mut core,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no migration from schema:3"));
    }
}
