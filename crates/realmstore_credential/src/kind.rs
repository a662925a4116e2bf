//! The `credential` kind.

use realmstore_core::{FieldMapping, KindSchema, SearchableField};

/// Kind name.
pub const KIND: &str = "credential";

/// Group holding secret material.
pub const SECRET: &str = "secret";

/// Credential id.
pub const ID: SearchableField = SearchableField::string("id");
/// Owning identity.
pub const USER_ID: SearchableField = SearchableField::string("user_id");
/// Credential type.
pub const TYPE: SearchableField = SearchableField::string("type");
/// Position among the identity's credentials.
pub const PRIORITY: SearchableField = SearchableField::number("priority").ordinal();

/// Core field: label chosen by the user.
pub const USER_LABEL: &str = "user_label";
/// Core field: creation time.
pub const CREATED_DATE: &str = "created_date";
/// Core field: public credential parameters.
pub const CREDENTIAL_DATA: &str = "credential_data";

/// Layout of the `credential` kind.
#[must_use]
pub fn schema() -> KindSchema {
    KindSchema::new(KIND)
        .searchable(ID, FieldMapping::Identifier { column: "id" })
        .searchable(USER_ID, FieldMapping::Column { column: "user_id" })
        .searchable(TYPE, FieldMapping::Column { column: "type" })
        .searchable(PRIORITY, FieldMapping::Column { column: "priority" })
        .group(SECRET)
        .sort_by(PRIORITY.name())
}
