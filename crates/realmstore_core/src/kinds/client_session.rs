//! The `client-session` kind.

use crate::criteria::SearchableField;
use crate::schema::{FieldMapping, KindSchema};

/// Kind name.
pub const KIND: &str = "client-session";

/// Group holding free-form client session notes.
pub const NOTES: &str = "notes";

/// Client session id.
pub const ID: SearchableField = SearchableField::string("id");
/// Owning user session.
pub const USER_SESSION_ID: SearchableField = SearchableField::string("user_session_id");
/// Client the session belongs to.
pub const CLIENT_ID: SearchableField = SearchableField::string("client_id");
/// Owning realm.
pub const REALM_ID: SearchableField = SearchableField::string("realm_id");
/// Whether this is an offline session.
pub const IS_OFFLINE: SearchableField = SearchableField::boolean("is_offline");
/// Expiration timestamp, seconds.
pub const EXPIRATION: SearchableField = SearchableField::number("expiration").ordinal();
/// Last activity timestamp, seconds.
pub const TIMESTAMP: SearchableField = SearchableField::number("timestamp").ordinal();

/// Core field: protocol the client speaks.
pub const PROTOCOL: &str = "protocol";
/// Core field: redirect URI of the login.
pub const REDIRECT_URI: &str = "redirect_uri";
/// Core field: client session action.
pub const ACTION: &str = "action";
/// Core field backing [`IS_OFFLINE`].
pub const OFFLINE: &str = "offline";

/// Layout of the `client-session` kind.
#[must_use]
pub fn schema() -> KindSchema {
    KindSchema::new(KIND)
        .searchable(ID, FieldMapping::Identifier { column: "id" })
        .searchable(
            USER_SESSION_ID,
            FieldMapping::Identifier {
                column: "user_session_id",
            },
        )
        .searchable(CLIENT_ID, FieldMapping::Document { key: "client_id" })
        .searchable(REALM_ID, FieldMapping::Document { key: "realm_id" })
        .searchable(IS_OFFLINE, FieldMapping::Column { column: OFFLINE })
        .searchable(EXPIRATION, FieldMapping::Column { column: "expiration" })
        .searchable(TIMESTAMP, FieldMapping::Column { column: "timestamp" })
        .group(NOTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use realmstore_codec::Document;

    #[test]
    fn client_and_realm_stay_in_side_document() {
        let schema = schema();
        let mut core = Document::new();
        core.insert("user_session_id", "s1");
        core.insert("client_id", "account");
        core.insert("realm_id", "master");
        core.insert("timestamp", 10);
        let (columns, metadata) = schema.split_core(&core);
        assert!(columns.contains_key("user_session_id"));
        assert!(columns.contains_key("timestamp"));
        assert!(metadata.contains_key("client_id"));
        assert!(metadata.contains_key("realm_id"));
    }
}
