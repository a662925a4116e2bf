//! The `user-session` kind.

use crate::criteria::SearchableField;
use crate::schema::{FieldMapping, KindSchema};

/// Kind name.
pub const KIND: &str = "user-session";

/// Group holding free-form session notes.
pub const NOTES: &str = "notes";
/// Group keyed by client id, one entry per attached client session.
pub const CLIENT_SESSIONS: &str = "client_sessions";
/// Note linking an offline session to its online counterpart.
pub const CORRESPONDING_SESSION_ID_NOTE: &str = "correspondingSessionId";

/// Session id.
pub const ID: SearchableField = SearchableField::string("id");
/// Owning realm.
pub const REALM_ID: SearchableField = SearchableField::string("realm_id");
/// Authenticated user.
pub const USER_ID: SearchableField = SearchableField::string("user_id");
/// User id at the identity broker.
pub const BROKER_USER_ID: SearchableField = SearchableField::string("broker_user_id");
/// Session id at the identity broker.
pub const BROKER_SESSION_ID: SearchableField = SearchableField::string("broker_session_id");
/// Whether this is an offline session.
pub const IS_OFFLINE: SearchableField = SearchableField::boolean("is_offline");
/// Id of the online session an offline session was created from.
pub const CORRESPONDING_SESSION_ID: SearchableField =
    SearchableField::string("corresponding_session_id");
/// Clients with a session attached.
pub const CLIENT_ID: SearchableField = SearchableField::string("client_id");
/// Expiration timestamp, seconds.
pub const EXPIRATION: SearchableField = SearchableField::number("expiration").ordinal();
/// Last refresh timestamp, seconds.
pub const LAST_SESSION_REFRESH: SearchableField =
    SearchableField::number("last_session_refresh").ordinal();

/// Core field: login name used to authenticate.
pub const LOGIN_USERNAME: &str = "login_username";
/// Core field: client address.
pub const IP_ADDRESS: &str = "ip_address";
/// Core field: authentication method.
pub const AUTH_METHOD: &str = "auth_method";
/// Core field: remember-me flag.
pub const REMEMBER_ME: &str = "remember_me";
/// Core field: start timestamp, seconds.
pub const STARTED: &str = "started";
/// Core field: session state.
pub const STATE: &str = "state";
/// Core field backing [`IS_OFFLINE`].
pub const OFFLINE: &str = "offline";

/// Layout of the `user-session` kind.
#[must_use]
pub fn schema() -> KindSchema {
    KindSchema::new(KIND)
        .searchable(ID, FieldMapping::Identifier { column: "id" })
        .searchable(REALM_ID, FieldMapping::Column { column: "realm_id" })
        .searchable(USER_ID, FieldMapping::Column { column: "user_id" })
        .searchable(
            BROKER_USER_ID,
            FieldMapping::Column {
                column: "broker_user_id",
            },
        )
        .searchable(
            BROKER_SESSION_ID,
            FieldMapping::Column {
                column: "broker_session_id",
            },
        )
        .searchable(IS_OFFLINE, FieldMapping::Column { column: OFFLINE })
        .searchable(
            CORRESPONDING_SESSION_ID,
            FieldMapping::GroupEntry {
                group: NOTES,
                entry: CORRESPONDING_SESSION_ID_NOTE,
            },
        )
        .searchable(
            CLIENT_ID,
            FieldMapping::GroupKey {
                group: CLIENT_SESSIONS,
            },
        )
        .searchable(EXPIRATION, FieldMapping::Column { column: "expiration" })
        .searchable(
            LAST_SESSION_REFRESH,
            FieldMapping::Column {
                column: "last_session_refresh",
            },
        )
}
