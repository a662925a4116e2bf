//! Property-based test generators using proptest.
//!
//! Session seeds and criteria draw from small shared vocabularies so that
//! generated predicates actually hit generated data.

use crate::fixtures::SessionSeed;
use proptest::prelude::*;
use realmstore_core::kinds::user_session;
use realmstore_core::{Criteria, Operator, SearchableField, Value};

const REALMS: &[&str] = &["r1", "r2", "r3"];
const USERS: &[&str] = &["u1", "u2", "u3", "u4"];
const CLIENTS: &[&str] = &["account", "admin", "broker"];
const ONLINE_SESSIONS: &[&str] = &["s1", "s2"];

fn one_of(words: &'static [&'static str]) -> impl Strategy<Value = String> {
    prop::sample::select(words).prop_map(str::to_string)
}

fn some_of(words: &'static [&'static str]) -> impl Strategy<Value = Vec<String>> {
    prop::sample::subsequence(words, 1..=words.len())
        .prop_map(|picked| picked.into_iter().map(str::to_string).collect())
}

/// Strategy for one user session.
pub fn session_seed_strategy() -> impl Strategy<Value = SessionSeed> {
    (
        one_of(REALMS),
        one_of(USERS),
        0i64..100,
        any::<bool>(),
        prop::option::of(one_of(ONLINE_SESSIONS)),
        prop::sample::subsequence(CLIENTS, 0..=CLIENTS.len()),
    )
        .prop_map(
            |(realm_id, user_id, expiration, offline, corresponding_session, clients)| {
                SessionSeed {
                    realm_id,
                    user_id,
                    expiration,
                    offline,
                    corresponding_session,
                    clients: clients.into_iter().map(str::to_string).collect(),
                }
            },
        )
}

/// Strategy for a batch of user sessions.
pub fn session_batch_strategy(max: usize) -> impl Strategy<Value = Vec<SessionSeed>> {
    prop::collection::vec(session_seed_strategy(), 0..=max)
}

fn legal<I, V>(field: SearchableField, operator: Operator, values: I) -> Criteria
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    Criteria::compare(field, operator, values).expect("Generated criteria must be legal")
}

/// Strategy for a single legal comparison over `user-session` fields.
pub fn leaf_criteria_strategy() -> impl Strategy<Value = Criteria> {
    prop_oneof![
        (
            prop::sample::select(vec![Operator::Eq, Operator::Ne]),
            one_of(REALMS)
        )
            .prop_map(|(op, realm)| legal(user_session::REALM_ID, op, [realm])),
        some_of(USERS).prop_map(|users| legal(user_session::USER_ID, Operator::In, users)),
        any::<bool>().prop_map(|offline| legal(user_session::IS_OFFLINE, Operator::Eq, [offline])),
        (
            prop::sample::select(vec![Operator::Gt, Operator::Lt]),
            0i64..100
        )
            .prop_map(|(op, at)| legal(user_session::EXPIRATION, op, [at])),
        some_of(CLIENTS).prop_map(|clients| legal(user_session::CLIENT_ID, Operator::In, clients)),
        one_of(ONLINE_SESSIONS)
            .prop_map(|online| legal(user_session::CORRESPONDING_SESSION_ID, Operator::Eq, [online])),
    ]
}

/// Strategy for criteria trees up to a few levels deep.
pub fn criteria_strategy() -> impl Strategy<Value = Criteria> {
    leaf_criteria_strategy().prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..3).prop_map(|c| Criteria::and(c)),
            prop::collection::vec(inner.clone(), 0..3).prop_map(|c| Criteria::or(c)),
            inner.prop_map(Criteria::not),
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn seeds_stay_in_vocabulary(seed in session_seed_strategy()) {
            prop_assert!(REALMS.contains(&seed.realm_id.as_str()));
            prop_assert!((0..100).contains(&seed.expiration));
            prop_assert!(seed.clients.iter().all(|c| CLIENTS.contains(&c.as_str())));
        }
    }
}
