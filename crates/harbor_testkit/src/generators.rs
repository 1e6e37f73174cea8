//! Property-based test generators using proptest.

use harbor_core::{ActionRequest, ActionType, ReplayOutcome};
use proptest::prelude::*;

/// Strategy for generating valid user keys.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_:.-]{0,31}").expect("Invalid regex")
}

/// Strategy for generating record values.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for generating plaintext strings.
pub fn plaintext_strategy() -> impl Strategy<Value = String> {
    any::<String>()
}

/// Strategy for generating TTLs in milliseconds.
pub fn ttl_strategy() -> impl Strategy<Value = u64> {
    1u64..=86_400_000
}

/// Strategy for generating action types.
pub fn action_type_strategy() -> impl Strategy<Value = ActionType> {
    prop::sample::select(ActionType::ALL.to_vec())
}

/// Strategy for generating small JSON payloads.
pub fn payload_strategy() -> impl Strategy<Value = serde_json::Value> {
    prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..4).prop_map(|fields| {
        serde_json::Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::from(v)))
                .collect(),
        )
    })
}

/// Strategy for generating action requests.
pub fn action_request_strategy() -> impl Strategy<Value = ActionRequest> {
    (action_type_strategy(), payload_strategy())
        .prop_map(|(action_type, payload)| ActionRequest::new(action_type, payload))
}

/// Strategy for generating outcomes that settle or reschedule an action.
pub fn settling_outcome_strategy() -> impl Strategy<Value = ReplayOutcome> {
    prop_oneof![
        Just(ReplayOutcome::Synced),
        "[a-z ]{1,12}".prop_map(ReplayOutcome::Retryable),
        "[a-z ]{1,12}".prop_map(ReplayOutcome::Fatal),
    ]
}
