//! Property-based test generators using proptest.

use changetrack_protocol::SequenceId;
use proptest::prelude::*;
use serde_json::{json, Value};

/// Strategy for sequence values: plain integers or opaque strings.
pub fn sequence_strategy() -> impl Strategy<Value = SequenceId> {
    prop_oneof![
        any::<u64>().prop_map(SequenceId::from),
        prop::string::string_regex("[0-9]{1,6}-[A-Za-z0-9_]{4,24}")
            .expect("Invalid regex")
            .prop_map(SequenceId::from),
    ]
}

/// Strategy for document IDs, including characters that need escaping.
pub fn doc_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_:+ &/=-]{1,24}").expect("Invalid regex")
}

/// Strategy for a batch of valid changes with strictly increasing integer
/// sequences.
pub fn change_batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec((1u64..1_000, doc_id_strategy()), 0..max_len).prop_map(|entries| {
        let mut seq = 0u64;
        entries
            .into_iter()
            .map(|(step, id)| {
                seq += step;
                json!({"seq": seq, "id": id, "changes": [{"rev": "1-7a3e"}]})
            })
            .collect()
    })
}
