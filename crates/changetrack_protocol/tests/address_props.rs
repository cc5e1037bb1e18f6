//! Property tests for feed address construction.

use changetrack_protocol::{changes_feed_path, FeedMode, FeedOptions, SequenceId};
use proptest::prelude::*;
use url::form_urlencoded;

fn query_pairs(path: &str) -> Vec<(String, String)> {
    let query = path.split_once('?').map(|(_, q)| q).unwrap_or("");
    form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn mode_strategy() -> impl Strategy<Value = FeedMode> {
    prop_oneof![Just(FeedMode::OneShot), Just(FeedMode::LongPoll)]
}

proptest! {
    #[test]
    fn since_survives_encoding(seq in "\\PC{1,40}", mode in mode_strategy()) {
        let since = SequenceId::from(seq.clone());
        let path = changes_feed_path(mode, &FeedOptions::new(), Some(&since)).unwrap();

        let pairs = query_pairs(&path);
        let decoded: Vec<_> = pairs.iter().filter(|(k, _)| k == "since").collect();
        prop_assert_eq!(decoded.len(), 1);
        prop_assert_eq!(&decoded[0].1, &seq);
    }

    #[test]
    fn doc_ids_always_force_doc_ids_filter(
        filter in proptest::option::of("[a-z]{1,8}/[a-z]{1,8}"),
        doc_ids in proptest::collection::vec("[a-zA-Z0-9_-]{1,12}", 1..6),
    ) {
        let mut options = FeedOptions::new().with_doc_ids(doc_ids.clone());
        if let Some(name) = filter {
            options = options.with_filter(name).with_filter_param("channel", "x");
        }

        let path = changes_feed_path(FeedMode::LongPoll, &options, None).unwrap();
        let pairs = query_pairs(&path);

        let filters: Vec<_> = pairs.iter().filter(|(k, _)| k == "filter").collect();
        prop_assert_eq!(filters.len(), 1);
        prop_assert_eq!(filters[0].1.as_str(), "_doc_ids");
        prop_assert!(pairs.iter().all(|(k, _)| k != "channel"));

        let listed = pairs.iter().find(|(k, _)| k == "doc_ids").map(|(_, v)| v.clone()).unwrap();
        let listed: Vec<String> = serde_json::from_str(&listed).unwrap();
        prop_assert_eq!(listed, doc_ids);
    }
}
