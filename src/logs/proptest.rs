//! Property-Based Tests for Log Batching
//!
//! # Test Properties
//!
//! 1. **Order Independence**: stream grouping does not depend on entry order
//! 2. **Conservation**: every entry lands in exactly one stream
//! 3. **Bounded Buffer**: the batcher never holds more than its capacity

#![cfg(test)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use super::batcher::{BatcherConfig, LogBatcher};
use super::sink::InMemoryLogSink;
use super::stream::{build_streams, COMPONENT_LABEL, LEVEL_LABEL};
use crate::domain::models::{LogEntry, LogLevel};

// =============================================================================
// Property Strategies
// =============================================================================

fn level_strategy() -> impl Strategy<Value = LogLevel> {
    prop_oneof![
        Just(LogLevel::Debug),
        Just(LogLevel::Info),
        Just(LogLevel::Warn),
        Just(LogLevel::Error),
    ]
}

fn entry_strategy() -> impl Strategy<Value = LogEntry> {
    (
        level_strategy(),
        prop::sample::select(vec!["", "api", "worker", "db"]),
        prop::option::of(prop::sample::select(vec!["eu", "us"])),
        0i64..1_000_000,
        "[a-z ]{0,16}",
    )
        .prop_map(|(level, component, region, secs, message)| {
            let mut entry = LogEntry::new(level, message)
                .with_component(component)
                .with_timestamp(Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap());
            if let Some(region) = region {
                entry = entry.with_label("region", region);
            }
            entry
        })
}

fn entries_strategy() -> impl Strategy<Value = Vec<LogEntry>> {
    prop::collection::vec(entry_strategy(), 0..64)
}

fn dynamic() -> Vec<String> {
    vec![LEVEL_LABEL.to_string(), COMPONENT_LABEL.to_string()]
}

// =============================================================================
// Grouping Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: reversing the entries produces the same streams.
    #[test]
    fn prop_grouping_order_independent(entries in entries_strategy()) {
        let mut static_labels = BTreeMap::new();
        static_labels.insert("job".to_string(), "analyzer".to_string());

        let forward = build_streams(&entries, &static_labels, &dynamic());

        let mut reversed = entries.clone();
        reversed.reverse();
        let backward = build_streams(&reversed, &static_labels, &dynamic());

        prop_assert_eq!(forward.len(), backward.len());
        for (a, b) in forward.iter().zip(backward.iter()) {
            prop_assert_eq!(&a.labels, &b.labels);
            let mut a_values = a.values.clone();
            let mut b_values = b.values.clone();
            a_values.sort();
            b_values.sort();
            prop_assert_eq!(a_values, b_values);
        }
    }

    /// Property: no entry is lost or duplicated by grouping.
    #[test]
    fn prop_grouping_conserves_entries(entries in entries_strategy()) {
        let streams = build_streams(&entries, &BTreeMap::new(), &dynamic());

        let total: usize = streams.iter().map(|s| s.len()).sum();
        prop_assert_eq!(total, entries.len());

        for stream in &streams {
            prop_assert!(!stream.is_empty());
        }

        let mut keys: Vec<String> = streams.iter().map(|s| s.key()).collect();
        let before = keys.len();
        keys.dedup();
        prop_assert_eq!(keys.len(), before);
    }
}

// =============================================================================
// Batcher Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: the buffer never exceeds capacity, and buffered plus
    /// pushed entries always equals written entries.
    #[test]
    fn prop_buffer_bounded_and_lossless(
        capacity in 1usize..8,
        batches in prop::collection::vec(entries_strategy(), 1..6),
    ) {
        tokio_test::block_on(async {
            let sink = Arc::new(InMemoryLogSink::new());
            let batcher = LogBatcher::new(
                BatcherConfig {
                    buffer_size: capacity,
                    flush_interval: Duration::from_secs(3600),
                    dynamic_labels: dynamic(),
                    static_labels: BTreeMap::new(),
                },
                sink.clone(),
            );

            let mut written = 0;
            for batch in &batches {
                batcher.write_logs(batch).await.unwrap();
                written += batch.len();
                assert!(batcher.buffered_len() <= capacity);
                assert_eq!(sink.line_count() + batcher.buffered_len(), written);
            }

            batcher.close().await.unwrap();
            assert_eq!(batcher.buffered_len(), 0);
            assert_eq!(sink.line_count(), written);
        });
    }
}
