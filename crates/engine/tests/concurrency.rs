use std::thread;

use chrono::{Duration, TimeZone, Utc};
use meter_core::{
    Dimension, PriceSource, PricedTransaction, QuotaLimits, RollupBucket, TokenType, UsageEvent,
};
use meter_engine::{AggregationEngine, MemoryLimits, MemoryQuotaStore, QuotaEnforcer, SnapshotQuery};
use rayon::prelude::*;

fn transactions() -> Vec<PricedTransaction> {
    let models = ["gpt-4.1", "claude-3-opus", "gemini-1.5-pro"];
    let subjects = ["alice", "bob", "carol", "dave"];
    let base = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap();
    (0..240u64)
        .map(|i| {
            let token_type = if i % 3 == 0 {
                TokenType::Completion
            } else {
                TokenType::Prompt
            };
            let cost = 0.000137 * (i as f64 + 1.0) + 0.1 / (i as f64 + 3.0);
            PricedTransaction {
                event: UsageEvent {
                    subject_id: subjects[(i % 4) as usize].to_string(),
                    model: models[(i % 3) as usize].to_string(),
                    token_type,
                    token_count: 17 * i + 3,
                    ts: base + Duration::hours((i * 7) as i64),
                    conversation_id: format!("conv-{}", i / 5),
                    message_id: format!("msg-{i}"),
                },
                input_cost_usd: cost,
                output_cost_usd: 0.0,
                total_cost_usd: cost,
                price_source: PriceSource::Exact,
            }
        })
        .collect()
}

fn all_buckets(engine: &AggregationEngine) -> Vec<Vec<RollupBucket>> {
    Dimension::ALL
        .iter()
        .map(|dimension| engine.snapshot(&SnapshotQuery::new(*dimension)))
        .collect()
}

#[test]
fn fold_order_does_not_change_buckets() {
    let forward = transactions();
    let mut reversed = forward.clone();
    reversed.reverse();
    let mut interleaved: Vec<PricedTransaction> = forward.iter().step_by(2).cloned().collect();
    interleaved.extend(forward.iter().skip(1).step_by(2).cloned());

    let expected = {
        let engine = AggregationEngine::new();
        engine.fold_all(&forward);
        all_buckets(&engine)
    };
    for order in [reversed, interleaved] {
        let engine = AggregationEngine::new();
        engine.fold_all(&order);
        assert_eq!(all_buckets(&engine), expected);
    }
}

#[test]
fn parallel_replay_matches_sequential_replay() {
    let events = transactions();
    let sequential = AggregationEngine::new();
    sequential.replay(&events, false);
    let parallel = AggregationEngine::new();
    parallel.replay(&events, true);
    assert_eq!(all_buckets(&parallel), all_buckets(&sequential));
}

#[test]
fn bucket_cost_is_sum_of_contributions() {
    let events = transactions();
    let engine = AggregationEngine::new();
    engine.fold_parallel(&events);
    let expected: f64 = events
        .iter()
        .filter(|tx| tx.event.subject_id == "alice")
        .map(|tx| tx.total_cost_usd)
        .sum();
    let bucket = engine.bucket(Dimension::Subject, "alice").expect("bucket");
    assert!((bucket.cost_usd() - expected).abs() <= expected * 1e-9);
}

#[test]
fn concurrent_folds_on_one_bucket_lose_nothing() {
    let events = transactions();
    let engine = AggregationEngine::with_dimensions(&[Dimension::Model]);
    thread::scope(|scope| {
        for chunk in events.chunks(30) {
            let engine = &engine;
            scope.spawn(move || engine.fold_all(chunk));
        }
    });
    let total: u64 = engine
        .snapshot(&SnapshotQuery::new(Dimension::Model))
        .iter()
        .map(|bucket| bucket.event_count)
        .sum();
    assert_eq!(total, events.len() as u64);
}

#[test]
fn incremental_folding_matches_full_replay() {
    let events = transactions();
    let (first, rest) = events.split_at(100);
    let incremental = AggregationEngine::new();
    incremental.fold_all(first);
    incremental.fold_parallel(rest);

    let replayed = AggregationEngine::new();
    replayed.replay(&events, false);
    assert_eq!(all_buckets(&incremental), all_buckets(&replayed));
}

#[test]
fn concurrent_quota_records_are_serialized_per_subject() {
    let quota = QuotaEnforcer::new(MemoryQuotaStore::new(), MemoryLimits::new());
    quota.limits_source().set(
        "alice",
        QuotaLimits {
            daily_token_limit: Some(10_000),
            ..QuotaLimits::default()
        },
    );
    let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    (0..500u64).into_par_iter().for_each(|_| {
        quota.record("alice", 7, 1, 0.01, at).expect("record");
    });

    let day = quota
        .state("alice", meter_core::Period::Day, at)
        .expect("state")
        .expect("bucket");
    assert_eq!(day.tokens_used, 3_500);
    assert_eq!(day.messages_used, 500);
    let check = quota.check_at("alice", at).expect("check");
    assert_eq!(check.daily_tokens_remaining, Some(6_500));
    assert!(check.within_limits);
}
