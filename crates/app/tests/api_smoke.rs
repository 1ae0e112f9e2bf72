use std::fs;

use chrono::{NaiveDate, TimeZone, Utc};
use meter_app::{AppConfig, AppError, AppPaths, AppState, MeterSettings, ReportParams};
use meter_core::{PriceEntry, PriceSource, Provider, QuotaLimits, RawUsageEvent, TimeRange};
use tempfile::{TempDir, tempdir};

const EVENTS: &str = concat!(
    r#"{"type":"usage","subject_id":"alice","model":"gpt-4.1","token_type":"prompt","token_count":100000,"ts":"2025-01-01T09:00:00Z","conversation_id":"c1","message_id":"m1"}"#,
    "\n",
    r#"{"type":"usage","subject_id":"alice","model":"gpt-4.1","token_type":"completion","token_count":50000,"ts":"2025-01-01T09:00:10Z","conversation_id":"c1","message_id":"m2"}"#,
    "\n",
    r#"{"type":"usage","subject_id":"bob","model":"mystery-model","token_type":"prompt","token_count":200000,"ts":"2025-01-01T10:00:00Z","conversation_id":"c2","message_id":"m3"}"#,
    "\n",
    r#"{"type":"message","conversation_id":"c1","role":"user","ts":"2025-01-01T09:00:00Z","message_id":"m1"}"#,
    "\n",
    r#"{"type":"message","conversation_id":"c1","role":"assistant","ts":"2025-01-01T09:00:10Z","message_id":"m2"}"#,
    "\n",
);

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).expect("date")
}

fn start_app(dir: &TempDir) -> (AppPaths, AppState) {
    let paths = AppPaths::new(dir.path().join("data"));
    meter_app::ensure_app_data_dir(&paths).expect("data dir");
    let state = AppState::new(AppConfig::from_paths(&paths, MeterSettings::default()));
    state.initialize().expect("initialize");
    (paths, state)
}

fn ingested_app(dir: &TempDir) -> (AppPaths, AppState) {
    let (paths, state) = start_app(dir);
    fs::write(paths.events_dir.join("chat.jsonl"), EVENTS).expect("write events");
    let report = state.services.ingest.run().expect("ingest");
    assert_eq!(report.stats.events_inserted, 3);
    assert_eq!(report.stats.messages_inserted, 2);
    assert_eq!(report.quota_records, 3);
    (paths, state)
}

#[test]
fn fresh_start_seeds_catalog_and_defaults_file() {
    let dir = tempdir().expect("temp dir");
    let (paths, state) = start_app(&dir);
    let entries = state.services.pricing.list_entries().expect("entries");
    assert!(!entries.is_empty());
    assert!(paths.pricing_defaults_path.exists());
    assert_eq!(state.services.analytics.summary().total_transactions, 0);
}

#[test]
fn ingest_feeds_rollups_quota_and_latency() {
    let dir = tempdir().expect("temp dir");
    let (_paths, state) = ingested_app(&dir);
    let services = &state.services;

    let params = ReportParams {
        dimension: Some("subject".to_string()),
        ..ReportParams::default()
    };
    let buckets = services.analytics.report(&params, today()).expect("report");
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].key, "alice");
    assert_eq!(buckets[0].tokens_in, 100_000);
    assert_eq!(buckets[0].tokens_out, 50_000);
    assert_eq!(buckets[0].event_count, 2);
    assert!((buckets[0].cost_usd - 6.0).abs() < 1e-9);
    assert!((buckets[1].cost_usd - 1.0).abs() < 1e-9);

    let summary = services.analytics.summary();
    assert_eq!(summary.total_transactions, 3);
    assert!((summary.total_cost_usd - 7.0).abs() < 1e-9);
    assert!((summary.average_cost_per_transaction - 2.3333).abs() < 1e-9);

    let daily = services.analytics.daily_series(None, today()).expect("daily");
    assert_eq!(daily.len(), 1);
    assert_eq!(daily[0].key, "2025-01-01");

    services
        .quota
        .set_limits(
            "alice",
            QuotaLimits {
                daily_token_limit: Some(200_000),
                daily_message_limit: Some(1),
                ..QuotaLimits::default()
            },
        )
        .expect("set limits");
    let at = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
    let check = services.quota.check_at("alice", at).expect("check");
    assert_eq!(check.daily_tokens_remaining, Some(50_000));
    assert_eq!(check.daily_messages_remaining, Some(0));
    assert!(!check.within_limits);

    let latency = services.latency.estimate(None).expect("latency");
    assert_eq!(latency.sample_count, 1);
    assert!((latency.avg_response_time_ms - 2000.0).abs() < 1e-9);
}

#[test]
fn restart_rebuilds_the_same_rollups() {
    let dir = tempdir().expect("temp dir");
    let (paths, state) = ingested_app(&dir);
    let before = state.services.analytics.summary();

    let restarted = AppState::new(AppConfig::from_paths(&paths, MeterSettings::default()));
    restarted.initialize().expect("initialize again");
    assert_eq!(restarted.services.analytics.summary(), before);

    let again = restarted.services.ingest.run().expect("ingest again");
    assert_eq!(again.stats.events_inserted, 0);
    assert_eq!(again.quota_records, 0);
}

#[test]
fn rebuild_reprices_from_the_current_catalog() {
    let dir = tempdir().expect("temp dir");
    let (_paths, state) = ingested_app(&dir);
    state
        .services
        .pricing
        .replace_entries(&[PriceEntry::new("gpt-4.1", Provider::OpenAi, 10.0, 20.0)])
        .expect("replace");
    assert_eq!(state.services.analytics.rebuild(false).expect("rebuild"), 3);

    let range = TimeRange {
        start: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        end: Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
    };
    let details = state
        .services
        .analytics
        .transactions(&range)
        .expect("transactions");
    let cost_of = |id: &str| {
        details
            .iter()
            .find(|detail| detail.message_id == id)
            .map(|detail| (detail.cost_usd, detail.price_source))
            .expect("transaction")
    };
    let (prompt_cost, prompt_source) = cost_of("m1");
    assert!((prompt_cost - 1.0).abs() < 1e-9);
    assert_eq!(prompt_source, PriceSource::Exact);
    let (completion_cost, _) = cost_of("m2");
    assert!((completion_cost - 1.0).abs() < 1e-9);
    assert_eq!(cost_of("m3").1, PriceSource::Default);
}

#[test]
fn direct_record_is_validated_and_idempotent() {
    let dir = tempdir().expect("temp dir");
    let (_paths, state) = start_app(&dir);
    let raw: RawUsageEvent = serde_json::from_str(
        r#"{"subjectId":"carol","model":"gpt-5","tokenType":"completion","tokenCount":1000,"timestamp":"2025-01-01T08:00:00Z","messageId":"x1"}"#,
    )
    .expect("raw event");

    let recorded = state.services.ingest.record(raw.clone()).expect("record");
    let transaction = recorded.expect("new event");
    assert_eq!(transaction.price_source, PriceSource::Exact);
    assert!((transaction.total_cost_usd - 0.015).abs() < 1e-9);
    assert!(state.services.ingest.record(raw.clone()).expect("again").is_none());
    assert_eq!(state.services.analytics.summary().total_transactions, 1);

    let anonymous = RawUsageEvent {
        message_id: None,
        ..raw.clone()
    };
    assert!(matches!(
        state.services.ingest.record(anonymous),
        Err(AppError::InvalidInput(_))
    ));
    let negative = RawUsageEvent {
        token_count: Some(-5),
        ..raw
    };
    assert!(matches!(
        state.services.ingest.record(negative),
        Err(AppError::Malformed(_))
    ));
}

#[test]
fn pricing_resolution_shows_cascade_step() {
    let dir = tempdir().expect("temp dir");
    let (paths, state) = start_app(&dir);
    let pricing = &state.services.pricing;

    assert_eq!(pricing.resolve("gpt-4.1").expect("exact").source, PriceSource::Exact);
    let family = pricing.resolve("gpt-9-preview").expect("family");
    assert_eq!(family.source, PriceSource::ProviderFallback);
    assert_eq!(family.matched_model.as_deref(), Some("gpt-4.1"));
    let fallback = pricing.resolve("mystery-model").expect("default");
    assert_eq!(fallback.source, PriceSource::Default);
    assert!((fallback.input_per_1m - 5.0).abs() < 1e-9);

    let invalid = [PriceEntry::new("broken", Provider::Other, -1.0, 2.0)];
    assert!(matches!(
        pricing.replace_entries(&invalid),
        Err(AppError::InvalidInput(_))
    ));

    let replaced = [PriceEntry::new("claude-3-opus", Provider::Anthropic, 15.0, 75.0)];
    assert_eq!(pricing.replace_entries(&replaced).expect("replace"), 1);
    let saved = meter_app::load_pricing_defaults(&paths.pricing_defaults_path).expect("defaults");
    assert_eq!(saved, replaced.to_vec());
    assert_eq!(
        pricing.resolve("gpt-4.1").expect("after replace").source,
        PriceSource::Default
    );
}

#[test]
fn unknown_dimension_is_invalid_input() {
    let dir = tempdir().expect("temp dir");
    let (_paths, state) = start_app(&dir);
    let params = ReportParams {
        dimension: Some("region".to_string()),
        ..ReportParams::default()
    };
    assert!(matches!(
        state.services.analytics.report(&params, today()),
        Err(AppError::InvalidInput(_))
    ));
}

#[test]
fn purge_drops_buckets_past_retention() {
    let dir = tempdir().expect("temp dir");
    let (_paths, state) = start_app(&dir);
    let raw = RawUsageEvent {
        subject_id: Some("old".to_string()),
        model: Some("gpt-5".to_string()),
        token_type: Some("prompt".to_string()),
        token_count: Some(10),
        raw_amount: None,
        ts: Some("2024-01-01T00:00:00Z".to_string()),
        conversation_id: None,
        message_id: Some("old-1".to_string()),
    };
    state.services.ingest.record(raw).expect("record");
    assert_eq!(state.services.quota.states("old").expect("states").len(), 2);

    let removed = state
        .services
        .quota
        .purge(NaiveDate::from_ymd_opt(2025, 6, 1).expect("date"))
        .expect("purge");
    assert_eq!(removed, 2);
    assert!(state.services.quota.states("old").expect("states").is_empty());
}
