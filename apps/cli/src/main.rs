mod args;
mod config;
mod dirs;

use std::io::{self, BufRead};

use chrono::{NaiveDate, Utc};
use meter_app::{
    AppConfig, AppError, AppPaths, AppState, ReportParams, ensure_app_data_dir, parse_utc,
    range_for_days,
};
use meter_core::{QuotaLimits, RawUsageEvent};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::args::{CliArgs, Command, PricingCommand, QuotaCommand};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let args = args::parse_args().map_err(|err| {
        eprintln!("{err}");
        args::print_help();
        io::Error::new(io::ErrorKind::InvalidInput, "invalid arguments")
    })?;
    let Some(command) = args.command.clone().filter(|_| !args.help) else {
        args::print_help();
        return Ok(());
    };

    let config = config::load_or_create().map_err(io::Error::other)?;
    if config.created {
        info!(path = %config.file.display(), "created config");
    }

    let data_dir = match args.data_dir.clone().or_else(|| config.config.data_dir.clone()) {
        Some(dir) => dir,
        None => dirs::default_data_dir().map_err(io::Error::other)?,
    };
    let paths = AppPaths::new(data_dir);
    ensure_app_data_dir(&paths)?;

    let mut settings = config.config.settings();
    if let Some(top) = args.top {
        settings.top_n = top;
    }
    if let Some(days) = args.days {
        settings.window_days = days;
    }

    let app_state = AppState::new(AppConfig::from_paths(&paths, settings));
    app_state.initialize()?;

    if command != Command::Ingest {
        if let Err(err) = app_state.services.ingest.run() {
            warn!(error = %err, "failed to refresh events");
        }
    }
    run(&app_state, command, &args, Utc::now().date_naive())
}

fn run(
    app_state: &AppState,
    command: Command,
    args: &CliArgs,
    today: NaiveDate,
) -> Result<(), Box<dyn std::error::Error>> {
    let services = &app_state.services;
    match command {
        Command::Ingest => print_json(&services.ingest.run()?),
        Command::Record => print_json(&record_stdin(app_state)?),
        Command::Report => {
            let params = ReportParams {
                dimension: args.dimension.clone(),
                top: args.top,
                days: args.days,
            };
            print_json(&services.analytics.report(&params, today)?)
        }
        Command::Summary => print_json(&services.analytics.summary()),
        Command::Daily => print_json(&services.analytics.daily_series(args.days, today)?),
        Command::Transactions => {
            let range = range_for_days(today, app_state.config.settings.window_days)?;
            print_json(&services.analytics.transactions(&range)?)
        }
        Command::Latency => {
            let range = args
                .days
                .map(|days| range_for_days(today, days))
                .transpose()?;
            print_json(&services.latency.estimate(range.as_ref())?)
        }
        Command::Quota(quota) => run_quota(app_state, quota, args, today),
        Command::Pricing(PricingCommand::List) => print_json(&services.pricing.list_entries()?),
        Command::Pricing(PricingCommand::Resolve(model)) => {
            print_json(&services.pricing.resolve(&model)?)
        }
    }
}

fn run_quota(
    app_state: &AppState,
    command: QuotaCommand,
    args: &CliArgs,
    today: NaiveDate,
) -> Result<(), Box<dyn std::error::Error>> {
    let quota = &app_state.services.quota;
    match command {
        QuotaCommand::Check => {
            let subject = args.require_subject().map_err(io::Error::other)?;
            let check = match args.at.as_deref() {
                Some(at) => quota.check_at(subject, parse_utc(at)?)?,
                None => quota.check(subject)?,
            };
            print_json(&check)
        }
        QuotaCommand::Set => {
            let subject = args.require_subject().map_err(io::Error::other)?;
            let limits = QuotaLimits {
                daily_token_limit: args.daily_tokens,
                daily_message_limit: args.daily_messages,
                monthly_budget: args.monthly_budget,
            };
            quota.set_limits(subject, limits)?;
            print_json(&limits)
        }
        QuotaCommand::Clear => {
            let subject = args.require_subject().map_err(io::Error::other)?;
            quota.clear_limits(subject)?;
            print_json(&serde_json::json!({ "cleared": subject }))
        }
        QuotaCommand::List => print_json(&quota.list_limits()?),
        QuotaCommand::State => {
            let subject = args.require_subject().map_err(io::Error::other)?;
            print_json(&quota.states(subject)?)
        }
        QuotaCommand::Purge => {
            let removed = quota.purge(today)?;
            print_json(&serde_json::json!({ "removed": removed }))
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct RecordSummary {
    recorded: usize,
    duplicates: usize,
    rejected: Vec<String>,
}

fn record_stdin(app_state: &AppState) -> Result<RecordSummary, AppError> {
    let mut summary = RecordSummary::default();
    for (index, line) in io::stdin().lock().lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let raw = match serde_json::from_str::<RawUsageEvent>(&line) {
            Ok(raw) => raw,
            Err(err) => {
                summary.rejected.push(format!("line {}: {}", index + 1, err));
                continue;
            }
        };
        match app_state.services.ingest.record(raw) {
            Ok(Some(_)) => summary.recorded += 1,
            Ok(None) => summary.duplicates += 1,
            Err(err @ (AppError::Malformed(_) | AppError::InvalidInput(_))) => {
                summary.rejected.push(format!("line {}: {}", index + 1, err));
            }
            Err(err) => return Err(err),
        }
    }
    Ok(summary)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
