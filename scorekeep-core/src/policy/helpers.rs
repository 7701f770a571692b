//! Host functions exposed to policies.
//!
//! Dates travel through policies as strings, so these helpers do the
//! parsing and arithmetic the interpreter cannot.

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use rhai::{Engine, EvalAltResult, FLOAT, INT, Position};
use scorekeep_model::dates;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

type HelperResult<T> = Result<T, Box<EvalAltResult>>;

pub(crate) fn register(engine: &mut Engine) {
    engine.register_fn("parse_date", parse_date);
    engine.register_fn("format_date", format_date);
    engine.register_fn("days_between", days_between);
    engine.register_fn("add_days", add_days);
    engine.register_fn("add_days", |date: &str, days: INT| {
        add_days(date, days as FLOAT)
    });
}

fn parse(raw: &str) -> HelperResult<DateTime<Utc>> {
    dates::parse_flexible(raw)
        .ok_or_else(|| runtime_error(format!("invalid date '{raw}'")))
}

fn render(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Date string to epoch milliseconds.
fn parse_date(raw: &str) -> HelperResult<INT> {
    parse(raw).map(|date| date.timestamp_millis())
}

/// Epoch milliseconds to an RFC 3339 string.
fn format_date(millis: INT) -> HelperResult<String> {
    dates::from_epoch_millis(millis)
        .map(render)
        .ok_or_else(|| runtime_error(format!("timestamp {millis} out of range")))
}

/// Fractional days from `from` to `to`; negative when `to` is earlier.
fn days_between(from: &str, to: &str) -> HelperResult<FLOAT> {
    let from = parse(from)?;
    let to = parse(to)?;
    Ok((to - from).num_milliseconds() as FLOAT / MILLIS_PER_DAY)
}

fn add_days(date: &str, days: FLOAT) -> HelperResult<String> {
    let date = parse(date)?;
    if !days.is_finite() {
        return Err(runtime_error(format!("cannot add {days} days")));
    }
    TimeDelta::try_milliseconds((days * MILLIS_PER_DAY).round() as i64)
        .and_then(|delta| date.checked_add_signed(delta))
        .map(render)
        .ok_or_else(|| runtime_error(format!("cannot add {days} days")))
}

fn runtime_error(message: impl Into<String>) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(message.into().into(), Position::NONE).into()
}
