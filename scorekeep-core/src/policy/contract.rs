//! The output contract every policy must satisfy.
//!
//! Each field is checked independently so a policy author sees every
//! problem at once rather than one per round trip.

use chrono::{DateTime, Utc};
use scorekeep_model::{
    AppliedExtensionStatus, PolicyResult, SubmissionStatus, dates,
};
use serde_json::{Map, Value};

pub const RESULT_MISSING: &str = "result object was not produced by policy! Ensure that you are returning correctly";

const DATE_FORMATS_HINT: &str =
    "an RFC 3339 timestamp, a YYYY-MM-DD date, or epoch milliseconds";

/// Checks raw policy output and, when every field holds, returns it typed.
pub fn validate_policy_output(
    output: &Value,
) -> Result<PolicyResult, Vec<String>> {
    let fields = match output {
        Value::Null => return Err(vec![RESULT_MISSING.to_string()]),
        Value::Object(fields) => fields,
        other => {
            return Err(vec![format!(
                "policy must return an object map! Received: {}",
                type_name(other)
            )]);
        }
    };

    let mut errors = Vec::new();

    let final_score = required_number(fields, "finalScore", &mut errors);
    let adjusted_submission_date =
        required_date(fields, "adjustedSubmissionDate", &mut errors);
    let adjusted_days_late =
        required_number(fields, "adjustedDaysLate", &mut errors);
    let submission_status = required_enum(
        fields,
        "submissionStatus",
        SubmissionStatus::parse,
        &SubmissionStatus::ALL.map(|status| status.as_str()),
        &mut errors,
    );
    let extension_status = required_enum(
        fields,
        "extensionStatus",
        AppliedExtensionStatus::parse,
        &AppliedExtensionStatus::ALL.map(|status| status.as_str()),
        &mut errors,
    );
    let extension_message =
        optional_string(fields, "extensionMessage", &mut errors);
    let submission_message =
        optional_string(fields, "submissionMessage", &mut errors);
    let number_extension_days_applied =
        optional_number(fields, "numberExtensionDaysApplied", &mut errors);

    match (
        final_score,
        adjusted_submission_date,
        adjusted_days_late,
        submission_status,
        extension_status,
    ) {
        (
            Some(final_score),
            Some(adjusted_submission_date),
            Some(adjusted_days_late),
            Some(submission_status),
            Some(extension_status),
        ) if errors.is_empty() => Ok(PolicyResult {
            final_score,
            adjusted_submission_date,
            adjusted_days_late,
            submission_status,
            extension_status,
            extension_message,
            submission_message,
            number_extension_days_applied,
        }),
        _ => Err(errors),
    }
}

fn present<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    fields.get(name).filter(|value| !value.is_null())
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|parsed| parsed.is_finite()),
        _ => None,
    }
}

fn required_number(
    fields: &Map<String, Value>,
    name: &str,
    errors: &mut Vec<String>,
) -> Option<f64> {
    let Some(value) = present(fields, name) else {
        errors.push(format!("{name} was not set by policy!"));
        return None;
    };
    let number = as_number(value);
    if number.is_none() {
        errors.push(format!(
            "{name} was not a number! Received: {}!",
            display(value)
        ));
    }
    number
}

fn optional_number(
    fields: &Map<String, Value>,
    name: &str,
    errors: &mut Vec<String>,
) -> Option<f64> {
    let value = present(fields, name)?;
    let number = as_number(value);
    if number.is_none() {
        errors.push(format!(
            "{name} was not a number! Received: {}!",
            display(value)
        ));
    }
    number
}

fn required_date(
    fields: &Map<String, Value>,
    name: &str,
    errors: &mut Vec<String>,
) -> Option<DateTime<Utc>> {
    let Some(value) = present(fields, name) else {
        errors.push(format!("{name} was not set by policy!"));
        return None;
    };
    let date = dates::parse_value(value);
    if date.is_none() {
        errors.push(format!(
            "{name} was not a valid date! Received: {}. Expected {DATE_FORMATS_HINT}",
            display(value)
        ));
    }
    date
}

fn required_enum<T>(
    fields: &Map<String, Value>,
    name: &str,
    parse: fn(&str) -> Option<T>,
    allowed: &[&str],
    errors: &mut Vec<String>,
) -> Option<T> {
    let Some(value) = present(fields, name) else {
        errors.push(format!("{name} was not set by policy!"));
        return None;
    };
    let parsed = value.as_str().and_then(parse);
    if parsed.is_none() {
        errors.push(format!(
            "Invalid {name}! Received: {}. Expected one of: {}",
            display(value),
            allowed.join(", ")
        ));
    }
    parsed
}

fn optional_string(
    fields: &Map<String, Value>,
    name: &str,
    errors: &mut Vec<String>,
) -> Option<String> {
    match present(fields, name)? {
        Value::String(text) => Some(text.clone()),
        other => {
            errors.push(format!(
                "{name} was not a string! Received: {}!",
                display(other)
            ));
            None
        }
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
