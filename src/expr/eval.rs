//! Evaluates parsed template segments against a [`VariableContext`]
//!.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Local, Timelike};
use thiserror::Error;
use tracing::warn;

use super::tokenizer::{parse_template, Arg, Segment};
use crate::counters::CounterStore;

/// The name→string map an expression is evaluated against. Built once per
/// pipeline execution and threaded explicitly through every evaluation call
/// (no back-reference, pass the context).
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    values: HashMap<String, String>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|s| s.as_str())
    }

    /// Populate the date/time built-ins (`Date`, `DateISO`, `Year`, ...)
    /// from `now`. Called once when a context is built for a pipeline
    /// execution.
    pub fn set_datetime_builtins(&mut self, now: DateTime<Local>) {
        self.set("Date", now.format("%d.%m.%Y").to_string());
        self.set("DateDE", now.format("%d.%m.%Y").to_string());
        self.set("DateISO", now.format("%Y-%m-%d").to_string());
        self.set("Time", now.format("%H:%M:%S").to_string());
        self.set("TimeShort", now.format("%H:%M").to_string());
        self.set("DateTime", now.format("%d.%m.%Y %H:%M:%S").to_string());
        self.set("DateTimeISO", now.format("%Y-%m-%dT%H:%M:%S").to_string());
        self.set("Year", now.year().to_string());
        self.set("Month", format!("{:02}", now.month()));
        self.set("MonthName", now.format("%B").to_string());
        self.set("Day", format!("{:02}", now.day()));
        self.set("Hour", format!("{:02}", now.hour()));
        self.set("Minute", format!("{:02}", now.minute()));
        self.set("Second", format!("{:02}", now.second()));
        self.set("Weekday", now.format("%A").to_string());
        self.set("WeekdayShort", now.format("%a").to_string());
        self.set("WeekNumber", format!("{:02}", now.iso_week().week()));
        self.set("Timestamp", now.timestamp().to_string());
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("function '{name}' expects {expected} argument(s), got {got}")]
    ArityMismatch {
        name: String,
        expected: &'static str,
        got: usize,
    },
    #[error("invalid argument to '{name}': {message}")]
    InvalidArgument { name: String, message: String },
}

/// Evaluate `template` against `ctx`.
///
/// Unknown variables evaluate to an empty string with a logged warning;
/// unknown functions are a hard evaluation error.
/// `counters` is optional: a `COUNTER(...)` call with no store available
/// evaluates to an evaluation error rather than silently returning empty,
/// since it would otherwise violate the monotonic-numbering guarantee.
pub fn evaluate(
    template: &str,
    ctx: &VariableContext,
    counters: Option<&CounterStore>,
) -> Result<String, EvalError> {
    let segments = parse_template(template);
    let mut out = String::new();
    for segment in segments {
        out.push_str(&eval_segment(&segment, ctx, counters)?);
    }
    Ok(out)
}

fn eval_segment(
    segment: &Segment,
    ctx: &VariableContext,
    counters: Option<&CounterStore>,
) -> Result<String, EvalError> {
    match segment {
        Segment::Literal(s) => Ok(s.clone()),
        Segment::Variable(name) => Ok(lookup_variable(name, ctx)),
        Segment::Call { name, args } => eval_call(name, args, ctx, counters),
    }
}

fn lookup_variable(name: &str, ctx: &VariableContext) -> String {
    match ctx.get(name) {
        Some(v) => v.to_string(),
        None => {
            warn!("unknown variable '{name}' evaluated to empty string");
            String::new()
        }
    }
}

fn eval_arg(arg: &Arg, ctx: &VariableContext, counters: Option<&CounterStore>) -> Result<String, EvalError> {
    match arg {
        Arg::Literal(s) => Ok(s.clone()),
        Arg::Segment(seg) => eval_segment(seg, ctx, counters),
    }
}

fn eval_call(
    name: &str,
    args: &[Arg],
    ctx: &VariableContext,
    counters: Option<&CounterStore>,
) -> Result<String, EvalError> {
    let values: Result<Vec<String>, EvalError> =
        args.iter().map(|a| eval_arg(a, ctx, counters)).collect();
    let values = values?;

    match name {
        "COUNTER" => eval_counter(&values, counters),
        "FORMAT_DATE" => eval_format_date(&values),
        "UPPER" => arity1(name, &values).map(|s| s.to_uppercase()),
        "LOWER" => arity1(name, &values).map(|s| s.to_lowercase()),
        "TRIM" => arity1(name, &values).map(|s| s.trim().to_string()),
        "REPLACE" => eval_replace(name, &values),
        "SUBSTR" => eval_substr(name, &values),
        "IF" => eval_if(name, &values),
        other => Err(EvalError::UnknownFunction(other.to_string())),
    }
}

fn arity1(name: &str, values: &[String]) -> Result<&str, EvalError> {
    match values {
        [v] => Ok(v.as_str()),
        _ => Err(EvalError::ArityMismatch {
            name: name.to_string(),
            expected: "1",
            got: values.len(),
        }),
    }
}

fn eval_counter(values: &[String], counters: Option<&CounterStore>) -> Result<String, EvalError> {
    if values.is_empty() || values.len() > 3 {
        return Err(EvalError::ArityMismatch {
            name: "COUNTER".to_string(),
            expected: "1-3",
            got: values.len(),
        });
    }
    let name = &values[0];
    let start = values
        .get(1)
        .map(|s| parse_i64("COUNTER", s))
        .transpose()?
        .unwrap_or(1);
    let step = values
        .get(2)
        .map(|s| parse_i64("COUNTER", s))
        .transpose()?
        .unwrap_or(1);

    let store = counters.ok_or_else(|| EvalError::InvalidArgument {
        name: "COUNTER".to_string(),
        message: "no counter store available in this evaluation context".to_string(),
    })?;
    Ok(store.get_and_increment(name, start, step).to_string())
}

fn parse_i64(fn_name: &str, s: &str) -> Result<i64, EvalError> {
    s.trim().parse::<i64>().map_err(|_| EvalError::InvalidArgument {
        name: fn_name.to_string(),
        message: format!("'{s}' is not an integer"),
    })
}

fn eval_format_date(values: &[String]) -> Result<String, EvalError> {
    let [value, pattern] = values else {
        return Err(EvalError::ArityMismatch {
            name: "FORMAT_DATE".to_string(),
            expected: "2",
            got: values.len(),
        });
    };
    let invalid = || EvalError::InvalidArgument {
        name: "FORMAT_DATE".to_string(),
        message: format!("'{value}' is not a recognised date/time"),
    };

    let parsed = match DateTime::parse_from_rfc3339(value) {
        Ok(dt) => dt.with_timezone(&Local),
        Err(_) => {
            let naive = chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").map_err(|_| invalid())?;
            // `and_local_timezone` returns a `LocalResult`, not a plain value:
            // the naive time may fall in a DST spring-forward gap (`None`) or
            // a fall-back fold (`Ambiguous`). Either case fails the
            // evaluation rather than guessing an offset.
            match naive.and_local_timezone(Local) {
                chrono::LocalResult::Single(dt) => dt,
                chrono::LocalResult::Ambiguous(_, _) | chrono::LocalResult::None => return Err(invalid()),
            }
        }
    };
    Ok(parsed.format(strftime_from_pattern(pattern).as_str()).to_string())
}

/// Translate a small set of common date-pattern tokens (`YYYY`, `MM`, `DD`,
/// `HH`, `mm`, `ss`) to `strftime` specifiers, since config authors write
/// patterns in the spreadsheet-style convention rather than `strftime`.
fn strftime_from_pattern(pattern: &str) -> String {
    pattern
        .replace("YYYY", "%Y")
        .replace("MM", "%m")
        .replace("DD", "%d")
        .replace("HH", "%H")
        .replace("mm", "%M")
        .replace("ss", "%S")
}

fn eval_replace(name: &str, values: &[String]) -> Result<String, EvalError> {
    let [src, from, to] = values else {
        return Err(EvalError::ArityMismatch {
            name: name.to_string(),
            expected: "3",
            got: values.len(),
        });
    };
    Ok(src.replace(from.as_str(), to))
}

fn eval_substr(name: &str, values: &[String]) -> Result<String, EvalError> {
    let [src, start, length] = values else {
        return Err(EvalError::ArityMismatch {
            name: name.to_string(),
            expected: "3",
            got: values.len(),
        });
    };
    let start: usize = start.trim().parse().map_err(|_| EvalError::InvalidArgument {
        name: name.to_string(),
        message: format!("'{start}' is not a non-negative integer"),
    })?;
    let length: usize = length.trim().parse().map_err(|_| EvalError::InvalidArgument {
        name: name.to_string(),
        message: format!("'{length}' is not a non-negative integer"),
    })?;

    let chars: Vec<char> = src.chars().collect();
    if start >= chars.len() {
        return Ok(String::new());
    }
    let end = (start + length).min(chars.len());
    Ok(chars[start..end].iter().collect())
}

fn eval_if(name: &str, values: &[String]) -> Result<String, EvalError> {
    let [cond, then, otherwise] = values else {
        return Err(EvalError::ArityMismatch {
            name: name.to_string(),
            expected: "3",
            got: values.len(),
        });
    };
    let truthy = !cond.trim().is_empty() && cond.trim() != "0" && !cond.eq_ignore_ascii_case("false");
    Ok(if truthy { then.clone() } else { otherwise.clone() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(pairs: &[(&str, &str)]) -> VariableContext {
        let mut ctx = VariableContext::new();
        for (k, v) in pairs {
            ctx.set(*k, *v);
        }
        ctx
    }

    #[test]
    fn evaluates_plain_variable() {
        let ctx = ctx_with(&[("FileName", "invoice")]);
        assert_eq!(evaluate("<FileName>", &ctx, None).unwrap(), "invoice");
    }

    #[test]
    fn unknown_variable_becomes_empty_string() {
        let ctx = VariableContext::new();
        assert_eq!(evaluate("<Nope>", &ctx, None).unwrap(), "");
    }

    #[test]
    fn unknown_function_is_an_error() {
        let ctx = VariableContext::new();
        let err = evaluate("<NOPE(1)>", &ctx, None).unwrap_err();
        assert_eq!(err, EvalError::UnknownFunction("NOPE".to_string()));
    }

    #[test]
    fn upper_lower_trim() {
        let ctx = ctx_with(&[("FileName", " Invoice ")]);
        assert_eq!(evaluate("<UPPER(<FileName>)>", &ctx, None).unwrap(), " INVOICE ");
        assert_eq!(evaluate("<TRIM(<FileName>)>", &ctx, None).unwrap(), "Invoice");
        assert_eq!(
            evaluate("<LOWER(<TRIM(<FileName>)>)>", &ctx, None).unwrap(),
            "invoice"
        );
    }

    #[test]
    fn substr_extracts_range() {
        let ctx = ctx_with(&[("FileName", "invoice_2024")]);
        assert_eq!(evaluate("<SUBSTR(<FileName>,0,4)>", &ctx, None).unwrap(), "invo");
        assert_eq!(
            evaluate("<SUBSTR(<FileName>,8,4)>", &ctx, None).unwrap(),
            "2024"
        );
        assert_eq!(
            evaluate("<SUBSTR(<FileName>,100,4)>", &ctx, None).unwrap(),
            ""
        );
    }

    #[test]
    fn replace_substitutes_all_occurrences() {
        let ctx = ctx_with(&[("FileName", "a,b,c")]);
        assert_eq!(
            evaluate("<REPLACE(<FileName>,',','-')>", &ctx, None).unwrap(),
            "a-b-c"
        );
    }

    #[test]
    fn if_picks_branch_by_truthiness() {
        let ctx = VariableContext::new();
        assert_eq!(
            evaluate("<IF('1','yes','no')>", &ctx, None).unwrap(),
            "yes"
        );
        assert_eq!(
            evaluate("<IF('','yes','no')>", &ctx, None).unwrap(),
            "no"
        );
    }

    #[test]
    fn counter_without_store_is_an_error() {
        let ctx = VariableContext::new();
        let err = evaluate("<COUNTER(invoice,1,1)>", &ctx, None).unwrap_err();
        assert!(matches!(err, EvalError::InvalidArgument { .. }));
    }

    #[test]
    fn counter_with_store_increments() {
        let dir = tempfile::tempdir().unwrap();
        let store = CounterStore::open(dir.path().join("counters.json"));
        let ctx = VariableContext::new();

        assert_eq!(
            evaluate("<COUNTER(invoice,1,1)>", &ctx, Some(&store)).unwrap(),
            "1"
        );
        assert_eq!(
            evaluate("<COUNTER(invoice,1,1)>", &ctx, Some(&store)).unwrap(),
            "2"
        );
    }

    #[test]
    fn mixed_literal_and_variable_template() {
        let ctx = ctx_with(&[("FileName", "invoice"), ("Year", "2026")]);
        assert_eq!(
            evaluate("<Year>/<FileName>.pdf", &ctx, None).unwrap(),
            "2026/invoice.pdf"
        );
    }
}
