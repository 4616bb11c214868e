//! Templated-string evaluation against a per-document variable context
//! (component B).

mod eval;
mod tokenizer;

pub use eval::{evaluate, EvalError, VariableContext};

/// Names reserved for built-in variables. Zone names and field
/// names configured on a hotfolder must not collide with any of these —
/// enforced at config-load time by [`crate::config::model::HotfolderConfig::validate`].
pub const BUILTIN_VARIABLES: &[&str] = &[
    "FileName",
    "FileExtension",
    "FilePath",
    "FullFileName",
    "FileSize",
    "FileSizeMB",
    "Date",
    "DateDE",
    "DateISO",
    "Time",
    "TimeShort",
    "DateTime",
    "DateTimeISO",
    "Year",
    "Month",
    "MonthName",
    "Day",
    "Hour",
    "Minute",
    "Second",
    "Weekday",
    "WeekdayShort",
    "WeekNumber",
    "Timestamp",
    "InputPath",
    "OCR_FullText",
    "level0",
    "level1",
    "level2",
    "level3",
    "level4",
    "level5",
];

/// `true` if `name` is reserved for a built-in variable.
pub fn is_builtin_name(name: &str) -> bool {
    BUILTIN_VARIABLES.contains(&name)
}
