//! Tokenizer for the `<Name>` / `<Func(arg, arg, ...)>` template syntax.
//!
//! A small hand-written recursive-descent parser over a flat token stream,
//! in the spirit of the `once_cell::Lazy<Regex>` structural-rule style this
//! crate's postprocessing pipeline uses elsewhere: regex finds the
//! `<...>` spans, a tiny recursive parser handles nesting and quoting
//! inside them.

use once_cell::sync::Lazy;
use regex::Regex;

/// One parsed piece of a template string.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Variable(String),
    Call { name: String, args: Vec<Arg> },
}

/// One argument to a function call: either a nested reference or a bare
/// (possibly quoted) literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Segment(Segment),
    Literal(String),
}

/// Matches the outermost `<...>` span; nested angle brackets inside a call's
/// arguments are handled by the recursive parser below, not by this regex.
static TOP_LEVEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([^<>]*(?:<[^<>]*>[^<>]*)*)>").unwrap());

/// Split `template` into literal text and `<...>` reference segments.
pub fn parse_template(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut last_end = 0;

    for m in TOP_LEVEL.find_iter(template) {
        if m.start() > last_end {
            segments.push(Segment::Literal(template[last_end..m.start()].to_string()));
        }
        let inner = &template[m.start() + 1..m.end() - 1];
        segments.push(parse_reference(inner));
        last_end = m.end();
    }
    if last_end < template.len() {
        segments.push(Segment::Literal(template[last_end..].to_string()));
    }
    segments
}

/// Parse the content between `<` and `>`: either a bare variable name or a
/// `Name(arg, arg, ...)` call.
fn parse_reference(inner: &str) -> Segment {
    let trimmed = inner.trim();
    match trimmed.find('(') {
        Some(open) if trimmed.ends_with(')') => {
            let name = trimmed[..open].trim().to_string();
            let args_str = &trimmed[open + 1..trimmed.len() - 1];
            let args = split_args(args_str).into_iter().map(parse_arg).collect();
            Segment::Call { name, args }
        }
        _ => Segment::Variable(trimmed.to_string()),
    }
}

fn parse_arg(raw: &str) -> Arg {
    let trimmed = raw.trim();
    if let Some(stripped) = trimmed
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
    {
        return Arg::Literal(stripped.to_string());
    }
    if trimmed.starts_with('<') && trimmed.ends_with('>') && trimmed.len() >= 2 {
        return Arg::Segment(parse_reference(&trimmed[1..trimmed.len() - 1]));
    }
    // A bare `Name(...)` argument (no enclosing `<...>`) is still a nested
    // call — `<UPPER(SUBSTR(<FileName>,0,4))>`'s inner argument arrives here
    // as `SUBSTR(<FileName>,0,4)`, never wrapped in its own angle brackets.
    if let Some(open) = trimmed.find('(') {
        if open > 0 && trimmed.ends_with(')') {
            return Arg::Segment(parse_reference(trimmed));
        }
    }
    Arg::Literal(trimmed.to_string())
}

/// Split a comma-separated argument list, respecting nested `(...)`,
/// `<...>`, and `'...'` quoting so commas inside them don't split early.
fn split_args(s: &str) -> Vec<String> {
    if s.trim().is_empty() {
        return Vec::new();
    }

    let mut args = Vec::new();
    let mut depth_paren = 0i32;
    let mut depth_angle = 0i32;
    let mut in_quote = false;
    let mut current = String::new();

    for c in s.chars() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                current.push(c);
            }
            '(' if !in_quote => {
                depth_paren += 1;
                current.push(c);
            }
            ')' if !in_quote => {
                depth_paren -= 1;
                current.push(c);
            }
            '<' if !in_quote => {
                depth_angle += 1;
                current.push(c);
            }
            '>' if !in_quote => {
                depth_angle -= 1;
                current.push(c);
            }
            ',' if !in_quote && depth_paren == 0 && depth_angle == 0 => {
                args.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    args.push(current);
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literal_only() {
        let segs = parse_template("plain text");
        assert_eq!(segs, vec![Segment::Literal("plain text".to_string())]);
    }

    #[test]
    fn parses_single_variable() {
        let segs = parse_template("<FileName>");
        assert_eq!(segs, vec![Segment::Variable("FileName".to_string())]);
    }

    #[test]
    fn parses_mixed_literal_and_variable() {
        let segs = parse_template("invoice_<FileName>.pdf");
        assert_eq!(
            segs,
            vec![
                Segment::Literal("invoice_".to_string()),
                Segment::Variable("FileName".to_string()),
                Segment::Literal(".pdf".to_string()),
            ]
        );
    }

    #[test]
    fn parses_call_with_literal_args() {
        let segs = parse_template("<SUBSTR(<FileName>,0,4)>");
        assert_eq!(
            segs,
            vec![Segment::Call {
                name: "SUBSTR".to_string(),
                args: vec![
                    Arg::Segment(Segment::Variable("FileName".to_string())),
                    Arg::Literal("0".to_string()),
                    Arg::Literal("4".to_string()),
                ],
            }]
        );
    }

    #[test]
    fn parses_nested_calls() {
        let segs = parse_template("<UPPER(SUBSTR(<FileName>,0,4))>");
        assert_eq!(
            segs,
            vec![Segment::Call {
                name: "UPPER".to_string(),
                args: vec![Arg::Segment(Segment::Call {
                    name: "SUBSTR".to_string(),
                    args: vec![
                        Arg::Segment(Segment::Variable("FileName".to_string())),
                        Arg::Literal("0".to_string()),
                        Arg::Literal("4".to_string()),
                    ],
                })],
            }]
        );
    }

    #[test]
    fn parses_quoted_literal_with_comma() {
        let segs = parse_template("<REPLACE(<FileName>,'a,b','c')>");
        assert_eq!(
            segs,
            vec![Segment::Call {
                name: "REPLACE".to_string(),
                args: vec![
                    Arg::Segment(Segment::Variable("FileName".to_string())),
                    Arg::Literal("a,b".to_string()),
                    Arg::Literal("c".to_string()),
                ],
            }]
        );
    }
}
