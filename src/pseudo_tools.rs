//! Tool invocations embedded in assistant text.
//!
//! Models without structured tool calling emit blocks like:
//!
//! ```text
//! [[action write_file]]
//! path="notes/todo.md"
//! mode="append"
//!
//! - buy milk
//! [[/action]]
//! ```
//!
//! Markers are case-insensitive and must sit on their own line; leading and
//! trailing whitespace on marker and attribute lines is ignored. Attribute
//! values are double-quoted and understand `\"`, `\\`, `\n` and `\t`. The
//! first line that is not an attribute (or a single blank line) starts the
//! body, which runs up to the closing marker.
//!
//! Large bodies can be emitted once as a named block and referenced later:
//!
//! ```text
//! [[content draft]]
//! ...
//! [[/content]]
//!
//! [[action write_file]]
//! path="draft.md"
//!
//! [[use draft]]
//! [[/action]]
//! ```
//!
//! A reference resolves against blocks defined earlier in the same message
//! or in earlier assistant turns; the latest definition of a label wins.
//! Unterminated blocks are ignored.

use serde_json::{Map, Value};
use std::collections::HashMap;

/// One parsed action block.
#[derive(Debug, Clone, PartialEq)]
pub struct PseudoCall {
    /// Synthetic call id, unique per invocation
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
    pub content: Option<String>,
    /// Set when the block cannot be run as written, e.g. an unknown
    /// content reference or a malformed attribute line
    pub error: Option<String>,
}

/// Named content blocks by lowercased label.
pub type NamedContent = HashMap<String, String>;

#[derive(Debug, PartialEq, Eq)]
enum Marker<'a> {
    OpenAction(&'a str),
    CloseAction,
    OpenContent(&'a str),
    CloseContent,
    Use(&'a str),
}

fn marker(line: &str) -> Option<Marker<'_>> {
    let inner = line.trim().strip_prefix("[[")?.strip_suffix("]]")?.trim();
    let (word, rest) = match inner.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (inner, ""),
    };
    match (word.to_ascii_lowercase().as_str(), rest.is_empty()) {
        ("action", false) => Some(Marker::OpenAction(rest)),
        ("/action", true) => Some(Marker::CloseAction),
        ("content", false) => Some(Marker::OpenContent(rest)),
        ("/content", true) => Some(Marker::CloseContent),
        ("use", false) => Some(Marker::Use(rest)),
        _ => None,
    }
}

fn label_key(label: &str) -> String {
    label.trim().to_lowercase()
}

fn synthetic_id() -> String {
    format!("pseudo_{}", uuid::Uuid::new_v4().simple())
}

/// Parse `key="value"` pairs from one line.
///
/// Returns `None` when the line is not an attribute line at all, and
/// `Some(Err)` when it starts like one but is malformed.
fn attributes(line: &str) -> Option<Result<Vec<(String, String)>, String>> {
    let trimmed = line.trim();
    let key_len = trimmed
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(trimmed.len());
    let starts_like_attr = key_len > 0
        && trimmed
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && trimmed[key_len..].trim_start().starts_with("=\"");
    if !starts_like_attr {
        return None;
    }

    let mut pairs = Vec::new();
    let mut rest = trimmed;
    while !rest.is_empty() {
        let Some((key, after_eq)) = rest.split_once('=') else {
            return Some(Err(format!("expected key=\"value\" in `{trimmed}`")));
        };
        let key = key.trim();
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Some(Err(format!("invalid attribute name in `{trimmed}`")));
        }
        let Some(quoted) = after_eq.trim_start().strip_prefix('"') else {
            return Some(Err(format!("attribute `{key}` must be double-quoted")));
        };

        let mut value = String::new();
        let mut chars = quoted.char_indices();
        let mut end = None;
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    end = Some(i + 1);
                    break;
                }
                '\\' => match chars.next().map(|(_, e)| e) {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(other) => value.push(other),
                    None => {}
                },
                other => value.push(other),
            }
        }
        let Some(end) = end else {
            return Some(Err(format!("unterminated value for `{key}`")));
        };
        pairs.push((key.to_string(), value));
        rest = quoted[end..].trim_start();
    }
    Some(Ok(pairs))
}

/// Content blocks defined in `text`, in order of appearance.
#[must_use]
pub fn content_blocks(text: &str) -> Vec<(String, String)> {
    let mut blocks = Vec::new();
    let mut open: Option<(&str, Vec<&str>)> = None;
    for line in text.lines() {
        let m = marker(line);
        if let Some((label, body)) = open.as_mut() {
            if m == Some(Marker::CloseContent) {
                blocks.push((label_key(label), body.join("\n")));
                open = None;
            } else {
                body.push(line);
            }
        } else if let Some(Marker::OpenContent(label)) = m {
            open = Some((label, Vec::new()));
        }
    }
    blocks
}

/// Named content from earlier texts; later definitions replace earlier ones.
pub fn named_content<'a>(texts: impl IntoIterator<Item = &'a str>) -> NamedContent {
    let mut named = NamedContent::new();
    for text in texts {
        named.extend(content_blocks(text));
    }
    named
}

enum State<'a> {
    Text,
    Content {
        label: &'a str,
        body: Vec<&'a str>,
    },
    Action {
        name: &'a str,
        arguments: Map<String, Value>,
        in_body: bool,
        body: Vec<&'a str>,
        error: Option<String>,
    },
}

/// Extract action blocks from `text` in order of appearance.
///
/// `known` holds content from earlier turns for `[[use LABEL]]` bodies.
#[must_use]
pub fn parse(text: &str, known: &NamedContent) -> Vec<PseudoCall> {
    let mut named = known.clone();
    let mut calls = Vec::new();
    let mut state = State::Text;

    for line in text.lines() {
        let m = marker(line);
        state = match state {
            State::Text => match m {
                Some(Marker::OpenAction(name)) => State::Action {
                    name,
                    arguments: Map::new(),
                    in_body: false,
                    body: Vec::new(),
                    error: None,
                },
                Some(Marker::OpenContent(label)) => State::Content {
                    label,
                    body: Vec::new(),
                },
                _ => State::Text,
            },
            State::Content { label, mut body } => {
                if m == Some(Marker::CloseContent) {
                    named.insert(label_key(label), body.join("\n"));
                    State::Text
                } else {
                    body.push(line);
                    State::Content { label, body }
                }
            }
            State::Action {
                name,
                mut arguments,
                mut in_body,
                mut body,
                mut error,
            } => {
                if m == Some(Marker::CloseAction) {
                    calls.push(finish(name, arguments, &body, error, &named));
                    State::Text
                } else {
                    if in_body {
                        body.push(line);
                    } else if line.trim().is_empty() {
                        in_body = true;
                    } else {
                        match attributes(line) {
                            Some(Ok(pairs)) => {
                                for (key, value) in pairs {
                                    arguments.insert(key, Value::String(value));
                                }
                            }
                            Some(Err(message)) => {
                                error.get_or_insert(message);
                            }
                            None => {
                                in_body = true;
                                body.push(line);
                            }
                        }
                    }
                    State::Action {
                        name,
                        arguments,
                        in_body,
                        body,
                        error,
                    }
                }
            }
        };
    }

    match state {
        State::Action { name, .. } => {
            log::warn!("Ignoring unterminated pseudo-tool block action={name}");
        }
        State::Content { label, .. } => {
            log::warn!("Ignoring unterminated content block label={label}");
        }
        State::Text => {}
    }

    calls
}

fn finish(
    name: &str,
    arguments: Map<String, Value>,
    body: &[&str],
    mut error: Option<String>,
    named: &NamedContent,
) -> PseudoCall {
    let meaningful: Vec<&str> = body
        .iter()
        .copied()
        .filter(|l| !l.trim().is_empty())
        .collect();

    let content = match meaningful.as_slice() {
        [] => None,
        [single] => match marker(single) {
            Some(Marker::Use(label)) => {
                let resolved = named.get(&label_key(label)).cloned();
                if resolved.is_none() {
                    error.get_or_insert(format!("unknown content block '{}'", label.trim()));
                }
                resolved
            }
            _ => Some(body.join("\n")),
        },
        _ => Some(body.join("\n")),
    };

    PseudoCall {
        id: synthetic_id(),
        name: name.trim().to_string(),
        arguments,
        content,
        error,
    }
}
