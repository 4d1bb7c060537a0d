//! Markdown with a YAML frontmatter block.
//!
//! ```text
//! ---
//! title: Reading list
//! createdAt: 2024-05-01T10:00:00.000Z
//! updatedAt: 2024-05-01T10:00:00.000Z
//! sourceUrl: https://example.com
//! tags:
//!   - books
//! ---
//!
//! <content>
//! ```
//!
//! `sourceUrl` and `tags` are only written when present. The timestamps are informational:
//! a parsed note always gets a fresh id and fresh timestamps.

use chrono::SecondsFormat;
use serde_yaml::{Mapping, Value};
use std::fmt::Write;

use crate::models::{normalize_tags, Note};

const DELIMITER: &str = "---";

/// Outcome of reading one Markdown document.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkdownParse {
    Parsed(Note),
    /// Usable note, but part of the frontmatter had to be ignored.
    Partial { note: Note, warnings: Vec<String> },
    /// Nothing worth importing: no title and no content.
    Rejected(String),
}

impl MarkdownParse {
    pub fn note(&self) -> Option<&Note> {
        match self {
            MarkdownParse::Parsed(note) | MarkdownParse::Partial { note, .. } => Some(note),
            MarkdownParse::Rejected(_) => None,
        }
    }

    pub fn into_note(self) -> Option<Note> {
        match self {
            MarkdownParse::Parsed(note) | MarkdownParse::Partial { note, .. } => Some(note),
            MarkdownParse::Rejected(_) => None,
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            MarkdownParse::Partial { warnings, .. } => warnings,
            _ => &[],
        }
    }
}

pub fn note_to_markdown(note: &Note) -> String {
    let mut out = String::new();
    out.push_str(DELIMITER);
    out.push('\n');
    out.push_str(&format!("title: {}\n", yaml_scalar(&note.title)));
    out.push_str(&format!(
        "createdAt: {}\n",
        note.created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    ));
    out.push_str(&format!(
        "updatedAt: {}\n",
        note.updated_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    ));
    if let Some(url) = note.source_url.as_deref().filter(|u| !u.is_empty()) {
        out.push_str(&format!("sourceUrl: {}\n", yaml_scalar(url)));
    }
    if !note.tags.is_empty() {
        out.push_str("tags:\n");
        for tag in &note.tags {
            out.push_str(&format!("  - {}\n", yaml_scalar(tag)));
        }
    }
    out.push_str(DELIMITER);
    out.push_str("\n\n");
    out.push_str(&note.content);
    out
}

/// Reads a Markdown document. `fallback_title` (usually the file stem) is used when the
/// document has no usable `title`.
pub fn markdown_to_note(text: &str, fallback_title: &str) -> MarkdownParse {
    let mut warnings = Vec::new();
    let mut title: Option<String> = None;
    let mut source_url: Option<String> = None;
    let mut tags: Vec<String> = Vec::new();

    let content = match split_frontmatter(text) {
        None => text,
        Some((block, body)) => {
            match serde_yaml::from_str::<Value>(block) {
                Ok(Value::Mapping(fields)) => {
                    title = string_field(&fields, "title", &mut warnings);
                    source_url = string_field(&fields, "sourceUrl", &mut warnings);
                    tags = tags_field(&fields, &mut warnings);
                }
                Ok(Value::Null) => {}
                Ok(_) => warnings.push("frontmatter is not a key/value block, ignoring it".to_string()),
                Err(e) => warnings.push(format!("frontmatter is not valid YAML, ignoring it: {}", e)),
            }
            body
        }
    };

    let title = title.unwrap_or_else(|| fallback_title.trim().to_string());
    if title.trim().is_empty() && content.trim().is_empty() {
        return MarkdownParse::Rejected("document has neither a title nor any content".to_string());
    }
    if title.trim().is_empty() {
        warnings.push("document has no title".to_string());
    }

    let mut note = Note::new(title, content);
    note.source_url = source_url.filter(|u| !u.is_empty());
    note.tags = tags;

    if warnings.is_empty() {
        MarkdownParse::Parsed(note)
    } else {
        MarkdownParse::Partial { note, warnings }
    }
}

// Returns (frontmatter block, body) when `text` opens with a delimited block. The blank
// line written between the block and the content is not part of the body.
fn split_frontmatter(text: &str) -> Option<(&str, &str)> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let rest = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\n', '\r']) == DELIMITER {
            let block = &rest[..offset];
            let body = &rest[offset + line.len()..];
            let body = body
                .strip_prefix("\r\n")
                .or_else(|| body.strip_prefix('\n'))
                .unwrap_or(body);
            return Some((block, body));
        }
        offset += line.len();
    }
    None
}

fn string_field(fields: &Mapping, key: &str, warnings: &mut Vec<String>) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => {
            warnings.push(format!("ignoring '{}': expected text, found {}", key, kind(other)));
            None
        }
    }
}

fn tags_field(fields: &Mapping, warnings: &mut Vec<String>) -> Vec<String> {
    let raw: Vec<String> = match fields.get("tags") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(items)) => items
            .iter()
            .filter_map(|item| match scalar_text(item) {
                Some(tag) => Some(tag),
                None => {
                    warnings.push(format!("ignoring tag: expected text, found {}", kind(item)));
                    None
                }
            })
            .collect(),
        Some(value) => match scalar_text(value) {
            Some(tag) => vec![tag],
            None => {
                warnings.push(format!("ignoring 'tags': expected a list, found {}", kind(value)));
                Vec::new()
            }
        },
    };
    normalize_tags(raw)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "nothing",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "text",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

// Plain when YAML would read the text back unchanged, double-quoted otherwise.
fn yaml_scalar(text: &str) -> String {
    let plain_is_exact = !text.is_empty()
        && text.trim() == text
        && text.chars().all(|c| c != '\u{feff}' && is_yaml_printable(c))
        && matches!(serde_yaml::from_str::<Value>(text), Ok(Value::String(ref s)) if s == text);
    if plain_is_exact {
        text.to_string()
    } else {
        double_quoted(text)
    }
}

// YAML reads NEL, LS and PS as line breaks even inside quotes, so they get named escapes
fn double_quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{85}' => out.push_str("\\N"),
            '\u{2028}' => out.push_str("\\L"),
            '\u{2029}' => out.push_str("\\P"),
            c if c != '\u{feff}' && is_yaml_printable(c) => out.push(c),
            c if (c as u32) <= 0xffff => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c => {
                let _ = write!(out, "\\U{:08X}", c as u32);
            }
        }
    }
    out.push('"');
    out
}

// Characters a YAML stream may carry literally, minus line breaks
fn is_yaml_printable(c: char) -> bool {
    matches!(c,
        '\u{20}'..='\u{7e}'
        | '\u{a0}'..='\u{2027}'
        | '\u{202a}'..='\u{d7ff}'
        | '\u{e000}'..='\u{fffd}'
        | '\u{10000}'..='\u{10ffff}')
}
