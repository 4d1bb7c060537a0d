use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ExportError, ImportError};
use crate::models::{normalize_tags, Note};

/// Pretty-printed JSON array of notes.
pub fn notes_to_json(notes: &[Note]) -> Result<String, ExportError> {
    serde_json::to_string_pretty(notes).map_err(|e| ExportError::Encode(e.to_string()))
}

/// One element of an imported JSON array. `title` and `content` are required; `id` is
/// never read since imported notes always get a fresh identity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingNote {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl IncomingNote {
    /// Builds a note with a fresh id. Timestamps are kept when they parse; a missing or
    /// unreadable one falls back to now.
    pub fn into_note(self) -> Note {
        let mut note = Note::new(self.title, self.content);
        note.source_url = self.source_url.filter(|u| !u.is_empty());
        note.tags = normalize_tags(self.tags.unwrap_or_default());
        if let Some(created) = self.created_at.as_deref().and_then(parse_timestamp) {
            note.created_at = created;
            note.updated_at = created.max(note.updated_at);
        }
        if let Some(updated) = self.updated_at.as_deref().and_then(parse_timestamp) {
            note.updated_at = updated.max(note.created_at);
        }
        note
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

/// Notes decoded from a JSON file, plus the elements that were left out.
#[derive(Debug, Default)]
pub struct DecodedNotes {
    pub notes: Vec<Note>,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

/// Validates and decodes a JSON export. The whole file is rejected only when it is not JSON
/// or the top level is not an array; elements that are not notes are skipped with a warning.
pub fn json_to_notes(text: &str) -> Result<DecodedNotes, ImportError> {
    let document: Value =
        serde_json::from_str(text).map_err(|e| ImportError::Parse(format!("not valid JSON: {}", e)))?;

    let Value::Array(items) = document else {
        return Err(ImportError::Parse(format!(
            "expected an array of notes, found {}",
            json_kind(&document)
        )));
    };

    let mut decoded = DecodedNotes::default();
    for (index, item) in items.into_iter().enumerate() {
        match IncomingNote::deserialize(item) {
            Ok(incoming) => decoded.notes.push(incoming.into_note()),
            Err(e) => {
                let warning = format!("note at index {}: {}", index, e);
                log::warn!("Skipping JSON element, {}", warning);
                decoded.skipped += 1;
                decoded.warnings.push(warning);
            }
        }
    }
    Ok(decoded)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_is_a_pretty_camel_case_array() {
        let mut note = Note::new("T", "C");
        note.source_url = Some("https://x".into());
        let text = notes_to_json(&[note]).unwrap();
        assert!(text.starts_with("[\n"));
        assert!(text.contains("\"sourceUrl\": \"https://x\""));
        assert!(text.contains("\"createdAt\""));
    }

    #[test]
    fn import_keeps_fields_and_timestamps_but_not_ids() {
        let original = Note::new("Title", "Body");
        let text = notes_to_json(std::slice::from_ref(&original)).unwrap();
        let notes = json_to_notes(&text).unwrap().notes;

        assert_eq!(notes.len(), 1);
        assert_ne!(notes[0].id, original.id);
        assert_eq!(notes[0].title, "Title");
        assert_eq!(notes[0].content, "Body");
        assert_eq!(notes[0].created_at, original.created_at);
    }

    #[test]
    fn minimal_elements_are_accepted() {
        let notes = json_to_notes(r#"[{"title":"a","content":"b","tags":null,"id":42}]"#)
            .unwrap()
            .notes;
        assert_eq!(notes[0].title, "a");
        assert!(notes[0].tags.is_empty());
        assert!(notes[0].updated_at >= notes[0].created_at);
    }

    #[test]
    fn non_array_top_level_is_rejected() {
        let err = json_to_notes(r#"{"title":"a","content":"b"}"#).unwrap_err();
        match err {
            ImportError::Parse(message) => assert!(message.contains("an object"), "{}", message),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn bad_element_is_skipped_and_named_by_index() {
        let decoded =
            json_to_notes(r#"[{"title":"a","content":"1"},{"title":"b","content":"2"},{"title":"c"}]"#).unwrap();
        let titles: Vec<&str> = decoded.notes.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b"]);
        assert_eq!(decoded.skipped, 1);
        assert_eq!(decoded.warnings.len(), 1);
        assert!(decoded.warnings[0].contains("index 2"), "{}", decoded.warnings[0]);
    }

    #[test]
    fn array_of_non_notes_decodes_to_nothing() {
        let decoded = json_to_notes(r#"[1, "x", {"title": 1}]"#).unwrap();
        assert!(decoded.notes.is_empty());
        assert_eq!(decoded.skipped, 3);
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        assert!(matches!(json_to_notes("[{"), Err(ImportError::Parse(_))));
    }
}
