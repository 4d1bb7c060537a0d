pub mod archive;
pub mod frontmatter;
pub mod json;
pub mod merge;
mod transfer;

pub use frontmatter::{markdown_to_note, note_to_markdown, MarkdownParse};
pub use json::{json_to_notes, notes_to_json, DecodedNotes, IncomingNote};
pub use merge::prepare_import;
pub use transfer::{ExportArtifact, ImportReport, NoteTransfer};

use chrono::Utc;

// Characters that break file names on at least one platform
const PATH_HOSTILE: [char; 10] = ['/', '\\', '?', '%', '*', ':', '|', '"', '<', '>'];

/// File name stem for a note title: path-hostile characters become `-`, surrounding
/// whitespace is trimmed, and an empty result becomes `untitled`.
pub fn sanitize_filename(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| if PATH_HOSTILE.contains(&c) { '-' } else { c })
        .collect();
    let trimmed = replaced.trim();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<prefix>-notes-<YYYY-MM-DD>.<extension>` for today's UTC date.
pub fn dated_file_name(prefix: &str, extension: &str) -> String {
    format!("{}-notes-{}.{}", prefix, Utc::now().format("%Y-%m-%d"), extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_hostile_characters() {
        assert_eq!(sanitize_filename("  a/b\\c?d%e*f:g|h\"i<j>k  "), "a-b-c-d-e-f-g-h-i-j-k");
        assert_eq!(sanitize_filename("Meeting notes"), "Meeting notes");
        assert_eq!(sanitize_filename("   "), "untitled");
    }

    #[test]
    fn dated_file_name_uses_prefix_and_extension() {
        let name = dated_file_name("localchat", "zip");
        assert!(name.starts_with("localchat-notes-"));
        assert!(name.ends_with(".zip"));
        // localchat-notes-YYYY-MM-DD.zip
        assert_eq!(name.len(), "localchat-notes-".len() + 10 + ".zip".len());
    }
}
