use std::collections::HashSet;
use std::io::{Cursor, Read, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::frontmatter::{markdown_to_note, note_to_markdown, MarkdownParse};
use super::sanitize_filename;
use crate::error::{ExportError, ImportError};
use crate::models::Note;

// Zip bomb protection: total declared uncompressed size of an imported archive
const MAX_UNPACKED_BYTES: u64 = 64 * 1024 * 1024;

/// Notes read from an archive, plus the entries that had to be left out.
#[derive(Debug, Default)]
pub struct UnpackedArchive {
    pub notes: Vec<Note>,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

/// One Deflate-compressed Markdown file per note.
pub fn pack(notes: &[Note]) -> Result<Vec<u8>, ExportError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut used: HashSet<String> = HashSet::new();

    for note in notes {
        let name = entry_name(&note.title, &mut used);
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| ExportError::Archive(format!("{}: {}", name, e)))?;
        writer
            .write_all(note_to_markdown(note).as_bytes())
            .map_err(|e| ExportError::Archive(format!("{}: {}", name, e)))?;
    }

    let cursor = writer.finish().map_err(|e| ExportError::Archive(e.to_string()))?;
    Ok(cursor.into_inner())
}

// `Title.md`, then `Title (2).md`, `Title (3).md`... within one archive
fn entry_name(title: &str, used: &mut HashSet<String>) -> String {
    let stem = sanitize_filename(title);
    let mut name = format!("{}.md", stem);
    let mut n = 2;
    while !used.insert(name.clone()) {
        name = format!("{} ({}).md", stem, n);
        n += 1;
    }
    name
}

/// Reads every `.md` entry of an archive. Entries that cannot be read or parsed are
/// skipped and reported; only an unreadable archive fails the whole call.
pub fn unpack(bytes: &[u8]) -> Result<UnpackedArchive, ImportError> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| ImportError::Archive(format!("failed to read ZIP file: {}", e)))?;

    let declared: u64 = (0..archive.len())
        .filter_map(|i| archive.by_index(i).ok().map(|file| file.size()))
        .sum();
    if declared > MAX_UNPACKED_BYTES {
        return Err(ImportError::Archive(format!(
            "archive expands to {} bytes, more than the {} byte limit",
            declared, MAX_UNPACKED_BYTES
        )));
    }

    let mut unpacked = UnpackedArchive::default();
    for i in 0..archive.len() {
        let mut file = match archive.by_index(i) {
            Ok(file) => file,
            Err(e) => {
                skip(&mut unpacked, format!("entry #{}: {}", i, e));
                continue;
            }
        };

        let name = file.name().to_string();
        if file.is_dir() || !is_markdown(&name) {
            continue;
        }

        let mut raw = Vec::new();
        if let Err(e) = file.read_to_end(&mut raw) {
            skip(&mut unpacked, format!("{}: {}", name, e));
            continue;
        }
        let text = match String::from_utf8(raw) {
            Ok(text) => text,
            Err(_) => {
                skip(&mut unpacked, format!("{}: not UTF-8 text", name));
                continue;
            }
        };

        match markdown_to_note(&text, file_stem(&name)) {
            MarkdownParse::Parsed(note) => unpacked.notes.push(note),
            MarkdownParse::Partial { note, warnings } => {
                for warning in warnings {
                    log::warn!("{}: {}", name, warning);
                    unpacked.warnings.push(format!("{}: {}", name, warning));
                }
                unpacked.notes.push(note);
            }
            MarkdownParse::Rejected(reason) => skip(&mut unpacked, format!("{}: {}", name, reason)),
        }
    }

    log::debug!(
        "Unpacked {} notes from archive ({} skipped)",
        unpacked.notes.len(),
        unpacked.skipped
    );
    Ok(unpacked)
}

fn skip(unpacked: &mut UnpackedArchive, warning: String) {
    log::warn!("Skipping archive entry {}", warning);
    unpacked.skipped += 1;
    unpacked.warnings.push(warning);
}

fn is_markdown(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".md")
}

/// File name without directories or the `.md` extension.
pub fn file_stem(name: &str) -> &str {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match base.len().checked_sub(3) {
        Some(cut) if base.is_char_boundary(cut) && base[cut..].eq_ignore_ascii_case(".md") => &base[..cut],
        _ => base,
    }
}
