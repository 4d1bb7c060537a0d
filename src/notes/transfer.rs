use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::archive::{self, file_stem};
use super::{dated_file_name, json, markdown_to_note, note_to_markdown, sanitize_filename, MarkdownParse};
use crate::collections::NoteStore;
use crate::error::{ExportError, ImportError};
use crate::models::Note;

/// A file ready to be offered for download or written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Summary of a finished import.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

/// Moves notes in and out of the note collection as JSON, Markdown or ZIP files.
#[derive(Clone)]
pub struct NoteTransfer {
    notes: NoteStore,
    prefix: String,
    cancel: Option<Arc<AtomicBool>>,
}

impl NoteTransfer {
    /// `prefix` starts the names of multi-note exports (`<prefix>-notes-<date>.json`).
    pub fn new(notes: NoteStore, prefix: impl Into<String>) -> Self {
        Self {
            notes,
            prefix: prefix.into(),
            cancel: None,
        }
    }

    /// Imports check `flag` right before touching the collection and give up if it is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub async fn export_json(&self) -> Result<ExportArtifact, ExportError> {
        let notes = self.notes.list();
        log::info!("Exporting {} notes as JSON", notes.len());
        Ok(ExportArtifact {
            file_name: dated_file_name(&self.prefix, "json"),
            bytes: json::notes_to_json(&notes)?.into_bytes(),
        })
    }

    pub async fn export_markdown(&self, id: Uuid) -> Result<ExportArtifact, ExportError> {
        let note = self.notes.get(id).ok_or(ExportError::NotFound(id))?;
        Ok(ExportArtifact {
            file_name: format!("{}.md", sanitize_filename(&note.title)),
            bytes: note_to_markdown(&note).into_bytes(),
        })
    }

    pub async fn export_archive(&self) -> Result<ExportArtifact, ExportError> {
        let notes = self.notes.list();
        log::info!("Exporting {} notes as a ZIP archive", notes.len());
        let bytes = tokio::task::spawn_blocking(move || archive::pack(&notes))
            .await
            .map_err(|e| ExportError::Archive(e.to_string()))??;
        Ok(ExportArtifact {
            file_name: dated_file_name(&self.prefix, "zip"),
            bytes,
        })
    }

    /// Imports a `.json`, `.zip` or `.md` file, picked by the extension of `file_name`.
    pub async fn import_file(&self, file_name: &str, bytes: &[u8]) -> Result<ImportReport, ImportError> {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        log::info!("Importing notes from {}", file_name);

        let mut report = ImportReport::default();
        let notes: Vec<Note> = match extension.as_str() {
            "json" => {
                let decoded = json::json_to_notes(utf8(file_name, bytes)?)?;
                report.skipped = decoded.skipped;
                report.warnings = decoded.warnings;
                decoded.notes
            }
            "zip" => {
                let owned = bytes.to_vec();
                let unpacked = tokio::task::spawn_blocking(move || archive::unpack(&owned))
                    .await
                    .map_err(|e| ImportError::Archive(e.to_string()))??;
                report.skipped = unpacked.skipped;
                report.warnings = unpacked.warnings;
                unpacked.notes
            }
            "md" | "markdown" => match markdown_to_note(utf8(file_name, bytes)?, md_stem(file_name)) {
                MarkdownParse::Parsed(note) => vec![note],
                MarkdownParse::Partial { note, warnings } => {
                    report.warnings = warnings;
                    vec![note]
                }
                MarkdownParse::Rejected(reason) => {
                    return Err(ImportError::Parse(format!("{}: {}", file_name, reason)));
                }
            },
            _ => return Err(ImportError::UnsupportedFormat(file_name.to_string())),
        };

        if self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::SeqCst)) {
            log::info!("Import of {} cancelled before saving", file_name);
            return Err(ImportError::Cancelled);
        }

        report.imported = self.notes.import(notes).await?.len();
        log::info!(
            "Imported {} notes from {} ({} skipped)",
            report.imported,
            file_name,
            report.skipped
        );
        Ok(report)
    }

    pub async fn import_path(&self, path: &Path) -> Result<ImportReport, ImportError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.import_file(&file_name, &bytes).await
    }
}

fn utf8<'a>(file_name: &str, bytes: &'a [u8]) -> Result<&'a str, ImportError> {
    std::str::from_utf8(bytes).map_err(|e| ImportError::Parse(format!("{} is not UTF-8 text: {}", file_name, e)))
}

fn md_stem(file_name: &str) -> &str {
    let stem = file_stem(file_name);
    stem.strip_suffix(".markdown").unwrap_or(stem)
}
