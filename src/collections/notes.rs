use futures::stream::BoxStream;
use uuid::Uuid;

use super::NOTES_KEY;
use crate::error::StoreError;
use crate::models::{normalize_tags, NewNote, Note, NotePatch};
use crate::notes::prepare_import;
use crate::store::{Slot, Store, Subscription};

#[derive(Clone)]
pub struct NoteStore {
    slot: Slot<Vec<Note>>,
}

impl NoteStore {
    pub async fn open(store: &Store) -> Result<Self, StoreError> {
        Ok(Self {
            slot: store.slot(NOTES_KEY).await?,
        })
    }

    pub fn list(&self) -> Vec<Note> {
        self.slot.get()
    }

    pub fn get(&self, id: Uuid) -> Option<Note> {
        self.slot.get().into_iter().find(|n| n.id == id)
    }

    pub fn subscribe(&self, listener: impl Fn(&Vec<Note>) + Send + Sync + 'static) -> Subscription {
        self.slot.subscribe(listener)
    }

    pub fn changes(&self) -> BoxStream<'static, Vec<Note>> {
        self.slot.changes()
    }

    pub async fn add(&self, input: NewNote) -> Result<Uuid, StoreError> {
        let mut note = Note::new(input.title, input.content);
        note.source_url = input.source_url.filter(|u| !u.is_empty());
        note.tags = normalize_tags(input.tags);

        self.slot
            .modify(move |all| {
                while all.iter().any(|n| n.id == note.id) {
                    note.id = Uuid::new_v4();
                }
                let id = note.id;
                all.push(note);
                id
            })
            .await
    }

    pub async fn update(&self, id: Uuid, patch: NotePatch) -> Result<(), StoreError> {
        let updated = self
            .slot
            .try_modify(move |all| {
                let note = all.iter_mut().find(|n| n.id == id)?;
                if let Some(title) = patch.title {
                    note.title = title;
                }
                if let Some(content) = patch.content {
                    note.content = content;
                }
                if let Some(url) = patch.source_url {
                    note.source_url = Some(url).filter(|u| !u.is_empty());
                }
                if let Some(tags) = patch.tags {
                    note.tags = normalize_tags(tags);
                }
                note.touch();
                Some(())
            })
            .await?;
        if updated.is_none() {
            log::debug!("Attempted to update non-existent note: {}", id);
        }
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let removed = self
            .slot
            .try_modify(move |all| {
                let before = all.len();
                all.retain(|n| n.id != id);
                (all.len() < before).then_some(())
            })
            .await?;
        if removed.is_none() {
            log::debug!("Attempted to delete non-existent note: {}", id);
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        log::warn!("Clearing all notes");
        self.slot.replace(Vec::new()).await
    }

    /// Appends `incoming` in one write, after giving each note a fresh id and renaming
    /// titles that collide with the notes stored at commit time. Returns the notes as stored.
    pub async fn import(&self, incoming: Vec<Note>) -> Result<Vec<Note>, StoreError> {
        if incoming.is_empty() {
            return Ok(Vec::new());
        }
        let prepared = self
            .slot
            .modify(move |all| {
                let prepared = prepare_import(all, incoming);
                all.extend(prepared.iter().cloned());
                prepared
            })
            .await?;
        log::info!("Imported {} notes", prepared.len());
        Ok(prepared)
    }
}
