use chrono::Utc;
use futures::stream::BoxStream;
use uuid::Uuid;

use super::CONVERSATIONS_KEY;
use crate::error::StoreError;
use crate::models::{
    Artifact, ArtifactHistory, Conversation, ConversationPatch, Message, MessagePatch, NewConversation,
};
use crate::store::{Slot, Store, Subscription};

/// The conversation list, newest first.
#[derive(Clone)]
pub struct ConversationStore {
    slot: Slot<Vec<Conversation>>,
}

impl ConversationStore {
    pub async fn open(store: &Store) -> Result<Self, StoreError> {
        Ok(Self {
            slot: store.slot(CONVERSATIONS_KEY).await?,
        })
    }

    pub fn list(&self) -> Vec<Conversation> {
        self.slot.get()
    }

    pub fn get(&self, id: Uuid) -> Option<Conversation> {
        self.slot.get().into_iter().find(|c| c.id == id)
    }

    pub fn subscribe(&self, listener: impl Fn(&Vec<Conversation>) + Send + Sync + 'static) -> Subscription {
        self.slot.subscribe(listener)
    }

    pub fn changes(&self) -> BoxStream<'static, Vec<Conversation>> {
        self.slot.changes()
    }

    /// Creates a conversation and returns its id.
    pub async fn add(&self, input: NewConversation) -> Result<Uuid, StoreError> {
        let now = Utc::now();
        let mut conversation = Conversation {
            id: Uuid::new_v4(),
            name: input.name,
            messages: input.messages,
            created_at: now,
            updated_at: now,
            model: input.model,
            artifact: input.artifact.map(ArtifactHistory::normalized),
        };

        let id = self
            .slot
            .modify(move |all| {
                while all.iter().any(|c| c.id == conversation.id) {
                    conversation.id = Uuid::new_v4();
                }
                let id = conversation.id;
                all.insert(0, conversation);
                id
            })
            .await?;
        log::info!("Created conversation {}", id);
        Ok(id)
    }

    pub async fn update(&self, id: Uuid, patch: ConversationPatch) -> Result<(), StoreError> {
        self.modify_one(id, move |conversation| {
            if let Some(name) = patch.name {
                conversation.name = name;
            }
            if let Some(messages) = patch.messages {
                conversation.messages = messages;
            }
            if let Some(model) = patch.model {
                conversation.model = Some(model);
            }
            if let Some(artifact) = patch.artifact {
                conversation.artifact = Some(artifact.normalized());
            }
            true
        })
        .await
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let removed = self
            .slot
            .try_modify(move |all| {
                let before = all.len();
                all.retain(|c| c.id != id);
                (all.len() < before).then_some(())
            })
            .await?;
        if removed.is_some() {
            log::warn!("Deleted conversation {}", id);
        } else {
            log::debug!("Attempted to delete non-existent conversation: {}", id);
        }
        Ok(())
    }

    /// Appends `message`, stamping it with the current time if it has no timestamp.
    pub async fn append_message(&self, id: Uuid, mut message: Message) -> Result<(), StoreError> {
        message.timestamp.get_or_insert_with(Utc::now);
        self.modify_one(id, move |conversation| {
            conversation.messages.push(message);
            true
        })
        .await
    }

    /// Applies `patch` to the last message, typically the assistant reply being streamed.
    pub async fn update_last_message(&self, id: Uuid, patch: MessagePatch) -> Result<(), StoreError> {
        self.modify_one(id, move |conversation| {
            let Some(last) = conversation.messages.last_mut() else {
                return false;
            };
            if let Some(content) = patch.content {
                last.content = content;
            }
            if let Some(reasoning) = patch.reasoning {
                last.reasoning = Some(reasoning);
            }
            if let Some(is_streaming) = patch.is_streaming {
                last.is_streaming = Some(is_streaming);
            }
            true
        })
        .await
    }

    pub async fn rename(&self, id: Uuid, name: impl Into<String>) -> Result<(), StoreError> {
        let name = name.into();
        log::info!("Renaming conversation {} to: {}", id, name);
        self.modify_one(id, move |conversation| {
            conversation.name = name;
            true
        })
        .await
    }

    /// Adds a new artifact version and makes it the displayed one.
    pub async fn push_artifact(&self, id: Uuid, artifact: Artifact) -> Result<(), StoreError> {
        self.modify_one(id, move |conversation| {
            conversation.artifact.get_or_insert_with(Default::default).push(artifact);
            true
        })
        .await
    }

    /// Switches the displayed artifact version. Out-of-range indexes are ignored.
    pub async fn select_artifact(&self, id: Uuid, index: usize) -> Result<(), StoreError> {
        self.modify_one(id, move |conversation| {
            conversation
                .artifact
                .as_mut()
                .is_some_and(|history| history.select(index))
        })
        .await
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        log::warn!("Clearing all conversations");
        self.slot.replace(Vec::new()).await
    }

    // Runs `f` on the conversation with `id` and bumps its `updated_at`. Nothing is written
    // when the id is unknown or `f` reports that it changed nothing.
    async fn modify_one(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Conversation) -> bool + Send,
    ) -> Result<(), StoreError> {
        let changed = self
            .slot
            .try_modify(move |all| {
                let conversation = all.iter_mut().find(|c| c.id == id)?;
                if !f(conversation) {
                    return None;
                }
                conversation.touch();
                Some(())
            })
            .await?;
        if changed.is_none() {
            log::debug!("Conversation {} not found or unchanged", id);
        }
        Ok(())
    }
}
