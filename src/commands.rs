// Commands exposed to UI surfaces. Ids arrive as strings and errors leave as strings.

use std::collections::BTreeMap;
use std::fmt::Display;
use uuid::Uuid;

use crate::collections::ServerMap;
use crate::models::{
    Artifact, Conversation, ConversationPatch, Message, MessagePatch, ModelInfo, NewConversation, NewNote, Note,
    NotePatch, ServerConfig, ToolInfo,
};
use crate::notes::{ExportArtifact, ImportReport};
use crate::state::AppState;

fn parse_id(kind: &str, raw: &str) -> Result<Uuid, String> {
    Uuid::parse_str(raw).map_err(|_| {
        let err_msg = format!("Invalid {} ID format: {}", kind, raw);
        log::error!("{}", err_msg);
        err_msg
    })
}

fn user_error(action: &str, e: impl Display) -> String {
    log::error!("Failed to {}: {}", action, e);
    format!("Failed to {}: {}", action, e)
}

// --- Conversations ---

pub fn list_conversations(state: &AppState) -> Vec<Conversation> {
    log::info!("Frontend requested to list conversations");
    state.conversations.list()
}

pub fn get_conversation(state: &AppState, conversation_id: &str) -> Result<Option<Conversation>, String> {
    let id = parse_id("conversation", conversation_id)?;
    Ok(state.conversations.get(id))
}

pub async fn create_conversation(state: &AppState, name: String, model: Option<String>) -> Result<Conversation, String> {
    log::info!("Frontend requested a new conversation: {}", name);
    let id = state
        .conversations
        .add(NewConversation {
            name,
            model,
            ..Default::default()
        })
        .await
        .map_err(|e| user_error("create conversation", e))?;
    state
        .conversations
        .get(id)
        .ok_or_else(|| format!("Conversation {} vanished after creation", id))
}

pub async fn delete_conversation(state: &AppState, conversation_id: &str) -> Result<(), String> {
    log::warn!("[CMD] Frontend requested to delete conversation ID: {}", conversation_id);
    let id = parse_id("conversation", conversation_id)?;
    state
        .conversations
        .delete(id)
        .await
        .map_err(|e| user_error("delete conversation", e))
}

pub async fn rename_conversation(state: &AppState, conversation_id: &str, new_name: String) -> Result<(), String> {
    let id = parse_id("conversation", conversation_id)?;
    state
        .conversations
        .rename(id, new_name)
        .await
        .map_err(|e| user_error("rename conversation", e))
}

pub async fn update_conversation_model(state: &AppState, conversation_id: &str, model: String) -> Result<(), String> {
    log::info!("Updating model for conversation {} to {}", conversation_id, model);
    let id = parse_id("conversation", conversation_id)?;
    let patch = ConversationPatch {
        model: Some(model),
        ..Default::default()
    };
    state
        .conversations
        .update(id, patch)
        .await
        .map_err(|e| user_error("update conversation model", e))
}

pub async fn append_message(state: &AppState, conversation_id: &str, message: Message) -> Result<(), String> {
    log::info!("Appending {:?} message to conversation {}", message.role, conversation_id);
    let id = parse_id("conversation", conversation_id)?;
    state
        .conversations
        .append_message(id, message)
        .await
        .map_err(|e| user_error("save message", e))
}

pub async fn update_last_message(state: &AppState, conversation_id: &str, patch: MessagePatch) -> Result<(), String> {
    let id = parse_id("conversation", conversation_id)?;
    state
        .conversations
        .update_last_message(id, patch)
        .await
        .map_err(|e| user_error("update message", e))
}

pub async fn push_artifact(state: &AppState, conversation_id: &str, artifact: Artifact) -> Result<(), String> {
    let id = parse_id("conversation", conversation_id)?;
    state
        .conversations
        .push_artifact(id, artifact)
        .await
        .map_err(|e| user_error("save artifact", e))
}

pub async fn select_artifact(state: &AppState, conversation_id: &str, index: usize) -> Result<(), String> {
    let id = parse_id("conversation", conversation_id)?;
    state
        .conversations
        .select_artifact(id, index)
        .await
        .map_err(|e| user_error("select artifact", e))
}

// --- Tool servers, tools and models ---

pub fn list_servers(state: &AppState) -> ServerMap {
    state.servers.all()
}

pub async fn save_server(state: &AppState, name: String, config: ServerConfig) -> Result<(), String> {
    state
        .servers
        .add_server(name, config)
        .await
        .map_err(|e| user_error("save server", e))
}

pub async fn remove_server(state: &AppState, name: &str) -> Result<(), String> {
    log::warn!("[CMD] Frontend requested to remove server: {}", name);
    state
        .servers
        .remove_server(name)
        .await
        .map_err(|e| user_error("remove server", e))
}

pub async fn update_server_headers(
    state: &AppState,
    name: &str,
    headers: BTreeMap<String, String>,
) -> Result<(), String> {
    state
        .servers
        .update_headers(name, headers)
        .await
        .map_err(|e| user_error("update server headers", e))
}

pub fn list_tools(state: &AppState) -> Vec<ToolInfo> {
    state.tools.list()
}

pub async fn refresh_tools(state: &AppState, tools: Vec<ToolInfo>) -> Result<(), String> {
    state
        .tools
        .replace(tools)
        .await
        .map_err(|e| user_error("refresh tools", e))
}

pub fn list_models(state: &AppState) -> Vec<ModelInfo> {
    state.models.list()
}

/// Stores the body of the inference server's model listing and returns the model count.
pub async fn refresh_models(state: &AppState, listing_body: &str) -> Result<usize, String> {
    state
        .models
        .replace_from_listing(listing_body)
        .await
        .map_err(|e| user_error("refresh models", e))
}

// --- Notes ---

pub fn list_notes(state: &AppState) -> Vec<Note> {
    state.notes.list()
}

pub async fn create_note(state: &AppState, note: NewNote) -> Result<Note, String> {
    let id = state
        .notes
        .add(note)
        .await
        .map_err(|e| user_error("create note", e))?;
    state
        .notes
        .get(id)
        .ok_or_else(|| format!("Note {} vanished after creation", id))
}

pub async fn update_note(state: &AppState, note_id: &str, patch: NotePatch) -> Result<(), String> {
    let id = parse_id("note", note_id)?;
    state
        .notes
        .update(id, patch)
        .await
        .map_err(|e| user_error("update note", e))
}

pub async fn delete_note(state: &AppState, note_id: &str) -> Result<(), String> {
    log::warn!("[CMD] Frontend requested to delete note ID: {}", note_id);
    let id = parse_id("note", note_id)?;
    state
        .notes
        .delete(id)
        .await
        .map_err(|e| user_error("delete note", e))
}

/// `format` is `json`, `markdown` (needs `note_id`) or `zip`.
pub async fn export_notes(state: &AppState, format: &str, note_id: Option<&str>) -> Result<ExportArtifact, String> {
    log::info!("Frontend requested a {} export of notes", format);
    let result = match (format, note_id) {
        ("json", _) => state.transfer.export_json().await,
        ("zip", _) => state.transfer.export_archive().await,
        ("markdown" | "md", Some(raw)) => {
            let id = parse_id("note", raw)?;
            state.transfer.export_markdown(id).await
        }
        ("markdown" | "md", None) => return Err("A Markdown export needs a note ID".to_string()),
        (other, _) => return Err(format!("Unsupported export format: {}", other)),
    };
    result.map_err(|e| user_error("export notes", e))
}

pub async fn import_notes(state: &AppState, file_name: &str, bytes: &[u8]) -> Result<ImportReport, String> {
    state
        .transfer
        .import_file(file_name, bytes)
        .await
        .map_err(|e| user_error("import notes", e))
}
