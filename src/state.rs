use std::sync::Arc;

use crate::collections::{ConversationStore, ModelCatalog, NoteStore, ServerConfigStore, ToolRegistry};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::notes::NoteTransfer;
use crate::storage::{SlotBackend, SqliteBackend};
use crate::store::{Store, StoreOptions};

// Everything a UI surface (panel, background service, CLI) needs, built once per context
#[derive(Clone)]
pub struct AppState {
    pub config: StoreConfig,
    pub store: Store,
    pub conversations: ConversationStore,
    pub servers: ServerConfigStore,
    pub tools: ToolRegistry,
    pub models: ModelCatalog,
    pub notes: NoteStore,
    pub transfer: NoteTransfer,
}

impl AppState {
    /// Opens the SQLite database named by `config` as a new execution context.
    pub async fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let backend = SqliteBackend::open(config.database_path())
            .await?
            .with_retention(config.change_log_retention);
        let options = config.store_options();
        Self::with_backend(config, Arc::new(backend), options).await
    }

    /// A throwaway state over a private in-memory backend.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let store = Store::in_memory().await?;
        Self::from_store(StoreConfig::default(), store).await
    }

    /// Another context over `backend`, e.g. a second panel sharing the same database.
    pub async fn with_backend(
        config: StoreConfig,
        backend: Arc<dyn SlotBackend>,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        let store = Store::open(backend, options).await?;
        Self::from_store(config, store).await
    }

    async fn from_store(config: StoreConfig, store: Store) -> Result<Self, StoreError> {
        let notes = NoteStore::open(&store).await?;
        let transfer = NoteTransfer::new(notes.clone(), config.export_prefix.clone());
        Ok(Self {
            conversations: ConversationStore::open(&store).await?,
            servers: ServerConfigStore::open(&store).await?,
            tools: ToolRegistry::open(&store).await?,
            models: ModelCatalog::open(&store).await?,
            notes,
            transfer,
            store,
            config,
        })
    }
}
