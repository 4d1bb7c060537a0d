use super::{MODELS_KEY, TOOLS_KEY};
use crate::error::{ImportError, StoreError};
use crate::models::{ModelInfo, ModelListing, ToolInfo};
use crate::store::{Slot, Store, Subscription};

/// Tools the runtime currently has loaded. Refreshed wholesale; the last refresh wins.
#[derive(Clone)]
pub struct ToolRegistry {
    slot: Slot<Vec<ToolInfo>>,
}

impl ToolRegistry {
    pub async fn open(store: &Store) -> Result<Self, StoreError> {
        Ok(Self {
            slot: store.slot(TOOLS_KEY).await?,
        })
    }

    pub fn list(&self) -> Vec<ToolInfo> {
        self.slot.get()
    }

    pub fn tools_for_server(&self, server_name: &str) -> Vec<ToolInfo> {
        self.slot
            .get()
            .into_iter()
            .filter(|tool| tool.server_name == server_name)
            .collect()
    }

    pub fn subscribe(&self, listener: impl Fn(&Vec<ToolInfo>) + Send + Sync + 'static) -> Subscription {
        self.slot.subscribe(listener)
    }

    pub async fn replace(&self, tools: Vec<ToolInfo>) -> Result<(), StoreError> {
        log::info!("Refreshing tool registry with {} tools", tools.len());
        self.slot.replace(tools).await
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.slot.replace(Vec::new()).await
    }
}

/// Models offered by the local inference server, as of the last listing.
#[derive(Clone)]
pub struct ModelCatalog {
    slot: Slot<Vec<ModelInfo>>,
}

impl ModelCatalog {
    pub async fn open(store: &Store) -> Result<Self, StoreError> {
        Ok(Self {
            slot: store.slot(MODELS_KEY).await?,
        })
    }

    pub fn list(&self) -> Vec<ModelInfo> {
        self.slot.get()
    }

    pub fn subscribe(&self, listener: impl Fn(&Vec<ModelInfo>) + Send + Sync + 'static) -> Subscription {
        self.slot.subscribe(listener)
    }

    pub async fn replace(&self, models: Vec<ModelInfo>) -> Result<(), StoreError> {
        self.slot.replace(models).await
    }

    /// Replaces the catalog from a raw `{ "models": [...] }` listing body and returns
    /// how many models it held. A malformed body leaves the catalog untouched.
    pub async fn replace_from_listing(&self, body: &str) -> Result<usize, ImportError> {
        let listing: ModelListing = serde_json::from_str(body)
            .map_err(|e| ImportError::Parse(format!("model listing: {}", e)))?;
        let count = listing.models.len();
        log::info!("Fetched {} models", count);
        self.replace(listing.models).await?;
        Ok(count)
    }
}
