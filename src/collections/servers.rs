use futures::stream::BoxStream;
use std::collections::BTreeMap;

use super::SERVERS_KEY;
use crate::error::StoreError;
use crate::models::ServerConfig;
use crate::store::{Slot, Store, Subscription};

pub type ServerMap = BTreeMap<String, ServerConfig>;

/// Tool-server connection settings keyed by server name.
#[derive(Clone)]
pub struct ServerConfigStore {
    slot: Slot<ServerMap>,
}

impl ServerConfigStore {
    pub async fn open(store: &Store) -> Result<Self, StoreError> {
        Ok(Self {
            slot: store.slot(SERVERS_KEY).await?,
        })
    }

    pub fn all(&self) -> ServerMap {
        self.slot.get()
    }

    pub fn get(&self, name: &str) -> Option<ServerConfig> {
        self.slot.get().remove(name)
    }

    pub fn subscribe(&self, listener: impl Fn(&ServerMap) + Send + Sync + 'static) -> Subscription {
        self.slot.subscribe(listener)
    }

    pub fn changes(&self) -> BoxStream<'static, ServerMap> {
        self.slot.changes()
    }

    /// Inserts `config` under `name`, replacing any existing entry.
    pub async fn add_server(&self, name: impl Into<String>, config: ServerConfig) -> Result<(), StoreError> {
        let name = name.into();
        log::info!("Saving server config: {}", name);
        self.slot
            .modify(move |servers| {
                servers.insert(name, config);
            })
            .await
    }

    /// Removes `name`. Removing an absent server changes nothing.
    pub async fn remove_server(&self, name: &str) -> Result<(), StoreError> {
        let owned = name.to_string();
        let removed = self
            .slot
            .try_modify(move |servers| servers.remove(&owned).map(|_| ()))
            .await?;
        if removed.is_some() {
            log::warn!("Removed server config: {}", name);
        }
        Ok(())
    }

    /// Replaces the headers of an existing server. Never creates an entry.
    pub async fn update_headers(&self, name: &str, headers: BTreeMap<String, String>) -> Result<(), StoreError> {
        let owned = name.to_string();
        let updated = self
            .slot
            .try_modify(move |servers| {
                let server = servers.get_mut(&owned)?;
                server.headers = Some(headers);
                Some(())
            })
            .await?;
        if updated.is_none() {
            log::debug!("Attempted to update headers of unknown server: {}", name);
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.slot.replace(ServerMap::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn servers() -> ServerConfigStore {
        let store = Store::in_memory().await.unwrap();
        ServerConfigStore::open(&store).await.unwrap()
    }

    fn config(url: &str) -> ServerConfig {
        ServerConfig {
            url: url.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn add_server_upserts_by_name() {
        let servers = servers().await;
        servers.add_server("files", config("http://localhost:1")).await.unwrap();
        servers.add_server("files", config("http://localhost:2")).await.unwrap();

        let all = servers.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all["files"].url, "http://localhost:2");
    }

    #[tokio::test]
    async fn remove_server_is_idempotent() {
        let servers = servers().await;
        servers.add_server("a", config("http://a")).await.unwrap();
        servers.add_server("b", config("http://b")).await.unwrap();

        servers.remove_server("a").await.unwrap();
        let once = servers.all();
        servers.remove_server("a").await.unwrap();
        assert_eq!(servers.all(), once);
        assert!(servers.get("b").is_some());
    }

    #[tokio::test]
    async fn update_headers_only_touches_existing_servers() {
        let servers = servers().await;
        servers.add_server("a", config("http://a")).await.unwrap();
        let headers = BTreeMap::from([("Authorization".to_string(), "Bearer t".to_string())]);

        servers.update_headers("missing", headers.clone()).await.unwrap();
        assert!(servers.get("missing").is_none());
        assert_eq!(servers.all().len(), 1);

        servers.update_headers("a", headers.clone()).await.unwrap();
        assert_eq!(servers.get("a").unwrap().headers, Some(headers));
    }
}
