use futures::future::join_all;
use futures::StreamExt;
use std::time::Duration;

use localchat_store::models::{Message, NewConversation, ServerConfig};
use localchat_store::{AppState, StoreConfig};

// Two contexts (think: background service and a visible panel) on one database file
async fn two_contexts(dir: &tempfile::TempDir) -> (AppState, AppState) {
    let config = StoreConfig {
        data_dir: dir.path().join("data"),
        poll_interval_ms: 0,
        ..StoreConfig::default()
    };
    let a = AppState::open(config.clone()).await.unwrap();
    let b = AppState::open(config).await.unwrap();
    (a, b)
}

#[tokio::test]
async fn simultaneous_appends_from_two_contexts_are_all_kept() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = two_contexts(&dir).await;
    let id = a
        .conversations
        .add(NewConversation {
            name: "shared".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let appends = (0..20).map(|i| {
        let conversations = if i % 2 == 0 {
            a.conversations.clone()
        } else {
            b.conversations.clone()
        };
        async move { conversations.append_message(id, Message::user(format!("m{}", i))).await }
    });
    for result in join_all(appends).await {
        result.unwrap();
    }

    a.store.sync().await.unwrap();
    b.store.sync().await.unwrap();
    for state in [&a, &b] {
        let conversation = state.conversations.get(id).unwrap();
        assert_eq!(conversation.messages.len(), 20);
        assert!(conversation.updated_at >= conversation.created_at);
    }
}

#[tokio::test]
async fn a_panel_sees_writes_from_the_background_context_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let (background, panel) = two_contexts(&dir).await;
    let mut changes = panel.conversations.changes();

    let first = background
        .conversations
        .add(NewConversation {
            name: "one".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    background.conversations.rename(first, "renamed").await.unwrap();
    panel.store.sync().await.unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(2), changes.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen[0].name, "one");
    let seen = tokio::time::timeout(Duration::from_secs(2), changes.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen[0].name, "renamed");
    assert_eq!(panel.conversations.get(first).unwrap().name, "renamed");
}

#[tokio::test]
async fn polling_context_catches_up_without_explicit_sync() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig {
        data_dir: dir.path().to_path_buf(),
        poll_interval_ms: 20,
        ..StoreConfig::default()
    };
    let writer = AppState::open(config.clone()).await.unwrap();
    let reader = AppState::open(config).await.unwrap();
    let mut changes = reader.servers.changes();

    writer
        .servers
        .add_server(
            "files",
            ServerConfig {
                url: "http://localhost:8000".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let servers = tokio::time::timeout(Duration::from_secs(2), changes.next())
        .await
        .unwrap()
        .unwrap();
    assert!(servers.contains_key("files"));
}

#[tokio::test]
async fn server_removal_is_idempotent_across_contexts() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = two_contexts(&dir).await;
    a.servers
        .add_server(
            "search",
            ServerConfig {
                url: "http://localhost:9000".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    b.servers.remove_server("search").await.unwrap();
    a.servers.remove_server("search").await.unwrap();
    a.servers
        .update_headers("search", [("X-Key".to_string(), "1".to_string())].into())
        .await
        .unwrap();

    a.store.sync().await.unwrap();
    assert!(a.servers.all().is_empty());
    assert!(b.servers.all().is_empty());
}

#[tokio::test]
async fn reopening_the_database_restores_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig {
        data_dir: dir.path().to_path_buf(),
        poll_interval_ms: 0,
        ..StoreConfig::default()
    };
    let id = {
        let state = AppState::open(config.clone()).await.unwrap();
        state
            .conversations
            .add(NewConversation {
                name: "persisted".into(),
                ..Default::default()
            })
            .await
            .unwrap()
    };

    let state = AppState::open(config).await.unwrap();
    assert_eq!(state.conversations.get(id).unwrap().name, "persisted");
}
