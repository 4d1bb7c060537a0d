use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::ZipWriter;

use localchat_store::models::{NewNote, Note};
use localchat_store::{AppState, ImportError, StoreConfig};

async fn state(dir: &tempfile::TempDir) -> AppState {
    AppState::open(StoreConfig {
        data_dir: dir.path().to_path_buf(),
        poll_interval_ms: 0,
        export_prefix: "backup".into(),
        ..StoreConfig::default()
    })
    .await
    .unwrap()
}

async fn add(state: &AppState, title: &str, content: &str) -> Note {
    let id = state
        .notes
        .add(NewNote {
            title: title.into(),
            content: content.into(),
            ..Default::default()
        })
        .await
        .unwrap();
    state.notes.get(id).unwrap()
}

#[tokio::test]
async fn export_names_follow_prefix_and_date() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(&dir).await;
    let note = add(&state, "Trip: Lisbon / Porto", "itinerary").await;

    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let json = state.transfer.export_json().await.unwrap();
    assert_eq!(json.file_name, format!("backup-notes-{}.json", today));
    let zip = state.transfer.export_archive().await.unwrap();
    assert_eq!(zip.file_name, format!("backup-notes-{}.zip", today));
    let markdown = state.transfer.export_markdown(note.id).await.unwrap();
    assert_eq!(markdown.file_name, "Trip- Lisbon - Porto.md");
}

#[tokio::test]
async fn importing_an_export_into_the_same_store_renames_every_title() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(&dir).await;
    add(&state, "A", "1").await;
    add(&state, "B", "2").await;

    let zip = state.transfer.export_archive().await.unwrap();
    let report = state.transfer.import_file(&zip.file_name, &zip.bytes).await.unwrap();
    assert_eq!(report.imported, 2);
    assert_eq!(report.skipped, 0);

    let mut titles: Vec<String> = state.notes.list().into_iter().map(|n| n.title).collect();
    titles.sort();
    assert_eq!(titles, vec!["A", "A (copie)", "B", "B (copie)"]);

    let ids: std::collections::HashSet<_> = state.notes.list().into_iter().map(|n| n.id).collect();
    assert_eq!(ids.len(), 4);
}

#[tokio::test]
async fn archive_with_a_corrupt_entry_imports_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(&dir).await;

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in [
        ("first.md", &b"---\ntitle: First\n---\n\none"[..]),
        ("second.md", &b"two"[..]),
        ("broken.md", &b"\xc3\x28"[..]),
    ] {
        writer.start_file(name, FileOptions::default()).unwrap();
        writer.write_all(body).unwrap();
    }
    let bytes = writer.finish().unwrap().into_inner();

    let report = state.transfer.import_file("upload.zip", &bytes).await.unwrap();
    assert_eq!(report.imported, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(state.notes.list().len(), 2);
}

#[tokio::test]
async fn malformed_json_file_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(&dir).await;
    add(&state, "Keep me", "").await;
    let before = state.notes.list();

    for body in [&br#"{"notes": []}"#[..], &b"[{\"title\": "[..], &b"\xff"[..]] {
        let err = state.transfer.import_file("notes.json", body).await.unwrap_err();
        assert!(matches!(err, ImportError::Parse(_)), "{:?}", err);
    }
    assert_eq!(state.notes.list(), before);
}

#[tokio::test]
async fn json_elements_that_are_not_notes_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(&dir).await;
    add(&state, "Keep me", "").await;

    let body = br#"[{"title": 1}, {"title": "Fresh", "content": "kept"}]"#;
    let report = state.transfer.import_file("notes.json", body).await.unwrap();
    assert_eq!(report.imported, 1);
    assert_eq!(report.skipped, 1);
    assert!(report.warnings[0].contains("index 0"), "{:?}", report.warnings);

    let titles: Vec<String> = state.notes.list().into_iter().map(|n| n.title).collect();
    assert_eq!(titles, vec!["Keep me", "Fresh"]);
}

#[tokio::test]
async fn import_from_disk_reports_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(&dir).await;

    let missing = dir.path().join("nope.json");
    assert!(matches!(
        state.transfer.import_path(&missing).await,
        Err(ImportError::Read(_))
    ));

    let path = dir.path().join("Shopping list.md");
    std::fs::write(&path, "- bread\n").unwrap();
    let report = state.transfer.import_path(&path).await.unwrap();
    assert_eq!(report.imported, 1);
    assert_eq!(state.notes.list()[0].title, "Shopping list");
}
