//! Watchers feeding the engine.

use std::fs;

use async_trait::async_trait;
use deputy::engine::Engine;
use deputy::error::Result;
use deputy::model::{ItemType, LogResult, NewWorkItem, State};
use deputy::watcher::{self, DropFolderWatcher, Watcher};

#[tokio::test]
async fn dropped_files_become_items_once() {
    let drop = tempfile::tempdir().unwrap();
    fs::write(drop.path().join("invoice.pdf"), vec![0u8; 2048]).unwrap();
    fs::write(drop.path().join("notes.txt"), "call back").unwrap();
    fs::write(drop.path().join(".gitkeep"), "").unwrap();
    fs::create_dir(drop.path().join("archive")).unwrap();

    let engine = Engine::in_memory();
    let watcher = DropFolderWatcher::new(drop.path());

    let first = watcher::ingest(&engine, &watcher).await.unwrap();
    assert_eq!(first.created, 2);
    assert_eq!(first.duplicates, 0);

    let second = watcher::ingest(&engine, &watcher).await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.duplicates, 2);

    let items = engine.list_by_state(Some(State::NeedsAction)).unwrap();
    assert_eq!(items.len(), 2);
    let invoice = items
        .iter()
        .find(|i| i.field_str("original_name") == Some("invoice.pdf"))
        .unwrap();
    assert_eq!(invoice.item_type, ItemType::FileDrop);
    assert_eq!(invoice.source.watcher, "drop_folder");
    assert_eq!(invoice.source.external_id.as_deref(), Some("invoice.pdf"));
    assert_eq!(invoice.field_str("file_type"), Some("document"));
    assert_eq!(invoice.fields["size_bytes"], 2048);
    assert!(invoice.body.contains("2.0 KB"));
}

#[tokio::test]
async fn missing_drop_folder_is_created() {
    let parent = tempfile::tempdir().unwrap();
    let dir = parent.path().join("Drop_Folder");
    let watcher = DropFolderWatcher::new(&dir);

    assert!(watcher.poll().await.unwrap().is_empty());
    assert!(dir.is_dir());
}

/// Emits one good and one malformed submission.
struct MixedWatcher;

#[async_trait]
impl Watcher for MixedWatcher {
    fn name(&self) -> &str {
        "mixed"
    }

    async fn poll(&self) -> Result<Vec<NewWorkItem>> {
        Ok(vec![
            NewWorkItem::new(ItemType::Task, "mixed").external_id("ok-1"),
            NewWorkItem::new(ItemType::Task, "mixed").external_id("bad\nid"),
        ])
    }
}

#[tokio::test]
async fn malformed_submissions_are_logged_and_skipped() {
    let engine = Engine::in_memory();
    let report = watcher::ingest(&engine, &MixedWatcher).await.unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(engine.list_by_state(None).unwrap().len(), 1);

    let last = engine.recent_logs(1).unwrap().pop().unwrap();
    assert_eq!(last.action_type, "submission_rejected");
    assert_eq!(last.result, LogResult::Failure);
    assert_eq!(last.item_id, None);
}
