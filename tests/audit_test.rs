//! Journal: day partitions, ordering, tolerance of damaged lines.

use std::fs;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use deputy::audit::{AuditLog, JournalLog};
use deputy::model::{Actor, LogEntry, State, WorkId};

fn entry(action: &str, day: u32, hour: u32) -> LogEntry {
    LogEntry::new(action, Actor::system("test"), action)
        .at(Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap())
}

#[test]
fn recent_spans_partitions_oldest_first() {
    let dir = tempfile::tempdir().unwrap();
    let log = JournalLog::open(dir.path()).unwrap();
    log.append(&entry("a", 1, 9)).unwrap();
    log.append(&entry("b", 1, 10)).unwrap();
    log.append(&entry("c", 2, 8)).unwrap();
    log.append(&entry("d", 3, 7)).unwrap();

    assert!(dir.path().join("2026-03-01.json").exists());
    assert_eq!(log.partitions().unwrap().len(), 3);

    let recent: Vec<String> = log
        .recent(3)
        .unwrap()
        .into_iter()
        .map(|e| e.action_type)
        .collect();
    assert_eq!(recent, ["b", "c", "d"]);
    assert_eq!(log.recent(100).unwrap().len(), 4);
}

#[test]
fn entries_for_an_item_follow_its_history() {
    let dir = tempfile::tempdir().unwrap();
    let log = JournalLog::open(dir.path()).unwrap();
    let id = WorkId::new();
    let other = WorkId::new();

    log.append(&entry("create", 1, 9).for_item(id).states(None, State::Intake))
        .unwrap();
    log.append(&entry("create", 1, 9).for_item(other)).unwrap();
    log.append(
        &entry("triage", 2, 9)
            .for_item(id)
            .states(Some(State::Intake), State::NeedsAction),
    )
    .unwrap();

    let history = log.entries_for(id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].to, Some(State::NeedsAction));
}

#[test]
fn damaged_lines_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let log = JournalLog::open(dir.path()).unwrap();
    log.append(&entry("good", 5, 9)).unwrap();
    let path = dir.path().join("2026-03-05.json");
    let mut text = fs::read_to_string(&path).unwrap();
    text.push_str("{\"truncated\": \n");
    fs::write(&path, text).unwrap();
    log.append(&entry("after", 5, 10)).unwrap();

    let entries = log.read_partition(Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap().date_naive());
    let actions: Vec<String> = entries.unwrap().into_iter().map(|e| e.action_type).collect();
    assert_eq!(actions, ["good", "after"]);
}

#[test]
fn concurrent_appends_keep_every_line_intact() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(JournalLog::open(dir.path()).unwrap());

    let threads: Vec<_> = (0..8)
        .map(|t| {
            let log = log.clone();
            std::thread::spawn(move || {
                for i in 0..25 {
                    log.append(&entry(&format!("t{t}-{i}"), 7, 12)).unwrap();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(log.recent(1000).unwrap().len(), 200);
}
