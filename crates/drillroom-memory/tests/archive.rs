use chrono::Utc;
use drillroom_memory::TranscriptArchive;
use drillroom_schema::{Message, MessageKind, Role};
use tempfile::TempDir;

#[tokio::test]
async fn archive_round_trips_messages_in_order() {
    let tmp = TempDir::new().unwrap();
    let archive = TranscriptArchive::new(tmp.path().join("transcripts"));

    archive.start_session("sess_1", Utc::now(), 90).await.unwrap();
    archive
        .append(&Message::system("sess_1", MessageKind::SessionStart, "Simulation started. Timer is running."))
        .await
        .unwrap();
    archive
        .append(&Message::new("sess_1", Role::Qa, MessageKind::Question, "First containment action?"))
        .await
        .unwrap();

    let loaded = archive.load_messages("sess_1").await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[1].role, Role::Qa);
    assert_eq!(loaded[1].text, "First containment action?");
}

#[tokio::test]
async fn restart_truncates_previous_archive() {
    let tmp = TempDir::new().unwrap();
    let archive = TranscriptArchive::new(tmp.path());

    archive.start_session("s", Utc::now(), 600).await.unwrap();
    archive
        .append(&Message::new("s", Role::Ba, MessageKind::Question, "ETA?"))
        .await
        .unwrap();
    archive.start_session("s", Utc::now(), 600).await.unwrap();

    assert!(archive.load_messages("s").await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_session_loads_empty_and_bad_lines_are_skipped() {
    let tmp = TempDir::new().unwrap();
    let archive = TranscriptArchive::new(tmp.path());
    assert!(archive.load_messages("nope").await.unwrap().is_empty());
    assert!(!archive.remove_session("nope").await.unwrap());

    archive
        .append(&Message::new("x", Role::TechLead, MessageKind::Question, "Rollback trigger?"))
        .await
        .unwrap();
    let path = tmp.path().join("x.jsonl");
    let mut content = tokio::fs::read_to_string(&path).await.unwrap();
    content.push_str("{not json}\n");
    tokio::fs::write(&path, content).await.unwrap();

    assert_eq!(archive.load_messages("x").await.unwrap().len(), 1);
    assert!(archive.remove_session("x").await.unwrap());
}

#[tokio::test]
async fn session_ids_are_sanitized_into_file_names() {
    let tmp = TempDir::new().unwrap();
    let archive = TranscriptArchive::new(tmp.path());
    archive
        .append(&Message::new("../escape", Role::Qa, MessageKind::Question, "hi"))
        .await
        .unwrap();
    assert!(tmp.path().join("___escape.jsonl").exists());
}
