//! Wire type tests

use coucher::{BulkResult, ChangeEvent, DatabaseInfo, Document, Error, WriteResult};
use serde_json::json;

#[test]
fn test_document_accessors() {
    let mut doc = Document::try_from(json!({"_id": "alice", "_rev": "1-abc", "age": 30})).unwrap();

    assert_eq!(doc.id(), Some("alice"));
    assert_eq!(doc.rev(), Some("1-abc"));
    assert_eq!(doc.get("age"), Some(&json!(30)));

    doc.insert("age", 31);
    assert_eq!(doc.get("age"), Some(&json!(31)));
    assert_eq!(doc.remove("_rev"), Some(json!("1-abc")));
    assert_eq!(doc.rev(), None);
    assert_eq!(doc.fields().len(), 2);
}

#[test]
fn test_document_requires_object() {
    assert!(matches!(Document::try_from(json!([1, 2])), Err(Error::Parse(_))));
    assert!(matches!(Document::try_from(json!("doc")), Err(Error::Parse(_))));
}

#[test]
fn test_document_serializes_transparently() {
    let doc = Document::try_from(json!({"_id": "x", "tags": ["a"]})).unwrap();
    assert_eq!(serde_json::to_value(&doc).unwrap(), json!({"_id": "x", "tags": ["a"]}));

    let parsed: Document = serde_json::from_str(r#"{"_id":"y","n":null}"#).unwrap();
    assert_eq!(parsed.id(), Some("y"));
    assert_eq!(parsed.get("n"), Some(&json!(null)));
}

#[test]
fn test_document_display() {
    let doc = Document::try_from(json!({"_id": "alice", "_rev": "2-b"})).unwrap();
    assert_eq!(doc.to_string(), "<Document id=alice rev=2-b>");
    assert_eq!(Document::new().to_string(), "<Document id=- rev=->");
}

#[test]
fn test_change_event_fields() {
    let event = ChangeEvent::Change(json!({
        "seq": "3-g1A",
        "id": "alice",
        "changes": [{"rev": "2-b"}],
        "deleted": true,
        "doc": {"_id": "alice", "_deleted": true}
    }));

    assert!(!event.is_heartbeat());
    assert_eq!(event.seq(), Some(&json!("3-g1A")));
    assert_eq!(event.id(), Some("alice"));
    assert!(event.deleted());
    assert_eq!(event.doc().unwrap()["_deleted"], json!(true));
}

#[test]
fn test_heartbeat_is_empty_object() {
    let beat = ChangeEvent::Heartbeat;
    assert!(beat.is_heartbeat());
    assert_eq!(beat.id(), None);
    assert!(!beat.deleted());
    assert_eq!(beat.into_value(), json!({}));
}

#[test]
fn test_write_result() {
    let result: WriteResult = serde_json::from_value(json!({"ok": true, "id": "a", "rev": "1-x"})).unwrap();
    assert!(result.ok);
    assert_eq!(result.id, "a");
    assert_eq!(result.rev, "1-x");
}

#[test]
fn test_bulk_result() {
    let ok: BulkResult = serde_json::from_value(json!({"ok": true, "id": "a", "rev": "1-x"})).unwrap();
    assert!(ok.is_ok());
    assert_eq!(ok.rev.as_deref(), Some("1-x"));

    let failed: BulkResult =
        serde_json::from_value(json!({"id": "b", "error": "conflict", "reason": "Document update conflict."}))
            .unwrap();
    assert!(!failed.is_ok());
    assert_eq!(failed.reason.as_deref(), Some("Document update conflict."));
}

#[test]
fn test_database_info_keeps_unknown_fields() {
    let info: DatabaseInfo = serde_json::from_value(json!({
        "db_name": "test",
        "doc_count": 3,
        "update_seq": "5-g1A",
        "purge_seq": "0-g1A",
        "instance_start_time": "0"
    }))
    .unwrap();

    assert_eq!(info.db_name, "test");
    assert_eq!(info.doc_count, 3);
    assert_eq!(info.doc_del_count, 0);
    assert_eq!(info.update_seq, json!("5-g1A"));
    assert_eq!(info.other.get("purge_seq"), Some(&json!("0-g1A")));
}
