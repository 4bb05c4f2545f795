//! Exercises the human_notes/ai_meta pair the way `note_metadata::tag_batch`
//! does, minus the LLM call: insert a note, tag it, touch it again unchanged
//! (must be a no-op), then edit its body (must produce a fresh row keyed on
//! the new `source_hash`). Runs against real files under a temp directory
//! rather than `:memory:` connections, so it also covers `open_pool`'s WAL
//! setup and schema creation across two independently-pooled databases.

use historian::store::{ai_meta, human_notes, open_pool};

fn source_hash(notes_type: &str, topic: &str, updated_at: &str, note: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(notes_type.as_bytes());
    hasher.update(b"\n");
    hasher.update(topic.as_bytes());
    hasher.update(b"\n");
    hasher.update(updated_at.as_bytes());
    hasher.update(b"\n");
    hasher.update(note.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[test]
fn editing_a_note_produces_a_fresh_metadata_row_keyed_on_its_hash() {
    let dir = tempfile::tempdir().unwrap();

    let notes_pool = open_pool(&dir.path().join("human_notes.db")).unwrap();
    let notes_conn = notes_pool.get().unwrap();
    human_notes::ensure_schema(&notes_conn).unwrap();

    let meta_pool = open_pool(&dir.path().join("notes_ai_metadata.db")).unwrap();
    let meta_conn = meta_pool.get().unwrap();
    ai_meta::ensure_schema(&meta_conn).unwrap();

    let note_id = human_notes::insert_note(&notes_conn, "manual", "deploys", "rolled out v1").unwrap();
    let notes = human_notes::load_notes_since(&notes_conn, 0, 10).unwrap();
    let row = notes.iter().find(|n| n.id == note_id).unwrap();

    let hash_v1 = source_hash(&row.notes_type, &row.topic, &row.updated_at, &row.note);
    assert!(!ai_meta::already_done(&meta_conn, note_id, &hash_v1).unwrap());

    ai_meta::upsert_meta(
        &meta_conn,
        &ai_meta::NoteMeta {
            note_id,
            parent_id: 0,
            notes_type: &row.notes_type,
            topic: &row.topic,
            source_hash: &hash_v1,
            model_name: "test-model",
            meta_json: r#"{"tags":["deploy"]}"#,
            summary: "rolled out v1",
            tags_csv: "deploy",
        },
    )
    .unwrap();

    // Re-running against the same content is a no-op: the hash is unchanged.
    assert!(ai_meta::already_done(&meta_conn, note_id, &hash_v1).unwrap());

    // The note changes - a re-tag must see a different hash and not be
    // mistaken for already-done.
    let hash_v2 = source_hash(&row.notes_type, &row.topic, &row.updated_at, "rolled out v2, fixed migration");
    assert_ne!(hash_v1, hash_v2);
    assert!(!ai_meta::already_done(&meta_conn, note_id, &hash_v2).unwrap());

    ai_meta::upsert_meta(
        &meta_conn,
        &ai_meta::NoteMeta {
            note_id,
            parent_id: 0,
            notes_type: &row.notes_type,
            topic: &row.topic,
            source_hash: &hash_v2,
            model_name: "test-model",
            meta_json: r#"{"tags":["deploy","fix"]}"#,
            summary: "rolled out v2, fixed migration",
            tags_csv: "deploy,fix",
        },
    )
    .unwrap();

    let count: i64 = meta_conn
        .query_row("SELECT COUNT(*) FROM ai_note_meta WHERE note_id = ?1", [note_id], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 2);
}
