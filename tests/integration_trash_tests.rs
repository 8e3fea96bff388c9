//! Trash lifecycle tests: soft delete, restore, permanent delete, purge.

mod helpers;

use chrono::Utc;
use davbox::errors::GatewayError;

#[tokio::test]
async fn test_soft_delete_relocates_blob_and_keeps_quota() {
    let ctx = helpers::setup().await;
    let user = ctx.create_user("trasher").await;

    let key = ctx.key(user.id, "docs/a.txt");
    let record = ctx.engines.files.upload(user.id, &key, b"hello").await.unwrap();

    let trashed = ctx.engines.trash.soft_delete(record.id).await.expect("soft delete");

    assert!(trashed.is_deleted);
    assert!(trashed.deleted_at.is_some());
    assert_eq!(trashed.original_key, key);
    assert!(trashed.trash_name.starts_with("a__"));
    assert!(trashed.trash_name.ends_with(".txt"));

    // The blob moves to the trash key, freeing the visible key; the bytes
    // stay reachable through the record and quota stays charged.
    assert_ne!(trashed.storage_key, key);
    assert_eq!(
        trashed.storage_key,
        ctx.key(user.id, &format!(".trash/{}", trashed.trash_name))
    );
    assert_eq!(ctx.engines.blob.get(&trashed.storage_key).await.unwrap(), b"hello");
    assert!(!ctx.engines.blob.exists(&key).await.unwrap());
    assert_eq!(ctx.used_bytes(user.id).await, 5);

    // Gone from the live view, present in the trash view.
    assert!(ctx.db.get_file_by_key(user.id, &key).await.unwrap().is_none());
    let listed = ctx.engines.trash.list_trash(user.id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].original_filename(), "a.txt");
}

#[tokio::test]
async fn test_reupload_after_soft_delete_takes_the_original_key() {
    let ctx = helpers::setup().await;
    let user = ctx.create_user("reuploader").await;

    let key = ctx.key(user.id, "r.txt");
    let original = ctx.engines.files.upload(user.id, &key, b"A").await.unwrap();
    ctx.engines.trash.soft_delete(original.id).await.unwrap();

    // The vacated key is taken cleanly, no collision suffix.
    let replacement = ctx.engines.files.upload(user.id, &key, b"B").await.unwrap();
    assert_eq!(replacement.storage_key, key);
    assert_eq!(ctx.engines.blob.get(&key).await.unwrap(), b"B");
}

#[tokio::test]
async fn test_soft_delete_twice_fails() {
    let ctx = helpers::setup().await;
    let user = ctx.create_user("twice").await;

    let record = ctx
        .engines
        .files
        .upload(user.id, &ctx.key(user.id, "x.txt"), b"x")
        .await
        .unwrap();
    ctx.engines.trash.soft_delete(record.id).await.unwrap();

    let err = ctx.engines.trash.soft_delete(record.id).await.unwrap_err();
    assert!(matches!(err, GatewayError::NotFound));
}

#[tokio::test]
async fn test_restore_to_original_path_preserves_tags() {
    let ctx = helpers::setup().await;
    let user = ctx.create_user("restorer").await;

    let key = ctx.key(user.id, "docs/keep.txt");
    let record = ctx.engines.files.upload(user.id, &key, b"content").await.unwrap();
    let tag = ctx.db.create_tag(user.id, "important", "").await.unwrap();
    ctx.db.add_tag_to_file(record.id, tag.id).await.unwrap();

    ctx.engines.trash.soft_delete(record.id).await.unwrap();
    let restored = ctx.engines.trash.restore(record.id, None).await.expect("restore");

    assert!(!restored.is_deleted);
    assert!(restored.deleted_at.is_none());
    assert_eq!(restored.storage_key, key);
    assert_eq!(restored.trash_name, "");
    assert_eq!(ctx.engines.blob.get(&key).await.unwrap(), b"content");

    let tags = ctx.db.list_tags_for_file(record.id).await.unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].name, "important");
}

#[tokio::test]
async fn test_restore_conflict_renames_with_restored_suffix() {
    let ctx = helpers::setup().await;
    let user = ctx.create_user("conflicted").await;

    let key = ctx.key(user.id, "r.txt");

    // Original content "A" goes to trash, then "B" takes the path.
    let original = ctx.engines.files.upload(user.id, &key, b"A").await.unwrap();
    ctx.engines.trash.soft_delete(original.id).await.unwrap();
    ctx.engines.files.upload(user.id, &key, b"B").await.unwrap();

    let restored = ctx
        .engines
        .trash
        .restore(original.id, None)
        .await
        .expect("restore with rename");

    let renamed_key = ctx.key(user.id, "r (restored).txt");
    assert_eq!(restored.storage_key, renamed_key);
    assert_eq!(ctx.engines.blob.get(&renamed_key).await.unwrap(), b"A");

    // The newer file is untouched.
    assert_eq!(ctx.engines.blob.get(&key).await.unwrap(), b"B");
    assert!(ctx.db.get_file_by_key(user.id, &key).await.unwrap().is_some());
}

#[tokio::test]
async fn test_restore_recreates_parent_marker() {
    let ctx = helpers::setup().await;
    let user = ctx.create_user("markerback").await;

    let key = ctx.key(user.id, "folder/only.txt");
    let record = ctx.engines.files.upload(user.id, &key, b"solo").await.unwrap();
    ctx.engines.trash.soft_delete(record.id).await.unwrap();

    // The folder has no live members now; restore must bring the marker
    // back so the folder exists for the restored file.
    ctx.engines.trash.restore(record.id, None).await.unwrap();

    let marker = ctx.key(user.id, "folder/.folder");
    assert!(ctx.db.get_file_by_key(user.id, &marker).await.unwrap().is_some());
}

#[tokio::test]
async fn test_restore_to_custom_destination() {
    let ctx = helpers::setup().await;
    let user = ctx.create_user("rehomed").await;

    let key = ctx.key(user.id, "old/place.txt");
    let record = ctx.engines.files.upload(user.id, &key, b"move me").await.unwrap();
    ctx.engines.trash.soft_delete(record.id).await.unwrap();

    let dest = ctx.key(user.id, "new/home.txt");
    let restored = ctx
        .engines
        .trash
        .restore(record.id, Some(&dest))
        .await
        .expect("restore to destination");

    assert_eq!(restored.storage_key, dest);
    assert_eq!(ctx.engines.blob.get(&dest).await.unwrap(), b"move me");
    assert!(!ctx.engines.blob.exists(&key).await.unwrap());
}

#[tokio::test]
async fn test_permanent_delete_releases_everything() {
    let ctx = helpers::setup().await;
    let user = ctx.create_user("permanent").await;

    let key = ctx.key(user.id, "doomed.txt");
    let record = ctx.engines.files.upload(user.id, &key, b"doomed").await.unwrap();
    ctx.engines.trash.soft_delete(record.id).await.unwrap();
    assert_eq!(ctx.used_bytes(user.id).await, 6);

    ctx.engines
        .trash
        .permanent_delete(record.id)
        .await
        .expect("permanent delete");

    assert!(ctx.db.get_file_by_id(record.id).await.unwrap().is_none());
    assert!(!ctx.engines.blob.exists(&key).await.unwrap());
    assert_eq!(ctx.used_bytes(user.id).await, 0);
}

#[tokio::test]
async fn test_permanent_delete_requires_trashed_state() {
    let ctx = helpers::setup().await;
    let user = ctx.create_user("guard").await;

    let record = ctx
        .engines
        .files
        .upload(user.id, &ctx.key(user.id, "live.txt"), b"live")
        .await
        .unwrap();

    let err = ctx.engines.trash.permanent_delete(record.id).await.unwrap_err();
    assert!(matches!(err, GatewayError::NotFound));
}

#[tokio::test]
async fn test_empty_trash_counts_deletions() {
    let ctx = helpers::setup().await;
    let user = ctx.create_user("emptier").await;

    for name in ["a.txt", "b.txt", "c.txt"] {
        let record = ctx
            .engines
            .files
            .upload(user.id, &ctx.key(user.id, name), b"zz")
            .await
            .unwrap();
        ctx.engines.trash.soft_delete(record.id).await.unwrap();
    }

    let count = ctx.engines.trash.empty_trash(user.id).await.expect("empty");
    assert_eq!(count, 3);
    assert!(ctx.engines.trash.list_trash(user.id).await.unwrap().is_empty());
    assert_eq!(ctx.used_bytes(user.id).await, 0);
}

#[tokio::test]
async fn test_purge_drops_only_expired_entries() {
    let ctx = helpers::setup().await;
    let user = ctx.create_user("purger").await;

    let old_key = ctx.key(user.id, "old.bin");
    let old = ctx
        .engines
        .files
        .upload(user.id, &old_key, &[0u8; 200])
        .await
        .unwrap();
    ctx.engines.trash.soft_delete(old.id).await.unwrap();
    ctx.age_trash_entry(old.id, 31).await;

    let young_key = ctx.key(user.id, "young.bin");
    let young = ctx
        .engines
        .files
        .upload(user.id, &young_key, &[0u8; 50])
        .await
        .unwrap();
    ctx.engines.trash.soft_delete(young.id).await.unwrap();
    ctx.age_trash_entry(young.id, 29).await;

    let used_before = ctx.used_bytes(user.id).await;
    assert_eq!(used_before, 250);

    let purged = ctx
        .engines
        .trash
        .purge_expired(Utc::now(), 10)
        .await
        .expect("purge");
    assert_eq!(purged, 1);

    // The aged entry is gone entirely; the younger sibling is untouched.
    assert!(ctx.db.get_file_by_id(old.id).await.unwrap().is_none());
    assert!(!ctx.engines.blob.exists(&old_key).await.unwrap());
    assert_eq!(ctx.used_bytes(user.id).await, 50);
    assert!(ctx.db.get_file_by_id(young.id).await.unwrap().is_some());

    // Re-running finds nothing new.
    let again = ctx.engines.trash.purge_expired(Utc::now(), 10).await.unwrap();
    assert_eq!(again, 0);
}

#[tokio::test]
async fn test_trash_lookup_by_original_name() {
    let ctx = helpers::setup().await;
    let user = ctx.create_user("finder").await;

    let record = ctx
        .engines
        .files
        .upload(user.id, &ctx.key(user.id, "nested/report.pdf"), b"%PDF")
        .await
        .unwrap();
    ctx.engines.trash.soft_delete(record.id).await.unwrap();

    let found = ctx
        .engines
        .trash
        .find_by_original_name(user.id, "report.pdf")
        .await
        .unwrap();
    assert_eq!(found.map(|r| r.id), Some(record.id));

    let missing = ctx
        .engines
        .trash
        .find_by_original_name(user.id, "nope.pdf")
        .await
        .unwrap();
    assert!(missing.is_none());
}
