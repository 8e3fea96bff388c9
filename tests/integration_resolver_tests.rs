//! Resolver tests: kind resolution, path safety and per-user isolation.

mod helpers;

use davbox::dav::resolver::{Resolver, Resource};

#[tokio::test]
async fn test_resolve_root_and_trash_root() {
    let ctx = helpers::setup().await;
    let user = ctx.create_user("roots").await;
    let resolver = Resolver::new(&ctx.engines, user.id);

    assert!(matches!(
        resolver.resolve("/").await.unwrap(),
        Some(Resource::Root)
    ));
    assert!(matches!(
        resolver.resolve("/.Trash").await.unwrap(),
        Some(Resource::TrashRoot)
    ));
    assert!(matches!(
        resolver.resolve("/.Trash/").await.unwrap(),
        Some(Resource::TrashRoot)
    ));
}

#[tokio::test]
async fn test_resolve_file_and_folder() {
    let ctx = helpers::setup().await;
    let user = ctx.create_user("shapes").await;

    ctx.engines
        .files
        .upload(user.id, &ctx.key(user.id, "docs/a.txt"), b"hello")
        .await
        .unwrap();

    let resolver = Resolver::new(&ctx.engines, user.id);

    match resolver.resolve("/docs/a.txt").await.unwrap() {
        Some(Resource::File(record)) => {
            assert_eq!(record.size_bytes, 5);
            assert_eq!(record.mime_type, "text/plain");
        }
        other => panic!("expected File, got {:?}", other),
    }

    assert!(matches!(
        resolver.resolve("/docs").await.unwrap(),
        Some(Resource::Folder { .. })
    ));

    assert!(resolver.resolve("/docs/missing.txt").await.unwrap().is_none());
    assert!(resolver.resolve("/nowhere").await.unwrap().is_none());
}

#[tokio::test]
async fn test_marker_file_materializes_empty_folder() {
    let ctx = helpers::setup().await;
    let user = ctx.create_user("mkcol").await;

    ctx.engines
        .files
        .upload(user.id, &ctx.key(user.id, "empty/.folder"), b"")
        .await
        .unwrap();

    let resolver = Resolver::new(&ctx.engines, user.id);
    assert!(matches!(
        resolver.resolve("/empty").await.unwrap(),
        Some(Resource::Folder { .. })
    ));

    // The marker itself never shows in listings.
    let children = ctx
        .engines
        .files
        .direct_children(user.id, &ctx.key(user.id, "empty"))
        .await
        .unwrap();
    assert!(children.is_empty());
}

#[tokio::test]
async fn test_resolve_trash_item_by_original_name() {
    let ctx = helpers::setup().await;
    let user = ctx.create_user("trashview").await;

    let record = ctx
        .engines
        .files
        .upload(user.id, &ctx.key(user.id, "deep/photo.jpg"), b"jpeg")
        .await
        .unwrap();
    ctx.engines.trash.soft_delete(record.id).await.unwrap();

    let resolver = Resolver::new(&ctx.engines, user.id);

    match resolver.resolve("/.Trash/photo.jpg").await.unwrap() {
        Some(Resource::TrashItem(item)) => assert_eq!(item.id, record.id),
        other => panic!("expected TrashItem, got {:?}", other),
    }

    // The live path no longer resolves.
    assert!(resolver.resolve("/deep/photo.jpg").await.unwrap().is_none());
    assert!(resolver.resolve("/.Trash/other.jpg").await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_paths_resolve_to_nothing() {
    let ctx = helpers::setup().await;
    let user = ctx.create_user("validator").await;

    // Even with data present, traversal and NUL paths must resolve to None.
    ctx.engines
        .files
        .upload(user.id, &ctx.key(user.id, "secret.txt"), b"s")
        .await
        .unwrap();

    let resolver = Resolver::new(&ctx.engines, user.id);
    assert!(resolver.resolve("/../secret.txt").await.unwrap().is_none());
    assert!(resolver.resolve("/docs/../secret.txt").await.unwrap().is_none());
    assert!(resolver.resolve("/secret\0.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn test_users_cannot_see_each_other() {
    let ctx = helpers::setup().await;
    let alice = ctx.create_user("alice").await;
    let bob = ctx.create_user("bob").await;

    ctx.engines
        .files
        .upload(alice.id, &ctx.key(alice.id, "private.txt"), b"hers")
        .await
        .unwrap();

    let bob_resolver = Resolver::new(&ctx.engines, bob.id);
    assert!(bob_resolver.resolve("/private.txt").await.unwrap().is_none());

    // Even addressing Alice's namespace explicitly maps inside Bob's own.
    assert!(bob_resolver
        .resolve(&format!("/{}/private.txt", alice.id))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_resolve_for_create_requires_existing_parent() {
    let ctx = helpers::setup().await;
    let user = ctx.create_user("creator").await;

    ctx.engines
        .files
        .upload(user.id, &ctx.key(user.id, "docs/a.txt"), b"a")
        .await
        .unwrap();

    let resolver = Resolver::new(&ctx.engines, user.id);

    // Root and existing folders accept new children.
    match resolver.resolve_for_create("/new.txt").await.unwrap() {
        Some(Resource::NewFile { storage_key }) => {
            assert_eq!(storage_key, ctx.key(user.id, "new.txt"));
        }
        other => panic!("expected NewFile, got {:?}", other),
    }
    assert!(resolver.resolve_for_create("/docs/b.txt").await.unwrap().is_some());

    // Missing parents and the trash do not.
    assert!(resolver.resolve_for_create("/ghost/b.txt").await.unwrap().is_none());
    assert!(resolver
        .resolve_for_create("/.Trash/b.txt")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_upload_then_delete_scenario() {
    // Upload -> list -> delete -> trash listing, the canonical round trip.
    let ctx = helpers::setup().await;
    let user = ctx.create_user("scenario").await;

    let key = ctx.key(user.id, "docs/a.txt");
    let record = ctx.engines.files.upload(user.id, &key, b"hello").await.unwrap();

    let children = ctx
        .engines
        .files
        .direct_children(user.id, &ctx.key(user.id, "docs"))
        .await
        .unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name, "a.txt");

    ctx.engines.trash.soft_delete(record.id).await.unwrap();

    let children = ctx
        .engines
        .files
        .direct_children(user.id, &ctx.key(user.id, "docs"))
        .await
        .unwrap();
    assert!(children.is_empty());

    let trash = ctx.engines.trash.list_trash(user.id).await.unwrap();
    assert_eq!(trash.len(), 1);
    assert_eq!(trash[0].original_filename(), "a.txt");

    // Quota only drops on permanent delete.
    assert_eq!(ctx.used_bytes(user.id).await, 5);
    ctx.engines.trash.permanent_delete(record.id).await.unwrap();
    assert_eq!(ctx.used_bytes(user.id).await, 0);
}
