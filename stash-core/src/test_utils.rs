//! Test utilities for stash-core.
//!
//! [`verify_storage`] runs the shared `Storage` contract against a backend so
//! every implementation, including ones in dependent crates, is held to the
//! same behaviour.

use crate::content::Content;
use crate::error::StashError;
use crate::key::Key;
use crate::lock::LOCKS_ROOT;
use crate::storage::{Exclusive, Storage};
use std::sync::Arc;

fn key(value: &str) -> Key {
    Key::parse(value).unwrap()
}

async fn text(storage: &Arc<dyn Storage>, value: &str) -> String {
    storage.value(&key(value)).await.unwrap().text().await.unwrap()
}

async fn save(storage: &Arc<dyn Storage>, value: &str, content: &'static str) {
    storage.save(&key(value), Content::from(content)).await.unwrap();
}

/// Runs every contract check against `storage`, which must start out empty.
pub async fn verify_storage(storage: Arc<dyn Storage>) {
    let name = storage.identifier();
    assert!(
        storage.list(&Key::root()).await.unwrap().is_empty(),
        "{} must start empty",
        name
    );

    verify_save_and_read(&storage).await;
    verify_list(&storage).await;
    verify_missing_keys(&storage).await;
    verify_root(&storage).await;
    verify_move_and_delete(&storage).await;
    verify_exclusively(&storage).await;

    storage.delete_all(&Key::root()).await.unwrap();
    assert!(storage.list(&Key::root()).await.unwrap().is_empty());
}

async fn verify_save_and_read(storage: &Arc<dyn Storage>) {
    save(storage, "save/value", "first").await;
    save(storage, "save/value", "second!").await;

    assert!(storage.exists(&key("save/value")).await.unwrap());
    assert!(!storage.exists(&key("save")).await.unwrap());
    assert_eq!(text(storage, "save/value").await, "second!");
    assert_eq!(storage.metadata(&key("save/value")).await.unwrap().size, 7);

    storage.save(&key("save/empty"), Content::empty()).await.unwrap();
    assert!(storage.exists(&key("save/empty")).await.unwrap());
    assert_eq!(text(storage, "save/empty").await, "");
    assert_eq!(storage.metadata(&key("save/empty")).await.unwrap().size, 0);
}

async fn verify_list(storage: &Arc<dyn Storage>) {
    for name in ["list/b/c", "list/bc", "list/b-2", "list/d"] {
        save(storage, name, "x").await;
    }

    assert_eq!(
        storage.list(&key("list/b")).await.unwrap(),
        vec![key("list/b-2"), key("list/b/c"), key("list/bc")]
    );
    assert_eq!(storage.list(&key("list")).await.unwrap().len(), 4);
    assert!(storage.list(&key("list/b/c/d")).await.unwrap().is_empty());
    // a prefix running through a stored value matches nothing
    assert!(storage.list(&key("list/d/e")).await.unwrap().is_empty());
    assert!(storage.list(&key("nothing")).await.unwrap().is_empty());

    let all = storage.list(&Key::root()).await.unwrap();
    let mut sorted = all.clone();
    sorted.sort();
    assert_eq!(all, sorted);
    assert!(all.contains(&key("list/d")));
}

async fn verify_missing_keys(storage: &Arc<dyn Storage>) {
    let missing = key("missing/key");

    assert!(!storage.exists(&missing).await.unwrap());
    assert!(storage.value(&missing).await.unwrap_err().is_not_found());
    assert!(storage.metadata(&missing).await.unwrap_err().is_not_found());
    assert!(storage.delete(&missing).await.unwrap_err().is_not_found());
    let moved = storage.move_key(&missing, &key("missing/other")).await;
    assert!(moved.unwrap_err().is_not_found());
    assert!(!storage.exists(&key("missing/other")).await.unwrap());
}

async fn verify_root(storage: &Arc<dyn Storage>) {
    assert!(!storage.exists(&Key::root()).await.unwrap());
    assert!(matches!(
        storage.save(&Key::root(), Content::from("x")).await,
        Err(StashError::InvalidOperation(_))
    ));
    assert!(matches!(
        storage.value(&Key::root()).await,
        Err(StashError::InvalidOperation(_))
    ));
}

async fn verify_move_and_delete(storage: &Arc<dyn Storage>) {
    save(storage, "move/source", "payload").await;
    save(storage, "move/target", "old").await;

    storage
        .move_key(&key("move/source"), &key("move/target"))
        .await
        .unwrap();
    assert!(!storage.exists(&key("move/source")).await.unwrap());
    assert_eq!(text(storage, "move/target").await, "payload");

    storage
        .move_key(&key("move/target"), &key("moved/deeper/value"))
        .await
        .unwrap();
    assert_eq!(text(storage, "moved/deeper/value").await, "payload");

    storage.delete(&key("moved/deeper/value")).await.unwrap();
    assert!(!storage.exists(&key("moved/deeper/value")).await.unwrap());
    assert!(storage.list(&key("moved")).await.unwrap().is_empty());
}

async fn verify_exclusively(storage: &Arc<dyn Storage>) {
    let result = storage
        .exclusively(&key("locked/index"), |inner| async move {
            let proposals = inner.list(&key(LOCKS_ROOT)).await?;
            inner
                .save(&key("locked/index"), Content::from("rebuilt"))
                .await?;
            Ok(proposals.len())
        })
        .await
        .unwrap();

    assert_eq!(result, 1);
    assert_eq!(text(storage, "locked/index").await, "rebuilt");
    assert!(storage.list(&key(LOCKS_ROOT)).await.unwrap().is_empty());

    let failed: crate::Result<()> = storage
        .exclusively(&key("locked/index"), |_inner| async {
            Err(StashError::Backend("operation failed".to_string()))
        })
        .await;
    assert!(matches!(failed, Err(StashError::Backend(_))));
    assert!(storage.list(&key(LOCKS_ROOT)).await.unwrap().is_empty());
}
