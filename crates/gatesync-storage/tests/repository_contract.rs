use std::sync::Arc;

use gatesync_core::{ApiKey, RefreshWindow, Watermark};
use gatesync_storage::{ApiKeyCriteria, ApiKeyRepository, InMemoryRepository};
use time::macros::datetime;

fn key(key: &str, plan: &str, updated_at: time::OffsetDateTime, revoked: bool) -> ApiKey {
    ApiKey {
        key: key.to_string(),
        api: "api-1".to_string(),
        plan: plan.to_string(),
        subscription: format!("sub-{key}"),
        application: "app-1".to_string(),
        revoked,
        paused: false,
        expire_at: None,
        updated_at,
    }
}

#[tokio::test]
async fn incremental_windows_partition_modifications_without_gaps() {
    let repo = Arc::new(InMemoryRepository::new());
    repo.put_api_key(key("a", "p1", datetime!(2024-01-01 10:00 UTC), false));
    repo.put_api_key(key("b", "p1", datetime!(2024-01-01 10:05 UTC), true));
    repo.put_api_key(key("c", "p1", datetime!(2024-01-01 10:10 UTC), false));

    let t1 = datetime!(2024-01-01 10:05 UTC);
    let t2 = datetime!(2024-01-01 10:15 UTC);

    let first = repo
        .find_by_criteria(&ApiKeyCriteria::incremental(
            ["p1"],
            RefreshWindow::new(Watermark::Never, t1),
        ))
        .await
        .unwrap();
    let second = repo
        .find_by_criteria(&ApiKeyCriteria::incremental(
            ["p1"],
            RefreshWindow::new(Watermark::At(t1), t2),
        ))
        .await
        .unwrap();

    let mut first_keys: Vec<_> = first.iter().map(|k| k.key.as_str()).collect();
    let mut second_keys: Vec<_> = second.iter().map(|k| k.key.as_str()).collect();
    first_keys.sort();
    second_keys.sort();

    // Key "b" sits exactly on the boundary: it belongs to the second window only.
    assert_eq!(first_keys, vec!["a"]);
    assert_eq!(second_keys, vec!["b", "c"]);
}

#[tokio::test]
async fn full_lookup_ignores_modification_time_but_skips_revoked() {
    let repo = InMemoryRepository::new();
    repo.put_api_key(key("a", "p1", datetime!(2001-01-01 0:00 UTC), false));
    repo.put_api_key(key("b", "p1", datetime!(2030-01-01 0:00 UTC), false));
    repo.put_api_key(key("c", "p1", datetime!(2020-01-01 0:00 UTC), true));

    let keys = repo
        .find_by_criteria(&ApiKeyCriteria::full(["p1"]))
        .await
        .unwrap();
    assert_eq!(keys.len(), 2);
    assert!(keys.iter().all(|k| !k.revoked));
}
