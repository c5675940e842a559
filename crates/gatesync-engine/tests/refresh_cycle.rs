//! Incremental cycle behaviour: chunking, gating, failure containment and
//! watermark movement.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use gatesync_core::{
    Api, ApiKey, Plan, PlanSecurityType, Subscription, SubscriptionStatus, Watermark,
};
use gatesync_engine::{
    ApiKeyCache, ApiKeyRefresher, Clock, CycleOutcome, LocalApiKeyCache, MastershipGate,
    PlanRegistry, RefreshOrchestrator, StaticCluster, WorkerPool,
};
use gatesync_storage::InMemoryRepository;
use time::OffsetDateTime;
use time::macros::datetime;

#[derive(Clone)]
struct TestClock(Arc<Mutex<OffsetDateTime>>);

impl TestClock {
    fn new(start: OffsetDateTime) -> Self {
        Self(Arc::new(Mutex::new(start)))
    }

    fn now(&self) -> OffsetDateTime {
        *self.0.lock().unwrap()
    }

    fn advance(&self, by: time::Duration) {
        *self.0.lock().unwrap() += by;
    }

    fn clock(&self) -> Clock {
        let inner = Arc::clone(&self.0);
        Arc::new(move || *inner.lock().unwrap())
    }
}

struct Fixture {
    repo: Arc<InMemoryRepository>,
    cache: Arc<LocalApiKeyCache>,
    cluster: Arc<StaticCluster>,
    registry: Arc<PlanRegistry>,
    clock: TestClock,
    orchestrator: RefreshOrchestrator,
}

fn fixture(bulk_items: usize, distributed: bool) -> Fixture {
    let repo = Arc::new(InMemoryRepository::new());
    let cache = LocalApiKeyCache::new_shared();
    let cluster = Arc::new(StaticCluster::new(true));
    let registry = Arc::new(PlanRegistry::new());
    let clock = TestClock::new(datetime!(2024-03-01 12:00 UTC));

    let orchestrator = RefreshOrchestrator::new(
        Arc::clone(&registry),
        ApiKeyRefresher::new(repo.clone(), repo.clone(), cache.clone()),
        WorkerPool::new(4, Duration::from_secs(5)),
        MastershipGate::new(cluster.clone(), distributed),
        bulk_items,
    )
    .with_clock(clock.clock());

    Fixture {
        repo,
        cache,
        cluster,
        registry,
        clock,
        orchestrator,
    }
}

fn plan_id(i: usize) -> String {
    format!("p{i:03}")
}

/// One API carrying `count` API-key plans.
fn api_with_plans(id: &str, count: usize) -> Api {
    (0..count).fold(Api::new(id), |api, i| {
        api.with_plan(Plan::new(plan_id(i), PlanSecurityType::ApiKey))
    })
}

fn key(value: &str, plan: &str, updated_at: OffsetDateTime) -> ApiKey {
    ApiKey {
        key: value.into(),
        api: "api-1".into(),
        plan: plan.into(),
        subscription: format!("sub-{value}"),
        application: "app-1".into(),
        revoked: false,
        paused: false,
        expire_at: None,
        updated_at,
    }
}

#[tokio::test]
async fn chunk_count_is_ceil_of_plans_over_bulk_items() {
    for (plans, bulk, expected) in [(1, 100, 1), (100, 100, 1), (101, 100, 2), (250, 100, 3), (7, 2, 4)] {
        let mut f = fixture(bulk, false);
        f.registry.register(&[api_with_plans("api-1", plans)]);

        let outcome = f.orchestrator.run_cycle().await;

        assert!(matches!(outcome, CycleOutcome::Completed { chunks, .. } if chunks == expected));
        let criteria = f.repo.criteria_log();
        assert_eq!(criteria.len(), expected, "{plans} plans, bulk {bulk}");
        assert!(criteria.iter().all(|c| c.plans.len() <= bulk));
        let covered: usize = criteria.iter().map(|c| c.plans.len()).sum();
        assert_eq!(covered, plans);
    }
}

#[tokio::test]
async fn plans_shared_by_apis_are_queried_once() {
    let mut f = fixture(100, false);
    f.registry.register(&[api_with_plans("api-1", 3), api_with_plans("api-2", 3)]);

    f.orchestrator.run_cycle().await;

    let criteria = f.repo.criteria_log();
    assert_eq!(criteria.len(), 1);
    assert_eq!(criteria[0].plans.len(), 3);
}

#[tokio::test]
async fn empty_registry_advances_watermark_without_store_calls() {
    let mut f = fixture(100, false);

    let outcome = f.orchestrator.run_cycle().await;

    assert_eq!(
        outcome,
        CycleOutcome::Idle {
            watermark: Watermark::At(f.clock.now())
        }
    );
    assert_eq!(f.orchestrator.watermark(), Watermark::At(f.clock.now()));
    assert_eq!(f.repo.total_queries(), 0);
}

#[tokio::test]
async fn non_master_in_distributed_mode_makes_no_store_calls() {
    let mut f = fixture(100, true);
    f.cluster.set_master(false);
    f.registry.register(&[api_with_plans("api-1", 5)]);

    for _ in 0..3 {
        assert_eq!(f.orchestrator.run_cycle().await, CycleOutcome::Skipped);
        f.clock.advance(time::Duration::seconds(10));
    }

    assert_eq!(f.repo.total_queries(), 0);
    assert_eq!(f.orchestrator.watermark(), Watermark::Never);
    assert_eq!(f.cluster.queries(), 3);
}

#[tokio::test]
async fn oracle_failure_is_treated_as_non_master() {
    let mut f = fixture(100, true);
    f.cluster.set_reachable(false);
    f.registry.register(&[api_with_plans("api-1", 5)]);

    assert_eq!(f.orchestrator.run_cycle().await, CycleOutcome::Skipped);
    assert_eq!(f.repo.total_queries(), 0);

    f.cluster.set_reachable(true);
    assert!(matches!(f.orchestrator.run_cycle().await, CycleOutcome::Completed { .. }));
}

#[tokio::test]
async fn non_distributed_node_ignores_mastership() {
    let mut f = fixture(100, false);
    f.cluster.set_master(false);
    f.registry.register(&[api_with_plans("api-1", 2)]);

    assert!(matches!(f.orchestrator.run_cycle().await, CycleOutcome::Completed { .. }));
    assert_eq!(f.cluster.queries(), 0);
}

#[tokio::test]
async fn one_failed_chunk_holds_watermark_but_keeps_other_writes() {
    let mut f = fixture(100, false);
    f.registry.register(&[api_with_plans("api-1", 300)]);

    let changed_at = datetime!(2024-03-01 11:00 UTC);
    f.repo.put_api_key(key("k-first", &plan_id(5), changed_at));
    f.repo.put_api_key(key("k-second", &plan_id(150), changed_at));
    f.repo.put_api_key(key("k-third", &plan_id(250), changed_at));
    f.repo.fail_on_plan(plan_id(150));

    let outcome = f.orchestrator.run_cycle().await;

    assert!(matches!(
        outcome,
        CycleOutcome::Completed { chunks: 3, failed_chunks: 1, .. }
    ));
    assert!(outcome.is_failure());
    assert_eq!(f.orchestrator.watermark(), Watermark::Never);
    assert!(f.cache.get("k-first").await.is_some());
    assert!(f.cache.get("k-third").await.is_some());
    assert!(f.cache.get("k-second").await.is_none());

    // Next cycle re-covers the range from the held watermark.
    f.repo.clear_plan_failures();
    f.clock.advance(time::Duration::seconds(10));
    let outcome = f.orchestrator.run_cycle().await;

    match outcome {
        CycleOutcome::Completed { window, failed_chunks, .. } => {
            assert_eq!(failed_chunks, 0);
            assert_eq!(window.from, Watermark::Never);
            assert_eq!(window.to, f.clock.now());
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(f.cache.get("k-second").await.is_some());
    assert_eq!(f.orchestrator.watermark(), Watermark::At(f.clock.now()));
}

#[tokio::test]
async fn consecutive_windows_leave_no_gap() {
    let mut f = fixture(100, false);
    f.registry.register(&[api_with_plans("api-1", 1)]);

    let first_end = f.clock.now();
    f.orchestrator.run_cycle().await;
    f.clock.advance(time::Duration::seconds(10));
    f.orchestrator.run_cycle().await;

    let criteria = f.repo.criteria_log();
    assert_eq!(criteria.len(), 2);
    assert_eq!(criteria[0].from, None);
    assert_eq!(criteria[0].to, Some(first_end));
    assert_eq!(criteria[1].from, Some(first_end));
    assert_eq!(criteria[1].to, Some(f.clock.now()));
    assert!(criteria.iter().all(|c| c.include_revoked));
}

#[tokio::test]
async fn key_changed_on_window_boundary_is_picked_up_by_the_next_window() {
    let mut f = fixture(100, false);
    f.registry.register(&[api_with_plans("api-1", 1)]);

    let boundary = f.clock.now();
    f.repo.put_api_key(key("k-boundary", &plan_id(0), boundary));
    f.orchestrator.run_cycle().await;
    assert!(f.cache.get("k-boundary").await.is_none());

    f.clock.advance(time::Duration::seconds(10));
    f.orchestrator.run_cycle().await;
    assert!(f.cache.get("k-boundary").await.is_some());
}

#[tokio::test]
async fn watermark_never_moves_backwards() {
    let mut f = fixture(2, false);
    f.registry.register(&[api_with_plans("api-1", 5)]);
    let mut history = vec![f.orchestrator.watermark()];

    let steps = [
        (false, 10),
        (true, 10),
        (false, 10),
        (false, -30),
        (true, 10),
        (false, 40),
    ];
    for (fail, seconds) in steps {
        if fail {
            f.repo.fail_on_plan(plan_id(3));
        } else {
            f.repo.clear_plan_failures();
        }
        f.clock.advance(time::Duration::seconds(seconds));
        let outcome = f.orchestrator.run_cycle().await;
        assert_eq!(outcome.is_failure(), fail);
        history.push(f.orchestrator.watermark());
    }

    assert!(history.windows(2).all(|pair| pair[0] <= pair[1]), "{history:?}");
    assert_eq!(history[2], history[1]);
    assert_eq!(history[5], history[4]);
}

fn subscription(id: &str, plan: &str, status: SubscriptionStatus, updated_at: OffsetDateTime) -> Subscription {
    Subscription {
        id: id.into(),
        api: "api-1".into(),
        plan: plan.into(),
        application: "app-1".into(),
        status,
        ending_at: None,
        updated_at,
    }
}

#[tokio::test]
async fn subscription_closed_after_caching_reaches_the_cache() {
    let mut f = fixture(100, false);
    f.registry.register(&[api_with_plans("api-1", 1)]);
    let plan = plan_id(0);
    f.repo.put_api_key(key("k1", &plan, datetime!(2024-03-01 11:00 UTC)));
    f.repo.put_subscription(subscription(
        "sub-k1",
        &plan,
        SubscriptionStatus::Accepted,
        datetime!(2024-03-01 11:00 UTC),
    ));

    f.orchestrator.run_cycle().await;
    let cached = f.cache.get("k1").await.unwrap();
    assert!(cached.is_valid_at(f.clock.now()));

    // Only the subscription changes in the next window, the key itself does not.
    f.repo.put_subscription(subscription(
        "sub-k1",
        &plan,
        SubscriptionStatus::Closed,
        f.clock.now() + time::Duration::seconds(5),
    ));
    f.clock.advance(time::Duration::seconds(10));
    let outcome = f.orchestrator.run_cycle().await;

    assert!(matches!(
        outcome,
        CycleOutcome::Completed { failed_chunks: 0, keys_refreshed: 1, .. }
    ));
    let cached = f.cache.get("k1").await.unwrap();
    assert_eq!(
        cached.subscription.as_ref().map(|s| s.status),
        Some(SubscriptionStatus::Closed)
    );
    assert!(!cached.is_valid_at(f.clock.now()));
}

#[tokio::test]
async fn key_rejected_by_cache_does_not_hold_the_watermark() {
    let mut f = fixture(100, false);
    f.registry.register(&[api_with_plans("api-1", 1)]);
    f.repo.put_api_key(key("", &plan_id(0), datetime!(2024-03-01 11:00 UTC)));
    f.repo.put_api_key(key("k-good", &plan_id(0), datetime!(2024-03-01 11:00 UTC)));

    for _ in 0..3 {
        let outcome = f.orchestrator.run_cycle().await;
        assert!(!outcome.is_failure());
        assert_eq!(f.orchestrator.watermark(), Watermark::At(f.clock.now()));
        f.clock.advance(time::Duration::seconds(10));
    }
    assert!(f.cache.get("k-good").await.is_some());
    assert_eq!(f.cache.len(), 1);
}
