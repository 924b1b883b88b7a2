//! Integration tests for the administrative surface.

use chrono::{DateTime, Duration, TimeZone, Utc};
use quota_reconcile::application::ports::{AccountStore, AuditLog, ResourceStore};
use quota_reconcile::domain::run::ChangeKind;
use quota_reconcile::infrastructure::mocks::{MockClock, MockProvider};
use quota_reconcile::{
    Account, AccountId, AccountQuery, AccountStatus, Actor, AdmissionKind, EngineError,
    ExternalId, InMemoryStore, LifecycleState, LimitChange, PlanLimits, QuotaEngine, Resource,
    ResourceId, ValidationError,
};
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

struct Fixture {
    store: Arc<InMemoryStore>,
    clock: MockClock,
    engine: QuotaEngine<InMemoryStore>,
}

fn setup() -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let clock = MockClock::new(t0());
    let engine = QuotaEngine::builder()
        .with_store(Arc::clone(&store))
        .with_provider(Arc::new(MockProvider::new()))
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    Fixture {
        store,
        clock,
        engine,
    }
}

fn seed(
    store: &InMemoryStore,
    id: &str,
    created: DateTime<Utc>,
    limits: PlanLimits,
    count: i64,
) -> AccountId {
    let account = AccountId::new(id);
    store
        .insert_account(Account::new(account.clone(), created).with_limits(limits))
        .unwrap();
    for i in 0..count {
        store
            .insert_resource(Resource::new(
                format!("{id}-r{i}").as_str(),
                account.clone(),
                Some(ExternalId::new(format!("{id}-ext{i}"))),
                created + Duration::minutes(i),
            ))
            .unwrap();
    }
    account
}

fn ids(rows: &[quota_reconcile::AccountMonitoringRow]) -> Vec<&str> {
    rows.iter().map(|r| r.account_id.as_str()).collect()
}

#[test]
fn test_list_accounts_newest_first_with_filters() {
    let f = setup();
    seed(&f.store, "a", t0() - Duration::days(3), PlanLimits::new(5, 10), 1);
    seed(&f.store, "b", t0() - Duration::days(2), PlanLimits::new(2, 10), 2);
    seed(&f.store, "c", t0() - Duration::days(1), PlanLimits::new(5, 10), 0);
    let admin = f.engine.admin();

    let page = admin.list_accounts(&AccountQuery::default()).unwrap();
    assert_eq!(ids(&page.items), vec!["c", "b", "a"]);
    assert_eq!(page.total, 3);
    assert_eq!(page.total_pages, 1);

    let at_limit = admin
        .list_accounts(&AccountQuery::default().with_status(AccountStatus::AtResourceLimit))
        .unwrap();
    assert_eq!(ids(&at_limit.items), vec!["b"]);
    assert_eq!(at_limit.items[0].usage.resources.count, 2);

    let second = admin
        .list_accounts(&AccountQuery::default().page(2, 2))
        .unwrap();
    assert_eq!(ids(&second.items), vec!["a"]);
    assert_eq!(second.total, 3);
    assert_eq!(second.total_pages, 2);

    let one = admin
        .list_accounts(&AccountQuery::default().with_account("a"))
        .unwrap();
    assert_eq!(ids(&one.items), vec!["a"]);

    let beyond = admin
        .list_accounts(&AccountQuery::default().page(5, 2))
        .unwrap();
    assert!(beyond.items.is_empty());
}

#[test]
fn test_list_accounts_rejects_bad_pages() {
    let f = setup();

    let err = f
        .engine
        .admin()
        .list_accounts(&AccountQuery::default().page(0, 20))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::InvalidPage { page: 0, .. })
    ));

    let err = f
        .engine
        .admin()
        .list_accounts(&AccountQuery::default().page(1, 500))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::InvalidPage { per_page: 500, .. })
    ));
}

#[test]
fn test_account_query_from_json() {
    let query: AccountQuery =
        serde_json::from_str(r#"{"status": "OVER_LIMIT", "per_page": 50}"#).unwrap();

    assert_eq!(query.status, Some(AccountStatus::OverLimit));
    assert_eq!(query.page, 1);
    assert_eq!(query.per_page, 50);
}

#[test]
fn test_admission_follows_usage() {
    let f = setup();
    let account = seed(&f.store, "a", t0() - Duration::days(1), PlanLimits::new(3, 10), 1);
    let admin = f.engine.admin();

    let create = admin
        .check_admission(&account, AdmissionKind::CreateResource)
        .unwrap();
    assert!(create.allowed);
    assert_eq!(create.message, None);

    admin
        .record_usage(&account, &ResourceId::new("a-r0"), 540)
        .unwrap();
    let call = admin
        .check_admission(&account, AdmissionKind::StartCall)
        .unwrap();
    assert!(call.allowed);
    assert_eq!(call.report.status, AccountStatus::Warning);
    assert_eq!(call.message.as_deref(), Some("Warning: 1.0 minutes remaining"));

    admin
        .record_usage(&account, &ResourceId::new("a-r0"), 60)
        .unwrap();
    let call = admin
        .check_admission(&account, AdmissionKind::StartCall)
        .unwrap();
    assert!(!call.allowed);
    assert_eq!(
        call.message.as_deref(),
        Some("Usage limit reached (10.00/10 minutes)")
    );
    assert_eq!(call.report.status, AccountStatus::OverLimit);
}

#[test]
fn test_admission_at_resource_limit() {
    let f = setup();
    let account = seed(&f.store, "a", t0() - Duration::days(1), PlanLimits::new(3, 10), 3);

    let decision = f
        .engine
        .admin()
        .check_admission(&account, AdmissionKind::CreateResource)
        .unwrap();

    assert!(!decision.allowed);
    assert_eq!(decision.message.as_deref(), Some("Resource limit reached (3/3)"));
}

#[test]
fn test_record_usage_validation() {
    let f = setup();
    let a = seed(&f.store, "a", t0() - Duration::days(1), PlanLimits::new(3, 10), 1);
    seed(&f.store, "b", t0() - Duration::days(1), PlanLimits::new(3, 10), 1);
    let admin = f.engine.admin();

    assert_eq!(
        admin.record_usage(&a, &ResourceId::new("a-r0"), 0).unwrap_err(),
        EngineError::Validation(ValidationError::ZeroDuration)
    );
    assert_eq!(
        admin.record_usage(&a, &ResourceId::new("b-r0"), 30).unwrap_err(),
        EngineError::ResourceNotOwned {
            resource_id: ResourceId::new("b-r0"),
            account_id: a.clone(),
        }
    );
    assert_eq!(
        admin
            .record_usage(&AccountId::new("ghost"), &ResourceId::new("a-r0"), 30)
            .unwrap_err(),
        EngineError::AccountNotFound(AccountId::new("ghost"))
    );

    let event = admin.record_usage(&a, &ResourceId::new("a-r0"), 90).unwrap();
    assert_eq!(event.occurred_at, t0());
    assert_eq!(admin.usage_report(&a).unwrap().minutes.used, 1.5);
}

#[tokio::test]
async fn test_reset_reactivates_oldest_marked_first() {
    let f = setup();
    let account = seed(&f.store, "a", t0() - Duration::days(1), PlanLimits::new(3, 10), 3);
    let admin = f.engine.admin();

    f.engine
        .apply_limits(&account, &LimitChange::by("ops").max_resources(1))
        .await
        .unwrap();
    admin
        .record_usage(&account, &ResourceId::new("a-r0"), 600)
        .unwrap();
    f.engine
        .apply_limits(&account, &LimitChange::by("ops").max_resources(3))
        .await
        .unwrap();
    assert_eq!(
        admin.usage_report(&account).unwrap().status,
        AccountStatus::OverLimit
    );

    f.clock.advance(std::time::Duration::from_secs(1));
    let reset = admin
        .reset_usage(&account, &Actor::new("support"), None)
        .await
        .unwrap();

    assert_eq!(
        reset.reactivated,
        vec![ResourceId::new("a-r1"), ResourceId::new("a-r2")]
    );
    assert!(reset.skipped_in_flight.is_empty());
    assert_eq!(reset.status, AccountStatus::AtResourceLimit);
    for i in 0..3 {
        let resource = f.store.resource(&ResourceId::new(format!("a-r{i}").as_str())).unwrap();
        assert_eq!(resource.state, LifecycleState::Active);
    }

    let report = admin.usage_report(&account).unwrap();
    assert_eq!(report.minutes.used, 0.0);
    assert_eq!(report.resources.count, 3);

    let changes = f.store.changes_for(&account).unwrap();
    let last = changes.last().unwrap();
    assert_eq!(last.kind, ChangeKind::UsageReset);
    assert_eq!(last.reason, "Admin reset");
    assert_eq!(last.actor.as_str(), "support");
}

#[tokio::test]
async fn test_reset_keeps_suspended_account_marked() {
    let f = setup();
    let account = seed(&f.store, "a", t0() - Duration::days(1), PlanLimits::new(3, 10), 2);

    f.engine
        .apply_limits(&account, &LimitChange::by("ops").suspend(true))
        .await
        .unwrap();
    let reset = f
        .engine
        .admin()
        .reset_usage(&account, &Actor::new("support"), Some("billing resolved"))
        .await
        .unwrap();

    assert!(reset.reactivated.is_empty());
    assert_eq!(reset.status, AccountStatus::Suspended);
    assert_eq!(
        f.store.resource(&ResourceId::new("a-r0")).unwrap().state,
        LifecycleState::MarkedForDeletion
    );
    assert_eq!(
        f.store.changes_for(&account).unwrap().last().unwrap().reason,
        "billing resolved"
    );
}

#[tokio::test]
async fn test_enforcement_status_after_sweep() {
    let f = setup();
    seed(&f.store, "a", t0() - Duration::days(2), PlanLimits::new(5, 10), 1);
    seed(&f.store, "b", t0() - Duration::days(1), PlanLimits::new(1, 10), 3);
    let admin = f.engine.admin();

    let run = admin.trigger_sweep(&Actor::new("ops")).await.unwrap();
    assert_eq!(run.initiator.as_str(), "ops");

    let status = admin.enforcement_status().unwrap();
    assert_eq!(status.recent_runs.len(), 1);
    assert_eq!(status.recent_runs[0].id, run.id);
    assert_eq!(ids(&status.accounts_needing_enforcement), vec!["b"]);
    assert_eq!(status.accounts_needing_enforcement[0].expired_resources, 2);
}
