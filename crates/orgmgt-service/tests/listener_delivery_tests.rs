//! Listener delivery tests.
//!
//! Listeners run on a delivery task outside the writer gate. A listener
//! may call back into the service, and one that never returns must not
//! hold up mutations.

use async_trait::async_trait;
use orgmgt_core::{Organization, OrganizationStatus};
use orgmgt_events::{
    BroadcastListener, ListenerError, ListenerResult, MutationKind, OrganizationEvent, OrganizationListener,
};
use orgmgt_service::{InMemoryHierarchyStore, InMemoryOwnershipDirectory, OrgMgtConfig, OrganizationManagement};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::time::timeout;

async fn service() -> Arc<OrganizationManagement> {
    let service = OrganizationManagement::initialize(
        OrgMgtConfig::default(),
        Arc::new(InMemoryHierarchyStore::new()),
        Arc::new(InMemoryOwnershipDirectory::new()),
    )
    .await
    .expect("service starts");
    Arc::new(service)
}

/// Disables every sub-organization as soon as it is created.
struct DisableOnCreate {
    service: OnceLock<Weak<OrganizationManagement>>,
}

#[async_trait]
impl OrganizationListener for DisableOnCreate {
    async fn on_event(&self, event: &OrganizationEvent) -> ListenerResult<()> {
        if event.after.parent_id.is_none() {
            return Ok(());
        }
        let Some(service) = self.service.get().and_then(Weak::upgrade) else {
            return Ok(());
        };
        service
            .set_organization_status(event.organization_id, OrganizationStatus::Disabled)
            .await
            .map(|_| ())
            .map_err(|e| ListenerError::Failed(e.to_string()))
    }

    fn topics(&self) -> Vec<String> {
        vec!["organization.created".to_string()]
    }

    fn name(&self) -> &str {
        "disable-on-create"
    }
}

/// Never finishes handling an event.
struct StuckListener {
    entered: AtomicUsize,
}

#[async_trait]
impl OrganizationListener for StuckListener {
    async fn on_event(&self, _event: &OrganizationEvent) -> ListenerResult<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[tokio::test]
async fn test_listener_can_mutate_from_callback() {
    let service = service().await;
    let listener = Arc::new(DisableOnCreate {
        service: OnceLock::new(),
    });
    let _ = listener.service.set(Arc::downgrade(&service));
    service.register_listener(listener).await;

    let root = service.create_organization(Organization::root("r")).await.unwrap();
    let sub = timeout(
        Duration::from_secs(3),
        service.create_organization(Organization::sub_organization("s", root.id)),
    )
    .await
    .expect("create returns while the listener calls back")
    .unwrap();
    assert_eq!(sub.status, OrganizationStatus::Active);

    assert!(timeout(Duration::from_secs(3), service.flush_notifications())
        .await
        .expect("delivery drains"));
    assert_eq!(
        service.get_organization(sub.id).await.unwrap().status,
        OrganizationStatus::Disabled
    );
    assert_eq!(
        service.get_organization(root.id).await.unwrap().status,
        OrganizationStatus::Active
    );
    assert_eq!(service.manager().listener_stats().await.listener_failures, 0);
}

#[tokio::test]
async fn test_stuck_listener_does_not_block_mutations() {
    let service = service().await;
    let stuck = Arc::new(StuckListener {
        entered: AtomicUsize::new(0),
    });
    service.register_listener(stuck.clone()).await;

    let root = timeout(Duration::from_secs(2), service.create_organization(Organization::root("r")))
        .await
        .expect("create returns while a listener hangs")
        .unwrap();
    let sub = timeout(
        Duration::from_secs(2),
        service.create_organization(Organization::sub_organization("s", root.id)),
    )
    .await
    .expect("later writers are not blocked")
    .unwrap();
    let disabled = timeout(
        Duration::from_secs(2),
        service.set_organization_status(sub.id, OrganizationStatus::Disabled),
    )
    .await
    .expect("later writers are not blocked")
    .unwrap();

    assert_eq!(disabled.status, OrganizationStatus::Disabled);
    assert_eq!(service.ancestors_of(sub.id).await.unwrap().len(), 2);
    assert_eq!(service.hierarchy_version().await, 3);

    // The delivery task is parked on the first event.
    tokio::task::yield_now().await;
    assert!(stuck.entered.load(Ordering::SeqCst) <= 1);
}

#[tokio::test]
async fn test_events_arrive_in_commit_order() {
    let service = service().await;
    let broadcast = Arc::new(BroadcastListener::all());
    let mut events = broadcast.subscribe();
    service.register_listener(broadcast).await;

    let r = service.create_organization(Organization::root("r")).await.unwrap().id;
    let a = service
        .create_organization(Organization::sub_organization("a", r))
        .await
        .unwrap()
        .id;
    let b = service
        .create_organization(Organization::sub_organization("b", r))
        .await
        .unwrap()
        .id;
    service.move_organization(b, a).await.unwrap();
    service.rename_organization(b, "bee").await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..5 {
        let event = events.recv().await.unwrap();
        seen.push((event.kind, event.organization_id));
    }
    assert_eq!(
        seen,
        vec![
            (MutationKind::Created, r),
            (MutationKind::Created, a),
            (MutationKind::Created, b),
            (MutationKind::Moved, b),
            (MutationKind::Renamed, b),
        ]
    );
}
