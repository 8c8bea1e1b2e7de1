mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{init_tracing, supervisor_with, wait_until, with_timeout};
use rolld::deployment::InMemoryDeploymentRepository;
use rolld::orchestrator::{Orchestrator, OrchestratorOptions, SkipReason, TickOutcome};
use rolld::session::{
    CoordinatorOptions, InMemorySessionStore, LeaseRecord, ManualClock, UpdateSessionCoordinator,
};
use rolld::supervisor::ProcessSupervisor;
use rolld::types::{AppId, UpdateDomain};
use rolld_test_utils::builders::{descriptor, identity};
use rolld_test_utils::{ChannelBehaviour, FakeProcessFactory};

const CLUSTER: &str = "prod-east";
const START_MS: u64 = 1_760_000_000_000;

struct Instance {
    orchestrator: Orchestrator,
    supervisor: ProcessSupervisor,
    factory: FakeProcessFactory,
}

fn coordinator_for(
    store: &Arc<InMemorySessionStore>,
    clock: &ManualClock,
    lease: Duration,
) -> UpdateSessionCoordinator {
    coordinator_as("host-a", store, clock, lease)
}

fn coordinator_as(
    instance: &str,
    store: &Arc<InMemorySessionStore>,
    clock: &ManualClock,
    lease: Duration,
) -> UpdateSessionCoordinator {
    UpdateSessionCoordinator::new(
        store.clone(),
        CLUSTER,
        instance,
        Arc::new(clock.clone()),
        CoordinatorOptions {
            lease_duration: lease,
            storage_timeout: Duration::from_millis(200),
        },
    )
}

fn instance(
    domain: &str,
    factory: FakeProcessFactory,
    repository: &Arc<InMemoryDeploymentRepository>,
    coordinator: UpdateSessionCoordinator,
) -> Instance {
    let (supervisor, events) = supervisor_with(factory.clone(), 3);
    let orchestrator = Orchestrator::new(
        OrchestratorOptions {
            check_for_updates_period: Duration::from_millis(20),
        },
        identity(CLUSTER, domain),
        repository.clone(),
        coordinator,
        supervisor.clone(),
    )
    .with_events(events);
    Instance {
        orchestrator,
        supervisor,
        factory,
    }
}

fn applied(outcome: TickOutcome) -> rolld::orchestrator::CycleReport {
    match outcome {
        TickOutcome::Applied(report) => report,
        other => panic!("expected an applied cycle, got {other:?}"),
    }
}

#[tokio::test]
async fn upgrade_replaces_running_version_and_releases_lease() {
    init_tracing();
    let store = Arc::new(InMemorySessionStore::new());
    let clock = ManualClock::new(START_MS);
    let repository = Arc::new(InMemoryDeploymentRepository::new(vec![descriptor("a", "1.0.0")]));
    let factory = FakeProcessFactory::graceful(ChannelBehaviour::Ack, Duration::from_secs(1));
    let node = instance(
        "1",
        factory,
        &repository,
        coordinator_for(&store, &clock, Duration::from_secs(60)),
    );
    let app = AppId::new("a");

    let report = applied(with_timeout(node.orchestrator.tick()).await);
    assert_eq!(report.installed, vec![app.clone()]);
    let v1 = node.factory.latest(&app).unwrap();

    repository.set(vec![descriptor("a", "2.0.0")]);
    let report = applied(with_timeout(node.orchestrator.tick()).await);

    assert_eq!(report.upgraded, vec![app.clone()]);
    assert!(report.failed.is_empty());
    assert!(!report.lease_lost);
    assert_eq!(node.supervisor.list_deployed(), vec![descriptor("a", "2.0.0")]);

    // Old version stopped through the handshake, not killed.
    assert!(!v1.is_running());
    assert_eq!(v1.terminate_count(), 0);
    assert_eq!(node.factory.launch_count(&app), 2);
    assert!(node.factory.latest(&app).unwrap().is_running());

    let record = LeaseRecord::decode(&store.peek(CLUSTER).unwrap().data).unwrap();
    assert!(record.released);
    assert_eq!(record.owner, UpdateDomain::new("1"));

    // The planned exit of v1 did not trigger a restart.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(node.factory.launch_count(&app), 2);
    assert_eq!(
        node.supervisor.status(&app).await.unwrap().restart_count,
        0
    );

    assert_eq!(with_timeout(node.orchestrator.tick()).await, TickOutcome::UpToDate);
}

#[tokio::test]
async fn domains_take_turns() {
    init_tracing();
    let store = Arc::new(InMemorySessionStore::new());
    let clock = ManualClock::new(START_MS);
    let repository = Arc::new(InMemoryDeploymentRepository::new(vec![descriptor("a", "1.0.0")]));

    let one = instance(
        "1",
        FakeProcessFactory::new(),
        &repository,
        coordinator_for(&store, &clock, Duration::from_secs(60)),
    );
    let two = instance(
        "2",
        FakeProcessFactory::new(),
        &repository,
        coordinator_for(&store, &clock, Duration::from_secs(60)),
    );

    // Domain 2 is mid-update.
    let blocker = coordinator_for(&store, &clock, Duration::from_secs(60));
    let held = blocker.try_acquire(&UpdateDomain::new("2")).await.unwrap();

    let outcome = with_timeout(one.orchestrator.tick()).await;
    assert_eq!(
        outcome,
        TickOutcome::Skipped(SkipReason::Contended {
            holder: Some(UpdateDomain::new("2"))
        })
    );
    assert!(one.supervisor.list_deployed().is_empty());

    blocker.release(held).await.unwrap();
    applied(with_timeout(one.orchestrator.tick()).await);
    applied(with_timeout(two.orchestrator.tick()).await);

    assert_eq!(one.supervisor.list_deployed(), vec![descriptor("a", "1.0.0")]);
    assert_eq!(two.supervisor.list_deployed(), vec![descriptor("a", "1.0.0")]);
}

#[tokio::test]
async fn up_to_date_tick_never_touches_the_lease() {
    let store = Arc::new(InMemorySessionStore::new());
    let clock = ManualClock::new(START_MS);
    let repository = Arc::new(InMemoryDeploymentRepository::new(Vec::new()));
    let node = instance(
        "1",
        FakeProcessFactory::new(),
        &repository,
        coordinator_for(&store, &clock, Duration::from_secs(60)),
    );

    assert_eq!(node.orchestrator.tick().await, TickOutcome::UpToDate);
    assert!(store.peek(CLUSTER).is_none());
}

#[tokio::test]
async fn unreachable_repository_or_store_skips_the_tick() {
    init_tracing();
    let store = Arc::new(InMemorySessionStore::new());
    let clock = ManualClock::new(START_MS);
    let repository = Arc::new(InMemoryDeploymentRepository::new(vec![descriptor("a", "1.0.0")]));
    let node = instance(
        "1",
        FakeProcessFactory::new(),
        &repository,
        coordinator_for(&store, &clock, Duration::from_secs(60)),
    );

    repository.set_unavailable(true);
    assert!(matches!(
        node.orchestrator.tick().await,
        TickOutcome::Skipped(SkipReason::RepositoryUnavailable(_))
    ));

    repository.set_unavailable(false);
    store.set_unavailable(true);
    assert!(matches!(
        node.orchestrator.tick().await,
        TickOutcome::Skipped(SkipReason::Coordination(_))
    ));
    assert!(node.supervisor.list_deployed().is_empty());
}

#[tokio::test]
async fn per_app_failures_are_isolated_and_retried() {
    init_tracing();
    let store = Arc::new(InMemorySessionStore::new());
    let clock = ManualClock::new(START_MS);
    let repository = Arc::new(InMemoryDeploymentRepository::new(vec![
        descriptor("a", "1.0.0"),
        descriptor("b", "1.0.0"),
    ]));
    let node = instance(
        "1",
        FakeProcessFactory::new(),
        &repository,
        coordinator_for(&store, &clock, Duration::from_secs(60)),
    );
    node.factory.fail_launches_for(&AppId::new("b"), true);

    let report = applied(node.orchestrator.tick().await);
    assert_eq!(report.installed, vec![AppId::new("a")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, AppId::new("b"));

    node.factory.fail_launches_for(&AppId::new("b"), false);
    let report = applied(node.orchestrator.tick().await);
    assert_eq!(report.installed, vec![AppId::new("b")]);
    assert_eq!(node.supervisor.list_deployed().len(), 2);
}

#[tokio::test]
async fn apps_no_longer_desired_are_removed() {
    let store = Arc::new(InMemorySessionStore::new());
    let clock = ManualClock::new(START_MS);
    let repository = Arc::new(InMemoryDeploymentRepository::new(vec![descriptor("a", "1.0.0")]));
    let node = instance(
        "1",
        FakeProcessFactory::new(),
        &repository,
        coordinator_for(&store, &clock, Duration::from_secs(60)),
    );
    applied(node.orchestrator.tick().await);

    repository.set(Vec::new());
    let report = applied(node.orchestrator.tick().await);
    assert_eq!(report.removed, vec![AppId::new("a")]);
    assert!(node.supervisor.list_deployed().is_empty());
}

#[tokio::test]
async fn renewal_failure_stops_further_changes() {
    init_tracing();
    let store = Arc::new(InMemorySessionStore::new());
    let clock = ManualClock::new(START_MS);
    let repository = Arc::new(InMemoryDeploymentRepository::new(vec![descriptor("a", "1.0.0")]));
    // Old versions ignore the shutdown request, so the upgrade takes the
    // full 400ms graceful timeout while renewals run every 100ms.
    let factory = FakeProcessFactory::graceful(ChannelBehaviour::Ignore, Duration::from_millis(400));
    let node = Arc::new(instance(
        "1",
        factory,
        &repository,
        coordinator_for(&store, &clock, Duration::from_millis(300)),
    ));
    applied(node.orchestrator.tick().await);

    repository.set(vec![descriptor("a", "2.0.0"), descriptor("b", "1.0.0")]);
    let ticking = {
        let node = Arc::clone(&node);
        tokio::spawn(async move { node.orchestrator.tick().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    store.set_unavailable(true);

    let report = applied(with_timeout(ticking).await.unwrap());
    assert!(report.lease_lost);
    assert_eq!(report.upgraded, vec![AppId::new("a")]);
    assert_eq!(report.abandoned, vec![AppId::new("b")]);
    assert_eq!(node.factory.launch_count(&AppId::new("b")), 0);
}

#[tokio::test]
async fn run_loop_deploys_and_stops_apps_on_shutdown() {
    init_tracing();
    let store = Arc::new(InMemorySessionStore::new());
    let clock = ManualClock::new(START_MS);
    let repository = Arc::new(InMemoryDeploymentRepository::new(vec![descriptor("a", "1.0.0")]));
    let Instance {
        orchestrator,
        supervisor,
        factory,
    } = instance(
        "1",
        FakeProcessFactory::graceful(ChannelBehaviour::Ack, Duration::from_secs(1)),
        &repository,
        coordinator_for(&store, &clock, Duration::from_secs(60)),
    );

    let handle = orchestrator.spawn();
    wait_until(|| supervisor.list_deployed().len() == 1).await;

    handle.shutdown();
    with_timeout(handle.join()).await.unwrap();

    assert!(supervisor.list_deployed().is_empty());
    assert!(!factory.latest(&AppId::new("a")).unwrap().is_running());
}

#[tokio::test]
async fn forced_stop_of_old_version_is_reported() {
    init_tracing();
    let store = Arc::new(InMemorySessionStore::new());
    let clock = ManualClock::new(START_MS);
    let repository = Arc::new(InMemoryDeploymentRepository::new(vec![
        descriptor("a", "1.0.0"),
        descriptor("b", "1.0.0"),
    ]));
    let factory = FakeProcessFactory::graceful(ChannelBehaviour::Ignore, Duration::from_millis(100));
    let node = instance(
        "1",
        factory,
        &repository,
        coordinator_for(&store, &clock, Duration::from_secs(60)),
    );
    applied(with_timeout(node.orchestrator.tick()).await);

    repository.set(vec![descriptor("a", "2.0.0")]);
    let report = applied(with_timeout(node.orchestrator.tick()).await);

    assert_eq!(report.upgraded, vec![AppId::new("a")]);
    assert_eq!(report.removed, vec![AppId::new("b")]);
    assert_eq!(report.forced, vec![AppId::new("b"), AppId::new("a")]);
    assert!(report.failed.is_empty());
    assert_eq!(node.supervisor.list_deployed(), vec![descriptor("a", "2.0.0")]);
}

#[tokio::test]
async fn same_domain_instances_share_the_session() {
    init_tracing();
    let store = Arc::new(InMemorySessionStore::new());
    let clock = ManualClock::new(START_MS);
    let repository = Arc::new(InMemoryDeploymentRepository::new(vec![descriptor("a", "1.0.0")]));
    let host_a = instance(
        "1",
        FakeProcessFactory::new(),
        &repository,
        coordinator_as("host-a", &store, &clock, Duration::from_secs(60)),
    );
    let host_b = instance(
        "1",
        FakeProcessFactory::new(),
        &repository,
        coordinator_as("host-b", &store, &clock, Duration::from_secs(60)),
    );

    // host-a is mid-update when host-b starts and finishes its own cycle.
    coordinator_as("host-a", &store, &clock, Duration::from_secs(60))
        .try_acquire(&UpdateDomain::new("1"))
        .await
        .unwrap();
    applied(with_timeout(host_b.orchestrator.tick()).await);

    let record = LeaseRecord::decode(&store.peek(CLUSTER).unwrap().data).unwrap();
    assert!(record.is_active(START_MS));
    assert!(record.is_held_by("host-a"));
    let other = coordinator_as("host-c", &store, &clock, Duration::from_secs(60));
    assert!(other.try_acquire(&UpdateDomain::new("2")).await.is_err());

    applied(with_timeout(host_a.orchestrator.tick()).await);
    assert_eq!(host_a.supervisor.list_deployed(), vec![descriptor("a", "1.0.0")]);
    let record = LeaseRecord::decode(&store.peek(CLUSTER).unwrap().data).unwrap();
    assert!(record.released);
    other.try_acquire(&UpdateDomain::new("2")).await.unwrap();
}
