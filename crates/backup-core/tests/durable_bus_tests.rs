use std::sync::Arc;
use std::time::Duration;

use backup_core::application::{AcceptBackupRequestDto, BackupRequestSaga, SagaDependencies};
use backup_core::domain::repository::memory::{
    MemoryBackupJobService, MemoryBackupRepository, MemoryBackupRequestRepository,
    MemoryConnection, MemoryInterfaceStore,
};
use backup_core::event_bus::DurableEventBus;
use backup_core::queue::MemoryJobQueue;
use backup_core::{
    BackupJob, BackupJobId, CircuitBreaker, CircuitBreakerConfig, CircuitState, EventBus,
    EventBusConfig, RequestStatusType, RestartStalledConfig,
};
use tokio_util::sync::CancellationToken;

fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive("backup_core=debug".parse().unwrap()))
        .with_test_writer()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn fast_breaker(service: &str) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        service_name: service.to_string(),
        success_to_close_count: 1,
        failure_to_open_count: 1,
        half_open_retry_delay_ms: 10,
        closed_retry_delay_ms: 10,
        open_alive_check_delay_ms: 1_000,
    }
}

fn bus_config() -> EventBusConfig {
    EventBusConfig {
        max_attempts: 5,
        backoff_delay_ms: 50,
        max_true_failures: 2,
        poll_interval_ms: 10,
        ..EventBusConfig::default()
    }
}

struct Fixture {
    shutdown: CancellationToken,
    queue: Arc<MemoryJobQueue>,
    bus: Arc<DurableEventBus>,
    connection: Arc<MemoryConnection>,
    db_breaker: Arc<CircuitBreaker>,
    requests: Arc<MemoryBackupRequestRepository>,
    interface: Arc<MemoryInterfaceStore>,
    saga: BackupRequestSaga,
}

async fn fixture() -> Fixture {
    init_test_tracing();
    let shutdown = CancellationToken::new();

    let queue = Arc::new(MemoryJobQueue::new());
    let bus = DurableEventBus::new(queue.clone(), bus_config(), fast_breaker("queue"), &shutdown);
    bus.breaker().settle().await;
    let publisher: Arc<dyn EventBus> = bus.clone();

    let connection = Arc::new(MemoryConnection::new());
    let db_breaker = CircuitBreaker::with_cancellation(fast_breaker("database"), connection.clone(), &shutdown);
    db_breaker.set_retry_publisher(&publisher);
    connection.set_breaker(db_breaker.clone());
    db_breaker.settle().await;

    let requests = Arc::new(MemoryBackupRequestRepository::new(connection.clone()));
    let backups = Arc::new(MemoryBackupRepository::new(connection.clone()));
    let jobs = Arc::new(MemoryBackupJobService::new());
    jobs.insert(BackupJob {
        backup_job_id: BackupJobId("job-1".to_string()),
        storage_path_name: "storage/path".to_string(),
        backup_provider_code: "CloudA".to_string(),
        days_to_keep: 30,
        is_active: true,
        hold_flag: false,
    });
    let interface = Arc::new(MemoryInterfaceStore::new());

    let saga = BackupRequestSaga::new(
        SagaDependencies {
            request_repo: requests.clone(),
            backup_repo: backups,
            job_service: jobs,
            interface_store: interface.clone(),
            event_bus: publisher,
        },
        RestartStalledConfig::default(),
    );
    saga.subscribe(bus.as_ref());

    Fixture {
        shutdown,
        queue,
        bus,
        connection,
        db_breaker,
        requests,
        interface,
        saga,
    }
}

fn dto() -> AcceptBackupRequestDto {
    AcceptBackupRequestDto {
        backup_job_id: Some("job-1".to_string()),
        data_date: Some("2026-01-15".to_string()),
        prepared_data_path_name: Some("prepared/path".to_string()),
        transport_type: Some("Queue".to_string()),
        requester_id: Some("scheduler".to_string()),
    }
}

#[tokio::test]
async fn test_workers_drive_request_to_sent() {
    tokio::time::pause();
    let f = fixture().await;
    let workers = f.bus.start_workers(&f.shutdown);
    assert_eq!(workers.len(), 4);

    let accepted = f.saga.accept.execute(dto()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let stored = f.requests.peek(&accepted.backup_request_id).unwrap();
    assert_eq!(stored.status_type, RequestStatusType::Sent);
    assert_eq!(f.interface.sent().len(), 1);
    assert!(f.queue.dead_letters().is_empty());

    f.shutdown.cancel();
    for worker in workers {
        worker.await.unwrap();
    }
}

#[tokio::test]
async fn test_database_outage_parks_event_and_replays_after_recovery() {
    tokio::time::pause();
    let f = fixture().await;
    let workers = f.bus.start_workers(&f.shutdown);

    f.connection.set_available(false);
    let accepted = f.saga.accept.execute(dto()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(f.db_breaker.state(), CircuitState::Open);
    assert_eq!(f.db_breaker.retry_event_count(), 1);
    assert!(f.requests.peek(&accepted.backup_request_id).is_none());
    assert!(f.queue.dead_letters().is_empty());

    // Calls while open fail fast without reaching the store
    let calls = f.connection.call_count();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(f.connection.call_count(), calls);

    f.connection.set_available(true);
    tokio::time::sleep(Duration::from_millis(2_000)).await;

    assert_eq!(f.db_breaker.state(), CircuitState::Closed);
    assert_eq!(f.db_breaker.retry_event_count(), 0);
    let stored = f.requests.peek(&accepted.backup_request_id).unwrap();
    assert_eq!(stored.status_type, RequestStatusType::Sent);

    f.shutdown.cancel();
    for worker in workers {
        worker.await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(f.db_breaker.state(), CircuitState::Halted);
}

#[tokio::test]
async fn test_queue_outage_fails_accept_fast() {
    tokio::time::pause();
    let f = fixture().await;

    f.queue.set_alive(false);
    let err = f.saga.accept.execute(dto()).await.unwrap_err();
    assert!(err.is_connect_failure());
    assert_eq!(f.bus.breaker().state(), CircuitState::Open);

    let err = f.saga.accept.execute(dto()).await.unwrap_err();
    assert!(err.is_connect_failure());

    f.queue.set_alive(true);
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(f.bus.breaker().is_connected());
    f.saga.accept.execute(dto()).await.unwrap();

    f.shutdown.cancel();
}

#[tokio::test]
async fn test_unknown_job_is_dead_lettered_after_true_failures() {
    tokio::time::pause();
    let f = fixture().await;
    let workers = f.bus.start_workers(&f.shutdown);

    let accepted = f
        .saga
        .accept
        .execute(AcceptBackupRequestDto {
            backup_job_id: Some("missing-job".to_string()),
            ..dto()
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2_000)).await;

    let stored = f.requests.peek(&accepted.backup_request_id).unwrap();
    assert_eq!(stored.status_type, RequestStatusType::Received);
    let dead = f.queue.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].0.envelope.event_type, "BackupRequestReceived");
    assert_eq!(dead[0].0.envelope.retry_count, 2);

    f.shutdown.cancel();
    for worker in workers {
        worker.await.unwrap();
    }
}
