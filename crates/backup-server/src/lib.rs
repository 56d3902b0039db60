//! Backup Server
//!
//! HTTP API and process wiring for the backup request service: builds the
//! PostgreSQL repositories, the Redis interface store and job queue, the
//! backup job service client and the event bus, settles one circuit breaker
//! per dependency and runs the saga until shutdown.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use backup_core::application::{BackupRequestSaga, SagaDependencies, StoreStatusReplyPoller};
use backup_core::event_bus::{DurableEventBus, MemoryEventBus};
use backup_core::{CircuitBreaker, EventBus, EventBusBackend};
use backup_queue_redis::{RedisInterfaceStore, RedisJobQueue, RedisPool};
use backup_state_postgres::PostgresStateStore;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod api;
pub mod config;
pub mod error;
pub mod job_service;
pub mod logging;

pub use api::{build_router, AppState};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use job_service::HttpBackupJobService;
pub use logging::init_logging;

/// Run the server until ctrl-c
pub async fn run(config: ServerConfig) -> ServerResult<()> {
    let shutdown = CancellationToken::new();

    let state_store =
        PostgresStateStore::new(&config.database, config.breakers.database.clone(), &shutdown).await?;
    let (request_repo, backup_repo) = state_store.create_repositories();

    let redis_pool = Arc::new(
        RedisPool::new(&config.redis)
            .map_err(|e| ServerError::StartupError(format!("Invalid Redis configuration: {}", e)))?,
    );
    let interface = Arc::new(RedisInterfaceStore::new(
        redis_pool.clone(),
        &config.redis,
        config.breakers.interface.clone(),
        &shutdown,
    ));
    let job_service = Arc::new(HttpBackupJobService::new(
        &config.backup_job_service,
        config.breakers.backup_job_service.clone(),
        &shutdown,
    )?);

    let mut breakers: Vec<Arc<CircuitBreaker>> = vec![
        state_store.breaker().clone(),
        interface.breaker().clone(),
        job_service.breaker().clone(),
    ];

    let (event_bus, durable_bus): (Arc<dyn EventBus>, Option<Arc<DurableEventBus>>) =
        match config.event_bus.backend {
            EventBusBackend::Memory => (Arc::new(MemoryEventBus::new()) as Arc<dyn EventBus>, None),
            EventBusBackend::Durable => {
                let queue = Arc::new(RedisJobQueue::new(redis_pool.clone(), &config.redis));
                let bus = DurableEventBus::new(
                    queue,
                    config.event_bus.clone(),
                    config.breakers.event_bus.clone(),
                    &shutdown,
                );
                breakers.push(bus.breaker().clone());
                (bus.clone() as Arc<dyn EventBus>, Some(bus))
            }
        };
    info!(backend = ?config.event_bus.backend, "Event bus created");

    for breaker in &breakers {
        breaker.set_retry_publisher(&event_bus);
        breaker.settle().await;
    }

    let saga = Arc::new(BackupRequestSaga::new(
        SagaDependencies {
            request_repo: request_repo.clone(),
            backup_repo,
            job_service,
            interface_store: interface.clone(),
            event_bus: event_bus.clone(),
        },
        config.restart_stalled.clone(),
    ));
    saga.subscribe(event_bus.as_ref());

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    if let Some(bus) = &durable_bus {
        tasks.extend(bus.start_workers(&shutdown));
    }

    let poller = StoreStatusReplyPoller::new(
        interface,
        event_bus.clone(),
        Duration::from_millis(config.reply_poll_interval_ms),
    );
    tasks.push(tokio::spawn(poller.run(shutdown.child_token())));

    if config.restart_stalled_on_start {
        let result = saga.restart_stalled.execute().await;
        if let Err(e) = &result.allowed {
            warn!("Could not restart stalled allowed requests: {}", e);
        }
        if let Err(e) = &result.received {
            warn!("Could not restart stalled received requests: {}", e);
        }
    }

    let app = build_router(AppState {
        saga,
        request_repo,
        event_bus,
        breakers: breakers.clone(),
    });

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Backup server listening on {}", listener.local_addr()?);

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
                _ = signal_token.cancelled() => {}
            }
        })
        .await?;

    shutdown.cancel();
    for breaker in &breakers {
        breaker.halt();
    }
    for task in tasks {
        if let Err(e) = task.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    info!("Backup server stopped");
    Ok(())
}
