//! Repository and adapter traits for the backup request service
//!
//! This module defines the narrow interfaces the saga use cases consume.
//! Adapter crates implement them for concrete backends; every implementation
//! classifies its failures as connect failures (carrying a
//! [`ConnectFailureInfo`](crate::ConnectFailureInfo)) or domain failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::backup::Backup;
use super::backup_job::{BackupJob, BackupJobId};
use super::backup_request::{BackupRequest, BackupRequestId, RequestStatusType};
use super::store_status::StoreStatusReply;
use crate::CoreResult;

/// Repository for backup requests
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackupRequestRepository: Send + Sync {
    /// Check whether a request with this id exists
    async fn exists(&self, id: &BackupRequestId) -> CoreResult<bool>;

    /// Fetch a request; `CoreError::NotFound` when absent
    async fn get_by_id(&self, id: &BackupRequestId) -> CoreResult<BackupRequest>;

    /// Requests in `status` whose status timestamp is before `before`
    async fn get_by_status_before_timestamp(
        &self,
        status: RequestStatusType,
        before: DateTime<Utc>,
    ) -> CoreResult<Vec<BackupRequest>>;

    /// Insert or update a request
    async fn save(&self, request: &BackupRequest) -> CoreResult<BackupRequest>;
}

/// Repository for backup records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackupRepository: Send + Sync {
    /// The backup created for a request, if any
    async fn get_by_backup_request_id(&self, id: &BackupRequestId) -> CoreResult<Option<Backup>>;

    /// Insert or update a backup
    async fn save(&self, backup: &Backup) -> CoreResult<Backup>;
}

/// Lookup service for backup jobs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackupJobService: Send + Sync {
    /// Fetch a job; `CoreError::NotFound` when absent
    async fn get_by_id(&self, id: &BackupJobId) -> CoreResult<BackupJob>;
}

/// Outbound side of the backup interface
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackupInterfaceStore: Send + Sync {
    /// Hand an allowed request to the interface for execution
    async fn send_request(&self, request: &BackupRequest) -> CoreResult<()>;
}

/// Inbound side of the backup interface
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoreStatusReplySource: Send + Sync {
    /// Take the next reply off the interface, `None` when there is nothing waiting
    async fn next_reply(&self) -> CoreResult<Option<StoreStatusReply>>;
}

/// Memory implementations for testing
#[cfg(any(test, feature = "testing"))]
pub mod memory {
    use super::*;
    use crate::resilience::{AdapterLivenessCheck, CircuitBreaker};
    use crate::CoreError;
    use dashmap::DashMap;
    use parking_lot::RwLock;
    use std::future::Future;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Simulated connection shared by the memory repositories.
    ///
    /// Lets tests take the "database" down and bring it back while the
    /// repositories report to a real circuit breaker. The connection doubles
    /// as that breaker's liveness probe.
    pub struct MemoryConnection {
        available: AtomicBool,
        breaker: RwLock<Option<Arc<CircuitBreaker>>>,
        calls: AtomicUsize,
    }

    impl MemoryConnection {
        /// A connection that is always up and has no breaker
        pub fn new() -> Self {
            Self {
                available: AtomicBool::new(true),
                breaker: RwLock::new(None),
                calls: AtomicUsize::new(0),
            }
        }

        /// Guard the connection with a breaker
        pub fn set_breaker(&self, breaker: Arc<CircuitBreaker>) {
            *self.breaker.write() = Some(breaker);
        }

        /// Take the simulated store down or bring it back up
        pub fn set_available(&self, available: bool) {
            self.available.store(available, Ordering::SeqCst);
        }

        /// Whether the simulated store is up
        pub fn is_available(&self) -> bool {
            self.available.load(Ordering::SeqCst)
        }

        /// Number of operations that reached the store (fast-failed calls excluded)
        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn connect_error(breaker: Option<&Arc<CircuitBreaker>>, message: &str) -> CoreError {
            match breaker {
                Some(breaker) => CoreError::database_connect(message, breaker.connect_failure_info()),
                None => CoreError::database(message),
            }
        }

        async fn run<T, F, Fut>(&self, operation: F) -> CoreResult<T>
        where
            F: FnOnce() -> Fut,
            Fut: Future<Output = CoreResult<T>>,
        {
            let breaker = self.breaker.read().clone();
            if let Some(breaker) = &breaker {
                if !breaker.is_connected() {
                    return Err(Self::connect_error(
                        Some(breaker),
                        "circuit open, memory store not called",
                    ));
                }
            }

            self.calls.fetch_add(1, Ordering::SeqCst);
            let result = if self.is_available() {
                operation().await
            } else {
                Err(Self::connect_error(breaker.as_ref(), "memory store unavailable"))
            };

            if let Some(breaker) = &breaker {
                breaker.record_outcome(&result);
            }
            result
        }
    }

    #[async_trait]
    impl AdapterLivenessCheck for MemoryConnection {
        async fn is_alive(&self) -> CoreResult<bool> {
            Ok(self.is_available())
        }
    }

    impl Default for MemoryConnection {
        fn default() -> Self {
            Self::new()
        }
    }

    /// In-memory implementation of the backup request repository
    pub struct MemoryBackupRequestRepository {
        connection: Arc<MemoryConnection>,
        requests: Arc<DashMap<String, BackupRequest>>,
        save_count: AtomicUsize,
    }

    impl MemoryBackupRequestRepository {
        /// Create a new memory backup request repository
        pub fn new(connection: Arc<MemoryConnection>) -> Self {
            Self {
                connection,
                requests: Arc::new(DashMap::with_capacity(64)),
                save_count: AtomicUsize::new(0),
            }
        }

        /// Number of successful saves
        pub fn save_count(&self) -> usize {
            self.save_count.load(Ordering::SeqCst)
        }

        /// Snapshot of a stored request without going through the connection
        pub fn peek(&self, id: &BackupRequestId) -> Option<BackupRequest> {
            self.requests.get(&id.0).map(|r| r.clone())
        }
    }

    impl Default for MemoryBackupRequestRepository {
        fn default() -> Self {
            Self::new(Arc::new(MemoryConnection::new()))
        }
    }

    #[async_trait]
    impl BackupRequestRepository for MemoryBackupRequestRepository {
        async fn exists(&self, id: &BackupRequestId) -> CoreResult<bool> {
            self.connection
                .run(|| async { Ok(self.requests.contains_key(&id.0)) })
                .await
        }

        async fn get_by_id(&self, id: &BackupRequestId) -> CoreResult<BackupRequest> {
            self.connection
                .run(|| async {
                    self.requests
                        .get(&id.0)
                        .map(|r| r.clone())
                        .ok_or_else(|| CoreError::NotFound(format!("Backup request {}", id)))
                })
                .await
        }

        async fn get_by_status_before_timestamp(
            &self,
            status: RequestStatusType,
            before: DateTime<Utc>,
        ) -> CoreResult<Vec<BackupRequest>> {
            self.connection
                .run(|| async {
                    let mut result: Vec<BackupRequest> = self
                        .requests
                        .iter()
                        .filter(|r| r.status_type == status && r.status_timestamp() < before)
                        .map(|r| r.clone())
                        .collect();
                    result.sort_by_key(|r| r.status_timestamp());
                    Ok(result)
                })
                .await
        }

        async fn save(&self, request: &BackupRequest) -> CoreResult<BackupRequest> {
            self.connection
                .run(|| async {
                    self.requests
                        .insert(request.backup_request_id.0.clone(), request.clone());
                    self.save_count.fetch_add(1, Ordering::SeqCst);
                    Ok(request.clone())
                })
                .await
        }
    }

    /// In-memory implementation of the backup repository
    pub struct MemoryBackupRepository {
        connection: Arc<MemoryConnection>,
        backups: Arc<DashMap<String, Backup>>,
    }

    impl MemoryBackupRepository {
        /// Create a new memory backup repository
        pub fn new(connection: Arc<MemoryConnection>) -> Self {
            Self {
                connection,
                backups: Arc::new(DashMap::with_capacity(64)),
            }
        }

        /// Number of stored backups
        pub fn len(&self) -> usize {
            self.backups.len()
        }

        /// Whether no backup is stored
        pub fn is_empty(&self) -> bool {
            self.backups.is_empty()
        }
    }

    impl Default for MemoryBackupRepository {
        fn default() -> Self {
            Self::new(Arc::new(MemoryConnection::new()))
        }
    }

    #[async_trait]
    impl BackupRepository for MemoryBackupRepository {
        async fn get_by_backup_request_id(&self, id: &BackupRequestId) -> CoreResult<Option<Backup>> {
            self.connection
                .run(|| async {
                    Ok(self
                        .backups
                        .iter()
                        .find(|b| b.backup_request_id == *id)
                        .map(|b| b.clone()))
                })
                .await
        }

        async fn save(&self, backup: &Backup) -> CoreResult<Backup> {
            self.connection
                .run(|| async {
                    self.backups.insert(backup.backup_id.0.clone(), backup.clone());
                    Ok(backup.clone())
                })
                .await
        }
    }

    /// Fixed set of backup jobs
    #[derive(Default)]
    pub struct MemoryBackupJobService {
        jobs: DashMap<String, BackupJob>,
    }

    impl MemoryBackupJobService {
        /// Create an empty job service
        pub fn new() -> Self {
            Self::default()
        }

        /// Add or replace a job
        pub fn insert(&self, job: BackupJob) {
            self.jobs.insert(job.backup_job_id.0.clone(), job);
        }
    }

    #[async_trait]
    impl BackupJobService for MemoryBackupJobService {
        async fn get_by_id(&self, id: &BackupJobId) -> CoreResult<BackupJob> {
            self.jobs
                .get(&id.0)
                .map(|j| j.clone())
                .ok_or_else(|| CoreError::NotFound(format!("Backup job {}", id)))
        }
    }

    /// Interface store that records what it was sent
    #[derive(Default)]
    pub struct MemoryInterfaceStore {
        sent: parking_lot::Mutex<Vec<BackupRequestId>>,
    }

    impl MemoryInterfaceStore {
        /// Create an empty interface store
        pub fn new() -> Self {
            Self::default()
        }

        /// Ids of every request sent so far, in order
        pub fn sent(&self) -> Vec<BackupRequestId> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl BackupInterfaceStore for MemoryInterfaceStore {
        async fn send_request(&self, request: &BackupRequest) -> CoreResult<()> {
            self.sent.lock().push(request.backup_request_id.clone());
            Ok(())
        }
    }

    /// Reply source fed by the test
    #[derive(Default)]
    pub struct MemoryReplySource {
        replies: parking_lot::Mutex<std::collections::VecDeque<StoreStatusReply>>,
    }

    impl MemoryReplySource {
        /// Create an empty reply source
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a reply as if the interface had written it
        pub fn push(&self, reply: StoreStatusReply) {
            self.replies.lock().push_back(reply);
        }

        /// Replies not taken yet
        pub fn len(&self) -> usize {
            self.replies.lock().len()
        }

        /// Whether every reply was taken
        pub fn is_empty(&self) -> bool {
            self.replies.lock().is_empty()
        }
    }

    #[async_trait]
    impl StoreStatusReplySource for MemoryReplySource {
        async fn next_reply(&self) -> CoreResult<Option<StoreStatusReply>> {
            Ok(self.replies.lock().pop_front())
        }
    }
}
