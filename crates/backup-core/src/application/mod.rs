use std::sync::Arc;

use crate::config::RestartStalledConfig;
use crate::domain::repository::{
    BackupInterfaceStore, BackupJobService, BackupRepository, BackupRequestRepository,
};
use crate::event_bus::EventBus;

/// Accept a new backup request from the API
pub mod accept;

/// Persist an accepted request
pub mod receive;

/// Check the request against its backup job
pub mod check_allowed;

/// Hand an allowed request to the backup interface
pub mod send_to_interface;

/// Apply the interface's reply
pub mod receive_store_status_reply;

/// Re-drive requests that stopped moving
pub mod restart_stalled;

/// Event handlers chaining the saga steps
pub mod subscribers;

/// Reads interface replies into the saga
pub mod reply_poller;

pub use accept::{AcceptBackupRequest, AcceptBackupRequestDto};
pub use check_allowed::CheckAllowed;
pub use receive::ReceiveBackupRequest;
pub use receive_store_status_reply::ReceiveStoreStatusReply;
pub use reply_poller::StoreStatusReplyPoller;
pub use restart_stalled::{RestartStalled, RestartStalledResult};
pub use send_to_interface::SendToInterface;

/// Everything the saga use cases talk to
#[derive(Clone)]
pub struct SagaDependencies {
    /// Backup request store
    pub request_repo: Arc<dyn BackupRequestRepository>,
    /// Backup store
    pub backup_repo: Arc<dyn BackupRepository>,
    /// Backup job lookup
    pub job_service: Arc<dyn BackupJobService>,
    /// Outbound interface
    pub interface_store: Arc<dyn BackupInterfaceStore>,
    /// Bus the steps publish on
    pub event_bus: Arc<dyn EventBus>,
}

/// The backup request saga, one use case per step
pub struct BackupRequestSaga {
    /// Accept step
    pub accept: Arc<AcceptBackupRequest>,
    /// Receive step
    pub receive: Arc<ReceiveBackupRequest>,
    /// Allowed check step
    pub check_allowed: Arc<CheckAllowed>,
    /// Send step
    pub send_to_interface: Arc<SendToInterface>,
    /// Reply step
    pub receive_store_status_reply: Arc<ReceiveStoreStatusReply>,
    /// Stalled request recovery
    pub restart_stalled: Arc<RestartStalled>,
}

impl BackupRequestSaga {
    /// Build every use case over the same dependencies
    pub fn new(deps: SagaDependencies, restart_config: RestartStalledConfig) -> Self {
        Self {
            accept: Arc::new(AcceptBackupRequest::new(deps.event_bus.clone())),
            receive: Arc::new(ReceiveBackupRequest::new(
                deps.request_repo.clone(),
                deps.event_bus.clone(),
            )),
            check_allowed: Arc::new(CheckAllowed::new(
                deps.request_repo.clone(),
                deps.job_service.clone(),
                deps.event_bus.clone(),
            )),
            send_to_interface: Arc::new(SendToInterface::new(
                deps.request_repo.clone(),
                deps.interface_store.clone(),
                deps.event_bus.clone(),
            )),
            receive_store_status_reply: Arc::new(ReceiveStoreStatusReply::new(
                deps.request_repo.clone(),
                deps.backup_repo.clone(),
            )),
            restart_stalled: Arc::new(RestartStalled::new(
                deps.request_repo,
                deps.event_bus,
                restart_config,
            )),
        }
    }

    /// Subscribe every saga step to the event that triggers it
    pub fn subscribe(&self, bus: &dyn EventBus) {
        subscribers::subscribe_saga(bus, self);
    }
}
