/// Backup request aggregate and its status machine
pub mod backup_request;

/// Backup job reference data
pub mod backup_job;

/// Backup records
pub mod backup;

/// Replies from the backup interface
pub mod store_status;

/// Domain events and the delivery envelope
pub mod events;

/// Repository interfaces
pub mod repository;
