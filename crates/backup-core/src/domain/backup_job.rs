use std::fmt;

use serde::{Deserialize, Serialize};

/// Value object: Backup Job ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackupJobId(pub String);

impl BackupJobId {
    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackupJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backup job, owned by the backup job service and read-only here
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupJob {
    /// Unique identifier
    pub backup_job_id: BackupJobId,

    /// Where backups for this job are stored
    pub storage_path_name: String,

    /// Which provider stores the backups
    pub backup_provider_code: String,

    /// Retention in days
    pub days_to_keep: u32,

    /// Whether the job accepts new backups
    pub is_active: bool,

    /// Whether the job is on hold
    #[serde(default)]
    pub hold_flag: bool,
}

impl BackupJob {
    /// Whether a backup request for this job may proceed
    pub fn allows_backups(&self) -> bool {
        self.is_active && !self.hold_flag
    }
}
