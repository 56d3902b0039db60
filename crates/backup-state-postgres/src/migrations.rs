/// Generate SQL migrations for the PostgreSQL store
///
/// Each entry is a version and a batch of statements, applied once and in
/// order. The full aggregate lives in `data`; the other columns exist for
/// lookups and recovery queries.
pub fn generate_migrations() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "20260101000000_initial_schema",
            r#"
            CREATE TABLE IF NOT EXISTS backup_requests (
                backup_request_id TEXT PRIMARY KEY,
                backup_job_id TEXT NOT NULL,
                status_type TEXT NOT NULL,
                status_timestamp TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE TABLE IF NOT EXISTS backups (
                backup_id TEXT PRIMARY KEY,
                backup_request_id TEXT NOT NULL UNIQUE,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
        ),
        (
            "20260102000000_stalled_request_index",
            r#"
            -- Backs the stalled request scan run at startup
            CREATE INDEX IF NOT EXISTS idx_backup_requests_status
                ON backup_requests(status_type, status_timestamp);
            "#,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered_and_unique() {
        let migrations = generate_migrations();
        let versions: Vec<&str> = migrations.iter().map(|(v, _)| *v).collect();

        let mut sorted = versions.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(versions, sorted);
    }

    #[test]
    fn test_schema_covers_recovery_lookup() {
        let sql: String = generate_migrations().into_iter().map(|(_, s)| s).collect();

        assert!(sql.contains("CREATE TABLE IF NOT EXISTS backup_requests"));
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS backups"));
        assert!(sql.contains("ON backup_requests(status_type, status_timestamp)"));
    }
}
