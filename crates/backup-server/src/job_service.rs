//! HTTP client for the backup job service

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backup_core::resilience::AdapterLivenessCheck;
use backup_core::{
    BackupJob, BackupJobId, BackupJobService, CircuitBreaker, CircuitBreakerConfig, CoreError,
    CoreResult,
};
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::BackupJobServiceConfig;
use crate::error::{ServerError, ServerResult};

fn is_connect_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

/// Liveness probe: `GET {base}/health` answers with a success status
struct HealthEndpoint {
    client: Client,
    url: String,
}

#[async_trait]
impl AdapterLivenessCheck for HealthEndpoint {
    async fn is_alive(&self) -> CoreResult<bool> {
        match self.client.get(&self.url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                debug!("Backup job service liveness check failed: {}", e);
                Ok(false)
            }
        }
    }
}

/// Backup job lookups over HTTP, guarded by their own breaker
pub struct HttpBackupJobService {
    client: Client,
    base_url: String,
    breaker: Arc<CircuitBreaker>,
}

impl HttpBackupJobService {
    /// Create the client and its breaker
    pub fn new(
        config: &BackupJobServiceConfig,
        breaker_config: CircuitBreakerConfig,
        shutdown: &CancellationToken,
    ) -> ServerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ServerError::StartupError(format!("Failed to create HTTP client: {}", e)))?;
        let base_url = config.base_url.trim_end_matches('/').to_string();

        let liveness = Arc::new(HealthEndpoint {
            client: client.clone(),
            url: format!("{}/health", base_url),
        });

        Ok(Self {
            breaker: CircuitBreaker::with_cancellation(breaker_config, liveness, shutdown),
            client,
            base_url,
        })
    }

    /// The breaker guarding the service
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    fn job_url(&self, id: &BackupJobId) -> String {
        format!("{}/backup-jobs/{}", self.base_url, id)
    }

    async fn fetch(&self, id: &BackupJobId) -> CoreResult<BackupJob> {
        let response = self.client.get(self.job_url(id)).send().await.map_err(|e| {
            if is_connect_error(&e) {
                warn!(service = %self.breaker.service_name(), "Backup job service unreachable: {}", e);
                CoreError::backup_job_service_connect(e.to_string(), self.breaker.connect_failure_info())
            } else {
                CoreError::backup_job_service(e.to_string())
            }
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(CoreError::NotFound(format!("Backup job {}", id))),
            status if status.is_success() => response
                .json::<BackupJob>()
                .await
                .map_err(|e| CoreError::PropsError(format!("Malformed backup job {}: {}", id, e))),
            status => Err(CoreError::backup_job_service(format!(
                "Backup job service answered {} for {}",
                status, id
            ))),
        }
    }
}

#[async_trait]
impl BackupJobService for HttpBackupJobService {
    async fn get_by_id(&self, id: &BackupJobId) -> CoreResult<BackupJob> {
        if !self.breaker.is_connected() {
            return Err(CoreError::backup_job_service_connect(
                "circuit open, backup job service not called",
                self.breaker.connect_failure_info(),
            ));
        }

        let result = self.fetch(id).await;
        self.breaker.record_outcome(&result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_core::CircuitState;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(base_url: &str) -> HttpBackupJobService {
        let config = BackupJobServiceConfig {
            base_url: base_url.to_string(),
            timeout_ms: 500,
        };
        let breaker = CircuitBreakerConfig {
            failure_to_open_count: 1,
            ..CircuitBreakerConfig::for_service("backup-job-service")
        };
        HttpBackupJobService::new(&config, breaker, &CancellationToken::new()).unwrap()
    }

    #[tokio::test]
    async fn test_fetches_job() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/backup-jobs/job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "backupJobId": "job-1",
                "storagePathName": "storage/path",
                "backupProviderCode": "CloudA",
                "daysToKeep": 30,
                "isActive": true
            })))
            .mount(&server)
            .await;

        let job = service(&format!("{}/", server.uri()))
            .get_by_id(&BackupJobId("job-1".to_string()))
            .await
            .unwrap();

        assert_eq!(job.backup_provider_code, "CloudA");
        assert!(!job.hold_flag);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/backup-jobs/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/backup-jobs/broken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "backupJobId": "broken" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/backup-jobs/flaky"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        let service = service(&server.uri());

        let missing = service.get_by_id(&BackupJobId("missing".to_string())).await.unwrap_err();
        assert!(missing.is_not_found());

        let broken = service.get_by_id(&BackupJobId("broken".to_string())).await.unwrap_err();
        assert!(broken.is_props_error());

        let flaky = service.get_by_id(&BackupJobId("flaky".to_string())).await.unwrap_err();
        assert!(!flaky.is_connect_failure());

        // HTTP answers mean the service is reachable
        assert_ne!(service.breaker().state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_unreachable_service_opens_breaker() {
        let service = service("http://127.0.0.1:1");

        let err = service.get_by_id(&BackupJobId("job-1".to_string())).await.unwrap_err();
        assert!(err.is_connect_failure());
        assert_eq!(service.breaker().state(), CircuitState::Open);

        let err = service.get_by_id(&BackupJobId("job-1".to_string())).await.unwrap_err();
        assert!(err.to_string().contains("circuit open"));
    }
}
