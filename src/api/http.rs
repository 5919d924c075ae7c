//! HTTP implementation of [`CoordinatorApi`] over `reqwest`.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, instrument};

use super::error::{AbandonTaskDetails, ApiError, ApiResult};
use super::types::{
    AgentConfiguration, AgentUpdate, AuthResult, BenchmarkSubmission, BenchmarkSubmissionEnvelope,
    CrackAck, CrackSubmission, CrackerUpdate, ErrorSubmission, HeartbeatResponse, HeartbeatState,
    StatusAck, Task, TaskStatus,
};
use super::{Attack, CoordinatorApi};

/// Connect timeout for coordinator calls.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Overall request timeout for coordinator calls. Kept generous so large
/// error bodies and slow shared instances do not trip it.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Coordinator client carrying the base URL and bearer token.
///
/// Cheap to clone; the underlying `reqwest::Client` pools connections.
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    client: Client,
    base_url: String,
}

impl HttpApiClient {
    /// Builds a client for `base_url` presenting `token` on every request.
    ///
    /// # Errors
    ///
    /// Returns the builder error when the TLS backend cannot initialize or
    /// the token is not a valid header value.
    pub fn new(base_url: &str, token: &str) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::try_from(format!("Bearer {token}"))
            .unwrap_or_else(|_| HeaderValue::from_static("Bearer invalid"));
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/client{path}", self.base_url)
    }

    /// Maps a >= 400 response into [`ApiError::Status`], preserving the body.
    async fn status_error(operation: &'static str, response: Response) -> ApiError {
        let status_code = response.status().as_u16();
        let message = response
            .status()
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string();
        let body = response.text().await.unwrap_or_default();
        ApiError::Status {
            operation,
            status_code,
            message,
            body,
        }
    }

    /// Sends a request and splits the outcome into ok / error responses.
    async fn execute(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> ApiResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|source| ApiError::Transport { operation, source })?;
        if response.status().is_client_error() || response.status().is_server_error() {
            return Err(Self::status_error(operation, response).await);
        }
        Ok(response)
    }

    /// Parses a JSON body, converting decode failures into `BadResponse`.
    async fn json_body<T: serde::de::DeserializeOwned>(
        operation: &'static str,
        response: Response,
    ) -> ApiResult<T> {
        let body = response
            .text()
            .await
            .map_err(|source| ApiError::Transport { operation, source })?;
        if body.trim().is_empty() {
            return Err(ApiError::BadResponse {
                operation,
                reason: "empty body on success response".to_string(),
            });
        }
        serde_json::from_str(&body).map_err(|err| ApiError::BadResponse {
            operation,
            reason: format!("undecodable body: {err}"),
        })
    }
}

#[async_trait]
impl CoordinatorApi for HttpApiClient {
    #[instrument(skip(self))]
    async fn authenticate(&self) -> ApiResult<AuthResult> {
        let response = self
            .execute("authenticate", self.client.get(self.url("/authenticate")))
            .await?;
        Self::json_body("authenticate", response).await
    }

    #[instrument(skip(self))]
    async fn get_configuration(&self) -> ApiResult<AgentConfiguration> {
        let response = self
            .execute(
                "get_configuration",
                self.client.get(self.url("/configuration")),
            )
            .await?;
        Self::json_body("get_configuration", response).await
    }

    #[instrument(skip(self))]
    async fn send_heartbeat(&self, agent_id: i64) -> ApiResult<Option<HeartbeatState>> {
        let response = self
            .execute(
                "send_heartbeat",
                self.client
                    .post(self.url(&format!("/agents/{agent_id}/heartbeat"))),
            )
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let envelope: HeartbeatResponse = Self::json_body("send_heartbeat", response).await?;
        Ok(Some(envelope.state))
    }

    #[instrument(skip(self, update))]
    async fn update_agent(&self, agent_id: i64, update: &AgentUpdate) -> ApiResult<()> {
        self.execute(
            "update_agent",
            self.client
                .put(self.url(&format!("/agents/{agent_id}")))
                .json(update),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, benchmarks), fields(count = benchmarks.len()))]
    async fn submit_benchmarks(
        &self,
        agent_id: i64,
        benchmarks: &[BenchmarkSubmission],
    ) -> ApiResult<()> {
        let envelope = BenchmarkSubmissionEnvelope {
            hashcat_benchmarks: benchmarks.to_vec(),
        };
        self.execute(
            "submit_benchmarks",
            self.client
                .post(self.url(&format!("/agents/{agent_id}/submit_benchmark")))
                .json(&envelope),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, report))]
    async fn submit_error(&self, agent_id: i64, report: &ErrorSubmission) -> ApiResult<()> {
        self.execute(
            "submit_error",
            self.client
                .post(self.url(&format!("/agents/{agent_id}/submit_error")))
                .json(report),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn send_shutdown(&self, agent_id: i64) -> ApiResult<()> {
        self.execute(
            "send_shutdown",
            self.client
                .post(self.url(&format!("/agents/{agent_id}/shutdown"))),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_new_task(&self) -> ApiResult<Option<Task>> {
        let response = self
            .execute("get_new_task", self.client.get(self.url("/tasks/new")))
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            debug!("no task available");
            return Ok(None);
        }
        let task: Task = Self::json_body("get_new_task", response).await?;
        Ok(Some(task))
    }

    #[instrument(skip(self))]
    async fn accept_task(&self, task_id: i64) -> ApiResult<()> {
        self.execute(
            "accept_task",
            self.client
                .post(self.url(&format!("/tasks/{task_id}/accept_task"))),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_task_exhausted(&self, task_id: i64) -> ApiResult<()> {
        self.execute(
            "set_task_exhausted",
            self.client
                .post(self.url(&format!("/tasks/{task_id}/set_exhausted"))),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_task_abandoned(&self, task_id: i64) -> ApiResult<()> {
        let result = self
            .execute(
                "set_task_abandoned",
                self.client
                    .post(self.url(&format!("/tasks/{task_id}/set_abandoned"))),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(ApiError::Status {
                status_code: 422,
                body,
                ..
            }) => {
                let details: AbandonTaskDetails =
                    serde_json::from_str(&body).unwrap_or(AbandonTaskDetails {
                        error: body,
                        details: Vec::new(),
                    });
                Err(ApiError::Abandoned(details))
            }
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self, status))]
    async fn submit_status(&self, task_id: i64, status: &TaskStatus) -> ApiResult<StatusAck> {
        let response = self
            .execute(
                "submit_status",
                self.client
                    .post(self.url(&format!("/tasks/{task_id}/submit_status")))
                    .json(status),
            )
            .await?;
        Ok(match response.status() {
            StatusCode::NO_CONTENT => StatusAck::Accepted,
            StatusCode::ACCEPTED => StatusAck::Stale,
            _ => StatusAck::AcceptedOther,
        })
    }

    #[instrument(skip(self, crack), fields(hash = %crack.hash))]
    async fn submit_crack(&self, task_id: i64, crack: &CrackSubmission) -> ApiResult<CrackAck> {
        let response = self
            .execute(
                "submit_crack",
                self.client
                    .post(self.url(&format!("/tasks/{task_id}/submit_crack")))
                    .json(crack),
            )
            .await?;
        Ok(if response.status() == StatusCode::NO_CONTENT {
            CrackAck::HashListComplete
        } else {
            CrackAck::Accepted
        })
    }

    #[instrument(skip(self))]
    async fn get_zaps(&self, task_id: i64) -> ApiResult<Option<Vec<u8>>> {
        let response = self
            .execute(
                "get_zaps",
                self.client.get(self.url(&format!("/tasks/{task_id}/zaps"))),
            )
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|source| ApiError::Transport {
                operation: "get_zaps",
                source,
            })?;
        Ok(Some(bytes.to_vec()))
    }

    #[instrument(skip(self))]
    async fn get_attack(&self, attack_id: i64) -> ApiResult<Attack> {
        let response = self
            .execute(
                "get_attack",
                self.client.get(self.url(&format!("/attacks/{attack_id}"))),
            )
            .await?;
        Self::json_body("get_attack", response).await
    }

    #[instrument(skip(self))]
    async fn check_for_cracker_update(
        &self,
        operating_system: &str,
        version: &str,
    ) -> ApiResult<Option<CrackerUpdate>> {
        let response = self
            .execute(
                "check_for_cracker_update",
                self.client
                    .get(self.url("/crackers/check_for_cracker_update"))
                    .query(&[("operating_system", operating_system), ("version", version)]),
            )
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let update: CrackerUpdate = Self::json_body("check_for_cracker_update", response).await?;
        Ok(Some(update))
    }
}
