//! JSON-over-HTTP batch sender
//!
//! Every element of every file in a batch is a serialized JSON object. The
//! sender decodes them and POSTs a single JSON array to the collector, then
//! maps the response status through a [`StatusPolicy`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use drover_pipeline::{BatchSender, PipelineResult, SealedFile};

use crate::error::{TransportError, TransportResult};
use crate::policy::{DeliveryOutcome, StatusPolicy};

/// Configuration for the HTTP sender
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSenderConfig {
    /// Collector URL receiving the POST
    pub endpoint: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Optional bearer token sent as `Authorization`
    pub bearer_token: Option<String>,
    /// `User-Agent` header
    pub user_agent: String,
    /// Status code mapping
    pub status_policy: StatusPolicy,
}

impl Default for HttpSenderConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_secs: 30,
            bearer_token: None,
            user_agent: format!("drover/{}", env!("CARGO_PKG_VERSION")),
            status_policy: StatusPolicy::default(),
        }
    }
}

impl HttpSenderConfig {
    /// Create a configuration for `endpoint`
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set the bearer token
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Set the status code mapping
    pub fn with_status_policy(mut self, policy: StatusPolicy) -> Self {
        self.status_policy = policy;
        self
    }
}

/// Uploads sealed batches to an HTTP collector
#[derive(Debug, Clone)]
pub struct HttpBatchSender {
    config: HttpSenderConfig,
    endpoint: reqwest::Url,
    client: reqwest::Client,
}

impl HttpBatchSender {
    /// Create a sender, validating the endpoint
    pub fn new(config: HttpSenderConfig) -> TransportResult<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(TransportError::Config("endpoint is empty".to_string()));
        }
        let endpoint = reqwest::Url::parse(&config.endpoint).map_err(|e| {
            TransportError::Config(format!("invalid endpoint {}: {}", config.endpoint, e))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(TransportError::Config(format!(
                "unsupported scheme {}",
                endpoint.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            config,
            endpoint,
            client,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &HttpSenderConfig {
        &self.config
    }

    /// Decode every element of the batch into one JSON array
    ///
    /// Elements that are not valid JSON are skipped.
    pub async fn build_payload(&self, batch: &[SealedFile]) -> TransportResult<Vec<Value>> {
        let mut payload = Vec::new();
        for file in batch {
            let mut skipped = 0usize;
            file.for_each_element(|element| {
                match serde_json::from_slice::<Value>(element) {
                    Ok(value) => payload.push(value),
                    Err(_) => skipped += 1,
                }
                true
            })
            .await?;
            if skipped > 0 {
                warn!(file = %file.name, skipped, "Skipped elements that are not valid JSON");
            }
        }
        Ok(payload)
    }

    /// POST a payload and classify the response
    pub async fn post(&self, payload: &[Value]) -> TransportResult<DeliveryOutcome> {
        let mut request = self.client.post(self.endpoint.clone()).json(payload);
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let outcome = self.config.status_policy.classify(status);
        match outcome {
            DeliveryOutcome::Accepted => debug!(status, "Collector accepted batch"),
            DeliveryOutcome::Consumed => {
                let body = response.text().await.unwrap_or_default();
                warn!(status, body = %body, "Collector rejected batch, dropping it");
            }
            DeliveryOutcome::Retry => info!(status, "Collector unavailable, batch kept"),
        }
        Ok(outcome)
    }
}

#[async_trait]
impl BatchSender for HttpBatchSender {
    #[instrument(skip_all, fields(files = batch.len()))]
    async fn send(&self, batch: &[SealedFile]) -> PipelineResult<bool> {
        let payload = self.build_payload(batch).await?;
        if payload.is_empty() {
            debug!("Batch has no deliverable events");
            return Ok(true);
        }

        let outcome = self.post(&payload).await?;
        Ok(outcome.is_final())
    }
}
