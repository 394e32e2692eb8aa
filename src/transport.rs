use crate::readings::Reading;
use crate::signer::Signer;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

pub const INGEST_PATH: &str = "/api/ingest/readings";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const HEADER_TIMESTAMP: &str = "X-Timestamp";
const HEADER_DEVICE_ID: &str = "X-Device-Id";
const HEADER_SIGNATURE: &str = "X-Signature";
const HEADER_IDEMPOTENCY_KEY: &str = "Idempotency-Key";
const HEADER_RATE_LIMIT_REMAINING: &str = "X-RateLimit-Remaining";

#[derive(Serialize)]
struct ReadingsPayload<'a> {
    readings: &'a [Reading],
}

/// A serialized batch plus everything the server needs to authenticate it. `body` is the
/// exact byte sequence that was signed and is sent as-is.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub body: Vec<u8>,
    pub timestamp: String,
    pub device_id: String,
    pub idempotency_key: Uuid,
    pub signature: String,
}

impl SignedRequest {
    pub fn build(
        signer: &Signer,
        device_id: &str,
        batch: &[Reading],
    ) -> Result<Self, serde_json::Error> {
        Self::build_at(signer, device_id, batch, Utc::now())
    }

    pub fn build_at(
        signer: &Signer,
        device_id: &str,
        batch: &[Reading],
        now: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(&ReadingsPayload { readings: batch })?;
        let timestamp = now.to_rfc3339_opts(SecondsFormat::Micros, true);
        let signature = signer.sign(&body, &timestamp, device_id);
        Ok(Self {
            body,
            timestamp,
            device_id: device_id.to_string(),
            idempotency_key: Uuid::new_v4(),
            signature,
        })
    }
}

/// Success body: `{"processed": n, "errors": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IngestResponse {
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub errors: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
}

/// Failure body: `{"error": {"message": "..."}}`.
#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Accepted {
        response: IngestResponse,
        rate_limit_remaining: Option<String>,
    },
    Rejected {
        status: StatusCode,
        error: Option<ErrorDetail>,
        rate_limit_remaining: Option<String>,
    },
    TransportFailure {
        cause: String,
    },
}

impl BatchOutcome {
    pub fn rate_limit_remaining(&self) -> Option<&str> {
        match self {
            BatchOutcome::Accepted {
                rate_limit_remaining,
                ..
            }
            | BatchOutcome::Rejected {
                rate_limit_remaining,
                ..
            } => rate_limit_remaining.as_deref(),
            BatchOutcome::TransportFailure { .. } => None,
        }
    }
}

/// Makes exactly one delivery attempt per call and never retries.
pub trait BatchSender {
    fn send(&self, request: &SignedRequest) -> impl Future<Output = BatchOutcome>;
}

/// Reusable HTTP client bound to one ingest endpoint for the lifetime of a run.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}{INGEST_PATH}", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl BatchSender for HttpTransport {
    async fn send(&self, request: &SignedRequest) -> BatchOutcome {
        let result = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(HEADER_TIMESTAMP, request.timestamp.as_str())
            .header(HEADER_DEVICE_ID, request.device_id.as_str())
            .header(HEADER_SIGNATURE, request.signature.as_str())
            .header(HEADER_IDEMPOTENCY_KEY, request.idempotency_key.to_string())
            .body(request.body.clone())
            .send()
            .await;
        let response = match result {
            Ok(response) => response,
            Err(err) => return transport_failure(&err),
        };

        let status = response.status();
        let rate_limit_remaining = response
            .headers()
            .get(HEADER_RATE_LIMIT_REMAINING)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => return transport_failure(&err),
        };

        if !status.is_success() {
            let error = serde_json::from_slice::<ErrorPayload>(&body)
                .ok()
                .map(|payload| payload.error);
            return BatchOutcome::Rejected {
                status,
                error,
                rate_limit_remaining,
            };
        }

        if body.is_empty() {
            return BatchOutcome::Accepted {
                response: IngestResponse::default(),
                rate_limit_remaining,
            };
        }
        match serde_json::from_slice::<IngestResponse>(&body) {
            Ok(response) => BatchOutcome::Accepted {
                response,
                rate_limit_remaining,
            },
            Err(err) => BatchOutcome::TransportFailure {
                cause: format!("invalid response body ({status}): {err}"),
            },
        }
    }
}

fn transport_failure(err: &reqwest::Error) -> BatchOutcome {
    let cause = if err.is_timeout() {
        format!("request timed out: {err}")
    } else {
        err.to_string()
    };
    BatchOutcome::TransportFailure { cause }
}
