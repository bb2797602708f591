//! Streaming relay to the completion backend
//!
//! Opens a streaming HTTP call, decodes the NDJSON response incrementally and
//! forwards normalized [`StreamEvent`]s to a single consumer over a channel.

use std::fmt::Display;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tokio_stream::StreamExt;

use super::ndjson::{parse_record, ControlTokenFilter, LineBuffer};
use super::types::{CompletionRequest, ModelInfo, ModelList, StreamEvent};
use crate::config::Config;

/// Timeout for short administrative calls (model listing, readiness)
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Initial backoff duration for connect retries (100ms)
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Maximum backoff duration for connect retries (2 seconds)
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// Error type for relay operations
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Completion backend unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Completion backend returned HTTP {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("Completion backend reported an error: {0}")]
    Upstream(String),

    #[error("Malformed chunk: {0}")]
    MalformedChunk(String),

    #[error("Timeout waiting for completion backend")]
    Timeout,

    #[error("Completion stream ended before the answer was complete")]
    Incomplete,

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl RelayError {
    /// Returns true if opening the request may succeed on a second attempt
    pub fn is_transient(&self) -> bool {
        match self {
            RelayError::UpstreamUnavailable(_) => true,
            RelayError::UpstreamStatus { status, .. } => matches!(status, 502..=504),

            RelayError::Upstream(_) => false,
            RelayError::MalformedChunk(_) => false,
            RelayError::Timeout => false,
            RelayError::Incomplete => false,
            RelayError::Client(_) => false,
        }
    }

    /// Message shown to the owning client
    pub fn client_message(&self) -> String {
        match self {
            RelayError::UpstreamUnavailable(_) | RelayError::UpstreamStatus { .. } => {
                "AI service is unavailable, please try again later".to_string()
            }
            RelayError::Timeout => "AI service timed out, please try again".to_string(),
            RelayError::Incomplete => "AI response was interrupted, please try again".to_string(),
            RelayError::Upstream(msg) => format!("AI service error: {msg}"),
            RelayError::MalformedChunk(_) | RelayError::Client(_) => {
                "AI request failed".to_string()
            }
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RelayError::Timeout
        } else if err.is_connect() || err.is_request() {
            RelayError::UpstreamUnavailable(err.to_string())
        } else {
            RelayError::Client(err.to_string())
        }
    }
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Client for the completion backend
#[derive(Clone)]
pub struct StreamRelay {
    http_client: Client,
    base_url: String,
    chunk_timeout: Duration,
    pull_timeout: Duration,
    connect_retries: usize,
}

impl StreamRelay {
    /// Create a relay from configuration
    pub fn new(config: &Config) -> RelayResult<Self> {
        let http_client = Client::builder()
            .connect_timeout(config.llm_connect_timeout())
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| RelayError::Client(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.llm_base_url.clone(),
            chunk_timeout: config.llm_chunk_timeout(),
            pull_timeout: config.llm_pull_timeout(),
            connect_retries: config.llm_connect_retries,
        })
    }

    /// Stream one completion to `sink`
    ///
    /// Emits `Token` for every filtered fragment and a single `Done` on
    /// success; on failure a single `Error` is emitted and the error is
    /// returned. The accumulated text is returned for persistence.
    pub async fn relay(
        &self,
        request: &CompletionRequest,
        sink: &mpsc::UnboundedSender<StreamEvent>,
    ) -> RelayResult<String> {
        tracing::debug!(
            model = %request.model(),
            path = request.path(),
            "Opening completion stream"
        );

        let result = match self.open_stream(request).await {
            Ok(response) => {
                relay_stream(Box::pin(response.bytes_stream()), sink, self.chunk_timeout).await
            }
            Err(e) => Err(e),
        };

        if let Err(ref e) = result {
            tracing::warn!(model = %request.model(), error = %e, "Completion relay failed");
            let _ = sink.send(StreamEvent::Error(e.client_message()));
        }
        result
    }

    /// Send the request, retrying only connection-level failures
    ///
    /// Nothing has been streamed yet at this point, so a retry cannot
    /// duplicate tokens.
    async fn open_stream(&self, request: &CompletionRequest) -> RelayResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, request.path());
        let body = request.to_body();

        let strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY.as_millis() as u64)
            .max_delay(RETRY_MAX_DELAY)
            .map(jitter)
            .take(self.connect_retries);

        let client = &self.http_client;
        let url = url.as_str();
        let body = &body;
        let header_timeout = self.chunk_timeout;

        RetryIf::spawn(
            strategy,
            move || async move {
                // The connect timeout does not cover a backend that accepts
                // the connection and then never answers.
                let send = client
                    .post(url)
                    .header("Accept", "application/x-ndjson")
                    .json(body)
                    .send();
                let response = tokio::time::timeout(header_timeout, send)
                    .await
                    .map_err(|_| RelayError::Timeout)??;

                let status = response.status();
                if !status.is_success() {
                    let body = tokio::time::timeout(header_timeout, response.text())
                        .await
                        .ok()
                        .and_then(Result::ok)
                        .unwrap_or_default();
                    return Err(RelayError::UpstreamStatus {
                        status: status.as_u16(),
                        body,
                    });
                }
                Ok::<_, RelayError>(response)
            },
            |e: &RelayError| {
                let retry = e.is_transient();
                if retry {
                    tracing::debug!(error = %e, "Retrying completion request");
                }
                retry
            },
        )
        .await
    }

    /// List models installed on the completion backend
    pub async fn list_models(&self) -> RelayResult<Vec<ModelInfo>> {
        let response = self
            .http_client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(METADATA_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::UpstreamStatus {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let list: ModelList = response.json().await?;
        Ok(list.models)
    }

    /// Download a model onto the completion backend
    ///
    /// Administrative call: a pull can take minutes, so it gets the long
    /// timeout instead of the per-chunk budget used for chat.
    pub async fn pull_model(&self, name: &str) -> RelayResult<String> {
        tracing::info!(model = %name, timeout = ?self.pull_timeout, "Pulling model");

        let response = self
            .http_client
            .post(format!("{}/api/pull", self.base_url))
            .timeout(self.pull_timeout)
            .json(&serde_json::json!({ "name": name, "stream": false }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::UpstreamStatus {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: serde_json::Value = response.json().await?;
        if let Some(error) = body.get("error").and_then(|e| e.as_str()) {
            return Err(RelayError::Upstream(error.to_string()));
        }
        Ok(body
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("success")
            .to_string())
    }

    /// Cheap reachability probe used by the readiness check
    pub async fn is_reachable(&self) -> bool {
        self.list_models().await.is_ok()
    }
}

/// Decode an NDJSON byte stream and forward events to `sink`
///
/// Malformed records are logged and skipped. Each read is bounded by
/// `chunk_timeout`, so a stalled upstream surfaces as [`RelayError::Timeout`].
/// A closed sink does not stop the relay: the caller may still want the
/// accumulated answer.
pub async fn relay_stream<S, E>(
    mut stream: S,
    sink: &mpsc::UnboundedSender<StreamEvent>,
    chunk_timeout: Duration,
) -> RelayResult<String>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut lines = LineBuffer::new();
    let mut decoded = Decoded::default();

    loop {
        while let Some(line) = lines.next_line() {
            if decoded.handle_line(line, sink)? {
                return Ok(decoded.full_text);
            }
        }

        let next = tokio::time::timeout(chunk_timeout, stream.next())
            .await
            .map_err(|_| RelayError::Timeout)?;

        match next {
            Some(Ok(chunk)) => lines.extend(&chunk),
            Some(Err(e)) => return Err(RelayError::UpstreamUnavailable(e.to_string())),
            None => {
                if let Some(line) = lines.finish() {
                    if decoded.handle_line(line, sink)? {
                        return Ok(decoded.full_text);
                    }
                }
                tracing::warn!(
                    received_chars = decoded.full_text.len(),
                    skipped_records = decoded.skipped,
                    "Completion stream closed without a done record"
                );
                return Err(RelayError::Incomplete);
            }
        }
    }
}

/// Decoder state carried across lines of one stream
#[derive(Default)]
struct Decoded {
    full_text: String,
    skipped: usize,
    filter: ControlTokenFilter,
}

impl Decoded {
    /// Process one line; returns `Ok(true)` once the done record was seen
    fn handle_line(
        &mut self,
        line: Result<String, RelayError>,
        sink: &mpsc::UnboundedSender<StreamEvent>,
    ) -> RelayResult<bool> {
        let chunk = match line.and_then(|l| parse_record(&l)) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.skipped += 1;
                tracing::warn!(error = %e, "Skipping malformed completion record");
                return Ok(false);
            }
        };

        if let Some(error) = chunk.error {
            return Err(RelayError::Upstream(error));
        }

        if let Some(text) = chunk.text().and_then(|t| self.filter.push(t)) {
            self.emit(text, sink);
        }

        if chunk.done {
            if let Some(rest) = self.filter.flush() {
                self.emit(rest, sink);
            }
            let _ = sink.send(StreamEvent::Done);
            return Ok(true);
        }
        Ok(false)
    }

    fn emit(&mut self, text: String, sink: &mpsc::UnboundedSender<StreamEvent>) {
        self.full_text.push_str(&text);
        if sink.send(StreamEvent::Token(text)).is_err() {
            tracing::trace!("Relay sink closed, continuing to accumulate");
        }
    }
}
