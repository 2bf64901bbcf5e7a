// crates/gpu-triage-gateway/src/client.rs
// ============================================================================
// Module: Agent HTTP Client
// Description: Retrying POST client to a single agent endpoint.
// Purpose: Deliver one framed request to one agent with bounded backoff.
// Dependencies: reqwest, tokio, tokio-util
// ============================================================================

//! ## Overview
//! POSTs a JSON body to `<endpoint>/mcp` and returns the whole response
//! body as bytes. Any transport error or non-2xx status is retried with
//! exponential backoff (base 100 ms, cap 2 s, three retries for four
//! total attempts). Cancellation is checked before each sleep and
//! short-circuits both the backoff and the in-flight request. The
//! underlying connection pool is shared across all fan-outs in the
//! process.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use gpu_triage_core::CORRELATION_HEADER;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Per-request deadline.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// First backoff delay.
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);
/// Backoff ceiling.
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);
/// Retries after the first attempt (four attempts total).
pub const MAX_RETRIES: u32 = 3;
/// Idle connections kept per agent host.
pub const POOL_MAX_IDLE_PER_HOST: usize = 10;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the agent HTTP client.
///
/// # Invariants
/// - Variants are stable for programmatic handling by the router.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The shared HTTP client could not be constructed.
    #[error("http client build failed: {0}")]
    Build(String),
    /// All attempts against the endpoint failed.
    #[error("post to {endpoint} failed after {attempts} attempts: {detail}")]
    Transport {
        /// Endpoint that was targeted.
        endpoint: String,
        /// Attempts made before giving up.
        attempts: u32,
        /// Last failure description.
        detail: String,
    },
    /// Cancellation fired before a reply arrived.
    #[error("request cancelled")]
    Cancelled,
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Retrying POST client to agent `/mcp` endpoints.
#[derive(Clone)]
pub struct AgentHttpClient {
    /// Shared pooled HTTP client.
    client: reqwest::Client,
}

impl AgentHttpClient {
    /// Builds the client with the shared pool and request deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Build`] when the underlying client cannot
    /// be constructed.
    pub fn new() -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .build()
            .map_err(|err| ClientError::Build(err.to_string()))?;
        Ok(Self {
            client,
        })
    }

    /// POSTs `payload` to `<endpoint>/mcp` and returns the reply bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Cancelled`] when the token fires and
    /// [`ClientError::Transport`] when every attempt fails.
    pub async fn post(
        &self,
        endpoint: &str,
        payload: &[u8],
        correlation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ClientError> {
        let url = format!("{endpoint}/mcp");
        let mut delay = RETRY_BASE_DELAY;
        let mut last_detail = String::new();
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                if cancel.is_cancelled() {
                    return Err(ClientError::Cancelled);
                }
                tokio::select! {
                    () = cancel.cancelled() => return Err(ClientError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
                delay = (delay * 2).min(RETRY_MAX_DELAY);
            }
            let send = self
                .client
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .header(CORRELATION_HEADER, correlation_id)
                .body(payload.to_vec())
                .send();
            let outcome = tokio::select! {
                () = cancel.cancelled() => return Err(ClientError::Cancelled),
                outcome = send => outcome,
            };
            match outcome {
                Ok(response) if response.status().is_success() => {
                    match response.bytes().await {
                        Ok(body) => return Ok(body.to_vec()),
                        Err(err) => last_detail = format!("body read failed: {err}"),
                    }
                }
                Ok(response) => {
                    let status = response.status();
                    // Drain the body so the connection can be reused; a
                    // drain failure rides along in the retry detail.
                    last_detail = match response.bytes().await {
                        Ok(_) => format!("unexpected status {status}"),
                        Err(err) => {
                            format!("unexpected status {status}; body drain failed: {err}")
                        }
                    };
                }
                Err(err) => last_detail = err.to_string(),
            }
        }
        Err(ClientError::Transport {
            endpoint: endpoint.to_string(),
            attempts: MAX_RETRIES + 1,
            detail: last_detail,
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
