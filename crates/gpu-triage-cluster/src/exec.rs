// crates/gpu-triage-cluster/src/exec.rs
// ============================================================================
// Module: Exec Channel
// Description: Streaming pod-exec transport into oneshot agents.
// Purpose: Pipe a framed request into an agent's stdin and collect its
//          stdout within a bounded deadline.
// Dependencies: kube, k8s-openapi, tokio, tokio-util
// ============================================================================

//! ## Overview
//! The exec channel opens the pod-exec subresource against a specific
//! agent pod, launching the agent binary in oneshot mode with
//! `--oneshot 2` (the framing carries init + tool call, and the stream
//! only closes when the remote process exits). The caller's bytes become
//! the remote stdin; stdout and stderr are collected until the process
//! exits, the deadline expires, or cancellation fires. Captured stderr
//! rides along on timeouts so the operator sees what the agent logged.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::Client;
use kube::api::AttachParams;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment key overriding the exec deadline.
pub const EXEC_TIMEOUT_ENV: &str = "EXEC_TIMEOUT";
/// Default exec deadline.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(60);
/// Lower clamp for the exec deadline.
pub const MIN_EXEC_TIMEOUT: Duration = Duration::from_secs(1);
/// Upper clamp for the exec deadline.
pub const MAX_EXEC_TIMEOUT: Duration = Duration::from_secs(300);
/// Oneshot request count used on the exec path (init + tool call).
pub const EXEC_ONESHOT_COUNT: u32 = 2;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the exec channel.
///
/// # Invariants
/// - Variants are stable for programmatic handling by the router.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The exec stream could not be opened or failed mid-flight.
    #[error("exec stream failed for pod {pod}: {detail}")]
    Stream {
        /// Target pod name.
        pod: String,
        /// Underlying failure description.
        detail: String,
    },
    /// The deadline expired before the remote process exited.
    #[error("exec timed out after {}s; stderr: {stderr}", .elapsed.as_secs())]
    Timeout {
        /// Configured deadline that was exceeded.
        elapsed: Duration,
        /// Stderr captured before the deadline.
        stderr: String,
    },
    /// Cancellation fired before the exchange completed.
    #[error("exec cancelled")]
    Cancelled,
}

// ============================================================================
// SECTION: Timeout Resolution
// ============================================================================

/// Resolves the exec deadline from an optional environment value.
///
/// Accepts `<n>s`, `<n>ms`, or a bare integer of seconds; unparseable
/// values fall back to the default. The result is clamped to
/// `[1s, 300s]`.
#[must_use]
pub fn resolve_exec_timeout(env_value: Option<&str>) -> Duration {
    let requested = env_value.and_then(parse_duration).unwrap_or(DEFAULT_EXEC_TIMEOUT);
    requested.clamp(MIN_EXEC_TIMEOUT, MAX_EXEC_TIMEOUT)
}

/// Parses a duration literal of the form `90s`, `1500ms`, or `90`.
fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Some(millis) = value.strip_suffix("ms") {
        return millis.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(seconds) = value.strip_suffix('s') {
        return seconds.trim().parse::<u64>().ok().map(Duration::from_secs);
    }
    value.parse::<u64>().ok().map(Duration::from_secs)
}

// ============================================================================
// SECTION: Channel
// ============================================================================

/// Collected output of one exec exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Remote stdout, the protocol bytes.
    pub stdout: Vec<u8>,
    /// Remote stderr, the agent's log lines.
    pub stderr: Vec<u8>,
}

/// Streaming exec transport to a specific agent pod.
#[derive(Clone)]
pub struct ExecChannel {
    /// Namespaced pod API.
    pods: Api<Pod>,
    /// Deadline for one exchange.
    timeout: Duration,
}

impl ExecChannel {
    /// Creates a channel in the given namespace with the given deadline.
    #[must_use]
    pub fn new(client: Client, namespace: &str, timeout: Duration) -> Self {
        Self {
            pods: Api::namespaced(client, namespace),
            timeout,
        }
    }

    /// Command line that launches the agent in oneshot mode.
    #[must_use]
    pub fn oneshot_command() -> Vec<String> {
        vec![
            "gpu-triage".to_string(),
            "serve".to_string(),
            "--transport".to_string(),
            "stdio".to_string(),
            "--oneshot".to_string(),
            EXEC_ONESHOT_COUNT.to_string(),
        ]
    }

    /// Streams `payload` to the pod's stdin and collects its output.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Timeout`] (carrying captured stderr) on
    /// deadline expiry, [`ExecError::Cancelled`] when the token fires,
    /// and [`ExecError::Stream`] for attach or I/O failures.
    pub async fn invoke(
        &self,
        pod_name: &str,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, ExecError> {
        let stderr_buf: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let exchange = self.exchange(pod_name, payload, Arc::clone(&stderr_buf));
        tokio::select! {
            () = cancel.cancelled() => Err(ExecError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, exchange) => match outcome {
                Ok(result) => result,
                Err(_) => Err(ExecError::Timeout {
                    elapsed: self.timeout,
                    stderr: String::from_utf8_lossy(&drain(&stderr_buf)).into_owned(),
                }),
            },
        }
    }

    /// Runs the full attach/write/collect exchange without a deadline.
    async fn exchange(
        &self,
        pod_name: &str,
        payload: &[u8],
        stderr_buf: Arc<Mutex<Vec<u8>>>,
    ) -> Result<ExecOutput, ExecError> {
        let stream_err = |detail: String| ExecError::Stream {
            pod: pod_name.to_string(),
            detail,
        };
        let params = AttachParams::default().stdin(true).stdout(true).stderr(true);
        let mut attached = self
            .pods
            .exec(pod_name, Self::oneshot_command(), &params)
            .await
            .map_err(|err| stream_err(err.to_string()))?;
        let mut stdin = attached
            .stdin()
            .ok_or_else(|| stream_err("stdin stream unavailable".to_string()))?;
        let mut stdout = attached
            .stdout()
            .ok_or_else(|| stream_err("stdout stream unavailable".to_string()))?;
        let mut stderr = attached
            .stderr()
            .ok_or_else(|| stream_err("stderr stream unavailable".to_string()))?;

        // Stderr drains concurrently into a shared buffer so timeouts can
        // still surface what the agent logged.
        let stderr_task = tokio::spawn({
            let stderr_buf = Arc::clone(&stderr_buf);
            async move {
                let mut chunk = [0u8; 4_096];
                while let Ok(read) = stderr.read(&mut chunk).await {
                    if read == 0 {
                        break;
                    }
                    if let Ok(mut locked) = stderr_buf.lock() {
                        locked.extend_from_slice(&chunk[..read]);
                    }
                }
            }
        });

        stdin
            .write_all(payload)
            .await
            .map_err(|err| stream_err(format!("stdin write failed: {err}")))?;
        stdin
            .shutdown()
            .await
            .map_err(|err| stream_err(format!("stdin close failed: {err}")))?;
        drop(stdin);

        // Stdout hits EOF only once the remote oneshot process exits.
        let mut out = Vec::new();
        stdout
            .read_to_end(&mut out)
            .await
            .map_err(|err| stream_err(format!("stdout read failed: {err}")))?;
        let _ = stderr_task.await;
        let _ = attached.join().await;
        Ok(ExecOutput {
            stdout: out,
            stderr: drain(&stderr_buf),
        })
    }
}

/// Takes the current contents of the shared stderr buffer.
fn drain(buf: &Arc<Mutex<Vec<u8>>>) -> Vec<u8> {
    buf.lock().map(|locked| locked.clone()).unwrap_or_default()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
