// crates/gpu-triage-mcp/src/oneshot.rs
// ============================================================================
// Module: Oneshot Stdio Transport
// Description: Line-delimited JSON-RPC loop with deterministic exit.
// Purpose: Serve exactly N requests from an input stream, then stop.
// Dependencies: gpu-triage-core, tokio, tokio-util
// ============================================================================

//! ## Overview
//! The transport reads one line at a time, hands each to the dispatcher,
//! and writes the newline-terminated reply. Empty lines are skipped and
//! never count toward the request budget; non-JSON lines produce a
//! `-32700` reply (preserving an extractable id) and count as errors;
//! dispatched lines count as processed. The loop exits when the budget is
//! met, on end of input, or on cancellation. The line read runs inside a
//! `select!` against the cancellation token, so a blocked read is
//! abandoned immediately and the input handle is released when the loop
//! returns; no line beyond the budget is ever consumed.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use gpu_triage_core::rpc;
use gpu_triage_core::rpc::JsonRpcRequest;
use gpu_triage_core::rpc::JsonRpcResponse;

use crate::tools::RequestContext;
use crate::tools::ToolDispatcher;
use crate::tools::dispatch_request;

// ============================================================================
// SECTION: Stats and Errors
// ============================================================================

/// Counters describing one transport run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OneshotStats {
    /// Lines successfully dispatched.
    pub processed: u32,
    /// Non-JSON lines answered with a parse error.
    pub errors: u32,
    /// Empty lines skipped without a reply.
    pub skipped: u32,
}

/// Oneshot transport errors.
///
/// # Invariants
/// - Failure variants carry the partial stats collected so far.
#[derive(Debug, Error)]
pub enum OneshotError {
    /// The transport was misconfigured.
    #[error("oneshot config invalid: {0}")]
    Config(String),
    /// The input or output stream failed.
    #[error("oneshot stream failed after {} replies: {detail}", .stats.processed)]
    Io {
        /// Stats collected before the failure.
        stats: OneshotStats,
        /// Underlying failure description.
        detail: String,
    },
    /// Cancellation fired while the loop was running.
    #[error("oneshot cancelled after {} replies", .stats.processed)]
    Cancelled {
        /// Stats collected before cancellation.
        stats: OneshotStats,
    },
}

// ============================================================================
// SECTION: Transport
// ============================================================================

/// Line-delimited stdio transport over a dispatcher.
pub struct OneshotTransport {
    /// Dispatcher serialized behind this loop.
    dispatcher: Arc<dyn ToolDispatcher>,
    /// Request budget; `None` serves until end of input.
    limit: Option<u32>,
}

impl std::fmt::Debug for OneshotTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneshotTransport")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl OneshotTransport {
    /// Creates a transport that exits after `max_requests` replies.
    ///
    /// # Errors
    ///
    /// Returns [`OneshotError::Config`] when `max_requests` is zero.
    pub fn new(dispatcher: Arc<dyn ToolDispatcher>, max_requests: u32) -> Result<Self, OneshotError> {
        if max_requests < 1 {
            return Err(OneshotError::Config("max_requests must be at least 1".to_string()));
        }
        Ok(Self {
            dispatcher,
            limit: Some(max_requests),
        })
    }

    /// Creates a transport that serves until end of input.
    #[must_use]
    pub fn unbounded(dispatcher: Arc<dyn ToolDispatcher>) -> Self {
        Self {
            dispatcher,
            limit: None,
        }
    }

    /// Runs the loop over the given streams.
    ///
    /// # Errors
    ///
    /// Returns [`OneshotError::Cancelled`] when the context's token
    /// fires and [`OneshotError::Io`] when a stream fails; both carry
    /// the partial stats.
    pub async fn run<R, W>(
        &self,
        input: &mut R,
        output: &mut W,
        context: &RequestContext,
    ) -> Result<OneshotStats, OneshotError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut stats = OneshotStats::default();
        let mut line = String::new();
        loop {
            if self.limit.is_some_and(|limit| stats.processed >= limit) {
                break;
            }
            line.clear();
            let read = tokio::select! {
                () = context.cancel.cancelled() => {
                    return Err(OneshotError::Cancelled {
                        stats,
                    });
                }
                read = input.read_line(&mut line) => read,
            };
            match read {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        stats.skipped += 1;
                        continue;
                    }
                    let (reply, parse_error) = self.handle_line(context, trimmed).await;
                    write_reply(output, &reply, stats).await?;
                    if parse_error {
                        stats.errors += 1;
                    } else {
                        stats.processed += 1;
                    }
                }
                Err(err) => {
                    return Err(OneshotError::Io {
                        stats,
                        detail: err.to_string(),
                    });
                }
            }
        }
        Ok(stats)
    }

    /// Produces the reply bytes for one non-empty line.
    ///
    /// The second element is true when the line failed to parse as a
    /// JSON-RPC request (a `-32700` reply that counts as an error).
    async fn handle_line(&self, context: &RequestContext, line: &str) -> (Vec<u8>, bool) {
        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => {
                let response = dispatch_request(self.dispatcher.as_ref(), context, request).await;
                let id = response.id.clone();
                match serde_json::to_vec(&response) {
                    Ok(bytes) => (bytes, false),
                    Err(_) => (fallback_reply(id, rpc::INTERNAL_ERROR, "serialization failed"), false),
                }
            }
            Err(_) => {
                // Preserve the id when the line is JSON but not a request.
                let id = serde_json::from_str::<Value>(line)
                    .ok()
                    .and_then(|value| value.get("id").cloned())
                    .unwrap_or(Value::Null);
                (fallback_reply(id, rpc::PARSE_ERROR, "parse error"), true)
            }
        }
    }
}

/// Builds an error reply, degrading to a literal if encoding fails.
fn fallback_reply(id: Value, code: i64, message: &str) -> Vec<u8> {
    serde_json::to_vec(&JsonRpcResponse::error(id, code, message)).unwrap_or_else(|_| {
        format!(r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":{code},"message":"{message}"}}}}"#)
            .into_bytes()
    })
}

/// Writes one newline-terminated reply and flushes.
async fn write_reply<W>(output: &mut W, reply: &[u8], stats: OneshotStats) -> Result<(), OneshotError>
where
    W: AsyncWrite + Unpin,
{
    let failed = |err: std::io::Error| OneshotError::Io {
        stats,
        detail: format!("reply write failed: {err}"),
    };
    output.write_all(reply).await.map_err(failed)?;
    output.write_all(b"\n").await.map_err(failed)?;
    output.flush().await.map_err(failed)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
