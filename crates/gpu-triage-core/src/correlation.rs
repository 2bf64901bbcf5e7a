// crates/gpu-triage-core/src/correlation.rs
// ============================================================================
// Module: Correlation Identifiers
// Description: Generation and sanitization of request correlation IDs.
// Purpose: Give every tool invocation one opaque token that survives all
//          component crossings.
// Dependencies: rand
// ============================================================================

//! ## Overview
//! A correlation ID is sixteen lower-case hex characters drawn from OS
//! randomness. It is generated at the server boundary when the client did
//! not supply one and propagated to every downstream call and log line.
//! Client-supplied values are untrusted and are sanitized before use;
//! anything that is not a short ASCII token is discarded in favor of a
//! freshly generated ID.

use rand::RngCore;
use rand::rngs::OsRng;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Header name carrying the correlation identifier across HTTP hops.
pub const CORRELATION_HEADER: &str = "x-correlation-id";
/// Maximum accepted length for client-supplied correlation identifiers.
pub const MAX_CORRELATION_ID_LENGTH: usize = 64;

// ============================================================================
// SECTION: Operations
// ============================================================================

/// Generates a fresh sixteen-hex-character correlation identifier.
#[must_use]
pub fn generate_correlation_id() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    format!("{:016x}", u64::from_be_bytes(bytes))
}

/// Sanitizes a client-supplied correlation identifier.
///
/// Returns `None` when the value is absent, empty after trimming, too
/// long, or contains anything other than ASCII alphanumerics, `-`, `_`,
/// or `.`. Callers fall back to [`generate_correlation_id`] on `None`.
#[must_use]
pub fn sanitize_correlation_id(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_CORRELATION_ID_LENGTH {
        return None;
    }
    let valid = trimmed
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    valid.then(|| trimmed.to_string())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
