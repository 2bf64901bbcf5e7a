// crates/gpu-triage-kmsg/src/record.rs
// ============================================================================
// Module: Kmsg Record Parsing
// Description: Parser for the kernel's `prio,seq,ts,flags;body` record form.
// Purpose: Produce structured records while silently skipping malformed
//          input.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! One kmsg record is a header and a body split at the first `;`. The
//! header fields are comma-separated: priority, sequence, microseconds
//! since boot, then one or more flag fields that are ignored. Only fully
//! parseable records are produced; everything else is skipped by the
//! caller.

use std::time::Duration;

use serde::Serialize;

// ============================================================================
// SECTION: Record Type
// ============================================================================

/// One parsed kernel log record.
///
/// # Invariants
/// - `message` preserves the body verbatim after the first `;`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KmsgRecord {
    /// Syslog priority (facility and severity combined).
    pub priority: i32,
    /// Kernel sequence number; records are ordered by this field.
    pub sequence: u64,
    /// Monotonic timestamp since boot.
    pub timestamp_since_boot: Duration,
    /// Record body, verbatim.
    pub message: String,
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Parses one kmsg line into a record.
///
/// Returns `None` for malformed lines; callers skip those silently so a
/// corrupt record never poisons the surrounding stream.
#[must_use]
pub fn parse_record(line: &str) -> Option<KmsgRecord> {
    let (header, body) = line.split_once(';')?;
    let mut fields = header.split(',');
    let priority = fields.next()?.trim().parse::<i32>().ok()?;
    let sequence = fields.next()?.trim().parse::<u64>().ok()?;
    let micros = fields.next()?.trim().parse::<i64>().ok()?;
    // The header carries at least one flag field after the timestamp.
    fields.next()?;
    let micros = u64::try_from(micros).unwrap_or(0);
    Some(KmsgRecord {
        priority,
        sequence,
        timestamp_since_boot: Duration::from_micros(micros),
        message: body.trim_end_matches('\n').to_string(),
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================
