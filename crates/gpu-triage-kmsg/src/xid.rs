// crates/gpu-triage-kmsg/src/xid.rs
// ============================================================================
// Module: Xid Event Extraction
// Description: Regex extraction of driver Xid events from record bodies.
// Purpose: Turn raw kernel log lines into structured, normalized events.
// Dependencies: regex, serde
// ============================================================================

//! ## Overview
//! The driver reports GPU errors to the kernel log as `Xid` lines. A line
//! qualifies only when it carries the vendor prefix and the full trigger
//! pattern `Xid (PCI:<busid>): <code>`; partial matches are discarded. The
//! optional `pid=`/`name=` fields accept both bare and single-quoted
//! values, and a leading bracketed kernel timestamp is attached when
//! present. PCI bus IDs are normalized to the upper-case, domain-padded
//! `0000:BB:DD.F` form.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::record::KmsgRecord;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Vendor prefix every qualifying record body carries.
pub const VENDOR_PREFIX: &str = "NVRM:";
/// GPU index value for events whose bus ID is not yet resolved.
pub const GPU_INDEX_UNRESOLVED: i32 = -1;

// ============================================================================
// SECTION: Event Type
// ============================================================================

/// One extracted Xid error event.
///
/// # Invariants
/// - `pci_bus_id` is upper-case and domain-padded (`0000:BB:DD.F`).
/// - `gpu_index` is [`GPU_INDEX_UNRESOLVED`] until resolved against the
///   device inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XidEvent {
    /// Kernel timestamp since boot, when the line or record carried one.
    pub timestamp_since_boot: Option<Duration>,
    /// Numeric Xid code.
    pub code: i32,
    /// Normalized PCI bus identifier.
    pub pci_bus_id: String,
    /// Device index on the node; `-1` when unresolved.
    pub gpu_index: i32,
    /// Process ID reported by the driver, when present.
    pub pid: Option<i32>,
    /// Process name reported by the driver, when present.
    pub process_name: Option<String>,
    /// The source line, verbatim.
    pub raw_message: String,
}

// ============================================================================
// SECTION: Patterns
// ============================================================================

/// Compiled extraction patterns.
struct XidPatterns {
    /// Event trigger: `Xid (PCI:<busid>): <code>`.
    trigger: Regex,
    /// Optional `pid=N` / `pid='N'` field.
    pid: Regex,
    /// Optional `name=S` / `name='S'` field.
    name: Regex,
    /// Leading bracketed kernel timestamp `[ s.us ]`.
    timestamp: Regex,
}

/// Returns the lazily compiled pattern set.
#[allow(clippy::expect_used, reason = "Patterns are compile-time constants.")]
fn patterns() -> &'static XidPatterns {
    static PATTERNS: OnceLock<XidPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| XidPatterns {
        trigger: Regex::new(r"Xid \(PCI:([0-9a-fA-F.:]+)\): (\d+)").expect("trigger pattern"),
        pid: Regex::new(r"pid='?(\d+)'?").expect("pid pattern"),
        name: Regex::new(r"name='?([^',\s]+)'?").expect("name pattern"),
        timestamp: Regex::new(r"^\[\s*(\d+)\.(\d+)\s*\]").expect("timestamp pattern"),
    })
}

// ============================================================================
// SECTION: Normalization
// ============================================================================

/// Normalizes a PCI bus identifier.
///
/// Upper-cases the value and prepends the `0000:` domain when the input
/// carries exactly one `:` (bus:device.function without a domain).
#[must_use]
pub fn normalize_pci_bus_id(raw: &str) -> String {
    let upper = raw.to_ascii_uppercase();
    if upper.matches(':').count() == 1 {
        format!("0000:{upper}")
    } else {
        upper
    }
}

// ============================================================================
// SECTION: Extraction
// ============================================================================

/// Extracts an Xid event from one log line.
///
/// Returns `None` when the line lacks the vendor prefix, fails the
/// trigger pattern, or carries an unparseable code.
#[must_use]
pub fn parse_xid_line(line: &str) -> Option<XidEvent> {
    if !line.contains(VENDOR_PREFIX) {
        return None;
    }
    let patterns = patterns();
    let captures = patterns.trigger.captures(line)?;
    let code = captures.get(2)?.as_str().parse::<i32>().ok()?;
    let pci_bus_id = normalize_pci_bus_id(captures.get(1)?.as_str());
    let pid = patterns
        .pid
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i32>().ok());
    let process_name = patterns
        .name
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    Some(XidEvent {
        timestamp_since_boot: parse_bracketed_timestamp(line),
        code,
        pci_bus_id,
        gpu_index: GPU_INDEX_UNRESOLVED,
        pid,
        process_name,
        raw_message: line.to_string(),
    })
}

/// Parses a leading `[ s.us ]` kernel timestamp.
fn parse_bracketed_timestamp(line: &str) -> Option<Duration> {
    let captures = patterns().timestamp.captures(line)?;
    let seconds = captures.get(1)?.as_str().parse::<u64>().ok()?;
    let fraction = captures.get(2)?.as_str();
    let mut padded = fraction.to_string();
    while padded.len() < 6 {
        padded.push('0');
    }
    let micros = padded.get(..6)?.parse::<u64>().ok()?;
    Some(Duration::from_secs(seconds) + Duration::from_micros(micros))
}

/// Extracts events from parsed records, inheriting record timestamps.
///
/// A record's monotonic timestamp fills in when the body carries no
/// bracketed timestamp of its own.
#[must_use]
pub fn events_from_records(records: &[KmsgRecord]) -> Vec<XidEvent> {
    records
        .iter()
        .filter_map(|record| {
            let mut event = parse_xid_line(&record.message)?;
            if event.timestamp_since_boot.is_none() {
                event.timestamp_since_boot = Some(record.timestamp_since_boot);
            }
            Some(event)
        })
        .collect()
}

/// Resolves device indexes for events from a bus-ID-to-index inventory map.
///
/// Events whose bus ID is absent from the map keep
/// [`GPU_INDEX_UNRESOLVED`].
pub fn resolve_gpu_indexes(events: &mut [XidEvent], inventory: &BTreeMap<String, i32>) {
    for event in events {
        if let Some(index) = inventory.get(&event.pci_bus_id) {
            event.gpu_index = *index;
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
