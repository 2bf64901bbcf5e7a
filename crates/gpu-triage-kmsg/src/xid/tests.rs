// crates/gpu-triage-kmsg/src/xid/tests.rs
// ============================================================================
// Module: Xid Extraction Tests
// Description: Unit tests for Xid line extraction and normalization.
// Purpose: Validate trigger matching, optional fields, and PCI padding.
// Dependencies: gpu-triage-kmsg
// ============================================================================

//! ## Overview
//! Covers the full extraction pipeline: trigger and optional-field
//! regexes, bracketed timestamps, record-timestamp inheritance, PCI bus ID
//! normalization, and index resolution against an inventory map.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions use unwrap/expect for clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;

use super::GPU_INDEX_UNRESOLVED;
use super::events_from_records;
use super::normalize_pci_bus_id;
use super::parse_xid_line;
use super::resolve_gpu_indexes;
use crate::record::parse_record;

// ============================================================================
// SECTION: Extraction Tests
// ============================================================================

#[test]
fn extracts_full_event_with_quoted_pid_and_bare_name() {
    let line = "[100.123456] NVRM: Xid (PCI:0000:00:1E.0): 48, pid='1234', name=python3";
    let event = parse_xid_line(line).expect("event");
    assert_eq!(event.code, 48);
    assert_eq!(event.pci_bus_id, "0000:00:1E.0");
    assert_eq!(event.pid, Some(1234));
    assert_eq!(event.process_name.as_deref(), Some("python3"));
    assert_eq!(event.gpu_index, GPU_INDEX_UNRESOLVED);
    assert_eq!(
        event.timestamp_since_boot,
        Some(Duration::from_secs(100) + Duration::from_micros(123_456))
    );
    assert_eq!(event.raw_message, line);
}

#[test]
fn extracts_event_with_bare_pid_and_quoted_name() {
    let line = "NVRM: Xid (PCI:0000:3B:00.0): 79, pid=42, name='trainer'";
    let event = parse_xid_line(line).expect("event");
    assert_eq!(event.code, 79);
    assert_eq!(event.pid, Some(42));
    assert_eq!(event.process_name.as_deref(), Some("trainer"));
    assert_eq!(event.timestamp_since_boot, None);
}

#[test]
fn optional_fields_default_to_none() {
    let event = parse_xid_line("NVRM: Xid (PCI:0000:00:04.0): 31").expect("event");
    assert_eq!(event.pid, None);
    assert_eq!(event.process_name, None);
}

#[test]
fn lines_without_trigger_are_discarded() {
    assert!(parse_xid_line("NVRM: GPU at PCI:0000:00:1E.0 initialized").is_none());
    assert!(parse_xid_line("Xid (PCI:0000:00:1E.0): 48 without vendor prefix").is_none());
    assert!(parse_xid_line("usb 1-1: new high-speed device").is_none());
}

#[test]
fn partial_matches_without_code_are_discarded() {
    assert!(parse_xid_line("NVRM: Xid (PCI:0000:00:1E.0): ").is_none());
    assert!(parse_xid_line("NVRM: Xid (PCI:0000:00:1E.0): nine").is_none());
}

// ============================================================================
// SECTION: Normalization Tests
// ============================================================================

#[test]
fn normalization_pads_and_uppercases() {
    assert_eq!(normalize_pci_bus_id("00:1e.0"), "0000:00:1E.0");
    assert_eq!(normalize_pci_bus_id("0000:00:1E.0"), "0000:00:1E.0");
    assert_eq!(normalize_pci_bus_id("0000:00:1e.0"), "0000:00:1E.0");
}

#[test]
fn normalization_is_idempotent() {
    for raw in ["00:1e.0", "0000:3b:00.0", "abcd:00:1f.7"] {
        let once = normalize_pci_bus_id(raw);
        assert_eq!(normalize_pci_bus_id(&once), once);
    }
}

// ============================================================================
// SECTION: Record Pipeline Tests
// ============================================================================

#[test]
fn record_timestamp_fills_in_when_body_has_none() {
    let record = parse_record("3,77,9000000,-;NVRM: Xid (PCI:00:1e.0): 63").expect("record");
    let events = events_from_records(&[record]);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].timestamp_since_boot, Some(Duration::from_secs(9)));
    assert_eq!(events[0].pci_bus_id, "0000:00:1E.0");
}

#[test]
fn non_xid_records_are_filtered_out() {
    let records = vec![
        parse_record("6,1,100,-;systemd[1]: Started session").expect("record"),
        parse_record("3,2,200,-;NVRM: Xid (PCI:0000:00:1E.0): 48").expect("record"),
    ];
    let events = events_from_records(&records);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].code, 48);
}

#[test]
fn resolver_maps_known_bus_ids() {
    let record = parse_record("3,2,200,-;NVRM: Xid (PCI:0000:00:1E.0): 48").expect("record");
    let mut events = events_from_records(&[record]);
    let mut inventory = BTreeMap::new();
    inventory.insert("0000:00:1E.0".to_string(), 2);
    resolve_gpu_indexes(&mut events, &inventory);
    assert_eq!(events[0].gpu_index, 2);

    let other = parse_record("3,3,300,-;NVRM: Xid (PCI:0000:FF:00.0): 31").expect("record");
    let mut unresolved = events_from_records(&[other]);
    resolve_gpu_indexes(&mut unresolved, &inventory);
    assert_eq!(unresolved[0].gpu_index, GPU_INDEX_UNRESOLVED);
}
