// crates/gpu-triage-kmsg/src/lib.rs
// ============================================================================
// Module: gpu-triage Kernel Log Library
// Description: Kernel log record parsing and GPU error event extraction.
// Purpose: Turn kmsg records into structured Xid events with catalog
//          severity, from a character device or a one-shot command.
// Dependencies: regex, tokio, tokio-util, thiserror
// ============================================================================

//! ## Overview
//! `gpu-triage-kmsg` reads kernel log records in their `prio,seq,ts,flags;body`
//! form from either the kmsg character device (preferred; works inside
//! minimal containers) or a command producing the same logical records, and
//! extracts driver Xid error events from the record bodies. A static
//! catalog maps Xid codes to severity, category, and operator action.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod catalog;
pub mod record;
pub mod source;
pub mod xid;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use catalog::ErrorCatalogEntry;
pub use catalog::Severity;
pub use catalog::lookup_xid;
pub use record::KmsgRecord;
pub use record::parse_record;
pub use source::CommandSource;
pub use source::DeviceSource;
pub use source::KmsgError;
pub use source::RecordSource;
pub use source::SourceConfig;
pub use xid::XidEvent;
pub use xid::events_from_records;
pub use xid::normalize_pci_bus_id;
pub use xid::parse_xid_line;
