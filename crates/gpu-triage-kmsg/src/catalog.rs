// crates/gpu-triage-kmsg/src/catalog.rs
// ============================================================================
// Module: Xid Error Catalog
// Description: Static severity/action catalog keyed by Xid code.
// Purpose: Attach operator guidance to extracted error events.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A read-only, process-wide table mapping driver Xid codes to a name,
//! severity, category, and recommended operator action. Unknown codes
//! resolve to a synthetic `warning`/`unknown` entry rather than erroring,
//! so a newer driver never breaks the diagnostic path.

use serde::Serialize;

// ============================================================================
// SECTION: Severity
// ============================================================================

/// Catalog severity classification.
///
/// # Invariants
/// - Variants are stable for response payloads and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational; no operator action required.
    Info,
    /// Degraded behavior worth monitoring.
    Warning,
    /// Requires operator attention soon.
    Critical,
    /// The device or node needs immediate remediation.
    Fatal,
}

impl Severity {
    /// Returns a stable label for the severity.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Fatal => "fatal",
        }
    }
}

// ============================================================================
// SECTION: Catalog Entry
// ============================================================================

/// One catalog row describing an Xid code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorCatalogEntry {
    /// Numeric Xid code.
    pub code: i32,
    /// Short name of the condition.
    pub name: &'static str,
    /// One-line description of what the driver observed.
    pub description: &'static str,
    /// Severity classification.
    pub severity: Severity,
    /// Recommended operator action.
    pub action: &'static str,
    /// Failure domain the condition belongs to.
    pub category: &'static str,
}

// ============================================================================
// SECTION: Catalog Table
// ============================================================================

/// Known Xid codes with severity and operator guidance.
const CATALOG: &[ErrorCatalogEntry] = &[
    ErrorCatalogEntry {
        code: 13,
        name: "graphics_engine_exception",
        description: "Graphics engine exception raised by a running context",
        severity: Severity::Warning,
        action: "Inspect the workload for illegal memory access and retry the job",
        category: "hardware",
    },
    ErrorCatalogEntry {
        code: 31,
        name: "gpu_memory_page_fault",
        description: "GPU memory page fault, usually an application addressing error",
        severity: Severity::Warning,
        action: "Identify the offending process and retry; recurring faults suggest app bugs",
        category: "memory",
    },
    ErrorCatalogEntry {
        code: 32,
        name: "invalid_push_buffer_stream",
        description: "Invalid or corrupted push buffer stream on the PCIe path",
        severity: Severity::Warning,
        action: "Check PCIe link health and retry the workload",
        category: "bus",
    },
    ErrorCatalogEntry {
        code: 38,
        name: "driver_firmware_error",
        description: "Driver firmware error",
        severity: Severity::Critical,
        action: "Collect a driver bug report and reload the driver",
        category: "driver",
    },
    ErrorCatalogEntry {
        code: 43,
        name: "gpu_stopped_processing",
        description: "GPU stopped processing a channel",
        severity: Severity::Warning,
        action: "Retry the workload; persistent occurrences indicate a hung channel",
        category: "hardware",
    },
    ErrorCatalogEntry {
        code: 45,
        name: "preemptive_channel_cleanup",
        description: "Robust channel preemptive cleanup after a job teardown",
        severity: Severity::Info,
        action: "No action; emitted when a client is torn down",
        category: "driver",
    },
    ErrorCatalogEntry {
        code: 48,
        name: "double_bit_ecc_error",
        description: "Double bit ECC error detected in device memory",
        severity: Severity::Fatal,
        action: "Drain the node and retire the affected memory page",
        category: "memory",
    },
    ErrorCatalogEntry {
        code: 61,
        name: "internal_microcontroller_breakpoint",
        description: "Internal micro-controller breakpoint or warning",
        severity: Severity::Warning,
        action: "Collect logs and update the driver if recurring",
        category: "hardware",
    },
    ErrorCatalogEntry {
        code: 62,
        name: "internal_microcontroller_halt",
        description: "Internal micro-controller halt",
        severity: Severity::Critical,
        action: "Reset the GPU; replace the device if the halt recurs",
        category: "hardware",
    },
    ErrorCatalogEntry {
        code: 63,
        name: "ecc_page_retirement_recorded",
        description: "ECC page retirement or row remapping event recorded",
        severity: Severity::Warning,
        action: "Schedule a GPU reset to apply the recorded remapping",
        category: "memory",
    },
    ErrorCatalogEntry {
        code: 64,
        name: "ecc_row_remapping_failure",
        description: "ECC page retirement or row remapping failed",
        severity: Severity::Critical,
        action: "Drain the node; the device needs service",
        category: "memory",
    },
    ErrorCatalogEntry {
        code: 74,
        name: "nvlink_error",
        description: "NVLink uncorrectable error on an inter-GPU link",
        severity: Severity::Critical,
        action: "Check link cabling and error counters; reset the affected pair",
        category: "bus",
    },
    ErrorCatalogEntry {
        code: 79,
        name: "gpu_fallen_off_bus",
        description: "GPU has fallen off the bus and is no longer enumerable",
        severity: Severity::Fatal,
        action: "Power-cycle the node; inspect PCIe risers and power delivery",
        category: "bus",
    },
    ErrorCatalogEntry {
        code: 92,
        name: "high_single_bit_ecc_rate",
        description: "High single-bit ECC error rate observed",
        severity: Severity::Warning,
        action: "Monitor the device; drain the node if the rate keeps climbing",
        category: "memory",
    },
    ErrorCatalogEntry {
        code: 94,
        name: "contained_ecc_error",
        description: "Contained ECC error; only the affected contexts were lost",
        severity: Severity::Warning,
        action: "Restart the affected workloads; the error was contained",
        category: "memory",
    },
    ErrorCatalogEntry {
        code: 95,
        name: "uncontained_ecc_error",
        description: "Uncontained ECC error affecting the whole device",
        severity: Severity::Fatal,
        action: "Drain the node and reset the GPU immediately",
        category: "memory",
    },
    ErrorCatalogEntry {
        code: 119,
        name: "gsp_rpc_timeout",
        description: "Timeout waiting for the GPU system processor to respond",
        severity: Severity::Critical,
        action: "Reset the GPU and collect a GSP log bundle",
        category: "driver",
    },
    ErrorCatalogEntry {
        code: 120,
        name: "gsp_error",
        description: "GPU system processor reported an internal error",
        severity: Severity::Critical,
        action: "Reset the GPU; update the driver if recurring",
        category: "driver",
    },
];

// ============================================================================
// SECTION: Lookup
// ============================================================================

/// Looks up the catalog entry for an Xid code.
///
/// Unknown codes resolve to a synthetic `warning`/`unknown` entry carrying
/// the queried code.
#[must_use]
pub fn lookup_xid(code: i32) -> ErrorCatalogEntry {
    CATALOG
        .iter()
        .find(|entry| entry.code == code)
        .copied()
        .unwrap_or(ErrorCatalogEntry {
            code,
            name: "unknown",
            description: "Unrecognized Xid code reported by the driver",
            severity: Severity::Warning,
            action: "Collect driver and kernel logs for vendor triage",
            category: "unknown",
        })
}

// ============================================================================
// SECTION: Tests
// ============================================================================
