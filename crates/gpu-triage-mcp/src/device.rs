// crates/gpu-triage-mcp/src/device.rs
// ============================================================================
// Module: Device Interface
// Description: Synchronous hardware inventory/telemetry contract.
// Purpose: Seam between the tool router and the vendor library binding.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! The vendor library binding lives outside this crate; the tool router
//! only sees this synchronous trait. Implementations are initialized once
//! at startup, survive device-absent nodes gracefully (an empty
//! inventory, not an error), and never abort the process. The static
//! implementation here backs tests and device-absent deployments.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by a device interface.
///
/// # Invariants
/// - A node without devices is NOT an error; it yields an empty inventory.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The vendor library failed to answer.
    #[error("device query failed: {0}")]
    Query(String),
}

// ============================================================================
// SECTION: Inventory Model
// ============================================================================

/// One enumerated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device index on the node.
    pub index: i32,
    /// Marketing name, e.g. `Tesla T4`.
    pub name: String,
    /// Device UUID when the driver reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Normalized PCI bus ID (`0000:BB:DD.F`).
    pub pci_bus_id: String,
    /// Total memory in MiB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mib: Option<u64>,
    /// Core temperature in whole degrees Celsius.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<i64>,
    /// Utilization percentage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utilization_pct: Option<u64>,
    /// Uncorrected ECC error count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecc_uncorrected: Option<u64>,
}

/// Full node inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInventory {
    /// Number of enumerated devices.
    pub device_count: usize,
    /// Driver version when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_version: Option<String>,
    /// Per-device details.
    pub devices: Vec<DeviceInfo>,
}

impl DeviceInventory {
    /// Maps PCI bus IDs to device indexes for error-event resolution.
    #[must_use]
    pub fn bus_id_index(&self) -> BTreeMap<String, i32> {
        self.devices
            .iter()
            .map(|device| (device.pci_bus_id.clone(), device.index))
            .collect()
    }
}

// ============================================================================
// SECTION: Interface Contract
// ============================================================================

/// Synchronous hardware interface consumed by the tool router.
pub trait DeviceInterface: Send + Sync {
    /// Enumerates devices with inventory and telemetry fields.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] only for library failures; a device-absent
    /// node returns an empty inventory.
    fn inventory(&self) -> Result<DeviceInventory, DeviceError>;
}

/// Fixed-inventory implementation for tests and device-absent nodes.
pub struct StaticDeviceInterface {
    /// Inventory returned by every query.
    inventory: DeviceInventory,
}

impl StaticDeviceInterface {
    /// Creates an interface answering with the given inventory.
    #[must_use]
    pub fn new(inventory: DeviceInventory) -> Self {
        Self {
            inventory,
        }
    }

    /// Creates an interface for a node without devices.
    #[must_use]
    pub fn absent() -> Self {
        Self::new(DeviceInventory::default())
    }
}

impl DeviceInterface for StaticDeviceInterface {
    fn inventory(&self) -> Result<DeviceInventory, DeviceError> {
        Ok(self.inventory.clone())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
