//! # Device Configuration
//!
//! Per-device knobs that select between hardware revisions and firmware
//! interface flavours.

use crate::error::{Error, Result};

// =============================================================================
// HARDWARE REVISION
// =============================================================================

/// Decoder hardware revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HwRevision {
    /// Pre-D0 silicon: single generic reset, MMU fault interrupt handled by the host
    #[default]
    Legacy,
    /// D0 silicon: faults require a firmware re-upload and re-init
    D0,
}

impl HwRevision {
    /// Check if faults on this revision need a full firmware reload
    pub fn needs_full_reload(&self) -> bool {
        matches!(self, Self::D0)
    }
}

// =============================================================================
// FIRMWARE ABI
// =============================================================================

/// Firmware message layout flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirmwareAbi {
    /// Fence in the fence-value field, MMU invalidate as bit 0 of the PTD
    #[default]
    Classic,
    /// Fence in the message-id field, MMU invalidate as a decode flag
    Deva,
}

// =============================================================================
// POWER POLICY
// =============================================================================

/// What to do after the completion handler drains the firmware ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerPolicy {
    /// Never schedule an idle check
    NoPm,
    /// Schedule an idle check on pre-D0 hardware only
    #[default]
    ClockGating,
    /// Always schedule an idle check so the island can be powered down
    PowerDown,
}

// =============================================================================
// DEVICE CONFIG
// =============================================================================

/// Device configuration
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Hardware revision
    pub revision: HwRevision,
    /// Firmware message layout
    pub abi: FirmwareAbi,
    /// Post-interrupt power policy
    pub power_policy: PowerPolicy,
    /// Maximum queued commands while busy (0 = unbounded)
    pub max_queue_depth: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            revision: HwRevision::Legacy,
            abi: FirmwareAbi::Classic,
            power_policy: PowerPolicy::ClockGating,
            max_queue_depth: 0,
        }
    }
}

impl DeviceConfig {
    /// Configuration for D0 silicon running Deva firmware
    pub fn d0() -> Self {
        Self {
            revision: HwRevision::D0,
            abi: FirmwareAbi::Deva,
            power_policy: PowerPolicy::PowerDown,
            max_queue_depth: 0,
        }
    }

    /// Check the configuration for combinations the firmware cannot run
    pub fn validate(&self) -> Result<()> {
        // Deva firmware only ships for D0 parts
        if self.abi == FirmwareAbi::Deva && self.revision != HwRevision::D0 {
            log::error!("VXD: Deva firmware ABI requires D0 hardware");
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }

    /// Check if an idle check should follow an interrupt drain
    pub fn schedules_idle_check(&self) -> bool {
        match self.revision {
            HwRevision::D0 => self.power_policy == PowerPolicy::PowerDown,
            HwRevision::Legacy => self.power_policy != PowerPolicy::NoPm,
        }
    }
}
