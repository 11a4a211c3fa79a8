//! Lease Auto-Extension Policy
//!
//! Decides when the session lease should be proactively renewed and to what
//! total. Pure arithmetic so it can be tested independently of the polling
//! loop that consumes it.

use serde::{Deserialize, Serialize};

/// User-configurable auto-extension settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseExtensionPolicy {
    /// Whether leases are renewed automatically.
    pub enabled: bool,
    /// Minutes added per renewal.
    pub extension_minutes: u32,
}

impl Default for LeaseExtensionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            extension_minutes: 10,
        }
    }
}

impl LeaseExtensionPolicy {
    /// Compute the renewal target, if a renewal is due.
    ///
    /// A renewal triggers once the remaining lease drops to
    /// `max(1, extension/4)` minutes. The target is
    /// `elapsed + extension + 1`; the extra minute keeps the remaining time
    /// above the threshold right after renewal, so the check does not
    /// re-trigger on every poll cycle.
    pub fn renewal_target(
        &self,
        elapsed_minutes: u32,
        lease_minutes: u32,
        session_running: bool,
    ) -> Option<u32> {
        if !self.enabled || self.extension_minutes == 0 || !session_running {
            return None;
        }
        let remaining = lease_minutes.saturating_sub(elapsed_minutes);
        let threshold = (self.extension_minutes / 4).max(1);
        if remaining <= threshold {
            Some(elapsed_minutes + self.extension_minutes + 1)
        } else {
            None
        }
    }
}
