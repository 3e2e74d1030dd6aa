//! A software stand-in for EL2 hardware.

use hvx_core::{HvError, Hpa};
use parking_lot::Mutex;

/// Configurable EL2 hardware that records TLB invalidations.
#[derive(Debug)]
pub struct MockEl2 {
    /// Exception level reported as the boot level.
    pub boot_el: u8,

    /// Result of looking up the GIC virtual CPU interface.
    pub gicv: Result<Option<Hpa>, HvError>,

    invalidations: Mutex<Vec<u16>>,
}

impl MockEl2 {
    /// Returns the VMIDs invalidated so far, in order.
    pub fn invalidations(&self) -> Vec<u16> {
        self.invalidations.lock().clone()
    }
}

impl Default for MockEl2 {
    /// A GICv3 system booted at EL2.
    fn default() -> Self {
        Self {
            boot_el: 2,
            gicv: Ok(None),
            invalidations: Mutex::new(Vec::new()),
        }
    }
}

impl crate::El2Hardware for MockEl2 {
    fn boot_el(&self) -> u8 {
        self.boot_el
    }

    fn gicv_paddr(&self) -> Result<Option<Hpa>, HvError> {
        self.gicv
    }

    fn invalidate_vmid(&self, vmid: u16) {
        self.invalidations.lock().push(vmid);
    }
}
