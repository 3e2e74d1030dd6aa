use std::sync::Arc;

use hvx_core::{Gpa, Hex, HvError, Hpa, MmuFlags};
use hvx_vm::{VmAspace, Vmo};

use crate::{EptPageTable, VmxState};

/// An address space mapping guest physical addresses one-to-one onto host
/// physical memory.
///
/// Direct guests run with host physical memory visible at the same
/// addresses. Translations are installed on fault, like any other mapping.
pub struct DirectAddressSpace {
    aspace: Arc<VmAspace<EptPageTable>>,
}

impl DirectAddressSpace {
    /// Creates an identity mapping of `[0, size)`.
    pub fn create(vmx: &Arc<VmxState>, size: u64) -> Result<Self, HvError> {
        let aspace = VmAspace::create(EptPageTable::new(vmx)?, 0, size, "direct_aspace")?;

        // The PML4 may have been used by an earlier guest.
        aspace.with_mmu(|ept| ept.invalidate())?;

        let vmo = Vmo::create_physical(Hpa(0), size)?;
        aspace
            .root_vmar()
            .create_vm_mapping(0, size, &vmo, 0, MmuFlags::RWX, "direct_physmap")?;

        tracing::debug!(size = %Hex(size), "created direct address space");
        Ok(Self { aspace })
    }

    /// Returns the size of the identity mapping in bytes.
    pub fn size(&self) -> u64 {
        self.aspace.size()
    }

    /// Returns the EPT pointer of the address space.
    pub fn ept_pointer(&self) -> u64 {
        self.aspace.with_mmu(|ept| ept.ept_pointer())
    }

    /// Installs the translation for `guest_paddr`.
    pub fn page_fault(&self, guest_paddr: Gpa) -> Result<(), HvError> {
        self.aspace.page_fault(guest_paddr.0)
    }

    /// Returns the host physical address `guest_paddr` currently translates
    /// to.
    pub fn translate(&self, guest_paddr: Gpa) -> Option<Hpa> {
        self.aspace
            .query(guest_paddr.0)
            .map(|translation| translation.paddr)
    }
}
