use std::sync::Arc;

use hvx_core::{Architecture as _, Gpa, Hex, HvError, is_page_aligned};
use hvx_hypervisor::{GuestPhysicalAddressSpace, Port, TrapKind, TrapMap};

use crate::{Aarch64, El2State, Stage2PageTable, Vmid};

/// Guest physical address of the GIC virtual CPU interface on GICv2 systems.
pub const GICV_ADDRESS: Gpa = Gpa(0x8_0000_1000);

/// Size of the GIC virtual CPU interface.
pub const GICV_SIZE: u64 = 0x2000;

/// A guest running at EL1.
pub struct Guest {
    gpas: GuestPhysicalAddressSpace<Stage2PageTable>,
    traps: TrapMap<Aarch64>,

    // Freed after the stage-2 tables tagged with it are gone.
    vmid: Vmid,
}

impl Guest {
    /// Creates a guest.
    ///
    /// Fails with [`HvError::NotSupported`] unless the kernel runs at EL2.
    /// On GICv2 systems the virtual CPU interface is mapped into the guest
    /// at [`GICV_ADDRESS`].
    pub fn create(el2: &Arc<El2State>) -> Result<Self, HvError> {
        let hardware = el2.hardware();
        if hardware.boot_el() < 2 {
            return Err(HvError::NotSupported);
        }

        let vmid = el2.alloc_vmid()?;

        let gpas = GuestPhysicalAddressSpace::create(
            Stage2PageTable::new(el2.pmm(), Arc::clone(hardware), vmid.val())?,
            Aarch64::GUEST_PHYSICAL_SIZE,
        )?;

        if let Some(gicv_paddr) = hardware.gicv_paddr()? {
            gpas.map_interrupt_controller(GICV_ADDRESS, gicv_paddr, GICV_SIZE)?;
        }

        tracing::debug!(vmid = vmid.val(), "created guest");

        Ok(Self {
            gpas,
            traps: TrapMap::new(),
            vmid,
        })
    }

    /// Returns the guest physical address space.
    pub fn gpas(&self) -> &GuestPhysicalAddressSpace<Stage2PageTable> {
        &self.gpas
    }

    /// Returns the traps of the guest.
    pub fn traps(&self) -> &TrapMap<Aarch64> {
        &self.traps
    }

    /// Returns the VMID of the guest.
    pub fn vmid(&self) -> u16 {
        self.vmid.val()
    }

    /// Installs a trap on guest physical memory.
    ///
    /// There is no port IO on AArch64, so [`TrapKind::Io`] fails with
    /// [`HvError::NotSupported`]. Otherwise this behaves like the AMD64
    /// version: a page aligned range is removed from guest memory, and bell
    /// traps must come with a port while memory traps must not.
    pub fn set_trap(
        &self,
        kind: TrapKind,
        addr: u64,
        len: u64,
        port: Option<Arc<dyn Port>>,
        key: u64,
    ) -> Result<(), HvError> {
        match kind {
            TrapKind::Mem if port.is_some() => return Err(HvError::InvalidArgs),
            TrapKind::Bell if port.is_none() => return Err(HvError::InvalidArgs),
            TrapKind::Io => return Err(HvError::NotSupported),
            TrapKind::Mem | TrapKind::Bell => {}
        }

        if len == 0 || !is_page_aligned(addr) || !is_page_aligned(len) {
            return Err(HvError::InvalidArgs);
        }

        self.traps.insert_trap_with(kind, addr, len, port, key, || {
            self.gpas.unmap_range(Gpa(addr), len)
        })?;

        tracing::debug!(?kind, addr = %Hex(addr), len = %Hex(len), key, "set trap");
        Ok(())
    }
}

impl std::fmt::Debug for Guest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Guest")
            .field("vmid", &self.vmid)
            .field("table", &self.gpas.table_phys())
            .finish()
    }
}
