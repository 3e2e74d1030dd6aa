use std::sync::Arc;

use hvx_core::{CachePolicy, Gpa, Hex, HvError, Hpa, MmuFlags};
use hvx_vm::{ArchMmu, Translation, VmAspace, Vmar, Vmo};

/// The guest physical address space of a guest.
///
/// Guest memory is described by the region tree of a [`VmAspace`] spanning
/// `[0, size)`; the architecture's second-level page tables (EPT, stage-2)
/// are its MMU. Translations are installed lazily by
/// [`page_fault`](Self::page_fault).
pub struct GuestPhysicalAddressSpace<M>
where
    M: ArchMmu,
{
    aspace: Arc<VmAspace<M>>,
}

impl<M> GuestPhysicalAddressSpace<M>
where
    M: ArchMmu,
{
    /// Creates an empty address space of `size` bytes on top of `mmu`.
    pub fn create(mmu: M, size: u64) -> Result<Self, HvError> {
        let aspace = VmAspace::create(mmu, 0, size, "guest_paspace")?;
        Ok(Self { aspace })
    }

    /// Returns the underlying address space.
    pub fn aspace(&self) -> &Arc<VmAspace<M>> {
        &self.aspace
    }

    /// Returns the region covering the whole guest physical address space.
    pub fn root_vmar(&self) -> Vmar<M> {
        self.aspace.root_vmar()
    }

    /// Returns the size of the guest physical address space in bytes.
    pub fn size(&self) -> u64 {
        self.aspace.size()
    }

    /// Returns the host physical address of the top-level page table.
    pub fn table_phys(&self) -> Hpa {
        self.aspace.with_mmu(|mmu| mmu.table_phys())
    }

    /// Runs `f` with the architecture page tables.
    pub fn with_arch_aspace<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        self.aspace.with_mmu_mut(f)
    }

    /// Checks whether guest memory is mapped at `guest_paddr`.
    pub fn is_mapped(&self, guest_paddr: Gpa) -> bool {
        self.aspace.is_mapped(guest_paddr.0)
    }

    /// Unmaps `[guest_paddr, guest_paddr + len)`.
    ///
    /// Mappings straddling the range are split. Sub-regions stay in place,
    /// and unmapping memory that is not mapped succeeds.
    pub fn unmap_range(&self, guest_paddr: Gpa, len: u64) -> Result<(), HvError> {
        self.root_vmar().unmap(guest_paddr.0, len)
    }

    /// Changes the permissions of the mapped range
    /// `[guest_paddr, guest_paddr + len)`.
    pub fn protect(&self, guest_paddr: Gpa, len: u64, flags: MmuFlags) -> Result<(), HvError> {
        self.root_vmar().protect(guest_paddr.0, len, flags)
    }

    /// Resolves a guest fault at `guest_paddr`.
    ///
    /// Returns [`HvError::NotFound`] when no guest memory is mapped there.
    pub fn page_fault(&self, guest_paddr: Gpa) -> Result<(), HvError> {
        let result = self.aspace.page_fault(guest_paddr.0);

        if let Err(err) = result {
            tracing::debug!(gpa = %Hex(guest_paddr.0), %err, "guest page fault not resolved");
        }

        result
    }

    /// Returns the translation installed for `guest_paddr`, if any.
    pub fn translate(&self, guest_paddr: Gpa) -> Option<Translation> {
        self.aspace.query(guest_paddr.0)
    }

    /// Maps `len` bytes of the interrupt controller's physical window at
    /// `host_paddr` into the guest at `guest_paddr`.
    ///
    /// The window is mapped read/write as device memory and populated
    /// immediately, so the guest never faults on it.
    pub fn map_interrupt_controller(
        &self,
        guest_paddr: Gpa,
        host_paddr: Hpa,
        len: u64,
    ) -> Result<(), HvError> {
        let vmo = Vmo::create_physical(host_paddr, len)?;
        vmo.set_mapping_cache_policy(CachePolicy::UncachedDevice)?;

        let mapping = self.root_vmar().create_vm_mapping(
            guest_paddr.0,
            len,
            &vmo,
            0,
            MmuFlags::RW,
            "guest_interrupt_vmo",
        )?;

        if let Err(err) = mapping.map_range(0, len, true) {
            tracing::warn!(
                gpa = %Hex(guest_paddr.0),
                hpa = %Hex(host_paddr.0),
                len = %Hex(len),
                %err,
                "failed to populate interrupt controller mapping"
            );

            // The mapping is useless half populated.
            let _ = mapping.destroy();
            return Err(err);
        }

        tracing::debug!(
            gpa = %Hex(guest_paddr.0),
            hpa = %Hex(host_paddr.0),
            len = %Hex(len),
            "mapped interrupt controller"
        );

        Ok(())
    }
}
