use std::sync::Arc;

use hvx_core::{Architecture as _, Gpa, Hex, HvError, is_page_aligned};
use hvx_hypervisor::{GuestPhysicalAddressSpace, Id, IdAllocator, Port, TrapKind, TrapMap};
use parking_lot::Mutex;

use crate::{
    Amd64, DirectAddressSpace, EptPageTable, MsrBitmaps, VmxReference, VmxState, msr,
};

/// Number of VPIDs; VPID 0 is reserved for the host.
const MAX_VPID: usize = 64;

/// MSRs the guest may access without exiting.
const PASSTHROUGH_MSRS: [u32; 12] = [
    // Saved and restored by VMCS controls.
    msr::IA32_SYSENTER_CS,
    msr::IA32_SYSENTER_ESP,
    msr::IA32_SYSENTER_EIP,
    msr::IA32_PAT,
    msr::IA32_EFER,
    msr::IA32_FS_BASE,
    msr::IA32_GS_BASE,
    // Handled by the MSR load and store areas.
    msr::IA32_STAR,
    msr::IA32_LSTAR,
    msr::IA32_FMASK,
    msr::IA32_KERNEL_GS_BASE,
    msr::IA32_TSC_AUX,
];

/// Kind of a guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestKind {
    /// A guest with its own physical address space.
    Normal,

    /// A guest with host physical memory mapped one-to-one.
    Direct,
}

mod private {
    pub trait Sealed {}
}

/// Per-kind state of a [`Guest`].
///
/// This trait is sealed; the variants are [`NormalGuest`] and
/// [`DirectGuest`].
pub trait GuestVariant: private::Sealed + Send + Sync + Sized + 'static {
    /// Kind of guest this variant describes.
    const KIND: GuestKind;

    /// Creates the variant state.
    #[doc(hidden)]
    fn create(vmx: &Arc<VmxState>) -> Result<Self, HvError>;
}

/// A guest with its own physical address space.
#[derive(Debug)]
pub struct NormalGuest;

impl private::Sealed for NormalGuest {}

impl GuestVariant for NormalGuest {
    const KIND: GuestKind = GuestKind::Normal;

    fn create(_vmx: &Arc<VmxState>) -> Result<Self, HvError> {
        Ok(Self)
    }
}

/// A guest running directly on host physical memory.
pub struct DirectGuest {
    aspace: DirectAddressSpace,
}

impl DirectGuest {
    /// Returns the identity mapping of host physical memory.
    pub fn aspace(&self) -> &DirectAddressSpace {
        &self.aspace
    }
}

impl private::Sealed for DirectGuest {}

impl GuestVariant for DirectGuest {
    const KIND: GuestKind = GuestKind::Direct;

    fn create(vmx: &Arc<VmxState>) -> Result<Self, HvError> {
        Ok(Self {
            aspace: DirectAddressSpace::create(vmx, Amd64::GUEST_PHYSICAL_SIZE)?,
        })
    }
}

/// A VMX guest.
///
/// The guest keeps VMX enabled for as long as it exists.
pub struct Guest<V>
where
    V: GuestVariant,
{
    gpas: GuestPhysicalAddressSpace<EptPageTable>,
    traps: TrapMap<Amd64>,
    msr_bitmaps: MsrBitmaps,
    vpids: Mutex<IdAllocator<u16, MAX_VPID>>,
    variant: V,

    // Dropped last, so VMX stays on until everything above is released.
    vmx: VmxReference,
}

impl<V> Guest<V>
where
    V: GuestVariant,
{
    /// Creates a guest, enabling VMX if no other guest exists.
    ///
    /// Fails with [`HvError::NotSupported`] if the processor lacks VMX or
    /// EPT.
    pub fn create(vmx: &Arc<VmxState>) -> Result<Self, HvError> {
        if !vmx.hardware().has_vmx() {
            return Err(HvError::NotSupported);
        }

        // Released after everything else on every error path below.
        let vmx_ref = vmx.acquire()?;

        let gpas = GuestPhysicalAddressSpace::create(
            EptPageTable::new(vmx)?,
            Amd64::GUEST_PHYSICAL_SIZE,
        )?;

        // The PML4 may have been used by an earlier guest.
        gpas.with_arch_aspace(|ept| ept.invalidate())?;

        let variant = V::create(vmx)?;

        let mut msr_bitmaps = MsrBitmaps::new(vmx.pmm(), &vmx.vmx_info())?;
        for msr in PASSTHROUGH_MSRS {
            msr_bitmaps.ignore_msr(msr)?;
        }

        tracing::debug!(kind = ?V::KIND, pml4 = %gpas.table_phys(), "created guest");

        Ok(Self {
            gpas,
            traps: TrapMap::new(),
            msr_bitmaps,
            vpids: Mutex::new(IdAllocator::new()),
            variant,
            vmx: vmx_ref,
        })
    }

    /// Returns the kind of the guest.
    pub fn kind(&self) -> GuestKind {
        V::KIND
    }

    /// Returns the guest physical address space.
    pub fn gpas(&self) -> &GuestPhysicalAddressSpace<EptPageTable> {
        &self.gpas
    }

    /// Returns the traps of the guest.
    pub fn traps(&self) -> &TrapMap<Amd64> {
        &self.traps
    }

    /// Returns the MSR bitmaps shared by the guest's vCPUs.
    pub fn msr_bitmaps(&self) -> &MsrBitmaps {
        &self.msr_bitmaps
    }

    /// Returns the variant state.
    pub fn variant(&self) -> &V {
        &self.variant
    }

    /// Returns the VMX state the guest runs under.
    pub fn vmx(&self) -> &Arc<VmxState> {
        self.vmx.state()
    }

    /// Installs a trap on guest physical memory or port IO.
    ///
    /// Memory traps need a page aligned range, which is removed from guest
    /// memory so that every access faults. Bell traps deliver packets to
    /// `port` and must have one; memory and IO traps must not.
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
            TrapKind::Io if port.is_some() => return Err(HvError::InvalidArgs),
            TrapKind::Io => return self.traps.insert_trap(kind, addr, len, None, key),
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

    /// Allocates a VPID for a vCPU of the guest.
    ///
    /// VPIDs of live vCPUs are never handed out twice; once all are in use,
    /// this fails with [`HvError::NoResources`].
    pub fn alloc_vpid(&self) -> Result<Id<u16>, HvError> {
        self.vpids.lock().try_alloc()
    }

    /// Releases a VPID allocated by [`alloc_vpid`](Self::alloc_vpid).
    pub fn free_vpid(&self, vpid: Id<u16>) -> Result<(), HvError> {
        self.vpids.lock().free(vpid)
    }
}

impl Guest<DirectGuest> {
    /// Returns the identity mapping of host physical memory.
    pub fn direct_aspace(&self) -> &DirectAddressSpace {
        self.variant.aspace()
    }
}

impl<V> std::fmt::Debug for Guest<V>
where
    V: GuestVariant,
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Guest")
            .field("kind", &V::KIND)
            .field("pml4", &self.gpas.table_phys())
            .field("msr_bitmaps", &self.msr_bitmaps.paddr())
            .finish()
    }
}
