//! Process-wide VMX enablement.
//!
//! VMX operation is enabled on every CPU while at least one
//! [`VmxReference`] exists. Taking a reference while VMX is already on only
//! bumps an atomic counter; the transitions between zero and one reference
//! are serialized by a mutex, so enabling and disabling never interleave.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use hvx_core::{Hex, HvError};
use hvx_vm::Pmm;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::{
    EptInfo, FeatureControl, InvEpt, VmxHardware, VmxInfo, VmxPage, cr_is_invalid, msr,
};

static GLOBAL: OnceCell<Arc<VmxState>> = OnceCell::new();

/// Per-CPU VMXON regions, one per CPU while VMX is enabled.
type VmxonRegions = SmallVec<[VmxPage; 8]>;

/// Global VMX state.
pub struct VmxState {
    hardware: Arc<dyn VmxHardware>,
    pmm: Arc<Pmm>,
    refs: AtomicUsize,
    regions: Mutex<VmxonRegions>,
}

impl VmxState {
    /// Creates the VMX state for `hardware`, allocating VMX pages from
    /// `pmm`.
    ///
    /// VMX stays off until the first [`acquire`](Self::acquire).
    pub fn new(hardware: Arc<dyn VmxHardware>, pmm: Arc<Pmm>) -> Arc<Self> {
        Arc::new(Self {
            hardware,
            pmm,
            refs: AtomicUsize::new(0),
            regions: Mutex::new(VmxonRegions::new()),
        })
    }

    /// Installs the process-wide VMX state, backed by the global page
    /// allocator.
    ///
    /// Fails with [`HvError::AlreadyExists`] if it was installed before.
    pub fn init_global(hardware: Arc<dyn VmxHardware>) -> Result<&'static Arc<Self>, HvError> {
        let state = Self::new(hardware, Arc::clone(Pmm::global()));
        GLOBAL.set(state).map_err(|_| HvError::AlreadyExists)?;
        GLOBAL.get().ok_or(HvError::BadState)
    }

    /// Returns the process-wide VMX state, if installed.
    pub fn global() -> Option<&'static Arc<Self>> {
        GLOBAL.get()
    }

    /// Returns the hardware VMX runs on.
    pub fn hardware(&self) -> &dyn VmxHardware {
        &*self.hardware
    }

    /// Returns the page allocator used for VMX structures and EPT tables.
    pub fn pmm(&self) -> &Arc<Pmm> {
        &self.pmm
    }

    /// Returns the basic VMX capabilities of the boot CPU.
    pub fn vmx_info(&self) -> VmxInfo {
        VmxInfo::read(&*self.hardware, 0)
    }

    /// Returns the number of live references.
    pub fn reference_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Checks whether VMX operation is enabled.
    pub fn is_enabled(&self) -> bool {
        !self.regions.lock().is_empty()
    }

    /// Takes a reference, enabling VMX on every CPU if this is the first.
    pub fn acquire(self: &Arc<Self>) -> Result<VmxReference, HvError> {
        if !self.try_acquire_shared() {
            let mut regions = self.regions.lock();

            // Someone else may have enabled VMX while we waited for the
            // lock.
            if self.refs.load(Ordering::Acquire) == 0 {
                *regions = self.enable()?;
            }

            self.refs.fetch_add(1, Ordering::AcqRel);
        }

        Ok(VmxReference {
            state: Arc::clone(self),
        })
    }

    /// Bumps the counter if VMX is already enabled.
    fn try_acquire_shared(&self) -> bool {
        let mut refs = self.refs.load(Ordering::Acquire);

        while refs > 0 {
            match self.refs.compare_exchange_weak(
                refs,
                refs + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(current) => refs = current,
            }
        }

        false
    }

    fn release(&self) {
        let mut refs = self.refs.load(Ordering::Acquire);

        // Fast path: not the last reference.
        while refs > 1 {
            match self.refs.compare_exchange_weak(
                refs,
                refs - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(current) => refs = current,
            }
        }

        let mut regions = self.regions.lock();
        if self.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.disable(&mut regions);
        }
    }

    /// Enables VMX on every CPU and returns the VMXON regions in use.
    ///
    /// CPUs enabled before a failure are disabled again.
    fn enable(&self) -> Result<VmxonRegions, HvError> {
        let hardware = &*self.hardware;

        if !hardware.has_vmx() {
            return Err(HvError::NotSupported);
        }

        let vmx_info = VmxInfo::read(hardware, 0);
        let ept_info = EptInfo::read(hardware, 0);
        if !ept_info.is_usable() {
            tracing::warn!(?ept_info, "EPT not usable");
            return Err(HvError::NotSupported);
        }

        let cpu_count = hardware.cpu_count();
        let mut regions = VmxonRegions::with_capacity(cpu_count);
        for _ in 0..cpu_count {
            let mut page = VmxPage::alloc(&self.pmm, &vmx_info, 0)?;
            page.set_revision_id(vmx_info.revision_id)?;
            regions.push(page);
        }

        for (cpu, region) in regions.iter().enumerate() {
            if let Err(err) = self.vmxon(cpu, region) {
                tracing::warn!(cpu, %err, "failed to enable VMX");

                for cpu in (0..cpu).rev() {
                    hardware.vmxoff(cpu);
                }

                return Err(err);
            }
        }

        tracing::info!(cpu_count, revision_id = vmx_info.revision_id, "VMX enabled");
        Ok(regions)
    }

    fn vmxon(&self, cpu: usize, region: &VmxPage) -> Result<(), HvError> {
        let hardware = &*self.hardware;

        let feature_control =
            FeatureControl::from_bits_retain(hardware.read_msr(cpu, msr::IA32_FEATURE_CONTROL));
        if !feature_control.contains(FeatureControl::LOCK | FeatureControl::VMXON) {
            tracing::warn!(cpu, ?feature_control, "VMXON disabled by feature control");
            return Err(HvError::NotSupported);
        }

        let cr0 = hardware.read_cr0(cpu);
        if cr_is_invalid(
            cr0,
            hardware.read_msr(cpu, msr::IA32_VMX_CR0_FIXED0),
            hardware.read_msr(cpu, msr::IA32_VMX_CR0_FIXED1),
        ) {
            tracing::warn!(cpu, cr0 = %Hex(cr0), "CR0 not valid for VMX operation");
            return Err(HvError::BadState);
        }

        // CR4.VMXE is set by VMXON itself, so it must be allowed but need not
        // be set yet.
        const CR4_VMXE: u64 = 1 << 13;
        let cr4 = hardware.read_cr4(cpu) | CR4_VMXE;
        if cr_is_invalid(
            cr4,
            hardware.read_msr(cpu, msr::IA32_VMX_CR4_FIXED0),
            hardware.read_msr(cpu, msr::IA32_VMX_CR4_FIXED1),
        ) {
            tracing::warn!(cpu, cr4 = %Hex(cr4), "CR4 not valid for VMX operation");
            return Err(HvError::BadState);
        }

        hardware.vmxon(cpu, region.paddr())
    }

    fn disable(&self, regions: &mut VmxonRegions) {
        for cpu in (0..regions.len()).rev() {
            self.hardware.vmxoff(cpu);
        }

        regions.clear();
        tracing::info!("VMX disabled");
    }

    /// Executes INVEPT on every CPU.
    pub fn invept_all(&self, kind: InvEpt, eptp: u64) -> Result<(), HvError> {
        tracing::trace!(?kind, eptp = %Hex(eptp), "INVEPT on all CPUs");

        for cpu in 0..self.hardware.cpu_count() {
            self.hardware.invept(cpu, kind, eptp)?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for VmxState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("VmxState")
            .field("refs", &self.reference_count())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// A reference keeping VMX enabled.
///
/// Dropping the last reference disables VMX on every CPU.
#[derive(Debug)]
pub struct VmxReference {
    state: Arc<VmxState>,
}

impl VmxReference {
    /// Returns the VMX state the reference belongs to.
    pub fn state(&self) -> &Arc<VmxState> {
        &self.state
    }
}

impl Drop for VmxReference {
    fn drop(&mut self) {
        self.state.release();
    }
}
