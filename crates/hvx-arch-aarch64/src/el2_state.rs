use std::sync::Arc;

use hvx_core::HvError;
use hvx_hypervisor::{Id, IdAllocator};
use hvx_vm::Pmm;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::El2Hardware;

/// Number of VMIDs; VMID 0 is reserved for the host.
pub const MAX_VMID: usize = 256;

static GLOBAL: OnceCell<Arc<El2State>> = OnceCell::new();

/// Global EL2 state: the hardware interface and the VMID pool.
pub struct El2State {
    hardware: Arc<dyn El2Hardware>,
    pmm: Arc<Pmm>,
    vmids: Mutex<IdAllocator<u16, MAX_VMID>>,
}

impl El2State {
    /// Creates the EL2 state for `hardware`, allocating stage-2 tables from
    /// `pmm`.
    pub fn new(hardware: Arc<dyn El2Hardware>, pmm: Arc<Pmm>) -> Arc<Self> {
        Arc::new(Self {
            hardware,
            pmm,
            vmids: Mutex::new(IdAllocator::new()),
        })
    }

    /// Installs the process-wide EL2 state, backed by the global page
    /// allocator.
    pub fn init_global(hardware: Arc<dyn El2Hardware>) -> Result<&'static Arc<Self>, HvError> {
        let state = Self::new(hardware, Arc::clone(Pmm::global()));
        GLOBAL.set(state).map_err(|_| HvError::AlreadyExists)?;
        GLOBAL.get().ok_or(HvError::BadState)
    }

    /// Returns the process-wide EL2 state, if installed.
    pub fn global() -> Option<&'static Arc<Self>> {
        GLOBAL.get()
    }

    /// Returns the hardware interface.
    pub fn hardware(&self) -> &Arc<dyn El2Hardware> {
        &self.hardware
    }

    /// Returns the page allocator for stage-2 tables.
    pub fn pmm(&self) -> &Arc<Pmm> {
        &self.pmm
    }

    /// Allocates a VMID.
    ///
    /// A VMID in use is never handed out again, since its TLB entries would
    /// be shared; once all are taken this fails with
    /// [`HvError::NoResources`].
    pub fn alloc_vmid(self: &Arc<Self>) -> Result<Vmid, HvError> {
        let id = self.vmids.lock().try_alloc()?;
        tracing::debug!(vmid = id.val(), "allocated VMID");

        Ok(Vmid {
            id: Some(id),
            state: Arc::clone(self),
        })
    }
}

impl std::fmt::Debug for El2State {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("El2State")
            .field("boot_el", &self.hardware.boot_el())
            .finish()
    }
}

/// A VMID, returned to the pool when dropped.
///
/// Its TLB entries are invalidated before it becomes available again.
pub struct Vmid {
    id: Option<Id<u16>>,
    state: Arc<El2State>,
}

impl Vmid {
    /// Returns the VMID value.
    pub fn val(&self) -> u16 {
        self.id.as_ref().map_or(0, Id::val)
    }
}

impl std::fmt::Debug for Vmid {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Vmid").field(&self.val()).finish()
    }
}

impl Drop for Vmid {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            let vmid = id.val();

            // The next owner of the VMID must not hit stale TLB entries.
            self.state.hardware.invalidate_vmid(vmid);

            if let Err(err) = self.state.vmids.lock().free(id) {
                tracing::error!(vmid, %err, "failed to free VMID");
            }
        }
    }
}
