use std::sync::Arc;

use hvx_core::{HvError, Hpa, PAGE_SIZE};
use hvx_vm::{Pmm, VmPage};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::VmxInfo;

/// Header of VMXON and VMCS regions.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct VmxRegion {
    revision_id: u32,
}

/// A page handed to the processor for VMX structures (VMXON regions, MSR
/// bitmaps).
#[derive(Debug)]
pub struct VmxPage {
    page: VmPage,
}

impl VmxPage {
    /// Allocates a page filled with `fill`.
    ///
    /// Fails with [`HvError::NotSupported`] if the processor needs regions
    /// larger than a page or cannot access them write-back.
    pub fn alloc(pmm: &Arc<Pmm>, info: &VmxInfo, fill: u8) -> Result<Self, HvError> {
        if info.region_size as u64 > PAGE_SIZE || !info.write_back {
            tracing::warn!(?info, "unsupported VMX region requirements");
            return Err(HvError::NotSupported);
        }

        let mut page = pmm.alloc_page()?;
        page.fill(fill);

        Ok(Self { page })
    }

    /// Returns the physical address of the page.
    pub fn paddr(&self) -> Hpa {
        self.page.paddr()
    }

    /// Returns the contents of the page.
    pub fn bytes(&self) -> &[u8] {
        self.page.bytes()
    }

    /// Returns the contents of the page, mutably.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.page.bytes_mut()
    }

    /// Stamps the page with the VMCS revision identifier, as required for
    /// VMXON regions.
    pub fn set_revision_id(&mut self, revision_id: u32) -> Result<(), HvError> {
        let (region, _) = VmxRegion::mut_from_prefix(self.page.bytes_mut())
            .map_err(|_| HvError::Other("VMX region header does not fit a page"))?;

        region.revision_id = revision_id;
        Ok(())
    }

    /// Returns the VMCS revision identifier the page is stamped with.
    pub fn revision_id(&self) -> Result<u32, HvError> {
        let (region, _) = VmxRegion::ref_from_prefix(self.page.bytes())
            .map_err(|_| HvError::Other("VMX region header does not fit a page"))?;

        Ok(region.revision_id)
    }
}
