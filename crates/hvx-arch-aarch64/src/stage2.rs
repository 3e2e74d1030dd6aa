use std::sync::Arc;

use hvx_core::{CachePolicy, HvError, Hpa, MmuFlags};
use hvx_vm::{ArchMmu, PageTable, PageTableFormat, Pmm, Translation};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::El2Hardware;

/// Stage-2 memory attributes (`MemAttr[3:0]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MemAttr {
    /// Device-nGnRnE memory.
    DeviceNgnrne = 0b0000,

    /// Normal memory, outer and inner non-cacheable.
    NormalNonCacheable = 0b0101,

    /// Normal memory, outer and inner write-back cacheable.
    NormalWriteBack = 0b1111,
}

impl From<CachePolicy> for MemAttr {
    fn from(policy: CachePolicy) -> Self {
        match policy {
            CachePolicy::Cached => Self::NormalWriteBack,
            CachePolicy::Uncached | CachePolicy::WriteCombining => Self::NormalNonCacheable,
            CachePolicy::UncachedDevice => Self::DeviceNgnrne,
        }
    }
}

/// A stage-2 translation table descriptor.
#[repr(transparent)]
#[derive(Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct Stage2Descriptor(pub u64);

impl Stage2Descriptor {
    const VALID: u64 = 1 << 0;
    const TABLE_OR_PAGE: u64 = 1 << 1;
    const S2AP_READ: u64 = 1 << 6;
    const S2AP_WRITE: u64 = 1 << 7;
    const SH_INNER: u64 = 0b11 << 8;
    const AF: u64 = 1 << 10;
    const XN: u64 = 1 << 54;
    const ADDRESS_MASK: u64 = 0x0000_ffff_ffff_f000;

    /// Checks if the descriptor is valid.
    pub fn valid(self) -> bool {
        self.0 & Self::VALID != 0
    }

    /// Returns the memory attributes of a page descriptor, if recognized.
    pub fn mem_attr(self) -> Option<MemAttr> {
        match (self.0 >> 2) & 0b1111 {
            0b0000 => Some(MemAttr::DeviceNgnrne),
            0b0101 => Some(MemAttr::NormalNonCacheable),
            0b1111 => Some(MemAttr::NormalWriteBack),
            _ => None,
        }
    }

    /// Checks if the guest may read the page.
    pub fn read(self) -> bool {
        self.0 & Self::S2AP_READ != 0
    }

    /// Checks if the guest may write the page.
    pub fn write(self) -> bool {
        self.0 & Self::S2AP_WRITE != 0
    }

    /// Checks if instruction fetches from the page are forbidden.
    pub fn execute_never(self) -> bool {
        self.0 & Self::XN != 0
    }

    /// Checks if the access flag is set.
    pub fn accessed(self) -> bool {
        self.0 & Self::AF != 0
    }

    /// Returns the shareability field.
    pub fn shareability(self) -> u8 {
        ((self.0 >> 8) & 0b11) as u8
    }

    /// Returns the output address.
    pub fn address(self) -> Hpa {
        Hpa(self.0 & Self::ADDRESS_MASK)
    }

    /// Returns the access permissions granted by a page descriptor.
    pub fn flags(self) -> MmuFlags {
        let mut flags = MmuFlags::empty();
        flags.set(MmuFlags::READ, self.read());
        flags.set(MmuFlags::WRITE, self.write());
        flags.set(MmuFlags::EXECUTE, !self.execute_never());
        flags
    }
}

impl std::fmt::Debug for Stage2Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Stage2Descriptor")
            .field("address", &self.address())
            .field("flags", &self.flags())
            .field("mem_attr", &self.mem_attr())
            .field("accessed", &self.accessed())
            .field("shareability", &self.shareability())
            .finish()
    }
}

/// Descriptor encoding of 3-level stage-2 tables with a 4KiB granule.
pub struct Stage2Format;

impl PageTableFormat for Stage2Format {
    const LEVELS: u64 = 3;

    fn table_entry(table: Hpa) -> u64 {
        table.0 | Stage2Descriptor::TABLE_OR_PAGE | Stage2Descriptor::VALID
    }

    fn leaf_entry(page: Hpa, flags: MmuFlags, cache_policy: CachePolicy) -> u64 {
        let mem_attr = MemAttr::from(cache_policy);

        let mut entry = page.0
            | Stage2Descriptor::VALID
            | Stage2Descriptor::TABLE_OR_PAGE
            | Stage2Descriptor::AF
            | (mem_attr as u64) << 2;

        if mem_attr != MemAttr::DeviceNgnrne {
            entry |= Stage2Descriptor::SH_INNER;
        }
        if flags.contains(MmuFlags::READ) {
            entry |= Stage2Descriptor::S2AP_READ;
        }
        if flags.contains(MmuFlags::WRITE) {
            entry |= Stage2Descriptor::S2AP_WRITE;
        }
        if !flags.contains(MmuFlags::EXECUTE) {
            entry |= Stage2Descriptor::XN;
        }

        entry
    }

    fn is_present(entry: u64) -> bool {
        Stage2Descriptor(entry).valid()
    }

    fn address(entry: u64) -> Hpa {
        Stage2Descriptor(entry).address()
    }

    fn flags(entry: u64) -> MmuFlags {
        Stage2Descriptor(entry).flags()
    }

    fn cache_policy(entry: u64) -> CachePolicy {
        match Stage2Descriptor(entry).mem_attr() {
            Some(MemAttr::NormalWriteBack) => CachePolicy::Cached,
            Some(MemAttr::DeviceNgnrne) => CachePolicy::UncachedDevice,
            Some(MemAttr::NormalNonCacheable) | None => CachePolicy::Uncached,
        }
    }
}

/// Stage-2 translation tables of a guest.
///
/// Removing or downgrading a translation invalidates the TLB entries tagged
/// with the guest's VMID.
pub struct Stage2PageTable {
    table: PageTable<Stage2Format>,
    vmid: u16,
    hardware: Arc<dyn El2Hardware>,
}

impl Stage2PageTable {
    /// Creates empty tables for the guest tagged with `vmid`.
    pub fn new(pmm: &Arc<Pmm>, hardware: Arc<dyn El2Hardware>, vmid: u16) -> Result<Self, HvError> {
        Ok(Self {
            table: PageTable::new(pmm)?,
            vmid,
            hardware,
        })
    }

    /// Returns the VMID the tables are tagged with.
    pub fn vmid(&self) -> u16 {
        self.vmid
    }

    /// Returns the value of `VTTBR_EL2` for the guest.
    pub fn vttbr(&self) -> u64 {
        (self.vmid as u64) << 48 | self.table.root().0
    }
}

impl ArchMmu for Stage2PageTable {
    fn table_phys(&self) -> Hpa {
        self.table.root()
    }

    fn map(
        &mut self,
        vaddr: u64,
        pages: &[Hpa],
        flags: MmuFlags,
        cache_policy: CachePolicy,
    ) -> Result<(), HvError> {
        self.table.map(vaddr, pages, flags, cache_policy)
    }

    fn unmap(&mut self, vaddr: u64, count: usize) -> Result<usize, HvError> {
        let unmapped = self.table.unmap(vaddr, count)?;
        if unmapped > 0 {
            self.hardware.invalidate_vmid(self.vmid);
        }

        Ok(unmapped)
    }

    fn protect(&mut self, vaddr: u64, count: usize, flags: MmuFlags) -> Result<(), HvError> {
        self.table.protect(vaddr, count, flags)?;
        self.hardware.invalidate_vmid(self.vmid);
        Ok(())
    }

    fn query(&self, vaddr: u64) -> Option<Translation> {
        self.table.query(vaddr)
    }
}
