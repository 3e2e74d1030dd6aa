use std::sync::Arc;

use hvx_core::{CachePolicy, HvError, Hpa, MmuFlags};
use hvx_vm::{ArchMmu, PageTable, PageTableFormat, Translation};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::VmxState;

/// INVEPT invalidation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum InvEpt {
    /// Invalidates mappings associated with the EPTP in the descriptor.
    SingleContext = 1,

    /// Invalidates mappings associated with all EPTPs.
    Global = 2,
}

/// Memory types usable in EPT leaf entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EptMemoryType {
    /// Uncacheable (UC).
    Uncached = 0,

    /// Write combining (WC).
    WriteCombining = 1,

    /// Write through (WT).
    WriteThrough = 4,

    /// Write protected (WP).
    WriteProtected = 5,

    /// Write back (WB).
    WriteBack = 6,
}

impl TryFrom<u8> for EptMemoryType {
    type Error = HvError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Uncached),
            1 => Ok(Self::WriteCombining),
            4 => Ok(Self::WriteThrough),
            5 => Ok(Self::WriteProtected),
            6 => Ok(Self::WriteBack),
            _ => Err(HvError::InvalidArgs),
        }
    }
}

impl From<CachePolicy> for EptMemoryType {
    fn from(policy: CachePolicy) -> Self {
        match policy {
            CachePolicy::Cached => Self::WriteBack,
            CachePolicy::Uncached | CachePolicy::UncachedDevice => Self::Uncached,
            CachePolicy::WriteCombining => Self::WriteCombining,
        }
    }
}

/// Returns the EPT pointer for a PML4 table: write-back paging structures
/// with a 4-level walk.
pub fn ept_pointer_from_pml4(pml4: Hpa) -> u64 {
    const WALK_LENGTH_4: u64 = 3 << 3;

    pml4.0 | WALK_LENGTH_4 | EptMemoryType::WriteBack as u64
}

/// An EPT paging-structure entry.
#[repr(transparent)]
#[derive(Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct EptEntry(pub u64);

impl EptEntry {
    const ADDRESS_MASK: u64 = 0x000f_ffff_ffff_f000;

    /// Checks if reads are allowed.
    pub fn read(self) -> bool {
        self.0 & 1 != 0
    }

    /// Checks if writes are allowed.
    pub fn write(self) -> bool {
        (self.0 >> 1) & 1 != 0
    }

    /// Checks if instruction fetches are allowed.
    pub fn execute(self) -> bool {
        (self.0 >> 2) & 1 != 0
    }

    /// Returns the memory type of a leaf entry, if valid.
    pub fn memory_type(self) -> Option<EptMemoryType> {
        EptMemoryType::try_from(((self.0 >> 3) & 0b111) as u8).ok()
    }

    /// Checks if the guest PAT is ignored for this page.
    pub fn ignore_pat(self) -> bool {
        (self.0 >> 6) & 1 != 0
    }

    /// Checks if the entry maps a large page.
    pub fn large(self) -> bool {
        (self.0 >> 7) & 1 != 0
    }

    /// Checks if the entry has been used by a translation.
    pub fn accessed(self) -> bool {
        (self.0 >> 8) & 1 != 0
    }

    /// Checks if the page has been written to.
    pub fn dirty(self) -> bool {
        (self.0 >> 9) & 1 != 0
    }

    /// Returns the physical address the entry refers to.
    pub fn address(self) -> Hpa {
        Hpa(self.0 & Self::ADDRESS_MASK)
    }

    /// Returns the access permissions granted by the entry.
    pub fn flags(self) -> MmuFlags {
        MmuFlags::from_bits_truncate((self.0 & 0b111) as u8)
    }
}

impl std::fmt::Debug for EptEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("EptEntry")
            .field("address", &self.address())
            .field("flags", &self.flags())
            .field("memory_type", &self.memory_type())
            .field("ignore_pat", &self.ignore_pat())
            .field("large", &self.large())
            .field("accessed", &self.accessed())
            .field("dirty", &self.dirty())
            .finish()
    }
}

impl From<u64> for EptEntry {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<EptEntry> for u64 {
    fn from(value: EptEntry) -> Self {
        value.0
    }
}

/// Entry encoding of 4-level EPT tables.
pub struct EptFormat;

impl PageTableFormat for EptFormat {
    const LEVELS: u64 = 4;

    fn table_entry(table: Hpa) -> u64 {
        // Non-leaf entries grant everything; leaves restrict.
        table.0 | MmuFlags::RWX.bits() as u64
    }

    fn leaf_entry(page: Hpa, flags: MmuFlags, cache_policy: CachePolicy) -> u64 {
        let memory_type = EptMemoryType::from(cache_policy) as u64;
        page.0 | flags.bits() as u64 | memory_type << 3
    }

    fn is_present(entry: u64) -> bool {
        entry & 0b111 != 0
    }

    fn address(entry: u64) -> Hpa {
        EptEntry(entry).address()
    }

    fn flags(entry: u64) -> MmuFlags {
        EptEntry(entry).flags()
    }

    fn cache_policy(entry: u64) -> CachePolicy {
        match EptEntry(entry).memory_type() {
            Some(EptMemoryType::WriteBack) => CachePolicy::Cached,
            Some(EptMemoryType::WriteCombining) => CachePolicy::WriteCombining,
            _ => CachePolicy::Uncached,
        }
    }
}

/// Extended page tables of a guest.
///
/// Unmapping or downgrading a translation is followed by a single-context
/// INVEPT on every CPU, so no CPU keeps using the stale translation.
pub struct EptPageTable {
    table: PageTable<EptFormat>,
    vmx: Arc<VmxState>,
}

impl EptPageTable {
    /// Creates empty tables, allocating the PML4 from the VMX state's page
    /// allocator.
    pub fn new(vmx: &Arc<VmxState>) -> Result<Self, HvError> {
        Ok(Self {
            table: PageTable::new(vmx.pmm())?,
            vmx: Arc::clone(vmx),
        })
    }

    /// Returns the EPT pointer loaded into the VMCS of the guest's vCPUs.
    pub fn ept_pointer(&self) -> u64 {
        ept_pointer_from_pml4(self.table.root())
    }

    /// Invalidates cached translations of these tables on every CPU.
    pub fn invalidate(&self) -> Result<(), HvError> {
        self.vmx
            .invept_all(InvEpt::SingleContext, self.ept_pointer())
    }
}

impl ArchMmu for EptPageTable {
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
        // Not-present entries are never cached, no invalidation needed.
        self.table.map(vaddr, pages, flags, cache_policy)
    }

    fn unmap(&mut self, vaddr: u64, count: usize) -> Result<usize, HvError> {
        let unmapped = self.table.unmap(vaddr, count)?;
        if unmapped > 0 {
            self.invalidate()?;
        }

        Ok(unmapped)
    }

    fn protect(&mut self, vaddr: u64, count: usize, flags: MmuFlags) -> Result<(), HvError> {
        self.table.protect(vaddr, count, flags)?;
        self.invalidate()
    }

    fn query(&self, vaddr: u64) -> Option<Translation> {
        self.table.query(vaddr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ept_pointer() {
        assert_eq!(ept_pointer_from_pml4(Hpa(0x1234_5000)), 0x1234_501e);
    }

    #[test]
    fn leaf_encoding() {
        let entry = EptEntry(EptFormat::leaf_entry(
            Hpa(0xabc_d000),
            MmuFlags::RX,
            CachePolicy::Cached,
        ));

        assert!(entry.read());
        assert!(!entry.write());
        assert!(entry.execute());
        assert_eq!(entry.memory_type(), Some(EptMemoryType::WriteBack));
        assert!(!entry.ignore_pat());
        assert!(!entry.large());
        assert_eq!(entry.address(), Hpa(0xabc_d000));
        assert_eq!(entry.0, 0xabc_d035);
    }

    #[test]
    fn cache_policy_encoding() {
        for (policy, memory_type, decoded) in [
            (CachePolicy::Cached, EptMemoryType::WriteBack, CachePolicy::Cached),
            (CachePolicy::Uncached, EptMemoryType::Uncached, CachePolicy::Uncached),
            (CachePolicy::UncachedDevice, EptMemoryType::Uncached, CachePolicy::Uncached),
            (
                CachePolicy::WriteCombining,
                EptMemoryType::WriteCombining,
                CachePolicy::WriteCombining,
            ),
        ] {
            let entry = EptFormat::leaf_entry(Hpa(0x1000), MmuFlags::RW, policy);

            assert!(EptFormat::is_present(entry));
            assert_eq!(EptEntry(entry).memory_type(), Some(memory_type));
            assert_eq!(EptFormat::cache_policy(entry), decoded);
        }
    }

    #[test]
    fn entry_status_bits() {
        let entry = EptEntry(0x2000 | 0b111 | 1 << 6 | 1 << 7 | 1 << 8 | 1 << 9);

        assert_eq!(entry.flags(), MmuFlags::RWX);
        assert!(entry.ignore_pat());
        assert!(entry.large());
        assert!(entry.accessed());
        assert!(entry.dirty());
        assert_eq!(entry.memory_type(), Some(EptMemoryType::Uncached));
        assert!(EptEntry(2 << 3).memory_type().is_none());
        assert!(!EptFormat::is_present(0x5000));
    }
}
