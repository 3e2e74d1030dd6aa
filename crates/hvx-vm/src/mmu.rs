use hvx_core::{CachePolicy, HvError, Hpa, MmuFlags};

/// A translation installed in an architecture page table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    /// Host physical address the queried address translates to.
    pub paddr: Hpa,

    /// Access permissions of the leaf entry.
    pub flags: MmuFlags,

    /// Cache policy decoded from the leaf entry.
    pub cache_policy: CachePolicy,

    /// The raw leaf entry.
    pub entry: u64,
}

/// The hardware page tables behind a [`VmAspace`].
///
/// All addresses and counts are in whole pages; unaligned addresses are
/// rejected with [`HvError::InvalidArgs`].
///
/// [`VmAspace`]: crate::VmAspace
pub trait ArchMmu: Send + 'static {
    /// Returns the physical address of the root table.
    fn table_phys(&self) -> Hpa;

    /// Maps consecutive pages starting at `vaddr`.
    ///
    /// Either every page is mapped or, on error, none is.
    fn map(
        &mut self,
        vaddr: u64,
        pages: &[Hpa],
        flags: MmuFlags,
        cache_policy: CachePolicy,
    ) -> Result<(), HvError>;

    /// Removes the translations of `count` pages starting at `vaddr`.
    ///
    /// Returns the number of pages that were mapped.
    fn unmap(&mut self, vaddr: u64, count: usize) -> Result<usize, HvError>;

    /// Changes the permissions of the mapped pages in the range.
    ///
    /// Pages without a translation are skipped.
    fn protect(&mut self, vaddr: u64, count: usize, flags: MmuFlags) -> Result<(), HvError>;

    /// Looks up the translation of `vaddr`.
    fn query(&self, vaddr: u64) -> Option<Translation>;
}
