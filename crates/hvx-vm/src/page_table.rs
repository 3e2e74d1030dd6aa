use std::{collections::HashMap, marker::PhantomData, sync::Arc};

use hvx_core::{CachePolicy, Hex, HvError, Hpa, MmuFlags, PAGE_SHIFT, PAGE_SIZE, is_page_aligned};

use crate::{ArchMmu, Pmm, Translation, VmPage};

/// Number of entries in a table page.
pub const PAGE_TABLE_ENTRIES: usize = 512;

const INDEX_BITS: u64 = 9;

/// Encoding of a radix page table.
///
/// Levels are numbered from the leaf: level `0` holds the entries that
/// translate pages, level `LEVELS - 1` is the root.
pub trait PageTableFormat: Send + 'static {
    /// Number of table levels.
    const LEVELS: u64;

    /// Encodes an entry pointing to the next level table.
    fn table_entry(table: Hpa) -> u64;

    /// Encodes a leaf entry translating to `page`.
    fn leaf_entry(page: Hpa, flags: MmuFlags, cache_policy: CachePolicy) -> u64;

    /// Checks whether the entry is valid.
    fn is_present(entry: u64) -> bool;

    /// Returns the physical address the entry points to.
    fn address(entry: u64) -> Hpa;

    /// Decodes the permissions of a leaf entry.
    fn flags(entry: u64) -> MmuFlags;

    /// Decodes the cache policy of a leaf entry.
    fn cache_policy(entry: u64) -> CachePolicy;
}

/// A software-walked radix page table.
///
/// Table pages come from a [`Pmm`]; intermediate tables are created on demand
/// and freed once they no longer hold any entries.
pub struct PageTable<F>
where
    F: PageTableFormat,
{
    pmm: Arc<Pmm>,
    root: Hpa,
    tables: HashMap<Hpa, VmPage>,
    _marker: PhantomData<F>,
}

impl<F> PageTable<F>
where
    F: PageTableFormat,
{
    /// Number of bytes the table can translate.
    pub const SPAN: u64 = 1 << (PAGE_SHIFT + INDEX_BITS * F::LEVELS);

    /// Creates an empty table, allocating the root from `pmm`.
    pub fn new(pmm: &Arc<Pmm>) -> Result<Self, HvError> {
        let root = pmm.alloc_page()?;
        let paddr = root.paddr();

        Ok(Self {
            pmm: Arc::clone(pmm),
            root: paddr,
            tables: HashMap::from([(paddr, root)]),
            _marker: PhantomData,
        })
    }

    /// Returns the physical address of the root table.
    pub fn root(&self) -> Hpa {
        self.root
    }

    /// Returns the number of table pages, including the root.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    fn index(vaddr: u64, level: u64) -> usize {
        ((vaddr >> (PAGE_SHIFT + INDEX_BITS * level)) & (PAGE_TABLE_ENTRIES as u64 - 1)) as usize
    }

    /// Validates a range of `count` pages and returns its exclusive end.
    fn check_range(vaddr: u64, count: usize) -> Result<u64, HvError> {
        if !is_page_aligned(vaddr) {
            return Err(HvError::InvalidArgs);
        }

        let end = (count as u64)
            .checked_mul(PAGE_SIZE)
            .and_then(|len| vaddr.checked_add(len))
            .ok_or(HvError::OutOfRange)?;

        if end > Self::SPAN {
            return Err(HvError::OutOfRange);
        }

        Ok(end)
    }

    fn entries(&self, table: Hpa) -> Result<&[u64; PAGE_TABLE_ENTRIES], HvError> {
        match self.tables.get(&table) {
            Some(page) => Ok(&page.frame().0),
            None => Err(HvError::BadState),
        }
    }

    fn entries_mut(&mut self, table: Hpa) -> Result<&mut [u64; PAGE_TABLE_ENTRIES], HvError> {
        match self.tables.get_mut(&table) {
            Some(page) => Ok(&mut page.frame_mut().0),
            None => Err(HvError::BadState),
        }
    }

    /// Number of bytes translated by one entry at `level`.
    fn entry_span(level: u64) -> u64 {
        1 << (PAGE_SHIFT + INDEX_BITS * level)
    }

    /// Walks to the table and index holding the leaf entry of `vaddr`.
    ///
    /// If an intermediate table is missing, returns the span of the empty
    /// entry covering `vaddr` instead.
    fn walk(&self, vaddr: u64) -> Result<(Hpa, usize), u64> {
        let mut table = self.root;

        for level in (1..F::LEVELS).rev() {
            let entry = match self.entries(table) {
                Ok(entries) => entries[Self::index(vaddr, level)],
                Err(_) => return Err(Self::entry_span(level)),
            };

            if !F::is_present(entry) {
                return Err(Self::entry_span(level));
            }

            table = F::address(entry);
        }

        Ok((table, Self::index(vaddr, 0)))
    }

    /// Returns the table and index holding the leaf entry of `vaddr`, if
    /// every intermediate table exists.
    fn leaf_slot(&self, vaddr: u64) -> Option<(Hpa, usize)> {
        self.walk(vaddr).ok()
    }

    /// Calls `f` with the leaf slot of every page of `[vaddr, end)` whose
    /// intermediate tables exist, skipping unpopulated subtrees.
    fn for_each_leaf(
        &mut self,
        vaddr: u64,
        end: u64,
        mut f: impl FnMut(&mut Self, u64, Hpa, usize) -> Result<(), HvError>,
    ) -> Result<(), HvError> {
        let mut va = vaddr;

        while va < end {
            match self.walk(va) {
                Ok((table, index)) => {
                    f(self, va, table, index)?;
                    va += PAGE_SIZE;
                }
                Err(span) => va = (va & !(span - 1)) + span,
            }
        }

        Ok(())
    }

    fn map_page(&mut self, vaddr: u64, leaf: u64) -> Result<(), HvError> {
        let mut table = self.root;

        for level in (1..F::LEVELS).rev() {
            let index = Self::index(vaddr, level);
            let entry = self.entries(table)?[index];

            table = if F::is_present(entry) {
                F::address(entry)
            }
            else {
                let page = self.pmm.alloc_page()?;
                let next = page.paddr();
                self.tables.insert(next, page);
                self.entries_mut(table)?[index] = F::table_entry(next);
                next
            };
        }

        let slot = &mut self.entries_mut(table)?[Self::index(vaddr, 0)];
        if F::is_present(*slot) {
            return Err(HvError::AlreadyExists);
        }

        *slot = leaf;
        Ok(())
    }

    fn unmap_page(&mut self, vaddr: u64) -> Result<bool, HvError> {
        let mut path = Vec::with_capacity(F::LEVELS as usize);
        let mut table = self.root;

        for level in (0..F::LEVELS).rev() {
            let index = Self::index(vaddr, level);
            let entry = self.entries(table)?[index];
            if !F::is_present(entry) {
                return Ok(false);
            }

            path.push((table, index));
            if level > 0 {
                table = F::address(entry);
            }
        }

        // Clear the leaf, then release every table emptied by doing so.
        let root = self.root;
        while let Some((table, index)) = path.pop() {
            let entries = self.entries_mut(table)?;
            entries[index] = 0;

            if table == root || entries.iter().any(|&entry| F::is_present(entry)) {
                break;
            }

            self.tables.remove(&table);
        }

        Ok(true)
    }
}

impl<F> ArchMmu for PageTable<F>
where
    F: PageTableFormat,
{
    fn table_phys(&self) -> Hpa {
        self.root
    }

    fn map(
        &mut self,
        vaddr: u64,
        pages: &[Hpa],
        flags: MmuFlags,
        cache_policy: CachePolicy,
    ) -> Result<(), HvError> {
        Self::check_range(vaddr, pages.len())?;
        if flags.is_empty() {
            return Err(HvError::InvalidArgs);
        }

        for (mapped, page) in pages.iter().enumerate() {
            let va = vaddr + mapped as u64 * PAGE_SIZE;

            if let Err(err) = self.map_page(va, F::leaf_entry(*page, flags, cache_policy)) {
                tracing::debug!(vaddr = %Hex(va), ?err, "rolling back partial map");

                for undo in 0..mapped {
                    self.unmap_page(vaddr + undo as u64 * PAGE_SIZE)?;
                }

                return Err(err);
            }
        }

        Ok(())
    }

    fn unmap(&mut self, vaddr: u64, count: usize) -> Result<usize, HvError> {
        let end = Self::check_range(vaddr, count)?;

        let mut unmapped = 0;
        self.for_each_leaf(vaddr, end, |table, va, _, _| {
            if table.unmap_page(va)? {
                unmapped += 1;
            }
            Ok(())
        })?;

        Ok(unmapped)
    }

    fn protect(&mut self, vaddr: u64, count: usize, flags: MmuFlags) -> Result<(), HvError> {
        let end = Self::check_range(vaddr, count)?;

        self.for_each_leaf(vaddr, end, |table, _, leaf, index| {
            let slot = &mut table.entries_mut(leaf)?[index];
            if F::is_present(*slot) {
                *slot = F::leaf_entry(F::address(*slot), flags, F::cache_policy(*slot));
            }
            Ok(())
        })
    }

    fn query(&self, vaddr: u64) -> Option<Translation> {
        let (table, index) = self.leaf_slot(vaddr)?;
        let entry = self.entries(table).ok()?[index];

        if !F::is_present(entry) {
            return None;
        }

        Some(Translation {
            paddr: F::address(entry) + (vaddr & (PAGE_SIZE - 1)),
            flags: F::flags(entry),
            cache_policy: F::cache_policy(entry),
            entry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::TestFormat;

    type Table = PageTable<TestFormat>;

    #[test]
    fn map_query_unmap() -> Result<(), HvError> {
        let pmm = Pmm::new();
        let mut table = Table::new(&pmm)?;
        assert_eq!(table.table_count(), 1);

        let page = Hpa(0x7000);
        table.map(0x4000_0000, &[page], MmuFlags::RX, CachePolicy::Cached)?;
        assert_eq!(table.table_count(), 4);

        let translation = table.query(0x4000_0123).ok_or(HvError::NotFound)?;
        assert_eq!(translation.paddr, Hpa(0x7123));
        assert_eq!(translation.flags, MmuFlags::RX);

        assert_eq!(
            table.map(0x4000_0000, &[page], MmuFlags::RX, CachePolicy::Cached),
            Err(HvError::AlreadyExists)
        );

        assert_eq!(table.unmap(0x4000_0000, 2)?, 1);
        assert!(table.query(0x4000_0000).is_none());
        assert_eq!(table.table_count(), 1);
        assert_eq!(pmm.allocated_pages(), 1);
        Ok(())
    }

    #[test]
    fn failed_map_rolls_back() -> Result<(), HvError> {
        let pmm = Pmm::new();
        let mut table = Table::new(&pmm)?;

        table.map(0x2000, &[Hpa(0x9000)], MmuFlags::RW, CachePolicy::Cached)?;
        let pages = [Hpa(0xa000), Hpa(0xb000), Hpa(0xc000)];
        assert_eq!(
            table.map(0x0, &pages, MmuFlags::RW, CachePolicy::Cached),
            Err(HvError::AlreadyExists)
        );

        assert!(table.query(0x0).is_none());
        assert!(table.query(0x1000).is_none());
        assert_eq!(table.query(0x2000).map(|t| t.paddr), Some(Hpa(0x9000)));
        Ok(())
    }

    #[test]
    fn protect_keeps_address_and_policy() -> Result<(), HvError> {
        let pmm = Pmm::new();
        let mut table = Table::new(&pmm)?;

        table.map(0x1000, &[Hpa(0x5000)], MmuFlags::RWX, CachePolicy::WriteCombining)?;
        table.protect(0x0, 3, MmuFlags::READ)?;

        let translation = table.query(0x1000).ok_or(HvError::NotFound)?;
        assert_eq!(translation.paddr, Hpa(0x5000));
        assert_eq!(translation.flags, MmuFlags::READ);
        assert_eq!(translation.cache_policy, CachePolicy::WriteCombining);
        assert!(table.query(0x0).is_none());
        Ok(())
    }

    #[test]
    fn rejects_bad_ranges() -> Result<(), HvError> {
        let pmm = Pmm::new();
        let mut table = Table::new(&pmm)?;

        assert_eq!(
            table.map(0x1001, &[Hpa(0x5000)], MmuFlags::READ, CachePolicy::Cached),
            Err(HvError::InvalidArgs)
        );
        assert_eq!(table.unmap(Table::SPAN, 1), Err(HvError::OutOfRange));
        assert_eq!(
            table.map(0x1000, &[Hpa(0x5000)], MmuFlags::empty(), CachePolicy::Cached),
            Err(HvError::InvalidArgs)
        );
        Ok(())
    }

    #[test]
    fn unmap_and_protect_skip_empty_subtrees() -> Result<(), HvError> {
        let pmm = Pmm::new();
        let mut table = Table::new(&pmm)?;
        let all_pages = (Table::SPAN / PAGE_SIZE) as usize;

        table.map(0x1000, &[Hpa(0x5000)], MmuFlags::RWX, CachePolicy::Cached)?;
        table.map(0x7f_c000_0000, &[Hpa(0x6000)], MmuFlags::RWX, CachePolicy::Cached)?;

        // Both walks cover the whole table, which only finishes in time if
        // missing tables are stepped over.
        table.protect(0, all_pages, MmuFlags::READ)?;
        assert_eq!(table.query(0x1000).map(|t| t.flags), Some(MmuFlags::READ));
        assert_eq!(table.query(0x7f_c000_0000).map(|t| t.flags), Some(MmuFlags::READ));

        assert_eq!(table.unmap(0, all_pages)?, 2);
        assert!(table.query(0x1000).is_none());
        assert!(table.query(0x7f_c000_0000).is_none());
        assert_eq!(table.table_count(), 1);
        Ok(())
    }

    #[test]
    fn unmap_frees_emptied_tables_up_to_the_root() -> Result<(), HvError> {
        let pmm = Pmm::new();
        let mut table = Table::new(&pmm)?;

        table.map(0x0, &[Hpa(0x5000), Hpa(0x6000)], MmuFlags::READ, CachePolicy::Cached)?;
        assert_eq!(pmm.allocated_pages(), 4);

        // The first page leaves the leaf table populated.
        assert_eq!(table.unmap(0x0, 1)?, 1);
        assert_eq!(pmm.allocated_pages(), 4);

        assert_eq!(table.unmap(0x1000, 1)?, 1);
        assert_eq!(pmm.allocated_pages(), 1);
        Ok(())
    }

    #[test]
    fn drop_frees_tables() -> Result<(), HvError> {
        let pmm = Pmm::new();
        let mut table = Table::new(&pmm)?;

        table.map(0x0, &[Hpa(0x5000)], MmuFlags::READ, CachePolicy::Cached)?;
        table.map(0x80_0000_0000, &[Hpa(0x6000)], MmuFlags::READ, CachePolicy::Cached)?;
        assert_eq!(pmm.allocated_pages(), 7);

        drop(table);
        assert_eq!(pmm.allocated_pages(), 0);
        Ok(())
    }
}
