use std::{collections::BTreeMap, sync::Arc};

use hvx_core::{CachePolicy, Hex, HvError, Hpa, PAGE_SIZE, is_page_aligned, page_align_up};
use parking_lot::Mutex;

use crate::{Pmm, VmPage};

/// A memory object that can be mapped into address spaces.
pub struct Vmo {
    size: u64,
    backing: Backing,
    inner: Mutex<VmoInner>,
}

enum Backing {
    /// Pages allocated from a [`Pmm`] on first touch.
    Paged(Arc<Pmm>),

    /// A contiguous window of physical memory owned by someone else.
    Physical(Hpa),
}

struct VmoInner {
    pages: BTreeMap<u64, VmPage>,
    cache_policy: CachePolicy,
    mappings: usize,
}

impl Vmo {
    /// Creates a paged object of `size` bytes, rounded up to whole pages.
    ///
    /// No memory is committed until a page is touched or
    /// [`commit_range`](Self::commit_range) is called.
    pub fn create(pmm: &Arc<Pmm>, size: u64) -> Result<Arc<Self>, HvError> {
        let size = page_align_up(size).ok_or(HvError::OutOfRange)?;
        Ok(Self::build(size, Backing::Paged(Arc::clone(pmm))))
    }

    /// Creates an object covering `size` bytes of physical memory starting
    /// at `base`.
    ///
    /// The memory is never freed by the object.
    pub fn create_physical(base: Hpa, size: u64) -> Result<Arc<Self>, HvError> {
        if size == 0 || !is_page_aligned(base.0) || !is_page_aligned(size) {
            return Err(HvError::InvalidArgs);
        }

        if base.checked_add(size).is_none() {
            return Err(HvError::OutOfRange);
        }

        Ok(Self::build(size, Backing::Physical(base)))
    }

    fn build(size: u64, backing: Backing) -> Arc<Self> {
        Arc::new(Self {
            size,
            backing,
            inner: Mutex::new(VmoInner {
                pages: BTreeMap::new(),
                cache_policy: CachePolicy::Cached,
                mappings: 0,
            }),
        })
    }

    /// Returns the size of the object in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns whether the object is a window of physical memory.
    pub fn is_physical(&self) -> bool {
        matches!(self.backing, Backing::Physical(_))
    }

    /// Returns the cache policy applied to mappings of this object.
    pub fn cache_policy(&self) -> CachePolicy {
        self.inner.lock().cache_policy
    }

    /// Sets the cache policy applied to future mappings of this object.
    ///
    /// Fails with [`HvError::BadState`] while the object is mapped or has
    /// committed pages, since existing translations would disagree with the
    /// new policy.
    pub fn set_mapping_cache_policy(&self, policy: CachePolicy) -> Result<(), HvError> {
        let mut inner = self.inner.lock();

        if inner.mappings != 0 || !inner.pages.is_empty() {
            return Err(HvError::BadState);
        }

        inner.cache_policy = policy;
        Ok(())
    }

    /// Commits every page in `[offset, offset + len)`.
    pub fn commit_range(&self, offset: u64, len: u64) -> Result<(), HvError> {
        let end = offset.checked_add(len).ok_or(HvError::OutOfRange)?;
        if end > self.size {
            return Err(HvError::OutOfRange);
        }

        let mut page_offset = offset & !(PAGE_SIZE - 1);
        while page_offset < end {
            self.get_page(page_offset, true)?;
            page_offset += PAGE_SIZE;
        }

        Ok(())
    }

    /// Returns the physical address of the page at `offset`.
    ///
    /// When `commit` is set, a paged object allocates the page if needed;
    /// otherwise `None` is returned for pages not yet committed. Physical
    /// objects always resolve.
    pub fn get_page(&self, offset: u64, commit: bool) -> Result<Option<Hpa>, HvError> {
        if offset >= self.size {
            return Err(HvError::OutOfRange);
        }

        let offset = offset & !(PAGE_SIZE - 1);

        let pmm = match &self.backing {
            Backing::Physical(base) => return Ok(Some(*base + offset)),
            Backing::Paged(pmm) => pmm,
        };

        let mut inner = self.inner.lock();
        if let Some(page) = inner.pages.get(&offset) {
            return Ok(Some(page.paddr()));
        }

        if !commit {
            return Ok(None);
        }

        let page = pmm.alloc_page()?;
        let paddr = page.paddr();
        inner.pages.insert(offset, page);

        tracing::trace!(offset = %Hex(offset), %paddr, "committed page");
        Ok(Some(paddr))
    }

    /// Returns the number of committed pages.
    pub fn committed_pages(&self) -> usize {
        self.inner.lock().pages.len()
    }

    pub(crate) fn add_mapping(&self) {
        self.inner.lock().mappings += 1;
    }

    pub(crate) fn remove_mapping(&self) {
        self.inner.lock().mappings -= 1;
    }
}

impl std::fmt::Debug for Vmo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Vmo")
            .field("size", &Hex(self.size))
            .field("physical", &self.is_physical())
            .finish()
    }
}
