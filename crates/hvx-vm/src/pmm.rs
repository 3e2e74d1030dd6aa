use std::sync::Arc;

use hvx_core::{Hex, HvError, Hpa, PAGE_SHIFT};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

/// Frame number of the first page handed out by an allocator.
const FIRST_FRAME: u64 = 0x100;

/// The contents of a single physical page.
///
/// Stored as 64-bit words so page table pages can be walked without any
/// casting; [`IntoBytes`] gives the byte view.
#[repr(C, align(4096))]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct PageFrame(pub [u64; 512]);

/// Physical page allocator.
///
/// Freed frames are recycled in LIFO order, so a page released by one address
/// space is likely to be handed to the next one. Consumers that cache
/// translations keyed by physical address must account for that.
pub struct Pmm {
    state: Mutex<PmmState>,
    limit: Option<usize>,
}

struct PmmState {
    next_frame: u64,
    free: Vec<Hpa>,
    allocated: usize,
}

static GLOBAL: Lazy<Arc<Pmm>> = Lazy::new(Pmm::new);

impl Pmm {
    /// Creates an unbounded allocator.
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// Creates an allocator that fails with [`HvError::NoMemory`] once
    /// `pages` pages are outstanding.
    pub fn with_limit(pages: usize) -> Arc<Self> {
        Self::build(Some(pages))
    }

    fn build(limit: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PmmState {
                next_frame: FIRST_FRAME,
                free: Vec::new(),
                allocated: 0,
            }),
            limit,
        })
    }

    /// Returns the process-wide allocator.
    pub fn global() -> &'static Arc<Pmm> {
        &GLOBAL
    }

    /// Allocates a zeroed page.
    pub fn alloc_page(self: &Arc<Self>) -> Result<VmPage, HvError> {
        let mut state = self.state.lock();

        if let Some(limit) = self.limit
            && state.allocated >= limit
        {
            tracing::debug!(limit, "page allocator exhausted");
            return Err(HvError::NoMemory);
        }

        let frame = PageFrame::new_box_zeroed().map_err(|_| HvError::NoMemory)?;
        let paddr = match state.free.pop() {
            Some(paddr) => paddr,
            None => {
                let paddr = Hpa(state.next_frame << PAGE_SHIFT);
                state.next_frame += 1;
                paddr
            }
        };

        state.allocated += 1;

        Ok(VmPage {
            paddr,
            frame,
            pmm: Arc::clone(self),
        })
    }

    /// Returns a page to the allocator.
    pub fn free_page(&self, page: VmPage) {
        drop(page);
    }

    /// Returns the number of pages currently allocated.
    pub fn allocated_pages(&self) -> usize {
        self.state.lock().allocated
    }

    fn release(&self, paddr: Hpa) {
        let mut state = self.state.lock();
        state.allocated -= 1;
        state.free.push(paddr);
    }
}

/// A page owned by its holder and returned to its [`Pmm`] on drop.
pub struct VmPage {
    paddr: Hpa,
    frame: Box<PageFrame>,
    pmm: Arc<Pmm>,
}

impl VmPage {
    /// Returns the host physical address of the page.
    pub fn paddr(&self) -> Hpa {
        self.paddr
    }

    /// Returns the page contents.
    pub fn frame(&self) -> &PageFrame {
        &self.frame
    }

    /// Returns the page contents mutably.
    pub fn frame_mut(&mut self) -> &mut PageFrame {
        &mut self.frame
    }

    /// Returns the page contents as bytes.
    pub fn bytes(&self) -> &[u8] {
        self.frame.as_bytes()
    }

    /// Returns the page contents as mutable bytes.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.frame.as_mut_bytes()
    }

    /// Fills the page with `value`.
    pub fn fill(&mut self, value: u8) {
        self.bytes_mut().fill(value);
    }
}

impl Drop for VmPage {
    fn drop(&mut self) {
        self.pmm.release(self.paddr);
    }
}

impl std::fmt::Debug for VmPage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("VmPage")
            .field("paddr", &Hex(self.paddr.0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_reuse() -> Result<(), HvError> {
        let pmm = Pmm::new();

        let first = pmm.alloc_page()?;
        let second = pmm.alloc_page()?;
        assert_ne!(first.paddr(), second.paddr());
        assert_eq!(first.paddr().0 & 0xfff, 0);
        assert_eq!(pmm.allocated_pages(), 2);

        let paddr = first.paddr();
        pmm.free_page(first);
        assert_eq!(pmm.allocated_pages(), 1);

        let third = pmm.alloc_page()?;
        assert_eq!(third.paddr(), paddr);
        assert!(third.bytes().iter().all(|&b| b == 0));
        Ok(())
    }

    #[test]
    fn limit() -> Result<(), HvError> {
        let pmm = Pmm::with_limit(1);

        let page = pmm.alloc_page()?;
        assert_eq!(pmm.alloc_page().err(), Some(HvError::NoMemory));

        drop(page);
        let mut page = pmm.alloc_page()?;
        page.fill(0xff);
        assert_eq!(page.frame().0[0], u64::MAX);
        Ok(())
    }
}
