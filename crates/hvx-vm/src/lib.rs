//! Memory management building blocks for guest address spaces.
//!
//! A guest physical address space is an ordinary address space whose page
//! tables happen to be the second-level tables walked by the CPU on behalf of
//! the guest. This crate provides the pieces such an address space is made of:
//!
//! - [`Pmm`] hands out host physical pages ([`VmPage`]).
//! - [`Vmo`] is a memory object: paged memory committed on demand, or a
//!   window of externally owned physical memory.
//! - [`VmAspace`], [`Vmar`] and [`VmMapping`] form the region tree describing
//!   which parts of the space are backed by which objects.
//! - [`PageTable`] is a software radix table whose entry encoding is supplied
//!   by the architecture through [`PageTableFormat`]; anything implementing
//!   [`ArchMmu`] can back a [`VmAspace`].

mod aspace;
mod mmu;
mod page_table;
mod pmm;
mod vmo;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

pub use self::{
    aspace::{VmAspace, VmMapping, Vmar, VmarFlags},
    mmu::{ArchMmu, Translation},
    page_table::{PageTable, PageTableFormat, PAGE_TABLE_ENTRIES},
    pmm::{PageFrame, Pmm, VmPage},
    vmo::Vmo,
};
