//! Core types shared by the hvx crates.
//!
//! This crate holds the vocabulary the rest of the workspace is written in:
//! address newtypes for the guest and host physical address spaces, the
//! [`HvError`] status taxonomy, MMU permission flags, cache policies and the
//! [`Architecture`] trait implemented by the `hvx-arch-*` crates.

mod addr;
mod arch;
mod error;
mod hex;
mod macros;
mod mmu;

pub use self::{
    addr::{Gfn, Gpa, Hpa, PAGE_SHIFT, PAGE_SIZE, is_page_aligned, page_align_down, page_align_up},
    arch::Architecture,
    error::HvError,
    hex::Hex,
    mmu::{CachePolicy, MmuFlags},
};
