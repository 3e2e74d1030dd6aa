//! Architecture independent parts of the hypervisor.
//!
//! A guest is built from a few long-lived pieces, each of which lives here:
//!
//! - [`GuestPhysicalAddressSpace`] owns the second-level page tables and the
//!   region tree describing guest memory. Faults on guest memory are resolved
//!   through [`GuestPhysicalAddressSpace::page_fault`].
//! - [`TrapMap`] records the guest physical and port IO ranges whose accesses
//!   are forwarded to the VMM instead of being backed by memory.
//! - [`IdAllocator`] hands out hardware tags (VPIDs, VMIDs) with generation
//!   numbers, so stale tags can be detected and revalidated cheaply.
//! - [`InterruptBitmap`] and [`InterruptTracker`] keep track of pending
//!   interrupt vectors.
//!
//! The architecture crates combine these into a `Guest`.

mod bitmap;
mod gpas;
mod id_allocator;
mod interrupt;
mod trap_map;

#[cfg(test)]
mod gpas_tests;

pub use self::{
    gpas::GuestPhysicalAddressSpace,
    id_allocator::{GenType, Id, IdAllocator, IdValue},
    interrupt::{InterruptBitmap, InterruptTracker},
    trap_map::{GuestPacket, Port, Trap, TrapKind, TrapMap},
};
