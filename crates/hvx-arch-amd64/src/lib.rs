//! AMD64 (Intel VMX) support.
//!
//! Guests on AMD64 run under VMX with EPT as the second-level page tables.
//! VMX is switched on process-wide by [`VmxState`] while at least one
//! [`Guest`] holds a [`VmxReference`], and every change to an EPT that the
//! CPUs may have cached is followed by an INVEPT broadcast.
//!
//! Privileged instructions and MSR reads go through [`VmxHardware`], so the
//! whole lifecycle can be driven by a mock in tests.

mod direct;
mod ept;
mod guest;
mod hardware;
mod msr_bitmap;
mod vmx_info;
mod vmx_page;
mod vmx_state;

pub mod msr;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;


use hvx_core::Architecture;

pub use self::{
    direct::DirectAddressSpace,
    ept::{EptEntry, EptFormat, EptMemoryType, EptPageTable, InvEpt, ept_pointer_from_pml4},
    guest::{DirectGuest, Guest, GuestKind, GuestVariant, NormalGuest},
    hardware::{FeatureControl, VmxHardware, cr_is_invalid},
    msr_bitmap::MsrBitmaps,
    vmx_info::{EptInfo, VmxInfo},
    vmx_page::VmxPage,
    vmx_state::{VmxReference, VmxState},
};

/// AMD64 architecture.
#[derive(Debug)]
pub struct Amd64;

impl Architecture for Amd64 {
    const NAME: &'static str = "amd64";
    const GUEST_PHYSICAL_SIZE: u64 = 1 << 48;
    const IO_PORT_SPACE: Option<u64> = Some(0x1_0000);
}
