//! AArch64 support.
//!
//! Guests run at EL1 under a hypervisor at EL2, with stage-2 translation
//! tables describing guest physical memory. Each guest is tagged with a VMID
//! so its TLB entries can be invalidated without touching other guests.

mod el2_state;
mod guest;
mod hardware;
mod stage2;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

#[cfg(test)]
mod guest_tests;

use hvx_core::Architecture;

pub use self::{
    el2_state::{El2State, MAX_VMID, Vmid},
    guest::{GICV_ADDRESS, GICV_SIZE, Guest},
    hardware::El2Hardware,
    stage2::{MemAttr, Stage2Descriptor, Stage2Format, Stage2PageTable},
};

/// AArch64 architecture.
#[derive(Debug)]
pub struct Aarch64;

impl Architecture for Aarch64 {
    const NAME: &'static str = "aarch64";
    const GUEST_PHYSICAL_SIZE: u64 = 1 << 36;
    const IO_PORT_SPACE: Option<u64> = None;
}
