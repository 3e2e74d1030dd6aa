//! Guest physical address space, trap and ID management for
//! hardware-assisted hypervisors.
//!
//! This crate re-exports the `hvx-*` crates under one roof:
//!
//! - the core vocabulary ([`Gpa`], [`Hpa`], [`HvError`], ...) at the top
//!   level,
//! - the memory management model in [`vm`],
//! - the architecture independent guest building blocks in [`hypervisor`],
//! - the VMX and EL2 guests in [`arch`], behind the `arch-amd64` and
//!   `arch-aarch64` features.

pub use hvx_core::*;

/// Address spaces, memory objects and page tables.
pub mod vm {
    pub use hvx_vm::*;
}

/// Guest physical address spaces, traps, identifier allocation and
/// interrupt tracking.
pub mod hypervisor {
    pub use hvx_hypervisor::*;
}

/// Architecture specific guests.
pub mod arch {
    /// AArch64 guests running under EL2.
    #[cfg(feature = "arch-aarch64")]
    pub mod aarch64 {
        pub use hvx_arch_aarch64::*;
    }

    /// AMD64 guests running under VMX.
    #[cfg(feature = "arch-amd64")]
    pub mod amd64 {
        pub use hvx_arch_amd64::*;
    }
}
