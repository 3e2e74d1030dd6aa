use hvx_core::{HvError, Hpa};

/// EL2 services needed to run guests.
pub trait El2Hardware: Send + Sync + 'static {
    /// Returns the exception level the kernel was booted at.
    fn boot_el(&self) -> u8;

    /// Returns the physical address of the GIC virtual CPU interface.
    ///
    /// GICv2 systems return its address; GICv3 systems, whose virtual CPU
    /// interface is accessed through system registers, return `None`.
    fn gicv_paddr(&self) -> Result<Option<Hpa>, HvError>;

    /// Invalidates the stage-2 TLB entries tagged with `vmid` on every CPU.
    fn invalidate_vmid(&self, vmid: u16);
}
