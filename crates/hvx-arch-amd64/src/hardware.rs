use bitflags::bitflags;
use hvx_core::{HvError, Hpa};

use crate::InvEpt;

bitflags! {
    /// Bits of `IA32_FEATURE_CONTROL` relevant to VMX.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeatureControl: u64 {
        /// The MSR is locked until the next reset.
        const LOCK = 1 << 0;

        /// VMXON is allowed inside SMX operation.
        const VMXON_INSIDE_SMX = 1 << 1;

        /// VMXON is allowed outside SMX operation.
        const VMXON = 1 << 2;
    }
}

/// Privileged operations needed to run VMX guests.
///
/// Every operation names the CPU it runs on; implementations pin to that CPU
/// (or send it an IPI) as needed.
pub trait VmxHardware: Send + Sync + 'static {
    /// Checks whether the processor supports VMX.
    fn has_vmx(&self) -> bool;

    /// Returns the number of CPUs.
    fn cpu_count(&self) -> usize;

    /// Reads an MSR on `cpu`.
    fn read_msr(&self, cpu: usize, msr: u32) -> u64;

    /// Reads CR0 on `cpu`.
    fn read_cr0(&self, cpu: usize) -> u64;

    /// Reads CR4 on `cpu`.
    fn read_cr4(&self, cpu: usize) -> u64;

    /// Sets CR4.VMXE and enters VMX operation on `cpu` using the VMXON region
    /// at `region`.
    fn vmxon(&self, cpu: usize, region: Hpa) -> Result<(), HvError>;

    /// Leaves VMX operation on `cpu` and clears CR4.VMXE.
    fn vmxoff(&self, cpu: usize);

    /// Executes INVEPT on `cpu`.
    fn invept(&self, cpu: usize, kind: InvEpt, eptp: u64) -> Result<(), HvError>;
}

/// Checks whether a control register value is unacceptable in VMX operation.
///
/// `fixed0` holds the bits that must be set and `fixed1` the bits that may
/// be set, as read from the `IA32_VMX_CR*_FIXED*` MSRs.
pub fn cr_is_invalid(cr: u64, fixed0: u64, fixed1: u64) -> bool {
    !cr & fixed0 != 0 || cr & !fixed1 != 0
}
