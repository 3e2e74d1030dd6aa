//! A software stand-in for VMX hardware.

use hvx_core::{HvError, Hpa};
use parking_lot::Mutex;

use crate::{FeatureControl, InvEpt, VmxHardware, msr};

/// A privileged operation recorded by [`MockHardware`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareCall {
    /// VMXON on a CPU with the given region.
    Vmxon(usize, Hpa),

    /// VMXOFF on a CPU.
    Vmxoff(usize),

    /// INVEPT on a CPU.
    Invept(usize, InvEpt, u64),
}

/// Configurable VMX hardware that records every privileged operation.
///
/// The defaults describe a VMX capable machine with EPT, so that enabling
/// VMX succeeds.
#[derive(Debug)]
pub struct MockHardware {
    /// Whether the CPU reports VMX support.
    pub has_vmx: bool,

    /// Number of CPUs.
    pub cpu_count: usize,

    /// Value of `IA32_VMX_BASIC`.
    pub vmx_basic: u64,

    /// Value of `IA32_VMX_EPT_VPID_CAP`.
    pub ept_vpid_cap: u64,

    /// Value of `IA32_FEATURE_CONTROL`.
    pub feature_control: FeatureControl,

    /// CR0 value of every CPU.
    pub cr0: u64,

    /// CR4 value of every CPU.
    pub cr4: u64,

    /// CPU on which VMXON fails, if any.
    pub fail_vmxon_on: Option<usize>,

    calls: Mutex<Vec<HardwareCall>>,
}

impl MockHardware {
    const CR0_FIXED0: u64 = 0x8000_0021;
    const CR0_FIXED1: u64 = 0xffff_ffff;
    const CR4_FIXED0: u64 = 0x2000;
    const CR4_FIXED1: u64 = 0x0037_27ff;

    /// Creates VMX capable hardware with `cpu_count` CPUs.
    pub fn new(cpu_count: usize) -> Self {
        Self {
            has_vmx: true,
            cpu_count,
            // Revision 1, 4KiB regions, write-back, INS/OUTS info, true
            // controls.
            vmx_basic: 0x00da_1000_0000_0001,
            // 4-level walk, write-back, 2MiB pages, INVEPT, INVVPID.
            ept_vpid_cap: 0x0000_0f01_0612_4141,
            feature_control: FeatureControl::LOCK | FeatureControl::VMXON,
            // PE, NE, PG.
            cr0: 0x8000_0021,
            // PAE.
            cr4: 0x20,
            fail_vmxon_on: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Returns the operations performed so far.
    pub fn calls(&self) -> Vec<HardwareCall> {
        self.calls.lock().clone()
    }

    /// Forgets the recorded operations.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: HardwareCall) {
        self.calls.lock().push(call);
    }
}

impl VmxHardware for MockHardware {
    fn has_vmx(&self) -> bool {
        self.has_vmx
    }

    fn cpu_count(&self) -> usize {
        self.cpu_count
    }

    fn read_msr(&self, _cpu: usize, msr: u32) -> u64 {
        match msr {
            msr::IA32_FEATURE_CONTROL => self.feature_control.bits(),
            msr::IA32_VMX_BASIC => self.vmx_basic,
            msr::IA32_VMX_EPT_VPID_CAP => self.ept_vpid_cap,
            msr::IA32_VMX_CR0_FIXED0 => Self::CR0_FIXED0,
            msr::IA32_VMX_CR0_FIXED1 => Self::CR0_FIXED1,
            msr::IA32_VMX_CR4_FIXED0 => Self::CR4_FIXED0,
            msr::IA32_VMX_CR4_FIXED1 => Self::CR4_FIXED1,
            _ => 0,
        }
    }

    fn read_cr0(&self, _cpu: usize) -> u64 {
        self.cr0
    }

    fn read_cr4(&self, _cpu: usize) -> u64 {
        self.cr4
    }

    fn vmxon(&self, cpu: usize, region: Hpa) -> Result<(), HvError> {
        if self.fail_vmxon_on == Some(cpu) {
            return Err(HvError::BadState);
        }

        self.record(HardwareCall::Vmxon(cpu, region));
        Ok(())
    }

    fn vmxoff(&self, cpu: usize) {
        self.record(HardwareCall::Vmxoff(cpu));
    }

    fn invept(&self, cpu: usize, kind: InvEpt, eptp: u64) -> Result<(), HvError> {
        self.record(HardwareCall::Invept(cpu, kind, eptp));
        Ok(())
    }
}
