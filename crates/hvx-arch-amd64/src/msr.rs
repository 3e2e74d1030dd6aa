//! Model specific register numbers.

/// Feature control. Must be locked with VMXON enabled before VMXON.
pub const IA32_FEATURE_CONTROL: u32 = 0x003a;

/// `SYSENTER` code segment selector.
pub const IA32_SYSENTER_CS: u32 = 0x0174;

/// `SYSENTER` stack pointer.
pub const IA32_SYSENTER_ESP: u32 = 0x0175;

/// `SYSENTER` instruction pointer.
pub const IA32_SYSENTER_EIP: u32 = 0x0176;

/// Page attribute table.
pub const IA32_PAT: u32 = 0x0277;

/// Basic VMX information.
pub const IA32_VMX_BASIC: u32 = 0x0480;

/// Miscellaneous VMX information.
pub const IA32_VMX_MISC: u32 = 0x0485;

/// CR0 bits that must be set in VMX operation.
pub const IA32_VMX_CR0_FIXED0: u32 = 0x0486;

/// CR0 bits that may be set in VMX operation.
pub const IA32_VMX_CR0_FIXED1: u32 = 0x0487;

/// CR4 bits that must be set in VMX operation.
pub const IA32_VMX_CR4_FIXED0: u32 = 0x0488;

/// CR4 bits that may be set in VMX operation.
pub const IA32_VMX_CR4_FIXED1: u32 = 0x0489;

/// EPT and VPID capabilities.
pub const IA32_VMX_EPT_VPID_CAP: u32 = 0x048c;

/// Extended feature enable register.
pub const IA32_EFER: u32 = 0xc000_0080;

/// `SYSCALL` target segments.
pub const IA32_STAR: u32 = 0xc000_0081;

/// `SYSCALL` target in 64-bit mode.
pub const IA32_LSTAR: u32 = 0xc000_0082;

/// `SYSCALL` RFLAGS mask.
pub const IA32_FMASK: u32 = 0xc000_0084;

/// FS segment base.
pub const IA32_FS_BASE: u32 = 0xc000_0100;

/// GS segment base.
pub const IA32_GS_BASE: u32 = 0xc000_0101;

/// GS base swapped in by `SWAPGS`.
pub const IA32_KERNEL_GS_BASE: u32 = 0xc000_0102;

/// Auxiliary TSC value returned by `RDTSCP`.
pub const IA32_TSC_AUX: u32 = 0xc000_0103;
