use serde::{Deserialize, Serialize};

use crate::{VmxHardware, ept::EptMemoryType, msr};

/// Basic VMX capabilities, decoded from `IA32_VMX_BASIC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmxInfo {
    /// VMCS revision identifier, written to the start of VMXON regions.
    pub revision_id: u32,

    /// Size of the VMXON and VMCS regions in bytes.
    pub region_size: u16,

    /// Whether the regions may be accessed with the write-back memory type.
    pub write_back: bool,

    /// Whether VM exits caused by INS/OUTS report instruction information.
    pub io_exit_info: bool,

    /// Whether the "true" VMX control MSRs are supported.
    pub vmx_controls: bool,
}

impl VmxInfo {
    /// Decodes the value of `IA32_VMX_BASIC`.
    pub fn from_basic(basic: u64) -> Self {
        Self {
            revision_id: (basic & 0x7fff_ffff) as u32,
            region_size: ((basic >> 32) & 0x1fff) as u16,
            write_back: (basic >> 50) & 0xf == EptMemoryType::WriteBack as u64,
            io_exit_info: (basic >> 54) & 1 != 0,
            vmx_controls: (basic >> 55) & 1 != 0,
        }
    }

    /// Reads the capabilities of `cpu`.
    pub fn read(hardware: &dyn VmxHardware, cpu: usize) -> Self {
        Self::from_basic(hardware.read_msr(cpu, msr::IA32_VMX_BASIC))
    }
}

/// EPT capabilities, decoded from `IA32_VMX_EPT_VPID_CAP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EptInfo {
    /// Whether a page-walk length of 4 is supported.
    pub page_walk_4: bool,

    /// Whether EPT paging structures may be write-back.
    pub write_back: bool,

    /// Whether 2MiB pages are supported.
    pub large_pages: bool,

    /// Whether INVEPT is supported.
    pub invept: bool,

    /// Whether INVVPID is supported.
    pub invvpid: bool,
}

impl EptInfo {
    /// Decodes the value of `IA32_VMX_EPT_VPID_CAP`.
    pub fn from_cap(cap: u64) -> Self {
        Self {
            page_walk_4: (cap >> 6) & 1 != 0,
            write_back: (cap >> 14) & 1 != 0,
            large_pages: (cap >> 17) & 1 != 0,
            invept: (cap >> 20) & 1 != 0,
            invvpid: (cap >> 32) & 1 != 0,
        }
    }

    /// Reads the capabilities of `cpu`.
    pub fn read(hardware: &dyn VmxHardware, cpu: usize) -> Self {
        Self::from_cap(hardware.read_msr(cpu, msr::IA32_VMX_EPT_VPID_CAP))
    }

    /// Checks whether EPT is usable: 4-level walks, write-back tables and
    /// INVEPT.
    pub fn is_usable(&self) -> bool {
        self.page_walk_4 && self.write_back && self.invept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_vmx_basic() {
        // Revision 4, 4KiB regions, write-back, INS/OUTS info, true controls.
        let basic = 0x00da_1000_0000_0004;
        let info = VmxInfo::from_basic(basic);

        assert_eq!(info.revision_id, 4);
        assert_eq!(info.region_size, 0x1000);
        assert!(info.write_back);
        assert!(info.io_exit_info);
        assert!(info.vmx_controls);

        let info = VmxInfo::from_basic(0x0000_0400_8000_0012);
        assert_eq!(info.revision_id, 0x12);
        assert_eq!(info.region_size, 0x400);
        assert!(!info.write_back);
        assert!(!info.io_exit_info);
    }

    #[test]
    fn decode_ept_cap() {
        let info = EptInfo::from_cap(0x0000_0f01_0612_4141);

        assert!(info.page_walk_4);
        assert!(info.write_back);
        assert!(info.large_pages);
        assert!(info.invept);
        assert!(info.invvpid);
        assert!(info.is_usable());

        let info = EptInfo::from_cap(1 << 6 | 1 << 14);
        assert!(!info.invept);
        assert!(!info.is_usable());
    }
}
