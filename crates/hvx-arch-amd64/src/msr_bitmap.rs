use std::sync::Arc;

use hvx_core::{HvError, Hpa};
use hvx_vm::Pmm;

use crate::{VmxInfo, VmxPage};

const LOW_MSRS: std::ops::RangeInclusive<u32> = 0x0000_0000..=0x0000_1fff;
const HIGH_MSRS: std::ops::RangeInclusive<u32> = 0xc000_0000..=0xc000_1fff;

/// Offset of the write bitmaps from the read bitmaps.
const WRITE_OFFSET: usize = 2 << 10;

/// Offset of the high MSR bitmap from the low one.
const HIGH_OFFSET: usize = 1 << 10;

/// VMX MSR bitmaps, controlling which `RDMSR`/`WRMSR` instructions exit.
///
/// The page holds four 1KiB bitmaps: reads of low MSRs, reads of high MSRs,
/// writes of low MSRs and writes of high MSRs. A set bit makes the access
/// exit; accesses to MSRs outside both ranges always exit.
#[derive(Debug)]
pub struct MsrBitmaps {
    page: VmxPage,
}

impl MsrBitmaps {
    /// Allocates bitmaps on which every MSR access exits.
    pub fn new(pmm: &Arc<Pmm>, info: &VmxInfo) -> Result<Self, HvError> {
        Ok(Self {
            page: VmxPage::alloc(pmm, info, u8::MAX)?,
        })
    }

    /// Returns the physical address loaded into the VMCS.
    pub fn paddr(&self) -> Hpa {
        self.page.paddr()
    }

    /// Lets the guest read and write `msr` without exiting.
    pub fn ignore_msr(&mut self, msr: u32) -> Result<(), HvError> {
        let (byte, bit) = Self::locate(msr)?;
        let bytes = self.page.bytes_mut();

        bytes[byte] &= !(1 << bit);
        bytes[byte + WRITE_OFFSET] &= !(1 << bit);
        Ok(())
    }

    /// Checks whether reading `msr` exits.
    pub fn exits_on_read(&self, msr: u32) -> bool {
        match Self::locate(msr) {
            Ok((byte, bit)) => self.page.bytes()[byte] & (1 << bit) != 0,
            Err(_) => true,
        }
    }

    /// Checks whether writing `msr` exits.
    pub fn exits_on_write(&self, msr: u32) -> bool {
        match Self::locate(msr) {
            Ok((byte, bit)) => self.page.bytes()[byte + WRITE_OFFSET] & (1 << bit) != 0,
            Err(_) => true,
        }
    }

    /// Returns the byte of the read bitmap holding `msr`, and the bit within
    /// it.
    fn locate(msr: u32) -> Result<(usize, u32), HvError> {
        let base = if LOW_MSRS.contains(&msr) {
            0
        }
        else if HIGH_MSRS.contains(&msr) {
            HIGH_OFFSET
        }
        else {
            return Err(HvError::InvalidArgs);
        };

        let index = (msr & 0x1fff) as usize;
        Ok((base + index / 8, (index % 8) as u32))
    }
}
