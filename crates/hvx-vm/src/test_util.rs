//! Helpers for testing code built on top of this crate.

use hvx_core::{CachePolicy, Hpa, MmuFlags};

use crate::PageTableFormat;

const PRESENT: u64 = 1 << 0;
const FLAGS_SHIFT: u64 = 1;
const POLICY_SHIFT: u64 = 4;
const ADDRESS_MASK: u64 = 0x000f_ffff_ffff_f000;

/// A simple 4-level page table encoding.
///
/// Bit 0 marks a valid entry, bits 1-3 hold the permissions and bits 4-5 the
/// cache policy.
pub struct TestFormat;

impl PageTableFormat for TestFormat {
    const LEVELS: u64 = 4;

    fn table_entry(table: Hpa) -> u64 {
        table.0 | PRESENT
    }

    fn leaf_entry(page: Hpa, flags: MmuFlags, cache_policy: CachePolicy) -> u64 {
        let policy = match cache_policy {
            CachePolicy::Cached => 0,
            CachePolicy::Uncached => 1,
            CachePolicy::UncachedDevice => 2,
            CachePolicy::WriteCombining => 3,
        };

        page.0 | PRESENT | (flags.bits() as u64) << FLAGS_SHIFT | policy << POLICY_SHIFT
    }

    fn is_present(entry: u64) -> bool {
        entry & PRESENT != 0
    }

    fn address(entry: u64) -> Hpa {
        Hpa(entry & ADDRESS_MASK)
    }

    fn flags(entry: u64) -> MmuFlags {
        MmuFlags::from_bits_truncate((entry >> FLAGS_SHIFT) as u8 & 0b111)
    }

    fn cache_policy(entry: u64) -> CachePolicy {
        match (entry >> POLICY_SHIFT) & 0b11 {
            0 => CachePolicy::Cached,
            1 => CachePolicy::Uncached,
            2 => CachePolicy::UncachedDevice,
            _ => CachePolicy::WriteCombining,
        }
    }
}
