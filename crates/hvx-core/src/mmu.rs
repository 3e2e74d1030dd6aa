use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Access permissions of a guest physical mapping.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MmuFlags: u8 {
        /// The guest may read the page.
        const READ = 0b0000_0001;

        /// The guest may write the page.
        const WRITE = 0b0000_0010;

        /// The guest may execute from the page.
        const EXECUTE = 0b0000_0100;

        /// Read and write.
        const RW = Self::READ.bits() | Self::WRITE.bits();

        /// Read and execute.
        const RX = Self::READ.bits() | Self::EXECUTE.bits();

        /// Read, write and execute.
        const RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
    }
}

impl std::fmt::Display for MmuFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let flag = |flag, c| if self.contains(flag) { c } else { '-' };

        write!(
            f,
            "{}{}{}",
            flag(MmuFlags::READ, 'r'),
            flag(MmuFlags::WRITE, 'w'),
            flag(MmuFlags::EXECUTE, 'x')
        )
    }
}

/// Memory type used when the guest accesses a mapping.
///
/// The architecture's second-level page table format decides how each policy
/// is encoded in the leaf entries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CachePolicy {
    /// Normal write-back cached memory.
    #[default]
    Cached,

    /// Uncached normal memory.
    Uncached,

    /// Uncached device memory with strict ordering.
    UncachedDevice,

    /// Write-combining memory.
    WriteCombining,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(MmuFlags::RWX.to_string(), "rwx");
        assert_eq!(MmuFlags::RX.to_string(), "r-x");
        assert_eq!(MmuFlags::WRITE.to_string(), "-w-");
        assert_eq!(MmuFlags::empty().to_string(), "---");
    }
}
