use crate::macros::impl_addr;

/// Size of a page in bytes.
pub const PAGE_SIZE: u64 = 0x1000;

/// Number of bits to shift an address to get its page frame number.
pub const PAGE_SHIFT: u64 = 12;

impl_addr!(Gpa, "guest physical address");
impl_addr!(Hpa, "host physical address");
impl_addr!(Gfn, "guest frame number");

impl Gpa {
    /// Returns the frame containing this address.
    pub const fn gfn(self) -> Gfn {
        Gfn(self.0 >> PAGE_SHIFT)
    }

    /// Returns the offset of this address within its page.
    pub const fn page_offset(self) -> u64 {
        self.0 & (PAGE_SIZE - 1)
    }

    /// Returns the address rounded down to its page.
    pub const fn page_align_down(self) -> Self {
        Self(page_align_down(self.0))
    }
}

impl Gfn {
    /// Returns the first address of the frame.
    pub const fn gpa(self) -> Gpa {
        Gpa(self.0 << PAGE_SHIFT)
    }
}

/// Checks whether `value` is a multiple of [`PAGE_SIZE`].
pub const fn is_page_aligned(value: u64) -> bool {
    value & (PAGE_SIZE - 1) == 0
}

/// Rounds `value` down to a multiple of [`PAGE_SIZE`].
pub const fn page_align_down(value: u64) -> u64 {
    value & !(PAGE_SIZE - 1)
}

/// Rounds `value` up to a multiple of [`PAGE_SIZE`], or `None` on overflow.
pub const fn page_align_up(value: u64) -> Option<u64> {
    match value.checked_add(PAGE_SIZE - 1) {
        Some(value) => Some(page_align_down(value)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        assert!(is_page_aligned(0));
        assert!(is_page_aligned(0x3000));
        assert!(!is_page_aligned(0x3001));

        assert_eq!(page_align_down(0x3fff), 0x3000);
        assert_eq!(page_align_up(0x3001), Some(0x4000));
        assert_eq!(page_align_up(0x4000), Some(0x4000));
        assert_eq!(page_align_up(u64::MAX), None);
    }

    #[test]
    fn gpa_gfn_conversion() {
        let gpa = Gpa(0x1234_5678);
        assert_eq!(gpa.gfn(), Gfn(0x12345));
        assert_eq!(gpa.page_offset(), 0x678);
        assert_eq!(gpa.gfn().gpa(), Gpa(0x1234_5000));
        assert_eq!(format!("{gpa}"), "0x0000000012345678");
        assert_eq!(Gpa(0x2000) - Gpa(0x1000), 0x1000);
    }
}
