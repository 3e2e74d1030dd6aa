/// A hexadecimal representation of an integer.
///
/// Used to log raw addresses and lengths as structured fields.
///
/// # Examples
///
/// ```
/// # use hvx_core::Hex;
/// assert_eq!(format!("{}", Hex(42u16)), "0x002a");
/// ```
pub struct Hex<T>(pub T);

fn fmt_padded<T>(f: &mut std::fmt::Formatter, value: T) -> std::fmt::Result
where
    T: Copy + std::fmt::LowerHex,
{
    let width = size_of::<T>() * 2;
    write!(f, "0x{value:0width$x}")
}

macro_rules! impl_hex {
    ($($type:ty),*) => {
        $(
            impl std::fmt::Debug for Hex<$type> {
                fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                    fmt_padded(f, self.0)
                }
            }

            impl std::fmt::Display for Hex<$type> {
                fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                    fmt_padded(f, self.0)
                }
            }
        )*
    };
}

impl_hex!(u8, u16, u32, u64, usize);
