/// An architecture hosting hardware-assisted guests.
///
/// Implemented by the `hvx-arch-*` crates. The constants describe the shape of
/// the spaces a guest can address, which generic code such as the trap map
/// uses to validate ranges.
pub trait Architecture: Send + Sync + 'static {
    /// Human readable name of the architecture.
    const NAME: &'static str;

    /// Size in bytes of a guest physical address space.
    const GUEST_PHYSICAL_SIZE: u64;

    /// Number of addressable IO ports, or `None` if the architecture has no
    /// separate port IO space.
    ///
    /// # Architecture-specific
    ///
    /// - **AMD64**: `Some(0x1_0000)`
    /// - **AArch64**: `None`
    const IO_PORT_SPACE: Option<u64>;
}
