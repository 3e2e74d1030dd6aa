/// An error that can occur while managing guests and their address spaces.
///
/// The variants follow the status codes returned across the hypervisor's
/// syscall boundary, so callers can map them one-to-one.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvError {
    /// The hardware does not support the requested operation.
    #[error("Operation not supported.")]
    NotSupported,

    /// Allocation of memory or a hardware structure failed.
    #[error("Out of memory.")]
    NoMemory,

    /// An argument was malformed or misaligned.
    #[error("Invalid arguments.")]
    InvalidArgs,

    /// An address range is empty, overflows or lies outside the valid space.
    #[error("Out of range.")]
    OutOfRange,

    /// The requested range intersects an existing one.
    #[error("Already exists.")]
    AlreadyExists,

    /// An identifier pool is exhausted.
    #[error("No resources available.")]
    NoResources,

    /// Nothing is registered at the given address.
    #[error("Not found.")]
    NotFound,

    /// The object is not in a state that allows the operation.
    #[error("Bad state.")]
    BadState,

    /// The requested permissions exceed what the region allows.
    #[error("Access denied.")]
    AccessDenied,

    /// Other error.
    #[error("{0}")]
    Other(&'static str),
}
