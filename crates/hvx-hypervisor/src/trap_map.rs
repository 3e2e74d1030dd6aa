use std::{collections::BTreeMap, marker::PhantomData, sync::Arc};

use hvx_core::{Architecture, Hex, HvError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Kind of guest access intercepted by a trap.
///
/// The discriminants are the values used across the syscall boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum TrapKind {
    /// Guest physical memory writes are reported asynchronously through a
    /// port; the guest is not stopped.
    Bell = 0,

    /// Guest physical memory accesses stop the vCPU and are reported to the
    /// VMM synchronously.
    Mem = 1,

    /// Port IO accesses stop the vCPU and are reported to the VMM
    /// synchronously.
    Io = 2,
}

impl TryFrom<u32> for TrapKind {
    type Error = HvError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Bell),
            1 => Ok(Self::Mem),
            2 => Ok(Self::Io),
            _ => Err(HvError::InvalidArgs),
        }
    }
}

impl From<TrapKind> for u32 {
    fn from(kind: TrapKind) -> Self {
        kind as u32
    }
}

/// A notification delivered through a [`Port`] when a trap fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestPacket {
    /// The key the trap was registered with.
    pub key: u64,

    /// Kind of the trap that fired.
    pub kind: TrapKind,

    /// Address of the access that fired the trap.
    pub addr: u64,
}

/// A sink for trap notifications.
pub trait Port: Send + Sync {
    /// Queues `packet` for the consumer of the port.
    fn queue(&self, packet: GuestPacket) -> Result<(), HvError>;
}

/// A registered trap.
pub struct Trap {
    kind: TrapKind,
    addr: u64,
    len: u64,
    port: Option<Arc<dyn Port>>,
    key: u64,
}

impl Trap {
    /// Returns the kind of the trap.
    pub fn kind(&self) -> TrapKind {
        self.kind
    }

    /// Returns the first address covered by the trap.
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Returns the number of bytes (or ports) covered by the trap.
    pub fn size(&self) -> u64 {
        self.len
    }

    /// Returns the key reported with notifications.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Checks whether `addr` falls into the trap.
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.addr && addr - self.addr < self.len
    }

    /// Checks whether notifications are delivered through a port.
    pub fn has_port(&self) -> bool {
        self.port.is_some()
    }

    /// Notifies the port that the guest accessed `addr`.
    pub fn queue(&self, addr: u64) -> Result<(), HvError> {
        let port = self.port.as_ref().ok_or(HvError::BadState)?;

        port.queue(GuestPacket {
            key: self.key,
            kind: self.kind,
            addr,
        })
    }
}

impl std::fmt::Debug for Trap {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Trap")
            .field("kind", &self.kind)
            .field("addr", &Hex(self.addr))
            .field("len", &Hex(self.len))
            .field("has_port", &self.has_port())
            .field("key", &self.key)
            .finish()
    }
}

type TrapTree = BTreeMap<u64, Arc<Trap>>;

/// Registered traps of a guest.
///
/// Memory and bell traps share the guest physical address space; IO traps
/// live in the separate port space. Within each space traps never overlap.
///
/// Lookups happen on every trapped guest access and may run concurrently with
/// each other; insertions take the write lock.
pub struct TrapMap<A>
where
    A: Architecture,
{
    mem: RwLock<TrapTree>,
    io: RwLock<TrapTree>,
    _marker: PhantomData<A>,
}

impl<A> TrapMap<A>
where
    A: Architecture,
{
    /// Creates an empty trap map.
    #[expect(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            mem: RwLock::new(TrapTree::new()),
            io: RwLock::new(TrapTree::new()),
            _marker: PhantomData,
        }
    }

    fn tree(&self, kind: TrapKind) -> &RwLock<TrapTree> {
        match kind {
            TrapKind::Bell | TrapKind::Mem => &self.mem,
            TrapKind::Io => &self.io,
        }
    }

    /// Validates a range and returns its exclusive end.
    fn check_range(kind: TrapKind, addr: u64, len: u64) -> Result<u64, HvError> {
        if len == 0 {
            return Err(HvError::OutOfRange);
        }

        let end = addr.checked_add(len).ok_or(HvError::OutOfRange)?;

        if kind == TrapKind::Io {
            match A::IO_PORT_SPACE {
                Some(limit) if end <= limit => {}
                _ => return Err(HvError::OutOfRange),
            }
        }

        Ok(end)
    }

    /// Returns the trap intersecting `[addr, end)`, if any.
    fn overlapping(traps: &TrapTree, addr: u64, end: u64) -> Option<&Arc<Trap>> {
        // Traps are disjoint, so only the last one starting before `end` can
        // reach into the range.
        let (_, trap) = traps.range(..end).next_back()?;
        (trap.addr + trap.len > addr).then_some(trap)
    }

    /// Inserts a trap covering `[addr, addr + len)`.
    pub fn insert_trap(
        &self,
        kind: TrapKind,
        addr: u64,
        len: u64,
        port: Option<Arc<dyn Port>>,
        key: u64,
    ) -> Result<(), HvError> {
        self.insert_trap_with(kind, addr, len, port, key, || Ok(()))
    }

    /// Inserts a trap, running `prepare` once the range has been validated.
    ///
    /// `prepare` runs under the write lock, so no other trap can claim the
    /// range between the validation and the insertion. If it fails, nothing
    /// is inserted and its error is returned.
    pub fn insert_trap_with(
        &self,
        kind: TrapKind,
        addr: u64,
        len: u64,
        port: Option<Arc<dyn Port>>,
        key: u64,
        prepare: impl FnOnce() -> Result<(), HvError>,
    ) -> Result<(), HvError> {
        let end = Self::check_range(kind, addr, len)?;
        let mut traps = self.tree(kind).write();

        if let Some(existing) = Self::overlapping(&traps, addr, end) {
            tracing::warn!(
                ?kind,
                addr = %Hex(addr),
                len = %Hex(len),
                existing = ?existing,
                "trap overlaps an existing trap"
            );

            return Err(HvError::AlreadyExists);
        }

        prepare()?;

        traps.insert(
            addr,
            Arc::new(Trap {
                kind,
                addr,
                len,
                port,
                key,
            }),
        );

        tracing::debug!(?kind, addr = %Hex(addr), len = %Hex(len), key, "inserted trap");
        Ok(())
    }

    /// Returns the trap of the given kind's space that contains `addr`.
    ///
    /// Memory and bell traps share a space, so looking up either kind finds
    /// both; callers check [`Trap::kind`].
    pub fn find_trap(&self, kind: TrapKind, addr: u64) -> Result<Arc<Trap>, HvError> {
        let traps = self.tree(kind).read();

        match traps.range(..=addr).next_back() {
            Some((_, trap)) if trap.contains(addr) => {
                tracing::trace!(?kind, addr = %Hex(addr), key = trap.key, "found trap");
                Ok(Arc::clone(trap))
            }
            _ => Err(HvError::NotFound),
        }
    }
}
