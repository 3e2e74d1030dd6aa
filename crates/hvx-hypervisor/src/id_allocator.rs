//! Generational identifier allocation.
//!
//! Hardware tags such as VPIDs and VMIDs come from small pools. Instead of
//! failing when a pool runs dry, [`IdAllocator::alloc`] starts a new
//! *generation*: every identifier becomes free again and the generation
//! counter advances. Holders of identifiers from an older generation detect
//! this by comparing generations and revalidate with
//! [`IdAllocator::migrate`] before they use the tag again (for example on the
//! next VM entry), flushing any state tagged with the old value when told to.
//!
//! Call sites that must never observe a recycled identifier use
//! [`IdAllocator::try_alloc`], which fails instead of advancing.

use std::marker::PhantomData;

use hvx_core::HvError;

use crate::bitmap::Bitmap;

/// Generation counter type.
pub type GenType = u32;

/// An integer type usable as an identifier.
pub trait IdValue: Copy + Eq + std::fmt::Debug + Send + 'static {
    /// Largest index representable by the type.
    const MAX_INDEX: usize;

    /// Converts a bitmap index into an identifier.
    fn from_index(index: usize) -> Self;

    /// Converts an identifier into a bitmap index.
    fn index(self) -> usize;
}

macro_rules! impl_id_value {
    ($($type:ty),*) => {
        $(
            impl IdValue for $type {
                const MAX_INDEX: usize = <$type>::MAX as usize;

                fn from_index(index: usize) -> Self {
                    index as $type
                }

                fn index(self) -> usize {
                    self as usize
                }
            }
        )*
    };
}

impl_id_value!(u8, u16, u32);

/// An identifier tagged with the generation it was allocated in.
///
/// Identifiers are move-only: freeing one consumes it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Id<T> {
    val: T,
    generation: GenType,
}

impl<T> Id<T>
where
    T: IdValue,
{
    /// Returns the identifier value.
    pub fn val(&self) -> T {
        self.val
    }

    /// Returns the generation the identifier belongs to.
    pub fn generation(&self) -> GenType {
        self.generation
    }
}

/// Age of an identifier relative to the allocator.
enum Staleness {
    /// Allocated in the current generation.
    Current,

    /// Allocated in the generation right before the current one.
    Previous,

    /// Older than that; its value may have been handed out any number of
    /// times since.
    Stale,
}

/// Allocates identifiers in `[MIN_ID, max_id)`, where `max_id` is at most
/// `MAX_ID` and set by [`reset`](Self::reset).
///
/// The allocator is not synchronized; owners wrap it in a lock.
#[derive(Debug)]
pub struct IdAllocator<T, const MAX_ID: usize, const MIN_ID: usize = 1>
where
    T: IdValue,
{
    bitmap: Bitmap,
    max_id: usize,
    generation: GenType,
    _marker: PhantomData<T>,
}

impl<T, const MAX_ID: usize, const MIN_ID: usize> IdAllocator<T, MAX_ID, MIN_ID>
where
    T: IdValue,
{
    /// Creates an allocator covering `[MIN_ID, MAX_ID)`.
    #[expect(clippy::new_without_default)]
    pub fn new() -> Self {
        const {
            assert!(MIN_ID < MAX_ID, "MIN_ID must be below MAX_ID");
            assert!(MAX_ID - 1 <= T::MAX_INDEX, "MAX_ID does not fit the identifier type");
        }

        Self {
            bitmap: Bitmap::new(MAX_ID),
            max_id: MAX_ID,
            generation: 0,
            _marker: PhantomData,
        }
    }

    /// Frees every identifier, restarts at generation zero and limits
    /// allocation to `[MIN_ID, max_id)`.
    ///
    /// Identifiers handed out before the reset must not be used afterwards.
    pub fn reset(&mut self, max_id: usize) -> Result<(), HvError> {
        if max_id <= MIN_ID || max_id > MAX_ID {
            return Err(HvError::OutOfRange);
        }

        self.bitmap.clear_all();
        self.max_id = max_id;
        self.generation = 0;
        Ok(())
    }

    /// Returns the current generation.
    pub fn generation(&self) -> GenType {
        self.generation
    }

    /// Allocates the lowest free identifier, starting a new generation if
    /// none is left.
    pub fn alloc(&mut self) -> Id<T> {
        if let Ok(id) = self.try_alloc() {
            return id;
        }

        self.generation = self.generation.wrapping_add(1);
        self.bitmap.clear_all();

        tracing::debug!(
            generation = self.generation,
            "identifiers exhausted, starting new generation"
        );

        self.claim(MIN_ID)
    }

    /// Allocates the lowest free identifier without starting a new
    /// generation.
    pub fn try_alloc(&mut self) -> Result<Id<T>, HvError> {
        match self.bitmap.first_unset(MIN_ID, self.max_id) {
            Some(index) => Ok(self.claim(index)),
            None => Err(HvError::NoResources),
        }
    }

    /// Returns `id` to the pool.
    ///
    /// Identifiers from an older generation were already released when that
    /// generation ended, so freeing them does nothing.
    pub fn free(&mut self, id: Id<T>) -> Result<(), HvError> {
        let index = id.val.index();
        if !self.in_range(index) {
            return Err(HvError::InvalidArgs);
        }

        if id.generation != self.generation {
            return Ok(());
        }

        if !self.bitmap.get(index) {
            tracing::warn!(id = ?id.val, "freeing an identifier that is not allocated");
            return Err(HvError::InvalidArgs);
        }

        self.bitmap.clear(index);
        Ok(())
    }

    /// Brings `id` into the current generation.
    ///
    /// An identifier from the current generation is left alone. One from the
    /// previous generation keeps its value if nobody has claimed it since.
    /// Otherwise a fresh identifier replaces it and `on_invalidate` is called
    /// with the new value, so state tagged with the old one can be flushed.
    pub fn migrate(&mut self, id: &mut Id<T>, on_invalidate: impl FnOnce(T)) {
        let index = id.val.index();

        match self.staleness(id) {
            Staleness::Current => return,
            Staleness::Previous if self.in_range(index) && !self.bitmap.get(index) => {
                self.bitmap.set(index);
                id.generation = self.generation;
                return;
            }
            Staleness::Previous | Staleness::Stale => {}
        }

        *id = self.alloc();
        on_invalidate(id.val);
    }

    fn staleness(&self, id: &Id<T>) -> Staleness {
        match self.generation.wrapping_sub(id.generation) {
            0 => Staleness::Current,
            1 => Staleness::Previous,
            _ => Staleness::Stale,
        }
    }

    fn in_range(&self, index: usize) -> bool {
        (MIN_ID..self.max_id).contains(&index)
    }

    fn claim(&mut self, index: usize) -> Id<T> {
        self.bitmap.set(index);

        Id {
            val: T::from_index(index),
            generation: self.generation,
        }
    }
}
