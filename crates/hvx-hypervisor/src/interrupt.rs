use parking_lot::Mutex;

use crate::bitmap::Bitmap;

/// A set of pending interrupt vectors in `[0, N)`.
///
/// Vectors outside the range are never reported as pending. Setting one is a
/// caller bug, caught by a debug assertion and ignored otherwise.
#[derive(Debug, Clone)]
pub struct InterruptBitmap<const N: usize> {
    bitmap: Bitmap,
}

impl<const N: usize> InterruptBitmap<N> {
    /// Creates an empty bitmap.
    #[expect(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            bitmap: Bitmap::new(N),
        }
    }

    /// Marks `vector` as pending.
    pub fn set(&mut self, vector: u32) {
        self.bitmap.set(vector as usize);
    }

    /// Clears every vector in `[min, max)`.
    pub fn clear(&mut self, min: u32, max: u32) {
        self.bitmap.clear_range(min as usize, max as usize);
    }

    /// Checks whether `vector` is pending.
    pub fn get(&self, vector: u32) -> bool {
        self.bitmap.get(vector as usize)
    }

    /// Returns the lowest pending vector.
    pub fn scan(&self) -> Option<u32> {
        self.bitmap.first_set(0, N).map(|vector| vector as u32)
    }
}

/// Pending interrupts of a vCPU, shared between the threads that raise them
/// and the vCPU that injects them.
#[derive(Debug)]
pub struct InterruptTracker<const N: usize> {
    pending: Mutex<InterruptBitmap<N>>,
}

impl<const N: usize> InterruptTracker<N> {
    /// Creates a tracker with nothing pending.
    #[expect(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(InterruptBitmap::new()),
        }
    }

    /// Records `vector` as pending.
    pub fn interrupt(&self, vector: u32) {
        tracing::trace!(vector, "interrupt raised");
        self.pending.lock().set(vector);
    }

    /// Checks whether any vector is pending.
    pub fn is_pending(&self) -> bool {
        self.pending.lock().scan().is_some()
    }

    /// Removes and returns the lowest pending vector.
    pub fn pop(&self) -> Option<u32> {
        let mut pending = self.pending.lock();

        let vector = pending.scan()?;
        pending.clear(vector, vector + 1);
        Some(vector)
    }

    /// Drops every pending vector in `[min, max)`.
    pub fn clear(&self, min: u32, max: u32) {
        self.pending.lock().clear(min, max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_bitmap() {
        let mut bitmap = InterruptBitmap::<8>::new();

        assert!(!bitmap.get(0));
        assert!(!bitmap.get(1));
        assert_eq!(bitmap.scan(), None);

        // Index 0.
        bitmap.set(0);
        assert!(bitmap.get(0));
        assert!(!bitmap.get(1));
        assert_eq!(bitmap.scan(), Some(0));

        // Index 1.
        bitmap.set(1);
        assert!(bitmap.get(0));
        assert!(bitmap.get(1));
        assert_eq!(bitmap.scan(), Some(0));

        // Clear index 0.
        bitmap.clear(0, 1);
        assert!(!bitmap.get(0));
        assert!(bitmap.get(1));
        assert_eq!(bitmap.scan(), Some(1));

        // Clear index 1.
        bitmap.clear(1, 2);
        assert!(!bitmap.get(0));
        assert!(!bitmap.get(1));
        assert_eq!(bitmap.scan(), None);

        // Clear a range.
        bitmap.set(2);
        bitmap.set(3);
        bitmap.set(7);
        bitmap.clear(1, 3);
        assert!(!bitmap.get(2));
        assert!(bitmap.get(3));
        assert_eq!(bitmap.scan(), Some(3));
        assert!(!bitmap.get(8));
    }

    #[test]
    fn wide_bitmap() {
        let mut bitmap = InterruptBitmap::<256>::new();

        bitmap.set(255);
        bitmap.set(130);
        assert_eq!(bitmap.scan(), Some(130));

        bitmap.clear(0, 200);
        assert_eq!(bitmap.scan(), Some(255));

        bitmap.clear(0, 256);
        assert_eq!(bitmap.scan(), None);
    }

    #[test]
    fn tracker_pops_in_order() {
        let tracker = InterruptTracker::<256>::new();
        assert!(!tracker.is_pending());

        tracker.interrupt(0x30);
        tracker.interrupt(0x20);
        tracker.interrupt(0x20);
        assert!(tracker.is_pending());

        assert_eq!(tracker.pop(), Some(0x20));
        assert_eq!(tracker.pop(), Some(0x30));
        assert_eq!(tracker.pop(), None);

        tracker.interrupt(0xef);
        tracker.clear(0xe0, 0xf0);
        assert!(!tracker.is_pending());
    }

    #[test]
    fn tracker_is_shared_between_threads() {
        let tracker = std::sync::Arc::new(InterruptTracker::<256>::new());

        let handles: Vec<_> = (0..4u32)
            .map(|thread| {
                let tracker = std::sync::Arc::clone(&tracker);
                std::thread::spawn(move || tracker.interrupt(0x40 + thread))
            })
            .collect();

        for handle in handles {
            handle.join().expect("interrupt thread panicked");
        }

        let popped: Vec<_> = std::iter::from_fn(|| tracker.pop()).collect();
        assert_eq!(popped, [0x40, 0x41, 0x42, 0x43]);
    }
}
