//! A fixed set of pre-allocated buffers, recycled between two threads.
//!
//! The pool is a single [`rtrb`] ring holding the buffers that are currently *free*.
//! The [`Checkout`] half (typically held by a real-time capture thread) takes
//! buffers out, and the [`Returner`] half (typically held by the thread that
//! consumes them, e.g. a network sender) puts them back.
//!
//! Between [`Checkout::take`] and [`Returner::give_back`], a buffer is owned by
//! exactly one thread, ownership moves with the value. No allocation happens after
//! construction.

/// The consuming half of a pool: hands out free buffers.
#[derive(Debug)]
pub struct Checkout<T> {
    free: rtrb::Consumer<T>,
}

/// The producing half of a pool: takes buffers back once they've been used.
#[derive(Debug)]
pub struct Returner<T> {
    free: rtrb::Producer<T>,
}

/// Creates a pool seeded with `items`.
///
/// The pool's capacity is exactly the number of items given, so returning every
/// buffer that was taken never overflows it.
pub fn pool<T>(items: impl IntoIterator<Item = T>) -> (Checkout<T>, Returner<T>) {
    let items: Vec<T> = items.into_iter().collect();

    // rtrb rings can't be empty, an empty pool is just one that never hands anything out
    let (mut tx, rx) = rtrb::RingBuffer::new(items.len().max(1));

    for item in items {
        // capacity is items.len()
        if tx.push(item).is_err() {
            unreachable!("pool ring sized to its seed items");
        }
    }

    (Checkout { free: rx }, Returner { free: tx })
}

impl<T> Checkout<T> {
    /// Takes a free buffer out of the pool, never blocks.
    ///
    /// Returns `None` if every buffer is currently checked out.
    #[inline(always)]
    pub fn take(&mut self) -> Option<T> {
        self.free.pop().ok()
    }

    /// Returns the number of buffers currently available.
    #[inline(always)]
    pub fn available(&self) -> usize {
        self.free.slots()
    }
}

impl<T> Returner<T> {
    /// Puts a buffer back into the pool.
    ///
    /// Buffers that weren't taken from this pool may not fit, in which case the
    /// buffer is handed back to the caller.
    #[inline(always)]
    pub fn give_back(&mut self, item: T) -> Result<(), T> {
        self.free.push(item).map_err(|rtrb::PushError::Full(item)| item)
    }
}
