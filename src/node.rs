//! Key-value node variants, one per operation mode.
//!
//! A node is the storage cell for one `(hash, key, value)` tuple. In
//! insert-take mode the `(hash, key)` pair lives in a single atomic
//! word so membership can be claimed with one compare-and-swap; in
//! insert-read mode the pair is written once before the slot is
//! published and read plain afterwards; in grow mode nodes are heap
//! allocated and chained through an atomic `next` pointer.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicPtr, Ordering};

use portable_atomic::AtomicU64;

use crate::key::TakeKey;

/// One atomic word holding a packed `(hash, key)` pair.
///
/// Layout: hash in the high 32 bits, packed key in the low 32 bits.
/// The all-zero word marks a vacant pair; a successful CAS from a live
/// pair to zero is the point of ownership handover in take mode.
pub(crate) struct PairCell(AtomicU64);

impl PairCell {
    pub(crate) const EMPTY: u64 = 0;

    /// Whether the pair CAS is guaranteed lock-free on this target.
    pub(crate) const ALWAYS_LOCK_FREE: bool = cfg!(target_has_atomic = "64");

    pub(crate) const fn new() -> Self {
        Self(AtomicU64::new(Self::EMPTY))
    }

    #[inline(always)]
    pub(crate) fn pack<K: TakeKey>(hash: u32, key: K) -> u64 {
        ((hash as u64) << 32) | key.pack() as u64
    }

    /// Runtime probe of the underlying atomic.
    #[inline]
    pub(crate) fn is_lock_free() -> bool {
        AtomicU64::is_lock_free()
    }

    #[inline]
    pub(crate) fn store(&self, word: u64, order: Ordering) {
        self.0.store(word, order);
    }

    #[inline]
    pub(crate) fn load(&self, order: Ordering) -> u64 {
        self.0.load(order)
    }

    /// CAS the expected live pair to vacant. Success transfers
    /// ownership of the node to the caller.
    #[inline]
    pub(crate) fn try_claim(&self, expected: u64) -> bool {
        self.0
            .compare_exchange(expected, Self::EMPTY, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }
}

/// Node for insert-take mode: atomic pair word plus a value cell that
/// is written by the adder before publication and moved out by the
/// taker that wins the pair CAS.
pub struct TakeNode<K, V> {
    pair: PairCell,
    value: UnsafeCell<MaybeUninit<V>>,
    _key: PhantomData<K>,
}

// SAFETY: the pair CAS protocol guarantees at most one owner for the
// value cell at any moment; crossing threads moves/shares the value.
unsafe impl<K: Send, V: Send> Send for TakeNode<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for TakeNode<K, V> {}

impl<K, V> Default for TakeNode<K, V> {
    fn default() -> Self {
        Self {
            pair: PairCell::new(),
            value: UnsafeCell::new(MaybeUninit::uninit()),
            _key: PhantomData,
        }
    }
}

impl<K: TakeKey, V> TakeNode<K, V> {
    #[inline]
    pub(crate) fn pair(&self) -> &PairCell {
        &self.pair
    }

    /// Fill a freshly claimed node. The pair word is stored last; the
    /// publishing slot CAS carries the release fence.
    ///
    /// # Safety
    ///
    /// The caller must own the node exclusively (claimed from the free
    /// list, not yet published) and the value cell must be vacant.
    #[inline]
    pub(crate) unsafe fn write(&self, hash: u32, key: K, value: V) {
        (*self.value.get()).write(value);
        self.pair.store(PairCell::pack(hash, key), Ordering::Relaxed);
    }

    /// Move the value out.
    ///
    /// # Safety
    ///
    /// The caller must own the node exclusively (won its pair CAS) and
    /// the value cell must be live.
    #[inline]
    pub(crate) unsafe fn take_value(&self) -> V {
        (*self.value.get()).assume_init_read()
    }

    /// # Safety
    ///
    /// The caller must own the node exclusively and the value cell must
    /// be live; it stays borrowed for the lifetime of the reference.
    #[inline]
    pub(crate) unsafe fn value_ref(&self) -> &V {
        (*self.value.get()).assume_init_ref()
    }

    /// Drop the live value in place and reset the pair word.
    ///
    /// # Safety
    ///
    /// Exclusive ownership, live value cell.
    #[inline]
    pub(crate) unsafe fn clear(&self) {
        (*self.value.get()).assume_init_drop();
        self.pair.store(PairCell::EMPTY, Ordering::Relaxed);
    }
}

impl<K, V> Drop for TakeNode<K, V> {
    fn drop(&mut self) {
        // A non-vacant pair means the value cell is still live (the
        // node sits in a bucket slot at map teardown).
        if self.pair.load(Ordering::Relaxed) != PairCell::EMPTY {
            // SAFETY: &mut self, nothing else references the cell.
            unsafe { (*self.value.get()).assume_init_drop() };
        }
    }
}

/// Node for insert-read mode: plain `(hash, key)` pair and value,
/// written exactly once by the adder before the slot is published and
/// immutable afterwards.
pub struct ReadNode<K, V> {
    khp: UnsafeCell<(u32, K)>,
    value: UnsafeCell<V>,
}

// SAFETY: fields are written only while the adder owns the node
// exclusively; after publication all access is shared and read-only.
unsafe impl<K: Send, V: Send> Send for ReadNode<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for ReadNode<K, V> {}

impl<K: Default, V: Default> Default for ReadNode<K, V> {
    fn default() -> Self {
        Self {
            khp: UnsafeCell::new((0, K::default())),
            value: UnsafeCell::new(V::default()),
        }
    }
}

impl<K, V> ReadNode<K, V> {
    /// # Safety
    ///
    /// Exclusive ownership (claimed, not yet published).
    #[inline]
    pub(crate) unsafe fn write(&self, hash: u32, key: K, value: V) {
        *self.khp.get() = (hash, key);
        *self.value.get() = value;
    }

    /// # Safety
    ///
    /// The node must have been observed through an acquire load of a
    /// published slot (or be exclusively owned).
    #[inline]
    pub(crate) unsafe fn khp(&self) -> &(u32, K) {
        &*self.khp.get()
    }

    /// # Safety
    ///
    /// Same contract as [`ReadNode::khp`].
    #[inline]
    pub(crate) unsafe fn value(&self) -> &V {
        &*self.value.get()
    }
}

/// Node for the growing insert-read variant: owned fields plus the
/// atomic link of the bucket's append-only list.
pub struct GrowNode<K, V> {
    pub(crate) hash: u32,
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) next: AtomicPtr<GrowNode<K, V>>,
}

impl<K, V> GrowNode<K, V> {
    pub(crate) fn new(hash: u32, key: K, value: V) -> Self {
        Self {
            hash,
            key,
            value,
            next: AtomicPtr::new(std::ptr::null_mut()),
        }
    }
}
