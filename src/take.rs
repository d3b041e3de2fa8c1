//! Insert-take map: readers remove what they read.
//!
//! Every `add` claims a pre-allocated node from the free list, fills
//! it and publishes it into a bucket slot; every successful `take`
//! claims the node back by CAS-ing its `(hash, key)` pair to vacant
//! and returns the node to the free list once the value has been moved
//! out. At most one `take` observes any given `add`.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::bucket::{TakeBucket, DEFAULT_COLLISION_WIDTH, NIL};
use crate::error::AddError;
use crate::key::{generate_seed, TakeKey};
use crate::node::{PairCell, TakeNode};
use crate::recycle::FreeList;
use crate::storage::{
    bucket_count, ExternalStorage, HeapStorage, PoolStorage, StaticStorage, TableStorage,
};
use crate::utils::CacheAligned;

/// Bounded lock-free map in insert-take mode.
///
/// Keys must implement [`TakeKey`]: the `(hash, key)` pair has to fit
/// one lock-free atomic word, so keys wider than 32 bits are rejected
/// at compile time. Capacity and collision width are fixed at
/// construction.
///
/// ```
/// use petek::TakeMap;
///
/// let map: TakeMap<i32, i32> = TakeMap::with_capacity(100);
/// assert!(map.add(7, 42));
/// assert_eq!(map.take(&7), Some(42));
/// assert_eq!(map.take(&7), None);
/// ```
pub struct TakeMap<
    K,
    V,
    const C: usize = DEFAULT_COLLISION_WIDTH,
    S = HeapStorage<TakeBucket<C>, TakeNode<K, V>>,
> {
    storage: S,
    used: CacheAligned<AtomicUsize>,
    seed: u32,
    _marker: PhantomData<(K, V)>,
}

/// Insert-take map with inline storage; `TABLE` must equal
/// [`bucket_count`]`(CAP)`.
pub type StaticTakeMap<K, V, const CAP: usize, const TABLE: usize> = TakeMap<
    K,
    V,
    DEFAULT_COLLISION_WIDTH,
    StaticStorage<TakeBucket<DEFAULT_COLLISION_WIDTH>, TakeNode<K, V>, CAP, TABLE>,
>;

/// Insert-take map over caller-provided buffers; inoperable until
/// [`init`](TakeMap::init) succeeds.
pub type ExternalTakeMap<K, V> = TakeMap<
    K,
    V,
    DEFAULT_COLLISION_WIDTH,
    ExternalStorage<TakeBucket<DEFAULT_COLLISION_WIDTH>, TakeNode<K, V>>,
>;

impl<K, V, const C: usize> TakeMap<K, V, C, HeapStorage<TakeBucket<C>, TakeNode<K, V>>>
where
    K: TakeKey,
{
    /// Heap-backed map holding up to `max_elements` entries, seeded
    /// from process randomness.
    pub fn with_capacity(max_elements: usize) -> Self {
        Self::with_capacity_and_seed(max_elements, generate_seed())
    }

    /// Heap-backed map with an explicit hash seed, for reproducible
    /// layouts.
    pub fn with_capacity_and_seed(max_elements: usize, seed: u32) -> Self {
        let () = Self::PAIR_LOCK_FREE;
        Self {
            storage: HeapStorage::with_pool(max_elements),
            used: CacheAligned::new(AtomicUsize::new(0)),
            seed,
            _marker: PhantomData,
        }
    }
}

impl<K, V, const C: usize, const CAP: usize, const TABLE: usize>
    TakeMap<K, V, C, StaticStorage<TakeBucket<C>, TakeNode<K, V>, CAP, TABLE>>
where
    K: TakeKey,
{
    /// Map with inline arrays, seeded from process randomness.
    pub fn new() -> Self {
        Self::with_seed(generate_seed())
    }

    /// Inline-storage map with an explicit hash seed.
    pub fn with_seed(seed: u32) -> Self {
        let () = Self::PAIR_LOCK_FREE;
        Self {
            storage: StaticStorage::new(),
            used: CacheAligned::new(AtomicUsize::new(0)),
            seed,
            _marker: PhantomData,
        }
    }
}

impl<K, V, const C: usize, const CAP: usize, const TABLE: usize> Default
    for TakeMap<K, V, C, StaticStorage<TakeBucket<C>, TakeNode<K, V>, CAP, TABLE>>
where
    K: TakeKey,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, const C: usize> TakeMap<K, V, C, ExternalStorage<TakeBucket<C>, TakeNode<K, V>>>
where
    K: TakeKey,
{
    /// Uninitialised map; every operation fails until [`init`]
    /// succeeds exactly once.
    ///
    /// [`init`]: TakeMap::init
    pub fn new() -> Self {
        Self::with_seed(generate_seed())
    }

    /// Uninitialised map with an explicit hash seed.
    pub fn with_seed(seed: u32) -> Self {
        let () = Self::PAIR_LOCK_FREE;
        Self {
            storage: ExternalStorage::new(),
            used: CacheAligned::new(AtomicUsize::new(0)),
            seed,
            _marker: PhantomData,
        }
    }

    /// Adopt caller-allocated buffers. Returns `true` iff this call
    /// was the first to initialise the map; mis-sized buffers are
    /// rejected without initialising. Racing callers return only after
    /// the winner has finished, so a `false` from a well-sized call
    /// means the map is already operable.
    pub fn init(
        &self,
        max_elements: usize,
        table: Box<[TakeBucket<C>]>,
        nodes: Box<[TakeNode<K, V>]>,
        free: Box<[AtomicU32]>,
    ) -> bool {
        if max_elements == 0
            || max_elements >= NIL as usize
            || table.len() != bucket_count(max_elements)
            || nodes.len() != max_elements
            || free.len() != max_elements
        {
            return false;
        }
        self.storage.try_init(table, nodes, free)
    }

    /// Allocate buffers sized for `max_elements`, ready to pass to
    /// [`init`](TakeMap::init).
    pub fn buffers(
        max_elements: usize,
    ) -> (
        Box<[TakeBucket<C>]>,
        Box<[TakeNode<K, V>]>,
        Box<[AtomicU32]>,
    ) {
        let mut table = Vec::new();
        table.resize_with(bucket_count(max_elements), TakeBucket::default);
        let mut nodes = Vec::new();
        nodes.resize_with(max_elements, TakeNode::default);
        let free = (0..max_elements)
            .map(|_| AtomicU32::new(NIL))
            .collect::<Vec<_>>();
        (
            table.into_boxed_slice(),
            nodes.into_boxed_slice(),
            free.into_boxed_slice(),
        )
    }
}

impl<K, V, const C: usize, S> TakeMap<K, V, C, S>
where
    K: TakeKey,
    S: PoolStorage<TakeBucket<C>, TakeNode<K, V>>,
{
    #[cfg(not(feature = "skip-lock-free-checks"))]
    const PAIR_LOCK_FREE: () = assert!(
        PairCell::ALWAYS_LOCK_FREE,
        "the (hash, key) pair cell is not lock-free on this target; enable the \
         `skip-lock-free-checks` feature to accept portable-atomic's fallback"
    );
    #[cfg(feature = "skip-lock-free-checks")]
    const PAIR_LOCK_FREE: () = ();

    /// Whether the pair CAS is guaranteed lock-free on this target.
    pub const fn is_always_lock_free() -> bool {
        PairCell::ALWAYS_LOCK_FREE
    }

    /// Runtime probe of the pair cell's atomic.
    pub fn is_lock_free(&self) -> bool {
        PairCell::is_lock_free()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.storage.pool().len()
    }

    /// Nodes currently claimed out of the pool. A hint under
    /// concurrency, exact at quiescence.
    pub fn used_nodes(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    /// Nodes currently sitting in the free list. Approximate under
    /// concurrency, exact at quiescence.
    pub fn free_nodes(&self) -> usize {
        self.storage
            .free_slots()
            .iter()
            .filter(|s| s.load(Ordering::Relaxed) != NIL)
            .count()
    }

    /// Insert one `(key, value)` entry. Duplicate keys accumulate as
    /// independent entries.
    pub fn add(&self, key: K, value: V) -> bool {
        self.try_add(key, value).is_ok()
    }

    /// Insert, reporting which limit was hit on failure.
    pub fn try_add(&self, key: K, value: V) -> Result<(), AddError> {
        if !self.storage.ready() {
            return Err(AddError::NotInitialized);
        }

        let Some(idx) = self.free_list().claim() else {
            return Err(AddError::CapacityExhausted);
        };

        let hash = key.hash_with(self.seed);
        // SAFETY: a claimed index names a pool node we own exclusively.
        let node = unsafe { self.storage.pool().get_unchecked(idx as usize) };
        unsafe { node.write(hash, key, value) };

        if self.bucket_for(hash).add(idx) {
            Ok(())
        } else {
            // SAFETY: publication failed, the node is still ours.
            unsafe { node.clear() };
            self.free_list().release(idx);
            Err(AddError::BucketFull)
        }
    }

    /// Remove and return one entry stored under `key`.
    pub fn take(&self, key: &K) -> Option<V> {
        if !self.storage.ready() {
            return None;
        }

        let hash = key.hash_with(self.seed);
        let pool = self.storage.pool();
        let idx = self.bucket_for(hash).take(hash, *key, pool)?;

        // SAFETY: winning the pair CAS transferred the node to us.
        let node = unsafe { pool.get_unchecked(idx as usize) };
        let value = unsafe { node.take_value() };
        self.free_list().release(idx);
        Some(value)
    }

    /// Remove every entry stored under `key`, passing each value to
    /// `receiver` until it returns `false`. Each node is recycled
    /// immediately after its visit, including the one that stops the
    /// walk.
    pub fn take_with<F>(&self, key: &K, mut receiver: F)
    where
        F: FnMut(&V) -> bool,
    {
        if !self.storage.ready() {
            return;
        }

        let hash = key.hash_with(self.seed);
        let pool = self.storage.pool();
        self.bucket_for(hash).take_each(hash, *key, pool, |idx| {
            // SAFETY: the bucket hands us exclusively claimed nodes.
            let node = unsafe { pool.get_unchecked(idx as usize) };
            let value = unsafe { node.take_value() };
            let keep_going = receiver(&value);
            self.free_list().release(idx);
            keep_going
        });
    }

    /// Cursor over all entries matching one key; see [`TakeKeyIter`].
    pub fn key_iter(&self) -> TakeKeyIter<'_, K, V, C, S> {
        TakeKeyIter {
            map: self,
            bucket: None,
            key: None,
            hash: 0,
            cursor: 0,
            current: None,
        }
    }

    fn free_list(&self) -> FreeList<'_> {
        FreeList::new(self.storage.free_slots(), &self.used)
    }

    fn bucket_for(&self, hash: u32) -> &TakeBucket<C> {
        let table = self.storage.table();
        // SAFETY: the table length is a power of two; masking keeps the
        // index in range. Callers have checked `ready()`.
        unsafe { table.get_unchecked((hash as usize) & (table.len() - 1)) }
    }
}

/// Resumable single-threaded cursor over every entry matching one key,
/// in insert-take mode: each `next` removes the yielded entry from the
/// map, and the previously yielded node is recycled on the following
/// `next`, `reset`, `set_key` or drop.
pub struct TakeKeyIter<'a, K, V, const C: usize, S>
where
    K: TakeKey,
    S: PoolStorage<TakeBucket<C>, TakeNode<K, V>>,
{
    map: &'a TakeMap<K, V, C, S>,
    bucket: Option<&'a TakeBucket<C>>,
    key: Option<K>,
    hash: u32,
    cursor: usize,
    current: Option<u32>,
}

impl<K, V, const C: usize, S> TakeKeyIter<'_, K, V, C, S>
where
    K: TakeKey,
    S: PoolStorage<TakeBucket<C>, TakeNode<K, V>>,
{
    /// Aim the cursor at `key`, starting from the first slot.
    pub fn set_key(&mut self, key: K) -> &mut Self {
        self.release_current();
        let map = self.map;
        self.hash = key.hash_with(map.seed);
        self.bucket = if map.storage.ready() {
            Some(map.bucket_for(self.hash))
        } else {
            None
        };
        self.key = Some(key);
        self.cursor = 0;
        self
    }

    /// Rewind to the first slot, as if `set_key` had just been called.
    pub fn reset(&mut self) -> &mut Self {
        self.release_current();
        self.cursor = 0;
        self
    }

    /// Claim the next matching entry. Returns `false` when no match
    /// remains.
    pub fn next(&mut self) -> bool {
        self.release_current();
        let (Some(bucket), Some(key)) = (self.bucket, self.key) else {
            return false;
        };
        let pool = self.map.storage.pool();
        match bucket.take_from(&mut self.cursor, self.hash, key, pool) {
            Some(idx) => {
                self.current = Some(idx);
                true
            }
            None => false,
        }
    }

    /// Value of the entry claimed by the last successful `next`.
    ///
    /// # Panics
    ///
    /// Panics when `next` has not yielded an entry.
    pub fn value(&self) -> &V {
        let idx = self
            .current
            .expect("no current entry; call next() until it returns true");
        // SAFETY: the cursor owns the claimed node until released.
        let node = unsafe { self.map.storage.pool().get_unchecked(idx as usize) };
        unsafe { node.value_ref() }
    }

    fn release_current(&mut self) {
        if let Some(idx) = self.current.take() {
            // SAFETY: we own the node; its value was never moved out.
            let node = unsafe { self.map.storage.pool().get_unchecked(idx as usize) };
            unsafe { node.clear() };
            self.map.free_list().release(idx);
        }
    }
}

impl<K, V, const C: usize, S> Drop for TakeKeyIter<'_, K, V, C, S>
where
    K: TakeKey,
    S: PoolStorage<TakeBucket<C>, TakeNode<K, V>>,
{
    fn drop(&mut self) {
        self.release_current();
    }
}
