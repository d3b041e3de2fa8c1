//! Insert-read map: readers peek, entries are permanent.
//!
//! Adds claim a node from the free list, write the `(hash, key, value)`
//! tuple plainly and publish the node with a release CAS on its bucket
//! slot; the atomic index counter in each bucket hands every adder a
//! distinct slot, so probes may stop at the first vacant slot. Once
//! published, an entry stays readable for the map's lifetime.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::bucket::{ReadBucket, DEFAULT_COLLISION_WIDTH, NIL};
use crate::error::AddError;
use crate::key::{generate_seed, MapKey};
use crate::node::ReadNode;
use crate::recycle::FreeList;
use crate::storage::{
    bucket_count, ExternalStorage, HeapStorage, PoolStorage, StaticStorage, TableStorage,
};
use crate::utils::CacheAligned;

/// Bounded lock-free map in insert-read mode.
///
/// Keys only need [`MapKey`] plus `Default` (the pool's vacant nodes
/// hold default keys), so string keys work here. Entries cannot be
/// removed; repeated reads of a published key keep returning a value
/// for the map's lifetime.
///
/// ```
/// use petek::ReadMap;
///
/// let map: ReadMap<String, i32> = ReadMap::with_capacity(10);
/// assert!(map.add("one".to_string(), 1));
/// assert_eq!(map.read(&"one".to_string()), Some(1));
/// assert_eq!(map.read(&"two".to_string()), None);
/// ```
pub struct ReadMap<
    K,
    V,
    const C: usize = DEFAULT_COLLISION_WIDTH,
    S = HeapStorage<ReadBucket<C>, ReadNode<K, V>>,
> {
    storage: S,
    used: CacheAligned<AtomicUsize>,
    seed: u32,
    _marker: PhantomData<(K, V)>,
}

/// Insert-read map with inline storage; `TABLE` must equal
/// [`bucket_count`]`(CAP)`.
pub type StaticReadMap<K, V, const CAP: usize, const TABLE: usize> = ReadMap<
    K,
    V,
    DEFAULT_COLLISION_WIDTH,
    StaticStorage<ReadBucket<DEFAULT_COLLISION_WIDTH>, ReadNode<K, V>, CAP, TABLE>,
>;

/// Insert-read map over caller-provided buffers; inoperable until
/// [`init`](ReadMap::init) succeeds.
pub type ExternalReadMap<K, V> = ReadMap<
    K,
    V,
    DEFAULT_COLLISION_WIDTH,
    ExternalStorage<ReadBucket<DEFAULT_COLLISION_WIDTH>, ReadNode<K, V>>,
>;

impl<K, V, const C: usize> ReadMap<K, V, C, HeapStorage<ReadBucket<C>, ReadNode<K, V>>>
where
    K: MapKey + Default,
    V: Default,
{
    /// Heap-backed map holding up to `max_elements` entries, seeded
    /// from process randomness.
    pub fn with_capacity(max_elements: usize) -> Self {
        Self::with_capacity_and_seed(max_elements, generate_seed())
    }

    /// Heap-backed map with an explicit hash seed.
    pub fn with_capacity_and_seed(max_elements: usize, seed: u32) -> Self {
        Self {
            storage: HeapStorage::with_pool(max_elements),
            used: CacheAligned::new(AtomicUsize::new(0)),
            seed,
            _marker: PhantomData,
        }
    }
}

impl<K, V, const C: usize, const CAP: usize, const TABLE: usize>
    ReadMap<K, V, C, StaticStorage<ReadBucket<C>, ReadNode<K, V>, CAP, TABLE>>
where
    K: MapKey + Default,
    V: Default,
{
    /// Map with inline arrays, seeded from process randomness.
    pub fn new() -> Self {
        Self::with_seed(generate_seed())
    }

    /// Inline-storage map with an explicit hash seed.
    pub fn with_seed(seed: u32) -> Self {
        Self {
            storage: StaticStorage::new(),
            used: CacheAligned::new(AtomicUsize::new(0)),
            seed,
            _marker: PhantomData,
        }
    }
}

impl<K, V, const C: usize, const CAP: usize, const TABLE: usize> Default
    for ReadMap<K, V, C, StaticStorage<ReadBucket<C>, ReadNode<K, V>, CAP, TABLE>>
where
    K: MapKey + Default,
    V: Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, const C: usize> ReadMap<K, V, C, ExternalStorage<ReadBucket<C>, ReadNode<K, V>>>
where
    K: MapKey + Default,
    V: Default,
{
    /// Uninitialised map; every operation fails until [`init`]
    /// succeeds exactly once.
    ///
    /// [`init`]: ReadMap::init
    pub fn new() -> Self {
        Self::with_seed(generate_seed())
    }

    /// Uninitialised map with an explicit hash seed.
    pub fn with_seed(seed: u32) -> Self {
        Self {
            storage: ExternalStorage::new(),
            used: CacheAligned::new(AtomicUsize::new(0)),
            seed,
            _marker: PhantomData,
        }
    }

    /// Adopt caller-allocated buffers; same contract as
    /// [`TakeMap::init`](crate::TakeMap::init).
    pub fn init(
        &self,
        max_elements: usize,
        table: Box<[ReadBucket<C>]>,
        nodes: Box<[ReadNode<K, V>]>,
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
    /// [`init`](ReadMap::init).
    pub fn buffers(
        max_elements: usize,
    ) -> (
        Box<[ReadBucket<C>]>,
        Box<[ReadNode<K, V>]>,
        Box<[AtomicU32]>,
    ) {
        let mut table = Vec::new();
        table.resize_with(bucket_count(max_elements), ReadBucket::default);
        let mut nodes = Vec::new();
        nodes.resize_with(max_elements, ReadNode::default);
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

impl<K, V, const C: usize, S> ReadMap<K, V, C, S>
where
    K: MapKey,
    S: PoolStorage<ReadBucket<C>, ReadNode<K, V>>,
{
    /// Always `false`: in this mode the `(hash, key)` pair is written
    /// plainly, not through a lock-free atomic, so the take-mode
    /// guarantee does not apply.
    pub const fn is_always_lock_free() -> bool {
        false
    }

    /// Runtime probe; matches [`ReadMap::is_always_lock_free`].
    pub fn is_lock_free(&self) -> bool {
        Self::is_always_lock_free()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.storage.pool().len()
    }

    /// Nodes claimed out of the pool; exact at quiescence.
    pub fn used_nodes(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    /// Nodes still in the free list; exact at quiescence.
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
            // Publication failed; the stale tuple stays in the node and
            // is overwritten on the next claim.
            self.free_list().release(idx);
            Err(AddError::BucketFull)
        }
    }

    /// Clone out the first value stored under `key`.
    pub fn read(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let mut out = None;
        self.read_with(key, |v| {
            out = Some(v.clone());
            false
        });
        out
    }

    /// Pass every value stored under `key` to `receiver` until it
    /// returns `false`.
    pub fn read_with<F>(&self, key: &K, mut receiver: F)
    where
        F: FnMut(&V) -> bool,
    {
        if !self.storage.ready() {
            return;
        }

        let hash = key.hash_with(self.seed);
        let pool = self.storage.pool();
        self.bucket_for(hash).read_each(hash, key, pool, |idx| {
            // SAFETY: published indices name initialised pool nodes.
            let node = unsafe { pool.get_unchecked(idx as usize) };
            receiver(unsafe { node.value() })
        });
    }

    /// Cursor over all entries matching one key; see [`ReadKeyIter`].
    pub fn key_iter(&self) -> ReadKeyIter<'_, K, V, C, S> {
        ReadKeyIter {
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

    fn bucket_for(&self, hash: u32) -> &ReadBucket<C> {
        let table = self.storage.table();
        // SAFETY: power-of-two table, masked index; callers checked
        // `ready()`.
        unsafe { table.get_unchecked((hash as usize) & (table.len() - 1)) }
    }
}

/// Resumable single-threaded cursor over every entry matching one key,
/// in insert-read mode. Entries stay in the map; `reset` re-yields the
/// same multiset.
pub struct ReadKeyIter<'a, K, V, const C: usize, S>
where
    K: MapKey,
    S: PoolStorage<ReadBucket<C>, ReadNode<K, V>>,
{
    map: &'a ReadMap<K, V, C, S>,
    bucket: Option<&'a ReadBucket<C>>,
    key: Option<K>,
    hash: u32,
    cursor: usize,
    current: Option<u32>,
}

impl<K, V, const C: usize, S> ReadKeyIter<'_, K, V, C, S>
where
    K: MapKey,
    S: PoolStorage<ReadBucket<C>, ReadNode<K, V>>,
{
    /// Aim the cursor at `key`, starting from the first slot.
    pub fn set_key(&mut self, key: K) -> &mut Self {
        let map = self.map;
        self.hash = key.hash_with(map.seed);
        self.bucket = if map.storage.ready() {
            Some(map.bucket_for(self.hash))
        } else {
            None
        };
        self.key = Some(key);
        self.cursor = 0;
        self.current = None;
        self
    }

    /// Rewind to the first slot, as if `set_key` had just been called.
    pub fn reset(&mut self) -> &mut Self {
        self.cursor = 0;
        self.current = None;
        self
    }

    /// Advance to the next matching entry. Returns `false` when no
    /// further match exists.
    pub fn next(&mut self) -> bool {
        self.current = None;
        let Some(bucket) = self.bucket else {
            return false;
        };
        let Some(key) = &self.key else {
            return false;
        };
        let pool = self.map.storage.pool();
        match bucket.read_from(&mut self.cursor, self.hash, key, pool) {
            Some(idx) => {
                self.current = Some(idx);
                true
            }
            None => false,
        }
    }

    /// Value of the entry found by the last successful `next`.
    ///
    /// # Panics
    ///
    /// Panics when `next` has not yielded an entry.
    pub fn value(&self) -> &V {
        let idx = self
            .current
            .expect("no current entry; call next() until it returns true");
        // SAFETY: published indices name initialised pool nodes.
        let node = unsafe { self.map.storage.pool().get_unchecked(idx as usize) };
        unsafe { node.value() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_is_idempotent() {
        let map: ReadMap<u32, u64> = ReadMap::with_capacity(10);
        assert!(map.add(3, 33));
        for _ in 0..4 {
            assert_eq!(map.read(&3), Some(33));
        }
        assert_eq!(map.read(&4), None);
    }

    #[test]
    fn string_keys_accumulate_duplicates() {
        let map: ReadMap<String, i32> = ReadMap::with_capacity(10);
        assert!(map.add("k".to_string(), 1));
        assert!(map.add("k".to_string(), 2));

        let mut seen = Vec::new();
        map.read_with(&"k".to_string(), |v| {
            seen.push(*v);
            true
        });
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn visitor_stops_on_false() {
        let map: ReadMap<u32, u64> = ReadMap::with_capacity(10);
        for v in [1u64, 2, 3] {
            assert!(map.add(9, v));
        }
        let mut visits = 0;
        map.read_with(&9, |_| {
            visits += 1;
            visits < 2
        });
        assert_eq!(visits, 2);
    }

    #[test]
    fn capacity_rejection_leaves_pool_exact() {
        let map: ReadMap<u32, u64> = ReadMap::with_capacity(3);
        assert!(map.add(1, 1));
        assert!(map.add(2, 2));
        assert!(map.add(3, 3));
        assert_eq!(map.try_add(4, 4), Err(AddError::CapacityExhausted));
        assert_eq!(map.read(&4), None);
        assert_eq!(map.used_nodes(), 3);
        assert_eq!(map.free_nodes(), 0);
    }

    #[test]
    fn static_storage_map() {
        let map: StaticReadMap<u32, u64, 8, 16> = StaticReadMap::new();
        assert!(map.add(1, 10));
        assert_eq!(map.read(&1), Some(10));
    }

    #[test]
    fn read_mode_reports_no_lock_free_guarantee() {
        let map: ReadMap<u32, u64> = ReadMap::with_capacity(2);
        assert!(!ReadMap::<u32, u64>::is_always_lock_free());
        assert!(!map.is_lock_free());
    }
}
