//! Growing insert-read map: unbounded entries, fixed-size table.
//!
//! Buckets are append-only linked lists; `add` heap-allocates the node
//! and CAS-attaches it at the first vacant link, so the number of
//! entries is not limited by a pool. The table itself stays at its
//! construction size, so sizing it far below the real element count
//! degrades probes into long list walks. Nodes live until the map is
//! dropped.
//!
//! Unlike the pooled modes, `add` calls the system allocator, which may
//! block; this mode is lock-free only to the extent the allocator is.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::bucket::GrowBucket;
use crate::error::AddError;
use crate::key::{generate_seed, MapKey};
use crate::node::GrowNode;
use crate::storage::{bucket_count, ExternalStorage, HeapStorage, StaticStorage, TableStorage};
use crate::utils::CacheAligned;

/// Lock-free map in growing insert-read mode.
///
/// `expected_elements` only sizes the bucket table; inserts past it
/// keep succeeding, they just share buckets.
///
/// ```
/// use petek::GrowMap;
///
/// let map: GrowMap<String, i32> = GrowMap::with_capacity(8);
/// for i in 0..64 {
///     assert!(map.add(format!("k{i}"), i));
/// }
/// assert_eq!(map.read(&"k63".to_string()), Some(63));
/// ```
pub struct GrowMap<K, V, S = HeapStorage<GrowBucket<K, V>, ()>> {
    storage: S,
    used: CacheAligned<AtomicUsize>,
    seed: u32,
    _marker: PhantomData<(K, V)>,
}

/// Growing map with an inline bucket table of `TABLE` entries
/// (power of two).
pub type StaticGrowMap<K, V, const TABLE: usize> =
    GrowMap<K, V, StaticStorage<GrowBucket<K, V>, (), 0, TABLE>>;

/// Growing map over a caller-provided bucket table; inoperable until
/// [`init`](GrowMap::init) succeeds.
pub type ExternalGrowMap<K, V> = GrowMap<K, V, ExternalStorage<GrowBucket<K, V>, ()>>;

impl<K, V> GrowMap<K, V, HeapStorage<GrowBucket<K, V>, ()>>
where
    K: MapKey,
{
    /// Heap-backed map with a table sized for `expected_elements`,
    /// seeded from process randomness.
    pub fn with_capacity(expected_elements: usize) -> Self {
        Self::with_capacity_and_seed(expected_elements, generate_seed())
    }

    /// Heap-backed map with an explicit hash seed.
    pub fn with_capacity_and_seed(expected_elements: usize, seed: u32) -> Self {
        Self {
            storage: HeapStorage::table_only(expected_elements),
            used: CacheAligned::new(AtomicUsize::new(0)),
            seed,
            _marker: PhantomData,
        }
    }
}

impl<K, V, const TABLE: usize> GrowMap<K, V, StaticStorage<GrowBucket<K, V>, (), 0, TABLE>>
where
    K: MapKey,
{
    /// Map with an inline bucket table, seeded from process
    /// randomness.
    pub fn new() -> Self {
        Self::with_seed(generate_seed())
    }

    /// Inline-table map with an explicit hash seed.
    pub fn with_seed(seed: u32) -> Self {
        Self {
            storage: StaticStorage::new(),
            used: CacheAligned::new(AtomicUsize::new(0)),
            seed,
            _marker: PhantomData,
        }
    }
}

impl<K, V, const TABLE: usize> Default
    for GrowMap<K, V, StaticStorage<GrowBucket<K, V>, (), 0, TABLE>>
where
    K: MapKey,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> GrowMap<K, V, ExternalStorage<GrowBucket<K, V>, ()>>
where
    K: MapKey,
{
    /// Uninitialised map; every operation fails until [`init`]
    /// succeeds exactly once.
    ///
    /// [`init`]: GrowMap::init
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

    /// Adopt a caller-allocated bucket table sized for
    /// `expected_elements`. Same exactly-once contract as
    /// [`TakeMap::init`](crate::TakeMap::init).
    pub fn init(&self, expected_elements: usize, table: Box<[GrowBucket<K, V>]>) -> bool {
        if expected_elements == 0 || table.len() != bucket_count(expected_elements) {
            return false;
        }
        self.storage
            .try_init(table, Vec::new().into_boxed_slice(), Vec::new().into_boxed_slice())
    }

    /// Allocate a bucket table sized for `expected_elements`, ready to
    /// pass to [`init`](GrowMap::init).
    pub fn buffers(expected_elements: usize) -> Box<[GrowBucket<K, V>]> {
        let mut table = Vec::new();
        table.resize_with(bucket_count(expected_elements), GrowBucket::default);
        table.into_boxed_slice()
    }
}

impl<K, V, S> GrowMap<K, V, S>
where
    K: MapKey,
    S: TableStorage<GrowBucket<K, V>>,
{
    /// Whether list-link publication is guaranteed lock-free. The
    /// allocator call inside `add` is excluded from the guarantee.
    pub const fn is_always_lock_free() -> bool {
        cfg!(target_has_atomic = "ptr")
    }

    /// Runtime probe; matches [`GrowMap::is_always_lock_free`].
    pub fn is_lock_free(&self) -> bool {
        Self::is_always_lock_free()
    }

    /// Number of entries added so far.
    pub fn used_nodes(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    /// Insert one `(key, value)` entry. Duplicate keys accumulate as
    /// independent entries.
    pub fn add(&self, key: K, value: V) -> bool {
        self.try_add(key, value).is_ok()
    }

    /// Insert, reporting the failure kind. May block in the allocator.
    pub fn try_add(&self, key: K, value: V) -> Result<(), AddError> {
        if !self.storage.ready() {
            return Err(AddError::NotInitialized);
        }

        let hash = key.hash_with(self.seed);
        let node = Box::into_raw(Box::new(GrowNode::new(hash, key, value)));
        if self.bucket_for(hash).add(node) {
            self.used.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            // Unreachable with an append-only list; reclaim the node
            // rather than leak it.
            // SAFETY: the bucket did not adopt the pointer.
            unsafe { drop(Box::from_raw(node)) };
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
        let bucket = self.bucket_for(hash);
        let mut cur = bucket.find_from(std::ptr::null(), hash, key);
        while !cur.is_null() {
            // SAFETY: list nodes live until the map is dropped.
            let node = unsafe { &*cur };
            if !receiver(&node.value) {
                break;
            }
            cur = bucket.find_after(cur, hash, key);
        }
    }

    /// Cursor over all entries matching one key; see [`GrowKeyIter`].
    pub fn key_iter(&self) -> GrowKeyIter<'_, K, V, S> {
        GrowKeyIter {
            map: self,
            bucket: None,
            key: None,
            hash: 0,
            current: std::ptr::null(),
        }
    }

    fn bucket_for(&self, hash: u32) -> &GrowBucket<K, V> {
        let table = self.storage.table();
        // SAFETY: power-of-two table, masked index; callers checked
        // `ready()`.
        unsafe { table.get_unchecked((hash as usize) & (table.len() - 1)) }
    }
}

/// Resumable single-threaded cursor over every entry matching one key
/// in the growing mode. Entries stay in the map; `reset` re-walks the
/// list from its head.
pub struct GrowKeyIter<'a, K, V, S>
where
    K: MapKey,
    S: TableStorage<GrowBucket<K, V>>,
{
    map: &'a GrowMap<K, V, S>,
    bucket: Option<&'a GrowBucket<K, V>>,
    key: Option<K>,
    hash: u32,
    current: *const GrowNode<K, V>,
}

impl<K, V, S> GrowKeyIter<'_, K, V, S>
where
    K: MapKey,
    S: TableStorage<GrowBucket<K, V>>,
{
    /// Aim the cursor at `key`, starting from the list head.
    pub fn set_key(&mut self, key: K) -> &mut Self {
        let map = self.map;
        self.hash = key.hash_with(map.seed);
        self.bucket = if map.storage.ready() {
            Some(map.bucket_for(self.hash))
        } else {
            None
        };
        self.key = Some(key);
        self.current = std::ptr::null();
        self
    }

    /// Rewind to the list head, as if `set_key` had just been called.
    pub fn reset(&mut self) -> &mut Self {
        self.current = std::ptr::null();
        self
    }

    /// Advance to the next matching entry. Returns `false` when no
    /// further match exists.
    pub fn next(&mut self) -> bool {
        let Some(bucket) = self.bucket else {
            return false;
        };
        let Some(key) = &self.key else {
            return false;
        };
        let found = if self.current.is_null() {
            bucket.find_from(std::ptr::null(), self.hash, key)
        } else {
            bucket.find_after(self.current, self.hash, key)
        };
        if found.is_null() {
            false
        } else {
            self.current = found;
            true
        }
    }

    /// Value of the entry found by the last successful `next`.
    ///
    /// # Panics
    ///
    /// Panics when `next` has not yielded an entry.
    pub fn value(&self) -> &V {
        assert!(
            !self.current.is_null(),
            "no current entry; call next() until it returns true"
        );
        // SAFETY: list nodes live as long as the map borrow `'a`.
        unsafe { &(*self.current).value }
    }
}
