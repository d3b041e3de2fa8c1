//! Backing storage policies: heap, static (inline) and external.
//!
//! All three expose the same table/pool/free-list views so the bucket
//! and recycler protocols are written once. The traits are inlined at
//! monomorphization; there is no dynamic dispatch on the data plane.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crossbeam_utils::Backoff;

use crate::bucket::NIL;

/// Number of buckets backing a map of `max_elements` entries.
///
/// The table is sized to twice the element count rounded up to a power
/// of two, keeping the load factor at saturation at or below 0.5.
pub const fn bucket_count(max_elements: usize) -> usize {
    let doubled = max_elements.saturating_mul(2);
    if doubled <= 1 {
        1
    } else {
        doubled.next_power_of_two()
    }
}

/// Storage exposing a bucket table.
pub trait TableStorage<B> {
    /// Whether the storage is operable (external storage is not until
    /// `init` succeeds).
    #[inline]
    fn ready(&self) -> bool {
        true
    }

    /// The bucket table. Length is a power of two (empty only for an
    /// uninitialised external storage).
    fn table(&self) -> &[B];
}

/// Storage additionally exposing a node pool and its free list.
pub trait PoolStorage<B, N>: TableStorage<B> {
    /// The node pool.
    fn pool(&self) -> &[N];

    /// Free-list slots, one per pool node.
    fn free_slots(&self) -> &[AtomicU32];
}

/// Heap-backed storage: all arrays are boxed slices built at
/// construction.
pub struct HeapStorage<B, N> {
    table: Box<[B]>,
    pool: Box<[N]>,
    free: Box<[AtomicU32]>,
}

impl<B: Default, N> HeapStorage<B, N> {
    /// Table sized for `max_elements`, with a pool of the same count.
    pub fn with_pool(max_elements: usize) -> Self
    where
        N: Default,
    {
        assert!(max_elements > 0, "element count cannot be zero");
        assert!(
            max_elements < NIL as usize,
            "element count must fit a 32-bit slot index"
        );

        let mut table = Vec::with_capacity(bucket_count(max_elements));
        table.resize_with(bucket_count(max_elements), B::default);

        let mut pool = Vec::with_capacity(max_elements);
        pool.resize_with(max_elements, N::default);

        let free = (0..max_elements)
            .map(|i| AtomicU32::new(i as u32))
            .collect::<Vec<_>>();

        Self {
            table: table.into_boxed_slice(),
            pool: pool.into_boxed_slice(),
            free: free.into_boxed_slice(),
        }
    }

    /// Table only, for the growing variant (its nodes come from the
    /// allocator, not a pool).
    pub fn table_only(expected_elements: usize) -> Self {
        assert!(expected_elements > 0, "element count cannot be zero");

        let mut table = Vec::with_capacity(bucket_count(expected_elements));
        table.resize_with(bucket_count(expected_elements), B::default);

        Self {
            table: table.into_boxed_slice(),
            pool: Vec::new().into_boxed_slice(),
            free: Vec::new().into_boxed_slice(),
        }
    }
}

impl<B, N> HeapStorage<B, N> {
    fn from_parts(table: Box<[B]>, pool: Box<[N]>, free: Box<[AtomicU32]>) -> Self {
        Self { table, pool, free }
    }
}

impl<B, N> TableStorage<B> for HeapStorage<B, N> {
    #[inline]
    fn table(&self) -> &[B] {
        &self.table
    }
}

impl<B, N> PoolStorage<B, N> for HeapStorage<B, N> {
    #[inline]
    fn pool(&self) -> &[N] {
        &self.pool
    }

    #[inline]
    fn free_slots(&self) -> &[AtomicU32] {
        &self.free
    }
}

/// Inline storage: capacities fixed at compile time, arrays live in the
/// map value itself.
///
/// `TABLE` must equal [`bucket_count`]`(CAP)`; the mismatch is rejected
/// at compile time. Spelled as a second parameter because stable Rust
/// cannot derive one inline array length from another const parameter.
pub struct StaticStorage<B, N, const CAP: usize, const TABLE: usize> {
    table: [B; TABLE],
    pool: [N; CAP],
    free: [AtomicU32; CAP],
}

impl<B: Default, N: Default, const CAP: usize, const TABLE: usize>
    StaticStorage<B, N, CAP, TABLE>
{
    const SIZES_AGREE: () = assert!(
        TABLE.is_power_of_two() && (CAP == 0 || TABLE == bucket_count(CAP)),
        "TABLE must equal bucket_count(CAP)"
    );

    /// Fresh storage with every slot vacant and the free list covering
    /// the whole pool.
    pub fn new() -> Self {
        let () = Self::SIZES_AGREE;
        Self {
            table: std::array::from_fn(|_| B::default()),
            pool: std::array::from_fn(|_| N::default()),
            free: std::array::from_fn(|i| AtomicU32::new(i as u32)),
        }
    }
}

impl<B: Default, N: Default, const CAP: usize, const TABLE: usize> Default
    for StaticStorage<B, N, CAP, TABLE>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<B, N, const CAP: usize, const TABLE: usize> TableStorage<B>
    for StaticStorage<B, N, CAP, TABLE>
{
    #[inline]
    fn table(&self) -> &[B] {
        &self.table
    }
}

impl<B, N, const CAP: usize, const TABLE: usize> PoolStorage<B, N>
    for StaticStorage<B, N, CAP, TABLE>
{
    #[inline]
    fn pool(&self) -> &[N] {
        &self.pool
    }

    #[inline]
    fn free_slots(&self) -> &[AtomicU32] {
        &self.free
    }
}

const EXT_VACANT: u8 = 0;
const EXT_BUSY: u8 = 1;
const EXT_READY: u8 = 2;

/// Caller-initialised storage: construction yields an inoperable map
/// that rejects operations until exactly one `init` call succeeds.
///
/// The init flag is a tri-state; racing initialisers spin on it until
/// the winner finishes, so a losing `init` returning `false` already
/// implies an operable map.
pub struct ExternalStorage<B, N> {
    state: AtomicU8,
    inner: UnsafeCell<MaybeUninit<HeapStorage<B, N>>>,
}

// SAFETY: `inner` is written once behind the BUSY state and read-only
// after READY is published with release ordering.
unsafe impl<B: Send, N: Send> Send for ExternalStorage<B, N> {}
unsafe impl<B: Send + Sync, N: Send + Sync> Sync for ExternalStorage<B, N> {}

impl<B, N> ExternalStorage<B, N> {
    /// Uninitialised storage; every view is empty until `try_init`.
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(EXT_VACANT),
            inner: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Adopt caller-provided buffers. Returns `true` iff this call was
    /// the first to initialise the storage; the free list is wired over
    /// the whole pool.
    ///
    /// Buffer length validation belongs to the caller (the map façades
    /// check mode-specific sizing before delegating here).
    pub(crate) fn try_init(
        &self,
        table: Box<[B]>,
        pool: Box<[N]>,
        free: Box<[AtomicU32]>,
    ) -> bool {
        match self
            .state
            .compare_exchange(EXT_VACANT, EXT_BUSY, Ordering::Acquire, Ordering::Acquire)
        {
            Ok(_) => {
                for (i, slot) in free.iter().enumerate() {
                    slot.store(i as u32, Ordering::Relaxed);
                }
                // SAFETY: the BUSY state grants exclusive write access.
                unsafe {
                    (*self.inner.get()).write(HeapStorage::from_parts(table, pool, free));
                }
                self.state.store(EXT_READY, Ordering::Release);
                true
            }
            Err(_) => {
                let backoff = Backoff::new();
                while self.state.load(Ordering::Acquire) == EXT_BUSY {
                    backoff.snooze();
                }
                false
            }
        }
    }

    #[inline]
    fn initialized(&self) -> Option<&HeapStorage<B, N>> {
        if self.state.load(Ordering::Acquire) == EXT_READY {
            // SAFETY: READY is published with release ordering after
            // the one-time write; the value is immutable afterwards.
            Some(unsafe { (*self.inner.get()).assume_init_ref() })
        } else {
            None
        }
    }
}

impl<B, N> Default for ExternalStorage<B, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B, N> TableStorage<B> for ExternalStorage<B, N> {
    #[inline]
    fn ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == EXT_READY
    }

    #[inline]
    fn table(&self) -> &[B] {
        self.initialized().map_or(&[], |s| s.table())
    }
}

impl<B, N> PoolStorage<B, N> for ExternalStorage<B, N> {
    #[inline]
    fn pool(&self) -> &[N] {
        self.initialized().map_or(&[], |s| s.pool())
    }

    #[inline]
    fn free_slots(&self) -> &[AtomicU32] {
        self.initialized().map_or(&[], |s| s.free_slots())
    }
}

impl<B, N> Drop for ExternalStorage<B, N> {
    fn drop(&mut self) {
        if *self.state.get_mut() == EXT_READY {
            // SAFETY: initialised exactly once, dropped exactly once.
            unsafe { (*self.inner.get()).assume_init_drop() };
        }
    }
}
