//! Bucket variants implementing the claim/commit/take slot protocol.
//!
//! A bucket is the fixed-width collision container at one hash-table
//! index. Slots hold node-pool indices (`NIL` marks a vacant slot)
//! rather than pointers, so the backing storage stays movable; the
//! ownership-transfer discipline is unchanged — CAS on a slot is the
//! sole means of handing a node between containers.

use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use crate::key::{MapKey, TakeKey};
use crate::node::{GrowNode, PairCell, ReadNode, TakeNode};

/// Vacant-slot marker for bucket and free-list slots.
pub(crate) const NIL: u32 = u32::MAX;

/// Number of collision slots per bucket unless overridden.
pub const DEFAULT_COLLISION_WIDTH: usize = 16;

/// Collision bucket for insert-take mode.
///
/// `used` counts occupied slots; it is a gate and a scan shortcut, not
/// a lock. Adders increment before claiming a slot (and undo on
/// failure), takers decrement after clearing one.
pub struct TakeBucket<const C: usize> {
    slots: [AtomicU32; C],
    used: AtomicU32,
}

impl<const C: usize> Default for TakeBucket<C> {
    fn default() -> Self {
        let () = Self::WIDTH_OK;
        Self {
            slots: std::array::from_fn(|_| AtomicU32::new(NIL)),
            used: AtomicU32::new(0),
        }
    }
}

impl<const C: usize> TakeBucket<C> {
    const WIDTH_OK: () = assert!(C > 0, "collision width cannot be zero");

    /// Publish a filled node into the first vacant slot.
    pub(crate) fn add(&self, idx: u32) -> bool {
        let usage_now = self.used.fetch_add(1, Ordering::AcqRel) + 1;
        if usage_now as usize > C {
            // Bucket is full.
            self.used.fetch_sub(1, Ordering::AcqRel);
            return false;
        }

        for slot in &self.slots {
            if slot
                .compare_exchange(NIL, idx, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            } // else slot already in use
        }

        // A taker can vacate a slot behind our scan position while a
        // rival adder wins the one ahead of it; the caller sees a full
        // bucket and retries or gives up.
        self.used.fetch_sub(1, Ordering::AcqRel);
        false
    }

    /// Claim and remove one node matching `(hash, key)`.
    ///
    /// Winning the pair CAS makes the subsequent slot CAS infallible;
    /// a failure there is a protocol violation and panics.
    pub(crate) fn take<K, V>(
        &self,
        hash: u32,
        key: K,
        pool: &[TakeNode<K, V>],
    ) -> Option<u32>
    where
        K: TakeKey,
    {
        let mut cursor = 0;
        self.take_from(&mut cursor, hash, key, pool)
    }

    /// Claim and remove every node matching `(hash, key)`, invoking
    /// `sink` with the claimed index until it returns `false`.
    pub(crate) fn take_each<K, V, F>(&self, hash: u32, key: K, pool: &[TakeNode<K, V>], mut sink: F)
    where
        K: TakeKey,
        F: FnMut(u32) -> bool,
    {
        if self.used.load(Ordering::Acquire) == 0 {
            return;
        }
        let Some(want) = Self::live_pair(hash, key) else {
            return;
        };

        for slot in &self.slots {
            // Bucket may have drained while we were scanning.
            if self.used.load(Ordering::Acquire) == 0 {
                break;
            }
            if let Some(idx) = self.claim_slot(slot, want, pool) {
                if !sink(idx) {
                    break;
                }
            }
        }
    }

    /// Cursor variant of [`TakeBucket::take`]: scan starts at `*cursor`
    /// (wrapping) and the cursor is advanced past the winning slot.
    pub(crate) fn take_from<K, V>(
        &self,
        cursor: &mut usize,
        hash: u32,
        key: K,
        pool: &[TakeNode<K, V>],
    ) -> Option<u32>
    where
        K: TakeKey,
    {
        if self.used.load(Ordering::Acquire) == 0 {
            return None;
        }
        let want = Self::live_pair(hash, key)?;

        for i in 0..C {
            if self.used.load(Ordering::Acquire) == 0 {
                return None;
            }
            let at = (i + *cursor) % C;
            if let Some(idx) = self.claim_slot(&self.slots[at], want, pool) {
                *cursor = (at + 1) % C;
                return Some(idx);
            }
        }
        None
    }

    /// The packed pair of a live entry, or `None` when the pair equals
    /// the vacancy word (such an entry can never be claimed).
    #[inline]
    fn live_pair<K: TakeKey>(hash: u32, key: K) -> Option<u64> {
        let want = PairCell::pack(hash, key);
        (want != PairCell::EMPTY).then_some(want)
    }

    #[inline]
    fn claim_slot<K, V>(
        &self,
        slot: &AtomicU32,
        want: u64,
        pool: &[TakeNode<K, V>],
    ) -> Option<u32>
    where
        K: TakeKey,
    {
        let idx = slot.load(Ordering::Acquire);
        if idx == NIL {
            return None;
        }
        // SAFETY: published slot indices always name a pool node.
        let node = unsafe { pool.get_unchecked(idx as usize) };
        if !node.pair().try_claim(want) {
            return None;
        }
        if slot
            .compare_exchange(idx, NIL, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            // This shouldn't be possible: the pair CAS made us the
            // exclusive owner of this slot's node.
            panic!("bucket slot changed while its key-hash pair was held");
        }
        self.used.fetch_sub(1, Ordering::AcqRel);
        Some(idx)
    }

    #[cfg(test)]
    pub(crate) fn occupancy(&self) -> (u32, usize) {
        let live = self
            .slots
            .iter()
            .filter(|s| s.load(Ordering::Relaxed) != NIL)
            .count();
        (self.used.load(Ordering::Relaxed), live)
    }
}

/// Collision bucket for insert-read mode.
///
/// The atomic counter is the serialisation point: `fetch_add` grants
/// each adder a distinct slot index, so slots fill contiguously and a
/// probe may stop at the first vacant slot.
pub struct ReadBucket<const C: usize> {
    slots: [AtomicU32; C],
    used: AtomicU32,
}

impl<const C: usize> Default for ReadBucket<C> {
    fn default() -> Self {
        let () = Self::WIDTH_OK;
        Self {
            slots: std::array::from_fn(|_| AtomicU32::new(NIL)),
            used: AtomicU32::new(0),
        }
    }
}

impl<const C: usize> ReadBucket<C> {
    const WIDTH_OK: () = assert!(C > 0, "collision width cannot be zero");

    /// Publish a filled node at the exclusively claimed index.
    pub(crate) fn add(&self, idx: u32) -> bool {
        let my_index = self.used.fetch_add(1, Ordering::AcqRel) as usize;
        if my_index >= C {
            // Bucket is full.
            self.used.fetch_sub(1, Ordering::AcqRel);
            return false;
        }

        if self.slots[my_index]
            .compare_exchange(NIL, idx, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            // The counter hands out each index exactly once and slots
            // are never vacated in this mode.
            panic!("claimed read slot was already published");
        }
        true
    }

    /// First node matching `(hash, key)`.
    pub(crate) fn read<K, V>(&self, hash: u32, key: &K, pool: &[ReadNode<K, V>]) -> Option<u32>
    where
        K: MapKey,
    {
        if self.used.load(Ordering::Acquire) == 0 {
            return None;
        }

        for slot in &self.slots {
            let idx = slot.load(Ordering::Acquire);
            if idx == NIL {
                break; // no more items
            }
            // SAFETY: published slot indices always name a pool node.
            let node = unsafe { pool.get_unchecked(idx as usize) };
            // SAFETY: the slot's acquire load ordered the node's writes.
            let (h, k) = unsafe { node.khp() };
            if *h == hash && k == key {
                return Some(idx);
            }
        }
        None
    }

    /// Invoke `sink` with every matching node index until it returns
    /// `false`.
    pub(crate) fn read_each<K, V, F>(&self, hash: u32, key: &K, pool: &[ReadNode<K, V>], mut sink: F)
    where
        K: MapKey,
        F: FnMut(u32) -> bool,
    {
        if self.used.load(Ordering::Acquire) == 0 {
            return;
        }

        for slot in &self.slots {
            let idx = slot.load(Ordering::Acquire);
            if idx == NIL {
                break;
            }
            // SAFETY: as in `read`.
            let node = unsafe { pool.get_unchecked(idx as usize) };
            let (h, k) = unsafe { node.khp() };
            if *h == hash && k == key && !sink(idx) {
                break;
            }
        }
    }

    /// Cursor variant: scan starts at `*cursor` (wrapping) and the
    /// cursor is advanced past the match.
    pub(crate) fn read_from<K, V>(
        &self,
        cursor: &mut usize,
        hash: u32,
        key: &K,
        pool: &[ReadNode<K, V>],
    ) -> Option<u32>
    where
        K: MapKey,
    {
        if self.used.load(Ordering::Acquire) == 0 {
            return None;
        }

        for i in 0..C {
            let at = (i + *cursor) % C;
            let idx = self.slots[at].load(Ordering::Acquire);
            if idx == NIL {
                break;
            }
            // SAFETY: as in `read`.
            let node = unsafe { pool.get_unchecked(idx as usize) };
            let (h, k) = unsafe { node.khp() };
            if *h == hash && k == key {
                *cursor = (at + 1) % C;
                return Some(idx);
            }
        }
        None
    }

    #[cfg(test)]
    pub(crate) fn occupancy(&self) -> (u32, usize) {
        let live = self
            .slots
            .iter()
            .filter(|s| s.load(Ordering::Relaxed) != NIL)
            .count();
        (self.used.load(Ordering::Relaxed), live)
    }
}

/// Append-only linked-list bucket for the growing insert-read variant.
///
/// Nodes are heap allocated by the adder and attached with a CAS on the
/// first vacant link; the list only ever grows until the bucket is
/// dropped.
pub struct GrowBucket<K, V> {
    head: AtomicPtr<GrowNode<K, V>>,
    // The list owns its heap nodes; make Send/Sync follow K and V.
    _owns: PhantomData<Box<GrowNode<K, V>>>,
}

impl<K, V> Default for GrowBucket<K, V> {
    fn default() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            _owns: PhantomData,
        }
    }
}

impl<K, V> GrowBucket<K, V> {
    /// Attach a heap-allocated node at the end of the list. Ownership
    /// of the pointer transfers to the bucket on success.
    pub(crate) fn add(&self, node: *mut GrowNode<K, V>) -> bool {
        let mut cur = match self.head.compare_exchange(
            ptr::null_mut(),
            node,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => return true,
            Err(observed) => observed,
        };

        while !cur.is_null() {
            // SAFETY: nodes are never unlinked or freed while the map
            // is alive.
            let next = unsafe { &(*cur).next };
            match next.compare_exchange(ptr::null_mut(), node, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(observed) => cur = observed,
            }
        }
        false
    }

    /// First match at or after `start` (`null` = list head).
    pub(crate) fn find_from(
        &self,
        start: *const GrowNode<K, V>,
        hash: u32,
        key: &K,
    ) -> *const GrowNode<K, V>
    where
        K: MapKey,
    {
        let mut cur = if start.is_null() {
            self.head.load(Ordering::Acquire) as *const GrowNode<K, V>
        } else {
            start
        };

        while !cur.is_null() {
            // SAFETY: list nodes live until the bucket is dropped.
            let node = unsafe { &*cur };
            if node.hash == hash && node.key == *key {
                break;
            }
            cur = node.next.load(Ordering::Acquire);
        }
        cur
    }

    /// Match following `node` in list order.
    pub(crate) fn find_after(
        &self,
        node: *const GrowNode<K, V>,
        hash: u32,
        key: &K,
    ) -> *const GrowNode<K, V>
    where
        K: MapKey,
    {
        // SAFETY: `node` came out of this list and is still alive.
        let next = unsafe { (*node).next.load(Ordering::Acquire) };
        if next.is_null() {
            return ptr::null();
        }
        self.find_from(next, hash, key)
    }
}

impl<K, V> Drop for GrowBucket<K, V> {
    fn drop(&mut self) {
        let mut cur = *self.head.get_mut();
        while !cur.is_null() {
            // SAFETY: exclusive access; every list node was allocated
            // with `Box::into_raw` and is freed exactly once here.
            let node = unsafe { Box::from_raw(cur) };
            cur = node.next.load(Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> Vec<TakeNode<u32, u64>> {
        (0..n).map(|_| TakeNode::default()).collect()
    }

    fn filled(pool: &[TakeNode<u32, u64>], idx: u32, hash: u32, key: u32, value: u64) {
        // SAFETY: test-local pool, node unclaimed.
        unsafe { pool[idx as usize].write(hash, key, value) };
    }

    #[test]
    fn take_add_fills_ascending() {
        let bucket = TakeBucket::<4>::default();
        let pool = pool(4);
        for i in 0..4 {
            filled(&pool, i, 1, 2, i as u64);
            assert!(bucket.add(i));
        }
        // Width saturated: the gate rejects and undoes its increment.
        assert!(!bucket.add(0));
        let (counter, live) = bucket.occupancy();
        assert_eq!(counter, 4);
        assert_eq!(live, 4);
    }

    #[test]
    fn take_claims_exactly_once() {
        let bucket = TakeBucket::<4>::default();
        let pool = pool(2);
        filled(&pool, 0, 9, 7, 100);
        filled(&pool, 1, 9, 7, 200);
        assert!(bucket.add(0));
        assert!(bucket.add(1));

        let a = bucket.take(9, 7u32, &pool).expect("first match");
        let b = bucket.take(9, 7u32, &pool).expect("second match");
        assert_ne!(a, b);
        assert!(bucket.take(9, 7u32, &pool).is_none());

        let (counter, live) = bucket.occupancy();
        assert_eq!(counter, 0);
        assert_eq!(live, 0);
    }

    #[test]
    fn take_ignores_other_keys() {
        let bucket = TakeBucket::<4>::default();
        let pool = pool(1);
        filled(&pool, 0, 5, 3, 1);
        assert!(bucket.add(0));
        assert!(bucket.take(5, 4u32, &pool).is_none());
        assert!(bucket.take(6, 3u32, &pool).is_none());
        assert_eq!(bucket.take(5, 3u32, &pool), Some(0));
    }

    #[test]
    fn take_from_advances_cursor() {
        let bucket = TakeBucket::<4>::default();
        let pool = pool(3);
        for i in 0..3 {
            filled(&pool, i, 1, 1, i as u64);
            assert!(bucket.add(i));
        }

        let mut cursor = 0;
        let mut seen = Vec::new();
        while let Some(idx) = bucket.take_from(&mut cursor, 1, 1u32, &pool) {
            seen.push(idx);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn read_probe_stops_at_first_vacancy() {
        let bucket = ReadBucket::<4>::default();
        let pool: Vec<ReadNode<u32, u64>> = (0..4).map(|_| ReadNode::default()).collect();
        unsafe {
            pool[0].write(8, 1, 10);
            pool[1].write(8, 1, 20);
        }
        assert!(bucket.add(0));
        assert!(bucket.add(1));

        assert_eq!(bucket.read(8, &1, &pool), Some(0));
        let mut values = Vec::new();
        bucket.read_each(8, &1, &pool, |idx| {
            values.push(unsafe { *pool[idx as usize].value() });
            true
        });
        assert_eq!(values, vec![10, 20]);
        assert!(bucket.read(8, &2, &pool).is_none());
    }

    #[test]
    fn read_add_rejects_when_saturated() {
        let bucket = ReadBucket::<2>::default();
        let pool: Vec<ReadNode<u32, u64>> = (0..3).map(|_| ReadNode::default()).collect();
        unsafe {
            pool[0].write(1, 1, 0);
            pool[1].write(1, 1, 0);
            pool[2].write(1, 1, 0);
        }
        assert!(bucket.add(0));
        assert!(bucket.add(1));
        assert!(!bucket.add(2));
        let (counter, live) = bucket.occupancy();
        assert_eq!(counter, 2);
        assert_eq!(live, 2);
    }

    #[test]
    fn grow_list_appends_and_finds() {
        let bucket = GrowBucket::<u32, u64>::default();
        for v in [1u64, 2, 3] {
            let node = Box::into_raw(Box::new(GrowNode::new(4, 9u32, v)));
            assert!(bucket.add(node));
        }
        let other = Box::into_raw(Box::new(GrowNode::new(5, 8u32, 99)));
        assert!(bucket.add(other));

        let mut cur = bucket.find_from(std::ptr::null(), 4, &9);
        let mut seen = Vec::new();
        while !cur.is_null() {
            seen.push(unsafe { (*cur).value });
            cur = bucket.find_after(cur, 4, &9);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }
}
