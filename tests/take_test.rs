use petek::{AddError, StaticTakeMap, TakeMap};

#[test]
fn test_basic_take() {
    let map: TakeMap<i32, i32> = TakeMap::with_capacity(100);
    assert!(map.add(7, 42));
    assert_eq!(map.take(&7), Some(42));
    assert_eq!(map.take(&7).unwrap_or_default(), 0);
}

#[test]
fn test_multi_value_same_key() {
    let map: TakeMap<i32, i32> = TakeMap::with_capacity(111);
    assert!(map.add(1, 1));
    assert!(map.add(1, 2));
    assert!(map.add(1, 3));
    assert!(map.add(2, 9));

    let mut got = vec![];
    for _ in 0..3 {
        got.push(map.take(&1).expect("three entries under key 1"));
    }
    got.sort_unstable();
    assert_eq!(got, vec![1, 2, 3]);
    assert_eq!(map.take(&1).unwrap_or_default(), 0);
    assert_eq!(map.take(&2), Some(9));
}

#[test]
fn test_capacity_rejection() {
    let map: TakeMap<u32, u64> = TakeMap::with_capacity(3);
    assert!(map.add(10, 1));
    assert!(map.add(20, 2));
    assert!(map.add(30, 3));

    assert_eq!(map.try_add(40, 4), Err(AddError::CapacityExhausted));
    assert_eq!(map.take(&40), None);

    // The rejected add must not have touched any bucket.
    assert_eq!(map.used_nodes(), 3);
    assert_eq!(map.take(&10), Some(1));
    assert_eq!(map.take(&20), Some(2));
    assert_eq!(map.take(&30), Some(3));
}

#[test]
fn test_bucket_saturation_leaves_other_buckets_usable() {
    // All duplicates of one key land in one bucket of default width 16.
    let map: TakeMap<u32, u64> = TakeMap::with_capacity(100);
    for v in 0..16u64 {
        assert!(map.add(5, v));
    }
    assert_eq!(map.try_add(5, 16), Err(AddError::BucketFull));

    // The failed add undid its counter and returned the node.
    assert_eq!(map.used_nodes(), 16);
    assert_eq!(map.used_nodes() + map.free_nodes(), map.capacity());

    // Keys 5 and 6 differ in their low bits, so bucket 6 is free.
    assert!(map.add(6, 99));
    assert_eq!(map.take(&6), Some(99));
}

#[test]
fn test_take_is_exactly_once_per_add() {
    let map: TakeMap<u32, u64> = TakeMap::with_capacity(64);
    for v in 0..8u64 {
        assert!(map.add(3, v));
    }
    let mut seen = vec![];
    while let Some(v) = map.take(&3) {
        seen.push(v);
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..8).collect::<Vec<_>>());
    assert_eq!(map.free_nodes(), map.capacity());
}

#[test]
fn test_take_with_receiver() {
    let map: TakeMap<u32, u64> = TakeMap::with_capacity(16);
    for v in [7u64, 8, 9] {
        assert!(map.add(1, v));
    }

    let mut seen = vec![];
    map.take_with(&1, |v| {
        seen.push(*v);
        true
    });
    seen.sort_unstable();
    assert_eq!(seen, vec![7, 8, 9]);

    // Everything visited went back to the pool.
    assert_eq!(map.used_nodes(), 0);
    map.take_with(&1, |_| panic!("bucket should be empty"));
}

#[test]
fn test_iterator_drains_duplicates() {
    let map: TakeMap<u32, u64> = TakeMap::with_capacity(32);
    for v in [1u64, 12, 123] {
        assert!(map.add(9, v));
    }

    let mut iter = map.key_iter();
    iter.set_key(9);
    let mut seen = vec![];
    while iter.next() {
        seen.push(*iter.value());
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 12, 123]);

    // Take mode: a second pass yields nothing.
    iter.reset();
    assert!(!iter.next());
    drop(iter);
    assert_eq!(map.free_nodes(), map.capacity());
}

#[test]
fn test_static_storage_roundtrip() {
    let map: StaticTakeMap<u32, u64, 64, 128> = StaticTakeMap::new();
    assert_eq!(map.capacity(), 64);
    for k in 0..64u32 {
        assert!(map.add(k, u64::from(k) * 7));
    }
    assert!(!map.add(64, 1));
    for k in 0..64u32 {
        assert_eq!(map.take(&k), Some(u64::from(k) * 7));
    }
    assert_eq!(map.used_nodes(), 0);
}

#[test]
fn test_explicit_seed_is_reproducible() {
    let a: TakeMap<u32, u64> = TakeMap::with_capacity_and_seed(16, 0xABCD);
    let b: TakeMap<u32, u64> = TakeMap::with_capacity_and_seed(16, 0xABCD);
    assert!(a.add(1, 10));
    assert!(b.add(1, 10));
    assert_eq!(a.take(&1), b.take(&1));
}

#[test]
fn test_lock_free_probes() {
    let map: TakeMap<u32, u64> = TakeMap::with_capacity(4);
    // On mainstream 64-bit targets the pair word is lock-free.
    if TakeMap::<u32, u64>::is_always_lock_free() {
        assert!(map.is_lock_free());
    }
}
