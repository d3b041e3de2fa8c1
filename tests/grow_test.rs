use std::sync::Arc;
use std::thread;

use petek::{GrowMap, StaticGrowMap};

#[test]
fn test_grows_past_table_hint() {
    let map: GrowMap<u32, u64> = GrowMap::with_capacity(8);
    for k in 0..1000u32 {
        assert!(map.add(k, u64::from(k) * 2));
    }
    assert_eq!(map.used_nodes(), 1000);
    for k in 0..1000u32 {
        assert_eq!(map.read(&k), Some(u64::from(k) * 2));
    }
}

#[test]
fn test_duplicates_keep_list_order() {
    let map: GrowMap<u32, u64> = GrowMap::with_capacity(16);
    for v in [5u64, 6, 7] {
        assert!(map.add(3, v));
    }
    let mut seen = vec![];
    map.read_with(&3, |v| {
        seen.push(*v);
        true
    });
    assert_eq!(seen, vec![5, 6, 7]);
}

#[test]
fn test_string_keys_and_values() {
    let map: GrowMap<String, String> = GrowMap::with_capacity(8);
    for i in 0..64 {
        assert!(map.add(format!("key-{i}"), format!("value-{i}")));
    }
    for i in 0..64 {
        assert_eq!(map.read(&format!("key-{i}")), Some(format!("value-{i}")));
    }
    assert_eq!(map.read(&"missing".to_string()), None);
}

#[test]
fn test_iterator_with_reset() {
    let map: GrowMap<String, i32> = GrowMap::with_capacity(4);
    for v in [10, 20, 30] {
        assert!(map.add("dup".to_string(), v));
    }

    let mut iter = map.key_iter();
    iter.set_key("dup".to_string());
    let mut first = vec![];
    while iter.next() {
        first.push(*iter.value());
    }
    assert_eq!(first, vec![10, 20, 30]);

    iter.reset();
    let mut second = vec![];
    while iter.next() {
        second.push(*iter.value());
    }
    assert_eq!(second, first);
}

#[test]
fn test_static_table() {
    let map: StaticGrowMap<u32, u64, 32> = StaticGrowMap::new();
    for k in 0..200u32 {
        assert!(map.add(k, u64::from(k)));
    }
    for k in 0..200u32 {
        assert_eq!(map.read(&k), Some(u64::from(k)));
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_growth() {
    let map: Arc<GrowMap<u32, u64>> = Arc::new(GrowMap::with_capacity(64));

    let mut handles = vec![];
    for t in 0..4u32 {
        let m = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            for i in 0..2000u32 {
                let key = t * 2000 + i;
                assert!(m.add(key, u64::from(key) * 3));
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(map.used_nodes(), 8000);
    for key in 0..8000u32 {
        assert_eq!(map.read(&key), Some(u64::from(key) * 3));
    }
}
