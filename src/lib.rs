//! Petek: bounded lock-free MPMC hash map primitives.
//!
//! Fixed memory usage, predictable latency: every map is sized at
//! construction, nodes are pre-allocated and recycled through a
//! free list, and all synchronisation is CAS over atomic words — no
//! blocking locks on the data plane.
//!
//! # Operation modes
//!
//! - [`TakeMap`]: inserting in parallel with *taking* (a read removes
//!   the entry from the map). Requires keys whose `(hash, key)` pair
//!   fits one lock-free atomic word.
//! - [`ReadMap`]: inserting in parallel with *peeking* (entries are
//!   never removed). Any [`MapKey`] works, string keys included.
//! - [`GrowMap`]: insert-read over append-only linked-list buckets;
//!   the entry count is unbounded, nodes come from the allocator.
//!
//! # Storage policies
//!
//! Each mode runs over heap-allocated arrays (`with_capacity`), inline
//! arrays sized at compile time (`Static*` aliases) or caller-provided
//! buffers adopted by an exactly-once `init` (`External*` aliases).
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use petek::TakeMap;
//!
//! let map: Arc<TakeMap<u32, u64>> = Arc::new(TakeMap::with_capacity(1024));
//!
//! let producer = {
//!     let map = Arc::clone(&map);
//!     thread::spawn(move || {
//!         for k in 0..512 {
//!             assert!(map.add(k, u64::from(k) * 2));
//!         }
//!     })
//! };
//! producer.join().unwrap();
//!
//! for k in 0..512 {
//!     assert_eq!(map.take(&k), Some(u64::from(k) * 2));
//!     assert_eq!(map.take(&k), None);
//! }
//! ```

#![warn(missing_docs)]

mod bucket;
mod error;
mod grow;
mod key;
mod node;
mod read;
mod recycle;
mod storage;
mod take;
mod utils;

pub use bucket::{GrowBucket, ReadBucket, TakeBucket, DEFAULT_COLLISION_WIDTH};
pub use error::AddError;
pub use grow::{ExternalGrowMap, GrowKeyIter, GrowMap, StaticGrowMap};
pub use key::{MapKey, TakeKey};
pub use node::{GrowNode, ReadNode, TakeNode};
pub use read::{ExternalReadMap, ReadKeyIter, ReadMap, StaticReadMap};
pub use storage::{
    bucket_count, ExternalStorage, HeapStorage, PoolStorage, StaticStorage, TableStorage,
};
pub use take::{ExternalTakeMap, StaticTakeMap, TakeKeyIter, TakeMap};
