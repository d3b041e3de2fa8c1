//! Key traits and the default seeded hashers.
//!
//! The map consumes hashing as a pure `(key, seed) -> u32` function.
//! Scalar keys hash as `key ^ seed` (64-bit values fold the high half
//! into the low half first); string keys go through foldhash. Consumers
//! implement [`MapKey`] for their own key types.

use std::hash::BuildHasher;

use foldhash::fast::FixedState;

/// A type usable as a map key: equality plus a seeded 32-bit hash.
pub trait MapKey: Eq {
    /// Hash of the key mixed with the per-map seed.
    fn hash_with(&self, seed: u32) -> u32;
}

/// A key usable in insert-take mode.
///
/// Take-mode membership is claimed by a compare-and-swap over a single
/// atomic word holding the `(hash, key)` pair, so the key itself must
/// fit the low 32 bits of that word. Implementations exist for the
/// scalar types up to 32 bits wide; 64-bit keys cannot be taken
/// lock-free and are rejected at compile time (use one of the
/// insert-read modes for wider keys).
///
/// The packed image of `Self::default()` must be zero: the all-zero
/// word marks a vacant pair.
pub trait TakeKey: MapKey + Copy + Default {
    /// Packed 32-bit image of the key.
    fn pack(self) -> u32;
}

macro_rules! scalar_map_key {
    ($($t:ty),* $(,)?) => {$(
        impl MapKey for $t {
            #[inline(always)]
            fn hash_with(&self, seed: u32) -> u32 {
                (*self as u32) ^ seed
            }
        }

        impl TakeKey for $t {
            #[inline(always)]
            fn pack(self) -> u32 {
                self as u32
            }
        }
    )*};
}

scalar_map_key!(u8, u16, u32, i8, i16, i32, bool);

impl MapKey for char {
    #[inline(always)]
    fn hash_with(&self, seed: u32) -> u32 {
        (*self as u32) ^ seed
    }
}

impl TakeKey for char {
    #[inline(always)]
    fn pack(self) -> u32 {
        self as u32
    }
}

impl MapKey for u64 {
    #[inline(always)]
    fn hash_with(&self, seed: u32) -> u32 {
        (((*self >> 32) ^ *self) as u32) ^ seed
    }
}

impl MapKey for i64 {
    #[inline(always)]
    fn hash_with(&self, seed: u32) -> u32 {
        (*self as u64).hash_with(seed)
    }
}

impl MapKey for usize {
    #[inline(always)]
    fn hash_with(&self, seed: u32) -> u32 {
        (*self as u64).hash_with(seed)
    }
}

impl MapKey for isize {
    #[inline(always)]
    fn hash_with(&self, seed: u32) -> u32 {
        (*self as u64).hash_with(seed)
    }
}

impl MapKey for str {
    fn hash_with(&self, seed: u32) -> u32 {
        FixedState::with_seed(seed as u64).hash_one(self) as u32
    }
}

impl MapKey for String {
    fn hash_with(&self, seed: u32) -> u32 {
        self.as_str().hash_with(seed)
    }
}

impl<T: MapKey + ?Sized> MapKey for &T {
    #[inline]
    fn hash_with(&self, seed: u32) -> u32 {
        (**self).hash_with(seed)
    }
}

/// Nondeterministic per-map seed.
///
/// Derived from the process randomness behind `RandomState`; never zero
/// so that scalar hashes do not collapse onto the raw key value.
pub(crate) fn generate_seed() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::Hasher;

    let seed = RandomState::new().build_hasher().finish() as u32;
    if seed == 0 { 0x9E37_79B9 } else { seed }
}
