use std::fmt;

/// Typed errors for map insertion.
///
/// The boolean `add` surface collapses all of these into `false`;
/// `try_add` reports which limit was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddError {
    /// Every node in the pool is in use (`used_nodes == capacity`).
    CapacityExhausted,
    /// The target bucket's collision width is saturated.
    BucketFull,
    /// An externally backed map was used before a successful `init`.
    NotInitialized,
}

impl fmt::Display for AddError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddError::CapacityExhausted => {
                write!(f, "node pool exhausted, no free key-value node")
            }
            AddError::BucketFull => {
                write!(f, "bucket collision width saturated")
            }
            AddError::NotInitialized => {
                write!(f, "map used before init() succeeded")
            }
        }
    }
}

impl std::error::Error for AddError {}
