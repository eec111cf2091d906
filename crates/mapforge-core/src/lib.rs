pub mod geometry;
pub mod hash;
pub mod units;

use ahash::{AHashMap, AHashSet};
pub type SmallKeyHashMap<K, V> = AHashMap<K, V>;
pub type SmallKeyHashSet<K> = AHashSet<K>;

pub use geometry::*;
pub use hash::*;
pub use units::*;

// Re-exports.
pub use glam;
pub use static_assertions;
