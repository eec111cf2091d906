//! # Dependency Graph
//!
//! Every piece of world data that can influence an artifact is an [`EntityKey`]. Collectors record directed edges "holder
//! depends on dependency" plus a content [`Stamp`] for each entity they can resolve. Once collection is done, the builder is
//! frozen into an immutable [`DependencyGraph`], which can fingerprint any node by folding in the stamps of everything it
//! transitively reaches.
//!
//! Edges whose dependency never received a stamp are omitted when the graph is frozen. They are counted and logged so that
//! the loss is observable, but they never fail a run.

mod collector;

pub use collector::*;

use crate::entity::EntityKey;

use mapforge_core::{crc32_add_i32, crc32_add_int, SmallKeyHashMap, SmallKeyHashSet};
use parking_lot::Mutex;
use smallvec::SmallVec;

/// Most entities depend on a handful of others.
pub type DependencyList = SmallVec<[EntityKey; 4]>;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Stamp {
    pub hash: u32,
    pub version: u32,
}

#[derive(Default)]
pub struct DependencyGraphBuilder {
    edges: SmallKeyHashMap<EntityKey, SmallKeyHashSet<EntityKey>>,
    stamps: SmallKeyHashMap<EntityKey, Stamp>,
    max_version: u32,
}

impl DependencyGraphBuilder {
    /// Records that `holder` depends on `dependency`. Returns `false` if the edge was already present.
    pub fn add_edge(&mut self, holder: EntityKey, dependency: EntityKey) -> bool {
        self.edges.entry(holder).or_default().insert(dependency)
    }

    /// Records the content hash of `key` and the version it was last changed in.
    pub fn add_stamp(&mut self, key: EntityKey, hash: u32, version: u32) {
        self.max_version = self.max_version.max(version);
        self.stamps.insert(key, Stamp { hash, version });
    }

    pub fn num_edges(&self) -> usize {
        self.edges.values().map(|deps| deps.len()).sum()
    }

    pub fn build(self) -> DependencyGraph {
        let Self {
            edges,
            stamps,
            max_version,
        } = self;

        let mut missing_dependencies = 0;
        let edges = edges
            .into_iter()
            .map(|(holder, deps)| {
                let mut resolved: DependencyList = deps
                    .into_iter()
                    .filter(|dep| {
                        let found = stamps.contains_key(dep);
                        if !found {
                            log::debug!("{} depends on unresolved {}", holder, dep);
                            missing_dependencies += 1;
                        }
                        found
                    })
                    .collect();
                resolved.sort_unstable();
                (holder, resolved)
            })
            .collect();

        if missing_dependencies > 0 {
            log::warn!(
                "omitted {} dependency edges with no resolvable target",
                missing_dependencies
            );
        }

        DependencyGraph {
            edges,
            stamps,
            max_version,
            missing_dependencies,
            reachable_sums: Default::default(),
        }
    }
}

/// Immutable mapping from each entity to the entities it depends on.
pub struct DependencyGraph {
    edges: SmallKeyHashMap<EntityKey, DependencyList>,
    stamps: SmallKeyHashMap<EntityKey, Stamp>,
    max_version: u32,
    missing_dependencies: usize,
    reachable_sums: Mutex<SmallKeyHashMap<EntityKey, u32>>,
}

impl DependencyGraph {
    pub fn dependencies(&self, key: EntityKey) -> &[EntityKey] {
        self.edges.get(&key).map(|deps| deps.as_slice()).unwrap_or(&[])
    }

    pub fn stamp(&self, key: EntityKey) -> Option<Stamp> {
        self.stamps.get(&key).copied()
    }

    /// The newest version of any stamped entity.
    pub fn max_version(&self) -> u32 {
        self.max_version
    }

    /// Number of edges omitted because the dependency had no stamp.
    pub fn missing_dependencies(&self) -> usize {
        self.missing_dependencies
    }

    /// Folds the identity and stamp of `key` and of everything reachable from it into `seed`.
    ///
    /// Contributions are summed, so the result does not depend on the order in which edges were discovered.
    pub fn fingerprint(&self, key: EntityKey, seed: u32) -> u32 {
        crc32_add_int(self.reachable_sum(key), seed)
    }

    /// Chains [`Self::fingerprint`] over `keys` in order.
    pub fn fingerprint_all(&self, keys: impl IntoIterator<Item = EntityKey>, seed: u32) -> u32 {
        keys.into_iter()
            .fold(seed, |hash, key| self.fingerprint(key, hash))
    }

    fn reachable_sum(&self, root: EntityKey) -> u32 {
        if let Some(sum) = self.reachable_sums.lock().get(&root) {
            return *sum;
        }

        let mut visited = SmallKeyHashSet::default();
        let mut stack = vec![root];
        let mut sum = 0u32;
        while let Some(key) = stack.pop() {
            if !visited.insert(key) {
                continue;
            }
            let stamp = self.stamps.get(&key).map(|s| s.hash).unwrap_or(0);
            sum = sum.wrapping_add(key_contribution(key, stamp));
            stack.extend(
                self.dependencies(key)
                    .iter()
                    .filter(|dep| !visited.contains(*dep)),
            );
        }

        self.reachable_sums.lock().insert(root, sum);
        sum
    }
}

fn key_contribution(key: EntityKey, stamp: u32) -> u32 {
    let identity = crc32_add_i32(key.id, crc32_add_int(key.kind.index(), 0));
    crc32_add_int(stamp, identity)
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;

    fn loc(id: i32) -> EntityKey {
        EntityKey::new(EntityKind::Loc, id)
    }

    fn model(id: i32) -> EntityKey {
        EntityKey::new(EntityKind::Model, id)
    }

    fn material(id: i32) -> EntityKey {
        EntityKey::new(EntityKind::Material, id)
    }

    fn stamp_all(builder: &mut DependencyGraphBuilder) {
        for (i, key) in [loc(1), model(10), model(11), material(100)].into_iter().enumerate() {
            builder.add_stamp(key, 1000 + i as u32, 3);
        }
    }

    #[test]
    fn fingerprint_ignores_insertion_order() {
        let mut a = DependencyGraphBuilder::default();
        stamp_all(&mut a);
        a.add_edge(loc(1), model(10));
        a.add_edge(loc(1), model(11));
        a.add_edge(model(11), material(100));

        let mut b = DependencyGraphBuilder::default();
        b.add_edge(model(11), material(100));
        b.add_edge(loc(1), model(11));
        b.add_edge(loc(1), model(10));
        stamp_all(&mut b);

        let (a, b) = (a.build(), b.build());
        assert_eq!(a.fingerprint(loc(1), 0), b.fingerprint(loc(1), 0));
        assert_eq!(a.fingerprint(loc(1), 77), b.fingerprint(loc(1), 77));
        assert_ne!(a.fingerprint(loc(1), 0), a.fingerprint(loc(1), 77));
    }

    #[test]
    fn fingerprint_changes_with_transitive_stamp() {
        let mut builder = DependencyGraphBuilder::default();
        stamp_all(&mut builder);
        builder.add_edge(loc(1), model(11));
        builder.add_edge(model(11), material(100));
        let before = builder.build().fingerprint(loc(1), 0);

        let mut builder = DependencyGraphBuilder::default();
        stamp_all(&mut builder);
        builder.add_stamp(material(100), 5, 4);
        builder.add_edge(loc(1), model(11));
        builder.add_edge(model(11), material(100));
        let graph = builder.build();

        assert_ne!(graph.fingerprint(loc(1), 0), before);
        assert_eq!(graph.max_version(), 4);
    }

    #[test]
    fn duplicate_edges_are_ignored() {
        let mut builder = DependencyGraphBuilder::default();
        assert!(builder.add_edge(loc(1), model(10)));
        assert!(!builder.add_edge(loc(1), model(10)));
        assert_eq!(builder.num_edges(), 1);
    }

    #[test]
    fn cycles_terminate() {
        let mut builder = DependencyGraphBuilder::default();
        stamp_all(&mut builder);
        builder.add_edge(model(10), model(11));
        builder.add_edge(model(11), model(10));
        let graph = builder.build();

        // Both nodes reach the same set, so they share a fingerprint.
        assert_eq!(graph.fingerprint(model(10), 0), graph.fingerprint(model(11), 0));
    }

    #[test]
    fn unresolved_dependencies_are_omitted_and_counted() {
        let mut builder = DependencyGraphBuilder::default();
        stamp_all(&mut builder);
        builder.add_edge(loc(1), model(10));
        builder.add_edge(loc(1), model(999));
        let graph = builder.build();

        assert_eq!(graph.missing_dependencies(), 1);
        assert_eq!(graph.dependencies(loc(1)), &[model(10)]);

        let mut builder = DependencyGraphBuilder::default();
        stamp_all(&mut builder);
        builder.add_edge(loc(1), model(10));
        assert_eq!(builder.build().fingerprint(loc(1), 0), graph.fingerprint(loc(1), 0));
    }
}
