//! Per-chunk record of what was drawn, used to decide whether two builds look the same from a given camera.

use crate::dependency::DependencyGraph;
use crate::entity::{EntityKey, EntityKind};
use crate::usage::{BoundingBox, DependencyUsage, PlacedLoc};

use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use mapforge_core::ChunkCoord;
use rkyv::{AlignedVec, Archive, Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderMetaError {
    #[error("failed to archive render meta: {0}")]
    Encode(String),
    #[error("corrupt render meta: {0}")]
    Decode(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Archive, Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[archive(check_bytes)]
pub struct ChunkRenderMeta {
    pub x: i32,
    pub z: i32,
    pub build_version: u32,
    pub floor: Vec<FloorDeps>,
    pub locs: Vec<LocDeps>,
}

#[derive(Archive, Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[archive(check_bytes)]
pub struct FloorDeps {
    pub x: i32,
    pub z: i32,
    pub size: i32,
    pub max_y: i32,
    pub tile_hashes: Vec<u32>,
    /// Fingerprints of all overlays, then all underlays, chained.
    pub dep_hash: u32,
}

impl FloorDeps {
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::from_squares(self.x, self.z, self.size, self.max_y)
    }
}

#[derive(Archive, Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[archive(check_bytes)]
pub struct LocDeps {
    pub id: i32,
    pub dependency_hash: u32,
    /// Sorted by [`LocInstance::placement_order`].
    pub instances: Vec<LocInstance>,
}

#[derive(Archive, Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[archive(check_bytes)]
pub struct LocInstance {
    pub visual_level: u8,
    pub placement_hash: u32,
    pub plane: u8,
    pub x: i32,
    pub z: i32,
    pub rotation: u8,
    pub kind: u8,
    pub bounds: BoundingBox,
}

impl LocInstance {
    fn from_placed(loc: &PlacedLoc) -> Self {
        Self {
            visual_level: loc.visual_level,
            placement_hash: loc.placement_hash,
            plane: loc.plane,
            x: loc.x,
            z: loc.z,
            rotation: loc.rotation,
            kind: loc.kind,
            bounds: loc.bounds,
        }
    }

    pub fn placement_order(&self, other: &Self) -> Ordering {
        (self.plane, self.x, self.z, self.rotation, self.kind).cmp(&(
            other.plane,
            other.x,
            other.z,
            other.rotation,
            other.kind,
        ))
    }
}

impl ChunkRenderMeta {
    pub fn from_usage(
        coord: ChunkCoord,
        build_version: u32,
        usage: &DependencyUsage,
        graph: &DependencyGraph,
    ) -> Self {
        let floor = usage
            .floor
            .iter()
            .map(|group| {
                let keys = group
                    .overlays
                    .iter()
                    .map(|&id| EntityKey::new(EntityKind::Overlay, id))
                    .chain(
                        group
                            .underlays
                            .iter()
                            .map(|&id| EntityKey::new(EntityKind::Underlay, id)),
                    );
                FloorDeps {
                    x: group.x,
                    z: group.z,
                    size: group.size,
                    max_y: group.max_y,
                    tile_hashes: group.tile_hashes.clone(),
                    dep_hash: graph.fingerprint_all(keys, 0),
                }
            })
            .collect();

        let mut grouped: BTreeMap<i32, Vec<LocInstance>> = BTreeMap::new();
        for loc in usage.locs.iter() {
            grouped
                .entry(loc.id)
                .or_default()
                .push(LocInstance::from_placed(loc));
        }
        let locs = grouped
            .into_iter()
            .map(|(id, mut instances)| {
                instances.sort_by(LocInstance::placement_order);
                LocDeps {
                    id,
                    dependency_hash: graph.fingerprint(EntityKey::new(EntityKind::Loc, id), 0),
                    instances,
                }
            })
            .collect();

        Self {
            x: coord.x,
            z: coord.z,
            build_version,
            floor,
            locs,
        }
    }

    pub fn coord(&self) -> ChunkCoord {
        ChunkCoord::new(self.x, self.z)
    }

    /// Archives and LZ4-compresses this record.
    pub fn encode(&self) -> Result<Vec<u8>, RenderMetaError> {
        let archived = rkyv::to_bytes::<_, 1024>(self)
            .map_err(|e| RenderMetaError::Encode(format!("{:?}", e)))?;
        let mut encoder = FrameEncoder::new(Vec::new());
        encoder.write_all(&archived)?;
        encoder
            .finish()
            .map_err(|e| RenderMetaError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RenderMetaError> {
        let mut decoder = FrameDecoder::new(bytes);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        // The archive must be read from an aligned buffer.
        let mut aligned = AlignedVec::with_capacity(decompressed.len());
        aligned.extend_from_slice(&decompressed);
        rkyv::from_bytes::<Self>(&aligned).map_err(|e| RenderMetaError::Decode(format!("{:?}", e)))
    }
}

/// Boxes of every floor group that looks different between `a` drawn up to `level_a` and `b` drawn up to `level_b`.
///
/// Groups are matched by position in the list, so both sides must come from the same chunk.
pub fn compare_floor_deps(
    a: &[FloorDeps],
    b: &[FloorDeps],
    level_a: usize,
    level_b: usize,
) -> Vec<BoundingBox> {
    let max_level = level_a.max(level_b);
    let mut boxes = Vec::new();
    for i in 0..a.len().max(b.len()) {
        let (group_a, group_b) = match (a.get(i), b.get(i)) {
            (Some(group_a), Some(group_b)) => (group_a, group_b),
            (Some(only), None) | (None, Some(only)) => {
                boxes.push(only.bounds());
                continue;
            }
            (None, None) => break,
        };

        let mismatch = group_a.dep_hash != group_b.dep_hash
            || group_a.tile_hashes.len() <= max_level
            || group_b.tile_hashes.len() <= max_level
            || (0..=max_level).any(|level| {
                let hash_a = if level <= level_a { group_a.tile_hashes[level] } else { 0 };
                let hash_b = if level <= level_b { group_b.tile_hashes[level] } else { 0 };
                hash_a != hash_b
            });
        if mismatch {
            boxes.push(group_a.bounds());
            boxes.push(group_b.bounds());
        }
    }
    boxes
}

/// Boxes of every loc instance that was added, removed, moved, or whose appearance changed between `a` and `b`.
///
/// Instances whose visual level is above the side's level filter are not drawn and therefore ignored.
pub fn compare_loc_deps(
    a: &[LocDeps],
    b: &[LocDeps],
    level_a: usize,
    level_b: usize,
) -> Vec<BoundingBox> {
    let visible = |level: usize| move |inst: &&LocInstance| usize::from(inst.visual_level) <= level;

    let mut boxes = Vec::new();
    let (mut ia, mut ib) = (0, 0);
    loop {
        match (a.get(ia), b.get(ib)) {
            (None, None) => break,
            (Some(loc_a), Some(loc_b)) if loc_a.id == loc_b.id => {
                if loc_a.dependency_hash == loc_b.dependency_hash {
                    let inst_a: Vec<_> = loc_a.instances.iter().filter(visible(level_a)).collect();
                    let inst_b: Vec<_> = loc_b.instances.iter().filter(visible(level_b)).collect();
                    compare_instances(&inst_a, &inst_b, &mut boxes);
                } else {
                    boxes.extend(loc_a.instances.iter().map(|inst| inst.bounds));
                    boxes.extend(loc_b.instances.iter().map(|inst| inst.bounds));
                }
                ia += 1;
                ib += 1;
            }
            (Some(loc_a), Some(loc_b)) if loc_b.id < loc_a.id => {
                boxes.extend(loc_b.instances.iter().map(|inst| inst.bounds));
                ib += 1;
            }
            (None, Some(loc_b)) => {
                boxes.extend(loc_b.instances.iter().map(|inst| inst.bounds));
                ib += 1;
            }
            (Some(loc_a), _) => {
                boxes.extend(loc_a.instances.iter().map(|inst| inst.bounds));
                ia += 1;
            }
        }
    }
    boxes
}

fn compare_instances(a: &[&LocInstance], b: &[&LocInstance], boxes: &mut Vec<BoundingBox>) {
    let (mut ia, mut ib) = (0, 0);
    loop {
        match (a.get(ia), b.get(ib)) {
            (None, None) => break,
            (Some(inst_a), Some(inst_b)) => match inst_a.placement_order(inst_b) {
                Ordering::Equal => {
                    if inst_a.placement_hash != inst_b.placement_hash {
                        boxes.push(inst_a.bounds);
                        boxes.push(inst_b.bounds);
                    }
                    ia += 1;
                    ib += 1;
                }
                Ordering::Less => {
                    boxes.push(inst_a.bounds);
                    ia += 1;
                }
                Ordering::Greater => {
                    boxes.push(inst_b.bounds);
                    ib += 1;
                }
            },
            (Some(inst_a), None) => {
                boxes.push(inst_a.bounds);
                ia += 1;
            }
            (None, Some(inst_b)) => {
                boxes.push(inst_b.bounds);
                ib += 1;
            }
        }
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
