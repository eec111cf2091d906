use std::fmt;

/// The kinds of world data that an artifact can depend on.
///
/// The discriminant order is part of every fingerprint, so new kinds must only be appended.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[repr(u8)]
pub enum EntityKind {
    Material,
    Model,
    Item,
    Loc,
    Mapsquare,
    Sequence,
    Skeleton,
    Frameset,
    Animgroup,
    Npc,
    Framebase,
    Texture,
    Enum,
    Overlay,
    Underlay,
}

impl EntityKind {
    pub const ALL: [EntityKind; 15] = [
        EntityKind::Material,
        EntityKind::Model,
        EntityKind::Item,
        EntityKind::Loc,
        EntityKind::Mapsquare,
        EntityKind::Sequence,
        EntityKind::Skeleton,
        EntityKind::Frameset,
        EntityKind::Animgroup,
        EntityKind::Npc,
        EntityKind::Framebase,
        EntityKind::Texture,
        EntityKind::Enum,
        EntityKind::Overlay,
        EntityKind::Underlay,
    ];

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Material => "material",
            EntityKind::Model => "model",
            EntityKind::Item => "item",
            EntityKind::Loc => "loc",
            EntityKind::Mapsquare => "mapsquare",
            EntityKind::Sequence => "sequence",
            EntityKind::Skeleton => "skeleton",
            EntityKind::Frameset => "frameset",
            EntityKind::Animgroup => "animgroup",
            EntityKind::Npc => "npc",
            EntityKind::Framebase => "framebase",
            EntityKind::Texture => "texture",
            EntityKind::Enum => "enum",
            EntityKind::Overlay => "overlay",
            EntityKind::Underlay => "underlay",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: i32,
}

impl EntityKey {
    pub const fn new(kind: EntityKind, id: i32) -> Self {
        Self { kind, id }
    }

    pub const fn mapsquare(x: i32, z: i32) -> Self {
        Self::new(EntityKind::Mapsquare, mapforge_core::mapsquare_id(x, z))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
