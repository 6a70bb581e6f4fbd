//! Non-player entities owned by chunks.
//!
//! The world core only needs identity and position from an entity; AI and
//! physics live elsewhere and drive entities through [`NonPlayerEntity`].
//! [`Mob`] is the stock implementation carrying the state clients are sent.

use std::collections::BTreeMap;
use std::fmt;

use crate::coords::AbsPos;

/// Server-wide entity identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An entity that is owned by exactly one chunk at a time.
pub trait NonPlayerEntity: fmt::Debug + Send + Sync {
    /// Stable identifier.
    fn id(&self) -> EntityId;

    /// Current position.
    fn position(&self) -> AbsPos;

    /// Moves the entity. Ownership does not follow automatically; callers
    /// hand the entity to the new chunk's shard when it crosses a border.
    fn set_position(&mut self, position: AbsPos);
}

/// Velocity in blocks per tick.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Velocity {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
    /// Z component.
    pub z: f64,
}

/// Facing, in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Look {
    /// Rotation around the vertical axis.
    pub yaw: f32,
    /// Rotation above/below the horizon.
    pub pitch: f32,
}

/// Kinds of mob known to the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MobKind {
    Creeper,
    Skeleton,
    Spider,
    Pig,
    Sheep,
    Cow,
    Hen,
    Squid,
    Wolf,
}

impl MobKind {
    /// Protocol type id.
    pub fn type_id(self) -> u8 {
        match self {
            MobKind::Creeper => 50,
            MobKind::Skeleton => 51,
            MobKind::Spider => 52,
            MobKind::Pig => 90,
            MobKind::Sheep => 91,
            MobKind::Cow => 92,
            MobKind::Hen => 93,
            MobKind::Squid => 94,
            MobKind::Wolf => 95,
        }
    }

    /// Returns `true` for mobs hostile to players.
    pub fn is_hostile(self) -> bool {
        matches!(self, MobKind::Creeper | MobKind::Skeleton | MobKind::Spider)
    }
}

/// Metadata slot holding entity flags.
const META_FLAGS: u8 = 0;
/// Flag bit: entity is on fire.
const FLAG_BURNING: u8 = 0x01;
/// Creeper fuse state slot.
const META_CREEPER_STATE: u8 = 17;

/// A mob's replicated state.
#[derive(Clone, Debug)]
pub struct Mob {
    id: EntityId,
    kind: MobKind,
    position: AbsPos,
    velocity: Velocity,
    look: Look,
    metadata: BTreeMap<u8, u8>,
}

impl Mob {
    /// Creates a motionless mob of `kind` at `position` with its per-kind
    /// default metadata.
    pub fn new(id: EntityId, kind: MobKind, position: AbsPos) -> Self {
        let mut metadata = BTreeMap::from([(META_FLAGS, 0), (16, 0)]);
        match kind {
            MobKind::Creeper => {
                metadata.insert(16, 255);
                metadata.insert(META_CREEPER_STATE, 0);
            }
            MobKind::Wolf => {
                metadata.insert(17, 0);
                metadata.insert(18, 0);
            }
            _ => {}
        }
        Self {
            id,
            kind,
            position,
            velocity: Velocity::default(),
            look: Look::default(),
            metadata,
        }
    }

    /// The mob's kind.
    pub fn kind(&self) -> MobKind {
        self.kind
    }

    /// Current velocity.
    pub fn velocity(&self) -> Velocity {
        self.velocity
    }

    /// Replaces the velocity.
    pub fn set_velocity(&mut self, velocity: Velocity) {
        self.velocity = velocity;
    }

    /// Current facing.
    pub fn look(&self) -> Look {
        self.look
    }

    /// Replaces the facing.
    pub fn set_look(&mut self, look: Look) {
        self.look = look;
    }

    /// Sets or clears the burning flag.
    pub fn set_burning(&mut self, burning: bool) {
        let flags = self.metadata.entry(META_FLAGS).or_insert(0);
        if burning {
            *flags |= FLAG_BURNING;
        } else {
            *flags &= !FLAG_BURNING;
        }
    }

    /// Returns `true` if the burning flag is set.
    pub fn is_burning(&self) -> bool {
        self.metadata
            .get(&META_FLAGS)
            .is_some_and(|f| f & FLAG_BURNING != 0)
    }

    /// Switches a creeper between its normal and blue-aura states. Ignored
    /// for other kinds.
    pub fn set_blue_aura(&mut self, aura: bool) {
        if self.kind == MobKind::Creeper {
            self.metadata.insert(META_CREEPER_STATE, u8::from(aura));
        }
    }

    /// Metadata as `(slot, value)` pairs in slot order.
    pub fn metadata(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.metadata.iter().map(|(&k, &v)| (k, v))
    }
}

impl NonPlayerEntity for Mob {
    fn id(&self) -> EntityId {
        self.id
    }

    fn position(&self) -> AbsPos {
        self.position
    }

    fn set_position(&mut self, position: AbsPos) {
        self.position = position;
    }
}
