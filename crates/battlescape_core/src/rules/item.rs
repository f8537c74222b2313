//! Item type definitions.

use serde::{Deserialize, Serialize};

/// How an item behaves in battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BattleType {
    /// Inert equipment.
    #[default]
    None,
    /// Gun that fires projectiles.
    Firearm,
    /// Clip for a firearm.
    Ammo,
    /// Close combat weapon.
    Melee,
    /// Thrown explosive with a turn fuse.
    Grenade,
    /// Explosive that triggers when a unit steps next to it.
    ProximityGrenade,
    /// Healing kit with limited charges.
    Medikit,
    /// Motion scanner.
    Scanner,
    /// Reveals enemy stats.
    MindProbe,
    /// Psionic amplifier.
    PsiAmp,
    /// Light source when dropped.
    Flare,
    /// Remains of a unit.
    Corpse,
}

/// Kind of damage an item deals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DamageType {
    /// No damage (line of sight checks).
    #[default]
    None,
    /// Armor piercing bullets.
    ArmorPiercing,
    /// Fire.
    Incendiary,
    /// High explosive blast.
    HighExplosive,
    /// Laser beam.
    Laser,
    /// Plasma bolt.
    Plasma,
    /// Non-lethal stun.
    Stun,
    /// Close combat.
    Melee,
    /// Acid.
    Acid,
    /// Smoke cloud.
    Smoke,
}

impl DamageType {
    /// Number of variants, for per-type tables.
    pub const COUNT: usize = 10;

    /// Table index.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Damage that only affects the voxel it hits.
    #[must_use]
    pub const fn is_direct(self) -> bool {
        matches!(
            self,
            Self::ArmorPiercing | Self::Laser | Self::Plasma | Self::Melee | Self::Acid
        )
    }

    /// Damage that spreads from the impact point.
    #[must_use]
    pub const fn is_area(self) -> bool {
        matches!(
            self,
            Self::HighExplosive | Self::Incendiary | Self::Smoke | Self::Stun
        )
    }
}

/// Static definition of an item type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleItem {
    /// Unique id, e.g. "rifle".
    pub id: String,

    /// Battle behaviour.
    pub battle_type: BattleType,

    /// Damage dealt by this item (or by projectiles it fires as ammo).
    #[serde(default)]
    pub damage_type: DamageType,

    /// Damage power.
    #[serde(default)]
    pub power: i32,

    /// Snap shot accuracy percent.
    #[serde(default)]
    pub accuracy_snap: i32,

    /// Auto shot accuracy percent (per bullet).
    #[serde(default)]
    pub accuracy_auto: i32,

    /// Aimed shot accuracy percent.
    #[serde(default)]
    pub accuracy_aimed: i32,

    /// Melee accuracy percent.
    #[serde(default)]
    pub accuracy_melee: i32,

    /// Snap shot cost, percent of the unit's maximum TU.
    #[serde(default)]
    pub tu_snap: i32,

    /// Auto shot cost, percent of maximum TU.
    #[serde(default)]
    pub tu_auto: i32,

    /// Aimed shot cost, percent of maximum TU.
    #[serde(default)]
    pub tu_aimed: i32,

    /// Melee cost, percent of maximum TU.
    #[serde(default)]
    pub tu_melee: i32,

    /// Use cost (medikit, psi), percent of maximum TU.
    #[serde(default)]
    pub tu_use: i32,

    /// Rounds per clip; negative means unlimited.
    #[serde(default = "default_clip")]
    pub clip_size: i32,

    /// Ammo ids this weapon accepts; empty means self-powered.
    #[serde(default)]
    pub compatible_ammo: Vec<String>,

    /// How much the AI wants to pick it up.
    #[serde(default)]
    pub attraction: i32,

    /// Inventory footprint width.
    #[serde(default = "default_size")]
    pub inventory_width: i32,

    /// Inventory footprint height.
    #[serde(default = "default_size")]
    pub inventory_height: i32,

    /// Weight for encumbrance and throwing.
    #[serde(default = "default_size")]
    pub weight: i32,

    /// Explosion radius in tiles; negative derives it from power.
    #[serde(default = "default_radius")]
    pub blast_radius: i32,

    /// Maximum aimed shot range in tiles.
    #[serde(default = "default_range")]
    pub max_range: i32,

    /// Needs both hands.
    #[serde(default)]
    pub two_handed: bool,

    /// Medikit heal charges.
    #[serde(default)]
    pub heal_quantity: i32,

    /// Medikit stimulant charges.
    #[serde(default)]
    pub stimulant_quantity: i32,

    /// Medikit painkiller charges.
    #[serde(default)]
    pub painkiller_quantity: i32,

    /// Health restored per heal charge.
    #[serde(default)]
    pub heal_amount: i32,

    /// Stun removed and energy restored per stimulant charge.
    #[serde(default)]
    pub stimulant_amount: i32,
}

const fn default_clip() -> i32 {
    -1
}

const fn default_size() -> i32 {
    1
}

const fn default_radius() -> i32 {
    -1
}

const fn default_range() -> i32 {
    200
}

impl RuleItem {
    /// True for guns that need a clip loaded before they can fire.
    #[must_use]
    pub fn needs_ammo(&self) -> bool {
        !self.compatible_ammo.is_empty()
    }

    /// True if `ammo_id` fits this weapon.
    #[must_use]
    pub fn accepts_ammo(&self, ammo_id: &str) -> bool {
        self.compatible_ammo.iter().any(|id| id == ammo_id)
    }

    /// Cells the item takes in an inventory grid.
    #[must_use]
    pub const fn inventory_cells(&self) -> i32 {
        self.inventory_width * self.inventory_height
    }

    /// Explosion radius, derived from power when not set explicitly.
    #[must_use]
    pub const fn explosion_radius(&self, decay_per_tile: i32) -> i32 {
        if self.blast_radius >= 0 {
            self.blast_radius
        } else if decay_per_tile > 0 {
            self.power / decay_per_tile
        } else {
            0
        }
    }

    /// True for items whose effect is thrown rather than fired.
    #[must_use]
    pub const fn is_grenade(&self) -> bool {
        matches!(
            self.battle_type,
            BattleType::Grenade | BattleType::ProximityGrenade
        )
    }
}
