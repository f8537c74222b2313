//! Armor definitions.

use serde::{Deserialize, Serialize};

use super::item::DamageType;
use super::map_data::MovementType;
use super::voxel::LOFT_UNIT;
use crate::math::{percent_to_fixed, Fixed};

/// Which side of a unit took a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArmorSide {
    /// Facing side.
    Front,
    /// Left flank.
    Left,
    /// Right flank.
    Right,
    /// Back.
    Rear,
    /// Underside (explosions, falls).
    Under,
}

impl ArmorSide {
    /// All sides in table order.
    pub const ALL: [Self; 5] = [Self::Front, Self::Left, Self::Right, Self::Rear, Self::Under];

    /// Table index.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Static definition of an armor (also the body of aliens and tanks).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleArmor {
    /// Unique id.
    pub id: String,

    /// Armor value per [`ArmorSide`].
    pub armor: [i32; 5],

    /// Damage taken per [`DamageType`], in percent. Missing entries are 100.
    #[serde(default)]
    pub damage_modifiers: Vec<(DamageType, i32)>,

    /// Movement type granted.
    #[serde(default)]
    pub movement: MovementType,

    /// Item id left behind on death.
    #[serde(default)]
    pub corpse_item: Option<String>,

    /// LOFT template describing the unit's horizontal cross-section.
    #[serde(default = "default_loft")]
    pub loft_template: u8,

    /// Height in voxels when standing.
    #[serde(default = "default_stand_height")]
    pub stand_height: i32,

    /// Height in voxels when kneeling.
    #[serde(default = "default_kneel_height")]
    pub kneel_height: i32,
}

const fn default_loft() -> u8 {
    LOFT_UNIT
}

const fn default_stand_height() -> i32 {
    22
}

const fn default_kneel_height() -> i32 {
    14
}

impl RuleArmor {
    /// Damage multiplier for a damage type.
    #[must_use]
    pub fn damage_modifier(&self, damage_type: DamageType) -> Fixed {
        let percent = self
            .damage_modifiers
            .iter()
            .find(|(kind, _)| *kind == damage_type)
            .map_or(100, |(_, percent)| *percent);
        percent_to_fixed(percent)
    }

    /// Armor value on a side.
    #[must_use]
    pub const fn side(&self, side: ArmorSide) -> i32 {
        self.armor[side.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_damage_modifier_defaults_to_full() {
        let armor = RuleArmor {
            id: "suit".into(),
            armor: [12, 8, 8, 5, 2],
            damage_modifiers: vec![(DamageType::Incendiary, 50)],
            movement: MovementType::Walk,
            corpse_item: None,
            loft_template: LOFT_UNIT,
            stand_height: 22,
            kneel_height: 14,
        };
        assert_eq!(armor.damage_modifier(DamageType::Incendiary), percent_to_fixed(50));
        assert_eq!(armor.damage_modifier(DamageType::Laser), Fixed::ONE);
        assert_eq!(armor.side(ArmorSide::Under), 2);
    }
}
