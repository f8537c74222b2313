//! Resolving a blast or a direct hit.

use tracing::debug;

use crate::position::Position;
use crate::rules::{DamageType, RuleItem};
use crate::tile_engine::TileEngine;
use crate::unit::UnitId;

use super::{BattleState, ExplosionEvent, StateContext, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Spread {
    /// A bullet or blow landing on one voxel.
    Hit,
    /// A blast; a negative radius is derived from the power.
    Area { blast_radius: i32 },
}

/// Damage landing on a voxel after a short animation.
///
/// Once resolved, the state asks for a casualty check and, if the damage
/// set off an explosive terrain part, queues that part's blast next.
#[derive(Debug)]
pub struct Explosion {
    center: Position,
    power: i32,
    damage_type: DamageType,
    spread: Spread,
    attacker: Option<UnitId>,
    terrain: bool,
    ticks: u32,
}

impl Explosion {
    /// Impact of a round. Explosive, incendiary and smoke rounds burst;
    /// everything else hits the voxel it reached.
    #[must_use]
    pub fn projectile(center: Position, ammo: &RuleItem, attacker: Option<UnitId>) -> Self {
        let spread = match ammo.damage_type {
            DamageType::HighExplosive | DamageType::Incendiary | DamageType::Smoke => Spread::Area {
                blast_radius: ammo.blast_radius,
            },
            _ => Spread::Hit,
        };
        Self {
            center,
            power: ammo.power,
            damage_type: ammo.damage_type,
            spread,
            attacker,
            terrain: false,
            ticks: 0,
        }
    }

    /// A grenade going off.
    #[must_use]
    pub fn grenade(center: Position, grenade: &RuleItem, attacker: Option<UnitId>) -> Self {
        Self {
            center,
            power: grenade.power,
            damage_type: grenade.damage_type,
            spread: Spread::Area {
                blast_radius: grenade.blast_radius,
            },
            attacker,
            terrain: false,
            ticks: 0,
        }
    }

    /// An explosive terrain part going off.
    #[must_use]
    pub fn terrain(center: Position, power: i32) -> Self {
        Self {
            center,
            power,
            damage_type: DamageType::HighExplosive,
            spread: Spread::Area { blast_radius: -1 },
            attacker: None,
            terrain: true,
            ticks: 0,
        }
    }

    /// Centre voxel.
    #[must_use]
    pub const fn center(&self) -> Position {
        self.center
    }

    /// Power at the centre.
    #[must_use]
    pub const fn power(&self) -> i32 {
        self.power
    }

    pub(super) fn init(&mut self, _ctx: &mut StateContext<'_>) -> Step {
        self.ticks = 0;
        Step::Continue
    }

    pub(super) fn think(&mut self, ctx: &mut StateContext<'_>) -> Step {
        self.ticks += 1;
        if self.ticks < ctx.config.explosion_ticks {
            return Step::Continue;
        }

        let mut engine = TileEngine::new(ctx.save, ctx.config);
        let report = match self.spread {
            Spread::Hit => engine.hit(self.center, self.power, self.damage_type, self.attacker, ctx.rng),
            Spread::Area { blast_radius } => {
                let radius = if blast_radius >= 0 {
                    blast_radius
                } else {
                    self.power / ctx.config.balance.explosion_decay_per_tile.max(1)
                };
                engine.explode(self.center, self.power, self.damage_type, radius, self.attacker, ctx.rng)
            }
        };
        engine.calculate_terrain_lighting();
        let chained = engine.check_for_terrain_explosions();

        if let Some(attacker) = self.attacker {
            for (victim, _) in &report.units {
                if *victim == attacker {
                    continue;
                }
                if let Some(unit) = ctx.save.unit_mut(*victim) {
                    if let Some(mut ai) = unit.take_ai() {
                        ai.set_was_hit_by(attacker);
                        unit.set_ai(Some(ai));
                    }
                }
            }
        }
        debug!(
            center = %self.center,
            power = self.power,
            damage = ?self.damage_type,
            units = report.units.len(),
            tiles = report.tiles.len(),
            "Explosion resolved"
        );
        ctx.events.explosions.push(ExplosionEvent {
            center: self.center,
            power: self.power,
            damage_type: self.damage_type,
            units_hit: report.units.iter().map(|(id, _)| *id).collect(),
        });

        ctx.check_for_casualties(self.attacker, Some(self.damage_type), self.terrain);
        if let Some((voxel, power)) = chained {
            debug!(%voxel, power, "Terrain explosion chained");
            ctx.push_next(BattleState::Explosion(Self::terrain(voxel, power)));
        }
        Step::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::states::{BattleEvents, Request};
    use crate::test_fixtures::{flat_battle, parts, place, rules, ScriptedRng};
    use crate::unit::Faction;

    fn resolve(state: &mut Explosion, ctx: &mut StateContext<'_>) {
        assert_eq!(state.init(ctx), Step::Continue);
        let mut ticks = 0;
        while state.think(ctx) == Step::Continue {
            ticks += 1;
            assert!(ticks < 10);
        }
    }

    #[test]
    fn test_grenade_blast_hurts_nearby_units() {
        let mut save = flat_battle(10, 10, 1);
        let near = save.add_unit("sectoid", Faction::Hostile, Position::new(5, 5, 0)).unwrap();
        let far = save.add_unit("sectoid", Faction::Hostile, Position::new(9, 9, 0)).unwrap();
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[50]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let rules = rules();
        let grenade = rules.item("grenade").unwrap();
        let center = Position::new(5, 5, 0).to_voxel_center() + Position::new(0, 0, 2);
        let mut blast = Explosion::grenade(center, &grenade, None);
        resolve(&mut blast, &mut ctx);
        let requests = ctx.into_requests();
        assert!(matches!(requests.as_slice(), [Request::CheckCasualties { terrain: false, .. }]));

        assert_eq!(events.explosions.len(), 1);
        assert!(events.explosions[0].units_hit.contains(&near));
        assert!(!events.explosions[0].units_hit.contains(&far));
        assert!(save.unit(near).unwrap().health() < 30);
        assert_eq!(save.unit(far).unwrap().health(), 30);
    }

    #[test]
    fn test_barrel_chains_a_terrain_explosion() {
        let mut save = flat_battle(8, 3, 1);
        place(&mut save, Position::new(3, 1, 0), parts::BARREL);
        let config = SimulationConfig::default();
        let mut rng = ScriptedRng::new(&[0]);
        let mut events = BattleEvents::default();
        let mut ctx = StateContext::new(&mut save, &config, &mut rng, &mut events);

        let mut blast = Explosion::terrain(Position::new(2, 1, 0).to_voxel_center(), 60);
        resolve(&mut blast, &mut ctx);
        let requests = ctx.into_requests();
        match requests.as_slice() {
            [Request::CheckCasualties { terrain: true, .. }, Request::PushNext(BattleState::Explosion(chained))] => {
                assert_eq!(chained.power(), 40);
                assert_eq!(chained.center().voxel_to_tile(), Position::new(3, 1, 0));
            }
            other => panic!("unexpected requests {other:?}"),
        }
        assert!(save.objective_destroyed());
    }
}
