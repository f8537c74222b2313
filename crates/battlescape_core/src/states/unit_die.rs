//! A unit going down, dead or unconscious.

use tracing::{debug, warn};

use crate::position::Direction;
use crate::rules::DamageType;
use crate::unit::{Faction, UnitId, UnitStatus};

use super::{CasualtyEvent, StateContext, Step};

/// The collapse of `victim`.
///
/// The unit turns, falls over and comes to rest. A unit blown apart by
/// high explosive skips straight to the end; one already lying
/// unconscious just changes status. Its inventory drops to the floor, its body becomes a corpse
/// item, and the tile is freed.
#[derive(Debug)]
pub struct UnitDie {
    victim: UnitId,
    damage_type: DamageType,
    murderer: Option<UnitId>,
}

impl UnitDie {
    /// Death or knockout of `victim`.
    #[must_use]
    pub const fn new(victim: UnitId, damage_type: DamageType, murderer: Option<UnitId>) -> Self {
        Self {
            victim,
            damage_type,
            murderer,
        }
    }

    /// The falling unit.
    #[must_use]
    pub const fn victim(&self) -> UnitId {
        self.victim
    }

    pub(super) fn init(&mut self, ctx: &mut StateContext<'_>) -> Step {
        let Some(unit) = ctx.save.unit_mut(self.victim) else {
            return Step::Done;
        };
        match unit.status() {
            UnitStatus::Dead => return Step::Done,
            UnitStatus::Unconscious => {
                // already off the map with its body on the floor
                if unit.health() == 0 {
                    unit.set_status(UnitStatus::Dead);
                    ctx.events.casualties.push(CasualtyEvent {
                        victim: self.victim,
                        murderer: self.murderer,
                        killed: true,
                    });
                    debug!(unit = %self.victim, "Unconscious unit died");
                }
                return Step::Done;
            }
            _ => {}
        }
        if self.damage_type == DamageType::HighExplosive {
            let status = if unit.health() == 0 {
                UnitStatus::Dead
            } else {
                UnitStatus::Unconscious
            };
            unit.set_status(status);
        } else {
            unit.abort_turn();
            unit.look_at_direction(Direction::SouthEast);
        }
        Step::Continue
    }

    pub(super) fn think(&mut self, ctx: &mut StateContext<'_>) -> Step {
        let ticks = ctx.config.collapse_ticks;
        let Some(unit) = ctx.save.unit_mut(self.victim) else {
            return Step::Done;
        };
        match unit.status() {
            UnitStatus::Turning => {
                unit.turn();
                Step::Continue
            }
            UnitStatus::Collapsing => {
                unit.keep_falling(ticks);
                Step::Continue
            }
            UnitStatus::Dead | UnitStatus::Unconscious => {
                self.finish(ctx);
                Step::Done
            }
            _ => {
                unit.start_falling();
                Step::Continue
            }
        }
    }

    fn finish(&self, ctx: &mut StateContext<'_>) {
        let Some(unit) = ctx.save.unit_mut(self.victim) else {
            return;
        };
        let position = unit.position();
        let killed = unit.status() == UnitStatus::Dead;
        let corpse = unit.armor_rules().corpse_item.clone();
        unit.clear_visible_units();
        unit.set_visible(false);
        unit.set_dont_reselect(true);
        let ai = unit.take_ai();
        if let Some(mut ai) = ai {
            ai.exit(ctx.save);
            if !killed {
                if let Some(unit) = ctx.save.unit_mut(self.victim) {
                    unit.set_ai(Some(ai));
                }
            }
        }

        let alien_turn = ctx.save.side() == Faction::Hostile;
        for item in ctx.save.unit_items(self.victim) {
            if ctx.save.drop_item(item, position) && alien_turn {
                if let Some(dropped) = ctx.save.item_mut(item) {
                    dropped.set_dropped_on_alien_turn(true);
                }
            }
        }
        ctx.save.remove_unit_from_tile(self.victim);

        if let Some(corpse) = corpse {
            match ctx.save.create_item(&corpse) {
                Ok(body) => {
                    if let Some(item) = ctx.save.item_mut(body) {
                        item.set_unit(Some(self.victim));
                    }
                    ctx.save.drop_item(body, position);
                }
                Err(err) => warn!(unit = %self.victim, %corpse, %err, "No corpse item"),
            }
        }

        let mut engine = ctx.engine();
        engine.calculate_terrain_lighting();
        engine.calculate_unit_lighting();
        engine.calculate_fov_at(position);

        if ctx.save.selected_unit() == Some(self.victim) {
            ctx.save.set_selected_unit(None);
        }
        ctx.events.casualties.push(CasualtyEvent {
            victim: self.victim,
            murderer: self.murderer,
            killed,
        });
        debug!(unit = %self.victim, %position, killed, murderer = ?self.murderer, "Unit down");
    }
}
