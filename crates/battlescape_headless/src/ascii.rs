//! ASCII rendering of a battle.
//!
//! One character per tile, north at the top. Units win over everything,
//! then fire and smoke, then ground items, then terrain.
//!
//! | Symbol | Meaning |
//! |--------|---------|
//! | `@` `X` `&` | player, alien, civilian unit |
//! | `^` | fire |
//! | `~` | smoke |
//! | `%` | items on the ground |
//! | `#` | object |
//! | `+` | door |
//! | `\|` `-` | west, north wall |
//! | `.` | floor |
//! | ` ` | open air |

use std::fmt::Write;

use battlescape_core::position::Position;
use battlescape_core::rules::TilePart;
use battlescape_core::saved_battle::SavedBattleGame;
use battlescape_core::tile::Tile;
use battlescape_core::unit::Faction;

/// Rendering options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsciiConfig {
    /// Draw smoke and fire over terrain.
    pub show_environment: bool,
    /// Print a header line per level.
    pub headers: bool,
}

impl Default for AsciiConfig {
    fn default() -> Self {
        Self {
            show_environment: true,
            headers: true,
        }
    }
}

fn tile_symbol(save: &SavedBattleGame, tile: &Tile, config: AsciiConfig) -> char {
    if let Some(unit) = tile.unit().and_then(|id| save.unit(id)) {
        return match unit.faction() {
            Faction::Player => '@',
            Faction::Hostile => 'X',
            Faction::Neutral => '&',
        };
    }
    if config.show_environment {
        if tile.fire() > 0 {
            return '^';
        }
        if tile.smoke() > 0 {
            return '~';
        }
    }
    if !tile.inventory().is_empty() {
        return '%';
    }
    if tile.part(TilePart::Object).is_some() {
        return '#';
    }
    let is_door = |slot| tile.part(slot).is_some_and(|part| part.door || part.ufo_door);
    if is_door(TilePart::WestWall) || is_door(TilePart::NorthWall) {
        return '+';
    }
    if tile.part(TilePart::WestWall).is_some() {
        return '|';
    }
    if tile.part(TilePart::NorthWall).is_some() {
        return '-';
    }
    if tile.part(TilePart::Floor).is_some() {
        return '.';
    }
    ' '
}

/// Render one level.
#[must_use]
pub fn render_level(save: &SavedBattleGame, z: i32, config: AsciiConfig) -> String {
    let (width, length, _) = save.dimensions();
    let mut out = String::with_capacity(((width + 1) * length) as usize);
    for y in 0..length {
        for x in 0..width {
            let symbol = save
                .tile(Position::new(x, y, z))
                .map_or(' ', |tile| tile_symbol(save, tile, config));
            out.push(symbol);
        }
        out.push('\n');
    }
    out
}

/// Render every level, top level first.
#[must_use]
pub fn render(save: &SavedBattleGame, config: AsciiConfig) -> String {
    let (_, _, height) = save.dimensions();
    let mut out = String::new();
    if config.headers {
        let _ = writeln!(out, "turn {} ({:?})", save.turn(), save.side());
    }
    for z in (0..height).rev() {
        if config.headers {
            let _ = writeln!(out, "level {z}");
        }
        out.push_str(&render_level(save, z, config));
    }
    out
}
