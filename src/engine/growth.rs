use crate::config::MapParams;
use crate::constants::{
    NEUTRAL_CITY_GROWTH, NEUTRAL_LORD_GROWTH, OWNED_CITY_GROWTH, OWNED_LORD_GROWTH,
    TERRITORY_GROWTH,
};
use crate::types::{GameState, Tile};

/// Growth for one tile on `tick`. Each tile takes at most one branch.
pub fn growth_for(tile: &Tile, tick: u64, params: &MapParams) -> i32 {
    if tile.is_mountain {
        return 0;
    }
    let owned = !tile.owner.is_neutral();
    if tile.is_lord {
        return if owned {
            OWNED_LORD_GROWTH
        } else {
            NEUTRAL_LORD_GROWTH
        };
    }
    if tile.is_city {
        if owned {
            return OWNED_CITY_GROWTH;
        }
        return if tick % params.city_growth_interval == 0 {
            NEUTRAL_CITY_GROWTH
        } else {
            0
        };
    }
    if owned && tick % params.territory_growth_interval == 0 {
        return TERRITORY_GROWTH;
    }
    0
}

pub fn apply_growth(state: &mut GameState, params: &MapParams) {
    let tick = state.tick;
    for tile in &mut state.tiles {
        let gain = growth_for(tile, tick, params);
        if gain > 0 {
            tile.army = tile.army.saturating_add(gain);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Owner, PlayerId};

    fn tile(owned: bool, lord: bool, city: bool) -> Tile {
        let mut tile = Tile::neutral(0, 0);
        if owned {
            tile.owner = Owner::Player(PlayerId::new("p1"));
        }
        tile.is_lord = lord;
        tile.is_city = city;
        tile
    }

    #[test]
    fn lords_grow_every_tick() {
        let params = MapParams::default();
        assert_eq!(growth_for(&tile(true, true, false), 3, &params), 2);
        assert_eq!(growth_for(&tile(false, true, false), 3, &params), 1);
    }

    #[test]
    fn neutral_city_grows_only_on_interval() {
        let params = MapParams::default();
        let city = tile(false, false, true);
        assert_eq!(growth_for(&city, 4, &params), 0);
        assert_eq!(growth_for(&city, 5, &params), 1);
        assert_eq!(growth_for(&tile(true, false, true), 4, &params), 1);
    }

    #[test]
    fn plain_owned_tile_grows_every_twentieth_tick() {
        let params = MapParams::default();
        let plain = tile(true, false, false);
        assert_eq!(growth_for(&plain, 19, &params), 0);
        assert_eq!(growth_for(&plain, 20, &params), 1);
        assert_eq!(growth_for(&tile(false, false, false), 20, &params), 0);
    }

    #[test]
    fn lord_on_city_takes_only_the_lord_branch() {
        let params = MapParams::default();
        assert_eq!(growth_for(&tile(true, true, true), 20, &params), 2);
    }

    #[test]
    fn mountains_never_grow() {
        let params = MapParams::default();
        let mut mountain = tile(false, false, false);
        mountain.is_mountain = true;
        assert_eq!(growth_for(&mountain, 20, &params), 0);
    }
}
