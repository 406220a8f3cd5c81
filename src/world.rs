use std::collections::HashSet;

use tracing::{debug, warn};

use crate::config::MapParams;
use crate::constants::{player_color, territory_color, territory_seed_spacing};
use crate::error::GenerationError;
use crate::grid::{coord_of, index_of, neighbors4};
use crate::rng::Rng;
use crate::types::{Coord, MatchPlayer, Owner, Player, Territory, TerritoryId, Tile, Unit};

const SEED_ATTEMPTS_BEFORE_RELAXING: usize = 200;
const SEED_SPACING_RELAX_FACTOR: f32 = 0.8;
const BORDER_NOISE_FREQUENCY: f32 = 0.3;
const BORDER_NOISE_AMPLITUDE: f32 = 2.0;

#[derive(Clone, Debug)]
pub struct GeneratedMap {
    pub tiles: Vec<Tile>,
    pub territories: Vec<Territory>,
    pub players: Vec<Player>,
    pub units: Vec<Unit>,
    pub lord_tiles: Vec<Coord>,
}

pub fn generate_map(
    params: &MapParams,
    match_players: &[MatchPlayer],
    rng: &mut Rng,
) -> Result<GeneratedMap, GenerationError> {
    params.validate()?;
    if match_players.is_empty() {
        return Err(GenerationError::NoPlayers);
    }

    let mut tiles = generate_initial_tiles(params.width, params.height);
    let seeds = scatter_territory_seeds(params, rng);
    assign_territories(&mut tiles, params.width, &seeds);

    let border = collect_border_tiles(&tiles, params.width, params.height);
    place_mountains(&mut tiles, border, params, rng);
    place_cities(&mut tiles, params, rng);

    let mut territories: Vec<Territory> = (0..seeds.len())
        .map(|idx| Territory {
            id: idx as TerritoryId,
            color: territory_color(idx).to_string(),
            lord_tile: None,
        })
        .collect();
    for territory in &mut territories {
        territory.lord_tile = place_territory_anchor(&mut tiles, territory.id, params);
        if territory.lord_tile.is_none() {
            warn!(territory = territory.id, "territory has no tile for a neutral anchor");
        }
    }

    let mut players = Vec::with_capacity(match_players.len());
    let mut units = Vec::with_capacity(match_players.len());
    let mut lord_tiles = Vec::with_capacity(match_players.len());
    for (index, start) in match_players.iter().enumerate() {
        let Some(idx) = find_lord_slot(&tiles, params, index, rng) else {
            return Err(GenerationError::LordPlacement(start.id.clone()));
        };
        let tile = &mut tiles[idx];
        tile.owner = Owner::Player(start.id.clone());
        tile.is_lord = true;
        tile.army = params.player_lord_army;
        lord_tiles.push(tile.coord());

        players.push(Player {
            id: start.id.clone(),
            name: start.name.clone(),
            color: player_color(index).to_string(),
        });
        units.push(Unit {
            id: uuid::Uuid::new_v4().to_string(),
            controlled_by: start.id.clone(),
            position: tile.coord(),
            army_size: tile.army,
        });
    }

    debug!(
        width = params.width,
        height = params.height,
        territories = territories.len(),
        players = players.len(),
        "map generated"
    );

    Ok(GeneratedMap {
        tiles,
        territories,
        players,
        units,
        lord_tiles,
    })
}

pub fn generate_initial_tiles(width: i32, height: i32) -> Vec<Tile> {
    let mut tiles = Vec::with_capacity((width.max(0) * height.max(0)) as usize);
    for y in 0..height {
        for x in 0..width {
            tiles.push(Tile::neutral(x, y));
        }
    }
    tiles
}

fn scatter_territory_seeds(params: &MapParams, rng: &mut Rng) -> Vec<Coord> {
    let (width, height) = (params.width, params.height);
    let min_x = (width as f32 * 0.1).floor() as i32;
    let max_x = ((width as f32 * 0.9).floor() as i32).min(width - 1).max(min_x);
    let min_y = (height as f32 * 0.1).floor() as i32;
    let max_y = ((height as f32 * 0.9).floor() as i32).min(height - 1).max(min_y);

    let mut spacing = territory_seed_spacing(width, height, params.territory_count);
    let mut seeds: Vec<Coord> = Vec::with_capacity(params.territory_count);
    let mut attempts = 0;
    while seeds.len() < params.territory_count {
        let candidate = Coord::new(rng.int(min_x, max_x), rng.int(min_y, max_y));
        let too_close = seeds
            .iter()
            .any(|seed| euclidean(*seed, candidate) < spacing || *seed == candidate);
        if !too_close {
            seeds.push(candidate);
            attempts = 0;
            continue;
        }
        attempts += 1;
        if attempts >= SEED_ATTEMPTS_BEFORE_RELAXING {
            spacing *= SEED_SPACING_RELAX_FACTOR;
            attempts = 0;
            if spacing < 0.5 {
                // Sampling box is exhausted; take any unused tile.
                let Some(free) = (0..width * height)
                    .map(|i| coord_of(width, i as usize))
                    .find(|c| !seeds.contains(c))
                else {
                    break;
                };
                seeds.push(free);
            }
        }
    }
    seeds
}

fn border_noise(at: Coord, seed_index: usize) -> f32 {
    let phase = seed_index as f32 * 1.7;
    ((at.x as f32 * BORDER_NOISE_FREQUENCY + phase).sin()
        + (at.y as f32 * BORDER_NOISE_FREQUENCY + phase).cos())
        * BORDER_NOISE_AMPLITUDE
}

fn assign_territories(tiles: &mut [Tile], width: i32, seeds: &[Coord]) {
    for (idx, tile) in tiles.iter_mut().enumerate() {
        let at = coord_of(width, idx);
        let mut best: Option<(f32, usize)> = None;
        for (seed_index, seed) in seeds.iter().enumerate() {
            let distance = euclidean(*seed, at) + border_noise(at, seed_index);
            if best.map(|(d, _)| distance < d).unwrap_or(true) {
                best = Some((distance, seed_index));
            }
        }
        tile.territory_id = best.map(|(_, seed_index)| seed_index as TerritoryId);
    }
}

fn collect_border_tiles(tiles: &[Tile], width: i32, height: i32) -> Vec<usize> {
    let mut out = Vec::new();
    for (idx, tile) in tiles.iter().enumerate() {
        let at = coord_of(width, idx);
        let spans_territories = neighbors4(width, height, at)
            .filter_map(|n| index_of(width, height, n))
            .any(|n| tiles[n].territory_id != tile.territory_id);
        if spans_territories {
            out.push(idx);
        }
    }
    out
}

fn place_mountains(tiles: &mut [Tile], mut border: Vec<usize>, params: &MapParams, rng: &mut Rng) {
    let target = (tiles.len() as f32 * params.mountain_density).floor() as usize;
    let max_attempts = target * 20 + 100;
    let mut placed = 0;
    let mut attempts = 0;
    while placed < target && attempts < max_attempts {
        attempts += 1;
        let from_border = !border.is_empty() && rng.chance(params.border_mountain_bias);
        let idx = if from_border {
            let pos = rng.pick_index(border.len());
            border.swap_remove(pos)
        } else {
            rng.pick_index(tiles.len())
        };
        let tile = &mut tiles[idx];
        if tile.is_mountain {
            continue;
        }
        tile.is_mountain = true;
        tile.territory_id = None;
        placed += 1;
    }
    if placed < target {
        warn!(placed, target, "mountain placement stopped early");
    }
}

fn place_cities(tiles: &mut [Tile], params: &MapParams, rng: &mut Rng) {
    let target = (tiles.len() as f32 * params.city_density).floor() as usize;
    let max_attempts = target * 20 + 100;
    let mut placed = 0;
    let mut attempts = 0;
    while placed < target && attempts < max_attempts {
        attempts += 1;
        let tile = &mut tiles[rng.pick_index(tiles.len())];
        if tile.is_mountain || tile.is_city {
            continue;
        }
        tile.is_city = true;
        tile.army = params.city_starting_army;
        placed += 1;
    }
}

/// Neutral stronghold closest to the territory centroid; relaxes to allow cities.
fn place_territory_anchor(
    tiles: &mut [Tile],
    territory: TerritoryId,
    params: &MapParams,
) -> Option<Coord> {
    let in_territory = |tile: &Tile| {
        tile.territory_id == Some(territory)
            && !tile.is_mountain
            && !tile.is_lord
            && tile.owner.is_neutral()
    };
    let mut candidates: Vec<usize> = tiles
        .iter()
        .enumerate()
        .filter(|(_, tile)| in_territory(tile) && !tile.is_city)
        .map(|(idx, _)| idx)
        .collect();
    if candidates.is_empty() {
        candidates = tiles
            .iter()
            .enumerate()
            .filter(|(_, tile)| in_territory(tile))
            .map(|(idx, _)| idx)
            .collect();
    }
    if candidates.is_empty() {
        return None;
    }

    let n = candidates.len() as f32;
    let cx = candidates.iter().map(|&i| tiles[i].x as f32).sum::<f32>() / n;
    let cy = candidates.iter().map(|&i| tiles[i].y as f32).sum::<f32>() / n;
    let mut best = candidates[0];
    let mut best_distance = f32::INFINITY;
    for &idx in &candidates {
        let dx = tiles[idx].x as f32 - cx;
        let dy = tiles[idx].y as f32 - cy;
        let distance = (dx * dx + dy * dy).sqrt();
        if distance < best_distance {
            best_distance = distance;
            best = idx;
        }
    }

    let tile = &mut tiles[best];
    tile.is_lord = true;
    tile.army = params.neutral_lord_army;
    Some(tile.coord())
}

pub fn starting_slots(width: i32, height: i32) -> [Coord; 8] {
    let near = |size: i32| (size as f32 * 0.1).floor() as i32;
    let far = |size: i32| ((size as f32 * 0.9).floor() as i32 - 1).max(0);
    let mid = |size: i32| (size as f32 * 0.5).floor() as i32;
    [
        Coord::new(near(width), near(height)),
        Coord::new(far(width), far(height)),
        Coord::new(near(width), far(height)),
        Coord::new(far(width), near(height)),
        Coord::new(mid(width), near(height)),
        Coord::new(mid(width), far(height)),
        Coord::new(near(width), mid(height)),
        Coord::new(far(width), mid(height)),
    ]
}

fn is_free_for_lord(tile: &Tile) -> bool {
    !tile.is_mountain && !tile.is_city && !tile.is_lord && tile.owner.is_neutral()
}

fn find_lord_slot(
    tiles: &[Tile],
    params: &MapParams,
    player_index: usize,
    rng: &mut Rng,
) -> Option<usize> {
    let slots = starting_slots(params.width, params.height);
    for offset in 0..slots.len() {
        let slot = slots[(player_index + offset) % slots.len()];
        if let Some(idx) = index_of(params.width, params.height, slot) {
            if is_free_for_lord(&tiles[idx]) {
                return Some(idx);
            }
        }
    }

    let mut tried = HashSet::new();
    for _ in 0..tiles.len() {
        let idx = rng.pick_index(tiles.len());
        if tried.insert(idx) && is_free_for_lord(&tiles[idx]) {
            warn!(player_index, "preferred lord slots occupied; using random tile");
            return Some(idx);
        }
    }
    tiles.iter().position(is_free_for_lord)
}

fn euclidean(a: Coord, b: Coord) -> f32 {
    let dx = (a.x - b.x) as f32;
    let dy = (a.y - b.y) as f32;
    (dx * dx + dy * dy).sqrt()
}
