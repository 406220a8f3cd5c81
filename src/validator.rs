use std::collections::HashSet;

use crate::error::StateValidationFailure;
use crate::grid::{coord_of, in_bounds};
use crate::types::{Coord, GameState, Owner, PlayerId};

/// Certifies a candidate state before it is committed or broadcast.
pub fn validate_state(state: &GameState) -> Result<(), StateValidationFailure> {
    let mut errors = Vec::new();

    if state.width <= 0 || state.height <= 0 {
        errors.push(format!(
            "grid dimensions must be positive, got {}x{}",
            state.width, state.height
        ));
    } else if state.tiles.len() != (state.width * state.height) as usize {
        errors.push(format!(
            "expected {} tiles, found {}",
            state.width * state.height,
            state.tiles.len()
        ));
    }
    if state.tick_speed_ms == 0 {
        errors.push("tick interval must be positive".to_string());
    }

    let known: HashSet<&PlayerId> = state.players.iter().map(|p| &p.id).collect();
    let mut seen: HashSet<Coord> = HashSet::with_capacity(state.tiles.len());
    for (idx, tile) in state.tiles.iter().enumerate() {
        let at = tile.coord();
        if !seen.insert(at) {
            errors.push(format!("duplicate tile at {at}"));
        }
        if state.width > 0 && at != coord_of(state.width, idx) {
            errors.push(format!(
                "tile {at} stored at index {idx}, expected {}",
                coord_of(state.width, idx)
            ));
        }
        if !in_bounds(state.width, state.height, at) {
            errors.push(format!("tile {at} is outside the grid"));
        }
        if let Owner::Player(id) = &tile.owner {
            if !known.contains(id) {
                errors.push(format!("tile {at} owned by unknown player {id}"));
            }
        }
        if tile.army < 0 {
            errors.push(format!("tile {at} has negative army {}", tile.army));
        }
        if tile.is_mountain && (!tile.owner.is_neutral() || tile.army != 0) {
            errors.push(format!("mountain {at} carries owner or army"));
        }
    }

    for movement in &state.movement_queue {
        if !known.contains(&movement.owner) {
            errors.push(format!("movement owned by unknown player {}", movement.owner));
        }
        let endpoints = [movement.from, movement.to, movement.final_destination];
        if let Some(bad) = endpoints
            .iter()
            .chain(movement.waypoints.iter())
            .find(|c| !in_bounds(state.width, state.height, **c))
        {
            errors.push(format!("movement references off-grid tile {bad}"));
        }
        if movement.army < 0 {
            errors.push(format!("movement from {} has negative army", movement.from));
        }
    }

    if state.tick == 0 {
        for player in &state.players {
            let lords = state.lord_count(&player.id);
            if lords != 1 {
                errors.push(format!(
                    "player {} starts with {lords} lord tiles, expected 1",
                    player.id
                ));
            }
        }
        for tile in state.tiles.iter().filter(|t| t.is_lord) {
            if tile.army <= 0 {
                errors.push(format!("lord {} starts without an army", tile.coord()));
            }
        }
    }

    if let Some(winner) = &state.winner {
        if !known.contains(winner) {
            errors.push(format!("winner {winner} is not a match player"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(StateValidationFailure { errors })
    }
}
