use crate::grid::{coord_of, index_of, neighbors8};
use crate::types::{GameState, Owner, PlayerId, StateUpdate, VisibilityMasks};

/// Tiles `player` can see: everything it owns plus the 8-neighbourhood.
/// Rebuilt from ownership alone on every call.
pub fn compute_mask(state: &GameState, player: &PlayerId) -> Vec<bool> {
    let mut mask = vec![false; state.tiles.len()];
    for (idx, tile) in state.tiles.iter().enumerate() {
        if !tile.owner.is(player) {
            continue;
        }
        mask[idx] = true;
        let at = coord_of(state.width, idx);
        for n in neighbors8(state.width, state.height, at) {
            if let Some(n_idx) = index_of(state.width, state.height, n) {
                mask[n_idx] = true;
            }
        }
    }
    mask
}

pub fn compute_all(state: &GameState) -> VisibilityMasks {
    state
        .players
        .iter()
        .map(|player| (player.id.clone(), compute_mask(state, &player.id)))
        .collect()
}

/// The update as one player is allowed to see it.
pub fn project_for(update: &StateUpdate, player: &PlayerId) -> StateUpdate {
    let mask = match update.visibility.get(player) {
        Some(mask) if mask.len() == update.state.tiles.len() => mask.clone(),
        _ => compute_mask(&update.state, player),
    };

    let mut state = update.state.clone();
    for (tile, visible) in state.tiles.iter_mut().zip(mask) {
        tile.is_visible = visible;
        if !visible {
            tile.owner = Owner::Neutral;
            tile.army = 0;
        }
    }
    state.movement_queue.retain(|movement| &movement.owner == player);

    StateUpdate {
        version: update.version,
        timestamp: update.timestamp,
        state,
        events: update.events.clone(),
        visibility: VisibilityMasks::new(),
    }
}
