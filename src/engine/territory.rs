use crate::types::{GameState, Owner, PlayerId, TerritoryId};

/// Hands every neutral tile of `territory` to `by`. Owned tiles are left
/// alone. Returns how many tiles changed hands.
pub fn capture_territory(state: &mut GameState, territory: TerritoryId, by: &PlayerId) -> usize {
    let min_garrison = state.min_garrison;
    let mut captured = 0;
    for tile in &mut state.tiles {
        if tile.territory_id != Some(territory) || tile.is_mountain || !tile.owner.is_neutral() {
            continue;
        }
        tile.owner = Owner::Player(by.clone());
        tile.army = tile.army.max(min_garrison);
        captured += 1;
    }
    captured
}
