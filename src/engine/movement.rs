use std::collections::HashSet;

use tracing::debug;

use crate::engine::combat::{available_army, resolve_combat, CombatOutcome};
use crate::engine::pathfinding::find_path;
use crate::engine::territory::capture_territory;
use crate::error::MovementError;
use crate::grid::in_bounds;
use crate::types::{Coord, GameState, MatchEvent, Movement, MovementIntent};

/// What happened to one queued movement during a tick.
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    /// Took a step and is still in flight.
    Advanced,
    /// Reached its last stop.
    Completed,
    /// No route to the next stop.
    Blocked(MovementError),
    /// Lost its whole force in combat.
    Destroyed,
    /// Source tile already moved this tick; retried next tick.
    Deferred,
    /// Invalid at resolution time and removed.
    Dropped(MovementError),
}

impl StepOutcome {
    pub fn keeps_movement(&self) -> bool {
        matches!(self, Self::Advanced | Self::Deferred)
    }
}

/// Advances every queued movement by one step. Returns one outcome per
/// movement, in queue order.
pub fn process_movements(state: &mut GameState, events: &mut Vec<MatchEvent>) -> Vec<StepOutcome> {
    let queue = std::mem::take(&mut state.movement_queue);
    let mut used_sources: HashSet<Coord> = HashSet::new();
    let mut kept = Vec::with_capacity(queue.len());
    let mut outcomes = Vec::with_capacity(queue.len());

    for mut movement in queue {
        let outcome = step_movement(state, &mut movement, &mut used_sources, events);
        match &outcome {
            StepOutcome::Dropped(reason) | StepOutcome::Blocked(reason) => {
                debug!(
                    owner = %movement.owner,
                    from = %movement.from,
                    %reason,
                    "movement removed"
                );
            }
            StepOutcome::Deferred => {
                debug!(owner = %movement.owner, from = %movement.from, "movement deferred");
            }
            _ => {}
        }
        if outcome.keeps_movement() {
            kept.push(movement);
        }
        outcomes.push(outcome);
    }

    // Movements queued during resolution (none today) stay behind the survivors.
    kept.append(&mut state.movement_queue);
    state.movement_queue = kept;
    outcomes
}

fn step_movement(
    state: &mut GameState,
    movement: &mut Movement,
    used_sources: &mut HashSet<Coord>,
    events: &mut Vec<MatchEvent>,
) -> StepOutcome {
    if used_sources.contains(&movement.from) {
        return StepOutcome::Deferred;
    }

    let min_garrison = state.min_garrison;
    let Some(source) = state.tile(movement.from) else {
        return StepOutcome::Dropped(MovementError::OutOfBounds(movement.from));
    };
    if !source.owner.is(&movement.owner) {
        return StepOutcome::Dropped(MovementError::NotOwner(movement.from));
    }
    let Some(target) = state.tile(movement.to) else {
        return StepOutcome::Dropped(MovementError::OutOfBounds(movement.to));
    };
    if target.is_mountain {
        return StepOutcome::Dropped(MovementError::MountainTarget(movement.to));
    }

    let sent = movement.army.min(available_army(source, min_garrison));
    if sent <= 0 {
        return StepOutcome::Dropped(MovementError::InsufficientArmy(movement.from));
    }
    used_sources.insert(movement.from);

    if let Some(source) = state.tile_mut(movement.from) {
        source.army -= sent;
    }
    let Some(target) = state.tile_mut(movement.to) else {
        return StepOutcome::Dropped(MovementError::OutOfBounds(movement.to));
    };
    let outcome = resolve_combat(&movement.owner, sent, target, min_garrison);
    let captured_lord = target.is_lord;
    let captured_territory = target.territory_id;

    match outcome {
        CombatOutcome::Repelled { .. } => return StepOutcome::Destroyed,
        CombatOutcome::Merged { army } => movement.army = army,
        CombatOutcome::Captured { previous, army } => {
            movement.army = army;
            if captured_lord {
                events.push(MatchEvent::LordCaptured {
                    at: movement.to,
                    by: movement.owner.clone(),
                    previous,
                });
                if let Some(territory_id) = captured_territory {
                    let tiles = capture_territory(state, territory_id, &movement.owner);
                    events.push(MatchEvent::TerritoryCaptured {
                        territory_id,
                        by: movement.owner.clone(),
                        tiles,
                    });
                }
            }
        }
    }

    let arrived_at = movement.to;
    if arrived_at == movement.final_destination {
        let next_stop = loop {
            if movement.waypoints.is_empty() {
                break None;
            }
            let stop = movement.waypoints.remove(0);
            if stop != arrived_at {
                break Some(stop);
            }
        };
        let Some(next_stop) = next_stop else {
            movement.must_reach_waypoint = false;
            return StepOutcome::Completed;
        };
        movement.final_destination = next_stop;
    }
    movement.must_reach_waypoint = !movement.waypoints.is_empty();

    let Some(path) = find_path(state, arrived_at, movement.final_destination) else {
        return StepOutcome::Blocked(MovementError::NoPath {
            from: arrived_at,
            to: movement.final_destination,
        });
    };
    let Some(next) = path.first().copied() else {
        return StepOutcome::Completed;
    };
    movement.from = arrived_at;
    movement.to = next;
    StepOutcome::Advanced
}

/// Turns a player request into a queued movement, or says why it cannot be.
pub fn create_movement(
    state: &GameState,
    intent: &MovementIntent,
) -> Result<Movement, MovementError> {
    let player = &intent.player_id;
    if state.is_game_over {
        return Err(MovementError::MatchOver);
    }
    if !state.has_player(player) {
        return Err(MovementError::UnknownPlayer(player.clone()));
    }
    if state.is_eliminated(player) {
        return Err(MovementError::PlayerEliminated(player.clone()));
    }
    if !intent.army_fraction.is_finite()
        || intent.army_fraction <= 0.0
        || intent.army_fraction > 1.0
    {
        return Err(MovementError::InvalidFraction(intent.army_fraction));
    }
    for at in std::iter::once(&intent.from)
        .chain(intent.waypoints.iter())
        .chain(std::iter::once(&intent.to))
    {
        if !in_bounds(state.width, state.height, *at) {
            return Err(MovementError::OutOfBounds(*at));
        }
    }

    let source = state
        .tile(intent.from)
        .ok_or(MovementError::OutOfBounds(intent.from))?;
    if !source.owner.is(player) {
        return Err(MovementError::NotOwner(intent.from));
    }

    let mut stops: Vec<Coord> = Vec::with_capacity(intent.waypoints.len() + 1);
    let mut previous = intent.from;
    for stop in intent.waypoints.iter().chain(std::iter::once(&intent.to)) {
        if *stop == previous {
            continue;
        }
        if state.tile(*stop).map(|t| t.is_mountain).unwrap_or(true) {
            return Err(MovementError::MountainTarget(*stop));
        }
        stops.push(*stop);
        previous = *stop;
    }
    if stops.is_empty() {
        return Err(MovementError::SameTile);
    }

    let army = ((source.army as f64 * intent.army_fraction).floor() as i32)
        .min(available_army(source, state.min_garrison));
    if army <= 0 {
        return Err(MovementError::InsufficientArmy(intent.from));
    }

    let first_stop = stops.remove(0);
    let path = find_path(state, intent.from, first_stop).ok_or(MovementError::NoPath {
        from: intent.from,
        to: first_stop,
    })?;
    let to = path.first().copied().ok_or(MovementError::SameTile)?;

    Ok(Movement {
        from: intent.from,
        to,
        owner: player.clone(),
        army,
        final_destination: first_stop,
        must_reach_waypoint: !stops.is_empty(),
        waypoints: stops,
    })
}
