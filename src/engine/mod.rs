use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{MapParams, TickSpeed};
use crate::error::{ControlError, GenerationError, MovementError, StateValidationFailure};
use crate::grid::in_bounds;
use crate::reconciliation::VersionLedger;
use crate::rng::Rng;
use crate::types::{
    Coord, GameState, MatchEvent, MatchPlayer, MatchSummary, MovementIntent, PlayerId,
    StateUpdate, VisibilityMasks,
};
use crate::validator::validate_state;
use crate::visibility::compute_all;
use crate::world::generate_map;

pub mod combat;
pub mod growth;
pub mod movement;
pub mod pathfinding;
pub mod territory;

use self::growth::apply_growth;
use self::movement::{create_movement, process_movements, StepOutcome};

#[derive(Clone, Debug)]
enum PendingIntent {
    Move(MovementIntent),
    Clear(PlayerId),
}

#[derive(Clone, Debug)]
pub enum TickOutcome {
    Paused,
    Over,
    Committed {
        update: Arc<StateUpdate>,
        movements: Vec<StepOutcome>,
    },
    /// Candidate failed validation; the previous state stays authoritative.
    Rejected(StateValidationFailure),
}

/// Authoritative simulation for one match.
#[derive(Clone, Debug)]
pub struct MatchEngine {
    params: MapParams,
    state: GameState,
    ledger: VersionLedger,
    pending: Vec<PendingIntent>,
    lord_origins: BTreeMap<PlayerId, Coord>,
}

impl MatchEngine {
    pub fn new(
        match_id: impl Into<String>,
        params: MapParams,
        players: &[MatchPlayer],
        tick_speed: TickSpeed,
        rng: &mut Rng,
        now_ms: u64,
    ) -> Result<Self, GenerationError> {
        let match_id = match_id.into();
        let map = match generate_map(&params, players, rng) {
            Ok(map) => map,
            Err(err) => {
                error!(%match_id, %err, "map generation failed");
                return Err(err);
            }
        };

        let lord_origins = map
            .players
            .iter()
            .map(|p| p.id.clone())
            .zip(map.lord_tiles.iter().copied())
            .collect();
        let state = GameState {
            match_id: match_id.clone(),
            width: params.width,
            height: params.height,
            tick: 0,
            tick_speed_ms: tick_speed.as_millis(),
            is_paused: false,
            is_game_over: false,
            winner: None,
            tiles: map.tiles,
            territories: map.territories,
            players: map.players,
            units: map.units,
            movement_queue: Vec::new(),
            min_garrison: params.min_garrison,
            eliminated: Vec::new(),
        };
        if let Err(failure) = validate_state(&state) {
            error!(%match_id, %failure, "initial state rejected");
            return Err(failure.into());
        }

        let mut ledger = VersionLedger::default();
        let visibility = compute_all(&state);
        ledger.commit(state.clone(), Vec::new(), visibility, now_ms);
        info!(
            %match_id,
            players = state.players.len(),
            width = state.width,
            height = state.height,
            "match created"
        );

        Ok(Self {
            params,
            state,
            ledger,
            pending: Vec::new(),
            lord_origins,
        })
    }

    pub fn match_id(&self) -> &str {
        &self.state.match_id
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn version(&self) -> u64 {
        self.ledger.version()
    }

    pub fn is_over(&self) -> bool {
        self.state.is_game_over
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.state.tick_speed_ms)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn committed(&self) -> Option<Arc<StateUpdate>> {
        self.ledger.latest().cloned()
    }

    pub fn full_state(&self) -> Option<Arc<StateUpdate>> {
        self.ledger.full_state()
    }

    pub fn recover(&self, version: u64) -> Option<Arc<StateUpdate>> {
        self.ledger.recover(version)
    }

    pub fn summary(&self) -> MatchSummary {
        MatchSummary {
            match_id: self.state.match_id.clone(),
            winner: self.state.winner.clone(),
            ticks: self.state.tick,
            eliminated: self.state.eliminated.clone(),
            final_version: self.ledger.version(),
        }
    }

    /// Buffers a movement request for the next tick boundary. Cheap checks
    /// run now; ownership, garrison and path are checked when it is applied.
    pub fn submit_movement(&mut self, intent: MovementIntent) -> Result<(), MovementError> {
        let player = &intent.player_id;
        if self.state.is_game_over {
            return Err(MovementError::MatchOver);
        }
        if !self.state.has_player(player) {
            return Err(MovementError::UnknownPlayer(player.clone()));
        }
        if self.state.is_eliminated(player) {
            return Err(MovementError::PlayerEliminated(player.clone()));
        }
        if !intent.army_fraction.is_finite()
            || intent.army_fraction <= 0.0
            || intent.army_fraction > 1.0
        {
            return Err(MovementError::InvalidFraction(intent.army_fraction));
        }
        for at in [intent.from, intent.to]
            .iter()
            .chain(intent.waypoints.iter())
        {
            if !in_bounds(self.state.width, self.state.height, *at) {
                return Err(MovementError::OutOfBounds(*at));
            }
        }
        self.pending.push(PendingIntent::Move(intent));
        Ok(())
    }

    pub fn clear_movements(&mut self, player: &PlayerId) -> Result<(), ControlError> {
        self.check_control(player)?;
        self.pending.push(PendingIntent::Clear(player.clone()));
        Ok(())
    }

    pub fn toggle_pause(
        &mut self,
        player: &PlayerId,
        now_ms: u64,
    ) -> Result<Arc<StateUpdate>, ControlError> {
        self.check_control(player)?;
        let mut candidate = self.state.clone();
        candidate.is_paused = !candidate.is_paused;
        info!(match_id = %self.state.match_id, %player, paused = candidate.is_paused, "pause toggled");
        self.commit_control(candidate, now_ms)
    }

    pub fn set_tick_speed(
        &mut self,
        player: &PlayerId,
        speed: TickSpeed,
        now_ms: u64,
    ) -> Result<Arc<StateUpdate>, ControlError> {
        self.check_control(player)?;
        let mut candidate = self.state.clone();
        candidate.tick_speed_ms = speed.as_millis();
        info!(match_id = %self.state.match_id, %player, ms = candidate.tick_speed_ms, "tick speed changed");
        self.commit_control(candidate, now_ms)
    }

    /// Runs one tick: intents, growth, movement, win check, validation, then
    /// visibility of the accepted state and commit.
    pub fn step(&mut self, now_ms: u64) -> TickOutcome {
        if self.state.is_game_over {
            return TickOutcome::Over;
        }
        if self.state.is_paused {
            return TickOutcome::Paused;
        }

        let mut candidate = self.state.clone();
        let mut events = Vec::new();

        // Intents stay buffered until the candidate is accepted.
        for intent in self.pending.iter().cloned() {
            apply_intent(&mut candidate, intent);
        }

        candidate.tick += 1;
        apply_growth(&mut candidate, &self.params);
        let movements = process_movements(&mut candidate, &mut events);
        check_win_condition(&mut candidate, &mut events);
        sync_units(&mut candidate, &self.lord_origins);

        if let Err(failure) = validate_state(&candidate) {
            error!(
                match_id = %self.state.match_id,
                tick = candidate.tick,
                pending = self.pending.len(),
                %failure,
                "tick rejected; keeping previous state"
            );
            return TickOutcome::Rejected(failure);
        }
        self.pending.clear();
        let visibility = compute_all(&candidate);

        for event in &events {
            match event {
                MatchEvent::PlayerEliminated { player_id } => {
                    info!(match_id = %candidate.match_id, %player_id, "player eliminated");
                }
                MatchEvent::MatchEnded { winner } => {
                    info!(match_id = %candidate.match_id, tick = candidate.tick, winner = ?winner, "match ended");
                }
                _ => {}
            }
        }

        self.state = candidate.clone();
        let update = self.ledger.commit(candidate, events, visibility, now_ms);
        debug!(
            match_id = %self.state.match_id,
            tick = self.state.tick,
            version = update.version,
            "tick committed"
        );
        TickOutcome::Committed { update, movements }
    }

    #[cfg(test)]
    pub(crate) fn state_mut(&mut self) -> &mut GameState {
        &mut self.state
    }

    fn check_control(&self, player: &PlayerId) -> Result<(), ControlError> {
        let result = if self.state.is_game_over {
            Err(ControlError::MatchOver)
        } else if !self.state.has_player(player) {
            Err(ControlError::UnknownPlayer(player.clone()))
        } else if self.state.is_eliminated(player) {
            Err(ControlError::PlayerEliminated(player.clone()))
        } else {
            Ok(())
        };
        if let Err(err) = &result {
            warn!(match_id = %self.state.match_id, %player, %err, "stale control action ignored");
        }
        result
    }

    fn commit_control(
        &mut self,
        candidate: GameState,
        now_ms: u64,
    ) -> Result<Arc<StateUpdate>, ControlError> {
        if let Err(failure) = validate_state(&candidate) {
            error!(match_id = %self.state.match_id, %failure, "control change rejected");
            return Err(ControlError::Rejected(failure));
        }
        let visibility: VisibilityMasks = self
            .ledger
            .latest()
            .map(|u| u.visibility.clone())
            .unwrap_or_else(|| compute_all(&candidate));
        self.state = candidate.clone();
        Ok(self.ledger.commit(candidate, Vec::new(), visibility, now_ms))
    }
}

fn apply_intent(state: &mut GameState, intent: PendingIntent) {
    match intent {
        PendingIntent::Move(intent) => match create_movement(state, &intent) {
            Ok(movement) => state.movement_queue.push(movement),
            Err(reason) => {
                debug!(player = %intent.player_id, from = %intent.from, %reason, "movement request dropped");
            }
        },
        PendingIntent::Clear(player) => {
            if !state.is_eliminated(&player) {
                state.movement_queue.retain(|m| m.owner != player);
            }
        }
    }
}

/// Eliminates players without a lord tile and ends the match when at most
/// one remains.
pub fn check_win_condition(state: &mut GameState, events: &mut Vec<MatchEvent>) {
    if state.is_game_over {
        return;
    }
    let newly_out: Vec<PlayerId> = state
        .players
        .iter()
        .map(|p| p.id.clone())
        .filter(|id| !state.is_eliminated(id) && state.lord_count(id) == 0)
        .collect();
    for player_id in newly_out {
        state.movement_queue.retain(|m| m.owner != player_id);
        state.eliminated.push(player_id.clone());
        events.push(MatchEvent::PlayerEliminated { player_id });
    }

    let remaining: Vec<PlayerId> = state
        .players
        .iter()
        .map(|p| p.id.clone())
        .filter(|id| !state.is_eliminated(id))
        .collect();
    let decided = match remaining.len() {
        0 => Some(None),
        1 if state.players.len() > 1 => Some(remaining.into_iter().next()),
        _ => None,
    };
    if let Some(winner) = decided {
        state.is_game_over = true;
        state.winner = winner.clone();
        state.movement_queue.clear();
        events.push(MatchEvent::MatchEnded { winner });
    }
}

fn sync_units(state: &mut GameState, lord_origins: &BTreeMap<PlayerId, Coord>) {
    let armies: Vec<Option<i32>> = state
        .units
        .iter()
        .map(|unit| {
            let tile = state.tile(*lord_origins.get(&unit.controlled_by)?)?;
            tile.owner.is(&unit.controlled_by).then_some(tile.army)
        })
        .collect();
    let mut armies = armies.into_iter();
    state.units.retain_mut(|unit| match armies.next().flatten() {
        Some(army) => {
            unit.army_size = army;
            true
        }
        None => false,
    });
}


#[cfg(test)]
mod tests {
    use super::test_support::{make_state, own};
    use super::*;
    use crate::types::{Movement, Owner};

    fn make_players(count: usize) -> Vec<MatchPlayer> {
        (0..count)
            .map(|idx| MatchPlayer {
                id: PlayerId::new(format!("p{}", idx + 1)),
                name: format!("P{}", idx + 1),
            })
            .collect()
    }

    fn make_engine(seed: u32) -> MatchEngine {
        MatchEngine::new(
            "m1",
            MapParams::default(),
            &make_players(2),
            TickSpeed::default(),
            &mut Rng::new(seed),
            1_000,
        )
        .expect("engine")
    }

    fn lord_of(engine: &MatchEngine, player: &str) -> Coord {
        engine
            .state()
            .tiles
            .iter()
            .find(|t| t.is_lord && t.owner.is(&PlayerId::new(player)))
            .map(|t| t.coord())
            .expect("lord")
    }

    fn open_neighbor(engine: &MatchEngine, at: Coord) -> Coord {
        let state = engine.state();
        crate::grid::neighbors4(state.width, state.height, at)
            .find(|c| {
                let tile = state.tile(*c).expect("tile");
                !tile.is_mountain && tile.owner.is_neutral() && !tile.is_lord && !tile.is_city
            })
            .expect("open neighbour")
    }

    fn committed(outcome: TickOutcome) -> Arc<StateUpdate> {
        match outcome {
            TickOutcome::Committed { update, .. } => update,
            other => panic!("expected commit, got {other:?}"),
        }
    }

    #[test]
    fn new_engine_commits_version_one() {
        let engine = make_engine(1);
        let update = engine.committed().expect("initial");
        assert_eq!(update.version, 1);
        assert_eq!(update.state.tick, 0);
        assert_eq!(update.visibility.len(), 2);
        assert_eq!(engine.state().units.len(), 2);
    }

    #[test]
    fn each_tick_commits_a_newer_version() {
        let mut engine = make_engine(2);
        let first = committed(engine.step(2_000));
        let second = committed(engine.step(2_000));
        assert_eq!((first.version, second.version), (2, 3));
        assert!(second.timestamp > first.timestamp);
        assert_eq!(second.state.tick, 2);
        let lord = lord_of(&engine, "p1");
        assert_eq!(engine.state().tile(lord).expect("tile").army, 14);
    }

    #[test]
    fn movement_is_buffered_until_the_tick_boundary() {
        let mut engine = make_engine(3);
        let lord = lord_of(&engine, "p1");
        let target = open_neighbor(&engine, lord);
        engine
            .submit_movement(MovementIntent {
                from: lord,
                to: target,
                army_fraction: 0.5,
                waypoints: Vec::new(),
                player_id: PlayerId::new("p1"),
            })
            .expect("accepted");
        assert_eq!(engine.pending_len(), 1);
        assert!(engine.state().tile(target).expect("tile").owner.is_neutral());

        let update = committed(engine.step(2_000));
        assert_eq!(engine.pending_len(), 0);
        let tile = update.state.tile(target).expect("tile");
        assert!(tile.owner.is(&PlayerId::new("p1")));
        // Lord grew to 12 before the 5-army order left.
        assert_eq!(update.state.tile(lord).expect("tile").army, 7);
        assert_eq!(tile.army, 5);
    }

    #[test]
    fn submit_rejects_unknown_player_and_bad_fraction() {
        let mut engine = make_engine(4);
        let intent = MovementIntent {
            from: Coord::new(0, 0),
            to: Coord::new(1, 0),
            army_fraction: 0.5,
            waypoints: Vec::new(),
            player_id: PlayerId::new("intruder"),
        };
        assert_eq!(
            engine.submit_movement(intent.clone()),
            Err(MovementError::UnknownPlayer(PlayerId::new("intruder")))
        );
        let intent = MovementIntent {
            player_id: PlayerId::new("p1"),
            army_fraction: 1.5,
            ..intent
        };
        assert_eq!(
            engine.submit_movement(intent),
            Err(MovementError::InvalidFraction(1.5))
        );
    }

    #[test]
    fn pause_is_an_immediate_versioned_change() {
        let mut engine = make_engine(5);
        let paused = engine
            .toggle_pause(&PlayerId::new("p1"), 1_500)
            .expect("toggle");
        assert!(paused.state.is_paused);
        assert_eq!(paused.version, 2);
        assert!(matches!(engine.step(2_000), TickOutcome::Paused));
        assert_eq!(engine.state().tick, 0);

        let resumed = engine
            .toggle_pause(&PlayerId::new("p2"), 2_500)
            .expect("toggle");
        assert!(!resumed.state.is_paused);
        assert_eq!(committed(engine.step(3_000)).state.tick, 1);
    }

    #[test]
    fn tick_speed_change_is_committed() {
        let mut engine = make_engine(6);
        let update = engine
            .set_tick_speed(&PlayerId::new("p1"), TickSpeed::Fast, 1_100)
            .expect("speed");
        assert_eq!(update.state.tick_speed_ms, 250);
        assert_eq!(engine.tick_interval(), Duration::from_millis(250));
    }

    #[test]
    fn control_from_stranger_is_ignored() {
        let mut engine = make_engine(7);
        let before = engine.version();
        assert_eq!(
            engine.toggle_pause(&PlayerId::new("nobody"), 2_000).map(|_| ()),
            Err(ControlError::UnknownPlayer(PlayerId::new("nobody")))
        );
        assert_eq!(engine.version(), before);
    }

    #[test]
    fn clear_removes_only_the_callers_orders() {
        let mut state = make_state(3, 1);
        for owner in ["p1", "p2", "p1"] {
            state.movement_queue.push(Movement {
                from: Coord::new(0, 0),
                to: Coord::new(1, 0),
                owner: PlayerId::new(owner),
                army: 1,
                final_destination: Coord::new(1, 0),
                waypoints: Vec::new(),
                must_reach_waypoint: false,
            });
        }
        apply_intent(&mut state, PendingIntent::Clear(PlayerId::new("p1")));
        assert_eq!(state.movement_queue.len(), 1);
        assert_eq!(state.movement_queue[0].owner.as_str(), "p2");
    }

    #[test]
    fn losing_the_last_lord_eliminates_and_ends_the_match() {
        let mut state = make_state(3, 1);
        own(&mut state, Coord::new(0, 0), "p1", 5);
        state.tiles[0].is_lord = true;
        own(&mut state, Coord::new(2, 0), "p1", 3);
        let mut events = Vec::new();
        check_win_condition(&mut state, &mut events);

        assert!(state.is_game_over);
        assert_eq!(state.winner, Some(PlayerId::new("p1")));
        assert_eq!(state.eliminated, vec![PlayerId::new("p2")]);
        assert_eq!(
            events,
            vec![
                MatchEvent::PlayerEliminated {
                    player_id: PlayerId::new("p2")
                },
                MatchEvent::MatchEnded {
                    winner: Some(PlayerId::new("p1"))
                },
            ]
        );
    }

    #[test]
    fn no_lords_left_is_a_draw() {
        let mut state = make_state(2, 1);
        let mut events = Vec::new();
        check_win_condition(&mut state, &mut events);
        assert!(state.is_game_over);
        assert_eq!(state.winner, None);
        assert_eq!(state.eliminated.len(), 2);
    }

    #[test]
    fn captured_capital_ends_the_match_through_step() {
        let mut engine = make_engine(8);
        let p2_lord = lord_of(&engine, "p2");
        {
            // Hand p1 a huge army next to p2's lord.
            let state = &mut engine.state;
            let staging = crate::grid::neighbors4(state.width, state.height, p2_lord)
                .find(|c| !state.tile(*c).expect("tile").is_mountain)
                .expect("approach");
            let tile = state.tile_mut(staging).expect("tile");
            tile.owner = Owner::Player(PlayerId::new("p1"));
            tile.army = 500;
            state.movement_queue.push(Movement {
                from: staging,
                to: p2_lord,
                owner: PlayerId::new("p1"),
                army: 400,
                final_destination: p2_lord,
                waypoints: Vec::new(),
                must_reach_waypoint: false,
            });
        }
        let update = committed(engine.step(2_000));
        assert!(update.state.is_game_over);
        assert_eq!(update.state.winner, Some(PlayerId::new("p1")));
        assert!(update
            .events
            .iter()
            .any(|e| matches!(e, MatchEvent::MatchEnded { .. })));
        assert_eq!(update.state.units.len(), 1);
        assert!(matches!(engine.step(3_000), TickOutcome::Over));
        assert_eq!(engine.summary().winner, Some(PlayerId::new("p1")));
    }

    /// Index of a plain neutral tile away from `avoid`, used to corrupt state.
    fn spare_tile(engine: &MatchEngine, avoid: &[Coord]) -> usize {
        engine
            .state()
            .tiles
            .iter()
            .position(|t| {
                t.owner.is_neutral() && !t.is_lord && !t.is_city && !avoid.contains(&t.coord())
            })
            .expect("spare tile")
    }

    #[test]
    fn invalid_candidate_keeps_previous_state_and_buffered_orders() {
        let mut engine = make_engine(9);
        let p1 = PlayerId::new("p1");
        let lord = lord_of(&engine, "p1");
        let target = open_neighbor(&engine, lord);
        engine
            .submit_movement(MovementIntent {
                from: lord,
                to: target,
                army_fraction: 0.5,
                waypoints: Vec::new(),
                player_id: p1.clone(),
            })
            .expect("accepted");
        let before = engine.version();
        let bad = spare_tile(&engine, &[lord, target]);
        engine.state.tiles[bad].is_mountain = false;
        engine.state.tiles[bad].army = -5;

        assert!(matches!(engine.step(2_000), TickOutcome::Rejected(_)));
        assert_eq!(engine.version(), before);
        assert_eq!(engine.state().tick, 0);
        assert_eq!(engine.pending_len(), 1);

        engine.state.tiles[bad].army = 0;
        let update = committed(engine.step(3_000));
        assert_eq!(engine.pending_len(), 0);
        assert!(update.state.tile(target).expect("tile").owner.is(&p1));
    }

    #[test]
    fn rejected_control_change_is_not_reported_as_closed() {
        let mut engine = make_engine(10);
        let before = engine.version();
        let bad = spare_tile(&engine, &[]);
        engine.state.tiles[bad].is_mountain = false;
        engine.state.tiles[bad].army = -1;

        let result = engine.toggle_pause(&PlayerId::new("p1"), 2_000);
        assert!(matches!(result, Err(ControlError::Rejected(_))));
        assert!(!engine.is_paused());
        assert_eq!(engine.version(), before);
    }

    #[test]
    fn capturer_sees_cascaded_tiles_in_the_same_update() {
        let mut engine = make_engine(11);
        let p1 = PlayerId::new("p1");
        let (anchor, staging) = {
            let state = engine.state();
            state
                .tiles
                .iter()
                .filter(|t| t.is_lord && t.owner.is_neutral() && t.territory_id.is_some())
                .find_map(|t| {
                    let staging = crate::grid::neighbors4(state.width, state.height, t.coord())
                        .find(|c| {
                            let n = state.tile(*c).expect("tile");
                            !n.is_mountain && !n.is_lord
                        })?;
                    Some((t.coord(), staging))
                })
                .expect("reachable anchor")
        };
        {
            let state = &mut engine.state;
            let tile = state.tile_mut(staging).expect("tile");
            tile.owner = Owner::Player(p1.clone());
            tile.army = 500;
            state.movement_queue.push(Movement {
                from: staging,
                to: anchor,
                owner: p1.clone(),
                army: 400,
                final_destination: anchor,
                waypoints: Vec::new(),
                must_reach_waypoint: false,
            });
        }

        let update = committed(engine.step(2_000));
        assert!(update.state.tile(anchor).expect("tile").owner.is(&p1));
        assert!(update
            .events
            .iter()
            .any(|e| matches!(e, MatchEvent::TerritoryCaptured { .. })));

        let view = crate::visibility::project_for(&update, &p1);
        let mut owned = 0;
        for (tile, seen) in update.state.tiles.iter().zip(&view.state.tiles) {
            if tile.owner.is(&p1) {
                owned += 1;
                assert!(seen.is_visible, "own tile {} hidden", tile.coord());
                assert!(seen.owner.is(&p1));
                assert_eq!(seen.army, tile.army);
            }
        }
        assert!(owned > 3);
        let (width, height) = (view.state.width, view.state.height);
        assert!(crate::grid::neighbors8(width, height, anchor)
            .all(|c| view.state.tile(c).expect("tile").is_visible));
    }
}
