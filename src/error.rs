use thiserror::Error;

use crate::types::{Coord, PlayerId};

/// Rejected movement request or movement step. Never fatal: the order is dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MovementError {
    #[error("player {0} is not part of this match")]
    UnknownPlayer(PlayerId),
    #[error("player {0} has been eliminated")]
    PlayerEliminated(PlayerId),
    #[error("match is over")]
    MatchOver,
    #[error("coordinate {0} is outside the map")]
    OutOfBounds(Coord),
    #[error("source {0} is not owned by the mover")]
    NotOwner(Coord),
    #[error("target {0} is a mountain")]
    MountainTarget(Coord),
    #[error("no path from {from} to {to}")]
    NoPath { from: Coord, to: Coord },
    #[error("not enough army on {0} after garrison")]
    InsufficientArmy(Coord),
    #[error("army fraction {0} is outside (0, 1]")]
    InvalidFraction(f64),
    #[error("source and destination are the same tile")]
    SameTile,
}

/// Control action that references a player or match that is no longer valid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("player {0} is not part of this match")]
    UnknownPlayer(PlayerId),
    #[error("player {0} has been eliminated")]
    PlayerEliminated(PlayerId),
    #[error("match is over")]
    MatchOver,
    #[error("match is closed")]
    MatchClosed,
    #[error("control change rejected: {0}")]
    Rejected(StateValidationFailure),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("state validation failed: {}", errors.join("; "))]
pub struct StateValidationFailure {
    pub errors: Vec<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationError {
    #[error("resync failed after {attempts} attempts (last good version {last_version})")]
    ResyncExhausted { attempts: u32, last_version: u64 },
    #[error("malformed update: {0}")]
    Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("invalid map dimensions {width}x{height}")]
    InvalidDimensions { width: i32, height: i32 },
    #[error("a match needs at least one player")]
    NoPlayers,
    #[error("invalid territory count {0}")]
    InvalidTerritoryCount(usize),
    #[error("invalid map parameters: {0}")]
    InvalidParams(String),
    #[error("could not place a lord for player {0}")]
    LordPlacement(PlayerId),
    #[error("generated state is invalid: {0}")]
    InvalidInitialState(#[from] StateValidationFailure),
}
