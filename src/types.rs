use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub type TerritoryId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tile ownership. Serialised as `null` or the owning player's id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<PlayerId>", into = "Option<PlayerId>")]
pub enum Owner {
    #[default]
    Neutral,
    Player(PlayerId),
}

impl Owner {
    pub fn is_neutral(&self) -> bool {
        matches!(self, Self::Neutral)
    }

    pub fn player(&self) -> Option<&PlayerId> {
        match self {
            Self::Neutral => None,
            Self::Player(id) => Some(id),
        }
    }

    pub fn is(&self, player: &PlayerId) -> bool {
        self.player() == Some(player)
    }
}

impl From<Option<PlayerId>> for Owner {
    fn from(value: Option<PlayerId>) -> Self {
        match value {
            Some(id) => Self::Player(id),
            None => Self::Neutral,
        }
    }
}

impl From<Owner> for Option<PlayerId> {
    fn from(value: Owner) -> Self {
        match value {
            Owner::Neutral => None,
            Owner::Player(id) => Some(id),
        }
    }
}

impl From<PlayerId> for Owner {
    fn from(value: PlayerId) -> Self {
        Self::Player(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    pub x: i32,
    pub y: i32,
    pub owner: Owner,
    pub territory_id: Option<TerritoryId>,
    pub army: i32,
    pub is_lord: bool,
    pub is_city: bool,
    pub is_mountain: bool,
    pub is_visible: bool,
}

impl Tile {
    pub fn neutral(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            owner: Owner::Neutral,
            territory_id: None,
            army: 0,
            is_lord: false,
            is_city: false,
            is_mountain: false,
            is_visible: false,
        }
    }

    pub fn coord(&self) -> Coord {
        Coord::new(self.x, self.y)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Territory {
    pub id: TerritoryId,
    pub color: String,
    pub lord_tile: Option<Coord>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub color: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: String,
    pub controlled_by: PlayerId,
    pub position: Coord,
    pub army_size: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movement {
    pub from: Coord,
    pub to: Coord,
    pub owner: PlayerId,
    pub army: i32,
    pub final_destination: Coord,
    pub waypoints: Vec<Coord>,
    pub must_reach_waypoint: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub match_id: String,
    pub width: i32,
    pub height: i32,
    pub tick: u64,
    #[serde(rename = "tickSpeed")]
    pub tick_speed_ms: u64,
    pub is_paused: bool,
    pub is_game_over: bool,
    pub winner: Option<PlayerId>,
    pub tiles: Vec<Tile>,
    pub territories: Vec<Territory>,
    pub players: Vec<Player>,
    pub units: Vec<Unit>,
    pub movement_queue: Vec<Movement>,
    pub min_garrison: i32,
    pub eliminated: Vec<PlayerId>,
}

impl GameState {
    pub fn tile(&self, at: Coord) -> Option<&Tile> {
        crate::grid::index_of(self.width, self.height, at).and_then(|idx| self.tiles.get(idx))
    }

    pub fn tile_mut(&mut self, at: Coord) -> Option<&mut Tile> {
        crate::grid::index_of(self.width, self.height, at).and_then(|idx| self.tiles.get_mut(idx))
    }

    pub fn has_player(&self, player: &PlayerId) -> bool {
        self.players.iter().any(|p| &p.id == player)
    }

    pub fn is_eliminated(&self, player: &PlayerId) -> bool {
        self.eliminated.contains(player)
    }

    pub fn lord_count(&self, player: &PlayerId) -> usize {
        self.tiles
            .iter()
            .filter(|tile| tile.is_lord && tile.owner.is(player))
            .count()
    }
}

/// Movement request as received from a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementIntent {
    pub from: Coord,
    pub to: Coord,
    pub army_fraction: f64,
    #[serde(default)]
    pub waypoints: Vec<Coord>,
    pub player_id: PlayerId,
}

#[derive(Clone, Debug)]
pub struct MatchPlayer {
    pub id: PlayerId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchEvent {
    LordCaptured {
        at: Coord,
        by: PlayerId,
        previous: Owner,
    },
    TerritoryCaptured {
        #[serde(rename = "territoryId")]
        territory_id: TerritoryId,
        by: PlayerId,
        tiles: usize,
    },
    PlayerEliminated {
        #[serde(rename = "playerId")]
        player_id: PlayerId,
    },
    MatchEnded {
        winner: Option<PlayerId>,
    },
}

/// Per-player fog-of-war masks, indexed like `GameState::tiles`.
pub type VisibilityMasks = BTreeMap<PlayerId, Vec<bool>>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub version: u64,
    pub timestamp: u64,
    pub state: GameState,
    #[serde(default)]
    pub events: Vec<MatchEvent>,
    #[serde(skip)]
    pub visibility: VisibilityMasks,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub match_id: String,
    pub winner: Option<PlayerId>,
    pub ticks: u64,
    pub eliminated: Vec<PlayerId>,
    pub final_version: u64,
}
