use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::{
    BORDER_MOUNTAIN_BIAS, CITY_DENSITY, CITY_GROWTH_TICK_INTERVAL, CITY_STARTING_ARMY,
    DEFAULT_MAP_SIZE, DEFAULT_MATCH_PLAYERS, DEFAULT_TERRITORY_COUNT, MAX_RESYNC_ATTEMPTS,
    MIN_GARRISON, MOUNTAIN_DENSITY, NEUTRAL_LORD_STARTING_ARMY, PLAYER_LORD_STARTING_ARMY,
    RESYNC_TIMEOUT_MS, TERRITORY_GROWTH_TICK_INTERVAL,
};
use crate::error::GenerationError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickSpeed {
    Fast,
    Normal,
    #[default]
    Slow,
}

impl TickSpeed {
    pub const ALL: [TickSpeed; 3] = [TickSpeed::Fast, TickSpeed::Normal, TickSpeed::Slow];

    pub fn as_millis(self) -> u64 {
        match self {
            Self::Fast => 250,
            Self::Normal => 500,
            Self::Slow => 1000,
        }
    }

    pub fn from_millis(ms: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|speed| speed.as_millis() == ms)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MapParams {
    pub width: i32,
    pub height: i32,
    pub territory_count: usize,
    pub min_garrison: i32,
    pub city_growth_interval: u64,
    pub territory_growth_interval: u64,
    pub mountain_density: f32,
    pub city_density: f32,
    pub border_mountain_bias: f32,
    pub city_starting_army: i32,
    pub neutral_lord_army: i32,
    pub player_lord_army: i32,
}

impl Default for MapParams {
    fn default() -> Self {
        Self {
            width: DEFAULT_MAP_SIZE,
            height: DEFAULT_MAP_SIZE,
            territory_count: DEFAULT_TERRITORY_COUNT,
            min_garrison: MIN_GARRISON,
            city_growth_interval: CITY_GROWTH_TICK_INTERVAL,
            territory_growth_interval: TERRITORY_GROWTH_TICK_INTERVAL,
            mountain_density: MOUNTAIN_DENSITY,
            city_density: CITY_DENSITY,
            border_mountain_bias: BORDER_MOUNTAIN_BIAS,
            city_starting_army: CITY_STARTING_ARMY,
            neutral_lord_army: NEUTRAL_LORD_STARTING_ARMY,
            player_lord_army: PLAYER_LORD_STARTING_ARMY,
        }
    }
}

impl MapParams {
    pub fn with_size(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn tile_count(&self) -> usize {
        (self.width.max(0) as usize) * (self.height.max(0) as usize)
    }

    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.width <= 0 || self.height <= 0 {
            return Err(GenerationError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        if self.territory_count == 0 || self.territory_count > self.tile_count() {
            return Err(GenerationError::InvalidTerritoryCount(self.territory_count));
        }
        let densities = [
            self.mountain_density,
            self.city_density,
            self.border_mountain_bias,
        ];
        if densities.iter().any(|d| !(0.0..1.0).contains(d))
            || self.mountain_density + self.city_density >= 1.0
        {
            return Err(GenerationError::InvalidParams(
                "densities must lie in [0, 1) and leave free tiles".to_string(),
            ));
        }
        if self.city_growth_interval == 0 || self.territory_growth_interval == 0 {
            return Err(GenerationError::InvalidParams(
                "growth intervals must be positive".to_string(),
            ));
        }
        if self.min_garrison < 0 || self.player_lord_army <= 0 {
            return Err(GenerationError::InvalidParams(
                "garrison must be non-negative and lord army positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: Option<PathBuf>,
    pub map: MapParams,
    pub match_players: usize,
    pub tick_speed: TickSpeed,
    pub resync_max_attempts: u32,
    pub resync_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            static_dir: None,
            map: MapParams::default(),
            match_players: DEFAULT_MATCH_PLAYERS,
            tick_speed: TickSpeed::default(),
            resync_max_attempts: MAX_RESYNC_ATTEMPTS,
            resync_timeout_ms: RESYNC_TIMEOUT_MS,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let map = MapParams {
            width: parse_or("MAP_WIDTH", &lookup, defaults.map.width),
            height: parse_or("MAP_HEIGHT", &lookup, defaults.map.height),
            territory_count: parse_or("TERRITORY_COUNT", &lookup, defaults.map.territory_count),
            ..defaults.map.clone()
        };
        let tick_speed = lookup("TICK_MS")
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .and_then(TickSpeed::from_millis)
            .unwrap_or(defaults.tick_speed);

        Self {
            port: parse_or("PORT", &lookup, defaults.port),
            static_dir: lookup("STATIC_DIR").map(PathBuf::from),
            map,
            match_players: parse_or("MATCH_PLAYERS", &lookup, defaults.match_players).max(2),
            tick_speed,
            resync_max_attempts: parse_or(
                "RESYNC_MAX_ATTEMPTS",
                &lookup,
                defaults.resync_max_attempts,
            ),
            resync_timeout_ms: parse_or("RESYNC_TIMEOUT_MS", &lookup, defaults.resync_timeout_ms),
        }
    }
}

fn parse_or<T>(key: &str, lookup: &impl Fn(&str) -> Option<String>, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable config value");
            default
        }
    }
}
