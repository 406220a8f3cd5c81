pub const DEFAULT_MAP_SIZE: i32 = 30;
pub const DEFAULT_TERRITORY_COUNT: usize = 8;
pub const MIN_GARRISON: i32 = 1;

pub const PLAYER_LORD_STARTING_ARMY: i32 = 10;
pub const NEUTRAL_LORD_STARTING_ARMY: i32 = 50;
pub const CITY_STARTING_ARMY: i32 = 50;

pub const OWNED_LORD_GROWTH: i32 = 2;
pub const NEUTRAL_LORD_GROWTH: i32 = 1;
pub const OWNED_CITY_GROWTH: i32 = 1;
pub const NEUTRAL_CITY_GROWTH: i32 = 1;
pub const TERRITORY_GROWTH: i32 = 1;
pub const CITY_GROWTH_TICK_INTERVAL: u64 = 5;
pub const TERRITORY_GROWTH_TICK_INTERVAL: u64 = 20;

pub const MOUNTAIN_DENSITY: f32 = 0.15;
pub const CITY_DENSITY: f32 = 0.05;
pub const BORDER_MOUNTAIN_BIAS: f32 = 0.55;

pub const STATE_HISTORY_SIZE: usize = 10;
pub const MAX_RESYNC_ATTEMPTS: u32 = 3;
pub const RESYNC_TIMEOUT_MS: u64 = 5_000;
pub const MATCHMAKING_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_MATCH_PLAYERS: usize = 2;

pub const PLAYER_COLORS: [&str; 8] = [
    "#FF0000", "#0000FF", "#00FF00", "#FFFF00", "#FF00FF", "#00FFFF", "#FFA500", "#800080",
];

pub const TERRITORY_COLORS: [&str; 12] = [
    "#F2FCE2", "#FEF7CD", "#FEC6A1", "#E5DEFF", "#FFDEE2", "#FDE1D3", "#D3E4FD", "#F1F0FB",
    "#E6FCF5", "#FFF0CC", "#FFE8C4", "#E6E6FA",
];

pub fn player_color(index: usize) -> &'static str {
    PLAYER_COLORS[index % PLAYER_COLORS.len()]
}

pub fn territory_color(index: usize) -> &'static str {
    TERRITORY_COLORS[index % TERRITORY_COLORS.len()]
}

/// Minimum distance between territory seeds before relaxation.
pub fn territory_seed_spacing(width: i32, height: i32, territory_count: usize) -> f32 {
    let side = width.min(height) as f32;
    side / (territory_count.max(1) as f32).sqrt() * 0.6
}
