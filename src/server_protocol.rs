use serde_json::{json, Value};

use crate::config::TickSpeed;
use crate::types::{Coord, MatchSummary, StateUpdate};

#[derive(Debug, PartialEq)]
pub enum ParsedClientMessage {
    Hello {
        name: String,
    },
    Queue,
    LeaveQueue,
    MoveArmy {
        from: Coord,
        to: Coord,
        army_fraction: f64,
        waypoints: Vec<Coord>,
    },
    TogglePause,
    SetTickSpeed {
        speed: TickSpeed,
    },
    ClearMovementQueue,
    RequestFullState {
        last_version: Option<u64>,
    },
    Ping {
        t: f64,
    },
}

pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "hello" => {
            let name = object.get("name")?.as_str()?.to_string();
            Some(ParsedClientMessage::Hello { name })
        }
        "queue" => Some(ParsedClientMessage::Queue),
        "leave_queue" => Some(ParsedClientMessage::LeaveQueue),
        "move_army" => {
            let from = parse_coord(object.get("from")?)?;
            let to = parse_coord(object.get("to")?)?;
            let army_fraction = object.get("armyFraction")?.as_f64()?;
            if !army_fraction.is_finite() {
                return None;
            }
            let waypoints = match object.get("waypoints") {
                None | Some(Value::Null) => Vec::new(),
                Some(value) => value
                    .as_array()?
                    .iter()
                    .map(parse_coord)
                    .collect::<Option<Vec<_>>>()?,
            };
            Some(ParsedClientMessage::MoveArmy {
                from,
                to,
                army_fraction,
                waypoints,
            })
        }
        "toggle_pause" => Some(ParsedClientMessage::TogglePause),
        "set_tick_speed" => {
            let speed = parse_tick_speed(object.get("speed")?)?;
            Some(ParsedClientMessage::SetTickSpeed { speed })
        }
        "clear_movement_queue" => Some(ParsedClientMessage::ClearMovementQueue),
        "request_full_state" => {
            let last_version = match object.get("lastVersion") {
                None | Some(Value::Null) => None,
                Some(value) => Some(value.as_u64()?),
            };
            Some(ParsedClientMessage::RequestFullState { last_version })
        }
        "ping" => {
            let t = object.get("t")?.as_f64()?;
            if !t.is_finite() {
                return None;
            }
            Some(ParsedClientMessage::Ping { t })
        }
        _ => None,
    }
}

fn parse_coord(value: &Value) -> Option<Coord> {
    let object = value.as_object()?;
    let x = i32::try_from(object.get("x")?.as_i64()?).ok()?;
    let y = i32::try_from(object.get("y")?.as_i64()?).ok()?;
    Some(Coord::new(x, y))
}

/// Accepts either the interval in milliseconds or its name.
fn parse_tick_speed(value: &Value) -> Option<TickSpeed> {
    if let Some(ms) = value.as_u64() {
        return TickSpeed::from_millis(ms);
    }
    serde_json::from_value(value.clone()).ok()
}

/// `state` for incremental updates, `full_state` for resync replies.
pub fn state_message(kind: &str, update: &StateUpdate) -> Value {
    json!({
        "type": kind,
        "version": update.version,
        "timestamp": update.timestamp,
        "state": update.state,
        "events": update.events,
    })
}

pub fn game_over_message(summary: &MatchSummary) -> Value {
    json!({
        "type": "game_over",
        "summary": summary,
    })
}

pub fn error_message(message: &str) -> Value {
    json!({
        "type": "error",
        "message": message,
    })
}
