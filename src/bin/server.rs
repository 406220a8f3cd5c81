use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use lords_rust_server::clock::{Clock, SystemClock};
use lords_rust_server::config::ServerConfig;
use lords_rust_server::constants::MATCHMAKING_INTERVAL_MS;
use lords_rust_server::engine::MatchEngine;
use lords_rust_server::match_runner::{spawn_match, MatchBroadcast, MatchHandle};
use lords_rust_server::matchmaking::MatchmakingQueue;
use lords_rust_server::reconciliation::{resync_with_retry, ObserverSync, UpdateDecision};
use lords_rust_server::rng::Rng;
use lords_rust_server::server_protocol::{
    error_message, game_over_message, parse_client_message, state_message, ParsedClientMessage,
};
use lords_rust_server::server_utils::{make_id, make_match_id, sanitize_name};
use lords_rust_server::types::{MatchPlayer, MovementIntent, PlayerId, StateUpdate};
use lords_rust_server::visibility::project_for;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tower_http::services::{ServeDir, ServeFile};
use tracing::{debug, error, info, warn};

type SharedState = Arc<Mutex<ServerState>>;

#[derive(Clone)]
struct ClientContext {
    tx: mpsc::Sender<OutboundMessage>,
    player_id: Option<PlayerId>,
    name: String,
}

#[derive(Clone, Debug)]
enum OutboundMessage {
    Text(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueuePolicy {
    DropOnFull,
    DisconnectOnFull,
}

struct ServerState {
    config: ServerConfig,
    clock: Arc<dyn Clock>,
    clients: HashMap<String, ClientContext>,
    client_by_player: HashMap<PlayerId, String>,
    queue: MatchmakingQueue,
    matches: HashMap<String, MatchHandle>,
    match_by_player: HashMap<PlayerId, String>,
}

impl ServerState {
    fn new(config: ServerConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            clients: HashMap::new(),
            client_by_player: HashMap::new(),
            queue: MatchmakingQueue::new(),
            matches: HashMap::new(),
            match_by_player: HashMap::new(),
        }
    }

    fn match_for(&self, player: &PlayerId) -> Option<MatchHandle> {
        let match_id = self.match_by_player.get(player)?;
        self.matches.get(match_id).cloned()
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = ServerConfig::from_env();
    if let Err(err) = config.map.validate() {
        error!(%err, "map parameters are invalid; matches will fail to start");
    }
    let port = config.port;
    let static_dir = resolve_static_dir(config.static_dir.clone());

    let state = Arc::new(Mutex::new(ServerState::new(config)));
    start_matchmaking_loop(state.clone());

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let app = if let Some(static_dir) = static_dir {
        let index_file = static_dir.join("index.html");
        info!(root = %static_dir.to_string_lossy(), "serving static client");
        app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        )
    } else {
        warn!("static client directory not found; serving websocket only");
        app
    };

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!(port, "listening");
    axum::serve(listener, app).await
}

fn resolve_static_dir(configured: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.join("index.html").is_file() {
            return Some(path);
        }
    }
    [PathBuf::from("dist/client"), PathBuf::from("../dist/client")]
        .into_iter()
        .find(|path| path.join("index.html").is_file())
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: SharedState, socket: WebSocket) {
    let client_id = make_id("client");
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(256);

    {
        let mut guard = state.lock().await;
        guard.clients.insert(
            client_id.clone(),
            ClientContext {
                tx: tx.clone(),
                player_id: None,
                name: String::new(),
            },
        );
    }
    debug!(%client_id, "client connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(OutboundMessage::Text(payload)) = rx.recv().await {
            if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };
        match message {
            Message::Text(raw) => {
                handle_client_message(state.clone(), &client_id, raw.to_string()).await;
            }
            Message::Binary(raw) => {
                if let Ok(text) = String::from_utf8(raw.to_vec()) {
                    handle_client_message(state.clone(), &client_id, text).await;
                } else {
                    send_error_to_client(&state, &client_id, "invalid utf8 message").await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    handle_disconnect(state, &client_id).await;
    drop(tx);
    let _ = writer.await;
}

async fn handle_client_message(state: SharedState, client_id: &str, raw: String) {
    let Some(message) = parse_client_message(&raw) else {
        send_error_to_client(&state, client_id, "invalid message").await;
        return;
    };

    if let ParsedClientMessage::Hello { name } = &message {
        let mut guard = state.lock().await;
        handle_hello(&mut guard, client_id, name);
        return;
    }
    if let ParsedClientMessage::Ping { t } = &message {
        let mut guard = state.lock().await;
        send_to_client(
            &mut guard,
            client_id,
            &json!({ "type": "pong", "t": t }),
            QueuePolicy::DisconnectOnFull,
        );
        return;
    }

    let (player_id, name, handle) = {
        let guard = state.lock().await;
        let Some(client) = guard.clients.get(client_id) else {
            return;
        };
        let Some(player_id) = client.player_id.clone() else {
            drop(guard);
            send_error_to_client(&state, client_id, "say hello first").await;
            return;
        };
        let handle = guard.match_for(&player_id);
        (player_id, client.name.clone(), handle)
    };

    match message {
        ParsedClientMessage::Queue => {
            let mut guard = state.lock().await;
            if handle.is_some() {
                send_to_client(
                    &mut guard,
                    client_id,
                    &error_message("already in a match"),
                    QueuePolicy::DisconnectOnFull,
                );
                return;
            }
            guard.queue.enqueue(MatchPlayer {
                id: player_id,
                name,
            });
            broadcast_queue_status(&mut guard);
        }
        ParsedClientMessage::LeaveQueue => {
            let mut guard = state.lock().await;
            guard.queue.remove(&player_id);
            let status = json!({
                "type": "queue_status",
                "queued": false,
                "waiting": guard.queue.len(),
            });
            send_to_client(&mut guard, client_id, &status, QueuePolicy::DisconnectOnFull);
            broadcast_queue_status(&mut guard);
        }
        ParsedClientMessage::MoveArmy {
            from,
            to,
            army_fraction,
            waypoints,
        } => {
            let Some(handle) = handle else {
                send_error_to_client(&state, client_id, "not in a match").await;
                return;
            };
            let intent = MovementIntent {
                from,
                to,
                army_fraction,
                waypoints,
                player_id,
            };
            if let Err(err) = handle.submit_movement(intent).await {
                send_error_to_client(&state, client_id, &err.to_string()).await;
            }
        }
        ParsedClientMessage::TogglePause
        | ParsedClientMessage::SetTickSpeed { .. }
        | ParsedClientMessage::ClearMovementQueue => {
            let Some(handle) = handle else {
                send_error_to_client(&state, client_id, "not in a match").await;
                return;
            };
            let result = match message {
                ParsedClientMessage::TogglePause => handle.toggle_pause(player_id).await,
                ParsedClientMessage::SetTickSpeed { speed } => {
                    handle.set_tick_speed(player_id, speed).await
                }
                _ => handle.clear_movements(player_id).await,
            };
            if let Err(err) = result {
                send_error_to_client(&state, client_id, &err.to_string()).await;
            }
        }
        ParsedClientMessage::RequestFullState { last_version } => {
            let Some(handle) = handle else {
                send_error_to_client(&state, client_id, "not in a match").await;
                return;
            };
            debug!(%player_id, ?last_version, "client requested full state");
            let Some(update) = handle.full_state().await else {
                send_error_to_client(&state, client_id, "match is closed").await;
                return;
            };
            let mut guard = state.lock().await;
            send_to_client(
                &mut guard,
                client_id,
                &state_message("full_state", &project_for(&update, &player_id)),
                QueuePolicy::DisconnectOnFull,
            );
        }
        ParsedClientMessage::Hello { .. } | ParsedClientMessage::Ping { .. } => {}
    }
}

fn handle_hello(state: &mut ServerState, client_id: &str, name: &str) {
    let name = sanitize_name(name);
    let player_id = {
        let Some(client) = state.clients.get_mut(client_id) else {
            return;
        };
        let player_id = client
            .player_id
            .get_or_insert_with(|| PlayerId::new(make_id("player")))
            .clone();
        client.name = name.clone();
        player_id
    };
    state
        .client_by_player
        .insert(player_id.clone(), client_id.to_string());
    info!(%player_id, %name, "player joined");
    send_to_client(
        state,
        client_id,
        &json!({ "type": "welcome", "playerId": player_id, "name": name }),
        QueuePolicy::DisconnectOnFull,
    );
}

async fn handle_disconnect(state: SharedState, client_id: &str) {
    let mut guard = state.lock().await;
    disconnect_client_internal(&mut guard, client_id);
}

fn disconnect_client_internal(state: &mut ServerState, client_id: &str) {
    let Some(context) = state.clients.remove(client_id) else {
        return;
    };
    let Some(player_id) = context.player_id else {
        return;
    };
    if state.client_by_player.get(&player_id).map(String::as_str) == Some(client_id) {
        state.client_by_player.remove(&player_id);
    }
    if state.queue.remove(&player_id) {
        broadcast_queue_status(state);
    }

    let Some(handle) = state.match_for(&player_id) else {
        return;
    };
    let anyone_left = handle
        .players()
        .iter()
        .any(|p| state.client_by_player.contains_key(p));
    if !anyone_left {
        info!(match_id = %handle.match_id(), "every player left; stopping match");
        handle.stop();
    }
}

fn broadcast_queue_status(state: &mut ServerState) {
    let waiting = state.queue.len();
    let match_size = state.config.match_players;
    let targets: Vec<(String, usize)> = state
        .client_by_player
        .iter()
        .filter_map(|(player, client)| {
            state
                .queue
                .position(player)
                .map(|position| (client.clone(), position))
        })
        .collect();
    for (client_id, position) in targets {
        send_to_client(
            state,
            &client_id,
            &json!({
                "type": "queue_status",
                "queued": true,
                "position": position,
                "waiting": waiting,
                "matchSize": match_size,
            }),
            QueuePolicy::DropOnFull,
        );
    }
}

fn start_matchmaking_loop(state: SharedState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(MATCHMAKING_INTERVAL_MS));
        loop {
            interval.tick().await;
            let mut guard = state.lock().await;
            let size = guard.config.match_players;
            for group in guard.queue.drain_groups(size) {
                start_match(&state, &mut guard, group);
            }
        }
    });
}

fn start_match(shared: &SharedState, state: &mut ServerState, group: Vec<MatchPlayer>) {
    let match_id = make_match_id();
    let created = MatchEngine::new(
        match_id.clone(),
        state.config.map.clone(),
        &group,
        state.config.tick_speed,
        &mut Rng::from_entropy(),
        state.clock.now_ms(),
    );
    let engine = match created {
        Ok(engine) => engine,
        Err(err) => {
            let message = error_message(&format!("match creation failed: {err}"));
            for player in &group {
                if let Some(client_id) = state.client_by_player.get(&player.id).cloned() {
                    send_to_client(state, &client_id, &message, QueuePolicy::DisconnectOnFull);
                }
            }
            return;
        }
    };

    let handle = spawn_match(engine, state.clock.clone());
    let players: Vec<Value> = group
        .iter()
        .map(|p| json!({ "id": p.id, "name": p.name }))
        .collect();
    for player in &group {
        state
            .match_by_player
            .insert(player.id.clone(), match_id.clone());
        let Some(client_id) = state.client_by_player.get(&player.id).cloned() else {
            continue;
        };
        send_to_client(
            state,
            &client_id,
            &json!({
                "type": "match_found",
                "matchId": match_id,
                "playerId": player.id,
                "players": players,
            }),
            QueuePolicy::DisconnectOnFull,
        );
        let Some(tx) = state.clients.get(&client_id).map(|c| c.tx.clone()) else {
            continue;
        };
        tokio::spawn(forward_match(
            handle.clone(),
            player.id.clone(),
            tx,
            state.config.resync_max_attempts,
            Duration::from_millis(state.config.resync_timeout_ms),
        ));
    }
    state.matches.insert(match_id.clone(), handle.clone());

    let shared = shared.clone();
    tokio::spawn(async move {
        handle.closed().await;
        let mut guard = shared.lock().await;
        guard.matches.remove(&match_id);
        guard.match_by_player.retain(|_, id| id != &match_id);
        info!(%match_id, "match released");
    });
}

/// Streams one player's view of a match, resyncing when the stream breaks.
async fn forward_match(
    handle: MatchHandle,
    player: PlayerId,
    tx: mpsc::Sender<OutboundMessage>,
    max_attempts: u32,
    timeout: Duration,
) {
    let mut updates = handle.subscribe();
    let mut sync = ObserverSync::new(max_attempts);

    if let Some(initial) = handle.full_state().await {
        sync.on_update(initial.version);
        if !push(&tx, "full_state", &initial, &player) {
            return;
        }
    }

    loop {
        let decision = match updates.recv().await {
            Ok(MatchBroadcast::State(update)) => match sync.on_update(update.version) {
                UpdateDecision::Apply => {
                    if !push(&tx, "state", &update, &player) {
                        return;
                    }
                    continue;
                }
                resync => resync,
            },
            Ok(MatchBroadcast::Ended(summary)) => {
                let _ = tx.try_send(OutboundMessage::Text(game_over_message(&summary).to_string()));
                return;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(match_id = %handle.match_id(), %player, skipped, "observer lagged");
                sync.on_malformed()
            }
            Err(RecvError::Closed) => return,
        };

        let UpdateDecision::Resync { last_known } = decision else {
            continue;
        };
        warn!(match_id = %handle.match_id(), %player, last_known, "observer resyncing");
        let request_handle = handle.clone();
        let result = resync_with_retry(&mut sync, timeout, move |_| {
            let handle = request_handle.clone();
            async move { handle.full_state().await }
        })
        .await;
        match result {
            Ok(Some(update)) => {
                if !push(&tx, "full_state", &update, &player) {
                    return;
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(match_id = %handle.match_id(), %player, %err, "observer desynchronized");
                let _ = tx.try_send(OutboundMessage::Text(
                    json!({ "type": "desync", "message": err.to_string() }).to_string(),
                ));
                return;
            }
        }
    }
}

/// Fire-and-forget; false once the client is gone.
fn push(
    tx: &mpsc::Sender<OutboundMessage>,
    kind: &str,
    update: &StateUpdate,
    player: &PlayerId,
) -> bool {
    let payload = state_message(kind, &project_for(update, player)).to_string();
    !matches!(
        tx.try_send(OutboundMessage::Text(payload)),
        Err(TrySendError::Closed(_))
    )
}

fn send_to_client(state: &mut ServerState, client_id: &str, message: &Value, policy: QueuePolicy) {
    let send_failed = if let Some(client) = state.clients.get(client_id) {
        client
            .tx
            .try_send(OutboundMessage::Text(message.to_string()))
            .is_err()
    } else {
        false
    };
    if send_failed && policy == QueuePolicy::DisconnectOnFull {
        disconnect_client_internal(state, client_id);
    }
}

async fn send_error_to_client(state: &SharedState, client_id: &str, message: &str) {
    let mut guard = state.lock().await;
    send_to_client(
        &mut guard,
        client_id,
        &error_message(message),
        QueuePolicy::DisconnectOnFull,
    );
}
