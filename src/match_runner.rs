use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::TickSpeed;
use crate::engine::{MatchEngine, TickOutcome};
use crate::error::{ControlError, MovementError};
use crate::types::{MatchSummary, MovementIntent, PlayerId, StateUpdate};

const COMMAND_BUFFER: usize = 256;
const BROADCAST_BUFFER: usize = 64;

#[derive(Debug)]
pub enum MatchCommand {
    SubmitMovement {
        intent: MovementIntent,
        reply: oneshot::Sender<Result<(), MovementError>>,
    },
    TogglePause {
        player: PlayerId,
        reply: oneshot::Sender<Result<(), ControlError>>,
    },
    SetTickSpeed {
        player: PlayerId,
        speed: TickSpeed,
        reply: oneshot::Sender<Result<(), ControlError>>,
    },
    ClearMovements {
        player: PlayerId,
        reply: oneshot::Sender<Result<(), ControlError>>,
    },
    RequestFullState {
        reply: oneshot::Sender<Option<Arc<StateUpdate>>>,
    },
}

#[derive(Clone, Debug)]
pub enum MatchBroadcast {
    State(Arc<StateUpdate>),
    Ended(MatchSummary),
}

/// Cheap, cloneable access to a running match.
#[derive(Clone, Debug)]
pub struct MatchHandle {
    match_id: String,
    players: Vec<PlayerId>,
    commands: mpsc::Sender<MatchCommand>,
    updates: broadcast::Sender<MatchBroadcast>,
    stop: Arc<watch::Sender<bool>>,
    done: watch::Receiver<bool>,
}

impl MatchHandle {
    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    pub fn players(&self) -> &[PlayerId] {
        &self.players
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MatchBroadcast> {
        self.updates.subscribe()
    }

    pub async fn submit_movement(&self, intent: MovementIntent) -> Result<(), MovementError> {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(MatchCommand::SubmitMovement { intent, reply })
            .await
            .is_err()
        {
            return Err(MovementError::MatchOver);
        }
        rx.await.unwrap_or(Err(MovementError::MatchOver))
    }

    pub async fn toggle_pause(&self, player: PlayerId) -> Result<(), ControlError> {
        self.control(|reply| MatchCommand::TogglePause { player, reply })
            .await
    }

    pub async fn set_tick_speed(
        &self,
        player: PlayerId,
        speed: TickSpeed,
    ) -> Result<(), ControlError> {
        self.control(|reply| MatchCommand::SetTickSpeed {
            player,
            speed,
            reply,
        })
        .await
    }

    pub async fn clear_movements(&self, player: PlayerId) -> Result<(), ControlError> {
        self.control(|reply| MatchCommand::ClearMovements { player, reply })
            .await
    }

    /// Current full state, or `None` once the match has shut down.
    pub async fn full_state(&self) -> Option<Arc<StateUpdate>> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(MatchCommand::RequestFullState { reply })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Stops the tick driver. Safe to call any number of times.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        !*self.done.borrow()
    }

    /// Resolves once the match task has exited.
    pub async fn closed(&self) {
        let mut done = self.done.clone();
        let _ = done.wait_for(|finished| *finished).await;
    }

    async fn control(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<(), ControlError>>) -> MatchCommand,
    ) -> Result<(), ControlError> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(build(reply)).await.is_err() {
            return Err(ControlError::MatchClosed);
        }
        rx.await.unwrap_or(Err(ControlError::MatchClosed))
    }
}

/// Moves `engine` into its own task and returns the handle that drives it.
pub fn spawn_match(engine: MatchEngine, clock: Arc<dyn Clock>) -> MatchHandle {
    let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (updates, _) = broadcast::channel(BROADCAST_BUFFER);
    let (stop, stop_rx) = watch::channel(false);
    let (done_tx, done) = watch::channel(false);

    let handle = MatchHandle {
        match_id: engine.match_id().to_string(),
        players: engine.state().players.iter().map(|p| p.id.clone()).collect(),
        commands,
        updates: updates.clone(),
        stop: Arc::new(stop),
        done,
    };

    tokio::spawn(async move {
        run_match(engine, clock, command_rx, updates, stop_rx).await;
        done_tx.send_replace(true);
    });
    handle
}

fn tick_driver(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn run_match(
    mut engine: MatchEngine,
    clock: Arc<dyn Clock>,
    mut commands: mpsc::Receiver<MatchCommand>,
    updates: broadcast::Sender<MatchBroadcast>,
    mut stop: watch::Receiver<bool>,
) {
    let match_id = engine.match_id().to_string();
    let mut period = engine.tick_interval();
    let mut paused = engine.is_paused();
    let mut driver = tick_driver(period);

    loop {
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    info!(%match_id, "match stopped");
                    break;
                }
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    info!(%match_id, "all handles dropped; stopping match");
                    break;
                };
                handle_command(&mut engine, clock.as_ref(), &updates, command);
                if engine.tick_interval() != period || engine.is_paused() != paused {
                    period = engine.tick_interval();
                    paused = engine.is_paused();
                    driver = tick_driver(period);
                }
            }
            _ = driver.tick() => {
                match engine.step(clock.now_ms()) {
                    TickOutcome::Committed { update, .. } => {
                        let _ = updates.send(MatchBroadcast::State(update));
                        if engine.is_over() {
                            let summary = engine.summary();
                            info!(%match_id, winner = ?summary.winner, ticks = summary.ticks, "match finished");
                            let _ = updates.send(MatchBroadcast::Ended(summary));
                            break;
                        }
                    }
                    TickOutcome::Paused | TickOutcome::Rejected(_) => {}
                    TickOutcome::Over => break,
                }
            }
        }
    }
}

fn handle_command(
    engine: &mut MatchEngine,
    clock: &dyn Clock,
    updates: &broadcast::Sender<MatchBroadcast>,
    command: MatchCommand,
) {
    match command {
        MatchCommand::SubmitMovement { intent, reply } => {
            let result = engine.submit_movement(intent);
            if let Err(err) = &result {
                debug!(match_id = %engine.match_id(), %err, "movement rejected");
            }
            let _ = reply.send(result);
        }
        MatchCommand::TogglePause { player, reply } => {
            let result = engine.toggle_pause(&player, clock.now_ms()).map(|update| {
                let _ = updates.send(MatchBroadcast::State(update));
            });
            let _ = reply.send(result);
        }
        MatchCommand::SetTickSpeed {
            player,
            speed,
            reply,
        } => {
            let result = engine
                .set_tick_speed(&player, speed, clock.now_ms())
                .map(|update| {
                    let _ = updates.send(MatchBroadcast::State(update));
                });
            let _ = reply.send(result);
        }
        MatchCommand::ClearMovements { player, reply } => {
            let _ = reply.send(engine.clear_movements(&player));
        }
        MatchCommand::RequestFullState { reply } => {
            let _ = reply.send(engine.full_state());
        }
    }
}
