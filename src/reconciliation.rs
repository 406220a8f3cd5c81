use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::constants::STATE_HISTORY_SIZE;
use crate::error::ReconciliationError;
use crate::types::{GameState, MatchEvent, StateUpdate, VisibilityMasks};

/// Server-side record of committed versions.
#[derive(Clone, Debug)]
pub struct VersionLedger {
    history: VecDeque<Arc<StateUpdate>>,
    capacity: usize,
}

impl Default for VersionLedger {
    fn default() -> Self {
        Self::new(STATE_HISTORY_SIZE)
    }
}

impl VersionLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Stamps `state` with the next version and a timestamp no earlier than
    /// the previous one plus a millisecond.
    pub fn commit(
        &mut self,
        state: GameState,
        events: Vec<MatchEvent>,
        visibility: VisibilityMasks,
        now_ms: u64,
    ) -> Arc<StateUpdate> {
        let (version, timestamp) = match self.history.back() {
            Some(last) => (last.version + 1, now_ms.max(last.timestamp + 1)),
            None => (1, now_ms),
        };
        let update = Arc::new(StateUpdate {
            version,
            timestamp,
            state,
            events,
            visibility,
        });
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(update.clone());
        update
    }

    pub fn latest(&self) -> Option<&Arc<StateUpdate>> {
        self.history.back()
    }

    pub fn version(&self) -> u64 {
        self.history.back().map(|u| u.version).unwrap_or(0)
    }

    pub fn recover(&self, version: u64) -> Option<Arc<StateUpdate>> {
        self.history.iter().find(|u| u.version == version).cloned()
    }

    /// Current state for a resyncing observer. Events are not replayed.
    pub fn full_state(&self) -> Option<Arc<StateUpdate>> {
        let latest = self.history.back()?;
        if latest.events.is_empty() {
            return Some(latest.clone());
        }
        Some(Arc::new(StateUpdate {
            events: Vec::new(),
            ..StateUpdate::clone(latest)
        }))
    }

    pub fn retained(&self) -> usize {
        self.history.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateDecision {
    Apply,
    /// Stale, duplicate or malformed; ask for a full state newer than this.
    Resync { last_known: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResyncDecision {
    Apply,
    /// Response matches what the observer already holds.
    AlreadyCurrent,
    /// Response is older than what the observer holds.
    Stale,
}

/// Observer side of the update stream: tracks the last applied version and
/// bounds resync attempts.
#[derive(Clone, Debug)]
pub struct ObserverSync {
    last_applied: Option<u64>,
    max_attempts: u32,
    attempts: u32,
}

impl ObserverSync {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            last_applied: None,
            max_attempts: max_attempts.max(1),
            attempts: 0,
        }
    }

    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn on_update(&mut self, version: u64) -> UpdateDecision {
        match self.last_applied {
            Some(last) if version <= last => UpdateDecision::Resync { last_known: last },
            _ => {
                self.last_applied = Some(version);
                UpdateDecision::Apply
            }
        }
    }

    pub fn on_malformed(&self) -> UpdateDecision {
        UpdateDecision::Resync {
            last_known: self.last_applied.unwrap_or(0),
        }
    }

    /// Starts the next attempt, or fails once the bound is used up.
    pub fn begin_attempt(&mut self) -> Result<u32, ReconciliationError> {
        if self.attempts >= self.max_attempts {
            return Err(ReconciliationError::ResyncExhausted {
                attempts: self.attempts,
                last_version: self.last_applied.unwrap_or(0),
            });
        }
        self.attempts += 1;
        Ok(self.attempts)
    }

    pub fn on_resync_response(&mut self, version: u64) -> ResyncDecision {
        let decision = match self.last_applied {
            Some(last) if version < last => return ResyncDecision::Stale,
            Some(last) if version == last => ResyncDecision::AlreadyCurrent,
            _ => {
                self.last_applied = Some(version);
                ResyncDecision::Apply
            }
        };
        self.attempts = 0;
        decision
    }
}

/// Runs bounded resync attempts, each limited by `timeout`. Returns the
/// update to apply, or `None` when the observer was already current.
pub async fn resync_with_retry<F, Fut>(
    sync: &mut ObserverSync,
    timeout: Duration,
    mut request: F,
) -> Result<Option<Arc<StateUpdate>>, ReconciliationError>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Option<Arc<StateUpdate>>>,
{
    loop {
        let attempt = sync.begin_attempt()?;
        let last_known = sync.last_applied().unwrap_or(0);
        match tokio::time::timeout(timeout, request(last_known)).await {
            Ok(Some(update)) => match sync.on_resync_response(update.version) {
                ResyncDecision::Apply => return Ok(Some(update)),
                ResyncDecision::AlreadyCurrent => return Ok(None),
                ResyncDecision::Stale => {
                    warn!(attempt, version = update.version, last_known, "stale resync response");
                }
            },
            Ok(None) => warn!(attempt, last_known, "resync request went unanswered"),
            Err(_) => warn!(attempt, last_known, "resync attempt timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::engine::test_support::make_state;
    use crate::types::PlayerId;

    fn update(version: u64) -> Arc<StateUpdate> {
        Arc::new(StateUpdate {
            version,
            timestamp: version * 10,
            state: make_state(2, 2),
            events: Vec::new(),
            visibility: VisibilityMasks::new(),
        })
    }

    #[test]
    fn ledger_versions_and_timestamps_strictly_increase() {
        let mut ledger = VersionLedger::new(3);
        let a = ledger.commit(make_state(2, 2), Vec::new(), VisibilityMasks::new(), 100);
        let b = ledger.commit(make_state(2, 2), Vec::new(), VisibilityMasks::new(), 100);
        let c = ledger.commit(make_state(2, 2), Vec::new(), VisibilityMasks::new(), 50);
        assert_eq!((a.version, b.version, c.version), (1, 2, 3));
        assert!(a.timestamp < b.timestamp && b.timestamp < c.timestamp);
    }

    #[test]
    fn ledger_keeps_a_bounded_history() {
        let mut ledger = VersionLedger::new(2);
        for _ in 0..4 {
            ledger.commit(make_state(2, 2), Vec::new(), VisibilityMasks::new(), 0);
        }
        assert_eq!(ledger.retained(), 2);
        assert!(ledger.recover(2).is_none());
        assert_eq!(ledger.recover(3).map(|u| u.version), Some(3));
        assert_eq!(ledger.version(), 4);
    }

    #[test]
    fn full_state_drops_events() {
        let mut ledger = VersionLedger::default();
        ledger.commit(
            make_state(2, 2),
            vec![MatchEvent::PlayerEliminated {
                player_id: PlayerId::new("p2"),
            }],
            VisibilityMasks::new(),
            0,
        );
        let full = ledger.full_state().expect("committed");
        assert_eq!(full.version, 1);
        assert!(full.events.is_empty());
        assert_eq!(ledger.latest().map(|u| u.events.len()), Some(1));
    }

    #[test]
    fn observer_rejects_non_increasing_versions() {
        let mut sync = ObserverSync::new(3);
        assert_eq!(sync.on_update(1), UpdateDecision::Apply);
        assert_eq!(sync.on_update(3), UpdateDecision::Apply);
        assert_eq!(sync.on_update(3), UpdateDecision::Resync { last_known: 3 });
        assert_eq!(sync.on_update(2), UpdateDecision::Resync { last_known: 3 });
        assert_eq!(sync.last_applied(), Some(3));
    }

    #[test]
    fn resync_response_resets_attempts_unless_stale() {
        let mut sync = ObserverSync::new(3);
        sync.on_update(5);
        sync.begin_attempt().expect("first attempt");
        assert_eq!(sync.on_resync_response(4), ResyncDecision::Stale);
        assert_eq!(sync.attempts(), 1);
        assert_eq!(sync.on_resync_response(5), ResyncDecision::AlreadyCurrent);
        assert_eq!(sync.attempts(), 0);
        sync.begin_attempt().expect("attempt");
        assert_eq!(sync.on_resync_response(9), ResyncDecision::Apply);
        assert_eq!(sync.last_applied(), Some(9));
    }

    #[tokio::test(start_paused = true)]
    async fn resync_gives_up_after_bounded_timeouts() {
        let mut sync = ObserverSync::new(3);
        sync.on_update(2);
        let calls = AtomicU32::new(0);
        let result = resync_with_retry(&mut sync, Duration::from_millis(5_000), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<Option<Arc<StateUpdate>>>()
        })
        .await;
        assert_eq!(
            result,
            Err(ReconciliationError::ResyncExhausted {
                attempts: 3,
                last_version: 2
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn resync_succeeds_on_a_later_attempt() {
        let mut sync = ObserverSync::new(3);
        sync.on_update(2);
        let calls = AtomicU32::new(0);
        let result = resync_with_retry(&mut sync, Duration::from_millis(100), |last_known| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                assert_eq!(last_known, 2);
                if call == 0 {
                    None
                } else {
                    Some(update(7))
                }
            }
        })
        .await
        .expect("resynced");
        assert_eq!(result.map(|u| u.version), Some(7));
        assert_eq!(sync.last_applied(), Some(7));
        assert_eq!(sync.attempts(), 0);
    }
}
