use std::collections::VecDeque;

use crate::types::{MatchPlayer, PlayerId};

/// First-come, first-served pairing queue.
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    waiting: VecDeque<MatchPlayer>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the player is already waiting.
    pub fn enqueue(&mut self, player: MatchPlayer) -> bool {
        if self.contains(&player.id) {
            return false;
        }
        self.waiting.push_back(player);
        true
    }

    pub fn remove(&mut self, player: &PlayerId) -> bool {
        let before = self.waiting.len();
        self.waiting.retain(|p| &p.id != player);
        self.waiting.len() != before
    }

    pub fn contains(&self, player: &PlayerId) -> bool {
        self.waiting.iter().any(|p| &p.id == player)
    }

    /// 1-based place in line.
    pub fn position(&self, player: &PlayerId) -> Option<usize> {
        self.waiting
            .iter()
            .position(|p| &p.id == player)
            .map(|idx| idx + 1)
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn pop_group(&mut self, size: usize) -> Option<Vec<MatchPlayer>> {
        if size == 0 || self.waiting.len() < size {
            return None;
        }
        Some(self.waiting.drain(..size).collect())
    }

    /// Every full group that can be formed right now, oldest first.
    pub fn drain_groups(&mut self, size: usize) -> Vec<Vec<MatchPlayer>> {
        let mut groups = Vec::new();
        while let Some(group) = self.pop_group(size) {
            groups.push(group);
        }
        groups
    }
}
