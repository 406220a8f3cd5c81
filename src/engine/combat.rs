use crate::types::{Owner, PlayerId, Tile};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CombatOutcome {
    /// Same owner; the whole force joined the target.
    Merged { army: i32 },
    /// Target taken; `army` is what now stands on it.
    Captured { previous: Owner, army: i32 },
    /// Defender held with `defender_left`; the attacking force is gone.
    Repelled { defender_left: i32 },
}

/// Army a tile can commit without breaking its garrison.
pub fn available_army(source: &Tile, min_garrison: i32) -> i32 {
    if source.owner.is_neutral() {
        source.army.max(0)
    } else {
        (source.army - min_garrison).max(0)
    }
}

/// Resolves `sent` troops owned by `attacker` arriving on `target`.
pub fn resolve_combat(
    attacker: &PlayerId,
    sent: i32,
    target: &mut Tile,
    min_garrison: i32,
) -> CombatOutcome {
    if target.owner.is(attacker) {
        target.army += sent;
        return CombatOutcome::Merged { army: sent };
    }

    let delta = sent - target.army;
    if delta <= 0 {
        target.army = delta.abs();
        return CombatOutcome::Repelled {
            defender_left: target.army,
        };
    }

    let previous = std::mem::replace(&mut target.owner, Owner::Player(attacker.clone()));
    target.army = if previous.is_neutral() {
        delta.max(min_garrison)
    } else {
        delta
    };
    CombatOutcome::Captured {
        previous,
        army: target.army,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(player: &str, army: i32) -> Tile {
        let mut tile = Tile::neutral(0, 0);
        tile.owner = Owner::Player(PlayerId::new(player));
        tile.army = army;
        tile
    }

    #[test]
    fn garrison_is_withheld_from_owned_sources() {
        assert_eq!(available_army(&owned("p1", 5), 1), 4);
        assert_eq!(available_army(&owned("p1", 1), 1), 0);
        assert_eq!(available_army(&owned("p1", 0), 1), 0);
    }

    #[test]
    fn merge_adds_everything_sent() {
        let mut target = owned("p1", 3);
        let outcome = resolve_combat(&PlayerId::new("p1"), 4, &mut target, 1);
        assert_eq!(outcome, CombatOutcome::Merged { army: 4 });
        assert_eq!(target.army, 7);
    }

    #[test]
    fn neutral_capture_keeps_at_least_the_garrison() {
        let mut target = Tile::neutral(1, 0);
        target.army = 2;
        let outcome = resolve_combat(&PlayerId::new("p1"), 3, &mut target, 2);
        assert_eq!(
            outcome,
            CombatOutcome::Captured {
                previous: Owner::Neutral,
                army: 2
            }
        );
        assert!(target.owner.is(&PlayerId::new("p1")));
    }

    #[test]
    fn capture_from_player_leaves_surplus() {
        let mut target = owned("p2", 3);
        let outcome = resolve_combat(&PlayerId::new("p1"), 4, &mut target, 5);
        assert_eq!(
            outcome,
            CombatOutcome::Captured {
                previous: Owner::Player(PlayerId::new("p2")),
                army: 1
            }
        );
    }

    #[test]
    fn tie_goes_to_the_defender() {
        let mut target = owned("p2", 9);
        let outcome = resolve_combat(&PlayerId::new("p1"), 9, &mut target, 1);
        assert_eq!(outcome, CombatOutcome::Repelled { defender_left: 0 });
        assert!(target.owner.is(&PlayerId::new("p2")));
    }
}
