use std::collections::VecDeque;

use crate::grid::{coord_of, index_of, neighbors4};
use crate::types::{Coord, GameState};

/// Shortest 4-directional route from `from` to `to`, excluding `from`.
///
/// Mountains are never entered. An empty path means `from == to`; `None`
/// means the target is unreachable. Equal-length routes are broken by
/// expansion order (up, down, left, right).
pub fn find_path(state: &GameState, from: Coord, to: Coord) -> Option<Vec<Coord>> {
    let (width, height) = (state.width, state.height);
    let start = index_of(width, height, from)?;
    let goal = index_of(width, height, to)?;
    if start == goal {
        return Some(Vec::new());
    }
    if state.tiles.get(goal)?.is_mountain {
        return None;
    }

    let mut parent: Vec<Option<usize>> = vec![None; state.tiles.len()];
    let mut visited = vec![false; state.tiles.len()];
    let mut queue = VecDeque::new();
    visited[start] = true;
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        if current == goal {
            break;
        }
        for next in neighbors4(width, height, coord_of(width, current)) {
            let Some(next_idx) = index_of(width, height, next) else {
                continue;
            };
            if visited[next_idx] || state.tiles[next_idx].is_mountain {
                continue;
            }
            visited[next_idx] = true;
            parent[next_idx] = Some(current);
            queue.push_back(next_idx);
        }
    }

    if !visited[goal] {
        return None;
    }
    let mut path = Vec::new();
    let mut cursor = goal;
    while cursor != start {
        path.push(coord_of(width, cursor));
        cursor = parent[cursor]?;
    }
    path.reverse();
    Some(path)
}
