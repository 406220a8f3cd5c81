use crate::types::Coord;

const OFFSETS_4: [(i32, i32); 4] = [(0, -1), (0, 1), (-1, 0), (1, 0)];
const OFFSETS_8: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

pub fn in_bounds(width: i32, height: i32, at: Coord) -> bool {
    at.x >= 0 && at.y >= 0 && at.x < width && at.y < height
}

/// Flat index of `at` in a row-major `width * height` tile array.
pub fn index_of(width: i32, height: i32, at: Coord) -> Option<usize> {
    if !in_bounds(width, height, at) {
        return None;
    }
    Some((at.y * width + at.x) as usize)
}

pub fn coord_of(width: i32, index: usize) -> Coord {
    let index = index as i32;
    Coord::new(index % width, index / width)
}

/// Up, down, left, right; the order BFS expands in.
pub fn neighbors4(width: i32, height: i32, at: Coord) -> impl Iterator<Item = Coord> {
    OFFSETS_4
        .into_iter()
        .map(move |(dx, dy)| Coord::new(at.x + dx, at.y + dy))
        .filter(move |c| in_bounds(width, height, *c))
}

pub fn neighbors8(width: i32, height: i32, at: Coord) -> impl Iterator<Item = Coord> {
    OFFSETS_8
        .into_iter()
        .map(move |(dx, dy)| Coord::new(at.x + dx, at.y + dy))
        .filter(move |c| in_bounds(width, height, *c))
}

pub fn is_adjacent(a: Coord, b: Coord) -> bool {
    (a.x - b.x).abs() + (a.y - b.y).abs() == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_round_trips_through_coord() {
        let at = Coord::new(3, 2);
        let idx = index_of(5, 4, at).expect("in bounds");
        assert_eq!(idx, 13);
        assert_eq!(coord_of(5, idx), at);
    }

    #[test]
    fn out_of_bounds_has_no_index() {
        assert_eq!(index_of(5, 4, Coord::new(5, 0)), None);
        assert_eq!(index_of(5, 4, Coord::new(0, -1)), None);
    }

    #[test]
    fn corner_neighbour_counts() {
        assert_eq!(neighbors4(3, 3, Coord::new(0, 0)).count(), 2);
        assert_eq!(neighbors8(3, 3, Coord::new(0, 0)).count(), 3);
        assert_eq!(neighbors8(3, 3, Coord::new(1, 1)).count(), 8);
    }

    #[test]
    fn diagonal_is_not_adjacent() {
        assert!(is_adjacent(Coord::new(1, 1), Coord::new(1, 2)));
        assert!(!is_adjacent(Coord::new(1, 1), Coord::new(2, 2)));
    }
}
