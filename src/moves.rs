/// Orthogonal deltas plus wait. Wait sits at index 4 so direction indices
/// stay stable when the diagonal regime is enabled.
const ORTHOGONAL_DELTAS: [(i32, i32); 5] = [(-1, 0), (1, 0), (0, -1), (0, 1), (0, 0)];

const DIAGONAL_DELTAS: [(i32, i32); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];

pub(crate) const WAIT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllowedDirections {
    #[default]
    Five,
    Nine,
}

impl AllowedDirections {
    /// Maps the configured direction count (5 or 9) to a regime.
    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            5 => Some(AllowedDirections::Five),
            9 => Some(AllowedDirections::Nine),
            _ => None,
        }
    }
}

/// The direction table for one run. Directions are indices into `deltas`;
/// the assignment is fixed for the lifetime of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveTable {
    deltas: Vec<(i32, i32)>,
}

impl MoveTable {
    pub fn new(allowed: AllowedDirections) -> Self {
        let mut deltas = ORTHOGONAL_DELTAS.to_vec();
        if allowed == AllowedDirections::Nine {
            deltas.extend_from_slice(&DIAGONAL_DELTAS);
        }
        MoveTable { deltas }
    }

    pub(crate) fn num_directions(&self) -> usize {
        self.deltas.len()
    }

    pub(crate) fn delta(&self, direction: usize) -> (i32, i32) {
        self.deltas[direction]
    }

    /// Every enabled edge costs one timestep.
    pub(crate) fn unit_cost(&self) -> usize {
        1
    }

    /// The direction reversing `direction`'s delta. Wait is its own opposite.
    pub(crate) fn opposite(&self, direction: usize) -> usize {
        let (dx, dy) = self.deltas[direction];
        self.deltas
            .iter()
            .position(|&(ox, oy)| ox == -dx && oy == -dy)
            .unwrap()
    }

    /// The direction whose delta takes `from` to `to`, if the two cells are
    /// one enabled move apart.
    pub(crate) fn direction_of(
        &self,
        from: (usize, usize),
        to: (usize, usize),
    ) -> Option<usize> {
        let dx = to.0 as i32 - from.0 as i32;
        let dy = to.1 as i32 - from.1 as i32;
        self.deltas.iter().position(|&delta| delta == (dx, dy))
    }

    /// Applies `direction` to `position` on a `height` x `width` board.
    /// Returns `None` when the move leaves the board.
    pub(crate) fn apply(
        &self,
        position: (usize, usize),
        direction: usize,
        height: usize,
        width: usize,
    ) -> Option<(usize, usize)> {
        let (dx, dy) = self.deltas[direction];
        let x = position.0 as i32 + dx;
        let y = position.1 as i32 + dy;
        if x >= 0 && y >= 0 && x < height as i32 && y < width as i32 {
            Some((x as usize, y as usize))
        } else {
            None
        }
    }
}

/// A directed move: the cell a step ends in and the direction taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Move {
    pub(crate) position: (usize, usize),
    pub(crate) direction: usize,
}

/// A move stamped with the timestep at which it is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TimedMove {
    pub(crate) position: (usize, usize),
    pub(crate) direction: usize,
    pub(crate) time: usize,
}

impl TimedMove {
    pub(crate) fn new(position: (usize, usize), direction: usize, time: usize) -> Self {
        TimedMove {
            position,
            direction,
            time,
        }
    }

    /// Enumerates the successors of this move at `time + 1`, ignoring
    /// board bounds and obstacles.
    pub(crate) fn next_moves(&self, table: &MoveTable) -> Vec<TimedMove> {
        (0..table.num_directions())
            .filter_map(|direction| {
                let (dx, dy) = table.delta(direction);
                let x = self.position.0 as i32 + dx;
                let y = self.position.1 as i32 + dy;
                if x >= 0 && y >= 0 {
                    Some(TimedMove::new(
                        (x as usize, y as usize),
                        direction,
                        self.time + 1,
                    ))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Two timed moves swap iff they happen at the same step and each ends
    /// where the other started.
    pub(crate) fn is_swap_of(&self, other: &TimedMove, table: &MoveTable) -> bool {
        if self.time != other.time || self.direction == WAIT || other.direction == WAIT {
            return false;
        }
        let (dx, dy) = table.delta(self.direction);
        let self_from = (
            (self.position.0 as i32 - dx) as usize,
            (self.position.1 as i32 - dy) as usize,
        );
        let (ox, oy) = table.delta(other.direction);
        let other_from = (
            (other.position.0 as i32 - ox) as usize,
            (other.position.1 as i32 - oy) as usize,
        );
        self.position == other_from && other.position == self_from
    }
}
