use crate::common::Path;
use crate::moves::{MoveTable, TimedMove};

/// A low-level prohibition for a single agent.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Ord, PartialOrd)]
pub(crate) enum Constraint {
    Vertex {
        position: (usize, usize),
        time_step: usize,
    },
    Edge {
        from_position: (usize, usize),
        to_position: (usize, usize),
        to_time_step: usize,
    },
}

impl Constraint {
    pub(crate) fn is_violated(
        &self,
        from_pos: (usize, usize),
        to_pos: (usize, usize),
        to_time_step: usize,
    ) -> bool {
        match self {
            Constraint::Vertex {
                position,
                time_step,
            } => to_pos == *position && to_time_step == *time_step,
            Constraint::Edge {
                from_position,
                to_position,
                to_time_step: step,
            } => from_pos == *from_position && to_pos == *to_position && to_time_step == *step,
        }
    }
}

/// Disjoint-splitting positive constraint: the agent must stand on
/// `position` at `time_step`.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub(crate) struct Requirement {
    pub(crate) position: (usize, usize),
    pub(crate) time_step: usize,
}

impl Requirement {
    pub(crate) fn is_violated(&self, position: (usize, usize), time_step: usize) -> bool {
        time_step == self.time_step && position != self.position
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum ConflictKind {
    Vertex {
        position: (usize, usize),
        time_step: usize,
    },
    Edge {
        from_position: (usize, usize),
        to_position: (usize, usize),
        to_time_step: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct Conflict {
    pub(crate) agent_1: usize,
    pub(crate) agent_2: usize,
    pub(crate) kind: ConflictKind,
}

fn position_at(path: &Path, time_step: usize) -> (usize, usize) {
    *path.get(time_step).unwrap_or_else(|| path.last().unwrap())
}

/// Finds every vertex and swap conflict between the given single-agent
/// paths. Agents park on their final cell past the end of their path.
/// Conflicts come out in time order, so the first entry is the earliest.
pub(crate) fn detect_conflicts(paths: &[Path], moves: &MoveTable) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    let max_length = paths.iter().map(|path| path.len()).max().unwrap_or(0);

    for time_step in 0..max_length {
        for i in 0..paths.len() {
            for j in (i + 1)..paths.len() {
                let pos_i = position_at(&paths[i], time_step);
                let pos_j = position_at(&paths[j], time_step);

                if pos_i == pos_j {
                    conflicts.push(Conflict {
                        agent_1: i,
                        agent_2: j,
                        kind: ConflictKind::Vertex {
                            position: pos_i,
                            time_step,
                        },
                    });
                    continue;
                }

                if time_step == 0 {
                    continue;
                }
                let prev_i = position_at(&paths[i], time_step - 1);
                let prev_j = position_at(&paths[j], time_step - 1);
                let (Some(dir_i), Some(dir_j)) = (
                    moves.direction_of(prev_i, pos_i),
                    moves.direction_of(prev_j, pos_j),
                ) else {
                    continue;
                };
                let move_i = TimedMove::new(pos_i, dir_i, time_step);
                let move_j = TimedMove::new(pos_j, dir_j, time_step);
                if move_i.is_swap_of(&move_j, moves) {
                    conflicts.push(Conflict {
                        agent_1: i,
                        agent_2: j,
                        kind: ConflictKind::Edge {
                            from_position: prev_i,
                            to_position: pos_i,
                            to_time_step: time_step,
                        },
                    });
                }
            }
        }
    }

    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moves::AllowedDirections;

    fn table() -> MoveTable {
        MoveTable::new(AllowedDirections::Five)
    }

    #[test]
    fn test_vertex_constraint_violation() {
        let constraint = Constraint::Vertex {
            position: (2, 3),
            time_step: 4,
        };
        assert!(constraint.is_violated((2, 2), (2, 3), 4));
        assert!(!constraint.is_violated((2, 2), (2, 3), 5));
        assert!(!constraint.is_violated((2, 3), (2, 2), 4));
    }

    #[test]
    fn test_edge_constraint_violation() {
        let constraint = Constraint::Edge {
            from_position: (1, 1),
            to_position: (1, 2),
            to_time_step: 2,
        };
        assert!(constraint.is_violated((1, 1), (1, 2), 2));
        assert!(!constraint.is_violated((1, 2), (1, 1), 2));
        assert!(!constraint.is_violated((1, 1), (1, 2), 3));
    }

    #[test]
    fn test_requirement_violation() {
        let requirement = Requirement {
            position: (0, 1),
            time_step: 2,
        };
        assert!(requirement.is_violated((0, 0), 2));
        assert!(!requirement.is_violated((0, 1), 2));
        assert!(!requirement.is_violated((0, 0), 3));
    }

    #[test]
    fn test_detect_vertex_conflict() {
        let paths = vec![
            vec![(0, 0), (0, 1), (0, 2)],
            vec![(1, 1), (0, 1), (1, 1)],
        ];
        let conflicts = detect_conflicts(&paths, &table());
        assert_eq!(conflicts.len(), 1);
        assert_eq!(
            conflicts[0].kind,
            ConflictKind::Vertex {
                position: (0, 1),
                time_step: 1
            }
        );
    }

    #[test]
    fn test_detect_swap_conflict() {
        let paths = vec![
            vec![(0, 0), (0, 1)],
            vec![(0, 1), (0, 0)],
        ];
        let conflicts = detect_conflicts(&paths, &table());
        assert_eq!(conflicts.len(), 1);
        assert_eq!(
            conflicts[0].kind,
            ConflictKind::Edge {
                from_position: (0, 0),
                to_position: (0, 1),
                to_time_step: 1
            }
        );
    }

    #[test]
    fn test_detect_conflict_with_parked_agent() {
        // Agent 0 finishes on (0,1) at step 1; agent 1 walks into it at step 2.
        let paths = vec![
            vec![(0, 0), (0, 1)],
            vec![(2, 1), (1, 1), (0, 1)],
        ];
        let conflicts = detect_conflicts(&paths, &table());
        assert_eq!(conflicts.len(), 1);
        assert_eq!(
            conflicts[0].kind,
            ConflictKind::Vertex {
                position: (0, 1),
                time_step: 2
            }
        );
    }

    #[test]
    fn test_conflicts_sorted_by_time() {
        let paths = vec![
            vec![(0, 0), (0, 1), (0, 2), (1, 2)],
            vec![(0, 2), (0, 1), (0, 0), (0, 1)],
            vec![(2, 2), (2, 2), (2, 2), (1, 2)],
        ];
        let conflicts = detect_conflicts(&paths, &table());
        assert!(conflicts.len() >= 2);
        let times: Vec<usize> = conflicts
            .iter()
            .map(|c| match c.kind {
                ConflictKind::Vertex { time_step, .. } => time_step,
                ConflictKind::Edge { to_time_step, .. } => to_time_step,
            })
            .collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }

    #[test]
    fn test_no_conflicts() {
        let paths = vec![
            vec![(0, 0), (1, 0), (2, 0)],
            vec![(0, 2), (1, 2), (2, 2)],
        ];
        assert!(detect_conflicts(&paths, &table()).is_empty());
    }
}
