use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, error};

use crate::map::Map;

/// Immutable agent identity: a stable index plus start and goal cells.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Agent {
    pub id: usize,
    pub start: (usize, usize),
    pub goal: (usize, usize),
}

impl Agent {
    pub fn verify(&self, map: &Map) -> bool {
        map.is_passable(self.start.0, self.start.1) && map.is_passable(self.goal.0, self.goal.1)
    }
}

/// One cell per timestep; index is the timestep.
pub(crate) type Path = Vec<(usize, usize)>;

/// A joint plan: one timed path per agent, indexed by agent id.
#[derive(Debug, Clone)]
pub struct Plan {
    pub paths: Vec<Path>,
}

impl Plan {
    /// Sum of individual path costs in moves. Trailing waits at the goal are
    /// not charged.
    pub fn sum_of_costs(&self) -> usize {
        self.paths
            .iter()
            .map(|path| {
                let mut end = path.len();
                while end > 1 && path[end - 1] == path[end - 2] {
                    end -= 1;
                }
                end.saturating_sub(1)
            })
            .sum()
    }

    /// Longest per-agent path length in moves.
    pub fn makespan(&self) -> usize {
        self.paths
            .iter()
            .map(|path| path.len().saturating_sub(1))
            .max()
            .unwrap_or(0)
    }

    /// Checks the plan against the grid and the agents: every move obeys the
    /// move table, every path ends at its agent's goal, and no two agents
    /// collide on a cell or swap across an edge.
    pub fn verify(&self, map: &Map, agents: &[Agent]) -> bool {
        if self.paths.len() != agents.len() {
            error!("incomplete plan: {} paths for {} agents", self.paths.len(), agents.len());
            return false;
        }

        for (path, agent) in self.paths.iter().zip(agents.iter()) {
            if path.first().is_none_or(|&s| s != agent.start)
                || path.last().is_none_or(|&g| g != agent.goal)
            {
                error!(
                    "start and goal failed: path start {:?} path end {:?}, but agent start {:?} agent goal {:?}",
                    path.first(),
                    path.last(),
                    agent.start,
                    agent.goal
                );
                return false;
            }

            for window in path.windows(2) {
                if let [from, to] = window {
                    if !Self::is_legal_step(map, *from, *to) {
                        error!("move step failed: {from:?} -> {to:?}");
                        return false;
                    }
                }
            }
        }

        let max_path_length = self.paths.iter().map(|p| p.len()).max().unwrap_or(0);

        for time_step in 0..max_path_length {
            let mut seen_positions = HashSet::new();
            let mut seen_edges = HashSet::new();

            for path in &self.paths {
                let pos = *path.get(time_step).unwrap_or_else(|| path.last().unwrap());
                if !map.is_passable(pos.0, pos.1) {
                    error!("impossible move onto obstacle at {pos:?}");
                    return false;
                }

                if !seen_positions.insert(pos) {
                    error!("vertex conflict at {pos:?} time {time_step}");
                    return false;
                }

                if time_step >= 1 && time_step < path.len() {
                    let prev_pos = path[time_step - 1];
                    if prev_pos != pos {
                        let reverse_edge = (pos, prev_pos);
                        if seen_edges.contains(&reverse_edge) {
                            error!("swap conflict across {reverse_edge:?} at time {time_step}");
                            return false;
                        }
                        seen_edges.insert((prev_pos, pos));
                    }
                }
            }
        }

        true
    }

    fn is_legal_step(map: &Map, from: (usize, usize), to: (usize, usize)) -> bool {
        map.get_neighbors(from.0, from.1).contains(&to)
    }

    pub fn log_plan(&self, solver: &str) {
        let mut formatted = String::new();
        for (index, path) in self.paths.iter().enumerate() {
            formatted.push_str(&format!(" agent{}:\n", index));
            for (t, &(x, y)) in path.iter().enumerate() {
                formatted.push_str(&format!("   - x: {}\n     y: {}\n     t: {}\n", x, y, t));
            }
        }
        debug!("{} plan:\n{}", solver, formatted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moves::AllowedDirections;

    fn open_map() -> Map {
        Map::from_ascii(&["...", "...", "..."], AllowedDirections::Five).unwrap()
    }

    fn agents(routes: &[((usize, usize), (usize, usize))]) -> Vec<Agent> {
        routes
            .iter()
            .enumerate()
            .map(|(id, &(start, goal))| Agent { id, start, goal })
            .collect()
    }

    #[test]
    fn test_verify_accepts_disjoint_paths() {
        let map = open_map();
        let agents = agents(&[((0, 0), (0, 2)), ((2, 0), (2, 2))]);
        let plan = Plan {
            paths: vec![
                vec![(0, 0), (0, 1), (0, 2)],
                vec![(2, 0), (2, 1), (2, 2)],
            ],
        };
        assert!(plan.verify(&map, &agents));
        assert_eq!(plan.sum_of_costs(), 4);
        assert_eq!(plan.makespan(), 2);
    }

    #[test]
    fn test_verify_rejects_vertex_conflict() {
        let map = open_map();
        let agents = agents(&[((0, 0), (0, 2)), ((0, 2), (0, 0))]);
        let plan = Plan {
            paths: vec![
                vec![(0, 0), (0, 1), (0, 2)],
                vec![(0, 2), (0, 1), (0, 0)],
            ],
        };
        assert!(!plan.verify(&map, &agents));
    }

    #[test]
    fn test_verify_rejects_swap_conflict() {
        let map = open_map();
        let agents = agents(&[((0, 0), (0, 1)), ((0, 1), (0, 0))]);
        let plan = Plan {
            paths: vec![vec![(0, 0), (0, 1)], vec![(0, 1), (0, 0)]],
        };
        assert!(!plan.verify(&map, &agents));
    }

    #[test]
    fn test_verify_rejects_conflict_with_finished_agent() {
        let map = open_map();
        let agents = agents(&[((0, 0), (0, 1)), ((2, 1), (0, 1))]);
        // Agent 0 parks on (0,1); agent 1 arrives there later.
        let plan = Plan {
            paths: vec![
                vec![(0, 0), (0, 1)],
                vec![(2, 1), (1, 1), (0, 1)],
            ],
        };
        assert!(!plan.verify(&map, &agents));
    }

    #[test]
    fn test_verify_rejects_teleport() {
        let map = open_map();
        let agents = agents(&[((0, 0), (2, 2))]);
        let plan = Plan {
            paths: vec![vec![(0, 0), (2, 2)]],
        };
        assert!(!plan.verify(&map, &agents));
    }

    #[test]
    fn test_sum_of_costs_ignores_trailing_waits() {
        let plan = Plan {
            paths: vec![vec![(0, 0), (0, 1), (0, 1), (0, 1)]],
        };
        assert_eq!(plan.sum_of_costs(), 1);
    }
}
