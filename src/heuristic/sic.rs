use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::common::Agent;
use crate::heap::{HeapItem, OpenList, NOT_IN_HEAP};
use crate::heuristic::Heuristic;
use crate::map::Map;
use crate::moves::{Move, WAIT};
use crate::solver::world::WorldState;

struct SweepNode {
    position: (usize, usize),
    dist: usize,
    serial: usize,
    heap_index: usize,
}

impl HeapItem for SweepNode {
    fn heap_index(&self) -> usize {
        self.heap_index
    }

    fn set_heap_index(&mut self, index: usize) {
        self.heap_index = index;
    }

    fn heap_cmp(&self, other: &Self) -> Ordering {
        self.dist
            .cmp(&other.dist)
            .then_with(|| self.serial.cmp(&other.serial))
    }
}

/// Sum-of-individual-costs tables: for every agent, the shortest distance
/// from each traversable cell to the agent's goal, plus the first move of
/// one such shortest path. Immutable once built.
#[derive(Debug, Clone)]
pub(crate) struct SicHeuristic {
    dist: Vec<Vec<Vec<i32>>>,
    opt_move: Vec<Vec<Vec<usize>>>,
}

impl SicHeuristic {
    /// Backward uniform-cost sweep from each agent's goal. Waits are not
    /// expanded; every enabled direction costs one step.
    pub(crate) fn build(map: &Map, agents: &[Agent]) -> Self {
        let mut dist = vec![vec![vec![-1; map.width]; map.height]; agents.len()];
        let mut opt_move = vec![vec![vec![WAIT; map.width]; map.height]; agents.len()];

        for agent in agents {
            Self::sweep_from_goal(
                map,
                agent.goal,
                &mut dist[agent.id],
                &mut opt_move[agent.id],
            );
        }

        debug!("built SIC tables for {} agents", agents.len());
        SicHeuristic { dist, opt_move }
    }

    fn sweep_from_goal(
        map: &Map,
        goal: (usize, usize),
        dist: &mut [Vec<i32>],
        opt_move: &mut [Vec<usize>],
    ) {
        let mut open = OpenList::new();
        let mut open_nodes: HashMap<(usize, usize), Rc<RefCell<SweepNode>>> = HashMap::new();
        let mut serial = 0usize;

        dist[goal.0][goal.1] = 0;
        let root = Rc::new(RefCell::new(SweepNode {
            position: goal,
            dist: 0,
            serial,
            heap_index: NOT_IN_HEAP,
        }));
        open_nodes.insert(goal, Rc::clone(&root));
        open.push(root);

        while let Some(current) = open.pop() {
            let (position, current_dist) = {
                let node = current.borrow();
                (node.position, node.dist)
            };
            open_nodes.remove(&position);

            for direction in 0..map.moves.num_directions() {
                if direction == WAIT {
                    continue;
                }
                let Some(neighbor) = map.move_target(position, direction) else {
                    continue;
                };
                let tentative = current_dist + map.moves.unit_cost();
                let known = dist[neighbor.0][neighbor.1];
                if known >= 0 && (known as usize) <= tentative {
                    continue;
                }

                dist[neighbor.0][neighbor.1] = tentative as i32;
                // Walking the sweep edge forward: from `neighbor`, the move
                // toward the goal reverses the expansion direction.
                opt_move[neighbor.0][neighbor.1] = map.moves.opposite(direction);

                if let Some(existing) = open_nodes.get(&neighbor) {
                    existing.borrow_mut().dist = tentative;
                    open.decrease_key(existing);
                } else {
                    serial += 1;
                    let node = Rc::new(RefCell::new(SweepNode {
                        position: neighbor,
                        dist: tentative,
                        serial,
                        heap_index: NOT_IN_HEAP,
                    }));
                    open_nodes.insert(neighbor, Rc::clone(&node));
                    open.push(node);
                }
            }
        }
    }

    /// Distance from `position` to `agent`'s goal; -1 when unreachable.
    pub(crate) fn agent_h(&self, agent: usize, position: (usize, usize)) -> i32 {
        self.dist[agent][position.0][position.1]
    }

    /// First move of a shortest path from `position` to `agent`'s goal.
    pub(crate) fn opt_move(&self, agent: usize, position: (usize, usize)) -> Move {
        Move {
            position,
            direction: self.opt_move[agent][position.0][position.1],
        }
    }

    /// The first agent whose start cannot reach its goal, if any.
    pub(crate) fn unreachable_start(&self, agents: &[Agent]) -> Option<usize> {
        agents
            .iter()
            .find(|agent| self.agent_h(agent.id, agent.start) < 0)
            .map(|agent| agent.id)
    }
}

impl Heuristic for SicHeuristic {
    fn h(&self, world: &WorldState) -> usize {
        world
            .agents
            .iter()
            .map(|state| {
                let h = self.agent_h(state.agent, state.position);
                debug_assert!(h >= 0, "search reached a cell with no route to goal");
                h.max(0) as usize
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moves::AllowedDirections;

    fn agent(id: usize, start: (usize, usize), goal: (usize, usize)) -> Agent {
        Agent { id, start, goal }
    }

    #[test]
    fn test_distances_on_open_grid() {
        let map = Map::from_ascii(&["...", "...", "..."], AllowedDirections::Five).unwrap();
        let agents = vec![agent(0, (0, 0), (2, 2))];
        let sic = SicHeuristic::build(&map, &agents);

        assert_eq!(sic.agent_h(0, (2, 2)), 0);
        assert_eq!(sic.agent_h(0, (0, 0)), 4);
        assert_eq!(sic.agent_h(0, (1, 2)), 1);
    }

    #[test]
    fn test_distances_route_around_obstacles() {
        let map = Map::from_ascii(&["...", ".@.", "..."], AllowedDirections::Five).unwrap();
        let agents = vec![agent(0, (1, 0), (1, 2))];
        let sic = SicHeuristic::build(&map, &agents);

        // Straight across is blocked; the detour costs 4.
        assert_eq!(sic.agent_h(0, (1, 0)), 4);
    }

    #[test]
    fn test_unreachable_marked_with_sentinel() {
        let map = Map::from_ascii(&[".@.", "@@.", "..."], AllowedDirections::Five).unwrap();
        let agents = vec![agent(0, (0, 0), (2, 2))];
        let sic = SicHeuristic::build(&map, &agents);

        assert_eq!(sic.agent_h(0, (0, 0)), -1);
        assert_eq!(sic.unreachable_start(&agents), Some(0));
    }

    #[test]
    fn test_opt_moves_round_trip() {
        let map = Map::from_ascii(&["....", ".@@.", "....", ".@.."], AllowedDirections::Five)
            .unwrap();
        let agents = vec![agent(0, (0, 0), (3, 3))];
        let sic = SicHeuristic::build(&map, &agents);

        // Following opt_move from every reachable cell must reach the goal
        // in exactly dist steps.
        for x in 0..map.height {
            for y in 0..map.width {
                let h = sic.agent_h(0, (x, y));
                if h < 0 {
                    continue;
                }
                let mut position = (x, y);
                for _ in 0..h {
                    let step = sic.opt_move(0, position);
                    position = map
                        .move_target(step.position, step.direction)
                        .expect("opt move must stay on the grid");
                }
                assert_eq!(position, agents[0].goal, "round trip from ({x},{y})");
            }
        }
    }

    #[test]
    fn test_diagonal_distances() {
        let map = Map::from_ascii(&["...", "...", "..."], AllowedDirections::Nine).unwrap();
        let agents = vec![agent(0, (0, 0), (2, 2))];
        let sic = SicHeuristic::build(&map, &agents);

        assert_eq!(sic.agent_h(0, (0, 0)), 2);
    }
}
