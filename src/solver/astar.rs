use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::rc::Rc;

use tracing::{debug, instrument, trace};

use crate::common::{Agent, Path};
use crate::heap::{HeapItem, OpenList, NOT_IN_HEAP};
use crate::heuristic::SicHeuristic;
use crate::map::Map;
use crate::moves::{TimedMove, WAIT};
use crate::solver::comm::{Constraint, Requirement};
use crate::stat::Stats;

struct LowLevelNode {
    position: (usize, usize),
    direction: usize, // move that reached this node
    g: usize,         // uniform cost, so g is also the timestep
    h: usize,
    serial: usize,
    heap_index: usize,
    prev: Option<Rc<RefCell<LowLevelNode>>>,
}

impl LowLevelNode {
    fn f(&self) -> usize {
        self.g + self.h
    }
}

impl HeapItem for LowLevelNode {
    fn heap_index(&self) -> usize {
        self.heap_index
    }

    fn set_heap_index(&mut self, index: usize) {
        self.heap_index = index;
    }

    fn heap_cmp(&self, other: &Self) -> Ordering {
        self.f()
            .cmp(&other.f())
            // Higher g (deeper) has higher priority.
            .then_with(|| other.g.cmp(&self.g))
            .then_with(|| self.serial.cmp(&other.serial))
    }
}

fn construct_path(goal: &Rc<RefCell<LowLevelNode>>) -> Path {
    let mut path = Vec::new();
    let mut cursor = Some(Rc::clone(goal));
    while let Some(node) = cursor {
        let borrowed = node.borrow();
        path.push(borrowed.position);
        cursor = borrowed.prev.clone();
    }
    path.reverse();
    path
}

/// Single-agent timed A* under a constraint set. Returns a minimum-cost path
/// from the agent's start to its goal that violates no constraint and no
/// positive requirement, and whose arrival step is at least
/// `min_arrival_step`.
#[instrument(skip_all, name = "low_level_a_star", fields(agent = agent.id), level = "debug")]
pub(crate) fn a_star_search(
    map: &Map,
    sic: &SicHeuristic,
    agent: &Agent,
    constraints: &HashSet<Constraint>,
    requirements: &[Requirement],
    min_arrival_step: usize,
    stats: &mut Stats,
) -> Option<Path> {
    debug!("constraints: {constraints:?} requirements: {requirements:?}");

    let start_h = sic.agent_h(agent.id, agent.start);
    if start_h < 0 {
        return None;
    }
    // A positive requirement in the future also keeps the path open.
    let min_arrival = requirements
        .iter()
        .map(|requirement| requirement.time_step)
        .max()
        .unwrap_or(0)
        .max(min_arrival_step);

    if requirements
        .iter()
        .any(|requirement| requirement.is_violated(agent.start, 0))
    {
        return None;
    }

    // Unconstrained queries just follow the SIC policy.
    if constraints.is_empty() && requirements.is_empty() && min_arrival == 0 {
        let mut path = vec![agent.start];
        let mut position = agent.start;
        while position != agent.goal {
            let step = sic.opt_move(agent.id, position);
            position = map.move_target(step.position, step.direction)?;
            path.push(position);
        }
        return Some(path);
    }

    let mut open = OpenList::new();
    let mut seen = HashSet::new();
    let mut serial = 0usize;

    seen.insert((agent.start, 0));
    open.push(Rc::new(RefCell::new(LowLevelNode {
        position: agent.start,
        direction: WAIT,
        g: 0,
        h: start_h as usize,
        serial,
        heap_index: NOT_IN_HEAP,
        prev: None,
    })));

    while let Some(current) = open.pop() {
        stats.low_level_expand_nodes += 1;
        let (position, direction, g) = {
            let node = current.borrow();
            (node.position, node.direction, node.g)
        };
        trace!("expand node: {position:?} at step {g}");

        if position == agent.goal && g >= min_arrival {
            return Some(construct_path(&current));
        }

        for next in TimedMove::new(position, direction, g).next_moves(&map.moves) {
            if next.position.0 >= map.height
                || next.position.1 >= map.width
                || !map.is_passable(next.position.0, next.position.1)
            {
                continue;
            }
            if seen.contains(&(next.position, next.time)) {
                continue;
            }
            if constraints
                .iter()
                .any(|constraint| constraint.is_violated(position, next.position, next.time))
            {
                continue;
            }
            if requirements
                .iter()
                .any(|requirement| requirement.is_violated(next.position, next.time))
            {
                continue;
            }
            let h = sic.agent_h(agent.id, next.position);
            if h < 0 {
                continue;
            }

            seen.insert((next.position, next.time));
            serial += 1;
            stats.low_level_generate_nodes += 1;
            open.push(Rc::new(RefCell::new(LowLevelNode {
                position: next.position,
                direction: next.direction,
                g: next.time,
                h: h as usize,
                serial,
                heap_index: NOT_IN_HEAP,
                prev: Some(Rc::clone(&current)),
            })));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moves::AllowedDirections;

    fn setup(rows: &[&str], start: (usize, usize), goal: (usize, usize)) -> (Map, Agent, SicHeuristic) {
        let map = Map::from_ascii(rows, AllowedDirections::Five).unwrap();
        let agent = Agent { id: 0, start, goal };
        let sic = SicHeuristic::build(&map, std::slice::from_ref(&agent));
        (map, agent, sic)
    }

    #[test]
    fn test_shortest_path_on_open_grid() {
        let (map, agent, sic) = setup(&["...", "...", "..."], (0, 0), (2, 2));
        let mut stats = Stats::default();
        let path =
            a_star_search(&map, &sic, &agent, &HashSet::new(), &[], 0, &mut stats).unwrap();
        assert_eq!(path.len(), 5);
        assert_eq!(path[0], (0, 0));
        assert_eq!(path[4], (2, 2));
    }

    #[test]
    fn test_start_at_goal_returns_trivial_path() {
        let (map, agent, sic) = setup(&["...", "...", "..."], (1, 1), (1, 1));
        let mut stats = Stats::default();
        let path =
            a_star_search(&map, &sic, &agent, &HashSet::new(), &[], 0, &mut stats).unwrap();
        assert_eq!(path, vec![(1, 1)]);
    }

    #[test]
    fn test_vertex_constraint_forces_detour() {
        let (map, agent, sic) = setup(&["...", "...", "..."], (0, 0), (0, 2));
        let mut constraints = HashSet::new();
        constraints.insert(Constraint::Vertex {
            position: (0, 1),
            time_step: 1,
        });
        let mut stats = Stats::default();
        let path = a_star_search(&map, &sic, &agent, &constraints, &[], 0, &mut stats).unwrap();
        assert_eq!(path.len(), 4); // one step longer than the straight line
        assert_ne!(path[1], (0, 1));
        assert_eq!(*path.last().unwrap(), (0, 2));
    }

    #[test]
    fn test_edge_constraint_blocks_transition() {
        let (map, agent, sic) = setup(&["..", ".."], (0, 0), (0, 1));
        let mut constraints = HashSet::new();
        constraints.insert(Constraint::Edge {
            from_position: (0, 0),
            to_position: (0, 1),
            to_time_step: 1,
        });
        let mut stats = Stats::default();
        let path = a_star_search(&map, &sic, &agent, &constraints, &[], 0, &mut stats).unwrap();
        // The direct hop at step 1 is forbidden; any legal path takes 2 moves.
        assert_eq!(path.len(), 3);
        assert_eq!(*path.last().unwrap(), (0, 1));
    }

    #[test]
    fn test_min_arrival_step_delays_goal() {
        let (map, agent, sic) = setup(&["...", "...", "..."], (0, 0), (0, 2));
        let mut stats = Stats::default();
        let path =
            a_star_search(&map, &sic, &agent, &HashSet::new(), &[], 5, &mut stats).unwrap();
        assert_eq!(path.len(), 6);
        assert_eq!(*path.last().unwrap(), (0, 2));
    }

    #[test]
    fn test_requirement_routes_through_cell() {
        let (map, agent, sic) = setup(&["...", "...", "..."], (0, 0), (0, 2));
        let requirements = vec![Requirement {
            position: (1, 1),
            time_step: 2,
        }];
        let mut stats = Stats::default();
        let path =
            a_star_search(&map, &sic, &agent, &HashSet::new(), &requirements, 0, &mut stats)
                .unwrap();
        assert_eq!(path[2], (1, 1));
        assert_eq!(*path.last().unwrap(), (0, 2));
    }

    #[test]
    fn test_unreachable_goal_fails() {
        let (map, agent, sic) = setup(&[".@.", ".@.", ".@."], (0, 0), (0, 2));
        let mut stats = Stats::default();
        assert!(a_star_search(&map, &sic, &agent, &HashSet::new(), &[], 0, &mut stats).is_none());
    }
}
