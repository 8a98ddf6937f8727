use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::rc::Rc;
use std::time::Instant;

use tracing::debug;

use crate::common::{Agent, Path, Plan};
use crate::config::{CbsSplitMode, Config};
use crate::heap::{HeapItem, OpenList, NOT_IN_HEAP};
use crate::heuristic::SicHeuristic;
use crate::map::Map;
use crate::solver::astar::a_star_search;
use crate::solver::comm::{detect_conflicts, Conflict, ConflictKind, Constraint, Requirement};
use crate::solver::Solver;
use crate::stat::Stats;

/// One constraint-tree node: a full set of per-agent constraints plus the
/// single-agent solution planned under them.
struct CtNode {
    constraints: Vec<HashSet<Constraint>>,
    requirements: Vec<Vec<Requirement>>,
    path_length_constraints: Vec<usize>,
    paths: Vec<Path>,
    conflicts: Vec<Conflict>,
    cost: usize,
    serial: usize,
    heap_index: usize,
}

impl HeapItem for CtNode {
    fn heap_index(&self) -> usize {
        self.heap_index
    }

    fn set_heap_index(&mut self, index: usize) {
        self.heap_index = index;
    }

    fn heap_cmp(&self, other: &Self) -> Ordering {
        self.cost
            .cmp(&other.cost)
            .then_with(|| self.conflicts.len().cmp(&other.conflicts.len()))
            .then_with(|| self.serial.cmp(&other.serial))
    }
}

fn path_cost(path: &Path) -> usize {
    path.len().saturating_sub(1)
}

impl CtNode {
    fn new(
        map: &Map,
        sic: &SicHeuristic,
        agents: &[Agent],
        stats: &mut Stats,
    ) -> Option<CtNode> {
        let mut paths = Vec::with_capacity(agents.len());
        let mut total_cost = 0;
        for agent in agents {
            let path = a_star_search(map, sic, agent, &HashSet::new(), &[], 0, stats)?;
            total_cost += path_cost(&path);
            paths.push(path);
        }

        let conflicts = detect_conflicts(&paths, &map.moves);
        debug!("high level root: cost {total_cost}, {} conflicts", conflicts.len());
        Some(CtNode {
            constraints: vec![HashSet::new(); agents.len()],
            requirements: vec![Vec::new(); agents.len()],
            path_length_constraints: vec![0; agents.len()],
            paths,
            conflicts,
            cost: total_cost,
            serial: 0,
            heap_index: NOT_IN_HEAP,
        })
    }

    /// Builds the child that resolves `conflict` against one of its agents.
    /// Under disjoint splitting the second child also asserts the first
    /// agent's position, so the two children cover disjoint solution sets.
    fn update_constraint(
        &self,
        conflict: &Conflict,
        resolve_first: bool,
        split_mode: CbsSplitMode,
        map: &Map,
        sic: &SicHeuristic,
        agents: &[Agent],
        stats: &mut Stats,
    ) -> Option<CtNode> {
        let agent_to_update = if resolve_first {
            conflict.agent_1
        } else {
            conflict.agent_2
        };

        let mut new_constraints = self.constraints.clone();
        let mut new_requirements = self.requirements.clone();
        let mut new_path_length_constraints = self.path_length_constraints.clone();

        let constraint = match conflict.kind {
            ConflictKind::Vertex {
                position,
                time_step,
            } => {
                if position == agents[agent_to_update].goal {
                    let plc = &mut new_path_length_constraints[agent_to_update];
                    *plc = (*plc).max(time_step + 1);
                }
                Constraint::Vertex {
                    position,
                    time_step,
                }
            }
            ConflictKind::Edge {
                from_position,
                to_position,
                to_time_step,
            } => {
                // The recorded edge is agent_1's transition; agent_2 crosses
                // it in the opposite direction.
                if resolve_first {
                    Constraint::Edge {
                        from_position,
                        to_position,
                        to_time_step,
                    }
                } else {
                    Constraint::Edge {
                        from_position: to_position,
                        to_position: from_position,
                        to_time_step,
                    }
                }
            }
        };
        new_constraints[agent_to_update].insert(constraint);

        if split_mode == CbsSplitMode::Disjoint && !resolve_first {
            if let ConflictKind::Vertex {
                position,
                time_step,
            } = conflict.kind
            {
                // The other branch forbade agent_1 here; this branch asserts
                // it, which is what makes the split disjoint.
                new_requirements[conflict.agent_1].push(Requirement {
                    position,
                    time_step,
                });
            }
        }

        let new_path = a_star_search(
            map,
            sic,
            &agents[agent_to_update],
            &new_constraints[agent_to_update],
            &new_requirements[agent_to_update],
            new_path_length_constraints[agent_to_update],
            stats,
        )?;
        debug!(
            "replanned agent {agent_to_update} with {} steps for conflict {conflict:?}",
            new_path.len()
        );

        let mut new_paths = self.paths.clone();
        let new_cost = self.cost - path_cost(&new_paths[agent_to_update]) + path_cost(&new_path);
        new_paths[agent_to_update] = new_path;
        let conflicts = detect_conflicts(&new_paths, &map.moves);

        Some(CtNode {
            constraints: new_constraints,
            requirements: new_requirements,
            path_length_constraints: new_path_length_constraints,
            paths: new_paths,
            conflicts,
            cost: new_cost,
            serial: 0,
            heap_index: NOT_IN_HEAP,
        })
    }
}

/// Conflict-based search: best-first over a constraint tree, resolving the
/// earliest pairwise conflict by branching on which agent yields.
pub struct Cbs<'a> {
    map: &'a Map,
    agents: Vec<Agent>,
    sic: &'a SicHeuristic,
    stats: Stats,
}

impl<'a> Cbs<'a> {
    pub fn new(map: &'a Map, agents: Vec<Agent>, sic: &'a SicHeuristic) -> Self {
        Cbs {
            map,
            agents,
            sic,
            stats: Stats::default(),
        }
    }
}

impl Solver for Cbs<'_> {
    fn solve(&mut self, config: &Config) -> Option<Plan> {
        let total_solve_start_time = Instant::now();
        self.stats = Stats::default();
        self.stats.max_subgroup = self.agents.len();
        let mut open = OpenList::new();
        let mut serial = 0usize;

        let Some(root) = CtNode::new(self.map, self.sic, &self.agents, &mut self.stats) else {
            self.stats.mark_failed();
            return None;
        };
        open.push(Rc::new(RefCell::new(root)));

        while let Some(current) = open.pop() {
            if total_solve_start_time.elapsed().as_millis() as u64 > config.time_budget_ms {
                debug!("cbs timed out");
                self.stats.mark_failed();
                self.stats.time_ms = total_solve_start_time.elapsed().as_millis();
                return None;
            }
            self.stats.high_level_expand_nodes += 1;
            let current = current.borrow();

            if current.conflicts.is_empty() {
                let plan = Plan {
                    paths: current.paths.clone(),
                };
                self.stats.success = true;
                self.stats.costs = current.cost as i64;
                self.stats.solution_depth = plan.makespan();
                self.stats.time_ms = total_solve_start_time.elapsed().as_millis();
                plan.log_plan("cbs");
                return Some(plan);
            }

            let conflict = &current.conflicts[0];
            let mut children = Vec::new();
            for resolve_first in [true, false] {
                if let Some(child) = current.update_constraint(
                    conflict,
                    resolve_first,
                    config.cbs_split_mode,
                    self.map,
                    self.sic,
                    &self.agents,
                    &mut self.stats,
                ) {
                    self.stats.high_level_generate_nodes += 1;
                    children.push(child);
                }
            }

            // Cost-neutral child with fewer conflicts: adopt it instead of
            // branching.
            if config.op_bypass_conflicts {
                if let Some(index) = children.iter().position(|child| {
                    child.cost == current.cost && child.conflicts.len() < current.conflicts.len()
                }) {
                    let mut adopted = children.swap_remove(index);
                    serial += 1;
                    adopted.serial = serial;
                    open.push(Rc::new(RefCell::new(adopted)));
                    continue;
                }
            }

            for mut child in children {
                serial += 1;
                child.serial = serial;
                open.push(Rc::new(RefCell::new(child)));
            }
        }

        self.stats.mark_failed();
        self.stats.time_ms = total_solve_start_time.elapsed().as_millis();
        None
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}
