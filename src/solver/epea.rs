use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use tracing::{debug, trace};

use crate::common::{Agent, Plan};
use crate::config::{Config, HeuristicKind, SumOfCostsVariant};
use crate::heap::{OpenList, NOT_IN_HEAP};
use crate::heuristic::{Heuristic, MaxPairsCosts, PairCostTable, SicHeuristic, SumPairsCosts};
use crate::map::Map;
use crate::solver::world::{
    apply_move, collides, reconstruct_plan, AgentState, ExpansionPayload, Feasibility, SlotDeltas,
    WorldKey, WorldState, ILLEGAL_DELTA,
};
use crate::solver::Solver;
use crate::stat::Stats;

/// How a node's successors are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// All joint successors at once.
    AStar,
    /// One agent per expansion; intermediate states carry the OD cursor.
    OperatorDecomposition,
    /// Enhanced partial expansion: per pass, only children whose f matches
    /// the node's current ΔF target.
    PartialExpansion,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::AStar => "astar",
            Strategy::OperatorDecomposition => "od",
            Strategy::PartialExpansion => "epea",
        }
    }
}

enum JointHeuristic<'a> {
    Sic(&'a SicHeuristic),
    Spc(SumPairsCosts<'a>),
    Mpc(MaxPairsCosts<'a>),
}

impl Heuristic for JointHeuristic<'_> {
    fn h(&self, world: &WorldState) -> usize {
        match self {
            JointHeuristic::Sic(sic) => sic.h(world),
            JointHeuristic::Spc(spc) => spc.h(world),
            JointHeuristic::Mpc(mpc) => mpc.h(world),
        }
    }
}

/// Open list plus the canonical node per joint-state key.
struct Frontier {
    open: OpenList<WorldState>,
    nodes: HashMap<WorldKey, Rc<RefCell<WorldState>>>,
    serial: usize,
}

impl Frontier {
    fn new() -> Self {
        Frontier {
            open: OpenList::new(),
            nodes: HashMap::new(),
            serial: 0,
        }
    }

    /// Inserts a generated state, applying duplicate detection: a state
    /// matching a known key is kept only when its g improves, reopening the
    /// key if it was already expanded.
    fn submit(&mut self, mut child: WorldState, variant: SumOfCostsVariant, stats: &mut Stats) {
        stats.low_level_generate_nodes += 1;
        let key = child.key(variant);
        self.serial += 1;
        child.serial = self.serial;

        if let Some(existing) = self.nodes.get(&key) {
            if child.g >= existing.borrow().g {
                return;
            }
            // The stale entry's pending passes are void once a cheaper route
            // to the same state exists.
            if self.open.contains(existing) {
                let stale = Rc::clone(existing);
                self.open.remove(&stale);
            }
        }

        let child = Rc::new(RefCell::new(child));
        self.nodes.insert(key, Rc::clone(&child));
        self.open.push(child);
    }
}

/// Joint-state best-first search over all agents at once.
pub struct JointSearch<'a> {
    map: &'a Map,
    agents: Vec<Agent>,
    sic: &'a SicHeuristic,
    pairs: Option<&'a PairCostTable>,
    strategy: Strategy,
    heuristic: HeuristicKind,
    stats: Stats,
}

impl<'a> JointSearch<'a> {
    pub fn new(
        map: &'a Map,
        agents: Vec<Agent>,
        sic: &'a SicHeuristic,
        pairs: Option<&'a PairCostTable>,
        strategy: Strategy,
        heuristic: HeuristicKind,
    ) -> Self {
        if heuristic != HeuristicKind::Sic {
            assert!(
                pairs.is_some(),
                "pairs heuristic selected without a pair cost table"
            );
        }
        assert!(
            !(strategy == Strategy::PartialExpansion && heuristic == HeuristicKind::Mpc),
            "MPC does not decompose over agents; use the astar or od strategy"
        );
        JointSearch {
            map,
            agents,
            sic,
            pairs,
            strategy,
            heuristic,
            stats: Stats::default(),
        }
    }

    fn make_heuristic(&self) -> JointHeuristic<'a> {
        match self.heuristic {
            HeuristicKind::Sic => JointHeuristic::Sic(self.sic),
            HeuristicKind::Spc => {
                JointHeuristic::Spc(SumPairsCosts::new(self.map, self.pairs.unwrap(), self.sic))
            }
            HeuristicKind::Mpc => {
                JointHeuristic::Mpc(MaxPairsCosts::new(self.map, self.pairs.unwrap(), self.sic))
            }
        }
    }

    /// Slots of the operator-decomposition walk: consecutive agent pairs
    /// when the pair tables drive ΔF, one agent per slot otherwise.
    fn pair_slots(&self) -> bool {
        self.heuristic == HeuristicKind::Spc && self.strategy == Strategy::PartialExpansion
    }

    fn build_payload(
        &self,
        variant: SumOfCostsVariant,
        parent_agents: &[AgentState],
        base_makespan: usize,
    ) -> ExpansionPayload {
        let num_directions = self.map.moves.num_directions();
        let mut slots = Vec::new();

        if self.pair_slots() {
            let pairs = self.pairs.unwrap();
            for k in 0..pairs.num_pairs() {
                let (first, second) = (2 * k, 2 * k + 1);
                let mut deltas = vec![vec![ILLEGAL_DELTA; num_directions]; num_directions];
                let state_1 = &parent_agents[first];
                let state_2 = &parent_agents[second];
                let h_before = pairs.pair_h(
                    self.map,
                    k,
                    state_1.position,
                    state_2.position,
                );
                for d1 in 0..num_directions {
                    let Some(applied_1) =
                        apply_move(self.map, self.sic, variant, state_1, d1, base_makespan)
                    else {
                        continue;
                    };
                    for d2 in 0..num_directions {
                        let Some(applied_2) =
                            apply_move(self.map, self.sic, variant, state_2, d2, base_makespan)
                        else {
                            continue;
                        };
                        if collides(
                            std::slice::from_ref(&applied_1.state),
                            state_2.position,
                            applied_2.state.position,
                        ) {
                            continue;
                        }
                        let h_after = pairs.pair_h(
                            self.map,
                            k,
                            applied_1.state.position,
                            applied_2.state.position,
                        );
                        let raw = h_after as i64 - h_before as i64
                            + (applied_1.delta_g + applied_2.delta_g) as i64;
                        // Unsolvable pair entries read as 0 and can make the
                        // estimate locally inconsistent; clamp instead of
                        // underflowing.
                        let delta = raw.max(0) as u64;
                        deltas[d1][d2] = if delta >= ILLEGAL_DELTA as u64 {
                            ILLEGAL_DELTA
                        } else {
                            delta as u16
                        };
                    }
                }
                slots.push(SlotDeltas::Pair {
                    first,
                    second,
                    deltas,
                });
            }
            if self.agents.len() % 2 == 1 {
                let agent_index = self.agents.len() - 1;
                slots.push(self.single_slot(variant, parent_agents, agent_index, base_makespan));
            }
        } else {
            for agent_index in 0..self.agents.len() {
                slots.push(self.single_slot(variant, parent_agents, agent_index, base_makespan));
            }
        }

        let max_delta = slots
            .iter()
            .map(|slot| slot.max_delta().unwrap_or(0))
            .sum();
        let lookup = vec![vec![Feasibility::Unknown; max_delta as usize + 1]; slots.len()];
        ExpansionPayload {
            slots,
            max_delta,
            lookup,
        }
    }

    fn single_slot(
        &self,
        variant: SumOfCostsVariant,
        parent_agents: &[AgentState],
        agent_index: usize,
        base_makespan: usize,
    ) -> SlotDeltas {
        let num_directions = self.map.moves.num_directions();
        let state = &parent_agents[agent_index];
        let deltas = (0..num_directions)
            .map(|direction| {
                match apply_move(self.map, self.sic, variant, state, direction, base_makespan) {
                    Some(applied) if (applied.delta_f as u64) < ILLEGAL_DELTA as u64 => {
                        applied.delta_f as u16
                    }
                    _ => ILLEGAL_DELTA,
                }
            })
            .collect();
        SlotDeltas::Single {
            agent_index,
            deltas,
        }
    }

    fn expand_astar(
        &mut self,
        variant: SumOfCostsVariant,
        heuristic: &JointHeuristic<'a>,
        current: &Rc<RefCell<WorldState>>,
        frontier: &mut Frontier,
    ) {
        let (children, parent_g, base_makespan) = {
            let parent = current.borrow();
            let mut children = Vec::new();
            let mut chosen = Vec::with_capacity(parent.agents.len());
            self.joint_walk(variant, &parent.agents, parent.makespan, 0, 0, &mut chosen, &mut children);
            (children, parent.g, parent.makespan)
        };

        for (states, delta_g) in children {
            let mut child = WorldState {
                agents: states,
                g: parent_g + delta_g,
                h: 0,
                makespan: base_makespan + 1,
                agent_turn: 0,
                target_delta: 0,
                prev: Some(Rc::clone(current)),
                serial: 0,
                heap_index: NOT_IN_HEAP,
                expansion: None,
            };
            child.h = heuristic.h(&child);
            frontier.submit(child, variant, &mut self.stats);
        }
    }

    /// Depth-first product of every agent's legal moves, pruning collisions
    /// against the agents already committed this timestep.
    #[allow(clippy::too_many_arguments)]
    fn joint_walk(
        &self,
        variant: SumOfCostsVariant,
        parent_agents: &[AgentState],
        base_makespan: usize,
        agent_index: usize,
        delta_g: usize,
        chosen: &mut Vec<AgentState>,
        out: &mut Vec<(Vec<AgentState>, usize)>,
    ) {
        if agent_index == parent_agents.len() {
            out.push((chosen.clone(), delta_g));
            return;
        }
        let state = &parent_agents[agent_index];
        for direction in 0..self.map.moves.num_directions() {
            let Some(applied) =
                apply_move(self.map, self.sic, variant, state, direction, base_makespan)
            else {
                continue;
            };
            if collides(chosen, state.position, applied.state.position) {
                continue;
            }
            let step = applied.delta_g;
            chosen.push(applied.state);
            self.joint_walk(
                variant,
                parent_agents,
                base_makespan,
                agent_index + 1,
                delta_g + step,
                chosen,
                out,
            );
            chosen.pop();
        }
    }

    fn expand_od(
        &mut self,
        variant: SumOfCostsVariant,
        heuristic: &JointHeuristic<'a>,
        current: &Rc<RefCell<WorldState>>,
        frontier: &mut Frontier,
    ) {
        let num_agents = self.agents.len();
        let mut children = Vec::new();
        {
            let parent = current.borrow();
            let turn = parent.agent_turn;
            let state = &parent.agents[turn];
            for direction in 0..self.map.moves.num_directions() {
                let Some(applied) =
                    apply_move(self.map, self.sic, variant, state, direction, parent.makespan)
                else {
                    continue;
                };
                // Agents before the cursor have already committed this step.
                if collides(&parent.agents[..turn], state.position, applied.state.position) {
                    continue;
                }
                let full = turn + 1 == num_agents;
                let mut agents = parent.agents.clone();
                agents[turn] = applied.state;
                children.push(WorldState {
                    agents,
                    g: parent.g + applied.delta_g,
                    h: 0,
                    makespan: if full {
                        parent.makespan + 1
                    } else {
                        parent.makespan
                    },
                    agent_turn: if full { 0 } else { turn + 1 },
                    target_delta: 0,
                    prev: Some(Rc::clone(current)),
                    serial: 0,
                    heap_index: NOT_IN_HEAP,
                    expansion: None,
                });
            }
        }

        for mut child in children {
            child.h = heuristic.h(&child);
            frontier.submit(child, variant, &mut self.stats);
        }
    }

    fn expand_partial(
        &mut self,
        variant: SumOfCostsVariant,
        heuristic: &JointHeuristic<'a>,
        current: &Rc<RefCell<WorldState>>,
        frontier: &mut Frontier,
    ) {
        let (children, next_target, parent_g, parent_f, base_makespan) = {
            let mut borrowed = current.borrow_mut();
            let parent_f = borrowed.f();
            if borrowed.expansion.is_none() {
                borrowed.expansion =
                    Some(self.build_payload(variant, &borrowed.agents, borrowed.makespan));
            }
            let node = &mut *borrowed;
            let WorldState {
                ref agents,
                makespan,
                g,
                target_delta,
                ref mut expansion,
                ..
            } = *node;
            let payload = expansion.as_mut().unwrap();
            let ExpansionPayload {
                ref slots,
                max_delta,
                ref mut lookup,
            } = *payload;

            let mut children = Vec::new();
            if exists_child_for_f(slots, lookup, 0, target_delta) {
                let mut chosen = Vec::with_capacity(agents.len());
                self.od_walk(
                    variant,
                    agents,
                    makespan,
                    slots,
                    lookup,
                    0,
                    target_delta,
                    &mut chosen,
                    0,
                    &mut children,
                );
            }

            // Advance to the next target some child combination can reach.
            let mut next_target = None;
            let mut candidate = target_delta + 1;
            while candidate <= max_delta {
                if exists_child_for_f(slots, lookup, 0, candidate) {
                    next_target = Some(candidate);
                    break;
                }
                candidate += 1;
            }

            (children, next_target, g, parent_f, makespan)
        };

        for (states, delta_g) in children {
            let mut child = WorldState {
                agents: states,
                g: parent_g + delta_g,
                h: 0,
                makespan: base_makespan + 1,
                agent_turn: 0,
                target_delta: 0,
                prev: Some(Rc::clone(current)),
                serial: 0,
                heap_index: NOT_IN_HEAP,
                expansion: None,
            };
            child.h = heuristic.h(&child);
            debug_assert!(
                child.f() >= parent_f,
                "partial expansion emitted a child below its parent's f"
            );
            frontier.submit(child, variant, &mut self.stats);
        }

        if let Some(next) = next_target {
            current.borrow_mut().target_delta = next;
            frontier.open.push(Rc::clone(current));
            trace!(
                "reinserted parent at target {next}, next best f {:?}",
                frontier.open.peek().map(|node| node.borrow().f())
            );
        }
    }

    /// One pass of the operator-decomposition walk: commit moves slot by
    /// slot, keeping only prefixes that can still burn the remaining ΔF
    /// exactly.
    #[allow(clippy::too_many_arguments)]
    fn od_walk(
        &self,
        variant: SumOfCostsVariant,
        parent_agents: &[AgentState],
        base_makespan: usize,
        slots: &[SlotDeltas],
        lookup: &mut [Vec<Feasibility>],
        slot: usize,
        remaining: u16,
        chosen: &mut Vec<AgentState>,
        delta_g: usize,
        out: &mut Vec<(Vec<AgentState>, usize)>,
    ) {
        if slot == slots.len() {
            debug_assert_eq!(remaining, 0, "OD walk ended with unburned ΔF");
            out.push((chosen.clone(), delta_g));
            return;
        }
        match &slots[slot] {
            SlotDeltas::Single {
                agent_index,
                deltas,
            } => {
                for (direction, &delta) in deltas.iter().enumerate() {
                    if delta == ILLEGAL_DELTA {
                        continue;
                    }
                    let Some(rest) = remaining.checked_sub(delta) else {
                        continue;
                    };
                    if !exists_child_for_f(slots, lookup, slot + 1, rest) {
                        continue;
                    }
                    let state = &parent_agents[*agent_index];
                    let applied =
                        apply_move(self.map, self.sic, variant, state, direction, base_makespan)
                            .expect("ΔF table listed an illegal move");
                    if collides(chosen, state.position, applied.state.position) {
                        continue;
                    }
                    let step = applied.delta_g;
                    chosen.push(applied.state);
                    self.od_walk(
                        variant,
                        parent_agents,
                        base_makespan,
                        slots,
                        lookup,
                        slot + 1,
                        rest,
                        chosen,
                        delta_g + step,
                        out,
                    );
                    chosen.pop();
                }
            }
            SlotDeltas::Pair {
                first,
                second,
                deltas,
            } => {
                for (d1, row) in deltas.iter().enumerate() {
                    for (d2, &delta) in row.iter().enumerate() {
                        if delta == ILLEGAL_DELTA {
                            continue;
                        }
                        let Some(rest) = remaining.checked_sub(delta) else {
                            continue;
                        };
                        if !exists_child_for_f(slots, lookup, slot + 1, rest) {
                            continue;
                        }
                        let state_1 = &parent_agents[*first];
                        let state_2 = &parent_agents[*second];
                        let applied_1 =
                            apply_move(self.map, self.sic, variant, state_1, d1, base_makespan)
                                .expect("ΔF table listed an illegal move");
                        if collides(chosen, state_1.position, applied_1.state.position) {
                            continue;
                        }
                        let applied_2 =
                            apply_move(self.map, self.sic, variant, state_2, d2, base_makespan)
                                .expect("ΔF table listed an illegal move");
                        chosen.push(applied_1.state);
                        if collides(chosen, state_2.position, applied_2.state.position) {
                            chosen.pop();
                            continue;
                        }
                        let step = applied_1.delta_g + applied_2.delta_g;
                        chosen.push(applied_2.state);
                        self.od_walk(
                            variant,
                            parent_agents,
                            base_makespan,
                            slots,
                            lookup,
                            slot + 1,
                            rest,
                            chosen,
                            delta_g + step,
                            out,
                        );
                        chosen.pop();
                        chosen.pop();
                    }
                }
            }
        }
    }
}

/// Can slots `slot..` contribute exactly `delta` more f? Memoized per node
/// across passes.
fn exists_child_for_f(
    slots: &[SlotDeltas],
    lookup: &mut [Vec<Feasibility>],
    slot: usize,
    delta: u16,
) -> bool {
    if slot == slots.len() {
        return delta == 0;
    }
    match lookup[slot][delta as usize] {
        Feasibility::Yes => true,
        Feasibility::No => false,
        Feasibility::Unknown => {
            let mut found = false;
            let options: Vec<u16> = match &slots[slot] {
                SlotDeltas::Single { deltas, .. } => deltas.clone(),
                SlotDeltas::Pair { deltas, .. } => {
                    deltas.iter().flatten().copied().collect()
                }
            };
            for option in options {
                if option == ILLEGAL_DELTA {
                    continue;
                }
                if let Some(rest) = delta.checked_sub(option) {
                    if exists_child_for_f(slots, lookup, slot + 1, rest) {
                        found = true;
                        break;
                    }
                }
            }
            lookup[slot][delta as usize] = if found {
                Feasibility::Yes
            } else {
                Feasibility::No
            };
            found
        }
    }
}

impl Solver for JointSearch<'_> {
    fn solve(&mut self, config: &Config) -> Option<Plan> {
        let total_solve_start_time = Instant::now();
        let variant = config.sum_of_costs_variant;
        let heuristic = self.make_heuristic();
        self.stats = Stats::default();
        self.stats.max_subgroup = self.agents.len();

        if self.sic.unreachable_start(&self.agents).is_some() {
            debug!("instance rejected: a start cannot reach its goal");
            self.stats.mark_failed();
            return None;
        }

        let mut frontier = Frontier::new();
        let mut root = WorldState::root(&self.agents, self.sic);
        root.h = heuristic.h(&root);
        let root = Rc::new(RefCell::new(root));
        frontier
            .nodes
            .insert(root.borrow().key(variant), Rc::clone(&root));
        frontier.open.push(root);

        while let Some(current) = frontier.open.pop() {
            if total_solve_start_time.elapsed().as_millis() as u64 > config.time_budget_ms {
                debug!("{} timed out", self.strategy.name());
                self.stats.mark_failed();
                self.stats.time_ms = total_solve_start_time.elapsed().as_millis();
                return None;
            }
            self.stats.low_level_expand_nodes += 1;
            trace!(
                "expand f {} with {} open nodes",
                current.borrow().f(),
                frontier.open.len()
            );

            if current.borrow().is_goal() {
                let plan = reconstruct_plan(&current);
                self.stats.success = true;
                self.stats.costs = current.borrow().g as i64;
                self.stats.solution_depth = current.borrow().makespan;
                self.stats.time_ms = total_solve_start_time.elapsed().as_millis();
                plan.log_plan(self.strategy.name());
                return Some(plan);
            }

            match self.strategy {
                Strategy::AStar => self.expand_astar(variant, &heuristic, &current, &mut frontier),
                Strategy::OperatorDecomposition => {
                    self.expand_od(variant, &heuristic, &current, &mut frontier)
                }
                Strategy::PartialExpansion => {
                    self.expand_partial(variant, &heuristic, &current, &mut frontier)
                }
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
