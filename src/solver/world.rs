use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use crate::common::{Agent, Plan};
use crate::config::SumOfCostsVariant;
use crate::heap::{HeapItem, NOT_IN_HEAP};
use crate::heuristic::SicHeuristic;
use crate::map::Map;
use crate::moves::WAIT;

/// Reserved all-ones sentinel: an illegal move in a ΔF table, and the value
/// `remaining_delta_f` takes when a subtraction would underflow.
pub(crate) const ILLEGAL_DELTA: u16 = u16::MAX;

/// Mutable per-agent search state inside a joint node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AgentState {
    pub(crate) agent: usize,
    pub(crate) position: (usize, usize),
    /// Position at the previous full timestep; equals `position` after a wait.
    pub(crate) last_position: (usize, usize),
    pub(crate) direction: usize,
    /// Steps charged to this agent so far (its share of g).
    pub(crate) current_step: usize,
    /// Step at which the agent most recently arrived at its goal; 0 while it
    /// has never left.
    pub(crate) arrival_time: usize,
    pub(crate) h: usize,
}

/// Memoized answer to "can the remaining slots contribute exactly Δ".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Feasibility {
    Unknown,
    Yes,
    No,
}

/// ΔF table for one slot of the operator-decomposition walk: a lone agent
/// or a consecutive agent pair when the pairs heuristic drives the search.
#[derive(Debug, Clone)]
pub(crate) enum SlotDeltas {
    Single {
        agent_index: usize,
        deltas: Vec<u16>,
    },
    Pair {
        first: usize,
        second: usize,
        deltas: Vec<Vec<u16>>,
    },
}

impl SlotDeltas {
    /// Largest legal ΔF this slot can contribute; `None` when every move is
    /// illegal.
    pub(crate) fn max_delta(&self) -> Option<u16> {
        match self {
            SlotDeltas::Single { deltas, .. } => {
                deltas.iter().copied().filter(|&d| d != ILLEGAL_DELTA).max()
            }
            SlotDeltas::Pair { deltas, .. } => deltas
                .iter()
                .flatten()
                .copied()
                .filter(|&d| d != ILLEGAL_DELTA)
                .max(),
        }
    }
}

/// Partial-expansion payload, computed on demand at a node's first
/// expansion and kept across re-insertions.
#[derive(Debug, Clone)]
pub(crate) struct ExpansionPayload {
    pub(crate) slots: Vec<SlotDeltas>,
    pub(crate) max_delta: u16,
    pub(crate) lookup: Vec<Vec<Feasibility>>,
}

/// Joint search node: one `AgentState` per agent plus the bookkeeping the
/// engines need. Shared between the open list and the closed map.
#[derive(Debug)]
pub(crate) struct WorldState {
    pub(crate) agents: Vec<AgentState>,
    pub(crate) g: usize,
    pub(crate) h: usize,
    /// Max step committed across agents.
    pub(crate) makespan: usize,
    /// Operator-decomposition cursor; 0 marks a fully committed state.
    pub(crate) agent_turn: usize,
    /// Current ΔF target for partial expansion; folded into `f`.
    pub(crate) target_delta: u16,
    pub(crate) prev: Option<Rc<RefCell<WorldState>>>,
    pub(crate) serial: usize,
    pub(crate) heap_index: usize,
    pub(crate) expansion: Option<ExpansionPayload>,
}

/// Joint-state identity. Makespan participates only under the original
/// cost variant, where arrival history changes future charges. For OD
/// intermediate states the committed agents' previous cells participate
/// too, since swap legality of the remaining agents depends on them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct WorldKey {
    positions: Vec<(usize, usize)>,
    moved_from: Vec<(usize, usize)>,
    agent_turn: usize,
    makespan: Option<usize>,
}

impl WorldState {
    pub(crate) fn root(agents: &[Agent], sic: &SicHeuristic) -> WorldState {
        let states = agents
            .iter()
            .map(|agent| AgentState {
                agent: agent.id,
                position: agent.start,
                last_position: agent.start,
                direction: WAIT,
                current_step: 0,
                arrival_time: 0,
                h: sic.agent_h(agent.id, agent.start).max(0) as usize,
            })
            .collect();
        WorldState {
            agents: states,
            g: 0,
            h: 0,
            makespan: 0,
            agent_turn: 0,
            target_delta: 0,
            prev: None,
            serial: 0,
            heap_index: NOT_IN_HEAP,
            expansion: None,
        }
    }

    pub(crate) fn f(&self) -> usize {
        self.g + self.h + self.target_delta as usize
    }

    pub(crate) fn key(&self, variant: SumOfCostsVariant) -> WorldKey {
        WorldKey {
            positions: self.agents.iter().map(|state| state.position).collect(),
            moved_from: self.agents[..self.agent_turn]
                .iter()
                .map(|state| state.last_position)
                .collect(),
            agent_turn: self.agent_turn,
            makespan: (variant == SumOfCostsVariant::Orig).then_some(self.makespan),
        }
    }

    /// A fully committed state with every agent standing on its goal.
    pub(crate) fn is_goal(&self) -> bool {
        self.agent_turn == 0 && self.agents.iter().all(|state| state.h == 0)
    }
}

impl HeapItem for WorldState {
    fn heap_index(&self) -> usize {
        self.heap_index
    }

    fn set_heap_index(&mut self, index: usize) {
        self.heap_index = index;
    }

    fn heap_cmp(&self, other: &Self) -> Ordering {
        self.f()
            .cmp(&other.f())
            // Deeper states first: prefer larger makespan, then a further
            // advanced OD cursor.
            .then_with(|| other.makespan.cmp(&self.makespan))
            .then_with(|| other.agent_turn.cmp(&self.agent_turn))
            .then_with(|| self.serial.cmp(&other.serial))
    }
}

/// Outcome of applying one direction to one agent.
#[derive(Debug, Clone)]
pub(crate) struct AppliedMove {
    pub(crate) state: AgentState,
    pub(crate) delta_g: usize,
    pub(crate) delta_f: usize,
}

/// Applies `direction` to `state` for the timestep following
/// `base_makespan`. Returns `None` when the move leaves the grid, hits an
/// obstacle, or lands where the goal is unreachable.
pub(crate) fn apply_move(
    map: &Map,
    sic: &SicHeuristic,
    variant: SumOfCostsVariant,
    state: &AgentState,
    direction: usize,
    base_makespan: usize,
) -> Option<AppliedMove> {
    let target = map.move_target(state.position, direction)?;
    let h_after_raw = sic.agent_h(state.agent, target);
    if h_after_raw < 0 {
        return None;
    }
    let h_before = state.h;
    let h_after = h_after_raw as usize;

    if h_before == 0 && h_after == 0 {
        // Waiting at the goal is free in both cost variants.
        debug_assert_eq!(target, state.position);
        return Some(AppliedMove {
            state: AgentState {
                direction,
                last_position: state.position,
                ..state.clone()
            },
            delta_g: 0,
            delta_f: 0,
        });
    }

    let leaving_goal = h_before == 0;
    let (delta_g, current_step) = if leaving_goal && variant == SumOfCostsVariant::Orig {
        // The stationary steps accumulated at the goal enter g now.
        let charge = (base_makespan - state.arrival_time) + 1;
        (charge, base_makespan + 1)
    } else {
        (1, state.current_step + 1)
    };
    let arrival_time = if h_after == 0 {
        base_makespan + 1
    } else {
        state.arrival_time
    };

    let delta_f = (h_after + delta_g)
        .checked_sub(h_before)
        .expect("inconsistent heuristic: f decreased across a move");

    Some(AppliedMove {
        state: AgentState {
            agent: state.agent,
            position: target,
            last_position: state.position,
            direction,
            current_step,
            arrival_time,
            h: h_after,
        },
        delta_g,
        delta_f,
    })
}

/// True when moving `from` -> `to` collides with any already committed
/// agent of the current timestep, on a cell or across an edge.
pub(crate) fn collides(moved: &[AgentState], from: (usize, usize), to: (usize, usize)) -> bool {
    moved.iter().any(|other| {
        other.position == to || (other.position == from && other.last_position == to)
    })
}

/// Walks the parent chain of a goal state and rebuilds the joint plan from
/// its fully committed states.
pub(crate) fn reconstruct_plan(goal: &Rc<RefCell<WorldState>>) -> Plan {
    let mut chain = Vec::new();
    let mut cursor = Some(Rc::clone(goal));
    while let Some(node) = cursor {
        let borrowed = node.borrow();
        if borrowed.agent_turn == 0 {
            chain.push(
                borrowed
                    .agents
                    .iter()
                    .map(|state| state.position)
                    .collect::<Vec<_>>(),
            );
        }
        cursor = borrowed.prev.clone();
    }
    chain.reverse();

    let num_agents = chain.first().map_or(0, |step| step.len());
    let paths = (0..num_agents)
        .map(|agent| chain.iter().map(|step| step[agent]).collect())
        .collect();
    Plan { paths }
}
