use tracing::debug;

use crate::common::Agent;
use crate::config::{Config, HeuristicKind, SumOfCostsVariant};
use crate::heuristic::{Heuristic, SicHeuristic};
use crate::map::Map;
use crate::solver::world::WorldState;
use crate::solver::{JointSearch, Solver, Strategy};

/// Optimal-cost tensor over consecutive agent pairs: `costs[k][c1][c2]` is
/// the optimal joint cost for pair `k` to reach its goals from the cells
/// with cardinality `c1` and `c2`, with no other agents present. Entries
/// stay at -1 when the two cells coincide or the subproblem is unsolvable.
#[derive(Debug, Clone)]
pub(crate) struct PairCostTable {
    costs: Vec<Vec<Vec<i64>>>,
    num_pairs: usize,
    odd_agent: Option<usize>,
}

impl PairCostTable {
    /// Runs the partial-expansion solver on every legal two-agent start pair
    /// of every consecutive agent pair. The subsearches use the
    /// free-goal-wait accounting, whose optimum never exceeds the original
    /// one, so the table stays admissible under both variants and the
    /// construction terminates on unsolvable pair states.
    pub(crate) fn build(map: &Map, agents: &[Agent], config: &Config) -> Self {
        let num_pairs = agents.len() / 2;
        let odd_agent = (agents.len() % 2 == 1).then(|| agents.len() - 1);
        let num_locations = map.num_locations();
        let mut costs = vec![vec![vec![-1i64; num_locations]; num_locations]; num_pairs];

        let mut sub_config = config.clone();
        sub_config.heuristic = HeuristicKind::Sic;
        sub_config.sum_of_costs_variant = SumOfCostsVariant::WaitingAtGoalAlwaysFree;

        for k in 0..num_pairs {
            let goals = (agents[2 * k].goal, agents[2 * k + 1].goal);
            // SIC depends only on the goals, so one build serves every
            // start pair of this agent pair.
            let template = vec![
                Agent {
                    id: 0,
                    start: goals.0,
                    goal: goals.0,
                },
                Agent {
                    id: 1,
                    start: goals.1,
                    goal: goals.1,
                },
            ];
            let sub_sic = SicHeuristic::build(map, &template);

            for c1 in 0..num_locations {
                for c2 in 0..num_locations {
                    if c1 == c2 {
                        continue;
                    }
                    let sub_agents = vec![
                        Agent {
                            id: 0,
                            start: map.location(c1),
                            goal: goals.0,
                        },
                        Agent {
                            id: 1,
                            start: map.location(c2),
                            goal: goals.1,
                        },
                    ];
                    let mut search = JointSearch::new(
                        map,
                        sub_agents,
                        &sub_sic,
                        None,
                        Strategy::PartialExpansion,
                        HeuristicKind::Sic,
                    );
                    if search.solve(&sub_config).is_some() {
                        costs[k][c1][c2] = search.stats().costs;
                    }
                }
            }
            debug!("built pair cost table for agents ({}, {})", 2 * k, 2 * k + 1);
        }

        PairCostTable {
            costs,
            num_pairs,
            odd_agent,
        }
    }

    pub(crate) fn num_pairs(&self) -> usize {
        self.num_pairs
    }

    /// Pair estimate for two concrete cells. The -1 sentinel reads as 0,
    /// which keeps the estimate admissible.
    pub(crate) fn pair_h(
        &self,
        map: &Map,
        k: usize,
        pos_1: (usize, usize),
        pos_2: (usize, usize),
    ) -> usize {
        let c1 = map
            .location_index(pos_1)
            .expect("agent standing on an obstacle");
        let c2 = map
            .location_index(pos_2)
            .expect("agent standing on an obstacle");
        self.costs[k][c1][c2].max(0) as usize
    }
}

/// Sum-of-pairs-costs aggregator; an odd trailing agent contributes its SIC
/// value.
pub(crate) struct SumPairsCosts<'a> {
    map: &'a Map,
    pairs: &'a PairCostTable,
    sic: &'a SicHeuristic,
}

impl<'a> SumPairsCosts<'a> {
    pub(crate) fn new(map: &'a Map, pairs: &'a PairCostTable, sic: &'a SicHeuristic) -> Self {
        SumPairsCosts { map, pairs, sic }
    }
}

impl Heuristic for SumPairsCosts<'_> {
    fn h(&self, world: &WorldState) -> usize {
        let mut total = 0;
        for k in 0..self.pairs.num_pairs() {
            total += self.pairs.pair_h(
                self.map,
                k,
                world.agents[2 * k].position,
                world.agents[2 * k + 1].position,
            );
        }
        if let Some(odd) = self.pairs.odd_agent {
            total += self.sic.agent_h(odd, world.agents[odd].position).max(0) as usize;
        }
        total
    }
}

/// Max-of-pairs-costs aggregator. In OD intermediate states the estimate
/// drops by one unit step while the cursor has not yet passed the maximal
/// pair, which keeps f non-decreasing along committed moves.
pub(crate) struct MaxPairsCosts<'a> {
    map: &'a Map,
    pairs: &'a PairCostTable,
    sic: &'a SicHeuristic,
}

impl<'a> MaxPairsCosts<'a> {
    pub(crate) fn new(map: &'a Map, pairs: &'a PairCostTable, sic: &'a SicHeuristic) -> Self {
        MaxPairsCosts { map, pairs, sic }
    }
}

impl Heuristic for MaxPairsCosts<'_> {
    fn h(&self, world: &WorldState) -> usize {
        let mut best = 0;
        let mut best_pair = None;
        for k in 0..self.pairs.num_pairs() {
            let value = self.pairs.pair_h(
                self.map,
                k,
                world.agents[2 * k].position,
                world.agents[2 * k + 1].position,
            );
            if value > best {
                best = value;
                best_pair = Some(k);
            }
        }
        if let Some(odd) = self.pairs.odd_agent {
            let value = self.sic.agent_h(odd, world.agents[odd].position).max(0) as usize;
            if value > best {
                best = value;
                best_pair = None; // no decrement for the unpaired agent
            }
        }

        if world.agent_turn != 0 && best > 0 {
            if let Some(k) = best_pair {
                if world.agent_turn <= k {
                    // The decrement equals the unit edge cost; anything else
                    // would misestimate here.
                    debug_assert_eq!(self.map.moves.unit_cost(), 1);
                    best -= self.map.moves.unit_cost();
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moves::AllowedDirections;
    use crate::solver::world::WorldState;

    fn crossing_instance() -> (Map, Vec<Agent>) {
        let map = Map::from_ascii(&["...", "...", "..."], AllowedDirections::Five).unwrap();
        let agents = vec![
            Agent {
                id: 0,
                start: (0, 0),
                goal: (2, 0),
            },
            Agent {
                id: 1,
                start: (2, 0),
                goal: (0, 0),
            },
        ];
        (map, agents)
    }

    /// Corridor with a one-cell bay: the agents must swap ends, and one of
    /// them has to duck into the bay.
    fn bay_instance() -> (Map, Vec<Agent>) {
        let map = Map::from_ascii(&["......", "@@@.@@"], AllowedDirections::Five).unwrap();
        let agents = vec![
            Agent {
                id: 0,
                start: (0, 0),
                goal: (0, 5),
            },
            Agent {
                id: 1,
                start: (0, 5),
                goal: (0, 0),
            },
        ];
        (map, agents)
    }

    #[test]
    fn test_pair_table_matches_true_pair_optimum() {
        let (map, agents) = crossing_instance();
        let config = Config::default();
        let pairs = PairCostTable::build(&map, &agents, &config);
        let sic = SicHeuristic::build(&map, &agents);

        let root = WorldState::root(&agents, &sic);
        let spc = SumPairsCosts::new(&map, &pairs, &sic);
        // The two-agent crossing costs 6, which SIC underestimates as 4.
        assert_eq!(spc.h(&root), 6);
        assert_eq!(sic.h(&root), 4);
    }

    #[test]
    fn test_pairs_dominate_sic_on_bay() {
        let (map, agents) = bay_instance();
        let config = Config::default();
        let pairs = PairCostTable::build(&map, &agents, &config);
        let sic = SicHeuristic::build(&map, &agents);

        let root = WorldState::root(&agents, &sic);
        let spc = SumPairsCosts::new(&map, &pairs, &sic);
        assert!(
            spc.h(&root) > sic.h(&root),
            "pairs {} must beat SIC {}",
            spc.h(&root),
            sic.h(&root)
        );
        assert_eq!(spc.h(&root), 12);
        assert_eq!(sic.h(&root), 10);
    }

    #[test]
    fn test_same_cell_entries_stay_sentinel() {
        let (map, agents) = crossing_instance();
        let config = Config::default();
        let pairs = PairCostTable::build(&map, &agents, &config);
        for c in 0..map.num_locations() {
            assert_eq!(pairs.costs[0][c][c], -1);
        }
        // The sentinel reads as an admissible 0.
        let cell = map.location(0);
        assert_eq!(pairs.pair_h(&map, 0, cell, cell), 0);
    }

    #[test]
    fn test_odd_agent_contributes_sic() {
        let map = Map::from_ascii(&["...", "...", "..."], AllowedDirections::Five).unwrap();
        let agents = vec![
            Agent {
                id: 0,
                start: (0, 0),
                goal: (0, 2),
            },
            Agent {
                id: 1,
                start: (2, 0),
                goal: (2, 2),
            },
            Agent {
                id: 2,
                start: (1, 0),
                goal: (1, 2),
            },
        ];
        let config = Config::default();
        let pairs = PairCostTable::build(&map, &agents, &config);
        let sic = SicHeuristic::build(&map, &agents);

        let root = WorldState::root(&agents, &sic);
        let spc = SumPairsCosts::new(&map, &pairs, &sic);
        // Disjoint rows: the pair costs 4 jointly, the odd agent adds its
        // own SIC distance of 2.
        assert_eq!(spc.h(&root), 6);
    }

    #[test]
    fn test_mpc_takes_maximum_and_od_decrement() {
        let map = Map::from_ascii(&["...", "...", "..."], AllowedDirections::Five).unwrap();
        let agents: Vec<Agent> = [(0, 0), (0, 2), (2, 0), (2, 2)]
            .iter()
            .enumerate()
            .map(|(id, &start)| Agent {
                id,
                start,
                goal: (1, 1),
            })
            .collect();
        let sic = SicHeuristic::build(&map, &agents);
        // Synthetic tensor: pair 1 dominates pair 0.
        let num_locations = map.num_locations();
        let pairs = PairCostTable {
            costs: vec![
                vec![vec![3; num_locations]; num_locations],
                vec![vec![7; num_locations]; num_locations],
            ],
            num_pairs: 2,
            odd_agent: None,
        };
        let mpc = MaxPairsCosts::new(&map, &pairs, &sic);

        let mut world = WorldState::root(&agents, &sic);
        assert_eq!(mpc.h(&world), 7);

        // Cursor not yet past the maximal pair: one unit comes off.
        world.agent_turn = 1;
        assert_eq!(mpc.h(&world), 6);

        // Cursor inside the maximal pair: the full estimate stands.
        world.agent_turn = 2;
        assert_eq!(mpc.h(&world), 7);
    }

    #[test]
    fn test_epea_with_spc_solves_bay_optimally() {
        let (map, agents) = bay_instance();
        let config = Config::default();
        let pairs = PairCostTable::build(&map, &agents, &config);
        let sic = SicHeuristic::build(&map, &agents);

        let mut search = JointSearch::new(
            &map,
            agents.clone(),
            &sic,
            Some(&pairs),
            Strategy::PartialExpansion,
            HeuristicKind::Spc,
        );
        let mut spc_config = config.clone();
        spc_config.heuristic = HeuristicKind::Spc;
        let plan = search.solve(&spc_config).unwrap();
        assert!(plan.verify(&map, &agents));
        assert_eq!(search.stats().costs, 12);
    }

    #[test]
    fn test_od_with_mpc_solves_crossing_optimally() {
        let (map, agents) = crossing_instance();
        let config = Config::default();
        let pairs = PairCostTable::build(&map, &agents, &config);
        let sic = SicHeuristic::build(&map, &agents);

        let mut search = JointSearch::new(
            &map,
            agents.clone(),
            &sic,
            Some(&pairs),
            Strategy::OperatorDecomposition,
            HeuristicKind::Mpc,
        );
        let mut mpc_config = config.clone();
        mpc_config.heuristic = HeuristicKind::Mpc;
        let plan = search.solve(&mpc_config).unwrap();
        assert!(plan.verify(&map, &agents));
        assert_eq!(search.stats().costs, 6);
    }
}
