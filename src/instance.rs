use std::collections::HashSet;

use anyhow::{bail, Result};
use tracing::info;

use crate::common::Agent;
use crate::config::{Config, HeuristicKind};
use crate::heuristic::{PairCostTable, SicHeuristic};
use crate::map::Map;

/// An immutable solving context: the grid, the agents, and the heuristic
/// tables precomputed once and shared read-only by every solver run.
pub struct ProblemInstance {
    pub map: Map,
    pub agents: Vec<Agent>,
    sic: SicHeuristic,
    pairs: Option<PairCostTable>,
}

impl ProblemInstance {
    /// Validates the agents against the grid and precomputes the heuristic
    /// tables. The pair cost table is only built when a pairs heuristic is
    /// configured, since its construction solves every two-agent
    /// subproblem.
    pub fn new(map: Map, agents: Vec<Agent>, config: &Config) -> Result<Self> {
        if agents.is_empty() {
            bail!("instance has no agents");
        }
        let mut seen_starts = HashSet::new();
        for (index, agent) in agents.iter().enumerate() {
            if agent.id != index {
                bail!("agent ids must be dense and ordered, got {} at {index}", agent.id);
            }
            if !agent.verify(&map) {
                bail!("agent {} starts or ends on an obstacle", agent.id);
            }
            if !seen_starts.insert(agent.start) {
                bail!("two agents share the start cell {:?}", agent.start);
            }
        }

        let sic = SicHeuristic::build(&map, &agents);
        if let Some(id) = sic.unreachable_start(&agents) {
            bail!("agent {id} cannot reach its goal from its start");
        }

        let pairs = match config.heuristic {
            HeuristicKind::Sic => None,
            HeuristicKind::Spc | HeuristicKind::Mpc => {
                info!("building pair cost tables for {} agents", agents.len());
                Some(PairCostTable::build(&map, &agents, config))
            }
        };

        Ok(ProblemInstance {
            map,
            agents,
            sic,
            pairs,
        })
    }

    pub(crate) fn sic(&self) -> &SicHeuristic {
        &self.sic
    }

    pub(crate) fn pairs(&self) -> Option<&PairCostTable> {
        self.pairs.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moves::AllowedDirections;

    fn open_map() -> Map {
        Map::from_ascii(&["...", "...", "..."], AllowedDirections::Five).unwrap()
    }

    #[test]
    fn test_accepts_valid_instance() {
        let agents = vec![
            Agent {
                id: 0,
                start: (0, 0),
                goal: (2, 2),
            },
            Agent {
                id: 1,
                start: (2, 0),
                goal: (0, 2),
            },
        ];
        let instance = ProblemInstance::new(open_map(), agents, &Config::default()).unwrap();
        assert!(instance.pairs().is_none());
        assert_eq!(instance.sic().agent_h(0, (0, 0)), 4);
    }

    #[test]
    fn test_rejects_shared_start() {
        let agents = vec![
            Agent {
                id: 0,
                start: (0, 0),
                goal: (2, 2),
            },
            Agent {
                id: 1,
                start: (0, 0),
                goal: (0, 2),
            },
        ];
        assert!(ProblemInstance::new(open_map(), agents, &Config::default()).is_err());
    }

    #[test]
    fn test_rejects_start_on_obstacle() {
        let map = Map::from_ascii(&["@..", "...", "..."], AllowedDirections::Five).unwrap();
        let agents = vec![Agent {
            id: 0,
            start: (0, 0),
            goal: (2, 2),
        }];
        assert!(ProblemInstance::new(map, agents, &Config::default()).is_err());
    }

    #[test]
    fn test_rejects_unreachable_goal() {
        let map = Map::from_ascii(&[".@.", ".@.", ".@."], AllowedDirections::Five).unwrap();
        let agents = vec![Agent {
            id: 0,
            start: (0, 0),
            goal: (0, 2),
        }];
        assert!(ProblemInstance::new(map, agents, &Config::default()).is_err());
    }

    #[test]
    fn test_builds_pair_table_when_configured() {
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
        let mut config = Config::default();
        config.heuristic = HeuristicKind::Spc;
        let instance = ProblemInstance::new(open_map(), agents, &config).unwrap();
        assert!(instance.pairs().is_some());
    }
}
