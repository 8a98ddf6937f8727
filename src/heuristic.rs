mod pairs;
mod sic;

pub(crate) use pairs::{MaxPairsCosts, PairCostTable, SumPairsCosts};
pub(crate) use sic::SicHeuristic;

use crate::solver::world::WorldState;

/// A joint-state heuristic. Implementations are built once per instance and
/// shared read-only across all subsearches.
pub(crate) trait Heuristic {
    /// Admissible estimate of the remaining sum of costs for `world`.
    fn h(&self, world: &WorldState) -> usize;
}
