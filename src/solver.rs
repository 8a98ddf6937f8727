mod astar;
mod cbs;
mod comm;
mod epea;
pub(crate) mod world;

pub use cbs::Cbs;
pub use epea::{JointSearch, Strategy};

use crate::common::Plan;
use crate::config::Config;
use crate::stat::Stats;

pub trait Solver {
    /// Runs the search under the configured budget. `None` means the
    /// instance is unsolvable or the budget ran out; the stats tell which.
    fn solve(&mut self, config: &Config) -> Option<Plan>;

    fn stats(&self) -> &Stats;
}
