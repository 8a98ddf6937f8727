use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::moves::AllowedDirections;

#[derive(Parser, Debug)]
#[command(
    name = "Rust MAPF",
    about = "Optimal multi-agent path finding (EPEA*, OD, CBS) on 4-connected grids.",
    version = "1.0"
)]
pub struct Cli {
    #[arg(long, short, help = "Path to the YAML config file")]
    pub config: Option<String>,

    #[arg(long, help = "Override the map file path")]
    pub map: Option<String>,

    #[arg(long, help = "Override the scenario file path")]
    pub scenario: Option<String>,

    #[arg(long, help = "Override the number of agents")]
    pub num_agents: Option<usize>,

    #[arg(long, help = "Override the RNG seed")]
    pub seed: Option<u64>,

    #[arg(long, help = "Override the CSV output path")]
    pub output: Option<String>,

    #[arg(
        long,
        help = "Re-export the loaded instance; format picked by extension \
                (.agents, .scen, .map, .grid, combined otherwise)"
    )]
    pub export: Option<String>,
}

/// Cost accounting for waits at the goal. Under `Orig` stationary goal steps
/// enter g once the agent leaves its goal again; under the free variant they
/// are never charged.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SumOfCostsVariant {
    Orig,
    WaitingAtGoalAlwaysFree,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CbsSplitMode {
    Local,
    Disjoint,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum HeuristicKind {
    Sic,
    Spc,
    Mpc,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MapFormat {
    Benchmark,
    Liron,
}

#[derive(Serialize, Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub map_path: String,
    pub map_format: MapFormat,
    pub scenario_path: String,
    pub num_agents: usize,
    pub seed: u64,
    /// Solvers to run, in order: any of "astar", "od", "epea", "cbs".
    pub solvers: Vec<String>,
    pub heuristic: HeuristicKind,
    pub sum_of_costs_variant: SumOfCostsVariant,
    pub allowed_directions: usize,
    pub cbs_split_mode: CbsSplitMode,
    pub op_bypass_conflicts: bool,
    pub time_budget_ms: u64,
    pub max_agents: usize,
    pub max_consecutive_failures: usize,
    pub output_csv: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            map_path: "map_file/test/test.map".to_string(),
            map_format: MapFormat::Benchmark,
            scenario_path: "map_file/test/test.agents".to_string(),
            num_agents: 2,
            seed: 0,
            solvers: vec!["epea".to_string(), "cbs".to_string()],
            heuristic: HeuristicKind::Sic,
            sum_of_costs_variant: SumOfCostsVariant::Orig,
            allowed_directions: 5,
            cbs_split_mode: CbsSplitMode::Local,
            op_bypass_conflicts: false,
            time_budget_ms: 300_000,
            max_agents: 40,
            max_consecutive_failures: 5,
            output_csv: "results.csv".to_string(),
        }
    }
}

impl Config {
    pub fn from_yaml_str(config_str: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(config_str)?;
        config.validate()
    }

    pub fn override_from_command_line(mut self, cli: &Cli) -> anyhow::Result<Self> {
        if let Some(map) = &cli.map {
            self.map_path = map.clone();
        }
        if let Some(scenario) = &cli.scenario {
            self.scenario_path = scenario.clone();
        }
        if let Some(num_agents) = cli.num_agents {
            self.num_agents = num_agents;
        }
        if let Some(seed) = cli.seed {
            self.seed = seed;
        }
        if let Some(output) = &cli.output {
            self.output_csv = output.clone();
        }
        self.validate()
    }

    pub fn validate(self) -> anyhow::Result<Self> {
        if self.num_agents == 0 {
            anyhow::bail!("num_agents must be positive");
        }
        if self.num_agents > self.max_agents {
            anyhow::bail!(
                "num_agents {} exceeds max_agents {}",
                self.num_agents,
                self.max_agents
            );
        }
        if AllowedDirections::from_count(self.allowed_directions).is_none() {
            anyhow::bail!("allowed_directions must be 5 or 9");
        }
        if self.time_budget_ms == 0 {
            anyhow::bail!("time_budget_ms must be positive");
        }
        for solver in &self.solvers {
            if !matches!(solver.as_str(), "astar" | "od" | "epea" | "cbs") {
                anyhow::bail!("unknown solver {solver:?}");
            }
        }
        Ok(self)
    }

    pub fn directions(&self) -> AllowedDirections {
        AllowedDirections::from_count(self.allowed_directions).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default().validate().unwrap();
        assert_eq!(config.allowed_directions, 5);
        assert_eq!(config.sum_of_costs_variant, SumOfCostsVariant::Orig);
    }

    #[test]
    fn test_parse_yaml_overrides() {
        let config = Config::from_yaml_str(
            "num_agents: 4\n\
             sum_of_costs_variant: waiting-at-goal-always-free\n\
             cbs_split_mode: disjoint\n\
             heuristic: mpc\n\
             solvers: [epea]\n",
        )
        .unwrap();
        assert_eq!(config.num_agents, 4);
        assert_eq!(
            config.sum_of_costs_variant,
            SumOfCostsVariant::WaitingAtGoalAlwaysFree
        );
        assert_eq!(config.cbs_split_mode, CbsSplitMode::Disjoint);
        assert_eq!(config.heuristic, HeuristicKind::Mpc);
        assert_eq!(config.solvers, vec!["epea".to_string()]);
    }

    #[test]
    fn test_rejects_bad_direction_count() {
        assert!(Config::from_yaml_str("allowed_directions: 6\n").is_err());
    }

    #[test]
    fn test_rejects_unknown_solver() {
        assert!(Config::from_yaml_str("solvers: [ecbs]\n").is_err());
    }
}
