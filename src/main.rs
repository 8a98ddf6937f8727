mod common;
mod config;
mod heap;
mod heuristic;
mod instance;
mod map;
mod moves;
mod scenario;
mod solver;
mod stat;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::Plan;
use config::{Cli, Config, HeuristicKind, MapFormat};
use instance::ProblemInstance;
use map::Map;
use scenario::Scenario;
use solver::{Cbs, JointSearch, Solver, Strategy};
use stat::Stats;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read config file {path}"))?;
            Config::from_yaml_str(&text)?
        }
        None => Config::default(),
    };
    let config = config.override_from_command_line(&cli)?;

    run_experiment(&config, cli.export.as_deref())
}

fn export_instance(path: &str, map: &Map, agents: &[common::Agent], name: &str) -> Result<()> {
    if path.ends_with(".agents") {
        Scenario::write_agents_file(path, agents)
    } else if path.ends_with(".scen") {
        Scenario::write_scen_file(path, agents, name, map)
    } else if path.ends_with(".map") {
        map.write_benchmark_file(path)
    } else if path.ends_with(".grid") {
        map.write_liron_file(path)
    } else {
        Scenario::write_combined_file(path, name, map, agents)
    }
}

fn load_inputs(config: &Config) -> Result<(Map, Scenario)> {
    let allowed = config.directions();
    let path = config.scenario_path.as_str();

    if path.ends_with(".scen") || path.ends_with(".agents") {
        let map = match config.map_format {
            MapFormat::Benchmark => Map::from_benchmark_file(&config.map_path, allowed)?,
            MapFormat::Liron => Map::from_liron_file(&config.map_path, allowed)?,
        };
        let scenario = if path.ends_with(".scen") {
            Scenario::load_from_scen(path)?
        } else {
            Scenario::load_from_agents(path)?
        };
        if !scenario.map_name.is_empty() {
            info!("scenario declares map {}", scenario.map_name);
        }
        Ok((map, scenario))
    } else {
        // Combined instance files carry their own grid.
        Scenario::load_combined(path, allowed)
    }
}

fn run_solver(
    name: &str,
    instance: &ProblemInstance,
    config: &Config,
) -> (Option<Plan>, Stats) {
    match name {
        "cbs" => {
            let mut solver = Cbs::new(&instance.map, instance.agents.clone(), instance.sic());
            let plan = solver.solve(config);
            (plan, solver.stats().clone())
        }
        "astar" | "od" | "epea" => {
            let strategy = match name {
                "astar" => Strategy::AStar,
                "od" => Strategy::OperatorDecomposition,
                _ => Strategy::PartialExpansion,
            };
            let mut heuristic = config.heuristic;
            if strategy == Strategy::PartialExpansion && heuristic == HeuristicKind::Mpc {
                warn!("MPC does not decompose over agents; epea falls back to SPC");
                heuristic = HeuristicKind::Spc;
            }
            let mut solver = JointSearch::new(
                &instance.map,
                instance.agents.clone(),
                instance.sic(),
                instance.pairs(),
                strategy,
                heuristic,
            );
            let plan = solver.solve(config);
            (plan, solver.stats().clone())
        }
        _ => unreachable!("solver list is validated by the config"),
    }
}

fn append_csv_row(path: &str, row: &str) -> Result<()> {
    let write_header = !Path::new(path).exists();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open result file {path}"))?;
    if write_header {
        writeln!(file, "{}", Stats::csv_header())?;
    }
    writeln!(file, "{row}")?;
    Ok(())
}

fn run_experiment(config: &Config, export: Option<&str>) -> Result<()> {
    let (map, scenario) = load_inputs(config)?;
    let instance_name = Path::new(&config.scenario_path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("instance")
        .to_string();
    let obstacles = map.height * map.width - map.num_locations();

    // Seed 0 keeps the file order; any other seed draws a random subset of
    // the routes.
    let mut rng = StdRng::seed_from_u64(config.seed);
    let agents = if config.seed == 0 {
        scenario.to_agents(config.num_agents)?
    } else {
        scenario.generate_agents_randomly(config.num_agents, &mut rng)?
    };

    if let Some(path) = export {
        export_instance(path, &map, &agents, &instance_name)?;
        info!("exported instance to {path}");
    }

    let mut consecutive_failures = vec![0usize; config.solvers.len()];

    for count in 1..=config.num_agents {
        let subset = agents[..count].to_vec();
        let instance = match ProblemInstance::new(map.clone(), subset, config) {
            Ok(instance) => instance,
            Err(err) => {
                error!("instance with {count} agents rejected: {err:#}");
                continue;
            }
        };

        for (index, name) in config.solvers.iter().enumerate() {
            if consecutive_failures[index] > config.max_consecutive_failures {
                continue;
            }

            let (plan, stats) = run_solver(name, &instance, config);
            stats.print(name);

            if let Some(plan) = &plan {
                if !plan.verify(&instance.map, &instance.agents) {
                    anyhow::bail!("{name} returned a conflicting plan for {count} agents");
                }
                info!(
                    "{name} solved {count} agents: {} moves, makespan {}",
                    plan.sum_of_costs(),
                    plan.makespan()
                );
                consecutive_failures[index] = 0;
            } else {
                consecutive_failures[index] += 1;
                if consecutive_failures[index] > config.max_consecutive_failures {
                    info!("{name} disabled after {} consecutive failures", consecutive_failures[index]);
                }
            }

            append_csv_row(
                &config.output_csv,
                &stats.csv_row(
                    map.height,
                    map.width,
                    obstacles,
                    count,
                    &instance_name,
                    name,
                ),
            )?;
        }
    }

    Ok(())
}
