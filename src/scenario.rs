use std::fs::File;
use std::io::{BufRead, BufReader, Write};

use anyhow::{bail, Context, Result};
use rand::prelude::*;
use tracing::info;

use crate::common::Agent;
use crate::map::Map;
use crate::moves::AllowedDirections;

/// One start/goal route read from a scenario file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Route {
    pub start_x: usize,
    pub start_y: usize,
    pub goal_x: usize,
    pub goal_y: usize,
}

/// A loaded scenario: routes in file order plus the map they refer to.
#[derive(Debug)]
pub struct Scenario {
    pub map_name: String,
    pub routes: Vec<Route>,
}

fn read_lines(path: &str) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("open scenario file {path}"))?;
    Ok(BufReader::new(file)
        .lines()
        .collect::<std::io::Result<_>>()?)
}

impl Scenario {
    /// `.scen` format: a `version` header, then tab-separated rows
    /// `block map cols rows startY startX goalY goalX optimal`. The file
    /// stores (column,row) pairs, inverted here on load.
    pub fn load_from_scen(path: &str) -> Result<Scenario> {
        Self::parse_scen_lines(&read_lines(path)?).with_context(|| format!("parse scen {path}"))
    }

    fn parse_scen_lines(lines: &[String]) -> Result<Scenario> {
        let mut lines = lines.iter();
        let version = lines.next().context("missing version header")?;
        if !version.starts_with("version") {
            bail!("expected `version` header, got {version:?}");
        }

        let mut map_name = String::new();
        let mut routes = Vec::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 9 {
                bail!("malformed scen row {line:?}");
            }
            if map_name.is_empty() {
                map_name = parts[1].to_string();
            }
            routes.push(Route {
                start_x: parts[5].parse()?,
                start_y: parts[4].parse()?,
                goal_x: parts[7].parse()?,
                goal_y: parts[6].parse()?,
            });
        }

        Ok(Scenario { map_name, routes })
    }

    /// `.agents` format: the agent count, then one `goalX,goalY,startX,startY`
    /// row per agent.
    pub fn load_from_agents(path: &str) -> Result<Scenario> {
        Self::parse_agents_lines(&read_lines(path)?)
            .with_context(|| format!("parse agents file {path}"))
    }

    fn parse_agents_lines(lines: &[String]) -> Result<Scenario> {
        let mut lines = lines.iter();
        let count: usize = lines
            .next()
            .context("missing agent count")?
            .trim()
            .parse()?;

        let mut routes = Vec::with_capacity(count);
        for _ in 0..count {
            let line = lines.next().context("truncated agents file")?;
            let fields: Vec<usize> = line
                .trim()
                .split(',')
                .map(|field| field.trim().parse())
                .collect::<std::result::Result<_, _>>()?;
            if fields.len() != 4 {
                bail!("malformed agents row {line:?}");
            }
            routes.push(Route {
                goal_x: fields[0],
                goal_y: fields[1],
                start_x: fields[2],
                start_y: fields[3],
            });
        }

        Ok(Scenario {
            map_name: String::new(),
            routes,
        })
    }

    /// Combined format: an optional `id,gridName` line, a `Grid:` block with
    /// the dimensions and rows, then an `Agents:` block with the count and
    /// `agentNum,goalX,goalY,startX,startY` rows.
    pub fn load_combined(path: &str, allowed: AllowedDirections) -> Result<(Map, Scenario)> {
        Self::parse_combined_lines(&read_lines(path)?, allowed)
            .with_context(|| format!("parse combined instance {path}"))
    }

    fn parse_combined_lines(
        lines: &[String],
        allowed: AllowedDirections,
    ) -> Result<(Map, Scenario)> {
        let mut cursor = 0usize;
        let mut map_name = String::new();

        if lines
            .first()
            .is_some_and(|line| !line.starts_with("Grid:"))
        {
            map_name = lines[0]
                .split(',')
                .nth(1)
                .unwrap_or_default()
                .trim()
                .to_string();
            cursor += 1;
        }

        if lines.get(cursor).map(|l| l.as_str()) != Some("Grid:") {
            bail!("missing Grid: block");
        }
        cursor += 1;
        let header = lines.get(cursor).context("missing grid size")?;
        let (rows, cols) = header.split_once(',').context("grid size is not `W,H`")?;
        let rows: usize = rows.trim().parse()?;
        let cols: usize = cols.trim().parse()?;
        cursor += 1;

        let mut obstacle = Vec::with_capacity(rows);
        for _ in 0..rows {
            let line = lines.get(cursor).context("truncated grid block")?;
            let tiles: Vec<bool> = line.chars().take(cols).map(|ch| ch == '1').collect();
            if tiles.len() != cols {
                bail!("grid row shorter than declared size");
            }
            obstacle.push(tiles);
            cursor += 1;
        }
        let map = Map::from_grid(obstacle, allowed)?;

        if lines.get(cursor).map(|l| l.as_str()) != Some("Agents:") {
            bail!("missing Agents: block");
        }
        cursor += 1;
        let count: usize = lines
            .get(cursor)
            .context("missing agent count")?
            .trim()
            .parse()?;
        cursor += 1;

        let mut routes = Vec::with_capacity(count);
        for _ in 0..count {
            let line = lines.get(cursor).context("truncated agents block")?;
            let fields: Vec<usize> = line
                .trim()
                .split(',')
                .map(|field| field.trim().parse())
                .collect::<std::result::Result<_, _>>()?;
            if fields.len() != 5 {
                bail!("malformed agent row {line:?}");
            }
            routes.push(Route {
                goal_x: fields[1],
                goal_y: fields[2],
                start_x: fields[3],
                start_y: fields[4],
            });
            cursor += 1;
        }

        Ok((map, Scenario { map_name, routes }))
    }

    /// The first `num_agents` routes as agents, in file order.
    pub fn to_agents(&self, num_agents: usize) -> Result<Vec<Agent>> {
        if self.routes.len() < num_agents {
            bail!(
                "scenario has {} routes, {} requested",
                self.routes.len(),
                num_agents
            );
        }
        Ok(self.routes[..num_agents]
            .iter()
            .enumerate()
            .map(|(id, route)| Agent {
                id,
                start: (route.start_x, route.start_y),
                goal: (route.goal_x, route.goal_y),
            })
            .collect())
    }

    /// A random subset of the routes as agents, for repeatable experiments
    /// with a seeded generator.
    pub fn generate_agents_randomly<R: Rng + ?Sized>(
        &self,
        num_agents: usize,
        rng: &mut R,
    ) -> Result<Vec<Agent>> {
        if self.routes.len() < num_agents {
            bail!(
                "not enough unique routes ({}) for {} agents",
                self.routes.len(),
                num_agents
            );
        }
        let mut available = self.routes.clone();
        available.shuffle(rng);

        let agents = available
            .into_iter()
            .take(num_agents)
            .enumerate()
            .map(|(id, route)| Agent {
                id,
                start: (route.start_x, route.start_y),
                goal: (route.goal_x, route.goal_y),
            })
            .collect();
        info!("generated scenario agents: {agents:?}");
        Ok(agents)
    }

    pub fn write_agents_file(path: &str, agents: &[Agent]) -> Result<()> {
        let mut file =
            File::create(path).with_context(|| format!("create agents file {path}"))?;
        writeln!(file, "{}", agents.len())?;
        for agent in agents {
            writeln!(
                file,
                "{},{},{},{}",
                agent.goal.0, agent.goal.1, agent.start.0, agent.start.1
            )?;
        }
        Ok(())
    }

    pub fn write_scen_file(path: &str, agents: &[Agent], map_name: &str, map: &Map) -> Result<()> {
        let mut file = File::create(path).with_context(|| format!("create scen file {path}"))?;
        writeln!(file, "version 1")?;
        for agent in agents {
            // Same (column,row) inversion as on load; the optimal-cost
            // column is not known here.
            writeln!(
                file,
                "0\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t0",
                map_name, map.width, map.height, agent.start.1, agent.start.0, agent.goal.1, agent.goal.0
            )?;
        }
        Ok(())
    }

    pub fn write_combined_file(
        path: &str,
        instance_name: &str,
        map: &Map,
        agents: &[Agent],
    ) -> Result<()> {
        let mut file =
            File::create(path).with_context(|| format!("create combined file {path}"))?;
        writeln!(file, "0,{instance_name}")?;
        writeln!(file, "Grid:")?;
        writeln!(file, "{},{}", map.height, map.width)?;
        for x in 0..map.height {
            let row: String = (0..map.width)
                .map(|y| if map.is_passable(x, y) { '0' } else { '1' })
                .collect();
            writeln!(file, "{row}")?;
        }
        writeln!(file, "Agents:")?;
        writeln!(file, "{}", agents.len())?;
        for agent in agents {
            writeln!(
                file,
                "{},{},{},{},{}",
                agent.id, agent.goal.0, agent.goal.1, agent.start.0, agent.start.1
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn lines(text: &[&str]) -> Vec<String> {
        text.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_scen_inverts_coordinates() {
        let scen = Scenario::parse_scen_lines(&lines(&[
            "version 1",
            "0\tmaze.map\t32\t32\t25\t9\t28\t8\t7.0",
            "1\tmaze.map\t32\t32\t19\t8\t17\t10\t4.2",
        ]))
        .unwrap();

        assert_eq!(scen.map_name, "maze.map");
        assert_eq!(scen.routes.len(), 2);
        assert_eq!(
            scen.routes[0],
            Route {
                start_x: 9,
                start_y: 25,
                goal_x: 8,
                goal_y: 28,
            }
        );
    }

    #[test]
    fn test_parse_agents_file() {
        let scen =
            Scenario::parse_agents_lines(&lines(&["2", "2,2,0,0", "0,0,2,2"])).unwrap();
        let agents = scen.to_agents(2).unwrap();
        assert_eq!(agents[0].goal, (2, 2));
        assert_eq!(agents[0].start, (0, 0));
        assert_eq!(agents[1].goal, (0, 0));
        assert_eq!(agents[1].start, (2, 2));
    }

    #[test]
    fn test_parse_combined_instance() {
        let (map, scen) = Scenario::parse_combined_lines(
            &lines(&[
                "7,bottleneck",
                "Grid:",
                "2,3",
                "000",
                "010",
                "Agents:",
                "1",
                "0,0,2,1,0",
            ]),
            AllowedDirections::Five,
        )
        .unwrap();

        assert_eq!(scen.map_name, "bottleneck");
        assert_eq!(map.height, 2);
        assert_eq!(map.width, 3);
        assert!(!map.is_passable(1, 1));
        let agents = scen.to_agents(1).unwrap();
        assert_eq!(agents[0].start, (1, 0));
        assert_eq!(agents[0].goal, (0, 2));
    }

    #[test]
    fn test_to_agents_respects_count() {
        let scen =
            Scenario::parse_agents_lines(&lines(&["2", "2,2,0,0", "0,0,2,2"])).unwrap();
        assert_eq!(scen.to_agents(1).unwrap().len(), 1);
        assert!(scen.to_agents(3).is_err());
    }

    #[test]
    fn test_random_selection_is_seeded() {
        let scen = Scenario::parse_agents_lines(&lines(&[
            "4", "0,0,3,3", "1,1,2,2", "2,2,1,1", "3,3,0,0",
        ]))
        .unwrap();
        let mut rng_1 = StdRng::seed_from_u64(7);
        let mut rng_2 = StdRng::seed_from_u64(7);
        let agents_1 = scen.generate_agents_randomly(2, &mut rng_1).unwrap();
        let agents_2 = scen.generate_agents_randomly(2, &mut rng_2).unwrap();
        assert_eq!(agents_1, agents_2);

        let starts: HashSet<_> = agents_1.iter().map(|a| a.start).collect();
        assert_eq!(starts.len(), 2);
    }
}
