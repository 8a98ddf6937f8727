use std::fs::File;
use std::io::{BufRead, BufReader, Write};

use anyhow::{bail, Context, Result};

use crate::moves::{AllowedDirections, MoveTable};

/// Static grid with an obstacle matrix and a dense index of traversable
/// cells. The cardinality mapping is bijective over the traversable subset
/// and stable for the lifetime of the map.
#[derive(Debug, Clone)]
pub struct Map {
    pub height: usize,
    pub width: usize,
    obstacle: Vec<Vec<bool>>,
    cardinality: Vec<Vec<i32>>,
    locations: Vec<(usize, usize)>,
    pub(crate) moves: MoveTable,
}

impl Map {
    pub fn from_grid(obstacle: Vec<Vec<bool>>, allowed: AllowedDirections) -> Result<Self> {
        let height = obstacle.len();
        if height == 0 {
            bail!("empty grid");
        }
        let width = obstacle[0].len();
        if obstacle.iter().any(|row| row.len() != width) {
            bail!("ragged grid rows");
        }

        let mut cardinality = vec![vec![-1; width]; height];
        let mut locations = Vec::new();
        for x in 0..height {
            for y in 0..width {
                if !obstacle[x][y] {
                    cardinality[x][y] = locations.len() as i32;
                    locations.push((x, y));
                }
            }
        }

        Ok(Map {
            height,
            width,
            obstacle,
            cardinality,
            locations,
            moves: MoveTable::new(allowed),
        })
    }

    /// Builds a map from ASCII rows; `.` is traversable, anything else is an
    /// obstacle. Used by tests and the combined instance format.
    pub fn from_ascii(rows: &[&str], allowed: AllowedDirections) -> Result<Self> {
        let obstacle = rows
            .iter()
            .map(|row| row.chars().map(|ch| ch != '.').collect())
            .collect();
        Map::from_grid(obstacle, allowed)
    }

    /// Benchmark format: `type octile`, `height H`, `width W`, `map`, then
    /// `H` rows of `W` characters. Obstacles are `@`, `O`, `T` and `W`.
    pub fn from_benchmark_file(path: &str, allowed: AllowedDirections) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open map file {path}"))?;
        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .collect::<std::io::Result<_>>()?;
        Map::parse_benchmark_lines(&lines, allowed).with_context(|| format!("parse map {path}"))
    }

    fn parse_benchmark_lines(lines: &[String], allowed: AllowedDirections) -> Result<Self> {
        let mut lines = lines.iter();
        let header = lines.next().context("missing type header")?;
        if !header.starts_with("type") {
            bail!("expected `type` header, got {header:?}");
        }
        let height: usize = lines
            .next()
            .context("missing height line")?
            .split_whitespace()
            .last()
            .context("malformed height line")?
            .parse()?;
        let width: usize = lines
            .next()
            .context("missing width line")?
            .split_whitespace()
            .last()
            .context("malformed width line")?
            .parse()?;
        let _map = lines.next().context("missing map line")?;

        let mut obstacle = Vec::with_capacity(height);
        for _ in 0..height {
            let row = lines.next().context("truncated map body")?;
            let tiles: Vec<bool> = row
                .chars()
                .take(width)
                .map(|ch| matches!(ch, '@' | 'O' | 'T' | 'W'))
                .collect();
            if tiles.len() != width {
                bail!("map row shorter than declared width");
            }
            obstacle.push(tiles);
        }
        Map::from_grid(obstacle, allowed)
    }

    /// Liron format: a `W,H` header, then `W` rows of `H` characters where
    /// `1` is an obstacle.
    pub fn from_liron_file(path: &str, allowed: AllowedDirections) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open map file {path}"))?;
        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .collect::<std::io::Result<_>>()?;
        Map::parse_liron_lines(&lines, allowed).with_context(|| format!("parse map {path}"))
    }

    fn parse_liron_lines(lines: &[String], allowed: AllowedDirections) -> Result<Self> {
        let mut lines = lines.iter();
        let header = lines.next().context("missing size header")?;
        let (rows, cols) = header
            .split_once(',')
            .context("size header is not `W,H`")?;
        let rows: usize = rows.trim().parse()?;
        let cols: usize = cols.trim().parse()?;

        let mut obstacle = Vec::with_capacity(rows);
        for _ in 0..rows {
            let row = lines.next().context("truncated map body")?;
            let tiles: Vec<bool> = row.chars().take(cols).map(|ch| ch == '1').collect();
            if tiles.len() != cols {
                bail!("map row shorter than declared size");
            }
            obstacle.push(tiles);
        }
        Map::from_grid(obstacle, allowed)
    }

    pub fn write_benchmark_file(&self, path: &str) -> Result<()> {
        let mut file = File::create(path).with_context(|| format!("create map file {path}"))?;
        writeln!(file, "type octile")?;
        writeln!(file, "height {}", self.height)?;
        writeln!(file, "width {}", self.width)?;
        writeln!(file, "map")?;
        for row in &self.obstacle {
            let line: String = row.iter().map(|&o| if o { '@' } else { '.' }).collect();
            writeln!(file, "{line}")?;
        }
        Ok(())
    }

    pub fn write_liron_file(&self, path: &str) -> Result<()> {
        let mut file = File::create(path).with_context(|| format!("create map file {path}"))?;
        writeln!(file, "{},{}", self.height, self.width)?;
        for row in &self.obstacle {
            let line: String = row.iter().map(|&o| if o { '1' } else { '0' }).collect();
            writeln!(file, "{line}")?;
        }
        Ok(())
    }

    pub fn is_passable(&self, x: usize, y: usize) -> bool {
        !self.obstacle[x][y]
    }

    /// Count of traversable cells.
    pub fn num_locations(&self) -> usize {
        self.locations.len()
    }

    /// Dense index of a traversable cell, `None` on an obstacle.
    pub(crate) fn location_index(&self, position: (usize, usize)) -> Option<usize> {
        let index = self.cardinality[position.0][position.1];
        if index >= 0 {
            Some(index as usize)
        } else {
            None
        }
    }

    /// The traversable cell at a dense index.
    pub(crate) fn location(&self, index: usize) -> (usize, usize) {
        self.locations[index]
    }

    /// Target cell of taking `direction` from `position`, `None` when the
    /// move leaves the board or lands on an obstacle.
    pub(crate) fn move_target(
        &self,
        position: (usize, usize),
        direction: usize,
    ) -> Option<(usize, usize)> {
        self.moves
            .apply(position, direction, self.height, self.width)
            .filter(|&(x, y)| self.is_passable(x, y))
    }

    /// Passable neighbor cells including the cell itself (the wait move).
    pub fn get_neighbors(&self, x: usize, y: usize) -> Vec<(usize, usize)> {
        (0..self.moves.num_directions())
            .filter_map(|direction| self.move_target((x, y), direction))
            .collect()
    }
}
