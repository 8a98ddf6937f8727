use tracing::info;

/// Per-run accounting for one solver invocation.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub success: bool,
    /// Sum of costs of the returned plan; -1 when the run failed.
    pub costs: i64,
    pub time_ms: u128,
    pub low_level_expand_nodes: usize,
    pub low_level_generate_nodes: usize,
    pub high_level_expand_nodes: usize,
    pub high_level_generate_nodes: usize,
    /// Makespan of the returned plan.
    pub solution_depth: usize,
    /// Largest group of agents planned jointly; these solvers always run the
    /// whole group.
    pub max_subgroup: usize,
}

impl Stats {
    pub fn mark_failed(&mut self) {
        self.success = false;
        self.costs = -1;
    }

    pub fn print(&self, solver: &str) {
        info!(
            "{} success {} cost {} time(ms) {} high level expanded {} generated {} low level expanded {} generated {} depth {} subgroup {}",
            solver,
            self.success,
            self.costs,
            self.time_ms,
            self.high_level_expand_nodes,
            self.high_level_generate_nodes,
            self.low_level_expand_nodes,
            self.low_level_generate_nodes,
            self.solution_depth,
            self.max_subgroup
        );
    }

    pub fn csv_header() -> &'static str {
        "grid_height,grid_width,obstacles,agents,instance,solver,success,time_ms,cost,\
         hl_expanded,hl_generated,ll_expanded,ll_generated,max_subgroup,depth"
    }

    pub fn csv_row(
        &self,
        grid_height: usize,
        grid_width: usize,
        obstacles: usize,
        agents: usize,
        instance: &str,
        solver: &str,
    ) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            grid_height,
            grid_width,
            obstacles,
            agents,
            instance,
            solver,
            self.success as u8,
            self.time_ms,
            self.costs,
            self.high_level_expand_nodes,
            self.high_level_generate_nodes,
            self.low_level_expand_nodes,
            self.low_level_generate_nodes,
            self.max_subgroup,
            self.solution_depth
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_row_matches_header() {
        let mut stats = Stats::default();
        stats.success = true;
        stats.costs = 12;
        stats.max_subgroup = 3;
        let row = stats.csv_row(8, 8, 10, 3, "maze-1", "cbs");
        assert_eq!(
            row.split(',').count(),
            Stats::csv_header().split(',').count()
        );
        assert!(row.starts_with("8,8,10,3,maze-1,cbs,1,"));
    }

    #[test]
    fn test_mark_failed_sets_sentinel() {
        let mut stats = Stats::default();
        stats.costs = 40;
        stats.mark_failed();
        assert!(!stats.success);
        assert_eq!(stats.costs, -1);
    }
}
