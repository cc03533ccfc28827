//! Bounded BFS directly against the `edges` table. No in-memory graph
//! is built or cached; each expansion step issues one query.

use std::collections::{HashMap, VecDeque};

use rusqlite::params;

use crate::error::Result;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImpactAnalysis {
    pub affected_models: Vec<String>,
    pub affected_exposures: Vec<String>,
    pub affected_tests: Vec<String>,
    pub risk_level: RiskLevel,
}

pub struct Graph;

impl Graph {
    fn bfs(store: &Store, start: &str, depth: u32, forward: bool) -> Result<Vec<(String, i64)>> {
        if depth == 0 {
            return Ok(Vec::new());
        }

        let query = if forward {
            "SELECT child_id FROM edges WHERE parent_id = ?1"
        } else {
            "SELECT parent_id FROM edges WHERE child_id = ?1"
        };

        let mut visited: HashMap<String, i64> = HashMap::new();
        let mut queue: VecDeque<(String, i64)> = VecDeque::new();
        queue.push_back((start.to_string(), 0));

        while let Some((node, dist)) = queue.pop_front() {
            if dist >= depth as i64 {
                continue;
            }
            let mut stmt = store.conn().prepare(query)?;
            let neighbors: Vec<String> = stmt
                .query_map(params![node], |r| r.get::<_, String>(0))?
                .filter_map(|r| r.ok())
                .collect();

            for neighbor in neighbors {
                let next_dist = dist + 1;
                let better = match visited.get(&neighbor) {
                    Some(&existing) => next_dist < existing,
                    None => true,
                };
                if better {
                    visited.insert(neighbor.clone(), next_dist);
                    queue.push_back((neighbor, next_dist));
                }
            }
        }

        let mut result: Vec<(String, i64)> = visited.into_iter().collect();
        result.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(result)
    }

    /// Ancestors of `id` within `depth` hops, nearest first.
    pub fn upstream(store: &Store, id: &str, depth: u32) -> Result<Vec<(String, i64)>> {
        Graph::bfs(store, id, depth, false)
    }

    /// Descendants of `id` within `depth` hops, nearest first.
    pub fn downstream(store: &Store, id: &str, depth: u32) -> Result<Vec<(String, i64)>> {
        Graph::bfs(store, id, depth, true)
    }

    /// Full upstream lineage restricted to `source.*` ancestors, used
    /// to answer "what raw tables feed this model" independent of the
    /// capsule's narrower immediate-parent rule.
    pub fn source_deps(store: &Store, id: &str) -> Result<Vec<(String, i64)>> {
        let reachable = Graph::bfs(store, id, 10, false)?;
        Ok(reachable.into_iter().filter(|(nid, _)| nid.starts_with("source.")).collect())
    }

    pub fn impact_analysis(store: &Store, id: &str, max_depth: u32) -> Result<ImpactAnalysis> {
        let reachable = Graph::downstream(store, id, max_depth)?;

        let affected_models: Vec<String> =
            reachable.iter().filter(|(nid, _)| nid.starts_with("model.")).map(|(nid, _)| nid.clone()).collect();
        let affected_exposures: Vec<String> = reachable
            .iter()
            .filter(|(nid, _)| nid.starts_with("exposure."))
            .map(|(nid, _)| nid.clone())
            .collect();

        let mut affected_tests = Vec::new();
        if !affected_models.is_empty() {
            let placeholders: Vec<String> = affected_models.iter().map(|_| "?".to_string()).collect();
            let sql = format!(
                "SELECT unique_id FROM tests WHERE model_id IN ({})",
                placeholders.join(",")
            );
            let mut stmt = store.conn().prepare(&sql)?;
            let params: Vec<&dyn rusqlite::ToSql> =
                affected_models.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
            affected_tests = stmt
                .query_map(params.as_slice(), |r| r.get::<_, String>(0))?
                .filter_map(|r| r.ok())
                .collect();
        }

        let has_marts_affected = if !affected_models.is_empty() {
            let placeholders: Vec<String> = affected_models.iter().map(|_| "?".to_string()).collect();
            let sql = format!(
                "SELECT COUNT(*) FROM models WHERE unique_id IN ({}) AND layer = 'marts'",
                placeholders.join(",")
            );
            let mut stmt = store.conn().prepare(&sql)?;
            let params: Vec<&dyn rusqlite::ToSql> =
                affected_models.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
            let count: i64 = stmt.query_row(params.as_slice(), |r| r.get(0))?;
            count > 0
        } else {
            false
        };

        let n_models = affected_models.len();
        let risk_level = if !affected_exposures.is_empty() || (has_marts_affected && n_models > 5) {
            RiskLevel::High
        } else if n_models > 3 || has_marts_affected {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        Ok(ImpactAnalysis { affected_models, affected_exposures, affected_tests, risk_level })
    }

    pub fn recompute_centrality(store: &mut Store) -> Result<()> {
        store.transaction(|tx| {
            tx.execute_batch(
                "UPDATE models SET upstream_count = (
                    SELECT COUNT(*) FROM edges WHERE edges.child_id = models.unique_id
                 );
                 UPDATE models SET downstream_count = (
                    SELECT COUNT(*) FROM edges WHERE edges.parent_id = models.unique_id
                 );",
            )?;
            let max_degree: i64 = tx.query_row(
                "SELECT COALESCE(MAX(upstream_count + downstream_count), 0) FROM models",
                [],
                |r| r.get(0),
            )?;
            if max_degree > 0 {
                tx.execute(
                    "UPDATE models SET centrality = CAST(upstream_count + downstream_count AS REAL) / ?1",
                    params![max_degree],
                )?;
            } else {
                tx.execute("UPDATE models SET centrality = 0.0", [])?;
            }
            Ok(())
        })
    }

    pub fn high_centrality_models(store: &Store, limit: usize) -> Result<Vec<String>> {
        let mut stmt = store.conn().prepare(
            "SELECT unique_id FROM models ORDER BY centrality DESC, downstream_count DESC LIMIT ?1",
        )?;
        let ids: Vec<String> = stmt
            .query_map(params![limit as i64], |r| r.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Ingestor;
    use std::io::Write;

    fn fixture_store() -> Store {
        let mut store = Store::open_in_memory().expect("open");
        let manifest = crate::test_fixtures::jaffle_shop_manifest();
        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("manifest.json");
        let mut f = std::fs::File::create(&path).expect("create");
        f.write_all(manifest.to_string().as_bytes()).expect("write");
        Ingestor::index_manifest(&mut store, &path).expect("index");
        store
    }

    #[test]
    fn upstream_depth_two_reaches_staging_layer() {
        let store = fixture_store();
        let result = Graph::upstream(&store, "model.jaffle_shop.dim_customers", 2).expect("bfs");
        let ids: Vec<&str> = result.iter().map(|(id, _)| id.as_str()).collect();
        assert!(ids.contains(&"model.jaffle_shop.stg_customers"));
        assert!(ids.contains(&"model.jaffle_shop.fct_orders"));
        assert!(ids.contains(&"model.jaffle_shop.stg_orders"));
        assert!(ids.contains(&"model.jaffle_shop.stg_payments"));
    }

    #[test]
    fn depth_zero_yields_empty() {
        let store = fixture_store();
        let result = Graph::upstream(&store, "model.jaffle_shop.dim_customers", 0).expect("bfs");
        assert!(result.is_empty());
    }

    #[test]
    fn impact_analysis_on_stg_orders_reaches_downstream_marts() {
        let store = fixture_store();
        let analysis =
            Graph::impact_analysis(&store, "model.jaffle_shop.stg_orders", 5).expect("impact");
        assert!(analysis.affected_models.contains(&"model.jaffle_shop.fct_orders".to_string()));
        assert!(analysis.affected_models.contains(&"model.jaffle_shop.dim_customers".to_string()));
        assert!(matches!(analysis.risk_level, RiskLevel::Medium | RiskLevel::High));
    }
}
