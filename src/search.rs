//! Two-phase hybrid retrieval: FTS5/BM25 recall followed by a linear
//! re-rank combining normalized BM25, centrality, per-intent layer
//! affinity, and a name-substring bonus.

use std::collections::HashSet;

use rusqlite::params;
use tracing::warn;

use crate::error::Result;
use crate::store::Store;
use crate::types::{Column, Intent, SearchResult, Source, Test};

const STOPWORDS: &[&str] = &["a", "an", "the", "to", "for", "in", "of", "on", "at", "with", "and", "or", "is", "it"];

/// Strip non-word characters, split on whitespace, drop stopwords and
/// single-character tokens, join remaining tokens with `" OR "`. Falls
/// back to the raw query when nothing survives.
pub fn tokenize_query(query: &str) -> String {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty() && t.len() > 1 && !STOPWORDS.contains(&t.as_str()))
        .collect();

    if tokens.is_empty() {
        query.to_string()
    } else {
        tokens.join(" OR ")
    }
}

/// Per-intent layer affinity table: small biases (<=0.10) applied on
/// top of the BM25/centrality signal, intended to break ties rather
/// than override a strong text match.
fn layer_boost(intent: Intent, layer: &str) -> f64 {
    let table: &[(&str, f64)] = match intent {
        Intent::Debug => &[("staging", 0.10), ("intermediate", 0.05), ("marts", 0.0), ("other", 0.0)],
        Intent::AddFeature => &[("staging", 0.0), ("intermediate", 0.05), ("marts", 0.10), ("other", 0.0)],
        Intent::Refactor => &[("staging", 0.0), ("intermediate", 0.10), ("marts", 0.05), ("other", 0.0)],
        Intent::Test => &[("staging", 0.05), ("intermediate", 0.05), ("marts", 0.05), ("other", 0.0)],
        Intent::Document => &[("staging", 0.0), ("intermediate", 0.0), ("marts", 0.0), ("other", 0.0)],
        Intent::Explore => &[("staging", 0.0), ("intermediate", 0.0), ("marts", 0.0), ("other", 0.0)],
    };
    table.iter().find(|(l, _)| *l == layer).map(|(_, w)| *w).unwrap_or(0.0)
}

fn normalize(scores: &[f64]) -> Vec<f64> {
    let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        return scores.iter().map(|_| 1.0).collect();
    }
    scores.iter().map(|s| (s - min) / (max - min)).collect()
}

struct Candidate {
    unique_id: String,
    name: String,
    layer: String,
    description: String,
    centrality: f64,
    bm25: f64,
}

pub struct Search;

impl Search {
    pub fn search(
        store: &Store,
        query: &str,
        intent: Intent,
        limit: usize,
        exclude: &HashSet<String>,
    ) -> Result<Vec<SearchResult>> {
        let mut candidates = Search::fts_phase(store, query, limit * 4)?;
        if candidates.is_empty() {
            candidates = Search::fallback_search(store, query, limit * 4)?;
        }

        candidates.retain(|c| !exclude.contains(&c.unique_id));
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let bm25_scores: Vec<f64> = candidates.iter().map(|c| c.bm25).collect();
        let normalized = normalize(&bm25_scores);

        let query_lower = query.to_lowercase();
        let mut scored: Vec<SearchResult> = candidates
            .into_iter()
            .zip(normalized)
            .map(|(c, bm25_norm)| {
                let boost = layer_boost(intent, &c.layer);
                let name_bonus = if c.name.to_lowercase().contains(&query_lower) { 0.15 } else { 0.0 };
                let score = 0.55 * bm25_norm + 0.20 * c.centrality + 0.10 * boost + 0.15 * name_bonus;
                SearchResult {
                    unique_id: c.unique_id,
                    name: c.name,
                    layer: c.layer,
                    description: c.description,
                    centrality: c.centrality,
                    score,
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.unique_id.cmp(&b.unique_id)));
        scored.truncate(limit);
        Ok(scored)
    }

    fn fts_phase(store: &Store, query: &str, limit: usize) -> Result<Vec<Candidate>> {
        let match_expr = tokenize_query(query);

        let sql = "SELECT m.unique_id, m.name, m.layer, m.description, m.centrality,
                          -bm25(search_index, 5, 3, 2, 1, 1) AS score
                   FROM search_index
                   JOIN models m ON m.unique_id = search_index.unique_id
                   WHERE search_index MATCH ?1
                   ORDER BY score DESC
                   LIMIT ?2";

        let mut stmt = match store.conn().prepare(sql) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "fts prepare failed");
                return Ok(Vec::new());
            }
        };

        let rows = stmt.query_map(params![match_expr, limit as i64], |row| {
            Ok(Candidate {
                unique_id: row.get(0)?,
                name: row.get(1)?,
                layer: row.get(2)?,
                description: row.get(3)?,
                centrality: row.get(4)?,
                bm25: row.get(5)?,
            })
        });

        match rows {
            Ok(rows) => {
                let mut out = Vec::new();
                for r in rows {
                    match r {
                        Ok(c) => out.push(c),
                        Err(e) => {
                            warn!(error = %e, "fts row failed");
                            return Ok(Vec::new());
                        }
                    }
                }
                Ok(out)
            }
            Err(e) => {
                warn!(error = %e, "fts query failed");
                Ok(Vec::new())
            }
        }
    }

    fn fallback_search(store: &Store, query: &str, limit: usize) -> Result<Vec<Candidate>> {
        let like_pattern = format!("%{query}%");
        let mut stmt = store.conn().prepare(
            "SELECT unique_id, name, layer, description, centrality
             FROM models
             WHERE name LIKE ?1 COLLATE NOCASE OR description LIKE ?1 COLLATE NOCASE
             ORDER BY centrality DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![like_pattern, limit as i64], |row| {
            Ok(Candidate {
                unique_id: row.get(0)?,
                name: row.get(1)?,
                layer: row.get(2)?,
                description: row.get(3)?,
                centrality: row.get(4)?,
                bm25: 0.0,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn get_model_by_name(store: &Store, name: &str) -> Result<Option<String>> {
        let id: Option<String> = store
            .conn()
            .query_row(
                "SELECT unique_id FROM models WHERE lower(name) = lower(?1) LIMIT 1",
                params![name],
                |r| r.get(0),
            )
            .ok();
        Ok(id)
    }

    pub fn get_model_by_id(store: &Store, id: &str) -> Result<bool> {
        let count: i64 =
            store.conn().query_row("SELECT COUNT(*) FROM models WHERE unique_id = ?1", params![id], |r| r.get(0))?;
        Ok(count > 0)
    }

    /// Columns for a model, each with its test kinds aggregated from
    /// the `tests` table (one `GROUP_CONCAT` per column, distinct kinds).
    pub fn get_columns(store: &Store, model_id: &str) -> Result<Vec<Column>> {
        let mut stmt = store.conn().prepare(
            "SELECT c.name, c.data_type, c.description, c.is_primary_key, c.is_foreign_key,
                    GROUP_CONCAT(DISTINCT t.kind)
             FROM columns c
             LEFT JOIN tests t ON t.model_id = c.model_id AND t.column_name = c.name
             WHERE c.model_id = ?1
             GROUP BY c.name
             ORDER BY c.name",
        )?;
        let rows = stmt.query_map(params![model_id], |row| {
            let test_kinds: Option<String> = row.get(5)?;
            Ok(Column {
                name: row.get(0)?,
                data_type: row.get(1)?,
                description: row.get(2)?,
                is_primary_key: row.get::<_, i64>(3)? != 0,
                is_foreign_key: row.get::<_, i64>(4)? != 0,
                tests: test_kinds.map(|s| s.split(',').map(str::to_string).collect()).unwrap_or_default(),
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn get_tests_for_model(store: &Store, model_id: &str) -> Result<Vec<Test>> {
        let mut stmt = store.conn().prepare(
            "SELECT unique_id, kind, model_id, column_name, severity, last_status,
                    last_execution_time, last_failures
             FROM tests WHERE model_id = ?1 ORDER BY unique_id",
        )?;
        let rows = stmt.query_map(params![model_id], |row| {
            Ok(Test {
                unique_id: row.get(0)?,
                kind: row.get(1)?,
                model_id: row.get(2)?,
                column_name: row.get(3)?,
                severity: row.get(4)?,
                last_status: row.get(5)?,
                last_execution_time: row.get(6)?,
                last_failures: row.get(7)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Direct parent sources of a model — used for the capsule's
    /// "relevant_sources" bucket, which deliberately only looks one
    /// hop up rather than the full lineage `Graph::source_deps` walks.
    pub fn get_sources_for_model(store: &Store, model_id: &str) -> Result<Vec<Source>> {
        let mut stmt = store.conn().prepare(
            "SELECT s.unique_id, s.name, s.source_name, s.schema, s.description, s.loader,
                    s.freshness_warn_after, s.freshness_error_after
             FROM sources s
             JOIN edges e ON e.parent_id = s.unique_id
             WHERE e.child_id = ?1
             ORDER BY s.unique_id",
        )?;
        let rows = stmt.query_map(params![model_id], |row| {
            Ok(Source {
                unique_id: row.get(0)?,
                name: row.get(1)?,
                source_name: row.get(2)?,
                schema: row.get(3)?,
                description: row.get(4)?,
                loader: row.get(5)?,
                freshness_warn_after: row.get(6)?,
                freshness_error_after: row.get(7)?,
                columns: Vec::new(),
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Substring match of macro name against the model's compiled
    /// code; imprecise by design — false positives are acceptable
    /// since the result is only surfaced as a candidate.
    pub fn get_macros_for_model(store: &Store, model_id: &str) -> Result<Vec<String>> {
        let compiled: String = store.conn().query_row(
            "SELECT compiled_code FROM models WHERE unique_id = ?1",
            params![model_id],
            |r| r.get(0),
        )?;

        let mut stmt = store.conn().prepare("SELECT unique_id, name FROM macros")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let mut out = Vec::new();
        for r in rows {
            let (id, name) = r?;
            if compiled.contains(&name) {
                out.push(id);
            }
        }
        Ok(out)
    }

    pub fn find_by_column(store: &Store, name: &str) -> Result<Vec<String>> {
        let pattern = format!("%{name}%");
        let mut stmt = store
            .conn()
            .prepare("SELECT DISTINCT model_id FROM columns WHERE name LIKE ?1 COLLATE NOCASE ORDER BY model_id")?;
        let rows = stmt.query_map(params![pattern], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn find_by_path(store: &Store, pattern: &str) -> Result<Vec<String>> {
        let mut stmt = store
            .conn()
            .prepare("SELECT unique_id FROM models WHERE file_path LIKE ?1 ORDER BY unique_id")?;
        let rows = stmt.query_map(params![pattern], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Resolve a list of candidate paths to model ids: exact
    /// `file_path` match first, then basename match; YAML files are
    /// skipped; the result is deduplicated.
    pub fn resolve_file_paths(store: &Store, paths: &[String]) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for path in paths {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                continue;
            }
            let exact: Option<String> = store
                .conn()
                .query_row("SELECT unique_id FROM models WHERE file_path = ?1", params![path], |r| r.get(0))
                .ok();
            let resolved = if let Some(id) = exact {
                Some(id)
            } else {
                let basename = path.rsplit('/').next().unwrap_or(path);
                store
                    .conn()
                    .query_row(
                        "SELECT unique_id FROM models WHERE file_path LIKE ?1",
                        params![format!("%/{basename}")],
                        |r| r.get(0),
                    )
                    .ok()
            };
            if let Some(id) = resolved {
                if seen.insert(id.clone()) {
                    out.push(id);
                }
            }
        }
        Ok(out)
    }

    /// Per-model test coverage with human-readable test-gap
    /// suggestions.
    pub fn test_coverage(store: &Store, model_id: &str) -> Result<crate::types::TestCoverage> {
        let total_columns: i64 = store.conn().query_row(
            "SELECT COUNT(*) FROM columns WHERE model_id = ?1",
            params![model_id],
            |r| r.get(0),
        )?;
        let tested_columns: i64 = store.conn().query_row(
            "SELECT COUNT(DISTINCT column_name) FROM tests
             WHERE model_id = ?1 AND column_name != ''",
            params![model_id],
            |r| r.get(0),
        )?;

        let coverage_pct = if total_columns > 0 {
            100.0 * tested_columns as f64 / total_columns as f64
        } else {
            0.0
        };

        let mut suggestions = Vec::new();
        let has_pk = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM columns WHERE model_id = ?1 AND is_primary_key = 1",
                params![model_id],
                |r: &rusqlite::Row| r.get::<_, i64>(0),
            )
            .unwrap_or(0)
            > 0;
        if !has_pk {
            suggestions.push("Add not_null and unique tests to the primary key column".to_string());
        }
        if coverage_pct < 50.0 {
            suggestions.push("Add not_null tests to key columns".to_string());
        }

        Ok(crate::types::TestCoverage {
            model_id: model_id.to_string(),
            coverage_pct,
            tested_columns,
            total_columns,
            suggestions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Ingestor;
    use std::collections::HashSet;
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
    fn tokenize_drops_stopwords_and_joins_with_or() {
        assert_eq!(tokenize_query("the order and customer"), "order OR customer");
        assert_eq!(tokenize_query("a an to"), "a an to");
    }

    #[test]
    fn search_for_customer_ranks_dim_customers_first() {
        let store = fixture_store();
        let results = Search::search(&store, "customer", Intent::Explore, 5, &HashSet::new()).expect("search");
        assert!(!results.is_empty());
        // FTS tokenizes `customer_id` into `customer`+`id`, so models whose
        // only match is a column name (e.g. stg_orders) legitimately show
        // up too; only the name-match carries the substring guarantee.
        assert!(results.iter().any(|r| r.name.to_lowercase().contains("customer")));
        assert_eq!(results[0].name, "dim_customers");
    }

    #[test]
    fn find_by_column_locates_order_id() {
        let store = fixture_store();
        let models = Search::find_by_column(&store, "order_id").expect("find");
        assert!(models.contains(&"model.jaffle_shop.stg_orders".to_string()));
        assert!(models.contains(&"model.jaffle_shop.fct_orders".to_string()));
    }

    #[test]
    fn find_by_path_returns_staging_models_only() {
        let store = fixture_store();
        let models = Search::find_by_path(&store, "%staging%").expect("find");
        assert_eq!(models.len(), 3);
    }
}
