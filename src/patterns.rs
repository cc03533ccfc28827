//! Pure aggregation over the store: project-wide statistics and
//! inferred naming/materialization/coverage conventions per layer.
//! These are descriptive, recomputed on every ingestion, and should
//! be treated as hints rather than enforced contracts.

use std::collections::BTreeMap;

use rusqlite::params;

use crate::error::Result;
use crate::store::Store;
use crate::types::{NamingPatterns, ProjectPatterns, ProjectStats};

const LAYERS: &[&str] = &["staging", "intermediate", "marts", "other"];

pub struct Patterns;

impl Patterns {
    pub fn get_stats(store: &Store) -> Result<ProjectStats> {
        let mut models_by_layer = BTreeMap::new();
        for layer in LAYERS {
            let count: i64 = store.conn().query_row(
                "SELECT COUNT(*) FROM models WHERE layer = ?1",
                params![layer],
                |r| r.get(0),
            )?;
            models_by_layer.insert(layer.to_string(), count);
        }

        let source_count: i64 = store.conn().query_row("SELECT COUNT(*) FROM sources", [], |r| r.get(0))?;
        let test_count: i64 = store.conn().query_row("SELECT COUNT(*) FROM tests", [], |r| r.get(0))?;
        let exposure_count: i64 = store.conn().query_row("SELECT COUNT(*) FROM exposures", [], |r| r.get(0))?;

        let total_columns: i64 = store.conn().query_row("SELECT COUNT(*) FROM columns", [], |r| r.get(0))?;
        let tested_pairs: i64 = store.conn().query_row(
            "SELECT COUNT(DISTINCT model_id || ':' || column_name) FROM tests
             WHERE model_id IS NOT NULL AND column_name != ''",
            [],
            |r| r.get(0),
        )?;
        let test_coverage_pct = if total_columns > 0 {
            100.0 * tested_pairs as f64 / total_columns as f64
        } else {
            0.0
        };

        let macro_count: i64 = store.conn().query_row("SELECT COUNT(*) FROM macros", [], |r| r.get(0))?;

        let meta = store.metadata()?;
        let project_name = meta.get("project_name").cloned();
        let project_macro_count: i64 = if let Some(name) = &project_name {
            store.conn().query_row(
                "SELECT COUNT(*) FROM macros WHERE package_name = ?1",
                params![name],
                |r| r.get(0),
            )?
        } else {
            0
        };

        Ok(ProjectStats {
            models_by_layer,
            source_count,
            test_count,
            test_coverage_pct,
            macro_count,
            project_macro_count,
            exposure_count,
            project_name,
            adapter_type: meta.get("adapter_type").cloned(),
            dbt_version: meta.get("dbt_version").cloned(),
            generated_at: meta.get("generated_at").cloned(),
        })
    }

    pub fn get_patterns(store: &Store) -> Result<ProjectPatterns> {
        let naming = Patterns::extract_naming_patterns(store)?;
        let materialization_by_layer = Patterns::extract_materializations(store)?;
        let coverage_by_layer = Patterns::extract_coverage_by_layer(store)?;
        let common_tags = Patterns::extract_common_tags(store)?;

        Ok(ProjectPatterns { naming, materialization_by_layer, coverage_by_layer, common_tags })
    }

    fn extract_naming_patterns(store: &Store) -> Result<NamingPatterns> {
        let first_staging: Option<String> = store
            .conn()
            .query_row("SELECT name FROM models WHERE layer = 'staging' ORDER BY name LIMIT 1", [], |r| r.get(0))
            .ok();

        let staging_template = match &first_staging {
            Some(name) if name.contains("__") => "stg_{source}__{entity}".to_string(),
            Some(_) => "stg_{source}_{entity}".to_string(),
            None => "stg_{source}_{entity}".to_string(),
        };

        let intermediate_template = {
            let has_int_prefix: bool = store
                .conn()
                .query_row(
                    "SELECT COUNT(*) FROM models WHERE layer = 'intermediate' AND name LIKE 'int\\_%' ESCAPE '\\'",
                    [],
                    |r: &rusqlite::Row| r.get::<_, i64>(0),
                )
                .unwrap_or(0)
                > 0;
            if has_int_prefix {
                "int_{entity}_{verb}".to_string()
            } else {
                "{entity}_{verb}".to_string()
            }
        };

        let has_fct: bool = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM models WHERE layer = 'marts' AND name LIKE 'fct\\_%' ESCAPE '\\'",
                [],
                |r: &rusqlite::Row| r.get::<_, i64>(0),
            )
            .unwrap_or(0)
            > 0;
        let has_dim: bool = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM models WHERE layer = 'marts' AND name LIKE 'dim\\_%' ESCAPE '\\'",
                [],
                |r: &rusqlite::Row| r.get::<_, i64>(0),
            )
            .unwrap_or(0)
            > 0;
        let marts_template = match (has_fct, has_dim) {
            (true, true) => "fct_{subject} / dim_{entity}".to_string(),
            (true, false) => "fct_{subject}".to_string(),
            (false, true) => "dim_{entity}".to_string(),
            (false, false) => "{subject}".to_string(),
        };

        Ok(NamingPatterns {
            staging_template,
            intermediate_template,
            marts_template,
            directory_summary: "models are organized by layer directory (staging/intermediate/marts)".to_string(),
            yaml_requirements: "each model should have a corresponding schema.yml with column descriptions and tests".to_string(),
        })
    }

    fn extract_materializations(store: &Store) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for layer in LAYERS {
            let mode: Option<String> = store
                .conn()
                .query_row(
                    "SELECT materialization FROM models WHERE layer = ?1
                     GROUP BY materialization ORDER BY COUNT(*) DESC LIMIT 1",
                    params![layer],
                    |r| r.get(0),
                )
                .ok();
            if let Some(mode) = mode {
                out.insert(layer.to_string(), mode);
            }
        }
        Ok(out)
    }

    fn extract_coverage_by_layer(store: &Store) -> Result<BTreeMap<String, f64>> {
        let mut out = BTreeMap::new();
        for layer in LAYERS {
            let total_columns: i64 = store.conn().query_row(
                "SELECT COUNT(*) FROM columns c JOIN models m ON m.unique_id = c.model_id
                 WHERE m.layer = ?1",
                params![layer],
                |r| r.get(0),
            )?;
            if total_columns == 0 {
                continue;
            }
            let tested: i64 = store.conn().query_row(
                "SELECT COUNT(DISTINCT t.model_id || ':' || t.column_name)
                 FROM tests t JOIN models m ON m.unique_id = t.model_id
                 WHERE m.layer = ?1 AND t.column_name != ''",
                params![layer],
                |r| r.get(0),
            )?;
            out.insert(layer.to_string(), 100.0 * tested as f64 / total_columns as f64);
        }
        Ok(out)
    }

    fn extract_common_tags(store: &Store) -> Result<Vec<(String, i64)>> {
        let mut stmt = store.conn().prepare("SELECT tags FROM models")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;

        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for row in rows {
            let tags_json = row?;
            let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
            for tag in tags {
                *counts.entry(tag).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(String, i64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(10);
        Ok(ranked)
    }

    /// The layer's model with the most columns, ties broken by the
    /// longest description.
    pub fn get_example_model(store: &Store, layer: &str) -> Result<Option<String>> {
        let id: Option<String> = store
            .conn()
            .query_row(
                "SELECT m.unique_id FROM models m
                 LEFT JOIN columns c ON c.model_id = m.unique_id
                 WHERE m.layer = ?1
                 GROUP BY m.unique_id
                 ORDER BY COUNT(c.name) DESC, LENGTH(m.description) DESC, m.unique_id ASC
                 LIMIT 1",
                params![layer],
                |r| r.get(0),
            )
            .ok();
        Ok(id)
    }

    /// A schema-yaml fragment for the model exercising the greatest
    /// variety of test types, showing up to three tested columns.
    pub fn get_example_test_yaml(store: &Store) -> Result<Option<String>> {
        let model_id: Option<String> = store
            .conn()
            .query_row(
                "SELECT model_id FROM tests
                 WHERE model_id IS NOT NULL
                 GROUP BY model_id
                 ORDER BY COUNT(DISTINCT kind) DESC, model_id ASC
                 LIMIT 1",
                [],
                |r| r.get(0),
            )
            .ok();

        let model_id = match model_id {
            Some(id) => id,
            None => return Ok(None),
        };

        let model_name: String =
            store.conn().query_row("SELECT name FROM models WHERE unique_id = ?1", params![model_id], |r| r.get(0))?;

        let mut stmt = store.conn().prepare(
            "SELECT column_name, GROUP_CONCAT(DISTINCT kind) FROM tests
             WHERE model_id = ?1 AND column_name != ''
             GROUP BY column_name ORDER BY column_name LIMIT 3",
        )?;
        let rows = stmt.query_map(params![model_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut yaml = format!("models:\n  - name: {model_name}\n    columns:\n");
        for row in rows {
            let (column, kinds) = row?;
            yaml.push_str(&format!("      - name: {column}\n        tests:\n"));
            for kind in kinds.split(',') {
                yaml.push_str(&format!("          - {kind}\n"));
            }
        }
        Ok(Some(yaml))
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
    fn get_stats_counts_layers_and_sources() {
        let store = fixture_store();
        let stats = Patterns::get_stats(&store).expect("stats");
        assert_eq!(stats.models_by_layer.get("staging").copied(), Some(3));
        assert_eq!(stats.models_by_layer.get("marts").copied(), Some(2));
        assert_eq!(stats.source_count, 3);
        assert_eq!(stats.project_name.as_deref(), Some("jaffle_shop"));
    }

    #[test]
    fn patterns_infer_marts_template_from_fct_and_dim_prefixes() {
        let store = fixture_store();
        let patterns = Patterns::get_patterns(&store).expect("patterns");
        assert_eq!(patterns.naming.marts_template, "fct_{subject} / dim_{entity}");
    }
}
