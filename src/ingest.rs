//! Parses dbt manifest/catalog/run-results JSON and populates the
//! store. Re-ingestion is destructive per table: every table touched
//! by a step is cleared and rebuilt from the artifact, so the store
//! never accumulates orphaned rows across runs.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::params;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::store::Store;

const LAYER_KEYWORDS: &[(&str, &[&str])] = &[
    ("staging", &["staging", "stg"]),
    ("intermediate", &["intermediate", "int"]),
    ("marts", &["marts", "mart", "fct", "dim", "agg", "rpt", "report"]),
];

/// Derive a Model's layer from its fqn path segments, name, and tags,
/// checking staging, then intermediate, then marts; first match wins.
pub fn detect_layer(fqn: &[String], name: &str, tags: &[String]) -> String {
    let mut candidates: Vec<String> = Vec::with_capacity(fqn.len() + tags.len() + 1);
    candidates.extend(fqn.iter().cloned());
    candidates.push(name.to_string());
    candidates.extend(tags.iter().cloned());

    for (layer, keywords) in LAYER_KEYWORDS {
        for candidate in &candidates {
            let lc = candidate.to_lowercase();
            for kw in *keywords {
                if lc == *kw || lc.starts_with(kw) || lc.contains(&format!("/{kw}")) {
                    return layer.to_string();
                }
            }
        }
    }
    "other".to_string()
}

/// Best-effort extraction of a name from a polymorphic `refs`/`sources`
/// entry: an object yields its `name` field, a list yields its first
/// element, anything else is passed through as a raw string.
fn polymorphic_name(entry: &Value) -> Option<String> {
    match entry {
        Value::Object(map) => map.get("name").and_then(|v| v.as_str()).map(|s| s.to_string()),
        Value::Array(items) => items.first().and_then(polymorphic_name),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn extract_stat(value: Option<&Value>) -> Option<Value> {
    match value {
        Some(Value::Object(map)) if map.contains_key("value") => map.get("value").cloned(),
        Some(v) => Some(v.clone()),
        None => None,
    }
}

fn as_i64(value: Option<&Value>) -> Option<i64> {
    value.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
}

pub struct Ingestor;

impl Ingestor {
    /// Parse and load the manifest. The whole pass runs in one
    /// transaction: partial writes from a malformed manifest are
    /// impossible because the transaction rolls back on error.
    pub fn index_manifest(store: &mut Store, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|_| EngineError::MissingArtifact(path.display().to_string()))?;
        let doc: Value = serde_json::from_str(&text).map_err(|e| EngineError::CorruptArtifact {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        info!(path = %path.display(), "indexing manifest");

        store.transaction(|tx| {
            tx.execute("DELETE FROM index_metadata", [])?;
            tx.execute("DELETE FROM models", [])?;
            tx.execute("DELETE FROM columns", [])?;
            tx.execute("DELETE FROM tests", [])?;
            tx.execute("DELETE FROM sources", [])?;
            tx.execute("DELETE FROM source_columns", [])?;
            tx.execute("DELETE FROM macros", [])?;
            tx.execute("DELETE FROM exposures", [])?;
            tx.execute("DELETE FROM edges", [])?;

            let meta = doc.get("metadata").cloned().unwrap_or(Value::Null);
            let project_name = meta.get("project_name").and_then(|v| v.as_str()).unwrap_or("");
            for (key, val) in [
                ("dbt_schema_version", meta.get("dbt_schema_version")),
                ("dbt_version", meta.get("dbt_version")),
                ("adapter_type", meta.get("adapter_type")),
                ("project_name", meta.get("project_name")),
                ("generated_at", meta.get("generated_at")),
            ] {
                if let Some(v) = val.and_then(|v| v.as_str()) {
                    tx.execute(
                        "INSERT INTO index_metadata(key, value) VALUES (?1, ?2)",
                        params![key, v],
                    )?;
                }
            }

            let empty = serde_json::Map::new();
            let nodes = doc.get("nodes").and_then(|v| v.as_object()).unwrap_or(&empty);

            for (unique_id, node) in nodes {
                let resource_type = node.get("resource_type").and_then(|v| v.as_str()).unwrap_or("");
                match resource_type {
                    "model" => insert_model(tx, unique_id, node, project_name)?,
                    "test" => insert_test(tx, unique_id, node)?,
                    _ => {}
                }
            }

            if let Some(sources) = doc.get("sources").and_then(|v| v.as_object()) {
                for (unique_id, node) in sources {
                    insert_source(tx, unique_id, node)?;
                }
            }

            if let Some(macros) = doc.get("macros").and_then(|v| v.as_object()) {
                for (unique_id, node) in macros {
                    insert_macro(tx, unique_id, node)?;
                }
            }

            if let Some(exposures) = doc.get("exposures").and_then(|v| v.as_object()) {
                for (unique_id, node) in exposures {
                    insert_exposure(tx, unique_id, node)?;
                }
            }

            if let Some(parent_map) = doc.get("parent_map").and_then(|v| v.as_object()) {
                insert_edges(tx, parent_map)?;
            }

            recompute_degrees_and_centrality(tx)?;
            recompute_key_flags(tx)?;
            rebuild_fts(tx)?;

            Ok(())
        })
    }

    /// Update row_count/bytes/last_modified per model and data_type
    /// per column from a catalog document. Missing file is a silent
    /// skip, not an error.
    pub fn index_catalog(store: &mut Store, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(_) => {
                warn!(path = %path.display(), "catalog not found, skipping");
                return Ok(());
            }
        };
        let doc: Value = serde_json::from_str(&text).map_err(|e| EngineError::CorruptArtifact {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        store.transaction(|tx| {
            let empty = serde_json::Map::new();
            let nodes = doc.get("nodes").and_then(|v| v.as_object()).unwrap_or(&empty);
            for (unique_id, node) in nodes {
                let row_count = extract_stat(
                    node.get("stats")
                        .and_then(|s| s.get("row_count").or_else(|| s.get("num_rows"))),
                );
                let bytes = extract_stat(
                    node.get("stats")
                        .and_then(|s| s.get("bytes").or_else(|| s.get("num_bytes"))),
                );
                let last_modified = node
                    .get("metadata")
                    .and_then(|m| m.get("last_modified"))
                    .and_then(|v| v.as_str());

                tx.execute(
                    "UPDATE models SET row_count = ?1, bytes = ?2, last_modified = ?3 WHERE unique_id = ?4",
                    params![
                        row_count.as_ref().and_then(|v| v.as_i64()),
                        bytes.as_ref().and_then(|v| v.as_i64()),
                        last_modified,
                        unique_id
                    ],
                )?;

                if let Some(columns) = node.get("columns").and_then(|v| v.as_object()) {
                    for (col_name, col) in columns {
                        let data_type = col.get("type").and_then(|v| v.as_str()).unwrap_or("");
                        tx.execute(
                            "UPDATE columns SET data_type = ?1 WHERE model_id = ?2 AND lower(name) = lower(?3)",
                            params![data_type, unique_id, col_name],
                        )?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Update last_status/last_execution_time/last_failures for test
    /// nodes from a run-results document. Missing file is a silent
    /// skip.
    pub fn index_run_results(store: &mut Store, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(_) => {
                warn!(path = %path.display(), "run results not found, skipping");
                return Ok(());
            }
        };
        let doc: Value = serde_json::from_str(&text).map_err(|e| EngineError::CorruptArtifact {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        store.transaction(|tx| {
            let results = doc.get("results").and_then(|v| v.as_array()).cloned().unwrap_or_default();
            for result in &results {
                let unique_id = match result.get("unique_id").and_then(|v| v.as_str()) {
                    Some(id) => id,
                    None => continue,
                };
                let status = result.get("status").and_then(|v| v.as_str());
                let failures = as_i64(result.get("failures"));

                let mut total_time = 0.0_f64;
                let mut has_timing = false;
                if let Some(timing) = result.get("timing").and_then(|v| v.as_array()) {
                    for entry in timing {
                        if let (Some(started), Some(completed)) = (
                            entry.get("started_at").and_then(|v| v.as_str()),
                            entry.get("completed_at").and_then(|v| v.as_str()),
                        ) {
                            if let (Ok(s), Ok(c)) = (
                                chrono::DateTime::parse_from_rfc3339(started),
                                chrono::DateTime::parse_from_rfc3339(completed),
                            ) {
                                total_time += (c - s).num_milliseconds() as f64 / 1000.0;
                                has_timing = true;
                            }
                        }
                    }
                }

                tx.execute(
                    "UPDATE tests SET last_status = ?1, last_execution_time = ?2, last_failures = ?3 WHERE unique_id = ?4",
                    params![
                        status,
                        if has_timing { Some(total_time) } else { None },
                        failures,
                        unique_id
                    ],
                )?;
            }
            Ok(())
        })
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default()
}

fn insert_model(tx: &rusqlite::Transaction, unique_id: &str, node: &Value, project_name: &str) -> Result<()> {
    let name = node.get("name").and_then(|v| v.as_str()).unwrap_or(unique_id);
    let fqn = string_list(node.get("fqn"));
    let tags = string_list(node.get("tags"));
    let package_name = node.get("package_name").and_then(|v| v.as_str()).unwrap_or(project_name);
    let layer = detect_layer(&fqn, name, &tags);
    let materialization = node
        .get("config")
        .and_then(|c| c.get("materialized"))
        .and_then(|v| v.as_str())
        .unwrap_or("view");
    let file_path = node.get("original_file_path").and_then(|v| v.as_str()).unwrap_or("");
    let raw_code = node
        .get("raw_code")
        .or_else(|| node.get("raw_sql"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let compiled_code = node
        .get("compiled_code")
        .or_else(|| node.get("compiled_sql"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let description = node.get("description").and_then(|v| v.as_str()).unwrap_or("");

    let depends_on: Vec<String> = node
        .get("depends_on")
        .and_then(|d| d.get("nodes"))
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(polymorphic_name).collect())
        .unwrap_or_default();

    tx.execute(
        "INSERT INTO models (unique_id, name, layer, materialization, file_path, raw_code,
            compiled_code, description, tags, depends_on, package_name)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            unique_id,
            name,
            layer,
            materialization,
            file_path,
            raw_code,
            compiled_code,
            description,
            serde_json::to_string(&tags)?,
            serde_json::to_string(&depends_on)?,
            package_name,
        ],
    )?;

    if let Some(columns) = node.get("columns").and_then(|v| v.as_object()) {
        for (col_name, col) in columns {
            let data_type = col.get("data_type").and_then(|v| v.as_str()).unwrap_or("");
            let col_description = col.get("description").and_then(|v| v.as_str()).unwrap_or("");
            tx.execute(
                "INSERT OR IGNORE INTO columns (model_id, name, data_type, description)
                 VALUES (?1, ?2, ?3, ?4)",
                params![unique_id, col_name, data_type, col_description],
            )?;
        }
    }

    Ok(())
}

const KNOWN_TEST_NAMES: &[&str] = &["not_null", "unique", "accepted_values", "relationships"];

fn insert_test(tx: &rusqlite::Transaction, unique_id: &str, node: &Value) -> Result<()> {
    let test_metadata = node.get("test_metadata");
    let kind = match test_metadata {
        Some(tm) => {
            let name = tm.get("name").and_then(|v| v.as_str()).unwrap_or("");
            if KNOWN_TEST_NAMES.contains(&name) {
                name.to_string()
            } else {
                "generic".to_string()
            }
        }
        None => "singular".to_string(),
    };

    let column_name = test_metadata
        .and_then(|tm| tm.get("kwargs"))
        .and_then(|k| k.get("column_name"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let model_id = node
        .get("depends_on")
        .and_then(|d| d.get("nodes"))
        .and_then(|v| v.as_array())
        .and_then(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .find(|s| s.starts_with("model."))
        })
        .map(|s| s.to_string());

    let severity = node
        .get("config")
        .and_then(|c| c.get("severity"))
        .and_then(|v| v.as_str())
        .unwrap_or("error");

    tx.execute(
        "INSERT INTO tests (unique_id, kind, model_id, column_name, severity)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![unique_id, kind, model_id, column_name, severity],
    )?;
    Ok(())
}

fn insert_source(tx: &rusqlite::Transaction, unique_id: &str, node: &Value) -> Result<()> {
    let name = node.get("name").and_then(|v| v.as_str()).unwrap_or(unique_id);
    let source_name = node.get("source_name").and_then(|v| v.as_str()).unwrap_or("");
    let schema = node.get("schema").and_then(|v| v.as_str()).unwrap_or("");
    let description = node.get("description").and_then(|v| v.as_str()).unwrap_or("");
    let loader = node.get("loader").and_then(|v| v.as_str()).unwrap_or("");
    let freshness_warn = node
        .get("freshness")
        .and_then(|f| f.get("warn_after"))
        .and_then(|v| v.get("count"))
        .map(|v| v.to_string());
    let freshness_error = node
        .get("freshness")
        .and_then(|f| f.get("error_after"))
        .and_then(|v| v.get("count"))
        .map(|v| v.to_string());

    tx.execute(
        "INSERT INTO sources (unique_id, name, source_name, schema, description, loader,
            freshness_warn_after, freshness_error_after)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![unique_id, name, source_name, schema, description, loader, freshness_warn, freshness_error],
    )?;

    if let Some(columns) = node.get("columns").and_then(|v| v.as_object()) {
        for (col_name, col) in columns {
            let data_type = col.get("data_type").and_then(|v| v.as_str()).unwrap_or("");
            let col_description = col.get("description").and_then(|v| v.as_str()).unwrap_or("");
            tx.execute(
                "INSERT OR IGNORE INTO source_columns (source_id, name, data_type, description)
                 VALUES (?1, ?2, ?3, ?4)",
                params![unique_id, col_name, data_type, col_description],
            )?;
        }
    }
    Ok(())
}

fn insert_macro(tx: &rusqlite::Transaction, unique_id: &str, node: &Value) -> Result<()> {
    let name = node.get("name").and_then(|v| v.as_str()).unwrap_or(unique_id);
    let source_code = node
        .get("macro_sql")
        .or_else(|| node.get("source_code"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let description = node.get("description").and_then(|v| v.as_str()).unwrap_or("");
    let package_name = node.get("package_name").and_then(|v| v.as_str()).unwrap_or("");

    tx.execute(
        "INSERT INTO macros (unique_id, name, source_code, description, package_name)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![unique_id, name, source_code, description, package_name],
    )?;
    Ok(())
}

fn insert_exposure(tx: &rusqlite::Transaction, unique_id: &str, node: &Value) -> Result<()> {
    let name = node.get("name").and_then(|v| v.as_str()).unwrap_or(unique_id);
    let exposure_type = node.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let url = node.get("url").and_then(|v| v.as_str());
    let owner = node
        .get("owner")
        .and_then(|o| o.get("name").or_else(|| o.get("email")))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let depends_on = string_list(node.get("depends_on").and_then(|d| d.get("nodes")));

    tx.execute(
        "INSERT INTO exposures (unique_id, name, exposure_type, url, owner, depends_on)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![unique_id, name, exposure_type, url, owner, serde_json::to_string(&depends_on)?],
    )?;
    Ok(())
}

fn relevant_prefix(id: &str) -> bool {
    id.starts_with("model.")
        || id.starts_with("source.")
        || id.starts_with("exposure.")
        || id.starts_with("test.")
}

fn insert_edges(tx: &rusqlite::Transaction, parent_map: &serde_json::Map<String, Value>) -> Result<()> {
    let mut seen: HashMap<(String, String), ()> = HashMap::new();
    for (child_id, parents) in parent_map {
        if !relevant_prefix(child_id) {
            continue;
        }
        let parents = match parents.as_array() {
            Some(p) => p,
            None => continue,
        };
        for parent in parents {
            let parent_id = match parent.as_str() {
                Some(p) => p,
                None => continue,
            };
            if !relevant_prefix(parent_id) {
                continue;
            }
            let key = (parent_id.to_string(), child_id.to_string());
            if seen.contains_key(&key) {
                continue;
            }
            seen.insert(key, ());
            tx.execute(
                "INSERT OR IGNORE INTO edges (parent_id, child_id) VALUES (?1, ?2)",
                params![parent_id, child_id],
            )?;
        }
    }
    Ok(())
}

fn recompute_degrees_and_centrality(tx: &rusqlite::Transaction) -> Result<()> {
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
}

fn recompute_key_flags(tx: &rusqlite::Transaction) -> Result<()> {
    tx.execute("UPDATE columns SET is_primary_key = 0, is_foreign_key = 0", [])?;

    tx.execute(
        "UPDATE columns SET is_primary_key = 1
         WHERE (model_id, name) IN (
            SELECT model_id, column_name FROM tests
            WHERE model_id IS NOT NULL AND kind IN ('not_null', 'unique')
            GROUP BY model_id, column_name
            HAVING COUNT(DISTINCT kind) >= 2
         )",
        [],
    )?;

    tx.execute(
        "UPDATE columns SET is_foreign_key = 1
         WHERE (model_id, name) IN (
            SELECT model_id, column_name FROM tests
            WHERE model_id IS NOT NULL AND kind = 'relationships'
         )",
        [],
    )?;

    Ok(())
}

fn rebuild_fts(tx: &rusqlite::Transaction) -> Result<()> {
    tx.execute("DELETE FROM search_index", [])?;

    let mut stmt = tx.prepare("SELECT unique_id, name, description, compiled_code, tags FROM models")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut to_insert = Vec::new();
    for row in rows {
        to_insert.push(row?);
    }
    drop(stmt);

    for (unique_id, name, description, compiled_code, tags_json) in to_insert {
        let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
        let mut col_stmt = tx.prepare("SELECT name FROM columns WHERE model_id = ?1 ORDER BY name")?;
        let col_names: Vec<String> = col_stmt
            .query_map(params![unique_id], |r| r.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        drop(col_stmt);

        let truncated_sql: String = compiled_code.chars().take(2000).collect();

        tx.execute(
            "INSERT INTO search_index (unique_id, name, description, columns, sql, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                unique_id,
                name,
                description,
                col_names.join(" "),
                truncated_sql,
                tags.join(" "),
            ],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_detection_follows_precedence() {
        assert_eq!(detect_layer(&["staging".into(), "jaffle".into()], "stg_orders", &[]), "staging");
        assert_eq!(detect_layer(&["intermediate".into()], "int_orders_joined", &[]), "intermediate");
        assert_eq!(detect_layer(&["marts".into()], "fct_orders", &[]), "marts");
        assert_eq!(detect_layer(&["finance".into()], "monthly_report", &[]), "other");
        assert_eq!(detect_layer(&[], "stg_customers", &[]), "staging");
    }

    #[test]
    fn polymorphic_name_handles_all_shapes() {
        assert_eq!(polymorphic_name(&Value::String("orders".into())), Some("orders".into()));
        assert_eq!(
            polymorphic_name(&serde_json::json!(["orders", "v2"])),
            Some("orders".into())
        );
        assert_eq!(
            polymorphic_name(&serde_json::json!({"name": "orders"})),
            Some("orders".into())
        );
    }
}
