//! The top-level orchestrator: intent detection → pivot resolution →
//! DAG expansion → auxiliary gathering → budget allocation → tiered
//! packing → confidence estimation.

use std::collections::{HashMap, HashSet};

use rusqlite::params;
use tracing::{debug, info};

use crate::config::CapsuleConfig;
use crate::error::Result;
use crate::graph::Graph;
use crate::intent::detect_intent;
use crate::patterns::Patterns;
use crate::search::Search;
use crate::store::Store;
use crate::types::{
    estimate_tokens, estimate_tokens_value, Column, ContextCapsule, FullModelContext, Intent,
    MinimalModelContext, SkeletonColumn, SkeletonModelContext,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relationship {
    Pivot,
    Upstream,
    Downstream,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::Pivot => "pivot",
            Relationship::Upstream => "upstream",
            Relationship::Downstream => "downstream",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoverEntry {
    pub unique_id: String,
    pub name: String,
    pub layer: String,
    pub file_path: String,
    pub relationship: Relationship,
    pub distance: i64,
}

struct ModelRow {
    unique_id: String,
    name: String,
    layer: String,
    materialization: String,
    file_path: String,
    compiled_code: String,
    description: String,
    tags: Vec<String>,
    depends_on: Vec<String>,
}

fn fetch_model_row(store: &Store, id: &str) -> Result<Option<ModelRow>> {
    let row = store
        .conn()
        .query_row(
            "SELECT unique_id, name, layer, materialization, file_path, compiled_code, description, tags, depends_on
             FROM models WHERE unique_id = ?1",
            params![id],
            |r| {
                let tags_json: String = r.get(7)?;
                let depends_json: String = r.get(8)?;
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, String>(6)?,
                    tags_json,
                    depends_json,
                ))
            },
        )
        .ok();

    Ok(row.map(|(unique_id, name, layer, materialization, file_path, compiled_code, description, tags_json, depends_json)| {
        ModelRow {
            unique_id,
            name,
            layer,
            materialization,
            file_path,
            compiled_code,
            description,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            depends_on: serde_json::from_str(&depends_json).unwrap_or_default(),
        }
    }))
}

fn depends_on_names(store: &Store, depends_on: &[String]) -> Vec<String> {
    depends_on
        .iter()
        .filter_map(|id| {
            store
                .conn()
                .query_row("SELECT name FROM models WHERE unique_id = ?1", params![id], |r| r.get(0))
                .ok()
        })
        .collect()
}

fn build_full(store: &Store, id: &str) -> Result<Option<FullModelContext>> {
    let row = match fetch_model_row(store, id)? {
        Some(r) => r,
        None => return Ok(None),
    };
    let columns = Search::get_columns(store, id)?;
    let depends_names = depends_on_names(store, &row.depends_on);

    Ok(Some(FullModelContext {
        unique_id: row.unique_id,
        name: row.name,
        layer: row.layer,
        materialization: row.materialization,
        file_path: row.file_path,
        compiled_code: row.compiled_code,
        description: row.description,
        columns,
        tags: row.tags,
        depends_on_names: depends_names,
    }))
}

fn build_skeleton(store: &Store, id: &str, distance: i64) -> Result<Option<SkeletonModelContext>> {
    let row = match fetch_model_row(store, id)? {
        Some(r) => r,
        None => return Ok(None),
    };
    let columns: Vec<SkeletonColumn> = Search::get_columns(store, id)?
        .into_iter()
        .map(|c| SkeletonColumn { name: c.name, data_type: c.data_type })
        .collect();

    Ok(Some(SkeletonModelContext {
        unique_id: row.unique_id,
        name: row.name,
        layer: row.layer,
        materialization: row.materialization,
        columns,
        distance,
    }))
}

fn build_minimal(store: &Store, id: &str, distance: i64) -> Result<Option<MinimalModelContext>> {
    let row = match fetch_model_row(store, id)? {
        Some(r) => r,
        None => return Ok(None),
    };
    let columns: Vec<Column> = Search::get_columns(store, id)?;
    let key_columns: Vec<String> = columns
        .iter()
        .filter(|c| c.is_primary_key || c.is_foreign_key)
        .take(5)
        .map(|c| c.name.clone())
        .collect();

    Ok(Some(MinimalModelContext {
        unique_id: row.unique_id,
        name: row.name,
        layer: row.layer,
        column_count: columns.len(),
        key_columns,
        distance,
    }))
}

struct BudgetShares {
    pivot: usize,
    upstream: usize,
    downstream: usize,
    tests_macros: usize,
    patterns: usize,
}

fn allocate_budget(total: usize) -> BudgetShares {
    BudgetShares {
        pivot: (total as f64 * 0.45) as usize,
        upstream: (total as f64 * 0.20) as usize,
        downstream: (total as f64 * 0.10) as usize,
        tests_macros: (total as f64 * 0.10) as usize,
        patterns: (total as f64 * 0.10) as usize,
        // remaining ~5% is session/misc overhead, not separately packed
    }
}

pub struct CapsuleBuilder;

impl CapsuleBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        store: &Store,
        config: &CapsuleConfig,
        task: &str,
        focus_model: Option<&str>,
        entry_models: &[String],
        entry_paths: &[String],
        token_budget: Option<usize>,
    ) -> Result<ContextCapsule> {
        let token_budget = token_budget.unwrap_or(config.default_token_budget);
        let intent = detect_intent(task);
        let depth = config.depth_for(intent.as_str());

        info!(task, intent = intent.as_str(), "building capsule");

        // Step 2: pivot resolution, in priority order.
        let mut pivots: Vec<String> = Vec::new();
        let mut pivot_set: HashSet<String> = HashSet::new();
        let mut resolved_explicitly = false;

        for id in Search::resolve_file_paths(store, entry_paths)? {
            if pivot_set.insert(id.clone()) {
                pivots.push(id);
                resolved_explicitly = true;
            }
        }
        for name in entry_models {
            if let Some(id) = Search::get_model_by_name(store, name)? {
                if pivot_set.insert(id.clone()) {
                    pivots.push(id);
                    resolved_explicitly = true;
                }
            }
        }
        if let Some(name) = focus_model {
            let resolved = Search::get_model_by_name(store, name)?
                .or_else(|| Search::get_model_by_id(store, name).ok().filter(|&ok| ok).map(|_| name.to_string()));
            if let Some(id) = resolved {
                if pivot_set.insert(id.clone()) {
                    pivots.push(id);
                    resolved_explicitly = true;
                }
            }
        }

        let mut top_search_score = 0.0_f64;
        if pivots.len() < config.max_pivots {
            let hits = Search::search(store, task, intent, config.max_pivots, &pivot_set)?;
            if let Some(first) = hits.first() {
                top_search_score = first.score;
            }
            for hit in hits {
                if pivots.len() >= config.max_pivots {
                    break;
                }
                if pivot_set.insert(hit.unique_id.clone()) {
                    pivots.push(hit.unique_id);
                }
            }
        }
        pivots.truncate(config.max_pivots);

        // Step 3: DAG expansion, keeping the minimum distance seen
        // across all pivots.
        let mut upstream_distances: HashMap<String, i64> = HashMap::new();
        let mut downstream_distances: HashMap<String, i64> = HashMap::new();

        for pivot in &pivots {
            for (id, dist) in Graph::upstream(store, pivot, depth.upstream)? {
                if !id.starts_with("model.") || pivot_set.contains(&id) {
                    continue;
                }
                upstream_distances
                    .entry(id)
                    .and_modify(|d| *d = (*d).min(dist))
                    .or_insert(dist);
            }
            for (id, dist) in Graph::downstream(store, pivot, depth.downstream)? {
                if !id.starts_with("model.") || pivot_set.contains(&id) {
                    continue;
                }
                downstream_distances
                    .entry(id)
                    .and_modify(|d| *d = (*d).min(dist))
                    .or_insert(dist);
            }
        }

        let mut upstream_ids: Vec<(String, i64)> = upstream_distances.into_iter().collect();
        upstream_ids.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        let mut downstream_ids: Vec<(String, i64)> = downstream_distances.into_iter().collect();
        downstream_ids.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        // Step 4: auxiliary gathering.
        let mut relevant_tests = Vec::new();
        let mut relevant_macros = Vec::new();
        let mut source_ids_seen: HashSet<String> = HashSet::new();
        let mut relevant_sources = Vec::new();

        for pivot in &pivots {
            for test in Search::get_tests_for_model(store, pivot)? {
                relevant_tests.push(serde_json::to_value(&test)?);
            }
            for macro_id in Search::get_macros_for_model(store, pivot)? {
                relevant_macros.push(serde_json::json!({ "unique_id": macro_id, "model_id": pivot }));
            }
            for source in Search::get_sources_for_model(store, pivot)? {
                if source_ids_seen.insert(source.unique_id.clone()) {
                    relevant_sources.push(serde_json::to_value(&source)?);
                }
            }
        }

        let mut excluded: HashSet<String> = pivot_set.clone();
        excluded.extend(upstream_ids.iter().map(|(id, _)| id.clone()));
        excluded.extend(downstream_ids.iter().map(|(id, _)| id.clone()));
        let similar_hits = Search::search(store, task, intent, 5, &excluded)?;
        let similar_models: Vec<String> = similar_hits.into_iter().map(|h| h.name).collect();

        // Step 5: budget allocation.
        let shares = allocate_budget(token_budget);

        // Step 6: tiered packing.
        let mut pivot_models = Vec::new();
        let mut used = 0usize;
        for pivot in &pivots {
            if let Some(full) = build_full(store, pivot)? {
                let cost = estimate_tokens_value(&serde_json::to_value(&full)?);
                if used > 0 && used + cost > shares.pivot {
                    continue;
                }
                used += cost;
                pivot_models.push(full);
            }
        }

        let mut upstream_models = Vec::new();
        let mut used = 0usize;
        for (id, dist) in &upstream_ids {
            if let Some(skeleton) = build_skeleton(store, id, *dist)? {
                let cost = estimate_tokens_value(&serde_json::to_value(&skeleton)?);
                if used > 0 && used + cost > shares.upstream {
                    break;
                }
                used += cost;
                upstream_models.push(skeleton);
            }
        }

        let mut downstream_models = Vec::new();
        let mut used = 0usize;
        for (id, dist) in &downstream_ids {
            if let Some(minimal) = build_minimal(store, id, *dist)? {
                let cost = estimate_tokens_value(&serde_json::to_value(&minimal)?);
                if used > 0 && used + cost > shares.downstream {
                    break;
                }
                used += cost;
                downstream_models.push(minimal);
            }
        }

        let tm_half = shares.tests_macros / 2;
        let mut packed_tests = Vec::new();
        let mut used = 0usize;
        for test in &relevant_tests {
            let cost = estimate_tokens_value(test);
            if used > 0 && used + cost > tm_half {
                break;
            }
            used += cost;
            packed_tests.push(test.clone());
        }
        let mut packed_macros = Vec::new();
        let mut used = 0usize;
        for m in &relevant_macros {
            let cost = estimate_tokens_value(m);
            if used > 0 && used + cost > shares.tests_macros - tm_half {
                break;
            }
            used += cost;
            packed_macros.push(m.clone());
        }

        let patterns = Patterns::get_patterns(store)?;
        let patterns_value = serde_json::to_value(&patterns)?;
        let patterns_tokens = std::cmp::min(shares.patterns, estimate_tokens_value(&patterns_value));

        // Step 7: confidence.
        let confidence = if resolved_explicitly || top_search_score > 0.5 {
            crate::types::Confidence::High
        } else if !pivots.is_empty() && top_search_score >= 0.15 {
            crate::types::Confidence::Medium
        } else {
            crate::types::Confidence::Low
        };

        let mut suggested_refinements = Vec::new();
        if matches!(confidence, crate::types::Confidence::Low) {
            suggested_refinements.push("name a specific model".to_string());
            suggested_refinements.push("provide a file path".to_string());
        }

        let session_context = serde_json::json!({
            "max_pivots": config.max_pivots,
            "upstream_depth": depth.upstream,
            "downstream_depth": depth.downstream,
        });

        let pivot_tokens: usize = pivot_models
            .iter()
            .map(|m| estimate_tokens(&serde_json::to_string(m).unwrap_or_default()))
            .sum();
        let token_estimate = pivot_tokens
            + upstream_models.iter().map(|m| estimate_tokens(&serde_json::to_string(m).unwrap_or_default())).sum::<usize>()
            + downstream_models.iter().map(|m| estimate_tokens(&serde_json::to_string(m).unwrap_or_default())).sum::<usize>()
            + packed_tests.iter().map(estimate_tokens_value).sum::<usize>()
            + packed_macros.iter().map(estimate_tokens_value).sum::<usize>()
            + patterns_tokens;

        debug!(token_estimate, token_budget, "capsule assembled");

        Ok(ContextCapsule {
            task: task.to_string(),
            intent: intent.as_str().to_string(),
            pivot_models,
            upstream_models,
            downstream_models,
            relevant_tests: packed_tests,
            relevant_macros: packed_macros,
            relevant_sources,
            project_patterns: patterns_value,
            similar_models,
            session_context,
            token_estimate,
            token_budget,
            confidence: confidence.as_str().to_string(),
            suggested_refinements,
        })
    }

    pub fn discover(
        store: &Store,
        config: &CapsuleConfig,
        task: &str,
        focus_model: Option<&str>,
        entry_models: &[String],
        limit: usize,
    ) -> Result<Vec<DiscoverEntry>> {
        let intent = detect_intent(task);
        let depth = config.depth_for(intent.as_str());

        let mut pivots: Vec<String> = Vec::new();
        let mut pivot_set: HashSet<String> = HashSet::new();

        for name in entry_models {
            if let Some(id) = Search::get_model_by_name(store, name)? {
                if pivot_set.insert(id.clone()) {
                    pivots.push(id);
                }
            }
        }
        if let Some(name) = focus_model {
            if let Some(id) = Search::get_model_by_name(store, name)? {
                if pivot_set.insert(id.clone()) {
                    pivots.push(id);
                }
            }
        }
        if pivots.is_empty() {
            let hits = Search::search(store, task, intent, config.max_pivots, &pivot_set)?;
            for hit in hits {
                if pivot_set.insert(hit.unique_id.clone()) {
                    pivots.push(hit.unique_id);
                }
            }
        }

        let mut entries = Vec::new();
        for pivot in &pivots {
            if let Some(row) = fetch_model_row(store, pivot)? {
                entries.push(DiscoverEntry {
                    unique_id: row.unique_id,
                    name: row.name,
                    layer: row.layer,
                    file_path: row.file_path,
                    relationship: Relationship::Pivot,
                    distance: 0,
                });
            }
        }

        let mut seen: HashSet<String> = pivot_set.clone();
        for pivot in &pivots {
            for (id, dist) in Graph::upstream(store, pivot, depth.upstream)? {
                if !id.starts_with("model.") || !seen.insert(id.clone()) {
                    continue;
                }
                if let Some(row) = fetch_model_row(store, &id)? {
                    entries.push(DiscoverEntry {
                        unique_id: row.unique_id,
                        name: row.name,
                        layer: row.layer,
                        file_path: row.file_path,
                        relationship: Relationship::Upstream,
                        distance: dist,
                    });
                }
            }
            for (id, dist) in Graph::downstream(store, pivot, depth.downstream)? {
                if !id.starts_with("model.") || !seen.insert(id.clone()) {
                    continue;
                }
                if let Some(row) = fetch_model_row(store, &id)? {
                    entries.push(DiscoverEntry {
                        unique_id: row.unique_id,
                        name: row.name,
                        layer: row.layer,
                        file_path: row.file_path,
                        relationship: Relationship::Downstream,
                        distance: dist,
                    });
                }
            }
        }

        entries.truncate(limit);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Ingestor;
    use std::collections::HashSet as StdHashSet;
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
    fn build_with_focus_model_is_high_confidence_and_includes_upstream() {
        let store = fixture_store();
        let config = CapsuleConfig::default();
        let capsule = CapsuleBuilder::build(
            &store,
            &config,
            "add a discount column",
            Some("fct_orders"),
            &[],
            &[],
            None,
        )
        .expect("build");

        assert_eq!(capsule.confidence, "high");
        assert!(capsule.pivot_models.iter().any(|m| m.name == "fct_orders"));
        let upstream_names: StdHashSet<&str> = capsule.upstream_models.iter().map(|m| m.name.as_str()).collect();
        assert!(upstream_names.contains("stg_orders") || upstream_names.contains("stg_payments"));
    }

    #[test]
    fn build_excludes_pivots_from_upstream_and_downstream() {
        let store = fixture_store();
        let config = CapsuleConfig::default();
        let capsule =
            CapsuleBuilder::build(&store, &config, "explore the project", Some("fct_orders"), &[], &[], None)
                .expect("build");

        let pivot_ids: StdHashSet<&str> = capsule.pivot_models.iter().map(|m| m.unique_id.as_str()).collect();
        for u in &capsule.upstream_models {
            assert!(!pivot_ids.contains(u.unique_id.as_str()));
        }
        for d in &capsule.downstream_models {
            assert!(!pivot_ids.contains(d.unique_id.as_str()));
        }
    }

    #[test]
    fn token_estimate_stays_within_120_percent_of_budget() {
        let store = fixture_store();
        let config = CapsuleConfig::default();
        let capsule =
            CapsuleBuilder::build(&store, &config, "add a discount column", Some("fct_orders"), &[], &[], Some(2000))
                .expect("build");
        assert!(capsule.token_estimate as f64 <= 1.2 * 2000.0);
    }
}
