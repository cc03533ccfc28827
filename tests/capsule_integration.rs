//! End-to-end exercise of the full pipeline — ingest a manifest, then
//! drive graph/search/patterns/capsule queries against the populated
//! store — against the same five-model reference project spec.md's
//! concrete scenarios use (`stg_orders`, `stg_customers`, `stg_payments`,
//! `fct_orders`, `dim_customers`).

use std::collections::HashSet;
use std::io::Write;

use dbt_context_engine::config::CapsuleConfig;
use dbt_context_engine::{CapsuleBuilder, Graph, Ingestor, Patterns, Search, Store};
use serde_json::json;

fn reference_manifest() -> serde_json::Value {
    json!({
        "metadata": {
            "dbt_schema_version": "https://schemas.getdbt.com/dbt/manifest/v11.json",
            "dbt_version": "1.7.0",
            "adapter_type": "duckdb",
            "project_name": "jaffle_shop",
            "generated_at": "2026-01-01T00:00:00Z"
        },
        "nodes": {
            "model.jaffle_shop.stg_orders": {
                "resource_type": "model",
                "name": "stg_orders",
                "fqn": ["jaffle_shop", "staging", "stg_orders"],
                "package_name": "jaffle_shop",
                "original_file_path": "models/staging/stg_orders.sql",
                "raw_code": "select * from {{ source('ecom', 'orders') }}",
                "compiled_code": "select * from raw.ecom.orders",
                "description": "Staged orders.",
                "config": {"materialized": "view"},
                "tags": [],
                "columns": {
                    "order_id": {"name": "order_id", "data_type": "integer", "description": "Primary key"},
                    "customer_id": {"name": "customer_id", "data_type": "integer", "description": "FK to customers"}
                },
                "depends_on": {"nodes": ["source.jaffle_shop.ecom.orders"]}
            },
            "model.jaffle_shop.stg_customers": {
                "resource_type": "model",
                "name": "stg_customers",
                "fqn": ["jaffle_shop", "staging", "stg_customers"],
                "package_name": "jaffle_shop",
                "original_file_path": "models/staging/stg_customers.sql",
                "raw_code": "select * from {{ source('ecom', 'customers') }}",
                "compiled_code": "select * from raw.ecom.customers",
                "description": "Staged customers.",
                "config": {"materialized": "view"},
                "tags": [],
                "columns": {
                    "customer_id": {"name": "customer_id", "data_type": "integer", "description": "Primary key"}
                },
                "depends_on": {"nodes": ["source.jaffle_shop.ecom.customers"]}
            },
            "model.jaffle_shop.stg_payments": {
                "resource_type": "model",
                "name": "stg_payments",
                "fqn": ["jaffle_shop", "staging", "stg_payments"],
                "package_name": "jaffle_shop",
                "original_file_path": "models/staging/stg_payments.sql",
                "raw_code": "select * from {{ source('ecom', 'payments') }}",
                "compiled_code": "select * from raw.ecom.payments",
                "description": "Staged payments.",
                "config": {"materialized": "view"},
                "tags": [],
                "columns": {
                    "payment_id": {"name": "payment_id", "data_type": "integer", "description": "Primary key"},
                    "order_id": {"name": "order_id", "data_type": "integer", "description": "FK to orders"}
                },
                "depends_on": {"nodes": ["source.jaffle_shop.ecom.payments"]}
            },
            "model.jaffle_shop.fct_orders": {
                "resource_type": "model",
                "name": "fct_orders",
                "fqn": ["jaffle_shop", "marts", "fct_orders"],
                "package_name": "jaffle_shop",
                "original_file_path": "models/marts/fct_orders.sql",
                "raw_code": "select * from {{ ref('stg_orders') }} join {{ ref('stg_payments') }} using (order_id)",
                "compiled_code": "select * from stg_orders join stg_payments using (order_id)",
                "description": "Order facts joined with payments.",
                "config": {"materialized": "table", "tags": ["finance"]},
                "tags": ["finance"],
                "columns": {
                    "order_id": {"name": "order_id", "data_type": "integer", "description": "Primary key"},
                    "customer_id": {"name": "customer_id", "data_type": "integer", "description": "FK to customers"},
                    "amount": {"name": "amount", "data_type": "numeric", "description": "Total paid"}
                },
                "depends_on": {"nodes": ["model.jaffle_shop.stg_orders", "model.jaffle_shop.stg_payments"]}
            },
            "model.jaffle_shop.dim_customers": {
                "resource_type": "model",
                "name": "dim_customers",
                "fqn": ["jaffle_shop", "marts", "dim_customers"],
                "package_name": "jaffle_shop",
                "original_file_path": "models/marts/dim_customers.sql",
                "raw_code": "select * from {{ ref('stg_customers') }} join {{ ref('fct_orders') }} using (customer_id)",
                "compiled_code": "select * from stg_customers join fct_orders using (customer_id)",
                "description": "Customer dimension with order aggregates.",
                "config": {"materialized": "table", "tags": ["finance"]},
                "tags": ["finance"],
                "columns": {
                    "customer_id": {"name": "customer_id", "data_type": "integer", "description": "Primary key"},
                    "lifetime_value": {"name": "lifetime_value", "data_type": "numeric", "description": "Sum of orders"}
                },
                "depends_on": {"nodes": ["model.jaffle_shop.stg_customers", "model.jaffle_shop.fct_orders"]}
            },
            "test.jaffle_shop.not_null_stg_orders_order_id": {
                "resource_type": "test",
                "name": "not_null_stg_orders_order_id",
                "test_metadata": {"name": "not_null", "kwargs": {"column_name": "order_id"}},
                "config": {"severity": "error"},
                "depends_on": {"nodes": ["model.jaffle_shop.stg_orders"]}
            },
            "test.jaffle_shop.unique_stg_orders_order_id": {
                "resource_type": "test",
                "name": "unique_stg_orders_order_id",
                "test_metadata": {"name": "unique", "kwargs": {"column_name": "order_id"}},
                "config": {"severity": "error"},
                "depends_on": {"nodes": ["model.jaffle_shop.stg_orders"]}
            },
            "test.jaffle_shop.relationships_fct_orders_customer_id": {
                "resource_type": "test",
                "name": "relationships_fct_orders_customer_id",
                "test_metadata": {"name": "relationships", "kwargs": {"column_name": "customer_id"}},
                "config": {"severity": "error"},
                "depends_on": {"nodes": ["model.jaffle_shop.fct_orders"]}
            }
        },
        "sources": {
            "source.jaffle_shop.ecom.orders": {
                "resource_type": "source", "name": "orders", "source_name": "ecom",
                "schema": "raw", "description": "Raw orders table.", "loader": "fivetran",
                "columns": {"order_id": {"name": "order_id", "data_type": "integer", "description": ""}}
            },
            "source.jaffle_shop.ecom.customers": {
                "resource_type": "source", "name": "customers", "source_name": "ecom",
                "schema": "raw", "description": "Raw customers table.", "loader": "fivetran", "columns": {}
            },
            "source.jaffle_shop.ecom.payments": {
                "resource_type": "source", "name": "payments", "source_name": "ecom",
                "schema": "raw", "description": "Raw payments table.", "loader": "fivetran", "columns": {}
            }
        },
        "macros": {
            "macro.jaffle_shop.cents_to_dollars": {
                "resource_type": "macro",
                "name": "cents_to_dollars",
                "macro_sql": "{% macro cents_to_dollars(col) %}({{ col }} / 100.0){% endmacro %}",
                "description": "Converts a cents column to dollars.",
                "package_name": "jaffle_shop"
            }
        },
        "exposures": {},
        "parent_map": {
            "model.jaffle_shop.stg_orders": ["source.jaffle_shop.ecom.orders"],
            "model.jaffle_shop.stg_customers": ["source.jaffle_shop.ecom.customers"],
            "model.jaffle_shop.stg_payments": ["source.jaffle_shop.ecom.payments"],
            "model.jaffle_shop.fct_orders": ["model.jaffle_shop.stg_orders", "model.jaffle_shop.stg_payments"],
            "model.jaffle_shop.dim_customers": ["model.jaffle_shop.stg_customers", "model.jaffle_shop.fct_orders"],
            "test.jaffle_shop.not_null_stg_orders_order_id": ["model.jaffle_shop.stg_orders"],
            "test.jaffle_shop.unique_stg_orders_order_id": ["model.jaffle_shop.stg_orders"],
            "test.jaffle_shop.relationships_fct_orders_customer_id": ["model.jaffle_shop.fct_orders"]
        },
        "child_map": {}
    })
}

fn write_manifest(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("manifest.json");
    let mut f = std::fs::File::create(&path).expect("create manifest");
    f.write_all(reference_manifest().to_string().as_bytes()).expect("write manifest");
    path
}

#[test]
fn ingest_then_build_capsule_end_to_end() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let manifest_path = write_manifest(dir.path());

    let mut store = Store::open_in_memory().expect("open store");
    Ingestor::index_manifest(&mut store, &manifest_path).expect("index manifest");

    let config = CapsuleConfig::default();
    let capsule = CapsuleBuilder::build(
        &store,
        &config,
        "add a discount column",
        Some("fct_orders"),
        &[],
        &[],
        Some(4000),
    )
    .expect("build capsule");

    assert_eq!(capsule.confidence, "high");
    assert!(capsule.pivot_models.iter().any(|m| m.name == "fct_orders"));
    assert!(capsule.token_estimate as f64 <= 1.2 * 4000.0);

    let pivot_ids: HashSet<&str> = capsule.pivot_models.iter().map(|m| m.unique_id.as_str()).collect();
    let upstream_ids: HashSet<&str> = capsule.upstream_models.iter().map(|m| m.unique_id.as_str()).collect();
    let downstream_ids: HashSet<&str> = capsule.downstream_models.iter().map(|m| m.unique_id.as_str()).collect();
    assert!(pivot_ids.is_disjoint(&upstream_ids));
    assert!(pivot_ids.is_disjoint(&downstream_ids));
}

#[test]
fn reingestion_is_idempotent_in_row_counts() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let manifest_path = write_manifest(dir.path());

    let mut store = Store::open_in_memory().expect("open store");
    Ingestor::index_manifest(&mut store, &manifest_path).expect("first index");
    let stats_first = Patterns::get_stats(&store).expect("stats");

    Ingestor::index_manifest(&mut store, &manifest_path).expect("second index");
    let stats_second = Patterns::get_stats(&store).expect("stats");

    assert_eq!(stats_first.models_by_layer, stats_second.models_by_layer);
    assert_eq!(stats_first.test_count, stats_second.test_count);
    assert_eq!(stats_first.source_count, stats_second.source_count);

    let model_count: i64 = store
        .conn()
        .query_row("SELECT COUNT(*) FROM models", [], |r| r.get(0))
        .expect("count");
    let fts_count: i64 = store
        .conn()
        .query_row("SELECT COUNT(*) FROM search_index", [], |r| r.get(0))
        .expect("count");
    assert_eq!(model_count, fts_count);
}

#[test]
fn graph_upstream_and_impact_analysis_match_spec_scenarios() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let manifest_path = write_manifest(dir.path());

    let mut store = Store::open_in_memory().expect("open store");
    Ingestor::index_manifest(&mut store, &manifest_path).expect("index");

    let ancestors = Graph::upstream(&store, "model.jaffle_shop.dim_customers", 2).expect("bfs");
    let ids: HashSet<&str> = ancestors.iter().map(|(id, _)| id.as_str()).collect();
    for expected in [
        "model.jaffle_shop.stg_customers",
        "model.jaffle_shop.fct_orders",
        "model.jaffle_shop.stg_orders",
        "model.jaffle_shop.stg_payments",
    ] {
        assert!(ids.contains(expected), "missing {expected}");
    }

    let impact = Graph::impact_analysis(&store, "model.jaffle_shop.stg_orders", 5).expect("impact");
    assert!(impact.affected_models.contains(&"model.jaffle_shop.fct_orders".to_string()));
    assert!(impact.affected_models.contains(&"model.jaffle_shop.dim_customers".to_string()));
    assert!(matches!(impact.risk_level, dbt_context_engine::graph::RiskLevel::Medium | dbt_context_engine::graph::RiskLevel::High));
}

#[test]
fn search_and_lookup_helpers_match_spec_scenarios() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let manifest_path = write_manifest(dir.path());

    let mut store = Store::open_in_memory().expect("open store");
    Ingestor::index_manifest(&mut store, &manifest_path).expect("index");

    let results = Search::search(
        &store,
        "customer",
        dbt_context_engine::Intent::Explore,
        5,
        &HashSet::new(),
    )
    .expect("search");
    assert!(!results.is_empty());
    // FTS tokenizes `customer_id` into `customer`+`id`, so a model whose
    // only match is a column name (e.g. stg_orders) legitimately shows up
    // too; only the name-match carries the substring guarantee.
    assert!(results.iter().any(|r| r.name.to_lowercase().contains("customer")));
    assert_eq!(results[0].name, "dim_customers");

    let by_column = Search::find_by_column(&store, "order_id").expect("find_by_column");
    assert!(by_column.contains(&"model.jaffle_shop.stg_orders".to_string()));
    assert!(by_column.contains(&"model.jaffle_shop.fct_orders".to_string()));

    let by_path = Search::find_by_path(&store, "%staging%").expect("find_by_path");
    assert_eq!(by_path.len(), 3);
}

#[test]
fn discover_returns_flat_relationship_list_without_skeletonization() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let manifest_path = write_manifest(dir.path());

    let mut store = Store::open_in_memory().expect("open store");
    Ingestor::index_manifest(&mut store, &manifest_path).expect("index");

    let config = CapsuleConfig::default();
    let entries = CapsuleBuilder::discover(&store, &config, "add a discount column", Some("fct_orders"), &[], 20)
        .expect("discover");

    assert!(!entries.is_empty());
    let pivot = entries
        .iter()
        .find(|e| e.name == "fct_orders")
        .expect("fct_orders is the resolved pivot");
    assert_eq!(pivot.relationship.as_str(), "pivot");
    assert_eq!(pivot.distance, 0);

    let upstream_names: HashSet<&str> = entries
        .iter()
        .filter(|e| e.relationship.as_str() == "upstream")
        .map(|e| e.name.as_str())
        .collect();
    assert!(upstream_names.contains("stg_orders") || upstream_names.contains("stg_payments"));
}

#[test]
fn primary_and_foreign_key_flags_follow_test_coverage() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let manifest_path = write_manifest(dir.path());

    let mut store = Store::open_in_memory().expect("open store");
    Ingestor::index_manifest(&mut store, &manifest_path).expect("index");

    let columns = Search::get_columns(&store, "model.jaffle_shop.stg_orders").expect("columns");
    let order_id = columns.iter().find(|c| c.name == "order_id").expect("order_id column");
    assert!(order_id.is_primary_key, "order_id has both not_null and unique tests");

    let fct_columns = Search::get_columns(&store, "model.jaffle_shop.fct_orders").expect("columns");
    let customer_id = fct_columns.iter().find(|c| c.name == "customer_id").expect("customer_id column");
    assert!(customer_id.is_foreign_key, "customer_id has a relationships test");
}
