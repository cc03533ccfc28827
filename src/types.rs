//! Typed records shared across the store, search, graph, patterns and
//! capsule modules. These mirror the dbt artifact shapes described in
//! the project's data model one-to-one, plus the capsule output types.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub description: String,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    /// Test kinds (`not_null`, `unique`, ...) asserted on this column,
    /// aggregated by `Search::get_columns` from the `tests` table.
    pub tests: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Model {
    pub unique_id: String,
    pub name: String,
    pub layer: String,
    pub materialization: String,
    pub file_path: String,
    pub raw_code: String,
    pub compiled_code: String,
    pub description: String,
    pub tags: Vec<String>,
    pub depends_on: Vec<String>,
    pub columns: Vec<Column>,
    pub upstream_count: i64,
    pub downstream_count: i64,
    pub centrality: f64,
    pub package_name: String,
    pub row_count: Option<i64>,
    pub bytes: Option<i64>,
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub unique_id: String,
    pub name: String,
    pub source_name: String,
    pub schema: String,
    pub description: String,
    pub loader: String,
    pub freshness_warn_after: Option<String>,
    pub freshness_error_after: Option<String>,
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Test {
    pub unique_id: String,
    pub kind: String,
    pub model_id: Option<String>,
    pub column_name: String,
    pub severity: String,
    pub last_status: Option<String>,
    pub last_execution_time: Option<f64>,
    pub last_failures: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Macro {
    pub unique_id: String,
    pub name: String,
    pub source_code: String,
    pub description: String,
    pub package_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Exposure {
    pub unique_id: String,
    pub name: String,
    pub exposure_type: String,
    pub url: Option<String>,
    pub owner: String,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub parent_id: String,
    pub child_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub unique_id: String,
    pub name: String,
    pub layer: String,
    pub description: String,
    pub centrality: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Intent {
    Debug,
    AddFeature,
    Refactor,
    Test,
    Document,
    Explore,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Debug => "debug",
            Intent::AddFeature => "add_feature",
            Intent::Refactor => "refactor",
            Intent::Test => "test",
            Intent::Document => "document",
            Intent::Explore => "explore",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

/// Full detail tier: rendered for pivot models.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FullModelContext {
    pub unique_id: String,
    pub name: String,
    pub layer: String,
    pub materialization: String,
    pub file_path: String,
    pub compiled_code: String,
    pub description: String,
    pub columns: Vec<Column>,
    pub tags: Vec<String>,
    pub depends_on_names: Vec<String>,
}

/// Skeleton detail tier: schema only, rendered for upstream neighbors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkeletonColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkeletonModelContext {
    pub unique_id: String,
    pub name: String,
    pub layer: String,
    pub materialization: String,
    pub columns: Vec<SkeletonColumn>,
    pub distance: i64,
}

/// Minimal detail tier: rendered for downstream neighbors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MinimalModelContext {
    pub unique_id: String,
    pub name: String,
    pub layer: String,
    pub column_count: usize,
    pub key_columns: Vec<String>,
    pub distance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NamingPatterns {
    pub staging_template: String,
    pub intermediate_template: String,
    pub marts_template: String,
    pub directory_summary: String,
    pub yaml_requirements: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProjectPatterns {
    pub naming: NamingPatterns,
    pub materialization_by_layer: std::collections::BTreeMap<String, String>,
    pub coverage_by_layer: std::collections::BTreeMap<String, f64>,
    pub common_tags: Vec<(String, i64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProjectStats {
    pub models_by_layer: std::collections::BTreeMap<String, i64>,
    pub source_count: i64,
    pub test_count: i64,
    pub test_coverage_pct: f64,
    pub macro_count: i64,
    pub project_macro_count: i64,
    pub exposure_count: i64,
    pub project_name: Option<String>,
    pub adapter_type: Option<String>,
    pub dbt_version: Option<String>,
    pub generated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCoverage {
    pub model_id: String,
    pub coverage_pct: f64,
    pub tested_columns: i64,
    pub total_columns: i64,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextCapsule {
    pub task: String,
    pub intent: String,
    pub pivot_models: Vec<FullModelContext>,
    pub upstream_models: Vec<SkeletonModelContext>,
    pub downstream_models: Vec<MinimalModelContext>,
    pub relevant_tests: Vec<serde_json::Value>,
    pub relevant_macros: Vec<serde_json::Value>,
    pub relevant_sources: Vec<serde_json::Value>,
    pub project_patterns: serde_json::Value,
    pub similar_models: Vec<String>,
    pub session_context: serde_json::Value,
    pub token_estimate: usize,
    pub token_budget: usize,
    pub confidence: String,
    pub suggested_refinements: Vec<String>,
}

/// `max(1, len(text) / 4)` — a deliberately coarse token estimate.
pub fn estimate_tokens(text: &str) -> usize {
    std::cmp::max(1, text.len() / 4)
}

/// Same estimate applied to a value's JSON-serialized form.
pub fn estimate_tokens_value(value: &serde_json::Value) -> usize {
    match serde_json::to_string(value) {
        Ok(s) => estimate_tokens(&s),
        Err(_) => 1,
    }
}
