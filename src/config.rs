//! Engine and capsule configuration, loaded from an optional TOML file
//! via an upward directory search, mirroring how the project's own
//! manifest root is located.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntentDepth {
    pub upstream: u32,
    pub downstream: u32,
}

fn default_intent_depths() -> HashMap<String, IntentDepth> {
    let mut m = HashMap::new();
    m.insert("debug".to_string(), IntentDepth { upstream: 2, downstream: 1 });
    m.insert("add_feature".to_string(), IntentDepth { upstream: 1, downstream: 2 });
    m.insert("refactor".to_string(), IntentDepth { upstream: 1, downstream: 3 });
    m.insert("test".to_string(), IntentDepth { upstream: 0, downstream: 0 });
    m.insert("document".to_string(), IntentDepth { upstream: 1, downstream: 1 });
    m.insert("explore".to_string(), IntentDepth { upstream: 1, downstream: 1 });
    m
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapsuleConfig {
    #[serde(default = "default_token_budget")]
    pub default_token_budget: usize,
    #[serde(default = "default_max_pivots")]
    pub max_pivots: usize,
    #[serde(default = "default_intent_depths")]
    pub intent_depths: HashMap<String, IntentDepth>,
}

fn default_token_budget() -> usize {
    10_000
}

fn default_max_pivots() -> usize {
    3
}

impl Default for CapsuleConfig {
    fn default() -> Self {
        CapsuleConfig {
            default_token_budget: default_token_budget(),
            max_pivots: default_max_pivots(),
            intent_depths: default_intent_depths(),
        }
    }
}

impl CapsuleConfig {
    pub fn depth_for(&self, intent: &str) -> IntentDepth {
        self.intent_depths
            .get(intent)
            .cloned()
            .unwrap_or(IntentDepth { upstream: 1, downstream: 1 })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub dbt_project_root: PathBuf,
    #[serde(default = "default_target_dir")]
    pub target_dir: PathBuf,
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
    #[serde(default)]
    pub capsule: CapsuleConfig,
}

fn default_target_dir() -> PathBuf {
    PathBuf::from("target")
}

fn default_index_path() -> PathBuf {
    PathBuf::from(".ariadne/index.db")
}

impl EngineConfig {
    pub fn manifest_path(&self) -> PathBuf {
        self.dbt_project_root.join(&self.target_dir).join("manifest.json")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.dbt_project_root.join(&self.target_dir).join("catalog.json")
    }

    pub fn run_results_path(&self) -> PathBuf {
        self.dbt_project_root.join(&self.target_dir).join("run_results.json")
    }

    pub fn absolute_index_path(&self) -> PathBuf {
        if self.index_path.is_absolute() {
            self.index_path.clone()
        } else {
            self.dbt_project_root.join(&self.index_path)
        }
    }
}

/// Walk upward from `start` looking for `dbt_project.yml`.
pub fn find_dbt_project_root(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start.to_path_buf());
    while let Some(d) = dir {
        if d.join("dbt_project.yml").is_file() {
            return Some(d);
        }
        dir = d.parent().map(|p| p.to_path_buf());
    }
    None
}

/// Walk upward from `start` looking for `ariadne.toml`, parse it if
/// found, and fill in `dbt_project_root` by searching for
/// `dbt_project.yml` if the config file didn't specify one.
pub fn load_config(start: &Path) -> Result<EngineConfig> {
    let mut dir = Some(start.to_path_buf());
    while let Some(d) = dir {
        let candidate = d.join("ariadne.toml");
        if candidate.is_file() {
            let text = std::fs::read_to_string(&candidate)?;
            let mut cfg: EngineConfig = toml::from_str(&text)
                .map_err(|e| EngineError::Config(format!("{}: {e}", candidate.display())))?;
            if cfg.dbt_project_root.as_os_str().is_empty() {
                cfg.dbt_project_root = find_dbt_project_root(&d).unwrap_or(d);
            }
            return Ok(cfg);
        }
        dir = d.parent().map(|p| p.to_path_buf());
    }

    let root = find_dbt_project_root(start)
        .ok_or_else(|| EngineError::Config("no dbt_project.yml found in any ancestor".to_string()))?;
    Ok(EngineConfig {
        dbt_project_root: root,
        target_dir: default_target_dir(),
        index_path: default_index_path(),
        capsule: CapsuleConfig::default(),
    })
}
