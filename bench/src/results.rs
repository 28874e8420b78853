//! Result persistence: one JSON artifact per workload.
//!
//! Layout of every artifact:
//!
//! ```json
//! {
//!   "cockroachdb": { "insert_1000_users": 1.93, "single_query": 0.41 },
//!   "mongodb":     { "insert_1000_users": 0.05, "single_query": 0.22 },
//!   "seed": 42
//! }
//! ```
//!
//! Values are either numbers or, for the concurrency workload, one level of
//! nested `metric → number` objects. Metric names are read back by the report
//! step, so renaming one is a breaking change.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const MONGO: &str = "mongodb";
pub const COCKROACH: &str = "cockroachdb";
pub const COCKROACH_BATCHED: &str = "cockroachdb_batched";
pub const SQLITE: &str = "sqlite";

/// Metrics of one backend for one workload.
pub type Metrics = BTreeMap<String, Value>;

/// Workload categories, each with its fixed artifact file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    Insert,
    InsertBatched,
    Crud,
    Query,
    Concurrency,
}

impl Workload {
    pub fn file_name(&self) -> &'static str {
        match self {
            Workload::Insert => "performance_results.json",
            Workload::InsertBatched => "performance_results_batched.json",
            Workload::Crud => "crud_results.json",
            Workload::Query => "query_results.json",
            Workload::Concurrency => "concurrency_results.json",
        }
    }

    pub fn path(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

/// Complete snapshot of one workload run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    #[serde(flatten)]
    pub backends: BTreeMap<String, Metrics>,
    pub seed: i64,
}

impl ResultSet {
    pub fn new(seed: i64) -> Self {
        Self {
            backends: BTreeMap::new(),
            seed,
        }
    }

    /// Replace everything recorded for `backend`.
    pub fn insert_backend(&mut self, backend: &str, metrics: Metrics) {
        self.backends.insert(backend.to_string(), metrics);
    }

    pub fn backend(&self, backend: &str) -> Option<&Metrics> {
        self.backends.get(backend)
    }

    /// A top-level numeric metric.
    pub fn metric(&self, backend: &str, key: &str) -> Result<f64> {
        self.value(backend, key)?
            .as_f64()
            .ok_or_else(|| anyhow!("{backend}.{key} is not a number"))
    }

    /// A numeric metric nested one level below `group`.
    pub fn group_metric(&self, backend: &str, group: &str, key: &str) -> Result<f64> {
        self.value(backend, group)?
            .get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow!("{backend}.{group}.{key} missing or not a number"))
    }

    fn value(&self, backend: &str, key: &str) -> Result<&Value> {
        self.backends
            .get(backend)
            .and_then(|m| m.get(key))
            .ok_or_else(|| anyhow!("metric {backend}.{key} not found"))
    }

    /// Write the artifact for `workload` under `dir`, replacing any previous
    /// file.
    pub fn persist(&self, dir: &Path, workload: Workload) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("create results directory {}", dir.display()))?;
        let path = workload.path(dir);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn load(dir: &Path, workload: Workload) -> Result<Self> {
        let path = workload.path(dir);
        let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
    }
}

/// Builder for one backend's [`Metrics`].
#[derive(Debug, Default)]
pub struct MetricsBuilder {
    metrics: Metrics,
}

impl MetricsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn number(&mut self, key: impl Into<String>, value: f64) -> &mut Self {
        self.metrics.insert(key.into(), Value::from(value));
        self
    }

    pub fn object<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<&mut Self> {
        self.metrics.insert(key.into(), serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn build(&mut self) -> Metrics {
        std::mem::take(&mut self.metrics)
    }
}
