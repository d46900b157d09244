//! Engine configuration
//!
//! Loaded from one JSON file. Every section has defaults, so `{}` is a
//! valid (small) deployment. `validate` runs every check that would
//! otherwise surface mid-deployment: curve width, grid shape, and whether
//! the record schema fits a node at all.

mod errors;

pub use errors::{ConfigError, ConfigResult};

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::curve::CurveCodec;
use crate::mesh::{GridShape, NodeContext, SchedulerPolicy, MAX_GRID_EDGE};
use crate::partition::{CapacityPlan, FieldType, RecordSchema, DEFAULT_NODE_CAPACITY};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveConfig {
    #[serde(default = "default_dims")]
    pub dims: u32,
    #[serde(default = "default_bits_per_dim")]
    pub bits_per_dim: u32,
}

fn default_dims() -> u32 {
    2
}

fn default_bits_per_dim() -> u32 {
    16
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self {
            dims: default_dims(),
            bits_per_dim: default_bits_per_dim(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshConfig {
    #[serde(default = "default_edge")]
    pub width: u16,
    #[serde(default = "default_edge")]
    pub height: u16,
    /// Bytes of local memory per node
    #[serde(default = "default_node_capacity")]
    pub node_capacity_bytes: usize,
    #[serde(default)]
    pub scheduler: SchedulerPolicy,
    /// Partitions the key space starts divided into
    #[serde(default = "default_initial_partitions")]
    pub initial_partitions: usize,
}

fn default_edge() -> u16 {
    4
}

fn default_node_capacity() -> usize {
    DEFAULT_NODE_CAPACITY
}

fn default_initial_partitions() -> usize {
    1
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            width: default_edge(),
            height: default_edge(),
            node_capacity_bytes: default_node_capacity(),
            scheduler: SchedulerPolicy::default(),
            initial_partitions: default_initial_partitions(),
        }
    }
}

impl MeshConfig {
    pub fn shape(&self) -> GridShape {
        GridShape::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Wall-clock budget per query
    #[serde(default = "default_budget_ms")]
    pub budget_ms: u64,
    /// Mesh steps per query before it is treated as timed out
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,
    /// Covering spans per region before coarsening
    #[serde(default = "default_max_ranges")]
    pub max_ranges: usize,
    /// Ids a scan or range result may carry
    #[serde(default = "default_result_capacity")]
    pub result_capacity: u32,
    #[serde(default = "default_max_k")]
    pub max_k: u32,
    #[serde(default = "default_max_depth")]
    pub max_traverse_depth: u32,
}

fn default_budget_ms() -> u64 {
    1_000
}

fn default_max_steps() -> u64 {
    100_000
}

fn default_max_ranges() -> usize {
    64
}

fn default_result_capacity() -> u32 {
    256
}

fn default_max_k() -> u32 {
    64
}

fn default_max_depth() -> u32 {
    8
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            budget_ms: default_budget_ms(),
            max_steps: default_max_steps(),
            max_ranges: default_max_ranges(),
            result_capacity: default_result_capacity(),
            max_k: default_max_k(),
            max_traverse_depth: default_max_depth(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory of the record log; in-memory storage when absent
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_schema() -> RecordSchema {
    RecordSchema::new(vec![FieldType::U32], 0, 0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub curve: CurveConfig,
    #[serde(default = "default_schema")]
    pub schema: RecordSchema,
    #[serde(default)]
    pub mesh: MeshConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            curve: CurveConfig::default(),
            schema: default_schema(),
            mesh: MeshConfig::default(),
            query: QueryConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reads and validates a config file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> ConfigResult<Self> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.codec()?;
        let shape = self.mesh.shape();
        if shape.is_empty() {
            return Err(ConfigError::invalid("mesh", "grid needs at least one node"));
        }
        if shape.width > MAX_GRID_EDGE || shape.height > MAX_GRID_EDGE {
            return Err(ConfigError::invalid(
                "mesh",
                format!("grid edges are limited to {}", MAX_GRID_EDGE),
            ));
        }
        let nodes = shape.len();
        if self.mesh.initial_partitions == 0 || self.mesh.initial_partitions > nodes {
            return Err(ConfigError::invalid(
                "mesh.initial_partitions",
                format!("must be between 1 and {} (one per node)", nodes),
            ));
        }
        self.capacity_plan()?;

        let q = &self.query;
        let zero = [
            ("query.budget_ms", q.budget_ms == 0),
            ("query.max_steps", q.max_steps == 0),
            ("query.max_ranges", q.max_ranges == 0),
            ("query.result_capacity", q.result_capacity == 0),
            ("query.max_k", q.max_k == 0),
        ];
        if let Some((field, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::invalid(*field, "must be greater than zero"));
        }
        Ok(())
    }

    pub fn codec(&self) -> ConfigResult<CurveCodec> {
        Ok(CurveCodec::new(self.curve.dims, self.curve.bits_per_dim)?)
    }

    pub fn capacity_plan(&self) -> ConfigResult<CapacityPlan> {
        Ok(CapacityPlan::for_schema(&self.schema, self.mesh.node_capacity_bytes)?)
    }

    /// Parameters every node is deployed with
    pub fn node_context(&self) -> ConfigResult<NodeContext> {
        Ok(NodeContext {
            codec: self.codec()?,
            schema: self.schema.clone(),
            plan: self.capacity_plan()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.mesh.node_capacity_bytes, 48 * 1024);
        assert_eq!(config.mesh.scheduler, SchedulerPolicy::Fifo);
    }

    #[test]
    fn test_parses_sections() {
        let config = EngineConfig::from_json(
            r#"{
                "curve": {"dims": 3, "bits_per_dim": 5},
                "schema": {"fields": ["u32", "category"], "embedding_dim": 8, "categorical_field": 1},
                "mesh": {"width": 2, "height": 3, "scheduler": {"policy": "seeded", "seed": 11}},
                "query": {"budget_ms": 50},
                "storage": {"data_dir": "/tmp/tess"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.curve.dims, 3);
        assert_eq!(config.schema.categorical_field, Some(1));
        assert_eq!(config.mesh.shape().len(), 6);
        assert_eq!(config.mesh.scheduler, SchedulerPolicy::Seeded { seed: 11 });
        assert_eq!(config.query.budget_ms, 50);
        assert_eq!(config.query.max_k, 64);
        assert_eq!(config.storage.data_dir, Some(PathBuf::from("/tmp/tess")));
    }

    #[test]
    fn test_rejects_wide_keys() {
        let err = EngineConfig::from_json(r#"{"curve": {"dims": 5, "bits_per_dim": 32}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Curve(_)));
    }

    #[test]
    fn test_rejects_schema_that_cannot_fit() {
        let err = EngineConfig::from_json(
            r#"{"schema": {"fields": ["u32"], "embedding_dim": 4096}, "mesh": {"node_capacity_bytes": 8192}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Capacity(_)));
    }

    #[test]
    fn test_rejects_zero_values() {
        assert!(EngineConfig::from_json(r#"{"mesh": {"width": 0}}"#).is_err());
        let err = EngineConfig::from_json(r#"{"query": {"max_k": 0}}"#).unwrap_err();
        assert!(err.to_string().contains("query.max_k"));
        assert!(EngineConfig::from_json(r#"{"mesh": {"width": 1, "height": 1, "initial_partitions": 2}}"#).is_err());
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = EngineConfig::load(Path::new("/nonexistent/tess.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
