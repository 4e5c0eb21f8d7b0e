use cs_core::InvalidationMode;
use serde::Deserialize;

/// Engine configuration. Every field has a default so partial config
/// files deserialize cleanly.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path of the regenerated index artifact, relative to the repo root.
    pub index_path: String,
    /// Exclusion patterns: glob, directory prefix, or exact path.
    pub excludes: Vec<String>,
    /// Maximum percentage of files that may change before incremental
    /// is refused in favor of a full reindex. 0 disables the check.
    pub incremental_threshold: u32,
    /// Whether test-suffixed files participate in indexing.
    pub index_tests: bool,
    pub transitive: TransitiveConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_path: ".scip/index.scip".to_string(),
            excludes: Vec::new(),
            incremental_threshold: 50,
            index_tests: false,
            transitive: TransitiveConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config fragment; missing keys take their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Transitive-invalidation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransitiveConfig {
    pub enabled: bool,
    pub mode: InvalidationMode,
    /// BFS depth for the eager cascade.
    pub depth: u32,
    /// Per-drain file budget; 0 = unlimited.
    pub max_rescan_files: usize,
    /// Per-drain wall-clock budget in milliseconds; 0 = unlimited.
    pub max_rescan_ms: u64,
}

impl Default for TransitiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: InvalidationMode::Lazy,
            depth: 1,
            max_rescan_files: 200,
            max_rescan_ms: 1500,
        }
    }
}
