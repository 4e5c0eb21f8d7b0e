pub mod artifact;
pub mod changes;
pub mod config;
pub mod deps;
pub mod engine;
pub mod error;
pub mod extract;
pub mod tools;
pub mod updater;

pub use artifact::{ArtifactDocument, ArtifactOccurrence, ArtifactSymbol, IndexArtifact};
pub use changes::ChangeDetector;
pub use config::{EngineConfig, TransitiveConfig};
pub use deps::{update_file_deps, DependencyTracker, DrainResult};
pub use engine::IndexEngine;
pub use error::EngineError;
pub use extract::DeltaExtractor;
pub use tools::{default_tools, IndexerTool};
pub use updater::{
    apply_delta, apply_delta_with_invalidation, delete_file_data, insert_file_data,
    populate_from_full_index, set_full_index_complete, update_index_state,
};
