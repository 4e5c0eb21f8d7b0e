use cs_store::StoreError;

/// Engine errors.
///
/// The orchestrator is the only layer that maps these to user-facing
/// advisories; lower layers return them with context attached.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("incremental indexing is not supported for language '{language}'")]
    IncrementalNotSupported { language: String },

    #[error("indexer '{command}' is not installed; install it with: {install_hint}")]
    IndexerNotInstalled {
        command: String,
        install_hint: String,
    },

    #[error("no tracked commit to diff against; run a full index first")]
    NoTrackedCommit,

    #[error(
        "{changed} of {total} files changed ({percent}%), above the \
         incremental threshold of {threshold}%; run a full reindex"
    )]
    ThresholdExceeded {
        changed: usize,
        total: usize,
        percent: u32,
        threshold: u32,
    },

    #[error("stored schema version {stored} differs from engine version {engine}; full reindex required")]
    SchemaMismatch { stored: u32, engine: u32 },

    #[error("rename delta for '{path}' is missing its old path")]
    RenameMissingOldPath { path: String },

    #[error("indexer exited with status {status}: {stderr}")]
    IndexerFailed { status: i32, stderr: String },

    #[error("vcs command failed: {reason}")]
    Vcs { reason: String },

    #[error("index artifact unreadable: {0}")]
    Artifact(#[from] protobuf::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}
