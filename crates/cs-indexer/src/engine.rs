use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use cs_core::{CancelToken, ChangedFile, DeltaStats, InvalidationMode, SymbolDelta};
use cs_store::{meta_keys, StateStore, SCHEMA_VERSION};

use crate::artifact::IndexArtifact;
use crate::changes::ChangeDetector;
use crate::config::EngineConfig;
use crate::deps::{DependencyTracker, DrainResult};
use crate::error::EngineError;
use crate::extract::DeltaExtractor;
use crate::tools::{default_tools, IndexerTool};
use crate::updater;

/// Top-level orchestrator: wires change detection, the external
/// indexer subprocess, delta extraction, and the transactional apply.
/// The only component that talks to external collaborators.
pub struct IndexEngine {
    repo_root: PathBuf,
    config: EngineConfig,
    tools: HashMap<String, IndexerTool>,
}

impl IndexEngine {
    pub fn new(repo_root: impl Into<PathBuf>, config: EngineConfig) -> Self {
        Self {
            repo_root: repo_root.into(),
            config,
            tools: default_tools(),
        }
    }

    /// Register or replace the indexer for a language.
    pub fn with_tool(mut self, language: &str, tool: IndexerTool) -> Self {
        self.tools.insert(language.to_string(), tool);
        self
    }

    /// Run one incremental update: detect changed files since `since`
    /// (or the stored index commit), regenerate the artifact, extract
    /// deltas, and apply them with transitive invalidation.
    #[tracing::instrument(skip(self, store, cancel))]
    pub fn index_incremental(
        &self,
        store: &mut StateStore,
        since: Option<&str>,
        language: &str,
        cancel: &CancelToken,
    ) -> Result<DeltaStats, EngineError> {
        let tool = self.tool_for(language)?;
        if !tool.supports_incremental {
            return Err(EngineError::IncrementalNotSupported {
                language: language.to_string(),
            });
        }
        self.require_installed(tool)?;

        if let Some(stored) = store.stored_schema_version()? {
            if stored != SCHEMA_VERSION {
                return Err(EngineError::SchemaMismatch {
                    stored,
                    engine: SCHEMA_VERSION,
                });
            }
        }

        let detector = ChangeDetector::new(&self.repo_root, &self.config);
        let changes = detector.detect(store, since)?;
        if changes.is_empty() {
            tracing::info!("no changes detected");
            return Ok(DeltaStats::unchanged());
        }

        let total = store.count_files()?;
        if self.config.incremental_threshold > 0 && total > 0 {
            let percent = (changes.len() * 100 / total) as u32;
            if percent > self.config.incremental_threshold {
                return Err(EngineError::ThresholdExceeded {
                    changed: changes.len(),
                    total,
                    percent,
                    threshold: self.config.incremental_threshold,
                });
            }
        }

        let artifact_path = self.repo_root.join(&self.config.index_path);
        self.run_indexer(tool, &artifact_path)?;

        let artifact = IndexArtifact::load(&artifact_path)?;
        let extractor = DeltaExtractor::new(&artifact, &self.repo_root);
        let delta = extractor.extract_deltas(&changes, store, cancel)?;

        let tracker = DependencyTracker::new(&self.config.transitive);
        let applied = updater::apply_delta_with_invalidation(store, &delta, &tracker)?;

        let commit = self.current_commit().unwrap_or_default();
        updater::update_index_state(store, applied, &commit)?;
        store.set_meta(
            meta_keys::INVALIDATION_MODE,
            self.config.transitive.mode.as_str(),
        )?;
        store.set_meta(meta_keys::CALLGRAPH_QUALITY, "partial")?;

        if self.config.transitive.enabled && self.config.transitive.mode == InvalidationMode::Eager
        {
            let drained = self.drain_with_extractor(store, &extractor, &tracker, cancel)?;
            tracing::info!(
                rescanned = drained.files_processed,
                drained = drained.queue_drained,
                "eager rescan finished"
            );
        }

        tracing::info!(files = applied, "incremental index completed");
        Ok(delta.stats)
    }

    /// Run a full (non-incremental) reindex: regenerate the artifact
    /// and rebuild the store from scratch.
    #[tracing::instrument(skip(self, store, cancel))]
    pub fn index_full(
        &self,
        store: &mut StateStore,
        language: &str,
        cancel: &CancelToken,
    ) -> Result<DeltaStats, EngineError> {
        let tool = self.tool_for(language)?;
        self.require_installed(tool)?;

        let artifact_path = self.repo_root.join(&self.config.index_path);
        self.run_indexer(tool, &artifact_path)?;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let artifact = IndexArtifact::load(&artifact_path)?;
        let extractor = DeltaExtractor::new(&artifact, &self.repo_root);
        let files = updater::populate_from_full_index(store, &extractor)?;

        let commit = self.current_commit().unwrap_or_default();
        updater::set_full_index_complete(store, &commit)?;
        store.set_meta(meta_keys::CALLGRAPH_QUALITY, "full")?;

        tracing::info!(files, "full index completed");
        Ok(DeltaStats {
            files_added: files,
            ..Default::default()
        })
    }

    /// Drain pending rescans against the artifact on disk. The caller
    /// drives the schedule in deferred mode.
    pub fn drain_pending(
        &self,
        store: &mut StateStore,
        cancel: &CancelToken,
    ) -> Result<DrainResult, EngineError> {
        let artifact_path = self.repo_root.join(&self.config.index_path);
        let artifact = IndexArtifact::load(&artifact_path)?;
        let extractor = DeltaExtractor::new(&artifact, &self.repo_root);
        let tracker = DependencyTracker::new(&self.config.transitive);
        self.drain_with_extractor(store, &extractor, &tracker, cancel)
    }

    fn drain_with_extractor(
        &self,
        store: &mut StateStore,
        extractor: &DeltaExtractor<'_>,
        tracker: &DependencyTracker<'_>,
        cancel: &CancelToken,
    ) -> Result<DrainResult, EngineError> {
        tracker.drain_rescan_queue(store, cancel, |store, path| {
            let fd = extractor.extract_file_delta(&ChangedFile::modified(path))?;
            let delta = SymbolDelta {
                file_deltas: vec![fd],
                stats: DeltaStats::default(),
            };
            updater::apply_delta(store, &delta)?;
            Ok(())
        })
    }

    fn tool_for(&self, language: &str) -> Result<&IndexerTool, EngineError> {
        self.tools
            .get(language)
            .ok_or_else(|| EngineError::IncrementalNotSupported {
                language: language.to_string(),
            })
    }

    /// Require the tool's binary on PATH.
    fn require_installed(&self, tool: &IndexerTool) -> Result<(), EngineError> {
        which::which(&tool.command).map_err(|_| EngineError::IndexerNotInstalled {
            command: tool.command.clone(),
            install_hint: tool.install_hint.clone(),
        })?;
        Ok(())
    }

    /// Spawn the external indexer and wait for it. The write
    /// transaction is never open across this call.
    fn run_indexer(&self, tool: &IndexerTool, artifact_path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = artifact_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let args = tool.render_args(artifact_path);
        tracing::info!(command = %tool.command, "running indexer");
        let output = Command::new(&tool.command)
            .args(&args)
            .current_dir(&self.repo_root)
            .output()?;
        if !output.status.success() {
            return Err(EngineError::IndexerFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn current_commit(&self) -> Option<String> {
        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(&self.repo_root)
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
