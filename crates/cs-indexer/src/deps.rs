use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant};

use rusqlite::Connection;

use cs_core::{CancelToken, InvalidationMode, ReferenceRecord, RescanReason};
use cs_store::{StateStore, StoreError};

use crate::config::TransitiveConfig;
use crate::error::EngineError;

/// Outcome of one rescan-queue drain run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainResult {
    pub files_processed: usize,
    pub queue_drained: bool,
    pub budget_exceeded: bool,
    pub duration: Duration,
}

/// Rebuild a file's dependency edges from its extracted references,
/// inside the caller's transaction.
///
/// Self-references and symbols missing from the map (external or
/// unknown) are skipped; the surviving defining files are inserted as
/// a distinct set.
pub fn update_file_deps(
    conn: &Connection,
    path: &str,
    references: &[ReferenceRecord],
    symbol_to_file: &HashMap<String, String>,
) -> Result<(), StoreError> {
    cs_store::delete_file_deps(conn, path)?;
    let mut defining: BTreeSet<&str> = BTreeSet::new();
    for reference in references {
        if let Some(file) = symbol_to_file.get(&reference.to_symbol_id) {
            if file != path {
                defining.insert(file.as_str());
            }
        }
    }
    for file in defining {
        cs_store::insert_file_dep(conn, path, file)?;
    }
    Ok(())
}

/// Drives the rescan queue: BFS invalidation of dependents and the
/// budgeted drain loop.
pub struct DependencyTracker<'a> {
    config: &'a TransitiveConfig,
}

impl<'a> DependencyTracker<'a> {
    pub fn new(config: &'a TransitiveConfig) -> Self {
        Self { config }
    }

    /// Enqueue the dependents of each changed file according to the
    /// configured invalidation mode. Returns the number of enqueued
    /// paths.
    pub fn invalidate_dependents(
        &self,
        store: &StateStore,
        changed_files: &[String],
    ) -> Result<usize, EngineError> {
        if !self.config.enabled || self.config.mode == InvalidationMode::None {
            return Ok(0);
        }

        let depth_limit = match self.config.mode {
            InvalidationMode::Eager => self.config.depth.max(1),
            // Lazy and deferred enqueue direct dependents only.
            _ => 1,
        };

        let mut visited: HashSet<String> = changed_files.iter().cloned().collect();
        let mut enqueued = 0usize;
        for origin in changed_files {
            let mut frontier = vec![origin.clone()];
            for depth in 1..=depth_limit {
                let mut next = Vec::new();
                for file in &frontier {
                    for dependent in store.dependents_of(file)? {
                        if !visited.insert(dependent.clone()) {
                            continue;
                        }
                        // Entries past the file budget are queued for a
                        // later run, tagged with why they were deferred.
                        let reason = if self.config.max_rescan_files > 0
                            && enqueued >= self.config.max_rescan_files
                        {
                            RescanReason::BudgetExceeded
                        } else {
                            RescanReason::DepChange
                        };
                        store.enqueue_rescan(&dependent, reason, depth)?;
                        enqueued += 1;
                        next.push(dependent);
                    }
                }
                frontier = next;
                if frontier.is_empty() {
                    break;
                }
            }
        }

        if enqueued > 0 {
            tracing::debug!(
                enqueued,
                mode = self.config.mode.as_str(),
                "dependents queued for rescan"
            );
        }
        Ok(enqueued)
    }

    /// Drain the rescan queue under the configured budgets.
    ///
    /// Per-file failures increment the row's attempts counter and are
    /// isolated to this run; they never fail the drain itself. The
    /// queue counts as drained when the rows left are exactly the files
    /// that failed this run.
    pub fn drain_rescan_queue<F>(
        &self,
        store: &mut StateStore,
        cancel: &CancelToken,
        mut rescan: F,
    ) -> Result<DrainResult, EngineError>
    where
        F: FnMut(&mut StateStore, &str) -> Result<(), EngineError>,
    {
        let start = Instant::now();
        let mut failed_this_run: HashSet<String> = HashSet::new();
        let mut files_processed = 0usize;
        let mut queue_drained = false;
        let mut budget_exceeded = false;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            if self.config.max_rescan_files > 0 && files_processed >= self.config.max_rescan_files {
                budget_exceeded = true;
                break;
            }
            if self.config.max_rescan_ms > 0
                && start.elapsed().as_millis() as u64 >= self.config.max_rescan_ms
            {
                budget_exceeded = true;
                break;
            }

            let entry = match store.next_rescan_entry(&failed_this_run)? {
                Some(entry) => entry,
                None => {
                    queue_drained = store.count_rescan_queue()? == failed_this_run.len();
                    break;
                }
            };

            match rescan(store, &entry.file_path) {
                Ok(()) => {
                    store.remove_rescan_entry(&entry.file_path)?;
                    files_processed += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %entry.file_path, error = %e, "rescan failed");
                    store.increment_rescan_attempts(&entry.file_path)?;
                    failed_this_run.insert(entry.file_path);
                }
            }
        }

        Ok(DrainResult {
            files_processed,
            queue_drained,
            budget_exceeded,
            duration: start.elapsed(),
        })
    }
}
