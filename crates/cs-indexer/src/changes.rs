use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::process::Command;

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;
use xxhash_rust::xxh3::xxh3_64;

use cs_core::{normalize_path, ChangedFile};
use cs_store::{meta_keys, StateStore};

use crate::config::EngineConfig;
use crate::error::EngineError;

/// Directory names never visited by the fallback walker.
const SKIP_DIRS: &[&str] = &[".git", ".scip", "vendor", "node_modules", "testdata"];

/// Produces the deduplicated, ordered set of files changed since the
/// last index. Prefers the version-control diff; falls back to content
/// hashing against the store when the working directory is not a
/// checkout or the VCS calls fail.
pub struct ChangeDetector<'a> {
    repo_root: &'a Path,
    config: &'a EngineConfig,
    exclude_globs: GlobSet,
}

/// One record parsed from a NUL-separated name-status stream.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawChange {
    status: String,
    path: String,
    old_path: Option<String>,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(repo_root: &'a Path, config: &'a EngineConfig) -> Self {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.excludes {
            // Invalid patterns still participate via prefix matching.
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
            }
        }
        let exclude_globs = builder.build().unwrap_or_else(|_| GlobSet::empty());
        Self {
            repo_root,
            config,
            exclude_globs,
        }
    }

    /// Detect changes since `since` (or the stored index commit).
    pub fn detect(
        &self,
        store: &StateStore,
        since: Option<&str>,
    ) -> Result<Vec<ChangedFile>, EngineError> {
        if self.is_git_checkout() {
            let since = match since {
                Some(s) if !s.is_empty() => s.to_string(),
                _ => store.get_meta(meta_keys::INDEX_COMMIT)?,
            };
            if since.is_empty() {
                return Err(EngineError::NoTrackedCommit);
            }
            match self.detect_from_git(&since) {
                Ok(changes) => return Ok(changes),
                Err(e) => {
                    tracing::warn!(error = %e, "vcs change detection failed, falling back to hashing");
                }
            }
        }
        self.detect_by_hashing(store)
    }

    fn detect_from_git(&self, since: &str) -> Result<Vec<ChangedFile>, EngineError> {
        let head = self.git_output(&["rev-parse", "HEAD"])?.trim().to_string();

        let mut records = Vec::new();
        if head != since {
            let committed = self.git_output(&["diff", "--name-status", "-z", since, &head])?;
            records.extend(parse_name_status_z(&committed));
        }

        // Staged, unstaged, and untracked, in that order.
        let staged = self.git_output(&["diff", "--name-status", "-z", "--cached"])?;
        records.extend(parse_name_status_z(&staged));
        let unstaged = self.git_output(&["diff", "--name-status", "-z"])?;
        records.extend(parse_name_status_z(&unstaged));
        let untracked = self.git_output(&["ls-files", "-z", "--others", "--exclude-standard"])?;
        for path in untracked.split('\0') {
            if !path.is_empty() {
                records.push(RawChange {
                    status: "A".to_string(),
                    path: path.to_string(),
                    old_path: None,
                });
            }
        }

        let changes = records
            .into_iter()
            .filter_map(|raw| self.classify(raw))
            .collect();
        Ok(dedup_by_last(changes))
    }

    /// Map one raw record to a change, applying source-file filtering
    /// and the mixed-extension rename rules.
    fn classify(&self, raw: RawChange) -> Option<ChangedFile> {
        let status = raw.status.chars().next()?;
        let path = normalize_path(&raw.path);
        match status {
            'R' => {
                let old = normalize_path(raw.old_path.as_deref()?);
                let old_ok = self.is_indexable(&old);
                let new_ok = self.is_indexable(&path);
                match (old_ok, new_ok) {
                    (true, true) => Some(ChangedFile::renamed(old, path)),
                    (true, false) => Some(ChangedFile::deleted(old)),
                    (false, true) => Some(ChangedFile::added(path)),
                    (false, false) => None,
                }
            }
            // A copy leaves the source in place; only the new path changes.
            'C' => self.is_indexable(&path).then(|| ChangedFile::added(path)),
            'A' => self.is_indexable(&path).then(|| ChangedFile::added(path)),
            'D' => self.is_indexable(&path).then(|| ChangedFile::deleted(path)),
            _ => self.is_indexable(&path).then(|| ChangedFile::modified(path)),
        }
    }

    /// Whether a path names a source file this engine tracks.
    fn is_indexable(&self, path: &str) -> bool {
        if !path.ends_with(".go") {
            return false;
        }
        if !self.config.index_tests && path.ends_with("_test.go") {
            return false;
        }
        !self.is_excluded(path)
    }

    /// A pattern excludes a path when it matches as a glob, as a
    /// directory prefix, or exactly.
    fn is_excluded(&self, path: &str) -> bool {
        if self.exclude_globs.is_match(path) {
            return true;
        }
        self.config.excludes.iter().any(|pattern| {
            let pattern = pattern.trim_end_matches('/');
            path == pattern || path.starts_with(&format!("{pattern}/"))
        })
    }

    /// Walk the tree, hash every source file, and diff against the
    /// store. Inaccessible files are skipped; the walk continues.
    fn detect_by_hashing(&self, store: &StateStore) -> Result<Vec<ChangedFile>, EngineError> {
        let mut disk_files = Vec::new();
        let walker = WalkBuilder::new(self.repo_root)
            .hidden(true)
            .git_ignore(true)
            .follow_links(false)
            .filter_entry(|entry| {
                if entry.file_type().map_or(false, |ft| ft.is_dir()) {
                    if let Some(name) = entry.file_name().to_str() {
                        return !SKIP_DIRS.contains(&name);
                    }
                }
                true
            })
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().map_or(false, |ft| ft.is_file()) {
                continue;
            }
            let rel = match entry.path().strip_prefix(self.repo_root) {
                Ok(r) => normalize_path(&r.to_string_lossy()),
                Err(_) => continue,
            };
            if self.is_indexable(&rel) {
                disk_files.push(rel);
            }
        }

        // Bounded-parallel hashing; an unreadable file yields no hash
        // and is treated as present-but-unchanged.
        let hashed: Vec<(String, Option<String>)> = disk_files
            .into_par_iter()
            .map(|rel| {
                let digest = fs::read(self.repo_root.join(&rel))
                    .ok()
                    .map(|content| format!("{:016x}", xxh3_64(&content)));
                (rel, digest)
            })
            .collect();

        let stored: HashMap<String, String> = store
            .list_files()?
            .into_iter()
            .map(|rec| (rec.path, rec.content_hash))
            .collect();
        let disk_paths: HashSet<&str> = hashed.iter().map(|(rel, _)| rel.as_str()).collect();

        let mut changes = Vec::new();
        for (rel, digest) in &hashed {
            let digest = match digest {
                Some(d) => d,
                None => continue,
            };
            match stored.get(rel) {
                None => changes.push(ChangedFile::added(rel.clone())),
                Some(prev) if prev != digest => changes.push(ChangedFile::modified(rel.clone())),
                Some(_) => {}
            }
        }
        for path in stored.keys() {
            if !disk_paths.contains(path.as_str()) {
                changes.push(ChangedFile::deleted(path.clone()));
            }
        }
        Ok(changes)
    }

    fn is_git_checkout(&self) -> bool {
        Command::new("git")
            .args(["rev-parse", "--git-dir"])
            .current_dir(self.repo_root)
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn git_output(&self, args: &[&str]) -> Result<String, EngineError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.repo_root)
            .output()?;
        if !output.status.success() {
            return Err(EngineError::Vcs {
                reason: format!(
                    "git {} failed: {}",
                    args.join(" "),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parse a NUL-separated `--name-status -z` stream. Records are
/// `STATUS\0PATH\0`, or `STATUS\0OLDPATH\0NEWPATH\0` for renames and
/// copies. Paths with whitespace survive unescaped.
fn parse_name_status_z(raw: &str) -> Vec<RawChange> {
    let mut fields = raw.split('\0');
    let mut records = Vec::new();
    while let Some(status) = fields.next() {
        if status.is_empty() {
            break;
        }
        let first = match fields.next() {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => break,
        };
        if status.starts_with('R') || status.starts_with('C') {
            let new = match fields.next() {
                Some(p) if !p.is_empty() => p.to_string(),
                _ => break,
            };
            records.push(RawChange {
                status: status.to_string(),
                path: new,
                old_path: Some(first),
            });
        } else {
            records.push(RawChange {
                status: status.to_string(),
                path: first,
                old_path: None,
            });
        }
    }
    records
}

/// Deduplicate keeping the last record per path: later operations
/// supersede earlier ones.
fn dedup_by_last(changes: Vec<ChangedFile>) -> Vec<ChangedFile> {
    let mut seen = HashSet::new();
    let mut out: Vec<ChangedFile> = changes
        .into_iter()
        .rev()
        .filter(|change| seen.insert(change.path.clone()))
        .collect();
    out.reverse();
    out
}
