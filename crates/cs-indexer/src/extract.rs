use std::collections::HashMap;
use std::fs;
use std::path::Path;

use xxhash_rust::xxh3::xxh3_64;

use cs_core::{
    is_callable_kind, symbol_kind_name, CallEdgeRecord, CancelToken, ChangeType, ChangedFile,
    DeltaStats, FileDelta, ReferenceRecord, SymbolDelta, SymbolRecord,
};
use cs_store::StateStore;

use crate::artifact::{ArtifactDocument, ArtifactSymbol, IndexArtifact};
use crate::error::EngineError;

/// Line window assumed for the last definition in a file when nothing
/// bounds it from below. A heuristic, not a guarantee.
const TRAILING_DEF_WINDOW: u32 = 500;

/// Transforms change records into per-file deltas by re-reading the
/// freshly regenerated index artifact.
pub struct DeltaExtractor<'a> {
    artifact: &'a IndexArtifact,
    repo_root: &'a Path,
}

impl<'a> DeltaExtractor<'a> {
    pub fn new(artifact: &'a IndexArtifact, repo_root: &'a Path) -> Self {
        Self {
            artifact,
            repo_root,
        }
    }

    /// Extract a delta for every change record. The store is consulted
    /// only for prior row counts feeding the removed-side statistics.
    pub fn extract_deltas(
        &self,
        changes: &[ChangedFile],
        store: &StateStore,
        cancel: &CancelToken,
    ) -> Result<SymbolDelta, EngineError> {
        let mut file_deltas = Vec::with_capacity(changes.len());
        let mut stats = DeltaStats::default();
        for change in changes {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let delta = self.extract_file_delta(change)?;
            self.accumulate(&mut stats, &delta, store)?;
            file_deltas.push(delta);
        }
        Ok(SymbolDelta { file_deltas, stats })
    }

    /// Extract the delta for a single changed file.
    ///
    /// A deletion carries no content; a missing document degrades to an
    /// empty delta rather than failing the run.
    pub fn extract_file_delta(&self, change: &ChangedFile) -> Result<FileDelta, EngineError> {
        if change.change == ChangeType::Deleted {
            return Ok(FileDelta {
                path: change.path.clone(),
                old_path: change.old_path.clone(),
                change: ChangeType::Deleted,
                ..Default::default()
            });
        }

        let content_hash = self.content_hash(&change.path);
        match self.artifact.document(&change.path) {
            Some(doc) => {
                let mut delta = self.extract_document(doc);
                delta.change = change.change;
                delta.old_path = change.old_path.clone();
                delta.content_hash = content_hash;
                Ok(delta)
            }
            None => {
                tracing::debug!(path = %change.path, "no document in artifact, emitting empty delta");
                Ok(FileDelta {
                    path: change.path.clone(),
                    old_path: change.old_path.clone(),
                    change: change.change,
                    content_hash,
                    ..Default::default()
                })
            }
        }
    }

    /// Synthesize an `Added` delta straight from an artifact document.
    /// Used when repopulating after a full reindex.
    pub fn document_delta(&self, doc: &ArtifactDocument) -> FileDelta {
        let mut delta = self.extract_document(doc);
        delta.content_hash = self.content_hash(&doc.relative_path);
        delta
    }

    /// Synthesized deltas for every document in the artifact.
    pub fn full_deltas(&self) -> Vec<FileDelta> {
        self.artifact
            .documents()
            .iter()
            .map(|doc| self.document_delta(doc))
            .collect()
    }

    fn extract_document(&self, doc: &ArtifactDocument) -> FileDelta {
        let info_map: HashMap<&str, &ArtifactSymbol> = doc
            .symbols
            .iter()
            .map(|info| (info.symbol.as_str(), info))
            .collect();

        let mut symbols = Vec::new();
        let mut references = Vec::new();
        for occ in &doc.occurrences {
            if is_local_symbol(&occ.symbol) {
                continue;
            }
            if occ.is_definition() {
                let info = info_map.get(occ.symbol.as_str());
                let name = match info {
                    Some(i) if !i.display_name.is_empty() => i.display_name.clone(),
                    _ => parse_symbol_name(&occ.symbol),
                };
                let kind_code = info.map_or(0, |i| i.kind_code);
                symbols.push(SymbolRecord {
                    id: occ.symbol.clone(),
                    name,
                    kind: symbol_kind_name(kind_code).to_string(),
                    start_line: occ.start_line as u32 + 1,
                    end_line: occ.end_line as u32 + 1,
                });
            } else {
                let callable = is_callable(info_map.get(occ.symbol.as_str()).copied(), &occ.symbol);
                let kind = if callable { "call" } else { "reference" };
                references.push(ReferenceRecord {
                    from_file: doc.relative_path.clone(),
                    from_line: occ.start_line as u32 + 1,
                    to_symbol_id: occ.symbol.clone(),
                    kind: kind.to_string(),
                });
            }
        }
        symbols.sort_by_key(|sym| sym.start_line);

        // Second pass over non-definition occurrences for call edges,
        // now that the definition list is complete for owner lookup.
        let mut call_edges = Vec::new();
        for occ in &doc.occurrences {
            if occ.is_definition() || is_local_symbol(&occ.symbol) {
                continue;
            }
            if !is_callable(info_map.get(occ.symbol.as_str()).copied(), &occ.symbol) {
                continue;
            }
            let call_line = occ.start_line as u32 + 1;
            let caller_id = resolve_caller(&symbols, call_line)
                .map(|sym| sym.id.clone())
                .unwrap_or_default();
            call_edges.push(CallEdgeRecord {
                caller_id,
                caller_file: doc.relative_path.clone(),
                callee_id: occ.symbol.clone(),
                call_line,
                call_col: occ.start_col as u32,
                call_end_col: occ.end_col as u32,
            });
        }

        FileDelta {
            path: doc.relative_path.clone(),
            old_path: None,
            change: ChangeType::Added,
            content_hash: String::new(),
            document_hash: document_hash(doc),
            symbols,
            references,
            call_edges,
        }
    }

    /// Hex digest of the on-disk file; empty when unreadable.
    fn content_hash(&self, rel_path: &str) -> String {
        fs::read(self.repo_root.join(rel_path))
            .map(|content| format!("{:016x}", xxh3_64(&content)))
            .unwrap_or_default()
    }

    fn accumulate(
        &self,
        stats: &mut DeltaStats,
        delta: &FileDelta,
        store: &StateStore,
    ) -> Result<(), EngineError> {
        match delta.change {
            ChangeType::Added => {
                stats.files_added += 1;
                self.count_additions(stats, delta);
            }
            ChangeType::Modified | ChangeType::Renamed => {
                stats.files_changed += 1;
                self.count_additions(stats, delta);
                let prior_path = delta.old_path.as_deref().unwrap_or(&delta.path);
                self.count_removals(stats, prior_path, store)?;
            }
            ChangeType::Deleted => {
                stats.files_deleted += 1;
                self.count_removals(stats, &delta.path, store)?;
            }
        }
        Ok(())
    }

    fn count_additions(&self, stats: &mut DeltaStats, delta: &FileDelta) {
        stats.symbols_added += delta.symbols.len();
        stats.refs_added += delta.references.len();
        stats.call_edges_added += delta.call_edges.len();
    }

    fn count_removals(
        &self,
        stats: &mut DeltaStats,
        prior_path: &str,
        store: &StateStore,
    ) -> Result<(), EngineError> {
        if let Some(rec) = store.get_file(prior_path)? {
            stats.symbols_removed += rec.symbol_count.max(0) as usize;
        }
        stats.refs_removed += store.count_call_edges_from_file(prior_path)?;
        Ok(())
    }
}

/// SCIP local symbols are scoped to a single function or block and are
/// excluded from cross-file tracking.
fn is_local_symbol(symbol: &str) -> bool {
    symbol.starts_with("local ")
}

/// Parse a display name from the trailing component of a symbol id,
/// stripping the `#`, `().`, and `.` descriptor suffixes.
fn parse_symbol_name(symbol: &str) -> String {
    let mut tail = symbol.rsplit('/').next().unwrap_or(symbol);
    tail = tail.rsplit(' ').next().unwrap_or(tail);
    for suffix in ["().", "#", "."] {
        if let Some(stripped) = tail.strip_suffix(suffix) {
            tail = stripped;
            break;
        }
    }
    match tail.rfind(['#', '.']) {
        Some(i) => tail[i + 1..].to_string(),
        None => tail.to_string(),
    }
}

/// Whether a referenced symbol can appear as a call target: the
/// supplier's kind decides when present, otherwise the `()`-bearing
/// id form.
fn is_callable(info: Option<&ArtifactSymbol>, symbol: &str) -> bool {
    match info {
        Some(i) if i.kind_code != 0 => is_callable_kind(i.kind_code),
        _ => symbol.ends_with("().") || symbol.ends_with("()"),
    }
}

/// Find the enclosing definition for a 1-indexed call line.
///
/// Definitions must be sorted by start line. A definition without a
/// multi-line range extends to the line before the next definition, or
/// through a fixed window when it is the last one.
fn resolve_caller(symbols: &[SymbolRecord], line: u32) -> Option<&SymbolRecord> {
    let mut owner = None;
    for (i, sym) in symbols.iter().enumerate() {
        if sym.start_line > line {
            break;
        }
        let end = if sym.end_line > sym.start_line {
            sym.end_line
        } else {
            match symbols.get(i + 1) {
                Some(next) => next.start_line.saturating_sub(1),
                None => sym.start_line + TRAILING_DEF_WINDOW,
            }
        };
        if line <= end {
            owner = Some(sym);
        }
    }
    owner
}

/// Short digest over the document's ordered occurrences and symbol
/// information, letting the updater skip a no-op rewrite.
fn document_hash(doc: &ArtifactDocument) -> String {
    let mut buf = String::new();
    for occ in &doc.occurrences {
        buf.push_str(&occ.symbol);
        buf.push_str(&format!(
            "|{}|{}:{}:{}:{}\n",
            occ.roles, occ.start_line, occ.start_col, occ.end_line, occ.end_col
        ));
    }
    for info in &doc.symbols {
        buf.push_str(&info.symbol);
        buf.push_str(&format!("|{}|{}\n", info.display_name, info.kind_code));
    }
    format!("{:016x}", xxh3_64(buf.as_bytes()))
}
