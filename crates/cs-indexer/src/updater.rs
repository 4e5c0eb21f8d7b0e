use std::collections::HashMap;

use rusqlite::Connection;

use cs_core::{ChangeType, FileDelta, SymbolDelta};
use cs_store::{self, meta_keys, now_epoch, FileRecord, StateStore, SCHEMA_VERSION};

use crate::deps::{self, DependencyTracker};
use crate::error::EngineError;
use crate::extract::DeltaExtractor;

/// Apply a delta batch to the store in a single transaction.
///
/// Deltas are applied in input order; deletes always precede inserts
/// for the same file. Modified files are always re-inserted, even when
/// their document hash matches the stored one: a rescan after a
/// dependency change carries an unchanged document whose references
/// must still re-resolve against the new symbol ownership.
pub fn apply_delta(store: &mut StateStore, delta: &SymbolDelta) -> Result<usize, EngineError> {
    // Symbol ownership map: one pass over the store, augmented with the
    // in-flight deltas so a file's new symbols are owned by its new
    // path even before commit.
    let mut symbol_to_file = store.symbol_to_file_map()?;
    for fd in &delta.file_deltas {
        if fd.change == ChangeType::Deleted {
            continue;
        }
        for sym in &fd.symbols {
            symbol_to_file.insert(sym.id.clone(), fd.path.clone());
        }
    }

    let tx = store.transaction()?;
    let mut applied = 0usize;
    for fd in &delta.file_deltas {
        match fd.change {
            ChangeType::Deleted => {
                delete_file_data(&tx, &fd.path)?;
                applied += 1;
            }
            ChangeType::Added => {
                insert_file_data(&tx, fd, &symbol_to_file)?;
                applied += 1;
            }
            ChangeType::Modified => {
                delete_file_data(&tx, &fd.path)?;
                insert_file_data(&tx, fd, &symbol_to_file)?;
                applied += 1;
            }
            ChangeType::Renamed => {
                let old_path = match fd.old_path.as_deref() {
                    Some(p) if !p.is_empty() => p,
                    _ => {
                        return Err(EngineError::RenameMissingOldPath {
                            path: fd.path.clone(),
                        });
                    }
                };
                delete_file_data(&tx, old_path)?;
                insert_file_data(&tx, fd, &symbol_to_file)?;
                applied += 1;
            }
        }
    }
    tx.commit().map_err(cs_store::StoreError::from)?;

    tracing::debug!(files = applied, "delta applied");
    Ok(applied)
}

/// Apply a delta batch, then enqueue dependents of every changed
/// (non-deleted) file for rescan.
pub fn apply_delta_with_invalidation(
    store: &mut StateStore,
    delta: &SymbolDelta,
    tracker: &DependencyTracker<'_>,
) -> Result<usize, EngineError> {
    let applied = apply_delta(store, delta)?;

    let changed: Vec<String> = delta
        .file_deltas
        .iter()
        .filter(|fd| fd.change != ChangeType::Deleted)
        .map(|fd| fd.path.clone())
        .collect();
    tracker.invalidate_dependents(store, &changed)?;
    Ok(applied)
}

/// Remove every row owned by a file: its symbol mappings, its tracking
/// row, the call edges it owns, and its outgoing dependency edges.
pub fn delete_file_data(conn: &Connection, path: &str) -> Result<(), EngineError> {
    cs_store::delete_file_symbols(conn, path)?;
    cs_store::delete_file(conn, path)?;
    cs_store::delete_call_edges_for_file(conn, path)?;
    cs_store::delete_file_deps(conn, path)?;
    Ok(())
}

/// Insert a file's extracted rows and refresh its dependency edges.
pub fn insert_file_data(
    conn: &Connection,
    fd: &FileDelta,
    symbol_to_file: &HashMap<String, String>,
) -> Result<(), EngineError> {
    let now = now_epoch();
    cs_store::upsert_file(
        conn,
        &FileRecord {
            path: fd.path.clone(),
            content_hash: fd.content_hash.clone(),
            mtime: now,
            indexed_at: now,
            document_hash: fd.document_hash.clone(),
            symbol_count: fd.symbol_count() as i64,
        },
    )?;
    for sym in &fd.symbols {
        cs_store::insert_file_symbol(conn, &fd.path, &sym.id)?;
    }
    for edge in &fd.call_edges {
        cs_store::insert_call_edge(conn, edge)?;
    }
    deps::update_file_deps(conn, &fd.path, &fd.references, symbol_to_file)?;
    Ok(())
}

/// Rebuild the whole store from a freshly extracted full index: clear
/// every index table and re-insert each document's synthesized delta
/// in one transaction.
pub fn populate_from_full_index(
    store: &mut StateStore,
    extractor: &DeltaExtractor<'_>,
) -> Result<usize, EngineError> {
    let deltas = extractor.full_deltas();

    // Pre-pass: symbol ownership from the fresh extraction.
    let mut symbol_to_file: HashMap<String, String> = HashMap::new();
    for fd in &deltas {
        for sym in &fd.symbols {
            symbol_to_file.insert(sym.id.clone(), fd.path.clone());
        }
    }

    let tx = store.transaction()?;
    cs_store::clear_index_tables(&tx)?;
    for fd in &deltas {
        insert_file_data(&tx, fd, &symbol_to_file)?;
    }
    tx.commit().map_err(cs_store::StoreError::from)?;

    tracing::info!(files = deltas.len(), "store repopulated from full index");
    Ok(deltas.len())
}

/// Record a completed incremental run.
pub fn update_index_state(
    store: &StateStore,
    files_updated: usize,
    commit: &str,
) -> Result<(), EngineError> {
    store.set_meta(meta_keys::INDEX_STATE, "partial")?;
    store.set_meta_i64(meta_keys::LAST_INCREMENTAL_INDEX, now_epoch())?;
    let since_full = store.get_meta_i64(meta_keys::FILES_SINCE_FULL)?;
    store.set_meta_i64(meta_keys::FILES_SINCE_FULL, since_full + files_updated as i64)?;
    if !commit.is_empty() {
        store.set_meta(meta_keys::INDEX_COMMIT, commit)?;
    }
    Ok(())
}

/// Record a completed full reindex. Also stamps the engine schema
/// version so a store migrated by the full rebuild passes the gate.
pub fn set_full_index_complete(store: &StateStore, commit: &str) -> Result<(), EngineError> {
    store.set_meta(meta_keys::INDEX_STATE, "full")?;
    store.set_meta_i64(meta_keys::LAST_FULL_INDEX, now_epoch())?;
    store.set_meta_i64(meta_keys::FILES_SINCE_FULL, 0)?;
    store.set_meta(meta_keys::INDEX_COMMIT, commit)?;
    store.set_meta(meta_keys::SCHEMA_VERSION, &SCHEMA_VERSION.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_core::{CallEdgeRecord, ReferenceRecord, SymbolRecord};
    use cs_store::insert_file_symbol;

    fn symbol(id: &str, start_line: u32, end_line: u32) -> SymbolRecord {
        SymbolRecord {
            id: id.to_string(),
            name: id.rsplit('.').next().unwrap_or(id).to_string(),
            kind: "function".to_string(),
            start_line,
            end_line,
        }
    }

    fn delta_of(file_deltas: Vec<FileDelta>) -> SymbolDelta {
        SymbolDelta {
            file_deltas,
            stats: Default::default(),
        }
    }

    fn added_delta(path: &str, symbols: Vec<SymbolRecord>, hash: &str, doc_hash: &str) -> FileDelta {
        FileDelta {
            path: path.to_string(),
            change: ChangeType::Added,
            content_hash: hash.to_string(),
            document_hash: doc_hash.to_string(),
            symbols,
            ..Default::default()
        }
    }

    #[test]
    fn added_file_creates_all_rows() {
        let mut store = StateStore::open_in_memory().unwrap();
        let delta = delta_of(vec![added_delta(
            "m.go",
            vec![symbol("pkg.A", 10, 15)],
            "h1",
            "d1",
        )]);

        let applied = apply_delta(&mut store, &delta).unwrap();
        assert_eq!(applied, 1);

        let rec = store.get_file("m.go").unwrap().unwrap();
        assert_eq!(rec.content_hash, "h1");
        assert_eq!(rec.document_hash, "d1");
        assert_eq!(rec.symbol_count, 1);
        assert_eq!(store.file_symbols("m.go").unwrap(), vec!["pkg.A"]);
        assert!(store.call_edges_from_file("m.go").unwrap().is_empty());
        assert!(store.dependencies_of("m.go").unwrap().is_empty());
    }

    #[test]
    fn modify_replaces_symbol_set() {
        let mut store = StateStore::open_in_memory().unwrap();
        apply_delta(
            &mut store,
            &delta_of(vec![added_delta(
                "m.go",
                vec![symbol("pkg.A", 10, 15)],
                "h1",
                "d1",
            )]),
        )
        .unwrap();

        let modified = FileDelta {
            path: "m.go".to_string(),
            change: ChangeType::Modified,
            content_hash: "h2".to_string(),
            document_hash: "d2".to_string(),
            symbols: vec![symbol("pkg.B", 10, 12), symbol("pkg.C", 14, 20)],
            ..Default::default()
        };
        apply_delta(&mut store, &delta_of(vec![modified])).unwrap();

        assert_eq!(store.file_symbols("m.go").unwrap(), vec!["pkg.B", "pkg.C"]);
        let rec = store.get_file("m.go").unwrap().unwrap();
        assert_eq!(rec.content_hash, "h2");
        assert_eq!(rec.symbol_count, 2);
    }

    #[test]
    fn rename_without_old_path_fails_and_rolls_back() {
        let mut store = StateStore::open_in_memory().unwrap();
        apply_delta(
            &mut store,
            &delta_of(vec![added_delta(
                "m.go",
                vec![symbol("pkg.A", 10, 15)],
                "h1",
                "d1",
            )]),
        )
        .unwrap();

        let bad = FileDelta {
            path: "new.go".to_string(),
            old_path: None,
            change: ChangeType::Renamed,
            content_hash: "h9".to_string(),
            document_hash: "d9".to_string(),
            symbols: vec![symbol("pkg.Z", 1, 2)],
            ..Default::default()
        };
        // A batch whose first entry succeeds must still roll back whole.
        let batch = delta_of(vec![
            added_delta("x.go", vec![symbol("pkg.X", 1, 1)], "hx", "dx"),
            bad,
        ]);
        let err = apply_delta(&mut store, &batch).unwrap_err();
        assert!(matches!(err, EngineError::RenameMissingOldPath { .. }));

        // Store unchanged: no x.go, no new.go, m.go intact.
        assert!(store.get_file("x.go").unwrap().is_none());
        assert!(store.get_file("new.go").unwrap().is_none());
        assert!(store.get_file("m.go").unwrap().is_some());
        assert_eq!(store.count_files().unwrap(), 1);
    }

    #[test]
    fn rename_migrates_every_row() {
        let mut store = StateStore::open_in_memory().unwrap();
        let mut original = added_delta("m.go", vec![symbol("pkg.A", 10, 15)], "h1", "d1");
        original.call_edges.push(CallEdgeRecord {
            caller_id: "pkg.A".to_string(),
            caller_file: "m.go".to_string(),
            callee_id: "pkg.Other".to_string(),
            call_line: 11,
            call_col: 4,
            call_end_col: 9,
        });
        apply_delta(&mut store, &delta_of(vec![original])).unwrap();

        let renamed = FileDelta {
            path: "n.go".to_string(),
            old_path: Some("m.go".to_string()),
            change: ChangeType::Renamed,
            content_hash: "h1".to_string(),
            document_hash: "d1".to_string(),
            symbols: vec![symbol("pkg.A", 10, 15)],
            ..Default::default()
        };
        apply_delta(&mut store, &delta_of(vec![renamed])).unwrap();

        // No row anywhere references the old path.
        assert!(store.get_file("m.go").unwrap().is_none());
        assert!(store.file_symbols("m.go").unwrap().is_empty());
        assert!(store.call_edges_from_file("m.go").unwrap().is_empty());
        assert!(store.dependencies_of("m.go").unwrap().is_empty());

        assert!(store.get_file("n.go").unwrap().is_some());
        assert_eq!(store.file_symbols("n.go").unwrap(), vec!["pkg.A"]);
    }

    #[test]
    fn deleting_a_file_deletes_its_owned_edges() {
        let mut store = StateStore::open_in_memory().unwrap();
        let mut fd = added_delta("m.go", vec![symbol("pkg.A", 1, 5)], "h1", "d1");
        fd.call_edges.push(CallEdgeRecord {
            caller_id: "pkg.A".to_string(),
            caller_file: "m.go".to_string(),
            callee_id: "pkg.B".to_string(),
            call_line: 2,
            call_col: 4,
            call_end_col: 0,
        });
        apply_delta(&mut store, &delta_of(vec![fd])).unwrap();
        assert_eq!(store.call_edges_for_callee("pkg.B").unwrap().len(), 1);

        let deletion = FileDelta {
            path: "m.go".to_string(),
            change: ChangeType::Deleted,
            ..Default::default()
        };
        apply_delta(&mut store, &delta_of(vec![deletion])).unwrap();

        // Caller-owned invariant: the file's edges are gone with it.
        assert!(store.call_edges_for_callee("pkg.B").unwrap().is_empty());
        assert!(store.get_file("m.go").unwrap().is_none());
        assert!(store.file_symbols("m.go").unwrap().is_empty());
    }

    #[test]
    fn in_flight_symbols_resolve_dependencies() {
        let mut store = StateStore::open_in_memory().unwrap();

        // b.go defines pkg.B; a.go references it. Both arrive in the
        // same batch, so resolution must use the in-flight map.
        let defs = added_delta("b.go", vec![symbol("pkg.B", 1, 5)], "hb", "db");
        let mut refs = added_delta("a.go", vec![symbol("pkg.A", 1, 5)], "ha", "da");
        refs.references.push(ReferenceRecord {
            from_file: "a.go".to_string(),
            from_line: 3,
            to_symbol_id: "pkg.B".to_string(),
            kind: "call".to_string(),
        });
        // Self-reference must not create an edge.
        refs.references.push(ReferenceRecord {
            from_file: "a.go".to_string(),
            from_line: 4,
            to_symbol_id: "pkg.A".to_string(),
            kind: "reference".to_string(),
        });

        apply_delta(&mut store, &delta_of(vec![refs, defs])).unwrap();

        assert_eq!(store.dependencies_of("a.go").unwrap(), vec!["b.go"]);
        assert!(store.dependencies_of("b.go").unwrap().is_empty());
    }

    #[test]
    fn unchanged_document_hash_still_reinserts() {
        let mut store = StateStore::open_in_memory().unwrap();
        apply_delta(
            &mut store,
            &delta_of(vec![added_delta(
                "m.go",
                vec![symbol("pkg.A", 10, 15)],
                "h1",
                "d1",
            )]),
        )
        .unwrap();
        cs_store::insert_file_dep(store.connection(), "m.go", "stale.go").unwrap();

        // Same document hash, fresh extraction: the rows are rebuilt,
        // which is what lets a rescan drop stale dependency edges.
        let rescan = FileDelta {
            path: "m.go".to_string(),
            change: ChangeType::Modified,
            content_hash: "h2".to_string(),
            document_hash: "d1".to_string(),
            symbols: vec![symbol("pkg.A", 10, 15)],
            ..Default::default()
        };
        let applied = apply_delta(&mut store, &delta_of(vec![rescan])).unwrap();
        assert_eq!(applied, 1);

        let rec = store.get_file("m.go").unwrap().unwrap();
        assert_eq!(rec.content_hash, "h2");
        assert_eq!(rec.document_hash, "d1");
        assert_eq!(store.file_symbols("m.go").unwrap(), vec!["pkg.A"]);
        assert!(store.dependencies_of("m.go").unwrap().is_empty());
    }

    #[test]
    fn invalidation_runs_after_apply() {
        use crate::config::TransitiveConfig;

        let mut store = StateStore::open_in_memory().unwrap();
        // a.go defines pkg.A and b.go depends on it.
        apply_delta(
            &mut store,
            &delta_of(vec![added_delta(
                "a.go",
                vec![symbol("pkg.A", 1, 5)],
                "ha",
                "da",
            )]),
        )
        .unwrap();
        cs_store::insert_file_dep(store.connection(), "b.go", "a.go").unwrap();

        let config = TransitiveConfig::default();
        let tracker = DependencyTracker::new(&config);
        let modified = FileDelta {
            path: "a.go".to_string(),
            change: ChangeType::Modified,
            content_hash: "ha2".to_string(),
            document_hash: "da2".to_string(),
            symbols: vec![symbol("pkg.A", 1, 6)],
            ..Default::default()
        };
        apply_delta_with_invalidation(&mut store, &delta_of(vec![modified]), &tracker).unwrap();

        let queue = store.list_rescan_queue().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].file_path, "b.go");
    }

    #[test]
    fn index_state_bookkeeping() {
        let store = StateStore::open_in_memory().unwrap();

        update_index_state(&store, 3, "abc123").unwrap();
        assert_eq!(store.get_meta(meta_keys::INDEX_STATE).unwrap(), "partial");
        assert_eq!(store.get_meta_i64(meta_keys::FILES_SINCE_FULL).unwrap(), 3);
        assert_eq!(store.get_meta(meta_keys::INDEX_COMMIT).unwrap(), "abc123");
        assert!(store.get_meta_i64(meta_keys::LAST_INCREMENTAL_INDEX).unwrap() > 0);

        // The counter accumulates across runs; an empty commit is not
        // written.
        update_index_state(&store, 2, "").unwrap();
        assert_eq!(store.get_meta_i64(meta_keys::FILES_SINCE_FULL).unwrap(), 5);
        assert_eq!(store.get_meta(meta_keys::INDEX_COMMIT).unwrap(), "abc123");

        set_full_index_complete(&store, "def456").unwrap();
        assert_eq!(store.get_meta(meta_keys::INDEX_STATE).unwrap(), "full");
        assert_eq!(store.get_meta_i64(meta_keys::FILES_SINCE_FULL).unwrap(), 0);
        assert_eq!(store.get_meta(meta_keys::INDEX_COMMIT).unwrap(), "def456");
        assert!(store.get_meta_i64(meta_keys::LAST_FULL_INDEX).unwrap() > 0);
    }

    #[test]
    fn populate_from_full_index_clears_and_rebuilds() {
        use crate::artifact::{
            ArtifactDocument, ArtifactOccurrence, ArtifactSymbol, IndexArtifact, ROLE_DEFINITION,
        };

        let defines = ArtifactDocument {
            relative_path: "a.go".to_string(),
            language: "go".to_string(),
            occurrences: vec![ArtifactOccurrence {
                symbol: "pkg/A().".to_string(),
                roles: ROLE_DEFINITION,
                start_line: 4,
                start_col: 0,
                end_line: 8,
                end_col: 1,
            }],
            symbols: vec![ArtifactSymbol {
                symbol: "pkg/A().".to_string(),
                display_name: "A".to_string(),
                kind_code: 12,
            }],
        };
        let uses = ArtifactDocument {
            relative_path: "b.go".to_string(),
            language: "go".to_string(),
            occurrences: vec![
                ArtifactOccurrence {
                    symbol: "pkg/B().".to_string(),
                    roles: ROLE_DEFINITION,
                    start_line: 2,
                    start_col: 0,
                    end_line: 6,
                    end_col: 1,
                },
                ArtifactOccurrence {
                    symbol: "pkg/A().".to_string(),
                    roles: 8,
                    start_line: 3,
                    start_col: 4,
                    end_line: 3,
                    end_col: 5,
                },
            ],
            symbols: vec![ArtifactSymbol {
                symbol: "pkg/B().".to_string(),
                display_name: "B".to_string(),
                kind_code: 12,
            }],
        };
        let artifact = IndexArtifact::from_documents(vec![defines, uses]);
        let tmp = tempfile::TempDir::new().unwrap();
        let extractor = DeltaExtractor::new(&artifact, tmp.path());

        let mut store = StateStore::open_in_memory().unwrap();
        // Stale rows from a previous life of the store.
        apply_delta(
            &mut store,
            &delta_of(vec![added_delta(
                "ghost.go",
                vec![symbol("pkg.Ghost", 1, 2)],
                "hg",
                "dg",
            )]),
        )
        .unwrap();
        store.set_meta(meta_keys::CALLGRAPH_QUALITY, "full").unwrap();

        let files = populate_from_full_index(&mut store, &extractor).unwrap();
        assert_eq!(files, 2);

        assert!(store.get_file("ghost.go").unwrap().is_none());
        assert!(store.get_file("a.go").unwrap().is_some());
        assert!(store.get_file("b.go").unwrap().is_some());
        assert_eq!(store.file_symbols("a.go").unwrap(), vec!["pkg/A()."]);
        // The cross-document reference resolves through the pre-pass map.
        assert_eq!(store.dependencies_of("b.go").unwrap(), vec!["a.go"]);
        // The call edge is owned by b.go and resolves its caller.
        let edges = store.call_edges_from_file("b.go").unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].caller_id.as_deref(), Some("pkg/B()."));
        assert_eq!(edges[0].callee_id, "pkg/A().");
        // Meta survives the table clear.
        assert_eq!(store.get_meta(meta_keys::CALLGRAPH_QUALITY).unwrap(), "full");
    }

    #[test]
    fn symbol_ownership_survives_replacement_in_batch() {
        let mut store = StateStore::open_in_memory().unwrap();
        // Stale state: pkg.Moved used to live in old.go.
        insert_file_symbol(store.connection(), "old.go", "pkg.Moved").unwrap();
        cs_store::upsert_file(
            store.connection(),
            &FileRecord {
                path: "old.go".to_string(),
                content_hash: "h".to_string(),
                mtime: 0,
                indexed_at: 0,
                document_hash: String::new(),
                symbol_count: 1,
            },
        )
        .unwrap();

        // new.go now defines pkg.Moved; user.go calls it. The in-flight
        // map must override the stale store row.
        let moved = added_delta("new.go", vec![symbol("pkg.Moved", 1, 5)], "hn", "dn");
        let mut user = added_delta("user.go", vec![], "hu", "du");
        user.references.push(ReferenceRecord {
            from_file: "user.go".to_string(),
            from_line: 2,
            to_symbol_id: "pkg.Moved".to_string(),
            kind: "call".to_string(),
        });
        apply_delta(&mut store, &delta_of(vec![moved, user])).unwrap();

        assert_eq!(store.dependencies_of("user.go").unwrap(), vec!["new.go"]);
    }
}
