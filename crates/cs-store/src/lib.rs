pub mod error;
pub mod state;

pub use error::StoreError;
pub use state::{
    clear_index_tables, delete_call_edges_for_file, delete_file, delete_file_deps,
    delete_file_symbols, enqueue_rescan, insert_call_edge, insert_file_dep, insert_file_symbol,
    meta_keys, now_epoch, upsert_file, CallEdgeRow, FileRecord, RescanEntry, StateStore,
    SCHEMA_VERSION,
};
