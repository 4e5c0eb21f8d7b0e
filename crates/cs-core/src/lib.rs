mod cancel;
mod change;
mod delta;
mod invalidation;
mod kind;

pub use cancel::CancelToken;
pub use change::{ChangeType, ChangedFile};
pub use delta::{
    CallEdgeRecord, DeltaStats, FileDelta, ReferenceRecord, SymbolDelta, SymbolRecord,
};
pub use invalidation::{InvalidationMode, RescanReason};
pub use kind::{is_callable_kind, symbol_kind_name, KIND_CONSTRUCTOR, KIND_FUNCTION, KIND_METHOD};

/// Normalize a path to forward-slash separators regardless of host.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_backslashes() {
        assert_eq!(normalize_path("src\\pkg\\a.go"), "src/pkg/a.go");
        assert_eq!(normalize_path("src/pkg/a.go"), "src/pkg/a.go");
    }
}
