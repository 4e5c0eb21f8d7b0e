use std::collections::HashMap;
use std::fs;
use std::path::Path;

use protobuf::Message;
use scip::types::{symbol_information::Kind, Index, SymbolRole};

use cs_core::normalize_path;

use crate::error::EngineError;

/// Occurrence role bit marking a definition.
pub const ROLE_DEFINITION: i32 = SymbolRole::Definition as i32;

/// One document of the regenerated index artifact, converted out of
/// the wire format so the rest of the engine never touches protobuf
/// types.
#[derive(Debug, Clone, Default)]
pub struct ArtifactDocument {
    pub relative_path: String,
    pub language: String,
    pub occurrences: Vec<ArtifactOccurrence>,
    pub symbols: Vec<ArtifactSymbol>,
}

/// A single occurrence. Lines and columns are 0-indexed as supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactOccurrence {
    pub symbol: String,
    pub roles: i32,
    pub start_line: i32,
    pub start_col: i32,
    pub end_line: i32,
    pub end_col: i32,
}

impl ArtifactOccurrence {
    pub fn is_definition(&self) -> bool {
        self.roles & ROLE_DEFINITION != 0
    }
}

/// Symbol information attached to a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSymbol {
    pub symbol: String,
    pub display_name: String,
    /// Integer code from the engine's fixed kind table.
    pub kind_code: i32,
}

/// The loaded index artifact, keyed by relative path.
pub struct IndexArtifact {
    documents: Vec<ArtifactDocument>,
    by_path: HashMap<String, usize>,
}

impl IndexArtifact {
    /// Load and convert the artifact at `path`.
    ///
    /// Documents whose language is "go" or empty participate; others
    /// are filtered out.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let bytes = fs::read(path)?;
        let index = Index::parse_from_bytes(&bytes)?;
        Ok(Self::from_index(index))
    }

    fn from_index(index: Index) -> Self {
        let mut documents = Vec::new();
        for doc in index.documents {
            if !doc.language.is_empty() && doc.language != "go" {
                continue;
            }
            let occurrences = doc
                .occurrences
                .iter()
                .filter_map(|occ| {
                    let (start_line, start_col, end_line, end_col) = split_range(&occ.range)?;
                    Some(ArtifactOccurrence {
                        symbol: occ.symbol.clone(),
                        roles: occ.symbol_roles,
                        start_line,
                        start_col,
                        end_line,
                        end_col,
                    })
                })
                .collect();
            let symbols = doc
                .symbols
                .iter()
                .map(|info| ArtifactSymbol {
                    symbol: info.symbol.clone(),
                    display_name: info.display_name.clone(),
                    kind_code: kind_code(info.kind.enum_value_or(Kind::UnspecifiedKind)),
                })
                .collect();
            documents.push(ArtifactDocument {
                relative_path: normalize_path(&doc.relative_path),
                language: doc.language,
                occurrences,
                symbols,
            });
        }
        let by_path = documents
            .iter()
            .enumerate()
            .map(|(i, doc)| (doc.relative_path.clone(), i))
            .collect();
        Self { documents, by_path }
    }

    /// Build an artifact directly from converted documents (tests).
    #[cfg(test)]
    pub(crate) fn from_documents(documents: Vec<ArtifactDocument>) -> Self {
        let by_path = documents
            .iter()
            .enumerate()
            .map(|(i, doc)| (doc.relative_path.clone(), i))
            .collect();
        Self { documents, by_path }
    }

    /// Look up a document by repo-relative path.
    pub fn document(&self, relative_path: &str) -> Option<&ArtifactDocument> {
        self.by_path
            .get(relative_path)
            .map(|&i| &self.documents[i])
    }

    pub fn documents(&self) -> &[ArtifactDocument] {
        &self.documents
    }
}

/// SCIP ranges are `[start_line, start_col, end_line, end_col]`, or
/// three elements when the occurrence is single-line.
fn split_range(range: &[i32]) -> Option<(i32, i32, i32, i32)> {
    match range {
        [line, start_col, end_col] => Some((*line, *start_col, *line, *end_col)),
        [start_line, start_col, end_line, end_col] => {
            Some((*start_line, *start_col, *end_line, *end_col))
        }
        _ => None,
    }
}

/// Convert the wire-format kind to the engine's integer code table.
fn kind_code(kind: Kind) -> i32 {
    match kind {
        Kind::Namespace => 3,
        Kind::Package => 4,
        Kind::Class | Kind::TypeAlias => 5,
        Kind::Method => 6,
        Kind::Property => 7,
        Kind::Field => 8,
        Kind::Constructor => 9,
        Kind::Enum => 10,
        Kind::Interface | Kind::Trait => 11,
        Kind::Function | Kind::Macro => 12,
        Kind::Variable => 13,
        Kind::Constant => 14,
        Kind::EnumMember => 22,
        Kind::Struct | Kind::Union => 23,
        _ => 0,
    }
}
