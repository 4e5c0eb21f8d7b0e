use serde::{Deserialize, Serialize};

/// Policy controlling whether and when dependents of changed files are
/// re-scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationMode {
    /// Skip invalidation entirely.
    None,
    /// Enqueue direct dependents only; a later run drains them.
    Lazy,
    /// Enqueue recursively up to the configured depth and drain in the
    /// same run, under the configured budgets.
    Eager,
    /// Enqueue like `Lazy`; the caller drains on its own schedule.
    Deferred,
}

impl Default for InvalidationMode {
    fn default() -> Self {
        Self::Lazy
    }
}

impl InvalidationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lazy => "lazy",
            Self::Eager => "eager",
            Self::Deferred => "deferred",
        }
    }

    /// Parse the boundary string form; unrecognized values fall back to
    /// the default (`lazy`).
    pub fn parse(s: &str) -> Self {
        match s {
            "none" => Self::None,
            "lazy" => Self::Lazy,
            "eager" => Self::Eager,
            "deferred" => Self::Deferred,
            _ => Self::default(),
        }
    }
}

/// Why a file sits in the rescan queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RescanReason {
    /// A definition this file depends on changed.
    DepChange,
    /// Deferred past a drain budget in an earlier run.
    BudgetExceeded,
    /// Enqueued explicitly by a caller.
    Manual,
}

impl RescanReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DepChange => "dep_change",
            Self::BudgetExceeded => "budget_exceeded",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dep_change" => Some(Self::DepChange),
            "budget_exceeded" => Some(Self::BudgetExceeded),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}
