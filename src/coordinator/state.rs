use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a coordinator is computing in-process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FallbackReason {
    /// Worker use is switched off in settings.
    Disabled,
    StorageUnavailable,
    WorkerUnavailable,
    /// The worker was running and then went away.
    WorkerLost,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum CoordinatorMode {
    Uninitialized,
    WorkerBacked,
    FallbackOnly { reason: FallbackReason },
}

impl Default for CoordinatorMode {
    fn default() -> Self {
        CoordinatorMode::Uninitialized
    }
}

impl CoordinatorMode {
    pub fn is_worker_backed(&self) -> bool {
        matches!(self, CoordinatorMode::WorkerBacked)
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, CoordinatorMode::FallbackOnly { .. })
    }

    /// Whether `self -> next` is a legal transition. `explicit` marks a
    /// caller-requested re-initialisation, the only way out of fallback.
    pub fn can_transition_to(&self, next: CoordinatorMode, explicit: bool) -> bool {
        match (self, next) {
            (CoordinatorMode::Uninitialized, CoordinatorMode::Uninitialized) => false,
            (CoordinatorMode::Uninitialized, _) => true,
            (CoordinatorMode::WorkerBacked, CoordinatorMode::FallbackOnly { .. }) => true,
            (CoordinatorMode::WorkerBacked, CoordinatorMode::WorkerBacked) => explicit,
            (CoordinatorMode::FallbackOnly { .. }, CoordinatorMode::WorkerBacked) => explicit,
            (CoordinatorMode::FallbackOnly { .. }, CoordinatorMode::FallbackOnly { .. }) => {
                explicit
            }
            (_, CoordinatorMode::Uninitialized) => false,
        }
    }
}

impl fmt::Display for CoordinatorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorMode::Uninitialized => write!(f, "uninitialized"),
            CoordinatorMode::WorkerBacked => write!(f, "worker-backed"),
            CoordinatorMode::FallbackOnly { reason } => write!(f, "fallback-only ({reason:?})"),
        }
    }
}

/// Which path produced a set of results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ComputationPath {
    Worker,
    InProcess,
}

#[cfg(test)]
mod tests {
    use super::*;

    const FALLBACK: CoordinatorMode = CoordinatorMode::FallbackOnly {
        reason: FallbackReason::StorageUnavailable,
    };

    #[test]
    fn initialisation_resolves_to_either_mode() {
        let start = CoordinatorMode::default();
        assert_eq!(start, CoordinatorMode::Uninitialized);
        assert!(start.can_transition_to(CoordinatorMode::WorkerBacked, false));
        assert!(start.can_transition_to(FALLBACK, false));
    }

    #[test]
    fn fallback_only_leaves_on_explicit_request() {
        assert!(!FALLBACK.can_transition_to(CoordinatorMode::WorkerBacked, false));
        assert!(FALLBACK.can_transition_to(CoordinatorMode::WorkerBacked, true));
    }

    #[test]
    fn worker_backed_may_degrade_at_any_time() {
        let lost = CoordinatorMode::FallbackOnly {
            reason: FallbackReason::WorkerLost,
        };
        assert!(CoordinatorMode::WorkerBacked.can_transition_to(lost, false));
        assert!(!CoordinatorMode::WorkerBacked.can_transition_to(CoordinatorMode::Uninitialized, true));
    }

    #[test]
    fn mode_serializes_with_tag() {
        let json = serde_json::to_value(FALLBACK).unwrap();
        assert_eq!(json["mode"], "fallbackOnly");
        assert_eq!(json["reason"], "storageUnavailable");
    }
}
