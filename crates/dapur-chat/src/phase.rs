//! Turn lifecycle with validated transitions.
//!
//! Idle -> Submitted -> Refused | Generating
//! Generating -> Completed | Failed
//! Refused | Completed -> Persisting -> Idle | Failed(Persistence)
//! Failed(Persistence) -> Persisting (manual retry)
//! Failed -> Submitted (next submission overwrites the turn)

use std::fmt;

/// Why a turn stopped short of being persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Generation,
    Timeout,
    Persistence,
    /// The submit future was dropped or the view was torn down.
    Cancelled,
}

/// Phase of the current turn of a conversation view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TurnPhase {
    #[default]
    Idle,
    Submitted,
    Refused,
    Generating,
    Completed,
    Persisting,
    Failed(FailureKind),
}

impl TurnPhase {
    /// Whether a turn is outstanding and new submissions must be rejected.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            TurnPhase::Submitted
                | TurnPhase::Refused
                | TurnPhase::Generating
                | TurnPhase::Completed
                | TurnPhase::Persisting
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TurnPhase::Idle => "idle",
            TurnPhase::Submitted => "submitted",
            TurnPhase::Refused => "refused",
            TurnPhase::Generating => "generating",
            TurnPhase::Completed => "completed",
            TurnPhase::Persisting => "persisting",
            TurnPhase::Failed(FailureKind::Generation) => "failed(generation)",
            TurnPhase::Failed(FailureKind::Timeout) => "failed(timeout)",
            TurnPhase::Failed(FailureKind::Persistence) => "failed(persistence)",
            TurnPhase::Failed(FailureKind::Cancelled) => "failed(cancelled)",
        }
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `from -> to` is an allowed phase change.
pub fn is_valid_transition(from: TurnPhase, to: TurnPhase) -> bool {
    use TurnPhase::*;

    if from.is_busy() && to == Failed(FailureKind::Cancelled) {
        return true;
    }

    matches!(
        (from, to),
        (Idle, Submitted)
            | (Failed(_), Submitted)
            | (Submitted, Refused)
            | (Submitted, Generating)
            | (Generating, Completed)
            | (Generating, Failed(FailureKind::Generation))
            | (Generating, Failed(FailureKind::Timeout))
            | (Refused, Persisting)
            | (Completed, Persisting)
            | (Persisting, Idle)
            | (Persisting, Failed(FailureKind::Persistence))
            | (Failed(FailureKind::Persistence), Persisting)
    )
}
