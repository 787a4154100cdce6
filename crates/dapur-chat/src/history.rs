//! Conversion of stored conversation turns into generation history.

use dapur_core::types::{Role, StoredTurn};
use serde::{Deserialize, Serialize};

/// One history entry in the shape the generation backend expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationTurn {
    pub role: Role,
    /// Text items of the turn. Normalized turns always carry exactly one.
    pub content: Vec<String>,
}

impl GenerationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![text.into()],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![text.into()],
        }
    }
}

// =============================================================================
// HistoryNormalizer
// =============================================================================

/// Maps stored turns onto generation history.
///
/// Total: a turn with missing or empty text becomes a single empty-text item,
/// never dropped. Order is preserved.
pub struct HistoryNormalizer;

impl HistoryNormalizer {
    pub fn normalize(&self, stored: &[StoredTurn]) -> Vec<GenerationTurn> {
        stored
            .iter()
            .map(|turn| GenerationTurn {
                role: Role::from_stored(&turn.role),
                content: vec![turn.first_text().unwrap_or_default().to_string()],
            })
            .collect()
    }
}
