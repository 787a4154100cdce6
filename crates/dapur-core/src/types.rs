use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Roles
// =============================================================================

/// Author of a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person asking questions.
    User,
    /// The assistant. Stored conversations call this role `model`.
    #[serde(alias = "model")]
    Assistant,
}

impl Role {
    /// Map a stored role string onto a [`Role`].
    ///
    /// Only `user` (any casing) is the user; every other value, including
    /// unknown ones, is treated as the assistant.
    pub fn from_stored(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("user") {
            Role::User
        } else {
            Role::Assistant
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Stored conversation (wire shape returned by the chat backend)
// =============================================================================

/// Decode an explicit `null` the same way as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Like [`null_as_default`], also for `null` entries inside the list.
fn parts_or_default<'de, D>(deserializer: D) -> Result<Vec<StoredPart>, D::Error>
where
    D: Deserializer<'de>,
{
    let parts: Option<Vec<Option<StoredPart>>> = Option::deserialize(deserializer)?;
    Ok(parts
        .unwrap_or_default()
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect())
}

/// One content part of a stored turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredPart {
    pub text: Option<String>,
}

/// A turn as the chat backend stores it.
///
/// Every field is optional on the wire so that a malformed record still
/// decodes; normalization degrades missing text to an empty string.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredTurn {
    #[serde(deserialize_with = "null_as_default")]
    pub role: String,
    #[serde(deserialize_with = "parts_or_default")]
    pub parts: Vec<StoredPart>,
    /// Storage locator of an attached image, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl StoredTurn {
    /// Text of the first part, or `None` when missing or empty.
    pub fn first_text(&self) -> Option<&str> {
        self.parts
            .first()
            .and_then(|p| p.text.as_deref())
            .filter(|t| !t.is_empty())
    }

    /// Convert into the domain [`ConversationTurn`].
    pub fn to_turn(&self) -> ConversationTurn {
        ConversationTurn {
            role: Role::from_stored(&self.role),
            text: self.first_text().unwrap_or_default().to_string(),
            attachment_ref: self.img.clone(),
        }
    }
}

/// A conversation snapshot owned by the persistence backend.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub history: Vec<StoredTurn>,
}

impl Conversation {
    /// The unanswered seed question of a freshly created conversation.
    ///
    /// A conversation is awaiting its first answer when it holds exactly one
    /// stored turn. Returns `None` otherwise, or when that turn has no text.
    pub fn pending_seed_question(&self) -> Option<&str> {
        match self.history.as_slice() {
            [seed] => seed.first_text(),
            _ => None,
        }
    }

    /// Domain view of the stored turns, in conversation order.
    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.history.iter().map(StoredTurn::to_turn).collect()
    }
}

// =============================================================================
// Domain turn
// =============================================================================

/// An immutable, persisted conversation turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_ref: Option<String>,
}

// =============================================================================
// Turn append payload
// =============================================================================

/// Body of the turn-append call (`PUT /api/chats/{id}`).
///
/// `question` is omitted when answering the stored seed question, since it
/// already exists in storage. `img` is the attachment's storage locator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
}
