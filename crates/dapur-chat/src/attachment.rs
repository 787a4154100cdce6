//! Attachment state for the in-flight turn.
//!
//! The upload itself happens in an external collaborator; this module only
//! tracks its progress and keeps the two things the core consumes: the
//! storage locator (persisted with the turn) and the model-ready payload
//! (sent with the prompt).

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Attachment bytes in the form the generation backend accepts inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineAttachment {
    pub mime_type: String,
    /// Base64-encoded content.
    pub data: String,
}

impl InlineAttachment {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: STANDARD.encode(bytes),
        }
    }
}

/// What the upload collaborator hands back on completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedAttachment {
    /// Storage locator, persisted with the turn.
    pub file_path: String,
    pub generation_payload: InlineAttachment,
}

/// Progress of the attachment upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UploadState {
    #[default]
    Idle,
    Uploading,
    Committed,
    Failed(String),
}

/// Attachment slot of an in-flight turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentState {
    upload: UploadState,
    storage_path: Option<String>,
    payload: Option<InlineAttachment>,
}

impl AttachmentState {
    pub fn upload_state(&self) -> &UploadState {
        &self.upload
    }

    /// Whether an upload has started but not finished.
    pub fn is_pending(&self) -> bool {
        self.upload == UploadState::Uploading
    }

    /// Mark an upload as started. Any previous attachment is discarded.
    pub fn begin_upload(&mut self) -> Result<(), ChatError> {
        if self.is_pending() {
            return Err(ChatError::AttachmentPending);
        }
        *self = Self {
            upload: UploadState::Uploading,
            ..Self::default()
        };
        Ok(())
    }

    /// Record a finished upload.
    pub fn commit(&mut self, uploaded: UploadedAttachment) {
        self.upload = UploadState::Committed;
        self.storage_path = Some(uploaded.file_path);
        self.payload = Some(uploaded.generation_payload);
    }

    /// Record a failed upload; the turn proceeds without an attachment.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.upload = UploadState::Failed(reason.into());
        self.storage_path = None;
        self.payload = None;
    }

    /// Storage locator of a committed attachment.
    pub fn storage_path(&self) -> Option<&str> {
        match self.upload {
            UploadState::Committed => self.storage_path.as_deref(),
            _ => None,
        }
    }

    /// Model-ready payload of a committed attachment.
    pub fn generation_payload(&self) -> Option<&InlineAttachment> {
        match self.upload {
            UploadState::Committed => self.payload.as_ref(),
            _ => None,
        }
    }
}

/// Best-effort MIME type from a file extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        Some("heif") => "image/heif",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uploaded() -> UploadedAttachment {
        UploadedAttachment {
            file_path: "/uploads/nasi.png".to_string(),
            generation_payload: InlineAttachment::from_bytes("image/png", b"\x89PNG"),
        }
    }

    #[test]
    fn test_default_is_idle_and_empty() {
        let state = AttachmentState::default();
        assert_eq!(state.upload_state(), &UploadState::Idle);
        assert!(!state.is_pending());
        assert!(state.storage_path().is_none());
        assert!(state.generation_payload().is_none());
    }

    #[test]
    fn test_begin_then_commit() {
        let mut state = AttachmentState::default();
        state.begin_upload().unwrap();
        assert!(state.is_pending());
        assert!(state.storage_path().is_none());

        state.commit(uploaded());
        assert!(!state.is_pending());
        assert_eq!(state.storage_path(), Some("/uploads/nasi.png"));
        assert_eq!(state.generation_payload().unwrap().mime_type, "image/png");
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let mut state = AttachmentState::default();
        state.begin_upload().unwrap();
        assert!(matches!(
            state.begin_upload(),
            Err(ChatError::AttachmentPending)
        ));
    }

    #[test]
    fn test_begin_discards_previous_attachment() {
        let mut state = AttachmentState::default();
        state.commit(uploaded());
        state.begin_upload().unwrap();
        assert!(state.storage_path().is_none());
        assert!(state.generation_payload().is_none());
    }

    #[test]
    fn test_fail_clears_attachment() {
        let mut state = AttachmentState::default();
        state.begin_upload().unwrap();
        state.fail("quota exceeded");
        assert_eq!(
            state.upload_state(),
            &UploadState::Failed("quota exceeded".to_string())
        );
        assert!(!state.is_pending());
        assert!(state.generation_payload().is_none());
    }

    #[test]
    fn test_inline_attachment_is_base64() {
        let inline = InlineAttachment::from_bytes("image/jpeg", b"hello");
        assert_eq!(inline.data, "aGVsbG8=");
    }

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("a/b/photo.JPG")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("x.png")), "image/png");
        assert_eq!(mime_for_path(Path::new("x.webp")), "image/webp");
        assert_eq!(mime_for_path(Path::new("noext")), "application/octet-stream");
    }
}
