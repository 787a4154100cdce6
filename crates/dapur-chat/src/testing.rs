//! Scripted collaborators for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dapur_core::types::{Conversation, TurnRecord};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::controller::TurnObserver;
use crate::error::ChatError;
use crate::generation::{DeltaStream, GenerationBackend, GenerationSession, PromptPayload};
use crate::persistence::{Acknowledgement, PersistenceGateway};
use crate::phase::TurnPhase;

/// One step of a scripted generation stream.
#[derive(Clone)]
pub enum Step {
    Delta(String),
    Fail(String),
    /// Block until the gate is notified.
    Wait(Arc<Notify>),
}

/// Backend that replays the same script on every call.
pub struct ScriptedBackend {
    script: Vec<Step>,
    start_error: Option<String>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<PromptPayload>>,
    sessions: Mutex<Vec<GenerationSession>>,
}

impl ScriptedBackend {
    pub fn with_script(script: Vec<Step>) -> Self {
        Self {
            script,
            start_error: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(deltas: &[&str]) -> Self {
        Self::with_script(deltas.iter().map(|d| Step::Delta(d.to_string())).collect())
    }

    pub fn refusing_to_start(reason: &str) -> Self {
        Self {
            start_error: Some(reason.to_string()),
            ..Self::with_script(vec![])
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<PromptPayload> {
        self.prompts.lock().unwrap().last().cloned()
    }

    pub fn last_session(&self) -> Option<GenerationSession> {
        self.sessions.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn stream(
        &self,
        session: &GenerationSession,
        prompt: &PromptPayload,
    ) -> Result<DeltaStream, ChatError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        self.sessions.lock().unwrap().push(session.clone());

        if let Some(reason) = &self.start_error {
            return Err(ChatError::Generation(reason.clone()));
        }

        let steps = self.script.clone();
        let stream = async_stream::stream! {
            for step in steps {
                match step {
                    Step::Delta(text) => {
                        yield Ok(text);
                    }
                    Step::Fail(reason) => {
                        yield Err(ChatError::Generation(reason));
                        break;
                    }
                    Step::Wait(gate) => gate.notified().await,
                }
            }
        };
        let deltas: DeltaStream = Box::pin(stream);
        Ok(deltas)
    }
}

/// In-memory gateway recording every append and invalidation.
#[derive(Default)]
pub struct MemoryGateway {
    appended: Mutex<Vec<(String, TurnRecord)>>,
    invalidated: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    failures_left: AtomicUsize,
    hold: Option<Arc<Notify>>,
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` appends.
    pub fn failing(n: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    /// Block every append until the gate is notified.
    pub fn holding(gate: Arc<Notify>) -> Self {
        Self {
            hold: Some(gate),
            ..Self::default()
        }
    }

    pub fn with_conversation(self, conversation: Conversation) -> Self {
        self.conversations
            .lock()
            .unwrap()
            .insert(conversation.id.clone(), conversation);
        self
    }

    pub fn appended(&self) -> Vec<(String, TurnRecord)> {
        self.appended.lock().unwrap().clone()
    }

    pub fn invalidated(&self) -> Vec<String> {
        self.invalidated.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn append_turn(
        &self,
        conversation_id: &str,
        record: &TurnRecord,
    ) -> Result<Acknowledgement, ChatError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.hold {
            gate.notified().await;
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ChatError::Persistence("HTTP 503: unavailable".to_string()));
        }
        self.appended
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), record.clone()));
        Ok(Acknowledgement {
            body: serde_json::json!({ "ok": true }),
        })
    }

    fn invalidate(&self, conversation_id: &str) {
        self.invalidated
            .lock()
            .unwrap()
            .push(conversation_id.to_string());
    }

    async fn load_conversation(&self, conversation_id: &str) -> Result<Conversation, ChatError> {
        self.conversations
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| ChatError::Persistence(format!("HTTP 404: {conversation_id}")))
    }
}

/// Observer that records everything it is told.
#[derive(Default)]
pub struct RecordingObserver {
    phases: Mutex<Vec<TurnPhase>>,
    buffers: Mutex<Vec<String>>,
    deltas: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn phases(&self) -> Vec<TurnPhase> {
        self.phases.lock().unwrap().clone()
    }

    pub fn buffers(&self) -> Vec<String> {
        self.buffers.lock().unwrap().clone()
    }

    pub fn deltas(&self) -> Vec<String> {
        self.deltas.lock().unwrap().clone()
    }
}

impl TurnObserver for RecordingObserver {
    fn on_phase(&self, _turn_id: Uuid, phase: TurnPhase) {
        self.phases.lock().unwrap().push(phase);
    }

    fn on_delta(&self, _turn_id: Uuid, delta: &str, buffer: &str) {
        self.deltas.lock().unwrap().push(delta.to_string());
        self.buffers.lock().unwrap().push(buffer.to_string());
    }
}
