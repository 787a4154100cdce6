//! Turn controller: the submit, gate, generate, persist pipeline of one
//! mounted conversation view.
//!
//! One controller exists per view. It owns the generation session, the
//! in-flight turn and the resume guard, and talks to the outside world only
//! through [`GenerationBackend`] and [`PersistenceGateway`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dapur_core::config::DapurConfig;
use dapur_core::types::{Conversation, TurnRecord};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::attachment::{AttachmentState, UploadedAttachment};
use crate::classifier::TopicClassifier;
use crate::error::ChatError;
use crate::generation::{GenerationBackend, GenerationSession, PromptPayload, SamplingConfig};
use crate::history::HistoryNormalizer;
use crate::persistence::PersistenceGateway;
use crate::phase::{is_valid_transition, FailureKind, TurnPhase};
use crate::refusal::RefusalSelector;
use crate::stream::StreamAggregator;

/// Live view of a turn: phase changes and streamed text.
///
/// Called outside the controller's locks, so implementations may read the
/// controller back.
pub trait TurnObserver: Send + Sync {
    fn on_phase(&self, _turn_id: Uuid, _phase: TurnPhase) {}

    /// `buffer` is the whole answer so far, `delta` included.
    fn on_delta(&self, _turn_id: Uuid, _delta: &str, _buffer: &str) {}
}

/// The turn currently being asked, answered or saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightTurn {
    /// Correlates the log lines of one submit-to-persist cycle.
    pub id: Uuid,
    pub question: String,
    /// Grows while the answer streams in.
    pub answer: String,
    pub attachment: AttachmentState,
}

/// How a turn was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Off-topic question; the answer is a canned refusal.
    Refused { answer: String },
    /// Answer produced by the generation backend.
    Answered { answer: String },
}

impl TurnOutcome {
    pub fn answer(&self) -> &str {
        match self {
            TurnOutcome::Refused { answer } | TurnOutcome::Answered { answer } => answer,
        }
    }
}

struct ViewState {
    phase: TurnPhase,
    in_flight: Option<InFlightTurn>,
    /// Attachment staged for the next (or current) turn.
    attachment: AttachmentState,
    /// Final record kept after a failed append, for manual retry.
    retained: Option<TurnRecord>,
    session: GenerationSession,
}

/// Marks the view busy for the lifetime of one turn.
///
/// Dropping a submit future mid-turn would otherwise leave the phase busy
/// forever; the slot moves it to `Failed(Cancelled)` instead.
struct TurnSlot<'a> {
    controller: &'a TurnController,
    turn_id: Uuid,
}

impl Drop for TurnSlot<'_> {
    fn drop(&mut self) {
        if self.controller.cancel.is_cancelled() {
            return;
        }
        let abandoned = {
            let mut view = self.controller.view();
            if view.phase.is_busy() {
                apply_phase(&mut view, TurnPhase::Failed(FailureKind::Cancelled));
                true
            } else {
                false
            }
        };
        if abandoned {
            tracing::warn!(turn_id = %self.turn_id, "Turn abandoned before it finished");
            self.controller
                .notify_phase(self.turn_id, TurnPhase::Failed(FailureKind::Cancelled));
        }
    }
}

fn apply_phase(view: &mut ViewState, to: TurnPhase) {
    if !is_valid_transition(view.phase, to) {
        tracing::warn!(from = %view.phase, to = %to, "Unexpected turn phase transition");
    }
    view.phase = to;
}

// =============================================================================
// TurnController
// =============================================================================

/// Per-view turn state machine.
pub struct TurnController {
    conversation_id: String,
    /// Unanswered first question of a new conversation.
    seed_question: Option<String>,
    classifier: TopicClassifier,
    refusals: RefusalSelector,
    system_instruction: String,
    idle_timeout: Option<Duration>,
    backend: Arc<dyn GenerationBackend>,
    gateway: Arc<dyn PersistenceGateway>,
    view: Mutex<ViewState>,
    rng: Mutex<StdRng>,
    resumed: AtomicBool,
    cancel: CancellationToken,
    observer: Option<Arc<dyn TurnObserver>>,
}

impl TurnController {
    /// Mount a view over a loaded conversation.
    ///
    /// The generation session is built here, once, from every stored turn.
    /// A pending seed question stays in that history; [`resume`](Self::resume)
    /// leaves it out only for the call that sends it as the prompt.
    pub fn mount(
        config: &DapurConfig,
        conversation: &Conversation,
        backend: Arc<dyn GenerationBackend>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Result<Self, ChatError> {
        let classifier = TopicClassifier::new(&config.gate)?;
        let refusals = RefusalSelector::new(&config.refusal)?;

        let seed_question = conversation.pending_seed_question().map(str::to_string);
        let history = HistoryNormalizer.normalize(&conversation.history);

        tracing::info!(
            conversation_id = %conversation.id,
            history_turns = history.len(),
            awaiting_first_answer = seed_question.is_some(),
            "Conversation view mounted"
        );

        let session = GenerationSession::new(history, SamplingConfig::from(&config.generation));
        Ok(Self {
            conversation_id: conversation.id.clone(),
            seed_question,
            classifier,
            refusals,
            system_instruction: config.generation.system_instruction.clone(),
            idle_timeout: config
                .generation
                .stream_idle_timeout_secs
                .map(Duration::from_secs),
            backend,
            gateway,
            view: Mutex::new(ViewState {
                phase: TurnPhase::Idle,
                in_flight: None,
                attachment: AttachmentState::default(),
                retained: None,
                session,
            }),
            rng: Mutex::new(StdRng::from_os_rng()),
            resumed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            observer: None,
        })
    }

    /// Replace the randomness source used for refusals.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn TurnObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn phase(&self) -> TurnPhase {
        self.view().phase
    }

    pub fn in_flight(&self) -> Option<InFlightTurn> {
        self.view().in_flight.clone()
    }

    pub fn attachment(&self) -> AttachmentState {
        self.view().attachment.clone()
    }

    /// History the next generation call will see.
    pub fn session(&self) -> GenerationSession {
        self.view().session.clone()
    }

    pub fn is_torn_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // -------------------------------------------------------------------------
    // Turns
    // -------------------------------------------------------------------------

    /// Ask a question.
    ///
    /// Off-topic questions get a refusal without calling the backend; either
    /// way the final answer is appended to the conversation. On failure the
    /// in-flight turn stays visible until the next submission.
    pub async fn submit(&self, text: &str) -> Result<TurnOutcome, ChatError> {
        let slot = self.claim_turn(text)?;
        self.run_turn(&slot, text.to_string(), Some(text.to_string()))
            .await
    }

    /// Answer the seed question of a freshly created conversation.
    ///
    /// Runs at most once per view. The stored question is not sent again
    /// when the answer is persisted. Returns `None` when there was nothing to
    /// resume or the resume already ran.
    pub async fn resume(&self) -> Result<Option<TurnOutcome>, ChatError> {
        self.ensure_mounted()?;
        if self.resumed.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        let Some(seed) = self.seed_question.clone() else {
            return Ok(None);
        };

        tracing::info!(conversation_id = %self.conversation_id, "Answering seed question");
        let slot = self.claim_turn(&seed)?;
        self.run_turn(&slot, seed, None).await.map(Some)
    }

    /// Re-send the answer whose append failed.
    pub async fn retry_persistence(&self) -> Result<(), ChatError> {
        self.ensure_mounted()?;
        let (slot, record) = {
            let mut view = self.view();
            let record = match (view.phase, &view.retained) {
                (TurnPhase::Failed(FailureKind::Persistence), Some(record)) => record.clone(),
                _ => return Err(ChatError::NothingToRetry),
            };
            let turn_id = view
                .in_flight
                .as_ref()
                .map(|turn| turn.id)
                .unwrap_or_else(Uuid::new_v4);
            apply_phase(&mut view, TurnPhase::Persisting);
            (
                TurnSlot {
                    controller: self,
                    turn_id,
                },
                record,
            )
        };
        self.notify_phase(slot.turn_id, TurnPhase::Persisting);

        tracing::info!(
            turn_id = %slot.turn_id,
            conversation_id = %self.conversation_id,
            "Retrying turn persistence"
        );
        self.persist(slot.turn_id, &record).await
    }

    /// Unmount the view.
    ///
    /// Generation in progress stops at its next suspension point. A
    /// persistence call already sent is allowed to land, but its result no
    /// longer touches view state. Every later call fails with `TornDown`.
    pub fn teardown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        tracing::info!(conversation_id = %self.conversation_id, "Conversation view torn down");
    }

    // -------------------------------------------------------------------------
    // Attachment
    // -------------------------------------------------------------------------

    /// Note that an upload has started; submissions wait for it.
    pub fn begin_attachment(&self) -> Result<(), ChatError> {
        self.ensure_mounted()?;
        let mut view = self.view();
        if view.phase.is_busy() {
            return Err(ChatError::TurnInProgress);
        }
        view.attachment.begin_upload()
    }

    pub fn commit_attachment(&self, uploaded: UploadedAttachment) -> Result<(), ChatError> {
        self.ensure_mounted()?;
        let mut view = self.view();
        if view.phase.is_busy() {
            return Err(ChatError::TurnInProgress);
        }
        tracing::info!(
            conversation_id = %self.conversation_id,
            file_path = %uploaded.file_path,
            mime_type = %uploaded.generation_payload.mime_type,
            "Attachment committed"
        );
        view.attachment.commit(uploaded);
        Ok(())
    }

    /// The next turn goes out without an attachment.
    pub fn fail_attachment(&self, reason: &str) -> Result<(), ChatError> {
        self.ensure_mounted()?;
        tracing::warn!(conversation_id = %self.conversation_id, reason, "Attachment upload failed");
        self.view().attachment.fail(reason);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Pipeline
    // -------------------------------------------------------------------------

    fn claim_turn(&self, question: &str) -> Result<TurnSlot<'_>, ChatError> {
        self.ensure_mounted()?;
        if question.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let turn_id = Uuid::new_v4();
        {
            let mut view = self.view();
            if view.phase.is_busy() {
                return Err(ChatError::TurnInProgress);
            }
            if view.attachment.is_pending() {
                return Err(ChatError::AttachmentPending);
            }
            apply_phase(&mut view, TurnPhase::Submitted);
            let attachment = view.attachment.clone();
            view.retained = None;
            view.in_flight = Some(InFlightTurn {
                id: turn_id,
                question: question.to_string(),
                answer: String::new(),
                attachment,
            });
        }

        tracing::info!(
            turn_id = %turn_id,
            conversation_id = %self.conversation_id,
            question_len = question.len(),
            "Turn submitted"
        );
        self.notify_phase(turn_id, TurnPhase::Submitted);
        Ok(TurnSlot {
            controller: self,
            turn_id,
        })
    }

    async fn run_turn(
        &self,
        slot: &TurnSlot<'_>,
        question: String,
        persisted_question: Option<String>,
    ) -> Result<TurnOutcome, ChatError> {
        let turn_id = slot.turn_id;
        let (img, attachment) = {
            let view = self.view();
            (
                view.attachment.storage_path().map(str::to_string),
                view.attachment.generation_payload().cloned(),
            )
        };

        if !self.classifier.classify(&question) {
            let answer = self.pick_refusal();
            tracing::info!(
                turn_id = %turn_id,
                conversation_id = %self.conversation_id,
                "Question refused by topic gate"
            );
            {
                let mut view = self.view();
                if let Some(turn) = view.in_flight.as_mut() {
                    turn.answer = answer.clone();
                }
                apply_phase(&mut view, TurnPhase::Refused);
            }
            self.notify_phase(turn_id, TurnPhase::Refused);

            let record = TurnRecord {
                question: persisted_question,
                answer: answer.clone(),
                img,
            };
            self.enter_persisting(turn_id, &record);
            self.persist(turn_id, &record).await?;
            return Ok(TurnOutcome::Refused { answer });
        }

        // A resumed seed question is already the last history turn.
        let resuming = persisted_question.is_none();
        self.set_phase(turn_id, TurnPhase::Generating);
        let session = if resuming {
            self.session().without_pending_question()
        } else {
            self.session()
        };
        let prompt = PromptPayload::compose(&self.system_instruction, &question, attachment);

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ChatError::TornDown),
            result = self.generate(turn_id, &session, &prompt) => result,
        };

        let answer = match result {
            Ok(answer) => answer,
            Err(ChatError::TornDown) => {
                tracing::info!(turn_id = %turn_id, "Generation stopped by teardown");
                return Err(ChatError::TornDown);
            }
            Err(e) => {
                let kind = match e {
                    ChatError::Timeout(_) => FailureKind::Timeout,
                    _ => FailureKind::Generation,
                };
                tracing::warn!(
                    turn_id = %turn_id,
                    conversation_id = %self.conversation_id,
                    error = %e,
                    "Generation failed; turn not persisted"
                );
                self.set_phase(turn_id, TurnPhase::Failed(kind));
                return Err(e);
            }
        };

        {
            let mut view = self.view();
            if resuming {
                view.session.record_answer(&answer);
            } else {
                view.session.record_exchange(&question, &answer);
            }
            apply_phase(&mut view, TurnPhase::Completed);
        }
        self.notify_phase(turn_id, TurnPhase::Completed);
        tracing::info!(
            turn_id = %turn_id,
            answer_len = answer.len(),
            "Answer generated"
        );

        let record = TurnRecord {
            question: persisted_question,
            answer: answer.clone(),
            img,
        };
        self.enter_persisting(turn_id, &record);
        self.persist(turn_id, &record).await?;
        Ok(TurnOutcome::Answered { answer })
    }

    async fn generate(
        &self,
        turn_id: Uuid,
        session: &GenerationSession,
        prompt: &PromptPayload,
    ) -> Result<String, ChatError> {
        let mut aggregator =
            StreamAggregator::begin(self.backend.as_ref(), session, prompt, self.idle_timeout)
                .await?;
        while let Some(delta) = aggregator.next_delta().await? {
            self.show_delta(turn_id, &delta, aggregator.buffer());
        }
        aggregator
            .into_answer()
            .ok_or_else(|| ChatError::Generation("stream ended without an answer".to_string()))
    }

    fn show_delta(&self, turn_id: Uuid, delta: &str, buffer: &str) {
        {
            let mut view = self.view();
            if let Some(turn) = view.in_flight.as_mut().filter(|t| t.id == turn_id) {
                turn.answer = buffer.to_string();
            }
        }
        if let Some(observer) = &self.observer {
            observer.on_delta(turn_id, delta, buffer);
        }
    }

    fn enter_persisting(&self, turn_id: Uuid, record: &TurnRecord) {
        {
            let mut view = self.view();
            view.retained = Some(record.clone());
            apply_phase(&mut view, TurnPhase::Persisting);
        }
        self.notify_phase(turn_id, TurnPhase::Persisting);
    }

    /// Append the final record, then invalidate and reset.
    ///
    /// Invalidation precedes clearing the in-flight turn, and only follows a
    /// successful append.
    async fn persist(&self, turn_id: Uuid, record: &TurnRecord) -> Result<(), ChatError> {
        match self.gateway.append_turn(&self.conversation_id, record).await {
            Ok(_ack) => {
                self.gateway.invalidate(&self.conversation_id);
                if self.cancel.is_cancelled() {
                    tracing::debug!(turn_id = %turn_id, "Turn persisted after teardown");
                    return Ok(());
                }
                {
                    let mut view = self.view();
                    // Only the attachment this turn carried is used up.
                    let used = view
                        .in_flight
                        .as_ref()
                        .is_some_and(|turn| turn.attachment == view.attachment);
                    if used {
                        view.attachment = AttachmentState::default();
                    }
                    view.retained = None;
                    view.in_flight = None;
                    apply_phase(&mut view, TurnPhase::Idle);
                }
                self.notify_phase(turn_id, TurnPhase::Idle);
                tracing::info!(
                    turn_id = %turn_id,
                    conversation_id = %self.conversation_id,
                    "Turn complete"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    turn_id = %turn_id,
                    conversation_id = %self.conversation_id,
                    error = %e,
                    "Persistence failed; answer kept for retry"
                );
                if !self.cancel.is_cancelled() {
                    self.set_phase(turn_id, TurnPhase::Failed(FailureKind::Persistence));
                }
                Err(e)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn view(&self) -> MutexGuard<'_, ViewState> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_mounted(&self) -> Result<(), ChatError> {
        if self.cancel.is_cancelled() {
            Err(ChatError::TornDown)
        } else {
            Ok(())
        }
    }

    fn set_phase(&self, turn_id: Uuid, to: TurnPhase) {
        apply_phase(&mut self.view(), to);
        self.notify_phase(turn_id, to);
    }

    fn notify_phase(&self, turn_id: Uuid, phase: TurnPhase) {
        if self.cancel.is_cancelled() {
            return;
        }
        if let Some(observer) = &self.observer {
            observer.on_phase(turn_id, phase);
        }
    }

    fn pick_refusal(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        self.refusals.select(&mut *rng).to_string()
    }
}
