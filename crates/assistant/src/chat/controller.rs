use std::sync::Arc;

use hsb_llm::{StreamEventMapped, StreamEventPayload, TurnId};

use crate::chat::events::ConversationSnapshot;
use crate::chat::message::{
    Conversation, FailureKind, Message, MessageId, SubmitRejection, TurnOutcome, TurnState,
};
use crate::persona::Persona;

/// Accepted submission, ready to be sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTurn {
    pub turn: TurnId,
    pub user_message_id: MessageId,
    pub assistant_message_id: MessageId,
    pub prompt: String,
}

/// Result of feeding one stream event to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Fragment appended to the in-flight message.
    Applied,
    /// Turn reached a terminal state and the controller is idle again.
    Finished(TurnOutcome),
    /// Event belongs to a turn that is no longer in flight.
    Ignored,
}

/// Owns the conversation and applies the per-turn state machine.
///
/// Single writer: callers drive it from one task and publish `snapshot()` after each
/// mutating call.
#[derive(Debug, Clone)]
pub struct ConversationController {
    persona: Arc<Persona>,
    conversation: Conversation,
    turn_state: TurnState,
    last_outcome: Option<TurnOutcome>,
    next_message_id: u64,
    next_turn_id: u64,
}

impl ConversationController {
    /// Creates a conversation seeded with the greeting.
    pub fn new(persona: Arc<Persona>) -> Self {
        let mut conversation = Conversation::new();
        conversation.push(Message::assistant(MessageId::new(0), persona.greeting.clone()));

        Self {
            persona,
            conversation,
            turn_state: TurnState::Idle,
            last_outcome: None,
            next_message_id: 1,
            next_turn_id: 1,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn turn_state(&self) -> TurnState {
        self.turn_state
    }

    pub fn last_outcome(&self) -> Option<TurnOutcome> {
        self.last_outcome
    }

    pub fn is_loading(&self) -> bool {
        !self.turn_state.is_idle()
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            messages: self.conversation.messages().to_vec(),
            is_loading: self.is_loading(),
            last_outcome: self.last_outcome,
        }
    }

    /// Validates a submission and, if accepted, appends the user message and the empty
    /// assistant placeholder before any network activity.
    pub fn begin_turn(&mut self, input: &str) -> Result<PendingTurn, SubmitRejection> {
        let prompt = input.trim();
        if prompt.is_empty() {
            return Err(SubmitRejection::EmptyInput);
        }

        if let Some(active) = self.turn_state.active_turn() {
            return Err(SubmitRejection::TurnInFlight { active });
        }

        let turn = self.alloc_turn_id();
        let user_message_id = self.alloc_message_id();
        let assistant_message_id = self.alloc_message_id();

        self.conversation.push(Message::user(user_message_id, prompt));
        self.conversation
            .push(Message::assistant_placeholder(assistant_message_id));
        self.turn_state = TurnState::Streaming {
            turn,
            assistant_message_id,
        };

        Ok(PendingTurn {
            turn,
            user_message_id,
            assistant_message_id,
            prompt: prompt.to_string(),
        })
    }

    pub fn apply_stream_event(&mut self, event: StreamEventMapped) -> EventOutcome {
        if !self.turn_state.accepts_stream_event(event.turn) {
            tracing::trace!(turn = ?event.turn, "dropping stale stream event");
            return EventOutcome::Ignored;
        }

        match event.payload {
            StreamEventPayload::Delta(fragment) => {
                if let Some(message) = self.in_flight_message_mut() {
                    message.text.push_str(&fragment);
                }
                EventOutcome::Applied
            }
            StreamEventPayload::Done => {
                self.finish(TurnOutcome::Completed);
                EventOutcome::Finished(TurnOutcome::Completed)
            }
            StreamEventPayload::Failed => {
                self.fail_turn(event.turn, FailureKind::Transport);
                EventOutcome::Finished(TurnOutcome::Failed(FailureKind::Transport))
            }
        }
    }

    /// Replaces whatever the placeholder holds with fallback text and returns to idle.
    ///
    /// Returns false when `turn` is not the in-flight turn.
    pub fn fail_turn(&mut self, turn: TurnId, kind: FailureKind) -> bool {
        if !self.turn_state.accepts_stream_event(turn) {
            return false;
        }

        let fallback = self.persona.fallback_for(kind);
        if let Some(message) = self.in_flight_message_mut() {
            message.text = fallback;
            message.is_error = true;
        }
        self.finish(TurnOutcome::Failed(kind));
        true
    }

    /// Stops the in-flight turn, keeping any partial text as-is.
    pub fn cancel_turn(&mut self, turn: TurnId) -> bool {
        if !self.turn_state.accepts_stream_event(turn) {
            return false;
        }

        self.finish(TurnOutcome::Cancelled);
        true
    }

    fn finish(&mut self, outcome: TurnOutcome) {
        self.turn_state = TurnState::Idle;
        self.last_outcome = Some(outcome);
    }

    fn in_flight_message_mut(&mut self) -> Option<&mut Message> {
        match self.turn_state {
            TurnState::Streaming {
                assistant_message_id,
                ..
            } => self.conversation.get_mut(assistant_message_id),
            TurnState::Idle => None,
        }
    }

    fn alloc_message_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_message_id);
        self.next_message_id = self.next_message_id.saturating_add(1);
        id
    }

    fn alloc_turn_id(&mut self) -> TurnId {
        let id = TurnId::new(self.next_turn_id);
        self.next_turn_id = self.next_turn_id.saturating_add(1);
        id
    }
}
