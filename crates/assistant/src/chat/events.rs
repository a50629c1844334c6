use crate::chat::message::{Message, TurnOutcome};

/// Input events sent from the presentation layer to a chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// The user pressed send with this raw input.
    Submit(String),
    /// The widget was closed; any in-flight turn is cancelled.
    Close,
}

/// Immutable view of the conversation handed to renderers.
///
/// The session publishes one after every state change, including each applied fragment,
/// but a subscriber that falls behind only observes the latest one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConversationSnapshot {
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub last_outcome: Option<TurnOutcome>,
}

impl ConversationSnapshot {
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Input should be disabled while this is false.
    pub fn accepts_input(&self) -> bool {
        !self.is_loading
    }
}
