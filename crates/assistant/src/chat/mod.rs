/// Conversation state machine.
pub mod controller;
/// Event contracts between the session and its presentation layer.
pub mod events;
/// Domain entities and turn state boundaries.
pub mod message;
pub mod session;

pub use controller::{ConversationController, EventOutcome, PendingTurn};
pub use events::{ConversationSnapshot, SessionCommand};
pub use message::{
    Conversation, FailureKind, Message, MessageId, Role, SubmitRejection, TurnOutcome, TurnState,
};
pub use session::{COMMAND_CHANNEL_CAPACITY, ChatSession, SessionError, SessionResult};
