use hsb_llm::TurnId;

/// Stable identifier for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Creates a typed message identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

/// One chat bubble.
///
/// Identity and role are fixed at creation; `text` and `is_error` change while the
/// owning turn is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub text: String,
    pub is_error: bool,
}

impl Message {
    pub fn new(id: MessageId, role: Role, text: impl Into<String>) -> Self {
        Self {
            id,
            role,
            text: text.into(),
            is_error: false,
        }
    }

    pub fn user(id: MessageId, text: impl Into<String>) -> Self {
        Self::new(id, Role::User, text)
    }

    pub fn assistant(id: MessageId, text: impl Into<String>) -> Self {
        Self::new(id, Role::Assistant, text)
    }

    /// Creates the empty assistant bubble that fragments are appended to.
    pub fn assistant_placeholder(id: MessageId) -> Self {
        Self::assistant(id, String::new())
    }
}

/// Chronological message list for one mounted widget.
///
/// Append-only: there is no way to remove or reorder entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        // The in-flight message is almost always the tail, so search from the end.
        self.messages.iter_mut().rev().find(|message| message.id == id)
    }
}

/// Why a turn stopped with fallback text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// No credential configured; the network was never touched.
    Unconfigured,
    /// The remote stream could not be opened or broke mid-reply.
    Transport,
}

/// How the most recent turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Failed(FailureKind),
    Cancelled,
}

/// Per-turn state. `Submitting` and `Error` happen inside single controller calls and
/// never rest here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Idle,
    Streaming {
        turn: TurnId,
        assistant_message_id: MessageId,
    },
}

impl TurnState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns the in-flight turn if and only if state is `Streaming`.
    pub fn active_turn(&self) -> Option<TurnId> {
        match self {
            Self::Streaming { turn, .. } => Some(*turn),
            Self::Idle => None,
        }
    }

    /// Returns true when incoming stream data belongs to the in-flight turn.
    pub fn accepts_stream_event(&self, turn: TurnId) -> bool {
        matches!(self, Self::Streaming { turn: active, .. } if *active == turn)
    }
}

/// Rejection reason for a submission that must not start a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitRejection {
    EmptyInput,
    TurnInFlight { active: TurnId },
}
