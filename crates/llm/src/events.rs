/// Identifier for one user turn.
///
/// A fresh id is issued on every submission so events from a terminated turn can be
/// rejected as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub u64);

impl TurnId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Provider-agnostic stream payload.
///
/// `Failed` deliberately carries no upstream detail; the worker logs it instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventPayload {
    Delta(String),
    Done,
    Failed,
}

/// One event routed to the consumer of a turn's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEventMapped {
    pub turn: TurnId,
    pub payload: StreamEventPayload,
}

impl StreamEventMapped {
    pub fn delta(turn: TurnId, text: impl Into<String>) -> Self {
        Self {
            turn,
            payload: StreamEventPayload::Delta(text.into()),
        }
    }

    pub fn done(turn: TurnId) -> Self {
        Self {
            turn,
            payload: StreamEventPayload::Done,
        }
    }

    pub fn failed(turn: TurnId) -> Self {
        Self {
            turn,
            payload: StreamEventPayload::Failed,
        }
    }

    /// Returns true for `Done` and `Failed`, after which no further events arrive.
    pub fn is_terminal(&self) -> bool {
        !matches!(self.payload, StreamEventPayload::Delta(_))
    }
}
