//! Turn identity and lifecycle records.
//!
//! A turn is one user-message-to-assistant-reply exchange. Turn ids are
//! monotonically increasing and assigned at submission time; the id compare
//! at completion time is what keeps stale replies from ever being shown.

/// Monotonically increasing identifier for one conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TurnId(pub u64);

impl TurnId {
    /// The id preceding the first real turn.
    pub const ZERO: Self = Self(0);

    /// The id of the turn submitted after this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "turn#{}", self.0)
    }
}

/// Lifecycle state of a turn.
///
/// `Pending` is the only non-terminal state. `Superseded` is reachable from
/// `Pending` only, and only because a newer turn was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// Awaiting the chat endpoint's reply.
    Pending,
    /// A newer turn was submitted before this one completed; its reply,
    /// if it ever arrives, is discarded.
    Superseded,
    /// Reply received and rendered.
    Completed,
    /// Transport failed; a fixed error entry was rendered instead.
    Failed,
}

impl TurnStatus {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Record of a single conversation turn.
#[derive(Debug, Clone)]
pub struct Turn {
    /// Identity assigned at submission.
    pub id: TurnId,
    /// The user's message, trimmed.
    pub input: String,
    /// Current lifecycle state.
    pub status: TurnStatus,
}

impl Turn {
    /// Create a new pending turn.
    pub fn pending(id: TurnId, input: impl Into<String>) -> Self {
        Self {
            id,
            input: input.into(),
            status: TurnStatus::Pending,
        }
    }
}
