//! Runtime events emitted by the coordinator for UI and observability.
//!
//! Intentionally lightweight (no heavy payloads) so the coordinator can
//! emit status changes without blocking the event loop.

/// Events that describe what the client is doing "right now".
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// Whether a reply is currently being awaited from the chat endpoint.
    AwaitingReply { active: bool },
    /// Whether a voice recognition session is currently open.
    Listening { active: bool },
    /// One-off user-visible notice (e.g. voice input unavailable).
    Notice(String),
}
