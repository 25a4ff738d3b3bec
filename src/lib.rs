//! Voxa: voice-capable chat client with turn-coordinated race control.
//!
//! One coordinator task sequences each conversation turn:
//! submit → await reply → speak → auto-listen. A newer submission
//! supersedes all older turns synchronously, and every asynchronous
//! completion (network reply, playback end, timer fire, recognition
//! result) is gated on the turn id it was started under, so a slow stale
//! reply is never shown or spoken after a faster newer one.
//!
//! # Architecture
//!
//! - **Transport client**: `POST /ask` over `reqwest`, behind the
//!   [`transport::ChatTransport`] seam
//! - **Speech output**: at most one live playback (symphonia decode,
//!   `cpal` output), behind [`speech::AudioBackend`]
//! - **Speech input**: at most one recognition session, behind
//!   [`speech::RecognitionBackend`]
//! - **Turn coordinator**: the race-control state machine driven by an
//!   internal event queue
//! - **Transcript**: append-only sink of user/assistant entries

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod speech;
pub mod transcript;
pub mod transport;
pub mod turn;

pub use config::ClientConfig;
pub use coordinator::{ConversationCoordinator, ConversationHandle};
pub use error::{Result, VoxaError};
pub use events::RuntimeEvent;
pub use transcript::{Speaker, TranscriptEntry, TranscriptSink};
pub use transport::{ChatReply, ChatTransport, HttpChatClient};
pub use turn::{Turn, TurnId, TurnStatus};
