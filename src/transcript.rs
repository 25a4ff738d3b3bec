//! Append-only conversation transcript.

use std::io::Write;

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    /// The human user (typed or voice-derived).
    User,
    /// The remote assistant.
    Assistant,
}

/// One immutable line of the conversation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    /// Who said it.
    pub speaker: Speaker,
    /// What was said.
    pub text: String,
}

impl TranscriptEntry {
    /// Entry for a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
        }
    }

    /// Entry for an assistant reply.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: text.into(),
        }
    }
}

/// Sink for transcript entries. Implementations render each entry at the
/// end of the visible log; they carry no coordination logic.
pub trait TranscriptSink: Send {
    /// Append one entry to the end of the log.
    fn append(&mut self, entry: TranscriptEntry);
}

/// Console transcript: prints each entry as a `you>` / `voxa>` line.
#[derive(Debug, Default)]
pub struct ConsoleTranscript;

impl TranscriptSink for ConsoleTranscript {
    fn append(&mut self, entry: TranscriptEntry) {
        let prefix = match entry.speaker {
            Speaker::User => "you",
            Speaker::Assistant => "voxa",
        };
        println!("{prefix}> {}", entry.text);
        let _ = std::io::stdout().flush();
    }
}
