//! Speech capability controllers.
//!
//! [`output`] owns the single live audio playback; [`input`] owns the
//! single live recognition session. Both sit on trait seams so the
//! coordinator can be tested without audio hardware or a speech engine.

pub mod input;
pub mod output;

pub use input::{NullRecognizer, RecognitionBackend, SpeechInput};
pub use output::{AudioBackend, HttpAudioBackend, PlaybackHandle, SpeechOutput};
