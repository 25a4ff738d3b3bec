//! Speech input: at most one live recognition session at a time.
//!
//! Starting a session while one is active restarts fresh rather than
//! stacking sessions. Each session yields at most one final transcript
//! (first alternative only); a cancelled session yields nothing.

use crate::error::{Result, VoxaError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Platform speech recognition capability.
#[async_trait]
pub trait RecognitionBackend: Send + Sync {
    /// Whether a recognition engine exists in this environment.
    fn is_available(&self) -> bool;

    /// Run one recognition session until a final transcript, the natural
    /// end of the session, or cancellation. Returns the best transcript,
    /// if the session produced one.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot run; the controller logs it
    /// and treats the session as having produced nothing.
    async fn listen(&self, locale: &str, cancel: CancellationToken) -> Result<Option<String>>;
}

/// Backend for hosts without a speech engine. `start()` on the controller
/// reports the capability as unavailable instead of silently failing.
#[derive(Debug, Default)]
pub struct NullRecognizer;

#[async_trait]
impl RecognitionBackend for NullRecognizer {
    fn is_available(&self) -> bool {
        false
    }

    async fn listen(&self, _locale: &str, _cancel: CancellationToken) -> Result<Option<String>> {
        Err(VoxaError::CapabilityUnavailable(
            "no speech recognition engine on this host".into(),
        ))
    }
}

/// Controller owning the single live recognition session.
pub struct SpeechInput {
    backend: Arc<dyn RecognitionBackend>,
    locale: String,
    current: Option<CancellationToken>,
}

impl SpeechInput {
    /// Create a controller over the given backend, recognizing `locale`.
    pub fn new(backend: Arc<dyn RecognitionBackend>, locale: impl Into<String>) -> Self {
        Self {
            backend,
            locale: locale.into(),
            current: None,
        }
    }

    /// Whether voice input can be started at all.
    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    /// Start a fresh session, cancelling any active one first.
    ///
    /// The returned receiver resolves once with the session's final
    /// transcript (`None` if the session ended without one); a cancelled
    /// session drops the sender without resolving it.
    ///
    /// # Errors
    ///
    /// Returns [`VoxaError::CapabilityUnavailable`] when no recognition
    /// engine exists in this environment.
    pub fn start(&mut self) -> Result<oneshot::Receiver<Option<String>>> {
        if !self.backend.is_available() {
            return Err(VoxaError::CapabilityUnavailable(
                "no speech recognition engine on this host".into(),
            ));
        }

        // Restart-fresh semantics: never stack sessions.
        self.cancel_current();

        let token = CancellationToken::new();
        self.current = Some(token.clone());
        let (tx, rx) = oneshot::channel();
        let backend = Arc::clone(&self.backend);
        let locale = self.locale.clone();
        tokio::spawn(async move {
            let result = backend.listen(&locale, token.clone()).await;
            if token.is_cancelled() {
                debug!("recognition session cancelled, discarding result");
                return;
            }
            let transcript = match result {
                Ok(transcript) => transcript,
                Err(e) => {
                    warn!("recognition session failed: {e}");
                    None
                }
            };
            let _ = tx.send(transcript);
        });
        Ok(rx)
    }

    /// Cancel the active session, if any. Idempotent.
    pub fn cancel_current(&mut self) {
        if let Some(token) = self.current.take() {
            token.cancel();
        }
    }
}
