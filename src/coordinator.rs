//! Conversation turn coordination — the race-control core.
//!
//! All inputs (typed submissions, voice-trigger presses, transport
//! completions, playback endings, timer fires, recognition results) arrive
//! as [`ConversationEvent`]s on one queue and are processed by a single
//! coordinator task. Every side-effecting completion carries the turn id
//! captured when its work was started; the handler compares it against the
//! current latest id and discards stale work. In-flight requests are never
//! aborted — only their effects are suppressed.

use crate::config::ClientConfig;
use crate::error::{Result, VoxaError};
use crate::events::RuntimeEvent;
use crate::speech::input::{RecognitionBackend, SpeechInput};
use crate::speech::output::{AudioBackend, SpeechOutput};
use crate::transcript::{TranscriptEntry, TranscriptSink};
use crate::transport::{ChatReply, ChatTransport};
use crate::turn::{Turn, TurnId, TurnStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Channel buffer sizes.
const EVENT_CHANNEL_SIZE: usize = 32;
const RUNTIME_CHANNEL_SIZE: usize = 32;

/// Fixed transcript text shown for a failed turn.
const TRANSPORT_ERROR_TEXT: &str = "Error connecting to server.";

/// Inputs to the coordinator's event loop.
#[derive(Debug)]
pub enum ConversationEvent {
    /// User submitted a typed message.
    Submit { text: String },
    /// User pressed the voice trigger.
    ListenRequested,
    /// Transport call captured under `turn` completed.
    ReplyReady { turn: TurnId, result: Result<ChatReply> },
    /// Audio playback started under `turn` ended naturally.
    PlaybackFinished { turn: TurnId },
    /// Auto-listen timer armed under `turn` fired.
    AutoListen { turn: TurnId },
    /// A recognition session ended, with its final transcript if any.
    Recognized { text: Option<String> },
}

/// Caller-side handle to a running coordinator.
#[derive(Clone)]
pub struct ConversationHandle {
    events_tx: mpsc::Sender<ConversationEvent>,
    runtime_tx: broadcast::Sender<RuntimeEvent>,
    cancel: CancellationToken,
}

impl ConversationHandle {
    /// Submit a typed message.
    pub async fn submit(&self, text: impl Into<String>) {
        let _ = self
            .events_tx
            .send(ConversationEvent::Submit { text: text.into() })
            .await;
    }

    /// Trigger voice input.
    pub async fn listen(&self) {
        let _ = self.events_tx.send(ConversationEvent::ListenRequested).await;
    }

    /// Subscribe to runtime status events.
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.runtime_tx.subscribe()
    }

    /// Stop the coordinator.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// The pending auto-listen timer: zero or one outstanding.
struct AutoListenTimer {
    turn: TurnId,
    cancel: CancellationToken,
}

/// Coordinates turns across transport, speech output and speech input.
pub struct ConversationCoordinator {
    transport: Arc<dyn ChatTransport>,
    output: SpeechOutput,
    input: SpeechInput,
    transcript: Box<dyn TranscriptSink>,
    events_tx: mpsc::Sender<ConversationEvent>,
    events_rx: mpsc::Receiver<ConversationEvent>,
    runtime_tx: broadcast::Sender<RuntimeEvent>,
    /// The single latest-turn counter; every completion is gated on it.
    latest: TurnId,
    turns: Vec<Turn>,
    auto_listen: Option<AutoListenTimer>,
    listen_delay: Duration,
    voice_notice_shown: bool,
    cancel: CancellationToken,
}

impl ConversationCoordinator {
    /// Build a coordinator and its caller handle.
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn ChatTransport>,
        audio: Arc<dyn AudioBackend>,
        recognition: Arc<dyn RecognitionBackend>,
        transcript: Box<dyn TranscriptSink>,
    ) -> (Self, ConversationHandle) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (runtime_tx, _) = broadcast::channel(RUNTIME_CHANNEL_SIZE);
        let cancel = CancellationToken::new();
        let handle = ConversationHandle {
            events_tx: events_tx.clone(),
            runtime_tx: runtime_tx.clone(),
            cancel: cancel.clone(),
        };
        let coordinator = Self {
            transport,
            output: SpeechOutput::new(audio),
            input: SpeechInput::new(recognition, config.listen.locale.clone()),
            transcript,
            events_tx,
            events_rx,
            runtime_tx,
            latest: TurnId::ZERO,
            turns: Vec::new(),
            auto_listen: None,
            listen_delay: Duration::from_millis(config.listen.auto_listen_delay_ms),
            voice_notice_shown: false,
            cancel,
        };
        (coordinator, handle)
    }

    /// Run the event loop until shutdown.
    pub async fn run(mut self) {
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = self.events_rx.recv() => match event {
                    None => break,
                    Some(event) => self.handle_event(event).await,
                }
            }
        }
        self.output.stop_current();
        self.input.cancel_current();
        self.cancel_auto_listen();
        info!("conversation coordinator stopped");
    }

    async fn handle_event(&mut self, event: ConversationEvent) {
        match event {
            ConversationEvent::Submit { text } => self.handle_submit(&text),
            ConversationEvent::ListenRequested => self.start_listening(),
            ConversationEvent::ReplyReady { turn, result } => {
                self.handle_reply(turn, result).await;
            }
            ConversationEvent::PlaybackFinished { turn } => self.handle_playback_finished(turn),
            ConversationEvent::AutoListen { turn } => self.handle_auto_listen(turn),
            ConversationEvent::Recognized { text } => self.handle_recognized(text),
        }
    }

    /// Submit one user message (typed or voice-derived).
    ///
    /// Supersession is synchronous: stale speech is stopped, the pending
    /// auto-listen timer cancelled and the previous turn retired before
    /// the network call is even spawned.
    fn handle_submit(&mut self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            debug!("ignoring empty submission");
            return;
        }

        self.output.stop_current();
        self.cancel_auto_listen();
        self.supersede_pending();

        self.latest = self.latest.next();
        let turn = self.latest;
        self.turns.push(Turn::pending(turn, trimmed));
        self.transcript.append(TranscriptEntry::user(trimmed));
        self.emit(RuntimeEvent::AwaitingReply { active: true });
        info!(%turn, "submitting message");

        let transport = Arc::clone(&self.transport);
        let events_tx = self.events_tx.clone();
        let message = trimmed.to_owned();
        tokio::spawn(async move {
            let result = transport.ask(&message).await;
            let _ = events_tx
                .send(ConversationEvent::ReplyReady { turn, result })
                .await;
        });
    }

    async fn handle_reply(&mut self, turn: TurnId, result: Result<ChatReply>) {
        if turn != self.latest {
            debug!(%turn, latest = %self.latest, "discarding stale reply");
            return;
        }
        self.emit(RuntimeEvent::AwaitingReply { active: false });
        match result {
            Ok(reply) => {
                self.set_status(turn, TurnStatus::Completed);
                self.transcript.append(TranscriptEntry::assistant(reply.text));
                match reply.audio_url {
                    Some(url) => self.start_playback(turn, &url).await,
                    None => self.schedule_auto_listen(turn),
                }
            }
            Err(e) => {
                self.set_status(turn, TurnStatus::Failed);
                warn!(%turn, "transport failed: {e}");
                self.transcript
                    .append(TranscriptEntry::assistant(TRANSPORT_ERROR_TEXT));
            }
        }
    }

    async fn start_playback(&mut self, turn: TurnId, url: &Url) {
        match self.output.play(url).await {
            Ok(finished) => {
                let events_tx = self.events_tx.clone();
                tokio::spawn(async move {
                    // A stopped playback drops the sender without a signal.
                    if finished.await.is_ok() {
                        let _ = events_tx
                            .send(ConversationEvent::PlaybackFinished { turn })
                            .await;
                    }
                });
            }
            Err(e) => {
                // Silent degradation: no audio, but voice input still re-arms.
                warn!(%turn, "playback failed to start: {e}");
                self.schedule_auto_listen(turn);
            }
        }
    }

    fn handle_playback_finished(&mut self, turn: TurnId) {
        if turn != self.latest {
            debug!(%turn, "ignoring playback end for stale turn");
            return;
        }
        self.schedule_auto_listen(turn);
    }

    /// Arm the auto-listen timer for `turn`, replacing any existing timer.
    fn schedule_auto_listen(&mut self, turn: TurnId) {
        self.cancel_auto_listen();
        let cancel = CancellationToken::new();
        self.auto_listen = Some(AutoListenTimer {
            turn,
            cancel: cancel.clone(),
        });
        let events_tx = self.events_tx.clone();
        let delay = self.listen_delay;
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = events_tx.send(ConversationEvent::AutoListen { turn }).await;
                }
            }
        });
    }

    fn cancel_auto_listen(&mut self) {
        if let Some(timer) = self.auto_listen.take() {
            debug!(turn = %timer.turn, "cancelling pending auto-listen");
            timer.cancel.cancel();
        }
    }

    fn handle_auto_listen(&mut self, turn: TurnId) {
        // Re-check the guard at fire time: a newer turn may have started
        // while the timer was counting down.
        if turn != self.latest {
            debug!(%turn, "ignoring auto-listen for stale turn");
            return;
        }
        self.auto_listen = None;
        self.start_listening();
    }

    fn start_listening(&mut self) {
        // Recognition start invalidates any pending auto-listen.
        self.cancel_auto_listen();
        match self.input.start() {
            Ok(outcome) => {
                self.emit(RuntimeEvent::Listening { active: true });
                let events_tx = self.events_tx.clone();
                tokio::spawn(async move {
                    // A cancelled session drops the sender without a result.
                    if let Ok(text) = outcome.await {
                        let _ = events_tx.send(ConversationEvent::Recognized { text }).await;
                    }
                });
            }
            Err(VoxaError::CapabilityUnavailable(reason)) => {
                if !self.voice_notice_shown {
                    self.voice_notice_shown = true;
                    self.emit(RuntimeEvent::Notice(format!(
                        "voice input is not available: {reason}"
                    )));
                }
            }
            Err(e) => warn!("failed to start listening: {e}"),
        }
    }

    fn handle_recognized(&mut self, text: Option<String>) {
        self.emit(RuntimeEvent::Listening { active: false });
        if let Some(text) = text {
            // Voice-derived submission takes the same path as typed input,
            // stopping stale speech and cancelling the timer first.
            self.handle_submit(&text);
        }
    }

    fn supersede_pending(&mut self) {
        for turn in &mut self.turns {
            if turn.status == TurnStatus::Pending {
                debug!(turn = %turn.id, "turn superseded");
                turn.status = TurnStatus::Superseded;
            }
        }
    }

    fn set_status(&mut self, id: TurnId, status: TurnStatus) {
        if let Some(turn) = self.turns.iter_mut().find(|t| t.id == id) {
            turn.status = status;
        }
    }

    fn emit(&self, event: RuntimeEvent) {
        // No subscribers is fine; status events are advisory.
        let _ = self.runtime_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::speech::input::NullRecognizer;
    use crate::speech::output::PlaybackHandle;
    use crate::transcript::Speaker;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    /// Transport whose calls never resolve; tests drive `ReplyReady`
    /// events directly so completion order is fully controlled.
    #[derive(Default)]
    struct HangingTransport {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatTransport for HangingTransport {
        async fn ask(&self, message: &str) -> Result<ChatReply> {
            self.calls.lock().unwrap().push(message.to_owned());
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct FakeAudioBackend {
        played: Mutex<Vec<String>>,
        finished_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    }

    struct FakeHandle {
        slot: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    }

    impl PlaybackHandle for FakeHandle {
        fn stop(&mut self) {
            self.slot.lock().unwrap().take();
        }
    }

    #[async_trait]
    impl AudioBackend for FakeAudioBackend {
        async fn play(
            &self,
            url: &Url,
        ) -> Result<(Box<dyn PlaybackHandle>, oneshot::Receiver<()>)> {
            self.played.lock().unwrap().push(url.to_string());
            let (tx, rx) = oneshot::channel();
            *self.finished_tx.lock().unwrap() = Some(tx);
            Ok((
                Box::new(FakeHandle {
                    slot: Arc::clone(&self.finished_tx),
                }),
                rx,
            ))
        }
    }

    /// Recognizer that stays open until cancelled; tests drive
    /// `Recognized` events directly.
    struct IdleRecognizer;

    #[async_trait]
    impl RecognitionBackend for IdleRecognizer {
        fn is_available(&self) -> bool {
            true
        }

        async fn listen(
            &self,
            _locale: &str,
            cancel: CancellationToken,
        ) -> Result<Option<String>> {
            cancel.cancelled().await;
            Ok(None)
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<TranscriptEntry>>>);

    impl RecordingSink {
        fn entries(&self) -> Vec<TranscriptEntry> {
            self.0.lock().unwrap().clone()
        }

        fn assistant_texts(&self) -> Vec<String> {
            self.entries()
                .into_iter()
                .filter(|e| e.speaker == Speaker::Assistant)
                .map(|e| e.text)
                .collect()
        }
    }

    impl TranscriptSink for RecordingSink {
        fn append(&mut self, entry: TranscriptEntry) {
            self.0.lock().unwrap().push(entry);
        }
    }

    struct Harness {
        coordinator: ConversationCoordinator,
        handle: ConversationHandle,
        transport: Arc<HangingTransport>,
        audio: Arc<FakeAudioBackend>,
        sink: RecordingSink,
    }

    fn harness() -> Harness {
        harness_with_recognizer(Arc::new(IdleRecognizer))
    }

    fn harness_with_recognizer(recognition: Arc<dyn RecognitionBackend>) -> Harness {
        let transport = Arc::new(HangingTransport::default());
        let audio = Arc::new(FakeAudioBackend::default());
        let sink = RecordingSink::default();
        let (coordinator, handle) = ConversationCoordinator::new(
            &ClientConfig::default(),
            Arc::clone(&transport) as Arc<dyn ChatTransport>,
            Arc::clone(&audio) as Arc<dyn AudioBackend>,
            recognition,
            Box::new(sink.clone()),
        );
        Harness {
            coordinator,
            handle,
            transport,
            audio,
            sink,
        }
    }

    fn reply(text: &str, audio_url: Option<&str>) -> ChatReply {
        ChatReply {
            text: text.to_owned(),
            audio_url: audio_url.map(|u| Url::parse(u).unwrap()),
        }
    }

    #[tokio::test]
    async fn empty_submission_is_ignored_entirely() {
        let mut h = harness();
        h.coordinator.handle_submit("   \t  ");
        assert!(h.coordinator.turns.is_empty());
        assert!(h.sink.entries().is_empty());
        assert!(h.transport.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn new_submission_supersedes_pending_turn_synchronously() {
        let mut h = harness();
        h.coordinator.handle_submit("hello");
        assert_eq!(h.coordinator.turns[0].status, TurnStatus::Pending);

        // The first request is still in flight; superseding must not wait
        // for it.
        h.coordinator.handle_submit("bye");
        assert_eq!(h.coordinator.turns[0].status, TurnStatus::Superseded);
        assert_eq!(h.coordinator.turns[1].status, TurnStatus::Pending);
        assert_eq!(h.coordinator.latest, TurnId(2));
    }

    #[tokio::test]
    async fn stale_reply_is_discarded_and_latest_reply_renders() {
        let mut h = harness();
        h.coordinator.handle_submit("hello");
        h.coordinator.handle_submit("bye");

        // Turn 1's late reply: no transcript entry, no audio, no status
        // change (it is already Superseded).
        h.coordinator
            .handle_reply(TurnId(1), Ok(reply("stale", Some("https://x.test/old.mp3"))))
            .await;
        assert!(h.sink.assistant_texts().is_empty());
        assert!(h.audio.played.lock().unwrap().is_empty());
        assert_eq!(h.coordinator.turns[0].status, TurnStatus::Superseded);

        // Turn 2's reply renders and its audio starts.
        h.coordinator
            .handle_reply(
                TurnId(2),
                Ok(reply("Hi there", Some("https://chat.test/a.mp3"))),
            )
            .await;
        assert_eq!(h.sink.assistant_texts(), vec!["Hi there"]);
        assert_eq!(
            *h.audio.played.lock().unwrap(),
            vec!["https://chat.test/a.mp3"]
        );
        assert_eq!(h.coordinator.turns[1].status, TurnStatus::Completed);
    }

    #[tokio::test]
    async fn reply_without_audio_schedules_auto_listen_immediately() {
        let mut h = harness();
        h.coordinator.handle_submit("hello");
        h.coordinator
            .handle_reply(TurnId(1), Ok(reply("hi", None)))
            .await;

        let timer = h.coordinator.auto_listen.as_ref().expect("timer armed");
        assert_eq!(timer.turn, TurnId(1));
        assert!(h.audio.played.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_appends_fixed_entry_and_skips_auto_listen() {
        let mut h = harness();
        h.coordinator.handle_submit("hello");
        h.coordinator
            .handle_reply(TurnId(1), Err(VoxaError::Transport("boom".into())))
            .await;

        assert_eq!(h.sink.assistant_texts(), vec![TRANSPORT_ERROR_TEXT]);
        assert_eq!(h.coordinator.turns[0].status, TurnStatus::Failed);
        assert!(h.coordinator.auto_listen.is_none());
        assert!(h.audio.played.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn playback_end_for_latest_turn_arms_auto_listen() {
        let mut h = harness();
        h.coordinator.handle_submit("hello");
        h.coordinator
            .handle_reply(TurnId(1), Ok(reply("hi", Some("https://x.test/a.mp3"))))
            .await;
        // While audio is playing there is no timer yet.
        assert!(h.coordinator.auto_listen.is_none());

        h.coordinator.handle_playback_finished(TurnId(1));
        let timer = h.coordinator.auto_listen.as_ref().expect("timer armed");
        assert_eq!(timer.turn, TurnId(1));
    }

    #[tokio::test]
    async fn playback_end_for_stale_turn_is_ignored() {
        let mut h = harness();
        h.coordinator.handle_submit("hello");
        h.coordinator.handle_submit("bye");
        h.coordinator.handle_playback_finished(TurnId(1));
        assert!(h.coordinator.auto_listen.is_none());
    }

    #[tokio::test]
    async fn new_submission_stops_current_playback() {
        let mut h = harness();
        h.coordinator.handle_submit("hello");
        h.coordinator
            .handle_reply(TurnId(1), Ok(reply("hi", Some("https://x.test/a.mp3"))))
            .await;
        assert!(h.audio.finished_tx.lock().unwrap().is_some());

        // The next submission stops the live playback; its finished sender
        // is dropped so no PlaybackFinished event can fire later.
        h.coordinator.handle_submit("bye");
        assert!(h.audio.finished_tx.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn recognized_speech_cancels_pending_timer_before_submitting() {
        let mut h = harness();
        h.coordinator.handle_submit("hello");
        h.coordinator
            .handle_reply(TurnId(1), Ok(reply("hi", None)))
            .await;
        let token = h
            .coordinator
            .auto_listen
            .as_ref()
            .expect("timer armed")
            .cancel
            .clone();

        h.coordinator.handle_recognized(Some("next question".into()));

        assert!(token.is_cancelled());
        assert!(h.coordinator.auto_listen.is_none());
        assert_eq!(h.coordinator.latest, TurnId(2));
        let entries = h.sink.entries();
        assert_eq!(entries.last().unwrap().text, "next question");
        assert_eq!(entries.last().unwrap().speaker, Speaker::User);
    }

    #[tokio::test]
    async fn recognized_nothing_only_clears_listening_state() {
        let mut h = harness();
        h.coordinator.handle_recognized(None);
        assert!(h.coordinator.turns.is_empty());
        assert!(h.sink.entries().is_empty());
    }

    #[tokio::test]
    async fn auto_listen_fire_for_stale_turn_is_a_noop() {
        let mut h = harness();
        let mut runtime_rx = h.handle.subscribe();
        h.coordinator.handle_submit("hello");
        h.coordinator.handle_submit("bye");

        // Drain the submission status events, then fire a stale timer.
        while runtime_rx.try_recv().is_ok() {}
        h.coordinator.handle_auto_listen(TurnId(1));

        assert!(runtime_rx.try_recv().is_err());
        assert!(h.coordinator.auto_listen.is_none());
    }

    #[tokio::test]
    async fn auto_listen_fire_for_latest_turn_starts_listening() {
        let mut h = harness();
        h.coordinator.handle_submit("hello");
        h.coordinator
            .handle_reply(TurnId(1), Ok(reply("hi", None)))
            .await;

        let mut runtime_rx = h.handle.subscribe();
        h.coordinator.handle_auto_listen(TurnId(1));

        assert!(matches!(
            runtime_rx.try_recv(),
            Ok(RuntimeEvent::Listening { active: true })
        ));
    }

    #[tokio::test]
    async fn capability_unavailable_notice_is_shown_once() {
        let mut h = harness_with_recognizer(Arc::new(NullRecognizer));
        let mut runtime_rx = h.handle.subscribe();

        h.coordinator.start_listening();
        h.coordinator.start_listening();

        let mut notices = 0;
        while let Ok(event) = runtime_rx.try_recv() {
            if matches!(event, RuntimeEvent::Notice(_)) {
                notices += 1;
            }
        }
        assert_eq!(notices, 1);
    }

    #[tokio::test]
    async fn every_pending_turn_reaches_a_terminal_state() {
        let mut h = harness();
        h.coordinator.handle_submit("a");
        h.coordinator.handle_submit("b");
        h.coordinator.handle_submit("c");
        h.coordinator
            .handle_reply(TurnId(3), Err(VoxaError::Transport("down".into())))
            .await;

        assert!(h.coordinator.turns.iter().all(|t| t.status.is_terminal()));
    }

    #[tokio::test(start_paused = true)]
    async fn armed_timer_fires_through_the_event_queue_after_the_delay() {
        let mut h = harness();
        h.coordinator.handle_submit("hello");
        h.coordinator
            .handle_reply(TurnId(1), Ok(reply("hi", None)))
            .await;
        assert!(h.coordinator.auto_listen.is_some());

        // Advance past the configured delay; the timer task posts back to
        // the event queue.
        tokio::time::advance(Duration::from_millis(1_100)).await;
        let event = h.coordinator.events_rx.recv().await.expect("event");
        match event {
            ConversationEvent::AutoListen { turn } => assert_eq!(turn, TurnId(1)),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let mut h = harness();
        h.coordinator.handle_submit("hello");
        h.coordinator
            .handle_reply(TurnId(1), Ok(reply("hi", None)))
            .await;
        h.coordinator.cancel_auto_listen();

        tokio::time::advance(Duration::from_millis(5_000)).await;
        // Only the timer could post an event here; the queue must be empty.
        assert!(h.coordinator.events_rx.try_recv().is_err());
    }
}
