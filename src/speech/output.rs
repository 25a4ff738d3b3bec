//! Speech output: at most one live audio playback at a time.
//!
//! The controller enforces the at-most-one invariant; the backend does the
//! actual fetching, decoding and playing. A playback that ends naturally
//! (or dies mid-stream) signals its finished channel exactly once; a
//! playback that is stopped signals nothing.

use crate::error::{Result, VoxaError};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};
use url::Url;

/// Handle to one in-flight playback.
pub trait PlaybackHandle: Send {
    /// Halt playback and discard the remaining audio. Idempotent; the
    /// finished channel is never signalled after a stop.
    fn stop(&mut self);
}

/// Platform audio playback capability.
///
/// `play` must return promptly: any fetching, decoding or device work
/// happens on spawned tasks so the coordinator's event loop is never
/// suspended behind a slow audio resource.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Begin playing the audio resource at `url`.
    ///
    /// The returned receiver resolves once when playback ends naturally or
    /// fails at any point (silent degradation, so voice input still
    /// re-arms); a stopped playback drops the sender without resolving it.
    ///
    /// # Errors
    ///
    /// Returns an error if playback cannot even be started.
    async fn play(&self, url: &Url) -> Result<(Box<dyn PlaybackHandle>, oneshot::Receiver<()>)>;
}

/// Controller owning the single live playback.
pub struct SpeechOutput {
    backend: Arc<dyn AudioBackend>,
    current: Option<Box<dyn PlaybackHandle>>,
}

impl SpeechOutput {
    /// Create a controller over the given backend.
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            current: None,
        }
    }

    /// Start playing `url`, stopping any current playback first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot start the playback.
    pub async fn play(&mut self, url: &Url) -> Result<oneshot::Receiver<()>> {
        self.stop_current();
        let (handle, finished) = self.backend.play(url).await?;
        self.current = Some(handle);
        Ok(finished)
    }

    /// Stop the current playback, if any. Idempotent; a no-op when nothing
    /// is playing.
    pub fn stop_current(&mut self) {
        if let Some(mut handle) = self.current.take() {
            debug!("stopping current playback");
            handle.stop();
        }
    }
}

/// Real backend: fetches the audio resource over HTTP, decodes it with
/// symphonia and plays it through the default (or configured) cpal output
/// device on a blocking task.
pub struct HttpAudioBackend {
    http: reqwest::Client,
    output_device: Option<String>,
}

impl HttpAudioBackend {
    /// Create a backend playing through the named output device, or the
    /// system default when `output_device` is `None`.
    pub fn new(output_device: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            output_device,
        }
    }

    /// Fetch the resource, decode it and play it to completion or until
    /// the stop flag is raised. Runs entirely on spawned tasks.
    async fn fetch_decode_play(
        http: reqwest::Client,
        url: Url,
        device_name: Option<String>,
        stopped: Arc<AtomicBool>,
    ) -> Result<()> {
        let response = http
            .get(url)
            .send()
            .await
            .map_err(|e| VoxaError::Playback(format!("audio fetch failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(VoxaError::Playback(format!(
                "audio fetch returned status {status}"
            )));
        }
        let data = response
            .bytes()
            .await
            .map_err(|e| VoxaError::Playback(format!("audio fetch failed: {e}")))?;

        if stopped.load(Ordering::SeqCst) {
            return Ok(());
        }

        tokio::task::spawn_blocking(move || {
            let (samples, sample_rate) = decode_samples(&data)?;
            play_samples(&device_name, &samples, sample_rate, &stopped)
        })
        .await
        .map_err(|e| VoxaError::Playback(format!("playback task failed: {e}")))?
    }
}

#[async_trait]
impl AudioBackend for HttpAudioBackend {
    async fn play(&self, url: &Url) -> Result<(Box<dyn PlaybackHandle>, oneshot::Receiver<()>)> {
        // Hand back the stop flag and finished channel immediately; the
        // fetch/decode/play pipeline runs behind them so a slow download
        // never suspends the caller's event loop.
        let stopped = Arc::new(AtomicBool::new(false));
        let (finished_tx, finished_rx) = oneshot::channel();
        let http = self.http.clone();
        let url = url.clone();
        let device_name = self.output_device.clone();
        let stop_flag = Arc::clone(&stopped);
        tokio::spawn(async move {
            if let Err(e) =
                Self::fetch_decode_play(http, url, device_name, Arc::clone(&stop_flag)).await
            {
                // Silent degradation: log and fall through to the finished
                // signal so voice input still re-arms.
                warn!("audio playback failed: {e}");
            }
            if !stop_flag.load(Ordering::SeqCst) {
                let _ = finished_tx.send(());
            }
        });

        Ok((Box::new(CpalPlaybackHandle { stopped }), finished_rx))
    }
}

/// Stop flag for one cpal playback.
struct CpalPlaybackHandle {
    stopped: Arc<AtomicBool>,
}

impl PlaybackHandle for CpalPlaybackHandle {
    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Shared buffer tracking playback progress in the output callback.
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

/// Play mono f32 samples through the output device, polling the stop flag.
fn play_samples(
    device_name: &Option<String>,
    samples: &[f32],
    sample_rate: u32,
    stopped: &Arc<AtomicBool>,
) -> Result<()> {
    let host = cpal::default_host();
    let device = if let Some(name) = device_name {
        host.output_devices()
            .map_err(|e| VoxaError::Audio(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| VoxaError::Audio(format!("output device '{name}' not found")))?
    } else {
        host.default_output_device()
            .ok_or_else(|| VoxaError::Audio("no default output device".into()))?
    };

    let stream_config = cpal::StreamConfig {
        channels: 1,
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let buffer = Arc::new(std::sync::Mutex::new(PlaybackBuffer {
        samples: samples.to_vec(),
        position: 0,
        finished: false,
    }));
    let buffer_clone = Arc::clone(&buffer);

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut buf = match buffer_clone.lock() {
                    Ok(b) => b,
                    Err(_) => return,
                };
                for sample in data.iter_mut() {
                    if buf.position < buf.samples.len() {
                        *sample = buf.samples[buf.position];
                        buf.position += 1;
                    } else {
                        *sample = 0.0;
                        buf.finished = true;
                    }
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| VoxaError::Audio(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| VoxaError::Audio(format!("failed to start output stream: {e}")))?;

    loop {
        std::thread::sleep(std::time::Duration::from_millis(10));
        if stopped.load(Ordering::SeqCst) {
            break;
        }
        let buf = buffer
            .lock()
            .map_err(|e| VoxaError::Audio(format!("playback buffer lock poisoned: {e}")))?;
        if buf.finished {
            break;
        }
    }

    drop(stream);
    Ok(())
}

/// Decode an mp3/wav byte buffer to mono f32 samples.
fn decode_samples(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::probe::Hint;

    let cursor = std::io::Cursor::new(data.to_vec());
    let stream = MediaSourceStream::new(Box::new(cursor), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            stream,
            &Default::default(),
            &Default::default(),
        )
        .map_err(|e| VoxaError::Playback(format!("unrecognized audio format: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| VoxaError::Playback("audio has no default track".into()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| VoxaError::Playback("audio track has no sample rate".into()))?;
    let channels = track.codec_params.channels.map_or(1, |c| c.count());

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &Default::default())
        .map_err(|e| VoxaError::Playback(format!("unsupported audio codec: {e}")))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(VoxaError::Playback(format!("audio read failed: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Skip malformed packets; a partial reply is better than none.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(VoxaError::Playback(format!("audio decode failed: {e}"))),
        };
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buf.copy_interleaved_ref(decoded);
        if channels <= 1 {
            samples.extend_from_slice(buf.samples());
        } else {
            for frame in buf.samples().chunks(channels) {
                samples.push(frame.iter().sum::<f32>() / channels as f32);
            }
        }
    }

    if samples.is_empty() {
        return Err(VoxaError::Playback("audio decoded to zero samples".into()));
    }
    Ok((samples, sample_rate))
}
