//! Voice channel: best-effort continuous speech-to-text.
//! Recognizers naturally terminate their sessions after pauses or timeouts;
//! the channel restarts them after a short delay while enabled, retries a
//! failed restart once after a longer delay, and stops without restart on
//! fatal errors (permission denied, service unavailable). Disable is
//! deterministic: every wait selects on the cancellation token, so no stray
//! restart can fire afterwards.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors surfaced by a recognizer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerError {
    PermissionDenied,
    ServiceUnavailable,
    DeviceBusy,
    Aborted,
    NoSpeech,
    Stream(String),
}

impl RecognizerError {
    /// Fatal errors stop the channel; everything else is recovered by restart.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RecognizerError::PermissionDenied | RecognizerError::ServiceUnavailable
        )
    }
}

impl std::fmt::Display for RecognizerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecognizerError::PermissionDenied => write!(f, "microphone permission denied"),
            RecognizerError::ServiceUnavailable => write!(f, "recognition service unavailable"),
            RecognizerError::DeviceBusy => write!(f, "audio device busy"),
            RecognizerError::Aborted => write!(f, "recognition aborted"),
            RecognizerError::NoSpeech => write!(f, "no speech detected"),
            RecognizerError::Stream(msg) => write!(f, "recognizer stream error: {msg}"),
        }
    }
}

/// Events produced by one recognition session.
#[derive(Debug, Clone)]
pub enum RecognizerEvent {
    /// Partial transcript, for UI feedback only.
    Interim(String),
    /// Finalized transcript, surfaced exactly once per utterance.
    Final(String),
    /// The session reached its natural end.
    Ended,
    Error(RecognizerError),
}

/// Speech recognizer seam. A start call opens one continuous session in the
/// given locale and hands back its event stream; tests substitute a fake.
pub trait Recognizer: Send + Sync {
    fn start(&self, locale: &str) -> Result<mpsc::Receiver<RecognizerEvent>, RecognizerError>;
}

/// Events the channel surfaces to its consumers.
#[derive(Debug, Clone)]
pub enum VoiceEvent {
    Interim(String),
    Transcript(String),
    /// The channel stopped on a fatal error and will not restart.
    Failed(RecognizerError),
}

#[derive(Debug, Clone)]
pub struct VoiceChannelConfig {
    /// Delay before restarting after a session's natural end.
    pub restart_delay: Duration,
    /// Longer delay before the single retry of a failed start.
    pub retry_delay: Duration,
}

impl Default for VoiceChannelConfig {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_millis(300),
            retry_delay: Duration::from_millis(1500),
        }
    }
}

/// Start the channel loop as a tokio task; the returned receiver yields
/// voice events until the channel stops (cancel, fatal error, or give-up).
pub fn spawn_voice_channel(
    recognizer: Arc<dyn Recognizer>,
    locale: String,
    config: VoiceChannelConfig,
    cancel: CancellationToken,
) -> mpsc::Receiver<VoiceEvent> {
    let (out_tx, out_rx) = mpsc::channel(32);
    tokio::spawn(async move {
        run_channel_loop(recognizer, locale, config, cancel, out_tx).await;
    });
    out_rx
}

async fn run_channel_loop(
    recognizer: Arc<dyn Recognizer>,
    locale: String,
    config: VoiceChannelConfig,
    cancel: CancellationToken,
    out_tx: mpsc::Sender<VoiceEvent>,
) {
    let mut start_retried = false;
    info!(locale = %locale, "voice channel starting");

    'outer: loop {
        if cancel.is_cancelled() {
            break;
        }

        match recognizer.start(&locale) {
            Ok(mut events) => {
                start_retried = false;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break 'outer,
                        event = events.recv() => match event {
                            Some(RecognizerEvent::Interim(text)) => {
                                let _ = out_tx.send(VoiceEvent::Interim(text)).await;
                            }
                            Some(RecognizerEvent::Final(text)) => {
                                debug!(len = text.len(), "final_transcript");
                                let _ = out_tx.send(VoiceEvent::Transcript(text)).await;
                            }
                            Some(RecognizerEvent::Ended) | None => {
                                debug!("recognizer session ended");
                                break;
                            }
                            Some(RecognizerEvent::Error(e)) if e.is_fatal() => {
                                warn!(error = %e, "fatal recognizer error, channel stopping");
                                let _ = out_tx.send(VoiceEvent::Failed(e)).await;
                                break 'outer;
                            }
                            Some(RecognizerEvent::Error(e)) => {
                                debug!(error = %e, "transient recognizer error, restarting");
                                break;
                            }
                        }
                    }
                }
                // Natural session end: schedule restart after a short delay.
                tokio::select! {
                    _ = cancel.cancelled() => break 'outer,
                    _ = tokio::time::sleep(config.restart_delay) => {}
                }
            }
            Err(e) if e.is_fatal() => {
                warn!(error = %e, "recognizer start failed fatally");
                let _ = out_tx.send(VoiceEvent::Failed(e)).await;
                break;
            }
            Err(e) => {
                if start_retried {
                    debug!(error = %e, "recognizer restart retry failed, giving up");
                    break;
                }
                debug!(error = %e, "recognizer start failed, retrying once");
                start_retried = true;
                tokio::select! {
                    _ = cancel.cancelled() => break 'outer,
                    _ = tokio::time::sleep(config.retry_delay) => {}
                }
            }
        }
    }

    info!("voice channel stopped");
}
