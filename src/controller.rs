//! Presentation controller: owns the flipbook and the three optional input
//! channels (voice navigation, camera gestures, assistant). Voice navigation
//! and the assistant share one microphone: a single recognition channel runs
//! while either is enabled, and a router decides per final transcript whether
//! it is a navigation command or an audience question.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::assistant::{Assistant, AssistantSnapshot, QaBackend, SpeechSynth};
use crate::cancellation::{ChannelEpoch, EpochGuard};
use crate::flipbook::{FlipBook, FlipDirection, FlipSnapshot, SpreadView};
use crate::gesture::{spawn_gesture_session, GestureSessionConfig};
use crate::interpret::gateway::IntentBackend;
use crate::interpret::InterpretService;
use crate::metrics::{MetricSummary, MetricsRegistry};
use crate::vision::history::MotionHistory;
use crate::vision::{start_motion_pipeline, CameraError, CameraSource, MotionHandle, VisionConfig};
use crate::voice::{spawn_voice_channel, Recognizer, RecognizerError, VoiceChannelConfig, VoiceEvent};
use crate::voice_session::VoiceSession;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub locale: String,
    pub flip_duration: Duration,
    pub gesture_cooldown: Duration,
    pub vision: VisionConfig,
    pub voice: VoiceChannelConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            locale: "en".into(),
            flip_duration: Duration::from_millis(1200),
            gesture_cooldown: Duration::from_millis(2000),
            vision: VisionConfig::default(),
            voice: VoiceChannelConfig::default(),
        }
    }
}

/// External capabilities the controller is wired to. Production wiring uses
/// the platform recognizer/camera/synthesizer and the HTTP gateways; tests
/// substitute fakes at the same seams.
pub struct ControllerDeps {
    pub recognizer: Arc<dyn Recognizer>,
    pub camera: Arc<dyn CameraSource>,
    pub intent_backend: Arc<dyn IntentBackend>,
    pub qa_backend: Arc<dyn QaBackend>,
    pub synth: Arc<dyn SpeechSynth>,
}

/// Resolve slide indices to whatever the embedding UI renders.
pub trait SlideRenderer {
    type Slide;
    fn slide(&self, index: usize) -> Self::Slide;
}

/// One renderable spread: the resting slide, plus the incoming one and the
/// flip angle while a transition runs.
#[derive(Debug, Clone)]
pub struct RenderedSpread<S> {
    pub current: S,
    pub incoming: Option<S>,
    pub direction: Option<FlipDirection>,
    pub angle: f64,
}

pub fn render_spread<R: SlideRenderer>(
    renderer: &R,
    snapshot: &FlipSnapshot,
) -> RenderedSpread<R::Slide> {
    let view = snapshot.spread_view();
    RenderedSpread {
        current: renderer.slide(view.current),
        incoming: view.incoming.map(|index| renderer.slide(index)),
        direction: view.direction,
        angle: view.angle,
    }
}

struct ChannelFlags {
    voice: AtomicBool,
    assistant: AtomicBool,
}

struct GestureRuntime {
    handle: MotionHandle,
    _task: tokio::task::JoinHandle<()>,
}

/// Shared context for the transcript router task.
struct RouterCtx {
    flags: Arc<ChannelFlags>,
    interpreter: Arc<InterpretService>,
    voice_session: Arc<VoiceSession>,
    assistant: Arc<Assistant>,
    voice_epoch: Arc<ChannelEpoch>,
    assistant_epoch: Arc<ChannelEpoch>,
    voice_failure: Arc<Mutex<Option<RecognizerError>>>,
    mic_running: Arc<Mutex<bool>>,
    mic_guard: EpochGuard,
}

pub struct PresentationController {
    config: ControllerConfig,
    flipbook: Arc<FlipBook>,
    interpreter: Arc<InterpretService>,
    voice_session: Arc<VoiceSession>,
    assistant: Arc<Assistant>,
    metrics: Arc<MetricsRegistry>,
    recognizer: Arc<dyn Recognizer>,
    camera: Arc<dyn CameraSource>,
    flags: Arc<ChannelFlags>,
    mic_epoch: ChannelEpoch,
    voice_epoch: Arc<ChannelEpoch>,
    assistant_epoch: Arc<ChannelEpoch>,
    gesture_epoch: ChannelEpoch,
    mic_running: Arc<Mutex<bool>>,
    gesture_runtime: Mutex<Option<GestureRuntime>>,
    voice_failure: Arc<Mutex<Option<RecognizerError>>>,
}

impl PresentationController {
    pub fn new(page_count: usize, deps: ControllerDeps, config: ControllerConfig) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let flipbook = Arc::new(FlipBook::new(
            page_count,
            config.flip_duration,
            Arc::clone(&metrics),
        ));
        let interpreter = Arc::new(InterpretService::new(
            deps.intent_backend,
            config.locale.clone(),
            Arc::clone(&metrics),
        ));
        let voice_session = Arc::new(VoiceSession::new(
            Arc::clone(&flipbook),
            Arc::clone(&interpreter),
            Arc::clone(&metrics),
        ));
        let assistant = Arc::new(Assistant::new(
            deps.qa_backend,
            deps.synth,
            config.locale.clone(),
            Arc::clone(&metrics),
        ));
        info!(page_count, locale = %config.locale, "controller created");
        Self {
            config,
            flipbook,
            interpreter,
            voice_session,
            assistant,
            metrics,
            recognizer: deps.recognizer,
            camera: deps.camera,
            flags: Arc::new(ChannelFlags {
                voice: AtomicBool::new(false),
                assistant: AtomicBool::new(false),
            }),
            mic_epoch: ChannelEpoch::new(),
            voice_epoch: Arc::new(ChannelEpoch::new()),
            assistant_epoch: Arc::new(ChannelEpoch::new()),
            gesture_epoch: ChannelEpoch::new(),
            mic_running: Arc::new(Mutex::new(false)),
            gesture_runtime: Mutex::new(None),
            voice_failure: Arc::new(Mutex::new(None)),
        }
    }

    // --- manual controls -------------------------------------------------

    /// Keyboard/manual forward step. Same busy/boundary rules as every
    /// other channel.
    pub fn advance(&self) -> bool {
        self.flipbook.request_transition(FlipDirection::Forward)
    }

    pub fn retreat(&self) -> bool {
        self.flipbook.request_transition(FlipDirection::Backward)
    }

    pub fn snapshot(&self) -> FlipSnapshot {
        self.flipbook.snapshot()
    }

    /// The renderable spread indices plus the current flip angle.
    pub fn spread_view(&self) -> SpreadView {
        self.flipbook.snapshot().spread_view()
    }

    pub fn subscribe(&self) -> watch::Receiver<FlipSnapshot> {
        self.flipbook.subscribe()
    }

    pub async fn wait_idle(&self) {
        self.flipbook.wait_idle().await;
    }

    // --- voice navigation ------------------------------------------------

    pub fn enable_voice(&self) {
        if self.flags.voice.swap(true, Ordering::SeqCst) {
            return;
        }
        self.voice_failure.lock().take();
        self.voice_epoch.advance();
        self.ensure_mic_running();
        info!("voice navigation enabled");
    }

    pub fn disable_voice(&self) {
        if !self.flags.voice.swap(false, Ordering::SeqCst) {
            return;
        }
        self.voice_epoch.cancel();
        self.maybe_stop_mic();
        info!("voice navigation disabled");
    }

    pub fn voice_enabled(&self) -> bool {
        self.flags.voice.load(Ordering::SeqCst)
    }

    /// The fatal recognizer error that shut the microphone down, if any.
    /// The UI uses this to flip its toggles back off.
    pub fn voice_failure(&self) -> Option<RecognizerError> {
        self.voice_failure.lock().clone()
    }

    // --- assistant ---------------------------------------------------------

    pub fn enable_assistant(&self) {
        if self.flags.assistant.swap(true, Ordering::SeqCst) {
            return;
        }
        self.voice_failure.lock().take();
        self.assistant_epoch.advance();
        self.ensure_mic_running();
        info!("assistant enabled");
    }

    /// Disable the assistant. Cancels in-flight answer fetches and cuts off
    /// running speech synthesis.
    pub fn disable_assistant(&self) {
        if !self.flags.assistant.swap(false, Ordering::SeqCst) {
            return;
        }
        self.assistant_epoch.cancel();
        self.maybe_stop_mic();
        info!("assistant disabled");
    }

    pub fn assistant_enabled(&self) -> bool {
        self.flags.assistant.load(Ordering::SeqCst)
    }

    pub fn assistant_state(&self) -> AssistantSnapshot {
        self.assistant.snapshot()
    }

    /// Replace the presentation context the assistant sends with questions.
    pub fn set_assistant_context(&self, context: impl Into<String>) {
        self.assistant.set_context(context);
    }

    // --- gestures ----------------------------------------------------------

    /// Open the camera and start gesture recognition. Camera failures are
    /// returned so the UI can keep its toggle off; there is no auto-retry.
    pub fn enable_gesture(&self) -> Result<(), CameraError> {
        let mut runtime = self.gesture_runtime.lock();
        if runtime.is_some() {
            return Ok(());
        }
        let guard = self.gesture_epoch.advance();
        let history = Arc::new(Mutex::new(MotionHistory::new(self.config.vision.window)));
        let (signal_tx, signal_rx) = mpsc::channel(16);
        let handle = start_motion_pipeline(
            self.config.vision.clone(),
            &*self.camera,
            Arc::clone(&history),
            signal_tx,
            Arc::clone(&self.metrics),
        )?;
        let task = spawn_gesture_session(
            signal_rx,
            history,
            Arc::clone(&self.interpreter),
            Arc::clone(&self.flipbook),
            Arc::clone(&self.metrics),
            GestureSessionConfig {
                cooldown: self.config.gesture_cooldown,
            },
            guard,
        );
        *runtime = Some(GestureRuntime {
            handle,
            _task: task,
        });
        info!("gesture navigation enabled");
        Ok(())
    }

    /// Stop gesture recognition and release the camera. Joins the processing
    /// thread, which exits within one frame-poll interval.
    pub fn disable_gesture(&self) {
        self.gesture_epoch.cancel();
        if let Some(mut runtime) = self.gesture_runtime.lock().take() {
            runtime.handle.stop();
            info!("gesture navigation disabled");
        }
    }

    pub fn gesture_enabled(&self) -> bool {
        self.gesture_runtime.lock().is_some()
    }

    // --- shared ------------------------------------------------------------

    pub fn metric_summaries(&self) -> std::collections::HashMap<String, MetricSummary> {
        self.metrics.summary()
    }

    /// Disable every channel and release all devices. The flipbook itself
    /// stays readable; an in-flight flip animation runs to completion.
    pub fn dispose(&self) {
        self.disable_voice();
        self.disable_assistant();
        self.disable_gesture();
        info!("controller disposed");
    }

    fn ensure_mic_running(&self) {
        let mut running = self.mic_running.lock();
        if *running {
            return;
        }
        let guard = self.mic_epoch.advance();
        let events = spawn_voice_channel(
            Arc::clone(&self.recognizer),
            self.config.locale.clone(),
            self.config.voice.clone(),
            guard.token().clone(),
        );
        let ctx = RouterCtx {
            flags: Arc::clone(&self.flags),
            interpreter: Arc::clone(&self.interpreter),
            voice_session: Arc::clone(&self.voice_session),
            assistant: Arc::clone(&self.assistant),
            voice_epoch: Arc::clone(&self.voice_epoch),
            assistant_epoch: Arc::clone(&self.assistant_epoch),
            voice_failure: Arc::clone(&self.voice_failure),
            mic_running: Arc::clone(&self.mic_running),
            mic_guard: guard,
        };
        tokio::spawn(run_transcript_router(events, ctx));
        *running = true;
    }

    fn maybe_stop_mic(&self) {
        if self.flags.voice.load(Ordering::SeqCst) || self.flags.assistant.load(Ordering::SeqCst)
        {
            return;
        }
        let mut running = self.mic_running.lock();
        if *running {
            self.mic_epoch.cancel();
            *running = false;
            debug!("microphone released, no consumer left");
        }
    }
}

impl Drop for PresentationController {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Route each final transcript to exactly one consumer. Navigation phrases
/// go to the voice session and never to the assistant; everything else is an
/// assistant question when the assistant is on, otherwise it still goes to
/// the voice session (the interpretation backend may resolve free-form
/// phrasing into a command).
async fn run_transcript_router(mut events: mpsc::Receiver<VoiceEvent>, ctx: RouterCtx) {
    while let Some(event) = events.recv().await {
        match event {
            VoiceEvent::Interim(text) => {
                debug!(len = text.len(), "interim transcript");
            }
            VoiceEvent::Transcript(text) => {
                let normalized = text.trim().to_lowercase();
                if normalized.is_empty() {
                    continue;
                }
                let is_navigation = ctx.interpreter.keywords().is_navigation_phrase(&normalized);
                let voice_on = ctx.flags.voice.load(Ordering::SeqCst);
                let assistant_on = ctx.flags.assistant.load(Ordering::SeqCst);

                if voice_on && (is_navigation || !assistant_on) {
                    let guard = ctx.voice_epoch.guard();
                    let session = Arc::clone(&ctx.voice_session);
                    tokio::spawn(async move {
                        session.handle_transcript(&text, &guard).await;
                    });
                } else if assistant_on && !is_navigation {
                    let guard = ctx.assistant_epoch.guard();
                    let assistant = Arc::clone(&ctx.assistant);
                    tokio::spawn(async move {
                        assistant.handle_question(&text, &guard).await;
                    });
                } else {
                    debug!(transcript = %text, "transcript dropped, no active consumer");
                }
            }
            VoiceEvent::Failed(error) => {
                warn!(%error, "voice channel failed, disabling microphone consumers");
                ctx.flags.voice.store(false, Ordering::SeqCst);
                ctx.flags.assistant.store(false, Ordering::SeqCst);
                ctx.voice_epoch.cancel();
                ctx.assistant_epoch.cancel();
                *ctx.voice_failure.lock() = Some(error);
                break;
            }
        }
    }
    // The channel is gone however the loop ended (fatal error, silent
    // give-up, or disable); a later enable must open a fresh session. The
    // epoch check keeps a late exit from clobbering a newer channel's flag.
    {
        let mut running = ctx.mic_running.lock();
        if ctx.mic_guard.is_current() {
            *running = false;
            if ctx.flags.voice.load(Ordering::SeqCst)
                || ctx.flags.assistant.load(Ordering::SeqCst)
            {
                warn!("voice channel stopped while a consumer is still enabled");
            }
        }
    }
    debug!("transcript router stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::{QaError, QaRequest, QaResponse, SynthError};
    use crate::interpret::gateway::{IntentResponse, InterpretRequest};
    use crate::interpret::GatewayError;
    use crate::vision::diff::LumaFrame;
    use crate::vision::CameraStream;
    use crate::voice::RecognizerEvent;
    use crossbeam_channel as cb;
    use std::future::Future;
    use std::pin::Pin;
    use tokio_util::sync::CancellationToken;

    struct NullRecognizer;

    impl Recognizer for NullRecognizer {
        fn start(
            &self,
            _locale: &str,
        ) -> Result<mpsc::Receiver<RecognizerEvent>, RecognizerError> {
            Err(RecognizerError::ServiceUnavailable)
        }
    }

    struct NullCamera;

    impl CameraSource for NullCamera {
        fn open(
            &self,
            _frames: cb::Sender<LumaFrame>,
        ) -> Result<Box<dyn CameraStream>, CameraError> {
            Err(CameraError::NoDevice)
        }
    }

    struct NullBackend;

    impl IntentBackend for NullBackend {
        fn interpret<'a>(
            &'a self,
            _request: &'a InterpretRequest,
            _cancel: &'a CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<IntentResponse, GatewayError>> + Send + 'a>>
        {
            Box::pin(async { Err(GatewayError::Timeout) })
        }
    }

    struct NullQa;

    impl QaBackend for NullQa {
        fn ask<'a>(
            &'a self,
            _request: &'a QaRequest,
            _cancel: &'a CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<QaResponse, QaError>> + Send + 'a>> {
            Box::pin(async { Err(QaError::Timeout) })
        }
    }

    struct NullSynth;

    impl SpeechSynth for NullSynth {
        fn speak<'a>(
            &'a self,
            _text: &'a str,
            _cancel: &'a CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<(), SynthError>> + Send + 'a>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn controller(page_count: usize) -> PresentationController {
        PresentationController::new(
            page_count,
            ControllerDeps {
                recognizer: Arc::new(NullRecognizer),
                camera: Arc::new(NullCamera),
                intent_backend: Arc::new(NullBackend),
                qa_backend: Arc::new(NullQa),
                synth: Arc::new(NullSynth),
            },
            ControllerConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn manual_controls_step_through_the_deck() {
        let controller = controller(3);
        assert!(controller.advance());
        controller.wait_idle().await;
        assert_eq!(controller.snapshot().index, 1);

        assert!(controller.retreat());
        controller.wait_idle().await;
        assert_eq!(controller.snapshot().index, 0);

        // Boundary no-op.
        assert!(!controller.retreat());
        assert_eq!(controller.snapshot().index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn camera_failure_keeps_gestures_off() {
        let controller = controller(3);
        let result = controller.enable_gesture();
        assert!(matches!(result, Err(CameraError::NoDevice)));
        assert!(!controller.gesture_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_recognizer_failure_surfaces_and_clears_toggles() {
        let controller = controller(3);
        controller.enable_voice();
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
        assert!(!controller.voice_enabled());
        assert_eq!(
            controller.voice_failure(),
            Some(RecognizerError::ServiceUnavailable)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn mic_reopens_after_channel_gives_up_silently() {
        use std::collections::VecDeque;

        struct FlakyRecognizer {
            script: Mutex<VecDeque<RecognizerError>>,
            starts: std::sync::atomic::AtomicUsize,
            keepalive: Mutex<Vec<mpsc::Sender<RecognizerEvent>>>,
        }

        impl Recognizer for FlakyRecognizer {
            fn start(
                &self,
                _locale: &str,
            ) -> Result<mpsc::Receiver<RecognizerEvent>, RecognizerError> {
                self.starts.fetch_add(1, Ordering::SeqCst);
                match self.script.lock().pop_front() {
                    Some(e) => Err(e),
                    None => {
                        let (tx, rx) = mpsc::channel(1);
                        self.keepalive.lock().push(tx);
                        Ok(rx)
                    }
                }
            }
        }

        let recognizer = Arc::new(FlakyRecognizer {
            script: Mutex::new(VecDeque::from([
                RecognizerError::DeviceBusy,
                RecognizerError::DeviceBusy,
            ])),
            starts: std::sync::atomic::AtomicUsize::new(0),
            keepalive: Mutex::new(Vec::new()),
        });
        let controller = PresentationController::new(
            3,
            ControllerDeps {
                recognizer: Arc::clone(&recognizer) as Arc<dyn Recognizer>,
                camera: Arc::new(NullCamera),
                intent_backend: Arc::new(NullBackend),
                qa_backend: Arc::new(NullQa),
                synth: Arc::new(NullSynth),
            },
            ControllerConfig::default(),
        );

        // Both start attempts fail transiently; the channel gives up
        // silently after the single retry.
        controller.enable_voice();
        tokio::time::sleep(Duration::from_secs(5)).await;
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
        assert_eq!(recognizer.starts.load(Ordering::SeqCst), 2);

        // A later enable must open a fresh recognition session.
        controller.enable_assistant();
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
        assert_eq!(recognizer.starts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn render_spread_maps_indices_through_the_renderer() {
        struct Titles;
        impl SlideRenderer for Titles {
            type Slide = String;
            fn slide(&self, index: usize) -> String {
                format!("slide-{index}")
            }
        }

        let controller = controller(4);
        assert!(controller.advance());
        let spread = render_spread(&Titles, &controller.snapshot());
        assert_eq!(spread.current, "slide-0");
        assert_eq!(spread.incoming.as_deref(), Some("slide-1"));
        controller.wait_idle().await;
        let spread = render_spread(&Titles, &controller.snapshot());
        assert_eq!(spread.current, "slide-1");
        assert_eq!(spread.incoming, None);
    }
}
