//! flipdeck: a multi-modal presentation navigation controller.
//!
//! A page-flip state machine driven by four input channels at once: manual
//! controls, spoken commands, camera hand gestures, and an AI presenter
//! assistant. The flipbook serializes navigation (busy requests are dropped,
//! never queued); each channel can be toggled independently at runtime, and
//! voice navigation and the assistant share one microphone.
//!
//! The embedding UI supplies the platform seams ([`voice::Recognizer`],
//! [`vision::CameraSource`], [`assistant::SpeechSynth`]) and renders from
//! [`flipbook::FlipSnapshot`] updates.

pub mod assistant;
pub mod cancellation;
pub mod controller;
pub mod flipbook;
pub mod gesture;
pub mod interpret;
pub mod metrics;
pub mod vision;
pub mod voice;
pub mod voice_session;

pub use assistant::{Assistant, AssistantSnapshot};
pub use cancellation::{ChannelEpoch, EpochGuard};
pub use controller::{
    render_spread, ControllerConfig, ControllerDeps, PresentationController, RenderedSpread,
    SlideRenderer,
};
pub use flipbook::{flip_angle, FlipBook, FlipDirection, FlipSnapshot, SpreadView};
pub use interpret::{InputKind, InterpretService, NavigationIntent};
pub use metrics::{MetricSummary, MetricsRegistry};
pub use vision::{CameraError, CameraSource, CameraStream, VisionConfig};
pub use voice::{Recognizer, RecognizerError, RecognizerEvent, VoiceChannelConfig, VoiceEvent};
