//! Motion detection pipeline.
//! Camera source → crossbeam frame channel → processing thread → directional
//! motion signals. The camera delivers downscaled luminance frames from its
//! own thread; the processing thread analyzes every k-th frame, diffs it
//! against the previously analyzed one, and classifies the trailing window.
//! It performs no navigation logic itself.

pub mod diff;
pub mod history;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel as cb;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::metrics::{metric_names, MetricsRegistry};
use diff::{diff_frames, LumaFrame};
use history::{MotionHistory, MotionSignal};

/// Motion pipeline configuration.
#[derive(Debug, Clone)]
pub struct VisionConfig {
    /// Analyze every k-th delivered frame.
    pub analyze_every: u32,
    /// Per-pixel luminance delta below which a pixel is noise.
    pub noise_threshold: u8,
    /// Fraction of the frame's short side skipped as perimeter margin.
    pub margin_frac: f32,
    /// Trailing window over which samples are aggregated.
    pub window: Duration,
    /// Minimum summed changed-pixel count before a signal is considered.
    pub min_activity: u64,
    /// How much one half must outweigh the other to be dominant.
    pub dominance_ratio: f64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            analyze_every: 3,
            noise_threshold: 24,
            margin_frac: 0.08,
            window: Duration::from_millis(600),
            min_activity: 400,
            dominance_ratio: 1.5,
        }
    }
}

#[derive(Debug)]
pub enum CameraError {
    PermissionDenied,
    NoDevice,
    Stream(String),
}

impl std::fmt::Display for CameraError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraError::PermissionDenied => write!(f, "camera permission denied"),
            CameraError::NoDevice => write!(f, "no eligible video device"),
            CameraError::Stream(msg) => write!(f, "camera stream error: {msg}"),
        }
    }
}

/// Camera device seam. Implementations deliver frames from their own
/// capture thread into the provided sender; tests substitute a fake.
pub trait CameraSource: Send + Sync {
    fn open(&self, frames: cb::Sender<LumaFrame>) -> Result<Box<dyn CameraStream>, CameraError>;
}

/// Handle to an opened camera. Closing releases the device.
pub trait CameraStream: Send {
    fn close(&mut self);
}

/// Keeps the processing thread and camera stream alive; stopping closes the
/// device and joins the thread.
pub struct MotionHandle {
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
    stream: Option<Box<dyn CameraStream>>,
}

impl MotionHandle {
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MotionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the camera and start the motion processing thread. Camera open
/// failures (permission denied, no device) are returned to the caller; the
/// owning session must not retry automatically.
pub fn start_motion_pipeline(
    config: VisionConfig,
    camera: &dyn CameraSource,
    history: Arc<Mutex<MotionHistory>>,
    signals: mpsc::Sender<MotionSignal>,
    metrics: Arc<MetricsRegistry>,
) -> Result<MotionHandle, CameraError> {
    let (frame_tx, frame_rx) = cb::bounded::<LumaFrame>(8);
    let stream = camera.open(frame_tx)?;

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop = Arc::clone(&stop_flag);
    let thread = std::thread::Builder::new()
        .name("motion-processing".into())
        .spawn(move || {
            run_processing_loop(config, frame_rx, history, signals, metrics, stop);
        })
        .map_err(|e| CameraError::Stream(format!("failed to spawn processing thread: {e}")))?;

    info!("motion pipeline started");
    Ok(MotionHandle {
        stop_flag,
        thread: Some(thread),
        stream: Some(stream),
    })
}

/// Processing loop: every k-th frame is diffed against the previously
/// analyzed frame; the sample lands in the shared history, and the window
/// classification is forwarded when it yields a direction.
fn run_processing_loop(
    config: VisionConfig,
    frames: cb::Receiver<LumaFrame>,
    history: Arc<Mutex<MotionHistory>>,
    signals: mpsc::Sender<MotionSignal>,
    metrics: Arc<MetricsRegistry>,
    stop_flag: Arc<AtomicBool>,
) {
    let mut previous: Option<LumaFrame> = None;
    let mut frame_counter: u64 = 0;
    let analyze_every = config.analyze_every.max(1) as u64;

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            info!("motion processing loop stopping");
            break;
        }

        let frame = match frames.recv_timeout(Duration::from_millis(100)) {
            Ok(frame) => frame,
            Err(cb::RecvTimeoutError::Timeout) => continue,
            Err(cb::RecvTimeoutError::Disconnected) => {
                info!("frame channel closed, motion processing loop exiting");
                break;
            }
        };

        frame_counter += 1;
        if frame_counter % analyze_every != 0 {
            continue;
        }

        let Some(prev) = previous.as_ref() else {
            previous = Some(frame);
            continue;
        };

        let sample = diff_frames(prev, &frame, config.noise_threshold, config.margin_frac);
        let at = sample.at;
        let classification = {
            let mut history = history.lock();
            history.push(sample);
            history.evict(at);
            history.classify(config.min_activity, config.dominance_ratio)
        };

        if let Some(signal) = classification {
            metrics.record(metric_names::MOTION_CLASSIFY, sample.total as f64);
            debug!(%signal, total = sample.total, "motion_signal");
            if signals.blocking_send(signal).is_err() {
                warn!("motion signal receiver dropped, stopping pipeline");
                break;
            }
        }

        previous = Some(frame);
    }
}
