//! Page-flip state machine: Idle(index) ⇄ Animating(index, direction, angle).
//! The flipbook is the single serialization point for navigation: a request
//! arriving mid-animation or at a boundary index is silently dropped, never
//! queued. All input channels (voice, gesture, manual controls) go through
//! `request_transition`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::metrics::{metric_names, MetricsRegistry};

/// Angle at which a flip transition is complete.
pub const FLIP_COMPLETE_DEG: f64 = 180.0;

/// Animation frame interval. Progress is recomputed from elapsed time, so the
/// total flip duration does not depend on this tick rate.
const TICK: Duration = Duration::from_millis(16);

/// Direction of a single-step transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FlipDirection {
    Forward,
    Backward,
}

impl std::fmt::Display for FlipDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlipDirection::Forward => write!(f, "forward"),
            FlipDirection::Backward => write!(f, "backward"),
        }
    }
}

/// Point-in-time view of the flipbook, published on every change.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FlipSnapshot {
    pub index: usize,
    pub page_count: usize,
    pub animating: bool,
    pub direction: Option<FlipDirection>,
    /// Current flip angle in degrees, 0 when idle.
    pub angle: f64,
}

impl FlipSnapshot {
    /// The spread indices a renderer needs: the resting spread, plus the
    /// incoming adjacent spread while a transition is running.
    pub fn spread_view(&self) -> SpreadView {
        let incoming = self.direction.map(|d| match d {
            FlipDirection::Forward => self.index + 1,
            // Backward is only accepted at index >= 1.
            FlipDirection::Backward => self.index - 1,
        });
        SpreadView {
            current: self.index,
            incoming,
            direction: self.direction,
            angle: self.angle,
        }
    }
}

/// Renderable description of the visible spread(s).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpreadView {
    pub current: usize,
    pub incoming: Option<usize>,
    pub direction: Option<FlipDirection>,
    pub angle: f64,
}

/// Ease-in-out cubic flip angle for the given elapsed time.
/// Monotonically non-decreasing in `elapsed`; exactly 180° at `total`.
pub fn flip_angle(elapsed: Duration, total: Duration) -> f64 {
    if total.is_zero() || elapsed >= total {
        return FLIP_COMPLETE_DEG;
    }
    let t = elapsed.as_secs_f64() / total.as_secs_f64();
    let eased = if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    };
    eased * FLIP_COMPLETE_DEG
}

struct FlipState {
    index: usize,
    direction: Option<FlipDirection>,
    started_at: Option<Instant>,
    angle: f64,
}

/// The navigation state machine. Long-lived for the presentation's life;
/// mutated only by its own transition routine.
pub struct FlipBook {
    state: Mutex<FlipState>,
    page_count: usize,
    duration: Duration,
    metrics: Arc<MetricsRegistry>,
    tx: watch::Sender<FlipSnapshot>,
    rx: watch::Receiver<FlipSnapshot>,
}

impl FlipBook {
    pub fn new(page_count: usize, duration: Duration, metrics: Arc<MetricsRegistry>) -> Self {
        let page_count = page_count.max(1);
        let initial = FlipSnapshot {
            index: 0,
            page_count,
            animating: false,
            direction: None,
            angle: 0.0,
        };
        let (tx, rx) = watch::channel(initial);
        Self {
            state: Mutex::new(FlipState {
                index: 0,
                direction: None,
                started_at: None,
                angle: 0.0,
            }),
            page_count,
            duration,
            metrics,
            tx,
            rx,
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Current snapshot (non-blocking read).
    pub fn snapshot(&self) -> FlipSnapshot {
        let state = self.state.lock();
        self.snapshot_locked(&state)
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<FlipSnapshot> {
        self.rx.clone()
    }

    /// Wait until no transition is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in self, so wait_for cannot fail while we hold &self.
        let _ = rx.wait_for(|s| !s.animating).await;
    }

    /// Request a single-step transition. Returns false (with no state change)
    /// if a transition is already running or the index is at the boundary for
    /// the requested direction. Must be called within a tokio runtime.
    pub fn request_transition(self: &Arc<Self>, direction: FlipDirection) -> bool {
        {
            let mut state = self.state.lock();
            if state.direction.is_some() {
                debug!(%direction, index = state.index, "flip_rejected_busy");
                return false;
            }
            let at_boundary = match direction {
                FlipDirection::Forward => state.index + 1 >= self.page_count,
                FlipDirection::Backward => state.index == 0,
            };
            if at_boundary {
                debug!(%direction, index = state.index, "flip_rejected_boundary");
                return false;
            }
            state.direction = Some(direction);
            state.started_at = Some(Instant::now());
            state.angle = 0.0;
            let snapshot = self.snapshot_locked(&state);
            let _ = self.tx.send(snapshot);
            info!(%direction, index = state.index, "flip_started");
        }

        let book = Arc::clone(self);
        tokio::spawn(async move {
            book.drive_animation().await;
        });
        true
    }

    /// Timer-driven progress loop for one transition. Angle is recomputed
    /// from elapsed time on each tick and the step lands exactly at 180°.
    async fn drive_animation(&self) {
        loop {
            tokio::time::sleep(TICK).await;
            let done = {
                let mut state = self.state.lock();
                let Some(started_at) = state.started_at else {
                    // Nothing running; stale driver.
                    return;
                };
                let elapsed = started_at.elapsed();
                if elapsed >= self.duration {
                    let direction = state.direction;
                    match direction {
                        Some(FlipDirection::Forward) => state.index += 1,
                        Some(FlipDirection::Backward) => state.index -= 1,
                        None => {}
                    }
                    state.direction = None;
                    state.started_at = None;
                    state.angle = 0.0;
                    let snapshot = self.snapshot_locked(&state);
                    let _ = self.tx.send(snapshot);
                    self.metrics
                        .record(metric_names::FLIP_DONE, elapsed.as_micros() as f64);
                    info!(index = state.index, "flip_completed");
                    true
                } else {
                    state.angle = flip_angle(elapsed, self.duration);
                    let snapshot = self.snapshot_locked(&state);
                    let _ = self.tx.send(snapshot);
                    false
                }
            };
            if done {
                return;
            }
        }
    }

    fn snapshot_locked(&self, state: &FlipState) -> FlipSnapshot {
        FlipSnapshot {
            index: state.index,
            page_count: self.page_count,
            animating: state.direction.is_some(),
            direction: state.direction,
            angle: state.angle,
        }
    }
}
