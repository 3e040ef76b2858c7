//! Gesture session: glue from directional motion signals to navigation.
//! Self-throttles with a cooldown so one physical wave produces at most one
//! transition request, and clears the motion history on dispatch so the same
//! motion cannot re-trigger. Signals arriving while an interpretation is in
//! flight are dropped, not queued.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cancellation::EpochGuard;
use crate::flipbook::{FlipBook, FlipDirection};
use crate::interpret::{InputKind, InterpretContext, InterpretService, NavigationIntent};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::vision::history::{MotionHistory, MotionSignal};

#[derive(Debug, Clone)]
pub struct GestureSessionConfig {
    /// Minimum time between two gesture dispatches.
    pub cooldown: Duration,
}

impl Default for GestureSessionConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_millis(2000),
        }
    }
}

/// Run the gesture orchestration loop as a tokio task. Exits when the
/// session epoch is cancelled or the signal source closes.
pub fn spawn_gesture_session(
    signals: mpsc::Receiver<MotionSignal>,
    history: Arc<Mutex<MotionHistory>>,
    interpreter: Arc<InterpretService>,
    flipbook: Arc<FlipBook>,
    metrics: Arc<MetricsRegistry>,
    config: GestureSessionConfig,
    guard: EpochGuard,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run_session(
            signals,
            history,
            interpreter,
            flipbook,
            metrics,
            config,
            guard,
        )
        .await;
    })
}

async fn run_session(
    mut signals: mpsc::Receiver<MotionSignal>,
    history: Arc<Mutex<MotionHistory>>,
    interpreter: Arc<InterpretService>,
    flipbook: Arc<FlipBook>,
    metrics: Arc<MetricsRegistry>,
    config: GestureSessionConfig,
    guard: EpochGuard,
) {
    let mut cooldown_until: Option<Instant> = None;
    info!("gesture session started");

    loop {
        let signal = tokio::select! {
            _ = guard.token().cancelled() => break,
            signal = signals.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };

        let now = Instant::now();
        if cooldown_until.is_some_and(|until| now < until) {
            debug!(%signal, "gesture_dropped_cooldown");
            continue;
        }

        // Processing starts: this loop is busy until the interpretation
        // settles; signals arriving meanwhile are drained afterwards.
        let snapshot = flipbook.snapshot();
        let ctx = InterpretContext {
            current_index: snapshot.index,
            page_count: snapshot.page_count,
        };
        let span = metrics.span(metric_names::GESTURE_DISPATCH);
        let intent = interpreter
            .interpret(&signal.to_string(), InputKind::Gesture, ctx, guard.token())
            .await;
        if !guard.should_continue() {
            break;
        }

        match intent {
            NavigationIntent::Next | NavigationIntent::Prev => {
                span.finish();
                cooldown_until = Some(Instant::now() + config.cooldown);
                history.lock().clear();
                let direction = if intent == NavigationIntent::Next {
                    FlipDirection::Forward
                } else {
                    FlipDirection::Backward
                };
                let accepted = flipbook.request_transition(direction);
                debug!(%signal, %direction, accepted, "gesture_dispatched");
            }
            // Gestures never resolve to page jumps; anything else is a no-op.
            NavigationIntent::Goto(_) | NavigationIntent::None => {
                debug!(%signal, "gesture_interpreted_none");
            }
        }

        // Drop signals that piled up while we were processing.
        while let Ok(stale) = signals.try_recv() {
            debug!(signal = %stale, "gesture_dropped_processing");
        }
    }

    info!("gesture session stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::ChannelEpoch;
    use crate::interpret::gateway::{IntentBackend, IntentResponse, InterpretRequest};
    use crate::interpret::GatewayError;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct NextBackend {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl IntentBackend for NextBackend {
        fn interpret<'a>(
            &'a self,
            request: &'a InterpretRequest,
            _cancel: &'a CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<IntentResponse, GatewayError>> + Send + 'a>>
        {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay;
            let action = if request.input.contains("left") {
                "prev"
            } else {
                "next"
            };
            Box::pin(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(IntentResponse {
                    action: action.into(),
                    page: None,
                })
            })
        }
    }

    struct Harness {
        backend: Arc<NextBackend>,
        flipbook: Arc<FlipBook>,
        history: Arc<Mutex<MotionHistory>>,
        signals: mpsc::Sender<MotionSignal>,
        epoch: ChannelEpoch,
        _task: tokio::task::JoinHandle<()>,
    }

    fn harness(delay: Duration) -> Harness {
        let backend = Arc::new(NextBackend {
            calls: AtomicUsize::new(0),
            delay,
        });
        let metrics = Arc::new(MetricsRegistry::new());
        let interpreter = Arc::new(InterpretService::new(
            Arc::clone(&backend) as Arc<dyn IntentBackend>,
            "en",
            Arc::clone(&metrics),
        ));
        let flipbook = Arc::new(FlipBook::new(
            5,
            Duration::from_millis(1200),
            Arc::clone(&metrics),
        ));
        let history = Arc::new(Mutex::new(MotionHistory::new(Duration::from_millis(600))));
        let (signal_tx, signal_rx) = mpsc::channel(16);
        let epoch = ChannelEpoch::new();
        let guard = epoch.advance();
        let task = spawn_gesture_session(
            signal_rx,
            Arc::clone(&history),
            interpreter,
            Arc::clone(&flipbook),
            metrics,
            GestureSessionConfig::default(),
            guard,
        );
        Harness {
            backend,
            flipbook,
            history,
            signals: signal_tx,
            epoch,
            _task: task,
        }
    }

    fn seed_history(history: &Mutex<MotionHistory>) {
        history.lock().push(crate::vision::history::MotionSample {
            left: 0,
            right: 500,
            total: 500,
            at: std::time::Instant::now(),
        });
    }

    /// Block until the flipbook settles at `index`. `wait_idle` alone is not
    /// enough here: right after a signal is sent the book is still idle, so
    /// the wait must be for the completed step, not for idleness.
    async fn wait_for_index(flipbook: &FlipBook, index: usize) {
        let mut rx = flipbook.subscribe();
        let _ = rx.wait_for(|s| s.index == index && !s.animating).await;
    }

    #[tokio::test(start_paused = true)]
    async fn second_signal_within_cooldown_is_dropped() {
        let h = harness(Duration::ZERO);
        seed_history(&h.history);

        h.signals
            .send(MotionSignal::RightDominant)
            .await
            .expect("send");
        wait_for_index(&h.flipbook, 1).await;
        assert!(h.history.lock().is_empty(), "history cleared on dispatch");

        // Flip takes 1.2s, cooldown is 2s: still inside the window.
        h.signals
            .send(MotionSignal::RightDominant)
            .await
            .expect("send");
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.flipbook.snapshot().index, 1);

        // After the cooldown a new signal dispatches again.
        tokio::time::advance(Duration::from_millis(2100)).await;
        h.signals
            .send(MotionSignal::RightDominant)
            .await
            .expect("send");
        wait_for_index(&h.flipbook, 2).await;
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 2);
        h.epoch.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn signals_during_processing_are_dropped() {
        let h = harness(Duration::from_millis(100));
        h.signals
            .send(MotionSignal::RightDominant)
            .await
            .expect("send");
        h.signals
            .send(MotionSignal::RightDominant)
            .await
            .expect("send");
        wait_for_index(&h.flipbook, 1).await;
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.flipbook.snapshot().index, 1);
        h.epoch.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_epoch_stops_the_session() {
        let h = harness(Duration::ZERO);
        h.epoch.cancel();
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        // Sends after cancel go nowhere: the loop has exited.
        let _ = h.signals.send(MotionSignal::LeftDominant).await;
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.flipbook.snapshot().index, 0);
    }
}
