//! Voice navigation session: final transcripts in, flip requests out.
//! One transcript at a time; while an interpretation or a multi-step page
//! jump is in flight, further transcripts are dropped. A page jump walks one
//! flip at a time and aborts the walk as soon as a step is rejected or the
//! session epoch goes stale.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cancellation::EpochGuard;
use crate::flipbook::{FlipBook, FlipDirection};
use crate::interpret::{InputKind, InterpretContext, InterpretService, NavigationIntent};
use crate::metrics::{metric_names, MetricsRegistry};

pub struct VoiceSession {
    flipbook: Arc<FlipBook>,
    interpreter: Arc<InterpretService>,
    metrics: Arc<MetricsRegistry>,
    processing: AtomicBool,
}

impl VoiceSession {
    pub fn new(
        flipbook: Arc<FlipBook>,
        interpreter: Arc<InterpretService>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            flipbook,
            interpreter,
            metrics,
            processing: AtomicBool::new(false),
        }
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Handle one final transcript. Dropped silently when a previous
    /// transcript is still being handled.
    pub async fn handle_transcript(&self, transcript: &str, guard: &EpochGuard) {
        if self.processing.swap(true, Ordering::SeqCst) {
            debug!(transcript, "transcript_dropped_processing");
            return;
        }

        let snapshot = self.flipbook.snapshot();
        let ctx = InterpretContext {
            current_index: snapshot.index,
            page_count: snapshot.page_count,
        };
        let span = self.metrics.span(metric_names::VOICE_DISPATCH);
        let intent = self
            .interpreter
            .interpret(transcript, InputKind::Voice, ctx, guard.token())
            .await;

        if guard.should_continue() {
            match intent {
                NavigationIntent::Next => {
                    span.finish();
                    self.flipbook.request_transition(FlipDirection::Forward);
                }
                NavigationIntent::Prev => {
                    span.finish();
                    self.flipbook.request_transition(FlipDirection::Backward);
                }
                NavigationIntent::Goto(page) => {
                    span.finish();
                    self.run_goto(page, guard).await;
                }
                NavigationIntent::None => {
                    debug!(transcript, "transcript_interpreted_none");
                }
            }
        } else {
            debug!(transcript, "transcript_dropped_stale_epoch");
        }

        self.processing.store(false, Ordering::SeqCst);
    }

    /// Walk toward a 1-based target page one flip at a time. A rejected step
    /// (another channel got there first) aborts the walk.
    async fn run_goto(&self, page: u32, guard: &EpochGuard) {
        let page_count = self.flipbook.snapshot().page_count;
        if page_count == 0 {
            return;
        }
        let clamped = page.clamp(1, page_count as u32);
        if clamped != page {
            warn!(page, clamped, "goto target clamped to deck bounds");
        }
        let target = (clamped - 1) as usize;
        info!(target, "goto walk started");

        loop {
            let index = self.flipbook.snapshot().index;
            if index == target {
                break;
            }
            let direction = if target > index {
                FlipDirection::Forward
            } else {
                FlipDirection::Backward
            };
            if !self.flipbook.request_transition(direction) {
                debug!(index, target, "goto step rejected, aborting walk");
                break;
            }
            self.flipbook.wait_idle().await;
            if !guard.should_continue() {
                debug!(target, "goto walk cancelled");
                break;
            }
        }
    }
}
