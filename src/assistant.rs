//! Presenter assistant: audience question in, spoken answer out.
//! Q&A goes through a remote backend; the answer (or a fixed localized
//! apology on failure) is handed to a speech synthesizer. Disabling the
//! assistant cancels in-flight synthesis through the channel epoch.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancellation::EpochGuard;
use crate::metrics::{metric_names, MetricsRegistry};

#[derive(Debug)]
pub enum QaError {
    ApiError(String),
    Status(u16),
    Timeout,
    Cancelled,
}

impl std::fmt::Display for QaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QaError::ApiError(msg) => write!(f, "API error: {msg}"),
            QaError::Status(code) => write!(f, "unexpected status {code}"),
            QaError::Timeout => write!(f, "answer timeout"),
            QaError::Cancelled => write!(f, "answer cancelled"),
        }
    }
}

#[derive(Debug)]
pub enum SynthError {
    Cancelled,
    Failed(String),
}

impl std::fmt::Display for SynthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SynthError::Cancelled => write!(f, "synthesis cancelled"),
            SynthError::Failed(msg) => write!(f, "synthesis failed: {msg}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QaRequest {
    pub message: String,
    pub context: String,
    pub locale: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QaResponse {
    pub response: String,
}

/// Q&A backend seam; tests substitute a fake.
pub trait QaBackend: Send + Sync {
    fn ask<'a>(
        &'a self,
        request: &'a QaRequest,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<QaResponse, QaError>> + Send + 'a>>;
}

/// Speech output seam. The future resolves when playback ends or the token
/// cancels it.
pub trait SpeechSynth: Send + Sync {
    fn speak<'a>(
        &'a self,
        text: &'a str,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), SynthError>> + Send + 'a>>;
}

/// Production Q&A backend: POSTs the question as JSON.
pub struct HttpQaClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpQaClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, QaError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| QaError::ApiError(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

impl QaBackend for HttpQaClient {
    fn ask<'a>(
        &'a self,
        request: &'a QaRequest,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<QaResponse, QaError>> + Send + 'a>> {
        Box::pin(async move {
            let send = self.http.post(&self.endpoint).json(request).send();
            let response = tokio::select! {
                result = send => result.map_err(|e| {
                    if e.is_timeout() {
                        QaError::Timeout
                    } else {
                        QaError::ApiError(e.to_string())
                    }
                })?,
                _ = cancel.cancelled() => return Err(QaError::Cancelled),
            };
            if !response.status().is_success() {
                return Err(QaError::Status(response.status().as_u16()));
            }
            response
                .json::<QaResponse>()
                .await
                .map_err(|e| QaError::ApiError(format!("malformed response: {e}")))
        })
    }
}

/// UI-facing assistant state, updated as a question moves through the
/// answer/speak pipeline.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssistantSnapshot {
    pub question: String,
    pub answer: String,
    pub loading: bool,
    pub speaking: bool,
}

pub struct Assistant {
    qa: Arc<dyn QaBackend>,
    synth: Arc<dyn SpeechSynth>,
    state: Mutex<AssistantSnapshot>,
    slide_context: Mutex<String>,
    locale: String,
    apology: &'static str,
    metrics: Arc<MetricsRegistry>,
    processing: AtomicBool,
}

impl Assistant {
    pub fn new(
        qa: Arc<dyn QaBackend>,
        synth: Arc<dyn SpeechSynth>,
        locale: impl Into<String>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let locale = locale.into();
        Self {
            qa,
            synth,
            state: Mutex::new(AssistantSnapshot::default()),
            slide_context: Mutex::new(String::new()),
            apology: apology_for(&locale),
            locale,
            metrics,
            processing: AtomicBool::new(false),
        }
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Replace the presentation context sent with every question.
    pub fn set_context(&self, context: impl Into<String>) {
        *self.slide_context.lock() = context.into();
    }

    pub fn snapshot(&self) -> AssistantSnapshot {
        self.state.lock().clone()
    }

    /// Answer one audience question and speak the result. On any backend
    /// failure the fixed apology is spoken instead. One question at a time:
    /// a question arriving while another is being answered or spoken is
    /// dropped silently.
    pub async fn handle_question(&self, question: &str, guard: &EpochGuard) {
        if self.processing.swap(true, Ordering::SeqCst) {
            debug!(question, "question_dropped_processing");
            return;
        }
        self.answer_and_speak(question, guard).await;
        self.processing.store(false, Ordering::SeqCst);
    }

    async fn answer_and_speak(&self, question: &str, guard: &EpochGuard) {
        info!(question, "assistant question received");
        {
            let mut state = self.state.lock();
            state.question = question.to_string();
            state.answer.clear();
            state.loading = true;
        }

        let request = QaRequest {
            message: question.to_string(),
            context: self.slide_context.lock().clone(),
            locale: self.locale.clone(),
        };

        let span = self.metrics.span(metric_names::QA_DONE);
        let result = self.qa.ask(&request, guard.token()).await;
        if !guard.should_continue() {
            self.state.lock().loading = false;
            debug!(question, "answer dropped, assistant epoch stale");
            return;
        }

        let utterance = match result {
            Ok(answer) => {
                span.finish();
                let mut state = self.state.lock();
                state.answer = answer.response.clone();
                state.loading = false;
                answer.response
            }
            Err(e) => {
                warn!(error = %e, "answer failed, speaking apology");
                self.state.lock().loading = false;
                self.apology.to_string()
            }
        };

        self.state.lock().speaking = true;
        let synth_span = self.metrics.span(metric_names::SYNTH_DONE);
        match self.synth.speak(&utterance, guard.token()).await {
            Ok(()) => {
                synth_span.finish();
            }
            Err(e) => debug!(error = %e, "synthesis ended early"),
        }
        self.state.lock().speaking = false;
    }
}

fn apology_for(locale: &str) -> &'static str {
    let lang = locale.split(['-', '_']).next().unwrap_or(locale);
    match lang {
        "vi" => "Xin lỗi, tôi không thể trả lời câu hỏi này ngay bây giờ.",
        _ => "Sorry, I can't answer that right now.",
    }
}
