//! Command interpretation: transcript or motion descriptor in, navigation
//! intent out. Single abstraction point for both input channels.
//! Resolution order: locale keyword fast-path (voice only) → LRU+TTL cache →
//! HTTP gateway. Any transport or format failure resolves to
//! `NavigationIntent::None` — a failed interpretation must never crash or
//! hang the controller.

pub mod cache;
pub mod gateway;
pub mod keywords;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics::{metric_names, MetricsRegistry};
use cache::IntentCache;
use gateway::{IntentBackend, IntentResponse, InterpretRequest};
use keywords::KeywordMatcher;

/// Normalized output of interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationIntent {
    Next,
    Prev,
    /// Target page, 1-based as spoken ("page 5").
    Goto(u32),
    None,
}

/// Which channel produced the raw input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Voice,
    Gesture,
}

impl InputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::Voice => "voice",
            InputKind::Gesture => "gesture",
        }
    }
}

/// Navigation context sent along with every interpretation request.
#[derive(Debug, Clone, Copy)]
pub struct InterpretContext {
    pub current_index: usize,
    pub page_count: usize,
}

#[derive(Debug)]
pub enum GatewayError {
    ApiError(String),
    Status(u16),
    Timeout,
    Cancelled,
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::ApiError(msg) => write!(f, "API error: {msg}"),
            GatewayError::Status(code) => write!(f, "unexpected status {code}"),
            GatewayError::Timeout => write!(f, "interpretation timeout"),
            GatewayError::Cancelled => write!(f, "interpretation cancelled"),
        }
    }
}

/// Interpretation service: keyword fast-path, cache, gateway.
pub struct InterpretService {
    backend: Arc<dyn IntentBackend>,
    cache: IntentCache,
    keywords: KeywordMatcher,
    locale: String,
    metrics: Arc<MetricsRegistry>,
}

impl InterpretService {
    pub fn new(
        backend: Arc<dyn IntentBackend>,
        locale: impl Into<String>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let locale = locale.into();
        Self {
            backend,
            cache: IntentCache::new(256, Duration::from_secs(600)),
            keywords: KeywordMatcher::for_locale(&locale),
            locale,
            metrics,
        }
    }

    pub fn keywords(&self) -> &KeywordMatcher {
        &self.keywords
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Interpret raw input into an intent. Never fails: service errors and
    /// malformed responses resolve to `NavigationIntent::None`.
    pub async fn interpret(
        &self,
        input: &str,
        kind: InputKind,
        ctx: InterpretContext,
        cancel: &CancellationToken,
    ) -> NavigationIntent {
        let normalized = input.trim().to_lowercase();
        if normalized.is_empty() {
            return NavigationIntent::None;
        }

        if kind == InputKind::Voice {
            if let Some(intent) = self.keywords.match_intent(&normalized) {
                debug!(input = %normalized, ?intent, "keyword_fast_path");
                return intent;
            }
        }

        let key = IntentCache::compute_key(kind, &self.locale, &normalized);
        if let Some(intent) = self.cache.get(&key) {
            self.metrics.record(metric_names::INTERPRET_CACHE_HIT, 0.0);
            debug!(input = %normalized, ?intent, "intent_cache_hit");
            return intent;
        }

        let request = InterpretRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            input: normalized.clone(),
            kind,
            locale: self.locale.clone(),
            current_index: ctx.current_index,
            page_count: ctx.page_count,
        };

        let span = self.metrics.span(metric_names::INTERPRET_DONE);
        match self.backend.interpret(&request, cancel).await {
            Ok(response) => {
                span.finish();
                let intent = parse_intent(&response);
                if intent != NavigationIntent::None {
                    self.cache.insert(key, intent);
                }
                debug!(
                    request_id = %request.request_id,
                    kind = kind.as_str(),
                    ?intent,
                    "intent_resolved"
                );
                intent
            }
            Err(e) => {
                warn!(
                    request_id = %request.request_id,
                    error = %e,
                    "interpretation failed, treating as none"
                );
                NavigationIntent::None
            }
        }
    }
}

/// Map a wire response onto an intent. Unknown actions and a `goto` without
/// a valid page are treated as none.
fn parse_intent(response: &IntentResponse) -> NavigationIntent {
    match response.action.as_str() {
        "next" => NavigationIntent::Next,
        "prev" => NavigationIntent::Prev,
        "goto" => match response.page {
            Some(page) if page >= 1 => NavigationIntent::Goto(page),
            _ => NavigationIntent::None,
        },
        _ => NavigationIntent::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeBackend {
        responses: Mutex<Vec<Result<IntentResponse, GatewayError>>>,
        calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new(responses: Vec<Result<IntentResponse, GatewayError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl IntentBackend for FakeBackend {
        fn interpret<'a>(
            &'a self,
            _request: &'a InterpretRequest,
            _cancel: &'a CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<IntentResponse, GatewayError>> + Send + 'a>>
        {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = {
                let mut responses = self.responses.lock();
                if responses.is_empty() {
                    Err(GatewayError::ApiError("script exhausted".into()))
                } else {
                    responses.remove(0)
                }
            };
            Box::pin(async move { response })
        }
    }

    fn ctx() -> InterpretContext {
        InterpretContext {
            current_index: 0,
            page_count: 5,
        }
    }

    fn service(backend: Arc<FakeBackend>) -> InterpretService {
        InterpretService::new(backend, "en", Arc::new(MetricsRegistry::new()))
    }

    #[tokio::test]
    async fn keyword_fast_path_skips_backend_for_voice() {
        let backend = FakeBackend::new(vec![]);
        let service = service(Arc::clone(&backend));
        let cancel = CancellationToken::new();
        let intent = service
            .interpret("Next Page", InputKind::Voice, ctx(), &cancel)
            .await;
        assert_eq!(intent, NavigationIntent::Next);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn gesture_input_always_goes_to_backend() {
        let backend = FakeBackend::new(vec![Ok(IntentResponse {
            action: "next".into(),
            page: None,
        })]);
        let service = service(Arc::clone(&backend));
        let cancel = CancellationToken::new();
        let intent = service
            .interpret("right_dominant", InputKind::Gesture, ctx(), &cancel)
            .await;
        assert_eq!(intent, NavigationIntent::Next);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn resolved_intents_are_cached() {
        let backend = FakeBackend::new(vec![Ok(IntentResponse {
            action: "prev".into(),
            page: None,
        })]);
        let service = service(Arc::clone(&backend));
        let cancel = CancellationToken::new();
        for _ in 0..3 {
            let intent = service
                .interpret("left_dominant", InputKind::Gesture, ctx(), &cancel)
                .await;
            assert_eq!(intent, NavigationIntent::Prev);
        }
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn backend_failure_resolves_to_none_and_is_not_cached() {
        let backend = FakeBackend::new(vec![
            Err(GatewayError::Status(500)),
            Ok(IntentResponse {
                action: "next".into(),
                page: None,
            }),
        ]);
        let service = service(Arc::clone(&backend));
        let cancel = CancellationToken::new();
        let first = service
            .interpret("right_dominant", InputKind::Gesture, ctx(), &cancel)
            .await;
        assert_eq!(first, NavigationIntent::None);
        // The failure was not pinned; the next call reaches the backend.
        let second = service
            .interpret("right_dominant", InputKind::Gesture, ctx(), &cancel)
            .await;
        assert_eq!(second, NavigationIntent::Next);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn unknown_action_and_pageless_goto_are_none() {
        let backend = FakeBackend::new(vec![
            Ok(IntentResponse {
                action: "dance".into(),
                page: None,
            }),
            Ok(IntentResponse {
                action: "goto".into(),
                page: None,
            }),
            Ok(IntentResponse {
                action: "goto".into(),
                page: Some(4),
            }),
        ]);
        let service = service(Arc::clone(&backend));
        let cancel = CancellationToken::new();
        let a = service
            .interpret("utterance one", InputKind::Voice, ctx(), &cancel)
            .await;
        let b = service
            .interpret("utterance two", InputKind::Voice, ctx(), &cancel)
            .await;
        let c = service
            .interpret("utterance three", InputKind::Voice, ctx(), &cancel)
            .await;
        assert_eq!(a, NavigationIntent::None);
        assert_eq!(b, NavigationIntent::None);
        assert_eq!(c, NavigationIntent::Goto(4));
    }

    #[tokio::test]
    async fn empty_input_is_none_without_backend_call() {
        let backend = FakeBackend::new(vec![]);
        let service = service(Arc::clone(&backend));
        let cancel = CancellationToken::new();
        let intent = service
            .interpret("   ", InputKind::Voice, ctx(), &cancel)
            .await;
        assert_eq!(intent, NavigationIntent::None);
        assert_eq!(backend.calls(), 0);
    }
}
