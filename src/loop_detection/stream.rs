//! Loop detection over a streamed response.
//!
//! [`StreamGuard`] wraps the fragment stream coming from a backend. Every
//! fragment is forwarded unchanged and then fed to a [`LoopDetector`]. When a
//! loop is confirmed the guard notifies the caller, asks the upstream to stop,
//! emits one synthetic fragment describing the cancellation and ends the
//! stream. Cancellation is cooperative: the guard stops polling the upstream
//! and signals it, it never aborts work already in flight.

use super::detector::LoopDetector;
use super::event::LoopDetectionEvent;
use crate::metrics::{CallbackKind, Metrics};
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Error type returned by guard callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type DetectionCallback = Box<dyn FnMut(&LoopDetectionEvent) -> Result<(), BoxError> + Send>;

/// Hook asking the producer of a stream to stop generating
#[async_trait]
pub trait UpstreamCancel: Send + Sync {
    async fn cancel(&self) -> Result<(), BoxError>;
}

#[async_trait]
impl UpstreamCancel for CancellationToken {
    async fn cancel(&self) -> Result<(), BoxError> {
        CancellationToken::cancel(self);
        Ok(())
    }
}

/// Builder for a loop-guarded fragment stream
pub struct StreamGuard<S> {
    upstream: S,
    detector: LoopDetector,
    on_detected: Option<DetectionCallback>,
    canceller: Option<Arc<dyn UpstreamCancel>>,
    metrics: Option<Metrics>,
}

/// Wrap `upstream` with loop detection and no callbacks
pub fn guard_stream<S, E>(
    upstream: S,
    detector: LoopDetector,
) -> impl Stream<Item = Result<String, E>> + Send + 'static
where
    S: Stream<Item = Result<String, E>> + Send + 'static,
    E: Send + 'static,
{
    StreamGuard::new(upstream, detector).into_stream()
}

impl<S, E> StreamGuard<S>
where
    S: Stream<Item = Result<String, E>> + Send + 'static,
    E: Send + 'static,
{
    pub fn new(upstream: S, detector: LoopDetector) -> Self {
        Self {
            upstream,
            detector,
            on_detected: None,
            canceller: None,
            metrics: None,
        }
    }

    /// Call `callback` with the event when a loop is detected
    ///
    /// An `Err` from the callback is logged and otherwise ignored.
    pub fn on_detected<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&LoopDetectionEvent) -> Result<(), BoxError> + Send + 'static,
    {
        self.on_detected = Some(Box::new(callback));
        self
    }

    /// Signal `canceller` when a loop is detected
    pub fn cancel_upstream(mut self, canceller: Arc<dyn UpstreamCancel>) -> Self {
        self.canceller = Some(canceller);
        self
    }

    /// Count callback failures in `metrics`
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Turn the guard into the downstream fragment stream
    ///
    /// Upstream errors are forwarded and end the stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<String, E>> + Send + 'static {
        let state = GuardState {
            upstream: Box::pin(self.upstream),
            detector: self.detector,
            on_detected: self.on_detected,
            canceller: self.canceller,
            metrics: self.metrics,
            phase: Phase::Streaming,
        };

        stream::unfold(state, |mut state| async move {
            match std::mem::replace(&mut state.phase, Phase::Finished) {
                Phase::Finished => None,
                Phase::Detected(event) => {
                    let notice = state.cancel(&event).await;
                    Some((Ok(notice), state))
                }
                Phase::Streaming => match state.upstream.next().await {
                    None => None,
                    Some(Ok(fragment)) => {
                        state.phase = state.inspect(&fragment);
                        Some((Ok(fragment), state))
                    }
                    Some(Err(e)) => {
                        debug!("Upstream stream failed, forwarding error");
                        Some((Err(e), state))
                    }
                },
            }
        })
    }
}

enum Phase {
    Streaming,
    Detected(LoopDetectionEvent),
    Finished,
}

struct GuardState<S> {
    upstream: Pin<Box<S>>,
    detector: LoopDetector,
    on_detected: Option<DetectionCallback>,
    canceller: Option<Arc<dyn UpstreamCancel>>,
    metrics: Option<Metrics>,
    phase: Phase,
}

impl<S> GuardState<S> {
    fn inspect(&mut self, fragment: &str) -> Phase {
        if !self.detector.is_enabled() {
            return Phase::Streaming;
        }

        match self.detector.process_chunk(fragment) {
            Some(event) => Phase::Detected(event),
            None => Phase::Streaming,
        }
    }

    async fn cancel(&mut self, event: &LoopDetectionEvent) -> String {
        if let Some(callback) = self.on_detected.as_mut()
            && let Err(e) = callback(event)
        {
            warn!(error = %e, "Loop detection callback failed");
            self.record_callback_failure(CallbackKind::OnDetected);
        }

        if let Some(canceller) = self.canceller.clone() {
            match canceller.cancel().await {
                Ok(()) => info!(
                    repetition_count = event.repetition_count,
                    "Requested upstream cancellation after loop detection"
                ),
                Err(e) => {
                    warn!(error = %e, "Upstream cancellation hook failed");
                    self.record_callback_failure(CallbackKind::CancelUpstream);
                }
            }
        }

        event.cancellation_message()
    }

    fn record_callback_failure(&self, kind: CallbackKind) {
        if let Some(metrics) = &self.metrics
            && let Err(e) = metrics.record_callback_failure(kind)
        {
            warn!(error = %e, callback = kind.as_str(), "Failed to record callback failure metric");
        }
    }
}
