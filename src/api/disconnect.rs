use crate::core::metrics::get_metrics;
use axum::body::Bytes;
use futures::stream::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

/// Shared flag set once a response body has been fully delivered.
#[derive(Clone, Debug, Default)]
pub struct StreamCompletion {
    completed: Arc<AtomicBool>,
}

impl StreamCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the stream as completed normally.
    pub fn mark_completed(&self) {
        self.completed.store(true, Ordering::SeqCst);
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}

/// A stream wrapper that reports a client disconnect when dropped early.
///
/// Hyper drops the body as soon as the client goes away; if the producer had
/// not marked completion by then the exchange was cut short.
pub struct DisconnectStream<S> {
    pub stream: S,
    pub completion: StreamCompletion,
    pub endpoint: &'static str,
}

impl<S, E> Stream for DisconnectStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.stream).poll_next(cx)
    }
}

impl<S> Drop for DisconnectStream<S> {
    fn drop(&mut self) {
        if !self.completion.is_completed() {
            tracing::debug!(endpoint = self.endpoint, "Client disconnect detected - stream cancelled");
            get_metrics()
                .client_disconnects
                .with_label_values(&[self.endpoint])
                .inc();
        }
    }
}
