use futures::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::Service;
use tower_layer::Layer;

use super::metrics::PipelineMetrics;
use super::publish::PublishReceipt;
use crate::common::FrameResult;

/// Records side-effect latency and failures into [`PipelineMetrics`].
#[derive(Debug, Clone)]
pub struct PublishMetricsLayer {
    metrics: PipelineMetrics,
}

impl PublishMetricsLayer {
    pub fn new(metrics: PipelineMetrics) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for PublishMetricsLayer {
    type Service = PublishMetrics<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PublishMetrics {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishMetrics<S> {
    inner: S,
    metrics: PipelineMetrics,
}

impl<S> Service<FrameResult> for PublishMetrics<S>
where
    S: Service<FrameResult, Response = PublishReceipt>,
    S::Future: Send + 'static,
{
    type Response = PublishReceipt;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, result: FrameResult) -> Self::Future {
        let start = Instant::now();
        let metrics = self.metrics.clone();
        let future = self.inner.call(result);
        Box::pin(async move {
            let outcome = future.await;
            match &outcome {
                Ok(receipt) if receipt.published => metrics.on_published(start.elapsed()),
                Ok(_) => {}
                Err(_) => metrics.on_publish_failure(),
            }
            outcome
        })
    }
}
