use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Future;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tower::Service;
use tracing::{debug, warn};
use uuid::Uuid;

use super::metrics::PipelineMetrics;
use super::sink::{RecordSink, ViolationRecord};
use crate::common::{encode_jpeg, BBox, FrameResult};
use crate::detection::Label;
use crate::error::TransportError;

/// What goes out on the result queue. Self-describing, since results may
/// arrive out of order or more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub frame_id: u64,
    pub is_violation: bool,
    pub is_safe_pickup: bool,
    pub labels: Vec<Label>,
    pub boxes: Vec<BBox>,
    pub messages: Vec<String>,
    /// JPEG-encoded annotated frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<Vec<u8>>,
}

impl ResultMessage {
    pub fn from_result(session_id: Uuid, result: &FrameResult, frame: Option<Vec<u8>>) -> Self {
        Self {
            session_id,
            timestamp: result.timestamp,
            frame_id: result.frame_id,
            is_violation: result.is_violation,
            is_safe_pickup: result.is_safe_pickup,
            labels: result.labels.clone(),
            boxes: result.boxes.clone(),
            messages: result.messages.clone(),
            frame,
        }
    }
}

#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, message: ResultMessage) -> Result<(), TransportError>;
    fn name(&self) -> &'static str;
}

/// In-process bounded result queue.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    sender: mpsc::Sender<ResultMessage>,
    send_timeout: Duration,
}

impl ChannelPublisher {
    pub fn channel(capacity: usize, send_timeout: Duration) -> (Self, mpsc::Receiver<ResultMessage>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                sender,
                send_timeout,
            },
            receiver,
        )
    }
}

#[async_trait]
impl ResultPublisher for ChannelPublisher {
    async fn publish(&self, message: ResultMessage) -> Result<(), TransportError> {
        let frame_id = message.frame_id;
        self.sender
            .send_timeout(message, self.send_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => TransportError::Timeout(frame_id),
                SendTimeoutError::Closed(_) => TransportError::QueueClosed,
            })
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    pub frame_id: u64,
    pub published: bool,
    pub recorded: bool,
}

/// Encode, publish and persist one frame result.
///
/// Publisher and sink failures are logged and counted but do not fail the
/// call; the other side effect still runs. Only a frame that cannot be
/// encoded fails outright.
#[derive(Clone)]
pub struct PublishService {
    session_id: Uuid,
    publisher: Option<Arc<dyn ResultPublisher>>,
    sink: Option<Arc<dyn RecordSink>>,
    jpeg_quality: u8,
    metrics: PipelineMetrics,
}

impl PublishService {
    pub fn new(session_id: Uuid, jpeg_quality: u8, metrics: PipelineMetrics) -> Self {
        Self {
            session_id,
            publisher: None,
            sink: None,
            jpeg_quality,
            metrics,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn ResultPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    async fn run(self, result: FrameResult) -> Result<PublishReceipt, TransportError> {
        let frame_id = result.frame_id;
        let mut receipt = PublishReceipt {
            frame_id,
            published: false,
            recorded: false,
        };

        let mut encode_error = None;
        if let Some(publisher) = &self.publisher {
            match self.encode(&result).await {
                Ok(frame) => {
                    let message = ResultMessage::from_result(self.session_id, &result, frame);
                    match publisher.publish(message).await {
                        Ok(()) => receipt.published = true,
                        Err(e) => {
                            warn!("Publisher '{}' dropped frame {}: {}", publisher.name(), frame_id, e);
                            self.metrics.on_publish_failure();
                        }
                    }
                }
                Err(e) => encode_error = Some(e),
            }
        }

        // The record does not depend on the encoded frame.
        if result.is_event_frame() {
            if let Some(sink) = &self.sink {
                let record = ViolationRecord::from_result(self.session_id, &result);
                match sink.append(record).await {
                    Ok(true) => {
                        receipt.recorded = true;
                        self.metrics.on_record_written();
                    }
                    Ok(false) => debug!("Frame {} already recorded in '{}'", frame_id, sink.name()),
                    Err(e) => {
                        warn!("Sink '{}' failed for frame {}: {}", sink.name(), frame_id, e);
                        self.metrics.on_publish_failure();
                    }
                }
            }
        }

        match encode_error {
            Some(e) => Err(e),
            None => Ok(receipt),
        }
    }

    async fn encode(&self, result: &FrameResult) -> Result<Option<Vec<u8>>, TransportError> {
        let Some(image) = result.annotated_frame.clone() else {
            return Ok(None);
        };
        let frame_id = result.frame_id;
        let quality = self.jpeg_quality;
        let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(frame_id, &image, quality))
            .await
            .map_err(|e| TransportError::Task(e.to_string()))??;
        Ok(Some(jpeg))
    }
}

impl Service<FrameResult> for PublishService {
    type Response = PublishReceipt;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, result: FrameResult) -> Self::Future {
        Box::pin(self.clone().run(result))
    }
}
