pub mod feed;
pub mod latest_frame;

pub use feed::{FeedState, LiveFeed};
pub use latest_frame::{LatestFrame, LiveFrame};

use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::common::decode_image;
use crate::config::LiveViewSettings;
use crate::pipeline::services::{PipelineMetrics, ResultMessage};

/// Downstream consumer of the result queue.
///
/// One intake task copies results into a bounded buffer without ever
/// waiting (the newest item is dropped when the buffer is full), and a pool
/// of decode workers drains that buffer into the [`LatestFrame`] slot.
pub struct LiveView {
    latest: LatestFrame,
    stale_grace: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl LiveView {
    pub fn spawn(
        results: mpsc::Receiver<ResultMessage>,
        settings: &LiveViewSettings,
        metrics: PipelineMetrics,
        cancel_token: CancellationToken,
    ) -> Self {
        let latest = LatestFrame::new();
        let (buffer_tx, buffer_rx) = mpsc::channel(settings.buffer_capacity);
        let buffer_rx = Arc::new(Mutex::new(buffer_rx));

        let mut tasks = Vec::with_capacity(settings.decode_workers + 1);
        tasks.push(tokio::spawn(Self::intake(
            results,
            buffer_tx,
            metrics.clone(),
            cancel_token.clone(),
        )));
        for worker in 0..settings.decode_workers {
            tasks.push(tokio::spawn(Self::decode_worker(
                worker,
                Arc::clone(&buffer_rx),
                latest.clone(),
                settings.recv_timeout(),
                metrics.clone(),
                cancel_token.clone(),
            )));
        }

        Self {
            latest,
            stale_grace: settings.stale_grace(),
            tasks,
        }
    }

    pub fn latest(&self) -> LatestFrame {
        self.latest.clone()
    }

    pub fn feed(&self) -> LiveFeed {
        LiveFeed::new(self.latest.clone(), self.stale_grace)
    }

    /// Waits for the intake and decode tasks to wind down. They stop once
    /// the result queue closes and the buffer drains, or on cancellation.
    pub async fn join(self) {
        for outcome in join_all(self.tasks).await {
            if let Err(e) = outcome {
                warn!("Live view task ended abnormally: {}", e);
            }
        }
    }

    async fn intake(
        mut results: mpsc::Receiver<ResultMessage>,
        buffer: mpsc::Sender<ResultMessage>,
        metrics: PipelineMetrics,
        cancel_token: CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                _ = cancel_token.cancelled() => break,
                message = results.recv() => message,
            };
            let Some(message) = message else {
                debug!("Result queue closed, live view intake stopping");
                break;
            };
            match buffer.try_send(message) {
                Ok(()) => {}
                Err(TrySendError::Full(message)) => {
                    // Only the most recent frame matters for display
                    debug!("Live view buffer full, dropping frame {}", message.frame_id);
                    metrics.on_live_frame_dropped();
                }
                Err(TrySendError::Closed(_)) => break,
            }
        }
    }

    async fn decode_worker(
        worker: usize,
        buffer: Arc<Mutex<mpsc::Receiver<ResultMessage>>>,
        latest: LatestFrame,
        recv_timeout: Duration,
        metrics: PipelineMetrics,
        cancel_token: CancellationToken,
    ) {
        loop {
            let next = {
                let mut receiver = buffer.lock().await;
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    next = tokio::time::timeout(recv_timeout, receiver.recv()) => next,
                }
            };
            let message = match next {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(_) => {
                    trace!("Decode worker {} idle for {:?}", worker, recv_timeout);
                    continue;
                }
            };

            let Some(jpeg) = message.frame else {
                continue;
            };
            let frame_id = message.frame_id;
            let decoded =
                tokio::task::spawn_blocking(move || decode_image(frame_id, &jpeg)).await;
            match decoded {
                Ok(Ok(image)) => {
                    let stored = latest.store(LiveFrame {
                        frame_id,
                        timestamp: message.timestamp,
                        is_violation: message.is_violation,
                        image: Arc::new(image),
                        decoded_at: Instant::now(),
                    });
                    if stored {
                        metrics.on_live_frame_decoded();
                    } else {
                        trace!("Frame {} superseded before it was stored", frame_id);
                    }
                }
                Ok(Err(e)) => {
                    warn!("Live view skipped frame {}: {}", frame_id, e);
                    metrics.on_decode_failure();
                }
                Err(e) => warn!("Decode task for frame {} failed: {}", frame_id, e),
            }
        }
        trace!("Decode worker {} stopped", worker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::encode_jpeg;
    use chrono::Utc;
    use image::RgbImage;
    use uuid::Uuid;

    fn message(frame_id: u64, frame: Option<Vec<u8>>) -> ResultMessage {
        ResultMessage {
            session_id: Uuid::nil(),
            timestamp: Utc::now(),
            frame_id,
            is_violation: false,
            is_safe_pickup: false,
            labels: Vec::new(),
            boxes: Vec::new(),
            messages: Vec::new(),
            frame,
        }
    }

    fn jpeg() -> Vec<u8> {
        encode_jpeg(0, &RgbImage::new(16, 8), 80).unwrap()
    }

    #[tokio::test]
    async fn decodes_into_the_latest_slot() {
        let (tx, rx) = mpsc::channel(8);
        let view = LiveView::spawn(
            rx,
            &LiveViewSettings::default(),
            PipelineMetrics::new(),
            CancellationToken::new(),
        );
        let mut feed = view.feed();

        tx.send(message(1, Some(jpeg()))).await.unwrap();
        let state = feed.next_frame(Duration::from_secs(5)).await;
        let frame = state.frame().unwrap();
        assert_eq!(frame.frame_id, 1);
        assert_eq!(frame.image.dimensions(), (16, 8));

        drop(tx);
        view.join().await;
    }

    #[tokio::test]
    async fn corrupt_frames_are_skipped() {
        let (tx, rx) = mpsc::channel(8);
        let metrics = PipelineMetrics::new();
        let view = LiveView::spawn(
            rx,
            &LiveViewSettings::default(),
            metrics.clone(),
            CancellationToken::new(),
        );
        let latest = view.latest();

        tx.send(message(1, Some(vec![1, 2, 3]))).await.unwrap();
        tx.send(message(2, None)).await.unwrap();
        drop(tx);
        view.join().await;

        assert!(latest.snapshot().is_none());
        assert_eq!(metrics.get_stats().decode_failures, 1);
    }

    #[tokio::test]
    async fn full_buffer_drops_newest() {
        let (tx, rx) = mpsc::channel(16);
        let metrics = PipelineMetrics::new();
        let settings = LiveViewSettings {
            buffer_capacity: 1,
            decode_workers: 1,
            ..LiveViewSettings::default()
        };
        let view = LiveView::spawn(rx, &settings, metrics.clone(), CancellationToken::new());

        for frame_id in 1..=10 {
            tx.send(message(frame_id, Some(jpeg()))).await.unwrap();
        }
        drop(tx);
        view.join().await;

        // Every frame was either buffered and decoded or dropped on arrival.
        let stats = metrics.get_stats();
        assert_eq!(stats.live_frames_dropped + stats.live_frames_decoded, 10);
        assert!(stats.live_frames_decoded >= 1);
    }

    #[tokio::test]
    async fn cancellation_stops_idle_workers() {
        let (_tx, rx) = mpsc::channel::<ResultMessage>(1);
        let cancel_token = CancellationToken::new();
        let view = LiveView::spawn(
            rx,
            &LiveViewSettings::default(),
            PipelineMetrics::new(),
            cancel_token.clone(),
        );
        cancel_token.cancel();
        tokio::time::timeout(Duration::from_secs(1), view.join())
            .await
            .unwrap();
    }
}
