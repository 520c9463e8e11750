use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tower::{BoxError, Service, ServiceBuilder, ServiceExt};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::common::{decode_image, FrameResult, IngressFrame};
use crate::config::{Configuration, TriggerPolicy};
use crate::dashboard::{StatsBoard, SummaryQuery};
use crate::detection::Detector;
use crate::error::{AppError, TransportError};
use crate::pipeline::events::{ClassifiedEvent, StatsSnapshot};
use crate::pipeline::services::{
    PipelineMetrics, PipelineStats, PublishMetricsLayer, PublishReceipt, PublishService,
    RecordSink, ResultPublisher,
};
use crate::pipeline::DetectionSession;

/// Producer handle for the ingestion queue. The queue holds at most
/// `ingest_credit` frames, so `send` waits while the detector is busy.
#[derive(Debug, Clone)]
pub struct FrameSender {
    sender: mpsc::Sender<IngressFrame>,
}

impl FrameSender {
    pub async fn send(&self, frame: IngressFrame) -> Result<(), AppError> {
        self.sender
            .send(frame)
            .await
            .map_err(|_| AppError::Transport(TransportError::QueueClosed))
    }
}

/// What the detection lane hands back when it stops.
#[derive(Debug, Clone)]
struct DetectionReport {
    last_frame_id: Option<u64>,
    abandoned: Vec<ClassifiedEvent>,
    stats: StatsSnapshot,
}

#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub session_id: Uuid,
    pub last_frame_id: Option<u64>,
    pub abandoned: Vec<ClassifiedEvent>,
    pub stats: StatsSnapshot,
    pub pipeline: PipelineStats,
}

/// Runs one monitoring session.
///
/// A single detection lane owns the session state and consumes frames in
/// delivery order. Each result is handed to a bounded pool of side-effect
/// workers through a queue the lane never waits on.
pub struct Coordinator {
    session_id: Uuid,
    frame_tx: Option<mpsc::Sender<IngressFrame>>,
    detection_task: Option<JoinHandle<DetectionReport>>,
    dispatch_task: Option<JoinHandle<()>>,
    stats_board: StatsBoard,
    metrics: PipelineMetrics,
    cancel_token: CancellationToken,
    summary_cache: Duration,
}

impl Coordinator {
    fn start(
        configuration: Configuration,
        detector: Box<dyn Detector>,
        publisher: Option<Arc<dyn ResultPublisher>>,
        sink: Option<Arc<dyn RecordSink>>,
        metrics: PipelineMetrics,
        cancel_token: CancellationToken,
    ) -> Self {
        let session = DetectionSession::new(&configuration);
        let session_id = session.session_id();
        let stats_board = StatsBoard::new();
        let pipeline_settings = &configuration.pipeline;

        let (frame_tx, frame_rx) = mpsc::channel(pipeline_settings.ingest_credit);
        let (result_tx, result_rx) = mpsc::channel(pipeline_settings.result_queue_capacity);

        let mut publish_service =
            PublishService::new(session_id, pipeline_settings.jpeg_quality, metrics.clone());
        if let Some(publisher) = publisher {
            publish_service = publish_service.with_publisher(publisher);
        }
        if let Some(sink) = sink {
            publish_service = publish_service.with_sink(sink);
        }
        let side_effects = ServiceBuilder::new()
            .concurrency_limit(pipeline_settings.publish_workers)
            .layer(PublishMetricsLayer::new(metrics.clone()))
            .timeout(pipeline_settings.publish_timeout())
            .service(publish_service);

        let dispatch_task = tokio::spawn(Self::dispatch(
            result_rx,
            side_effects,
            pipeline_settings.shutdown_grace(),
            cancel_token.clone(),
        ));

        let lane = DetectionLane {
            session,
            detector,
            frame_rx,
            result_tx,
            stats_board: stats_board.clone(),
            metrics: metrics.clone(),
            cancel_token: cancel_token.clone(),
        };
        let handle = Handle::current();
        let detection_task = tokio::task::spawn_blocking(move || lane.run(handle));

        info!(
            "Session {} started: {} regions, {:?} trigger, {} side-effect workers",
            session_id,
            configuration.regions.len(),
            configuration.events.trigger,
            pipeline_settings.publish_workers
        );

        Self {
            session_id,
            frame_tx: Some(frame_tx),
            detection_task: Some(detection_task),
            dispatch_task: Some(dispatch_task),
            stats_board,
            metrics,
            cancel_token,
            summary_cache: configuration.summary_cache_window(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// `None` once the coordinator has started shutting down.
    pub fn frame_sender(&self) -> Option<FrameSender> {
        self.frame_tx.as_ref().map(|sender| FrameSender {
            sender: sender.clone(),
        })
    }

    pub fn stats_board(&self) -> StatsBoard {
        self.stats_board.clone()
    }

    pub fn summary_query(&self) -> SummaryQuery {
        SummaryQuery::new(self.stats_board.clone(), self.summary_cache)
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Processes every frame already sent, then stops. Returns once all
    /// [`FrameSender`] clones have been dropped and the queues are empty.
    pub async fn finish(mut self) -> Result<ShutdownReport, AppError> {
        self.frame_tx.take();
        self.join().await
    }

    /// Stops without waiting for queued frames. Open events are abandoned
    /// and in-flight side effects get the shutdown grace period.
    pub async fn shutdown(mut self) -> Result<ShutdownReport, AppError> {
        self.frame_tx.take();
        self.cancel_token.cancel();
        self.join().await
    }

    async fn join(&mut self) -> Result<ShutdownReport, AppError> {
        let report = match self.detection_task.take() {
            Some(task) => task.await.map_err(task_failed)?,
            None => return Err(AppError::Pipeline("Detection lane already joined".to_string())),
        };
        if let Some(task) = self.dispatch_task.take() {
            task.await.map_err(task_failed)?;
        }

        let report = ShutdownReport {
            session_id: self.session_id,
            last_frame_id: report.last_frame_id,
            abandoned: report.abandoned,
            stats: report.stats,
            pipeline: self.metrics.get_stats(),
        };
        info!(
            "Session {} stopped at frame {:?}: {} violations, {} safe pickups, {} abandoned events",
            report.session_id,
            report.last_frame_id,
            report.stats.total_violations,
            report.stats.total_safe_pickups,
            report.abandoned.len()
        );
        Ok(report)
    }

    async fn dispatch<S>(
        mut results: mpsc::Receiver<FrameResult>,
        mut service: S,
        shutdown_grace: Duration,
        cancel_token: CancellationToken,
    ) where
        S: Service<FrameResult, Response = PublishReceipt, Error = BoxError>,
        S::Future: Send + 'static,
    {
        let mut in_flight = JoinSet::new();
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                result = results.recv() => result,
            };
            let Some(result) = result else {
                break;
            };
            let frame_id = result.frame_id;
            // Waits for a free worker; the detection lane never does.
            let ready = match service.ready().await {
                Ok(ready) => ready,
                Err(e) => {
                    error!("Side-effect pool unavailable: {}", e);
                    break;
                }
            };
            let future = ready.call(result);
            in_flight.spawn(async move { (frame_id, future.await) });

            while let Some(done) = in_flight.try_join_next() {
                Self::log_side_effect(done);
            }
        }

        let queued = results.len();
        if queued > 0 {
            warn!("Discarding side effects for {} queued frames", queued);
        }

        let grace = tokio::time::sleep(shutdown_grace);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                _ = &mut grace => {
                    warn!("Abandoning {} in-flight side effects after {:?}", in_flight.len(), shutdown_grace);
                    in_flight.abort_all();
                    break;
                }
                done = in_flight.join_next() => match done {
                    Some(done) => Self::log_side_effect(done),
                    None => break,
                },
            }
        }
        debug!("Side-effect dispatcher stopped");
    }

    fn log_side_effect(done: Result<(u64, Result<PublishReceipt, BoxError>), JoinError>) {
        match done {
            Ok((frame_id, Ok(receipt))) => trace!(
                "Frame {} side effects done (published: {}, recorded: {})",
                frame_id,
                receipt.published,
                receipt.recorded
            ),
            Ok((frame_id, Err(e))) => warn!("Side effects for frame {} failed: {}", frame_id, e),
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!("Side-effect task panicked: {}", e),
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

fn task_failed(e: JoinError) -> AppError {
    AppError::Pipeline(format!("Pipeline task failed: {}", e))
}

/// The single owner of the session state. Runs on a blocking thread since
/// detection and the processing steps are synchronous.
struct DetectionLane {
    session: DetectionSession,
    detector: Box<dyn Detector>,
    frame_rx: mpsc::Receiver<IngressFrame>,
    result_tx: mpsc::Sender<FrameResult>,
    stats_board: StatsBoard,
    metrics: PipelineMetrics,
    cancel_token: CancellationToken,
}

impl DetectionLane {
    fn run(mut self, handle: Handle) -> DetectionReport {
        debug!("Detection lane running with detector '{}'", self.detector.name());
        loop {
            let next = handle.block_on(async {
                tokio::select! {
                    biased;
                    _ = self.cancel_token.cancelled() => None,
                    frame = self.frame_rx.recv() => frame,
                }
            });
            let Some(frame) = next else {
                break;
            };
            self.handle_frame(frame);
        }

        let abandoned = self.session.drain();
        let stats = self.session.stats_snapshot();
        self.stats_board.publish(stats.clone());
        DetectionReport {
            last_frame_id: self.session.last_frame_id(),
            abandoned,
            stats,
        }
    }

    fn handle_frame(&mut self, frame: IngressFrame) {
        let frame_id = frame
            .frame_id
            .unwrap_or_else(|| self.session.next_frame_id());
        if let Some(last_frame_id) = self.session.last_frame_id() {
            if frame_id <= last_frame_id {
                debug!("Skipping redelivered frame {}", frame_id);
                self.metrics.on_duplicate_frame();
                return;
            }
        }

        match self.advance(frame_id, &frame.payload) {
            Ok(result) => {
                self.metrics.on_frame_processed(self.session.last_metrics());
                self.stats_board.publish(self.session.stats_snapshot());
                match self.result_tx.try_send(result) {
                    Ok(()) => {}
                    Err(TrySendError::Full(result)) => {
                        warn!("Side-effect queue full, dropping frame {}", result.frame_id);
                        self.metrics.on_side_effect_dropped();
                    }
                    Err(TrySendError::Closed(result)) => {
                        warn!("Side-effect queue closed, dropping frame {}", result.frame_id);
                        self.metrics.on_side_effect_dropped();
                    }
                }
            }
            Err(AppError::Decode(e)) => {
                warn!("Skipping frame: {}", e);
                self.metrics.on_decode_failure();
            }
            Err(AppError::DuplicateFrame { frame_id, .. }) => {
                debug!("Skipping redelivered frame {}", frame_id);
                self.metrics.on_duplicate_frame();
            }
            Err(e) => {
                error!("Frame {} failed: {}", frame_id, e);
                self.metrics.on_pipeline_failure();
            }
        }
    }

    /// Decodes, detects and runs the pipeline for one frame. A payload that
    /// fails to decode leaves the session untouched.
    fn advance(&mut self, frame_id: u64, payload: &[u8]) -> Result<FrameResult, AppError> {
        let image = decode_image(frame_id, payload)?;
        let detections = self.detector.detect(frame_id, &image);
        self.session.process(frame_id, &detections, Some(image))
    }
}

pub struct CoordinatorBuilder {
    configuration: Configuration,
    detector: Option<Box<dyn Detector>>,
    publisher: Option<Arc<dyn ResultPublisher>>,
    sink: Option<Arc<dyn RecordSink>>,
    metrics: Option<PipelineMetrics>,
    cancel_token: Option<CancellationToken>,
}

impl CoordinatorBuilder {
    pub fn new(configuration: Configuration) -> Self {
        Self {
            configuration,
            detector: None,
            publisher: None,
            sink: None,
            metrics: None,
            cancel_token: None,
        }
    }

    // Overrides the configured trigger policy.
    pub fn trigger(mut self, trigger: TriggerPolicy) -> Self {
        self.configuration.events.trigger = trigger;
        self
    }

    // Overrides the configured evaluation window.
    pub fn window_frames(mut self, window_frames: u64) -> Self {
        self.configuration.events.window_frames = window_frames;
        self
    }

    // Overrides the configured cooldown.
    pub fn cooldown_frames(mut self, cooldown_frames: u64) -> Self {
        self.configuration.events.cooldown_frames = cooldown_frames;
        self
    }

    // Overrides the size of the side-effect pool.
    pub fn publish_workers(mut self, publish_workers: usize) -> Self {
        self.configuration.pipeline.publish_workers = publish_workers;
        self
    }

    // Overrides the capacity of the queue between detection and side effects.
    pub fn result_queue_capacity(mut self, capacity: usize) -> Self {
        self.configuration.pipeline.result_queue_capacity = capacity;
        self
    }

    pub fn detector(mut self, detector: impl Detector + 'static) -> Self {
        self.detector = Some(Box::new(detector));
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn ResultPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Shares a stop signal with other tasks, such as the live view.
    pub fn cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = Some(cancel_token);
        self
    }

    /// Validates the configuration and starts the session tasks. Must be
    /// called from within a Tokio runtime.
    pub fn build(self) -> Result<Coordinator, AppError> {
        self.configuration.validate()?;
        let detector = self
            .detector
            .ok_or_else(|| AppError::Pipeline("Detector not set".to_string()))?;
        Ok(Coordinator::start(
            self.configuration,
            detector,
            self.publisher,
            self.sink,
            self.metrics.unwrap_or_default(),
            self.cancel_token.unwrap_or_default(),
        ))
    }
}
