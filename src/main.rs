use hygiene_monitor::common::{encode_jpeg, IngressFrame};
use hygiene_monitor::detection::ReplayDetector;
use hygiene_monitor::live_view::{FeedState, LiveView};
use hygiene_monitor::pipeline::services::{ChannelPublisher, JsonLinesSink, PipelineMetrics};
use hygiene_monitor::{AppError, Configuration, CoordinatorBuilder, SummaryQuery};
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const SUMMARY_INTERVAL: Duration = Duration::from_secs(5);

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn report_summary(mut query: SummaryQuery, cancel_token: CancellationToken) {
    let mut interval = tokio::time::interval(SUMMARY_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = interval.tick() => match query.summary_json() {
                Ok(summary) => info!("Summary: {}", summary),
                Err(e) => debug!("Failed to serialize summary: {}", e),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_logging();
    let configuration = Configuration::load()?;

    let replay_path = configuration
        .replay
        .path
        .clone()
        .ok_or_else(|| AppError::Pipeline("replay.path is not configured".to_string()))?;
    let detector = ReplayDetector::from_path(&replay_path)?;
    let frame_ids = detector.frame_ids();

    let cancel_token = CancellationToken::new();
    let metrics = PipelineMetrics::new();
    let (publisher, results) = ChannelPublisher::channel(
        configuration.pipeline.publish_queue_capacity,
        configuration.pipeline.publish_timeout(),
    );
    let live_view = LiveView::spawn(
        results,
        &configuration.live_view,
        metrics.clone(),
        cancel_token.clone(),
    );

    let mut builder = CoordinatorBuilder::new(configuration.clone())
        .detector(detector)
        .publisher(Arc::new(publisher))
        .metrics(metrics.clone())
        .cancel_token(cancel_token.clone());
    if let Some(path) = &configuration.records_path {
        builder = builder.sink(Arc::new(JsonLinesSink::open(path).await?));
    }
    let coordinator = builder.build()?;

    tokio::spawn(report_summary(
        coordinator.summary_query(),
        cancel_token.clone(),
    ));

    let mut feed = live_view.feed();
    let recv_timeout = configuration.live_view.recv_timeout();
    let feed_cancel = cancel_token.clone();
    tokio::spawn(async move {
        loop {
            let state = tokio::select! {
                _ = feed_cancel.cancelled() => break,
                state = feed.next_frame(recv_timeout) => state,
            };
            match state {
                FeedState::Live(frame) => debug!(
                    "Live frame {} (violation: {})",
                    frame.frame_id, frame.is_violation
                ),
                FeedState::Dead => debug!("Live feed stalled"),
                FeedState::Waiting | FeedState::Repeat(_) => {}
            }
        }
    });

    // Replay files carry detections only, so every frame is a blank canvas
    // for the annotations.
    let canvas = RgbImage::new(
        configuration.replay.frame_width,
        configuration.replay.frame_height,
    );
    let payload = encode_jpeg(0, &canvas, configuration.pipeline.jpeg_quality)?;
    let sender = coordinator
        .frame_sender()
        .ok_or_else(|| AppError::Pipeline("Coordinator is not accepting frames".to_string()))?;
    let producer = tokio::spawn(async move {
        for frame_id in frame_ids {
            if sender
                .send(IngressFrame::with_id(frame_id, payload.clone()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let report = tokio::select! {
        _ = producer => coordinator.finish().await?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            coordinator.shutdown().await?
        }
    };
    live_view.join().await;

    println!(
        "Session {}: {} violations, {} safe pickups over {} frames",
        report.session_id,
        report.stats.total_violations,
        report.stats.total_safe_pickups,
        report.pipeline.frames_processed
    );
    for (worker_id, stats) in &report.stats.per_worker {
        println!(
            "  Worker #{}: {} violations, {} safe pickups",
            worker_id, stats.violations, stats.safe_pickups
        );
    }
    if !report.abandoned.is_empty() {
        println!("  {} events abandoned at shutdown", report.abandoned.len());
    }
    Ok(())
}
