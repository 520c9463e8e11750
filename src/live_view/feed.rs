use std::time::{Duration, Instant};
use tokio::time::timeout_at;

use super::latest_frame::{LatestFrame, LiveFrame};

#[derive(Debug, Clone)]
pub enum FeedState {
    /// Nothing decoded yet.
    Waiting,
    /// A frame not seen by this reader before.
    Live(LiveFrame),
    /// No new frame, but the last one is recent enough to keep showing.
    Repeat(LiveFrame),
    /// No new frame for longer than the stale grace period.
    Dead,
}

impl FeedState {
    pub fn frame(&self) -> Option<&LiveFrame> {
        match self {
            FeedState::Live(frame) | FeedState::Repeat(frame) => Some(frame),
            FeedState::Waiting | FeedState::Dead => None,
        }
    }
}

/// A single reader's view of the live feed. Readers joining mid-session see
/// only the current frame.
#[derive(Debug, Clone)]
pub struct LiveFeed {
    latest: LatestFrame,
    stale_grace: Duration,
    last_served: Option<u64>,
    last_fresh_at: Option<Instant>,
}

impl LiveFeed {
    pub fn new(latest: LatestFrame, stale_grace: Duration) -> Self {
        Self {
            latest,
            stale_grace,
            last_served: None,
            last_fresh_at: None,
        }
    }

    pub fn poll(&mut self) -> FeedState {
        let Some(frame) = self.latest.snapshot() else {
            return FeedState::Waiting;
        };

        let now = Instant::now();
        if self.last_served != Some(frame.frame_id) {
            self.last_served = Some(frame.frame_id);
            self.last_fresh_at = Some(now);
            return FeedState::Live(frame);
        }

        let fresh_at = self.last_fresh_at.unwrap_or(now);
        if now.duration_since(fresh_at) <= self.stale_grace {
            FeedState::Repeat(frame)
        } else {
            FeedState::Dead
        }
    }

    /// Waits at most `wait` for a frame this reader has not seen, then
    /// settles for whatever [`poll`](Self::poll) reports.
    pub async fn next_frame(&mut self, wait: Duration) -> FeedState {
        let deadline = tokio::time::Instant::now() + wait;
        let latest = self.latest.clone();
        loop {
            let notified = latest.notify().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let state = self.poll();
            if matches!(state, FeedState::Live(_)) {
                return state;
            }
            if timeout_at(deadline, notified).await.is_err() {
                return self.poll();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::RgbImage;
    use std::sync::Arc;

    fn frame(frame_id: u64) -> LiveFrame {
        LiveFrame {
            frame_id,
            timestamp: Utc::now(),
            is_violation: false,
            image: Arc::new(RgbImage::new(2, 2)),
            decoded_at: std::time::Instant::now(),
        }
    }

    #[test]
    fn walks_through_live_repeat_and_dead() {
        let latest = LatestFrame::new();
        let mut feed = LiveFeed::new(latest.clone(), Duration::from_millis(30));
        assert!(matches!(feed.poll(), FeedState::Waiting));

        latest.store(frame(1));
        assert!(matches!(feed.poll(), FeedState::Live(f) if f.frame_id == 1));
        assert!(matches!(feed.poll(), FeedState::Repeat(f) if f.frame_id == 1));

        std::thread::sleep(Duration::from_millis(60));
        assert!(matches!(feed.poll(), FeedState::Dead));

        latest.store(frame(2));
        assert!(matches!(feed.poll(), FeedState::Live(f) if f.frame_id == 2));
    }

    #[tokio::test]
    async fn next_frame_wakes_on_store() {
        let latest = LatestFrame::new();
        let mut feed = LiveFeed::new(latest.clone(), Duration::from_millis(500));
        let writer = latest.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.store(frame(7));
        });
        let state = feed.next_frame(Duration::from_secs(2)).await;
        assert!(matches!(state, FeedState::Live(f) if f.frame_id == 7));
    }

    #[tokio::test]
    async fn next_frame_gives_up_after_the_bound() {
        let latest = LatestFrame::new();
        let mut feed = LiveFeed::new(latest, Duration::from_millis(500));
        let started = std::time::Instant::now();
        assert!(matches!(
            feed.next_frame(Duration::from_millis(30)).await,
            FeedState::Waiting
        ));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
