use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::debug;

use crate::common::Point;

pub type WorkerId = u32;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerIdentity {
    pub worker_id: WorkerId,
    pub last_position: Point,
    pub last_seen_frame: u64,
}

/// Nearest known position strictly within `radius` of `position`.
pub fn nearest_within<I>(position: Point, known: I, radius: f32) -> Option<WorkerId>
where
    I: IntoIterator<Item = (WorkerId, Point)>,
{
    known
        .into_iter()
        .map(|(worker_id, last)| (worker_id, position.distance(&last)))
        .filter(|(_, distance)| *distance < radius)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(worker_id, _)| worker_id)
}

/// Maps unstable tracker ids onto stable worker ids.
///
/// Worker ids are minted sequentially from 1 and never reused, even after
/// eviction. A tracker id that is not yet bound is re-identified against
/// workers that have not already been claimed in the same frame, so two
/// people visible at once never collapse into one worker.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    reid_radius: f32,
    track_bindings: HashMap<u64, WorkerId>,
    workers: IndexMap<WorkerId, WorkerIdentity>,
    next_worker_id: WorkerId,
}

impl IdentityResolver {
    pub fn new(reid_radius: f32) -> Self {
        Self {
            reid_radius,
            track_bindings: HashMap::new(),
            workers: IndexMap::new(),
            next_worker_id: 1,
        }
    }

    pub fn resolve(&mut self, track_id: u64, position: Point, frame_id: u64) -> WorkerId {
        if let Some(&worker_id) = self.track_bindings.get(&track_id) {
            self.touch(worker_id, position, frame_id);
            return worker_id;
        }

        let candidates = self
            .workers
            .values()
            .filter(|identity| identity.last_seen_frame != frame_id)
            .map(|identity| (identity.worker_id, identity.last_position));
        if let Some(worker_id) = nearest_within(position, candidates, self.reid_radius) {
            debug!(
                "Re-identified track {} as worker {} at frame {}",
                track_id, worker_id, frame_id
            );
            self.track_bindings.insert(track_id, worker_id);
            self.touch(worker_id, position, frame_id);
            return worker_id;
        }

        let worker_id = self.next_worker_id;
        self.next_worker_id += 1;
        self.track_bindings.insert(track_id, worker_id);
        self.workers.insert(
            worker_id,
            WorkerIdentity {
                worker_id,
                last_position: position,
                last_seen_frame: frame_id,
            },
        );
        debug!(
            "New worker {} for track {} at frame {}",
            worker_id, track_id, frame_id
        );
        worker_id
    }

    /// Resolves every tracked person in a frame. Already-bound tracks are
    /// resolved first so that unbound tracks cannot steal a worker that is
    /// visible under its own track in this frame.
    pub fn resolve_frame(&mut self, tracks: &[(u64, Point)], frame_id: u64) -> Vec<WorkerId> {
        let mut resolved = vec![0; tracks.len()];
        let (known, unknown): (Vec<usize>, Vec<usize>) = (0..tracks.len())
            .partition(|&i| self.track_bindings.contains_key(&tracks[i].0));
        for i in known.into_iter().chain(unknown) {
            let (track_id, position) = tracks[i];
            resolved[i] = self.resolve(track_id, position, frame_id);
        }
        resolved
    }

    fn touch(&mut self, worker_id: WorkerId, position: Point, frame_id: u64) {
        if let Some(identity) = self.workers.get_mut(&worker_id) {
            identity.last_position = position;
            identity.last_seen_frame = frame_id;
        }
    }

    /// Drops identities unseen for more than `ttl_frames`, along with their
    /// tracker bindings. Returns the evicted worker ids.
    pub fn evict_stale(&mut self, current_frame: u64, ttl_frames: u64) -> Vec<WorkerId> {
        let stale: Vec<WorkerId> = self
            .workers
            .values()
            .filter(|identity| current_frame.saturating_sub(identity.last_seen_frame) > ttl_frames)
            .map(|identity| identity.worker_id)
            .collect();
        if stale.is_empty() {
            return stale;
        }
        self.workers.retain(|worker_id, _| !stale.contains(worker_id));
        self.track_bindings
            .retain(|_, worker_id| !stale.contains(worker_id));
        debug!("Evicted stale workers {:?} at frame {}", stale, current_frame);
        stale
    }

    pub fn identity(&self, worker_id: WorkerId) -> Option<&WorkerIdentity> {
        self.workers.get(&worker_id)
    }

    pub fn worker_for_track(&self, track_id: u64) -> Option<WorkerId> {
        self.track_bindings.get(&track_id).copied()
    }

    pub fn identities(&self) -> impl Iterator<Item = &WorkerIdentity> {
        self.workers.values()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
