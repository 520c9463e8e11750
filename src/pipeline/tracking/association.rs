use super::identity::WorkerId;
use crate::common::BBox;

/// Assigns hand and scooper boxes to the nearest visible worker.
#[derive(Debug, Clone, Copy)]
pub struct SpatialAssociator {
    max_distance: f32,
}

impl SpatialAssociator {
    pub fn new(max_distance: f32) -> Self {
        Self { max_distance }
    }

    pub fn max_distance(&self) -> f32 {
        self.max_distance
    }

    /// Worker whose box center is closest to the object's center, provided
    /// the distance is strictly below the association bound.
    pub fn assign(&self, object: &BBox, workers: &[(WorkerId, BBox)]) -> Option<WorkerId> {
        let center = object.center();
        workers
            .iter()
            .map(|(worker_id, bbox)| (*worker_id, center.distance(&bbox.center())))
            .filter(|(_, distance)| *distance < self.max_distance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(worker_id, _)| worker_id)
    }
}
