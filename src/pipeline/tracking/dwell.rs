use indexmap::IndexMap;
use std::collections::HashSet;

use super::identity::WorkerId;
use crate::common::BBox;

pub type RoiId = u32;

/// A monitored product container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub roi_id: RoiId,
    pub rect: BBox,
}

impl Region {
    pub fn new(roi_id: RoiId, rect: BBox) -> Self {
        Self { roi_id, rect }
    }

    pub fn contains(&self, bbox: &BBox) -> bool {
        self.rect.contains_center_of(bbox)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneDwell {
    pub worker_id: WorkerId,
    pub roi_id: RoiId,
    pub start_frame: u64,
    pub hand_bbox: BBox,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DwellTransition {
    Entered(ZoneDwell),
    Exited { dwell: ZoneDwell, end_frame: u64 },
}

impl DwellTransition {
    pub fn dwell(&self) -> &ZoneDwell {
        match self {
            DwellTransition::Entered(dwell) => dwell,
            DwellTransition::Exited { dwell, .. } => dwell,
        }
    }
}

/// Tracks at most one active dwell per worker.
#[derive(Debug, Clone)]
pub struct ZoneDwellTracker {
    regions: Vec<Region>,
    active: IndexMap<WorkerId, ZoneDwell>,
}

impl ZoneDwellTracker {
    pub fn new(regions: Vec<Region>) -> Self {
        Self {
            regions,
            active: IndexMap::new(),
        }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    fn first_containment(&self, hands: &[BBox]) -> Option<(RoiId, BBox)> {
        hands.iter().find_map(|hand| {
            self.regions
                .iter()
                .find(|region| region.contains(hand))
                .map(|region| (region.roi_id, *hand))
        })
    }

    /// Opens dwells for workers whose hand is newly inside a region and closes
    /// dwells for workers with no hand inside any region this frame (including
    /// workers not visible at all).
    pub fn update(
        &mut self,
        frame_id: u64,
        worker_hands: &IndexMap<WorkerId, Vec<BBox>>,
    ) -> Vec<DwellTransition> {
        let mut transitions = Vec::new();
        let mut inside = HashSet::new();

        for (worker_id, hands) in worker_hands {
            let Some((roi_id, hand_bbox)) = self.first_containment(hands) else {
                continue;
            };
            inside.insert(*worker_id);
            if !self.active.contains_key(worker_id) {
                let dwell = ZoneDwell {
                    worker_id: *worker_id,
                    roi_id,
                    start_frame: frame_id,
                    hand_bbox,
                };
                self.active.insert(*worker_id, dwell);
                transitions.push(DwellTransition::Entered(dwell));
            }
        }

        let exited: Vec<WorkerId> = self
            .active
            .keys()
            .filter(|worker_id| !inside.contains(*worker_id))
            .copied()
            .collect();
        for worker_id in exited {
            if let Some(dwell) = self.active.shift_remove(&worker_id) {
                transitions.push(DwellTransition::Exited {
                    dwell,
                    end_frame: frame_id,
                });
            }
        }

        transitions
    }

    pub fn active_dwell(&self, worker_id: WorkerId) -> Option<&ZoneDwell> {
        self.active.get(&worker_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_dwells(&self) -> impl Iterator<Item = &ZoneDwell> {
        self.active.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ZoneDwellTracker {
        ZoneDwellTracker::new(vec![
            Region::new(0, BBox::new(480.0, 270.0, 525.0, 320.0)),
            Region::new(1, BBox::new(460.0, 317.0, 515.0, 350.0)),
        ])
    }

    fn hands(worker_id: WorkerId, boxes: Vec<BBox>) -> IndexMap<WorkerId, Vec<BBox>> {
        let mut map = IndexMap::new();
        map.insert(worker_id, boxes);
        map
    }

    const IN_C0: BBox = BBox {
        x1: 490.0,
        y1: 280.0,
        x2: 510.0,
        y2: 300.0,
    };
    const OUTSIDE: BBox = BBox {
        x1: 100.0,
        y1: 100.0,
        x2: 120.0,
        y2: 120.0,
    };

    #[test]
    fn entry_then_exit() {
        let mut tracker = tracker();
        let entered = tracker.update(10, &hands(1, vec![IN_C0]));
        assert!(matches!(
            entered.as_slice(),
            [DwellTransition::Entered(ZoneDwell { roi_id: 0, start_frame: 10, .. })]
        ));

        assert!(tracker.update(11, &hands(1, vec![IN_C0])).is_empty());
        assert_eq!(tracker.active_count(), 1);

        let exited = tracker.update(12, &hands(1, vec![OUTSIDE]));
        assert!(matches!(
            exited.as_slice(),
            [DwellTransition::Exited { end_frame: 12, dwell: ZoneDwell { start_frame: 10, .. } }]
        ));
        assert!(tracker.active_dwell(1).is_none());
    }

    #[test]
    fn worker_vanishing_closes_the_dwell() {
        let mut tracker = tracker();
        tracker.update(1, &hands(4, vec![IN_C0]));
        let transitions = tracker.update(2, &IndexMap::new());
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].dwell().worker_id, 4);
    }

    #[test]
    fn one_dwell_per_worker_even_with_two_hands_inside() {
        let mut tracker = tracker();
        let second = BBox::new(470.0, 320.0, 500.0, 345.0);
        let transitions = tracker.update(1, &hands(2, vec![IN_C0, second]));
        assert_eq!(transitions.len(), 1);
        assert_eq!(tracker.active_count(), 1);
    }
}
