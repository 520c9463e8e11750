use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::common::BBox;
use crate::config::{EventSettings, TriggerPolicy};
use crate::pipeline::tracking::{DwellTransition, RoiId, WorkerId, ZoneDwell};

/// Identifies an event for idempotent statistics updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EventKey {
    pub worker_id: WorkerId,
    pub start_frame: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventPhase {
    Open,
    Evaluating,
    Classified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Classification {
    /// Product touched without a utensil.
    Violation,
    /// Product touched with a utensil in use.
    SafePickup,
    /// Hand entered the container but never touched product.
    NoContact,
    /// Still evaluating when the session stopped.
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened,
    Cooldown,
    AlreadyActive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViolationEvent {
    pub worker_id: WorkerId,
    pub roi_id: RoiId,
    pub start_frame: u64,
    pub end_frame: Option<u64>,
    pub hand_bbox: BBox,
    pub pizza_touched: bool,
    pub scooper_touched: bool,
    pub processed: bool,
    pub phase: EventPhase,
    /// Frame at which the evaluation window elapses.
    pub deadline_frame: u64,
}

impl ViolationEvent {
    pub fn key(&self) -> EventKey {
        EventKey {
            worker_id: self.worker_id,
            start_frame: self.start_frame,
        }
    }

    fn classify(&self) -> Classification {
        match (self.pizza_touched, self.scooper_touched) {
            (true, false) => Classification::Violation,
            (true, true) => Classification::SafePickup,
            (false, _) => Classification::NoContact,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedEvent {
    pub event: ViolationEvent,
    pub classification: Classification,
    pub classified_frame: u64,
}

impl ClassifiedEvent {
    pub fn key(&self) -> EventKey {
        self.event.key()
    }

    /// Operator-facing line for terminal outcomes, stamped with the video
    /// time of the trigger: the exit frame when there is one, else the start.
    pub fn message(&self, fps: f32) -> Option<String> {
        let trigger_frame = self.event.end_frame.unwrap_or(self.event.start_frame);
        let seconds = (trigger_frame as f32 / fps) as u64;
        let stamp = format!("[{:02}:{:02}]", seconds / 60, seconds % 60);
        match self.classification {
            Classification::Violation => Some(format!(
                "{} Violation detected for Worker #{}!",
                stamp, self.event.worker_id
            )),
            Classification::SafePickup => Some(format!(
                "{} Safe pickup by Worker #{}",
                stamp, self.event.worker_id
            )),
            Classification::NoContact | Classification::Abandoned => None,
        }
    }
}

/// The worker-attributed boxes of the current frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameEvidence<'a> {
    pub worker_hands: &'a IndexMap<WorkerId, Vec<BBox>>,
    pub worker_scoopers: &'a IndexMap<WorkerId, Vec<BBox>>,
    pub pizzas: &'a [BBox],
    /// Scoopers not attributed to any worker.
    pub unassigned_scoopers: &'a [BBox],
}

impl FrameEvidence<'_> {
    /// Any of the worker's hands overlapping any pizza.
    pub fn pizza_touched(&self, worker_id: WorkerId, iou_epsilon: f32) -> bool {
        self.worker_hands.get(&worker_id).is_some_and(|hands| {
            hands.iter().any(|hand| {
                self.pizzas
                    .iter()
                    .any(|pizza| hand.overlaps(pizza, iou_epsilon))
            })
        })
    }

    /// The worker holds a scooper. Without one, an unassigned scooper
    /// touching a pizza counts; a scooper another worker holds never does.
    pub fn scooper_touched(&self, worker_id: WorkerId, iou_epsilon: f32) -> bool {
        match self.worker_scoopers.get(&worker_id) {
            Some(scoopers) if !scoopers.is_empty() => true,
            _ => self.pizzas.iter().any(|pizza| {
                self.unassigned_scoopers
                    .iter()
                    .any(|scooper| pizza.overlaps(scooper, iou_epsilon))
            }),
        }
    }
}

/// Owns at most one unprocessed event per worker.
///
/// `Open -> Evaluating` on the first evidence pass, `Evaluating -> Classified`
/// once the frame reaches `deadline_frame`. Evidence flags only ever go from
/// `false` to `true`. A safe pickup starts a cooldown during which no event
/// may open for that worker.
#[derive(Debug, Clone)]
pub struct ViolationStateMachine {
    settings: EventSettings,
    active: IndexMap<WorkerId, ViolationEvent>,
    last_safe_frame: HashMap<WorkerId, u64>,
}

impl ViolationStateMachine {
    pub fn new(settings: EventSettings) -> Self {
        Self {
            settings,
            active: IndexMap::new(),
            last_safe_frame: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &EventSettings {
        &self.settings
    }

    /// Applies a dwell transition under the configured trigger policy.
    /// Returns `None` when the transition is not a trigger.
    pub fn on_dwell(&mut self, transition: &DwellTransition, frame_id: u64) -> Option<OpenOutcome> {
        match (self.settings.trigger, transition) {
            (TriggerPolicy::Entry, DwellTransition::Entered(dwell)) => {
                Some(self.try_open(dwell, None, frame_id))
            }
            (TriggerPolicy::Exit, DwellTransition::Exited { dwell, end_frame }) => {
                Some(self.try_open(dwell, Some(*end_frame), frame_id))
            }
            _ => None,
        }
    }

    /// Re-checks an ongoing dwell under the entry policy. A worker whose
    /// hand is still inside gets a fresh event once it has no active event
    /// and no cooldown. The event starts at `frame_id`, so its key stays
    /// distinct from any earlier event of the same dwell.
    pub fn rearm(&mut self, dwell: &ZoneDwell, frame_id: u64) -> Option<OpenOutcome> {
        if self.settings.trigger != TriggerPolicy::Entry
            || self.active.contains_key(&dwell.worker_id)
            || self.in_cooldown(dwell.worker_id, frame_id)
        {
            return None;
        }
        let resumed = ZoneDwell {
            start_frame: frame_id,
            ..*dwell
        };
        Some(self.try_open(&resumed, None, frame_id))
    }

    pub fn try_open(
        &mut self,
        dwell: &ZoneDwell,
        end_frame: Option<u64>,
        frame_id: u64,
    ) -> OpenOutcome {
        let worker_id = dwell.worker_id;
        if self.in_cooldown(worker_id, frame_id) {
            debug!(
                "Worker {} in cooldown at frame {}, event suppressed",
                worker_id, frame_id
            );
            return OpenOutcome::Cooldown;
        }
        if self.active.contains_key(&worker_id) {
            return OpenOutcome::AlreadyActive;
        }

        let anchor = end_frame.unwrap_or(dwell.start_frame);
        let event = ViolationEvent {
            worker_id,
            roi_id: dwell.roi_id,
            start_frame: dwell.start_frame,
            end_frame,
            hand_bbox: dwell.hand_bbox,
            pizza_touched: false,
            scooper_touched: false,
            processed: false,
            phase: EventPhase::Open,
            deadline_frame: anchor + self.settings.evaluation_window(),
        };
        debug!(
            "Opened event for worker {} in C{} (start {}, deadline {})",
            worker_id, event.roi_id, event.start_frame, event.deadline_frame
        );
        self.active.insert(worker_id, event);
        debug_assert!(self.unprocessed_count(worker_id) <= 1);
        OpenOutcome::Opened
    }

    pub fn in_cooldown(&self, worker_id: WorkerId, frame_id: u64) -> bool {
        self.last_safe_frame
            .get(&worker_id)
            .is_some_and(|&safe| frame_id.saturating_sub(safe) <= self.settings.cooldown_frames)
    }

    /// Folds this frame's evidence into every active event and classifies
    /// the ones whose window has elapsed. Classified events leave the
    /// active set.
    pub fn evaluate(&mut self, frame_id: u64, evidence: &FrameEvidence<'_>) -> Vec<ClassifiedEvent> {
        let epsilon = self.settings.iou_epsilon;
        let mut due = Vec::new();

        for (worker_id, event) in self.active.iter_mut() {
            if frame_id <= event.deadline_frame {
                if !event.pizza_touched && evidence.pizza_touched(*worker_id, epsilon) {
                    event.pizza_touched = true;
                }
                if !event.scooper_touched && evidence.scooper_touched(*worker_id, epsilon) {
                    event.scooper_touched = true;
                }
                event.phase = EventPhase::Evaluating;
            }
            if frame_id >= event.deadline_frame {
                due.push(*worker_id);
            }
        }

        due.into_iter()
            .filter_map(|worker_id| self.active.shift_remove(&worker_id))
            .map(|mut event| {
                let classification = event.classify();
                event.processed = true;
                event.phase = EventPhase::Classified;
                if classification == Classification::SafePickup {
                    self.last_safe_frame.insert(event.worker_id, frame_id);
                }
                ClassifiedEvent {
                    event,
                    classification,
                    classified_frame: frame_id,
                }
            })
            .collect()
    }

    /// Marks every unprocessed event abandoned and empties the active set.
    pub fn drain(&mut self, frame_id: u64) -> Vec<ClassifiedEvent> {
        self.active
            .drain(..)
            .map(|(_, mut event)| {
                warn!(
                    "Abandoning event for worker {} started at frame {}",
                    event.worker_id, event.start_frame
                );
                event.processed = true;
                event.phase = EventPhase::Classified;
                ClassifiedEvent {
                    event,
                    classification: Classification::Abandoned,
                    classified_frame: frame_id,
                }
            })
            .collect()
    }

    pub fn active_event(&self, worker_id: WorkerId) -> Option<&ViolationEvent> {
        self.active.get(&worker_id)
    }

    pub fn active_events(&self) -> impl Iterator<Item = &ViolationEvent> {
        self.active.values()
    }

    pub fn unprocessed_count(&self, worker_id: WorkerId) -> usize {
        self.active
            .values()
            .filter(|event| event.worker_id == worker_id && !event.processed)
            .count()
    }

    pub fn last_safe_frame(&self, worker_id: WorkerId) -> Option<u64> {
        self.last_safe_frame.get(&worker_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(window: u64) -> EventSettings {
        EventSettings {
            window_frames: window,
            cooldown_frames: 30,
            ..EventSettings::default()
        }
    }

    fn dwell(worker_id: WorkerId, start_frame: u64) -> ZoneDwell {
        ZoneDwell {
            worker_id,
            roi_id: 0,
            start_frame,
            hand_bbox: BBox::new(490.0, 280.0, 510.0, 300.0),
        }
    }

    struct Frame {
        hands: IndexMap<WorkerId, Vec<BBox>>,
        worker_scoopers: IndexMap<WorkerId, Vec<BBox>>,
        pizzas: Vec<BBox>,
        unassigned_scoopers: Vec<BBox>,
    }

    impl Frame {
        fn empty() -> Self {
            Self {
                hands: IndexMap::new(),
                worker_scoopers: IndexMap::new(),
                pizzas: Vec::new(),
                unassigned_scoopers: Vec::new(),
            }
        }

        fn hand_on_pizza(worker_id: WorkerId) -> Self {
            let mut frame = Self::empty();
            frame
                .hands
                .insert(worker_id, vec![BBox::new(100.0, 100.0, 140.0, 140.0)]);
            frame.pizzas.push(BBox::new(120.0, 120.0, 200.0, 200.0));
            frame
        }

        fn evidence(&self) -> FrameEvidence<'_> {
            FrameEvidence {
                worker_hands: &self.hands,
                worker_scoopers: &self.worker_scoopers,
                pizzas: &self.pizzas,
                unassigned_scoopers: &self.unassigned_scoopers,
            }
        }
    }

    #[test]
    fn hand_on_pizza_without_scooper_is_a_violation() {
        let mut machine = ViolationStateMachine::new(settings(40));
        assert_eq!(machine.try_open(&dwell(1, 10), None, 10), OpenOutcome::Opened);

        let touch = Frame::hand_on_pizza(1);
        assert!(machine.evaluate(15, &touch.evidence()).is_empty());
        assert_eq!(machine.active_event(1).unwrap().phase, EventPhase::Evaluating);
        assert!(machine.evaluate(49, &Frame::empty().evidence()).is_empty());

        let classified = machine.evaluate(50, &Frame::empty().evidence());
        assert_eq!(classified.len(), 1);
        assert_eq!(classified[0].classification, Classification::Violation);
        assert!(classified[0].event.processed);
        assert!(machine.active_event(1).is_none());
        assert!(!machine.in_cooldown(1, 51));
    }

    #[test]
    fn associated_scooper_makes_it_safe_and_starts_cooldown() {
        let mut machine = ViolationStateMachine::new(settings(40));
        machine.try_open(&dwell(1, 10), None, 10);

        let mut frame = Frame::hand_on_pizza(1);
        frame
            .worker_scoopers
            .insert(1, vec![BBox::new(0.0, 0.0, 10.0, 10.0)]);
        machine.evaluate(12, &frame.evidence());

        let classified = machine.evaluate(50, &Frame::empty().evidence());
        assert_eq!(classified[0].classification, Classification::SafePickup);
        assert_eq!(machine.last_safe_frame(1), Some(50));

        assert_eq!(machine.try_open(&dwell(1, 55), None, 55), OpenOutcome::Cooldown);
        assert_eq!(machine.try_open(&dwell(1, 81), None, 81), OpenOutcome::Opened);
    }

    #[test]
    fn scooper_on_pizza_is_the_fallback_evidence() {
        let mut machine = ViolationStateMachine::new(settings(5));
        machine.try_open(&dwell(1, 1), None, 1);

        let mut frame = Frame::hand_on_pizza(1);
        frame
            .unassigned_scoopers
            .push(BBox::new(150.0, 150.0, 170.0, 170.0));
        machine.evaluate(2, &frame.evidence());

        let classified = machine.evaluate(6, &Frame::empty().evidence());
        assert_eq!(classified[0].classification, Classification::SafePickup);
    }

    #[test]
    fn scooper_held_by_another_worker_is_not_evidence() {
        let mut machine = ViolationStateMachine::new(settings(5));
        machine.try_open(&dwell(1, 1), None, 1);

        // Worker 2's scooper rests on the same pizza worker 1 grabs.
        let mut frame = Frame::hand_on_pizza(1);
        frame
            .worker_scoopers
            .insert(2, vec![BBox::new(150.0, 150.0, 170.0, 170.0)]);
        machine.evaluate(2, &frame.evidence());

        let classified = machine.evaluate(6, &Frame::empty().evidence());
        assert_eq!(classified[0].classification, Classification::Violation);
    }

    #[test]
    fn no_pizza_contact_closes_without_classification() {
        let mut machine = ViolationStateMachine::new(settings(5));
        machine.try_open(&dwell(3, 1), None, 1);
        let classified = machine.evaluate(6, &Frame::empty().evidence());
        assert_eq!(classified[0].classification, Classification::NoContact);
        assert!(machine.last_safe_frame(3).is_none());
    }

    #[test]
    fn second_open_while_active_is_rejected() {
        let mut machine = ViolationStateMachine::new(settings(40));
        machine.try_open(&dwell(1, 10), None, 10);
        assert_eq!(
            machine.try_open(&dwell(1, 20), None, 20),
            OpenOutcome::AlreadyActive
        );
        assert_eq!(machine.unprocessed_count(1), 1);
        assert_eq!(machine.active_event(1).unwrap().start_frame, 10);
    }

    #[test]
    fn evidence_never_resets_within_the_window() {
        let mut machine = ViolationStateMachine::new(settings(10));
        machine.try_open(&dwell(1, 0), None, 0);
        machine.evaluate(1, &Frame::hand_on_pizza(1).evidence());
        machine.evaluate(2, &Frame::empty().evidence());
        assert!(machine.active_event(1).unwrap().pizza_touched);
    }

    #[test]
    fn evidence_after_the_window_is_ignored() {
        let mut machine = ViolationStateMachine::new(settings(10));
        machine.try_open(&dwell(1, 0), None, 0);
        let classified = machine.evaluate(11, &Frame::hand_on_pizza(1).evidence());
        // Late frame: classified without folding its evidence.
        assert_eq!(classified[0].classification, Classification::NoContact);
    }

    #[test]
    fn exit_policy_opens_on_exit_with_grace_window() {
        let mut machine = ViolationStateMachine::new(EventSettings {
            trigger: TriggerPolicy::Exit,
            post_exit_grace_frames: 20,
            ..EventSettings::default()
        });
        let entered = DwellTransition::Entered(dwell(2, 5));
        assert_eq!(machine.on_dwell(&entered, 5), None);

        let exited = DwellTransition::Exited {
            dwell: dwell(2, 5),
            end_frame: 9,
        };
        assert_eq!(machine.on_dwell(&exited, 9), Some(OpenOutcome::Opened));
        let event = machine.active_event(2).unwrap();
        assert_eq!(event.start_frame, 5);
        assert_eq!(event.end_frame, Some(9));
        assert_eq!(event.deadline_frame, 29);
    }

    #[test]
    fn messages_carry_video_time() {
        let mut machine = ViolationStateMachine::new(settings(5));
        machine.try_open(&dwell(4, 1950), None, 1950);
        machine.evaluate(1951, &Frame::hand_on_pizza(4).evidence());
        let classified = machine.evaluate(1955, &Frame::empty().evidence());
        assert_eq!(
            classified[0].message(30.0).as_deref(),
            Some("[01:05] Violation detected for Worker #4!")
        );
    }

    #[test]
    fn exit_messages_carry_the_exit_time() {
        let mut machine = ViolationStateMachine::new(EventSettings {
            trigger: TriggerPolicy::Exit,
            post_exit_grace_frames: 5,
            ..EventSettings::default()
        });
        let exited = DwellTransition::Exited {
            dwell: dwell(4, 5),
            end_frame: 1950,
        };
        machine.on_dwell(&exited, 1950);
        machine.evaluate(1951, &Frame::hand_on_pizza(4).evidence());
        let classified = machine.evaluate(1955, &Frame::empty().evidence());
        assert_eq!(
            classified[0].message(30.0).as_deref(),
            Some("[01:05] Violation detected for Worker #4!")
        );
    }

    #[test]
    fn rearm_reopens_an_ongoing_dwell_after_cooldown() {
        let mut machine = ViolationStateMachine::new(settings(5));
        let ongoing = dwell(1, 10);
        machine.try_open(&ongoing, None, 10);
        assert_eq!(machine.rearm(&ongoing, 11), None);

        let mut frame = Frame::hand_on_pizza(1);
        frame
            .worker_scoopers
            .insert(1, vec![BBox::new(0.0, 0.0, 10.0, 10.0)]);
        machine.evaluate(11, &frame.evidence());
        let classified = machine.evaluate(15, &Frame::empty().evidence());
        assert_eq!(classified[0].classification, Classification::SafePickup);

        assert_eq!(machine.rearm(&ongoing, 45), None);
        assert!(machine.active_event(1).is_none());
        assert_eq!(machine.rearm(&ongoing, 46), Some(OpenOutcome::Opened));
        let event = machine.active_event(1).unwrap();
        assert_eq!(event.start_frame, 46);
        assert_eq!(event.deadline_frame, 51);
        assert_ne!(event.key(), classified[0].key());
    }

    #[test]
    fn rearm_is_inert_under_the_exit_policy() {
        let mut machine = ViolationStateMachine::new(EventSettings {
            trigger: TriggerPolicy::Exit,
            ..EventSettings::default()
        });
        assert_eq!(machine.rearm(&dwell(1, 10), 11), None);
        assert!(machine.active_event(1).is_none());
    }

    #[test]
    fn drain_abandons_open_events() {
        let mut machine = ViolationStateMachine::new(settings(40));
        machine.try_open(&dwell(1, 10), None, 10);
        machine.try_open(&dwell(2, 11), None, 11);
        let drained = machine.drain(12);
        assert_eq!(drained.len(), 2);
        assert!(drained
            .iter()
            .all(|c| c.classification == Classification::Abandoned && c.event.processed));
        assert_eq!(machine.active_events().count(), 0);
    }
}
