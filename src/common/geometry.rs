use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance in frame coordinates.
    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Axis-aligned box in frame coordinates, `(x1, y1)` top-left and `(x2, y2)`
/// bottom-right. Serialized as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Finite coordinates with non-negative extent.
    pub fn is_valid(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
            && self.x2 >= self.x1
            && self.y2 >= self.y1
    }

    /// Inclusive containment of a point.
    pub fn contains_point(&self, point: &Point) -> bool {
        self.x1 <= point.x && point.x <= self.x2 && self.y1 <= point.y && point.y <= self.y2
    }

    /// Whether the center of `other` lies inside this box.
    pub fn contains_center_of(&self, other: &BBox) -> bool {
        self.contains_point(&other.center())
    }

    pub fn intersection_area(&self, other: &BBox) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        w * h
    }

    /// Intersection-over-Union. Zero when the union is empty.
    pub fn iou(&self, other: &BBox) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    /// Contact test used for hand/pizza and scooper/pizza evidence.
    pub fn overlaps(&self, other: &BBox, iou_epsilon: f32) -> bool {
        self.iou(other) > iou_epsilon
    }
}

impl From<[f32; 4]> for BBox {
    fn from(value: [f32; 4]) -> Self {
        Self::new(value[0], value[1], value[2], value[3])
    }
}

impl From<BBox> for [f32; 4] {
    fn from(value: BBox) -> Self {
        [value.x1, value.y1, value.x2, value.y2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
        assert!(!a.overlaps(&b, 1e-4));
    }

    #[test]
    fn touching_edges_do_not_overlap() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(10.0, 0.0, 20.0, 10.0);
        assert!(!a.overlaps(&b, 0.0));
    }

    #[test]
    fn partial_overlap_iou() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 0.0, 15.0, 10.0);
        // 50 / 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_boxes_have_zero_iou() {
        let a = BBox::new(5.0, 5.0, 5.0, 5.0);
        assert_eq!(a.iou(&a), 0.0);
    }

    #[test]
    fn containment_uses_box_center() {
        let roi = BBox::new(480.0, 270.0, 525.0, 320.0);
        let hand_inside = BBox::new(490.0, 280.0, 510.0, 300.0);
        let hand_straddling = BBox::new(515.0, 300.0, 560.0, 340.0);
        assert!(roi.contains_center_of(&hand_inside));
        assert!(!roi.contains_center_of(&hand_straddling));
    }

    #[test]
    fn invalid_boxes_are_detected() {
        assert!(!BBox::new(10.0, 0.0, 0.0, 10.0).is_valid());
        assert!(!BBox::new(f32::NAN, 0.0, 1.0, 1.0).is_valid());
        assert!(BBox::new(0.0, 0.0, 1.0, 1.0).is_valid());
    }

    #[test]
    fn serializes_as_coordinate_array() {
        let b = BBox::new(1.0, 2.0, 3.0, 4.0);
        let json = serde_json::to_string(&b).unwrap();
        assert_eq!(json, "[1.0,2.0,3.0,4.0]");
        let back: BBox = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }
}
