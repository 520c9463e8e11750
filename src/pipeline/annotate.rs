use image::{Rgb, RgbImage};

use crate::common::BBox;
use crate::detection::FrameDetections;
use crate::pipeline::tracking::Region;

const REGION: Rgb<u8> = Rgb([0, 255, 255]);
const HAND: Rgb<u8> = Rgb([0, 255, 0]);
const PIZZA: Rgb<u8> = Rgb([255, 165, 0]);
const SCOOPER: Rgb<u8> = Rgb([255, 0, 255]);
const PERSON: Rgb<u8> = Rgb([255, 255, 255]);
const VIOLATION: Rgb<u8> = Rgb([255, 0, 0]);

const BORDER_WIDTH: u32 = 6;

/// Draws region and detection outlines in place, plus a red frame border
/// when the frame carries a violation.
pub fn annotate_frame(
    image: &mut RgbImage,
    regions: &[Region],
    detections: &FrameDetections,
    violation: bool,
) {
    for region in regions {
        draw_rect(image, &region.rect, REGION);
    }
    for person in &detections.persons {
        draw_rect(image, &person.bbox, PERSON);
    }
    for bbox in &detections.untracked_persons {
        draw_rect(image, bbox, PERSON);
    }
    for bbox in &detections.pizzas {
        draw_rect(image, bbox, PIZZA);
    }
    for bbox in &detections.scoopers {
        draw_rect(image, bbox, SCOOPER);
    }
    for bbox in &detections.hands {
        draw_rect(image, bbox, HAND);
    }
    if violation {
        draw_border(image, VIOLATION);
    }
}

/// One-pixel outline clipped to the image.
fn draw_rect(image: &mut RgbImage, bbox: &BBox, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let clamp = |v: f32, max: u32| (v.max(0.0) as u32).min(max - 1);
    let (x1, y1) = (clamp(bbox.x1, width), clamp(bbox.y1, height));
    let (x2, y2) = (clamp(bbox.x2, width), clamp(bbox.y2, height));

    for x in x1..=x2 {
        image.put_pixel(x, y1, color);
        image.put_pixel(x, y2, color);
    }
    for y in y1..=y2 {
        image.put_pixel(x1, y, color);
        image.put_pixel(x2, y, color);
    }
}

fn draw_border(image: &mut RgbImage, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let edge = x < BORDER_WIDTH
            || y < BORDER_WIDTH
            || x + BORDER_WIDTH >= width
            || y + BORDER_WIDTH >= height;
        if edge {
            *pixel = color;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{Detection, Label};

    #[test]
    fn outlines_are_drawn_and_clipped() {
        let mut image = RgbImage::new(100, 100);
        let detections = FrameDetections::from_detections(&[
            Detection::new(Label::Hand, BBox::new(10.0, 10.0, 20.0, 20.0)),
            Detection::new(Label::Pizza, BBox::new(90.0, 90.0, 250.0, 250.0)),
        ]);
        annotate_frame(&mut image, &[], &detections, false);

        assert_eq!(*image.get_pixel(10, 15), HAND);
        assert_eq!(*image.get_pixel(15, 15), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(99, 95), PIZZA);
    }

    #[test]
    fn violation_paints_the_border() {
        let mut image = RgbImage::new(50, 40);
        let region = Region::new(0, BBox::new(20.0, 15.0, 30.0, 25.0));
        annotate_frame(&mut image, &[region], &FrameDetections::default(), true);

        assert_eq!(*image.get_pixel(0, 0), VIOLATION);
        assert_eq!(*image.get_pixel(49, 39), VIOLATION);
        assert_eq!(*image.get_pixel(20, 20), REGION);
        assert_eq!(*image.get_pixel(25, 20), Rgb([0, 0, 0]));
    }
}
