use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use super::contours::Blob;

const OVERLAY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Trace each blob's outline onto the frame.
pub fn draw_outlines(image: &mut RgbImage, blobs: &[Blob]) {
    for blob in blobs {
        let points = &blob.outline;
        if points.len() == 1 {
            let p = points[0];
            if p.x >= 0 && p.y >= 0 && (p.x as u32) < image.width() && (p.y as u32) < image.height() {
                image.put_pixel(p.x as u32, p.y as u32, OVERLAY_COLOR);
            }
            continue;
        }
        for (i, p) in points.iter().enumerate() {
            let q = points[(i + 1) % points.len()];
            draw_line_segment_mut(
                image,
                (p.x as f32, p.y as f32),
                (q.x as f32, q.y as f32),
                OVERLAY_COLOR,
            );
        }
    }
}

/// Draw each blob's bounding box, two pixels thick where it fits.
pub fn draw_boxes(image: &mut RgbImage, blobs: &[Blob]) {
    for blob in blobs {
        let b = blob.bbox;
        let rect = Rect::at(b.x as i32, b.y as i32).of_size(b.width.max(1), b.height.max(1));
        draw_hollow_rect_mut(image, rect, OVERLAY_COLOR);

        if b.width > 2 && b.height > 2 {
            let inner = Rect::at(b.x as i32 + 1, b.y as i32 + 1).of_size(b.width - 2, b.height - 2);
            draw_hollow_rect_mut(image, inner, OVERLAY_COLOR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::BoundingBox;
    use imageproc::point::Point;

    fn blob() -> Blob {
        Blob {
            outline: vec![Point::new(2, 2), Point::new(7, 2), Point::new(7, 7), Point::new(2, 7)],
            bbox: BoundingBox { x: 2, y: 2, width: 6, height: 6 },
            area: 25.0,
        }
    }

    #[test]
    fn boxes_are_drawn_on_the_border_only() {
        let mut img = RgbImage::new(12, 12);
        draw_boxes(&mut img, &[blob()]);
        assert_eq!(*img.get_pixel(2, 2), OVERLAY_COLOR);
        assert_eq!(*img.get_pixel(3, 3), OVERLAY_COLOR);
        assert_eq!(*img.get_pixel(5, 5), Rgb([0, 0, 0]));
        assert_eq!(*img.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn outlines_follow_points() {
        let mut img = RgbImage::new(12, 12);
        draw_outlines(&mut img, &[blob()]);
        assert_eq!(*img.get_pixel(4, 2), OVERLAY_COLOR);
        assert_eq!(*img.get_pixel(7, 5), OVERLAY_COLOR);
        assert_eq!(*img.get_pixel(4, 4), Rgb([0, 0, 0]));
    }
}
