use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::point::Point;

use super::BoundingBox;

/// An area-qualified foreground blob, in full-frame coordinates.
#[derive(Debug, Clone)]
pub struct Blob {
    pub outline: Vec<Point<i32>>,
    pub bbox: BoundingBox,
    pub area: f64,
}

/// Outer borders of the 8-connected foreground blobs in `mask`, keeping those
/// whose enclosed area is at least `min_area`. `offset` is added to every
/// coordinate so results line up with the full frame.
pub fn extract_blobs(mask: &GrayImage, min_area: f64, offset: (u32, u32)) -> Vec<Blob> {
    let (ox, oy) = (offset.0 as i32, offset.1 as i32);
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) && !c.points.is_empty())
        .filter_map(|c| {
            let area = polygon_area(&c.points);
            if area < min_area {
                return None;
            }
            let outline: Vec<Point<i32>> = c
                .points
                .iter()
                .map(|p| Point::new(p.x + ox, p.y + oy))
                .collect();
            let bbox = bounding_box(&outline)?;
            Some(Blob {
                outline,
                bbox,
                area,
            })
        })
        .collect()
}

/// Shoelace area of a closed polygon.
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice: i64 = 0;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    twice.abs() as f64 / 2.0
}

/// Smallest upright rectangle containing every point, inclusive of edge pixels.
pub fn bounding_box(points: &[Point<i32>]) -> Option<BoundingBox> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &points[1..] {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some(BoundingBox {
        x: min_x.max(0) as u32,
        y: min_y.max(0) as u32,
        width: (max_x - min_x + 1) as u32,
        height: (max_y - min_y + 1) as u32,
    })
}
