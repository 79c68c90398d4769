//! Polygon simplification and the accuracy-slider threshold curve.
//!
//! After a freehand or assisted draw, the point list is simplified with a
//! distance threshold derived from the UI accuracy slider: maximum accuracy
//! keeps every point, and the threshold grows linearly near the top of the
//! range, then doubles per step at the coarse end.

use kurbo::Point;

/// Upper bound of the accuracy slider. `MAX_ACCURACY` means full detail.
pub const MAX_ACCURACY: u8 = 13;

/// Map an accuracy slider value `0..=13` to a simplification distance
/// threshold in pixels.
///
/// With `d = MAX_ACCURACY - accuracy`: zero at `d = 0`, `d` for `d = 1..=8`,
/// then `8 * 2^(d - 8)` for `d = 9..=13` (so accuracy 0 gives 256).
pub fn threshold_from_accuracy(accuracy: u8) -> f64 {
    let d = u32::from(MAX_ACCURACY.saturating_sub(accuracy.min(MAX_ACCURACY)));
    match d {
        0 => 0.0,
        1..=8 => f64::from(d),
        _ => f64::from(8u32 << (d - 8)),
    }
}

/// Ramer-Douglas-Peucker simplification bounded by `threshold`.
///
/// A zero threshold returns the input unchanged. Closed rings are anchored at
/// the first vertex and the vertex farthest from it so the ring cannot
/// collapse onto a single edge. The result never drops below `min_points`.
pub fn simplify_polyline(
    points: &[Point],
    threshold: f64,
    closed: bool,
    min_points: usize,
) -> Vec<Point> {
    if threshold <= 0.0 || points.len() <= min_points.max(2) {
        return points.to_vec();
    }

    let simplified = if closed {
        let anchor = farthest_from(points, points[0]);
        if anchor == 0 {
            return points.to_vec();
        }
        let head = rdp(&points[..=anchor], threshold);
        let mut tail_points: Vec<Point> = points[anchor..].to_vec();
        tail_points.push(points[0]);
        let tail = rdp(&tail_points, threshold);
        // head ends at the anchor, tail ends back at the ring start; drop the
        // shared vertices when stitching the ring together.
        let mut ring = head;
        ring.extend(tail.iter().skip(1).take(tail.len().saturating_sub(2)));
        ring
    } else {
        rdp(points, threshold)
    };

    if simplified.len() < min_points {
        points.to_vec()
    } else {
        simplified
    }
}

fn farthest_from(points: &[Point], origin: Point) -> usize {
    let mut best = 0;
    let mut best_d = 0.0;
    for (i, p) in points.iter().enumerate() {
        let d = origin.distance_squared(*p);
        if d > best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

/// Recursive Ramer-Douglas-Peucker over an open polyline.
fn rdp(points: &[Point], threshold: f64) -> Vec<Point> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let first = points[0];
    let last = points[points.len() - 1];

    let mut max_d = 0.0;
    let mut max_i = 0;
    for (i, p) in points.iter().enumerate().skip(1).take(points.len() - 2) {
        let d = perpendicular_distance(*p, first, last);
        if d > max_d {
            max_d = d;
            max_i = i;
        }
    }

    if max_d <= threshold {
        return vec![first, last];
    }

    let mut left = rdp(&points[..=max_i], threshold);
    let right = rdp(&points[max_i..], threshold);
    left.pop();
    left.extend(right);
    left
}

fn perpendicular_distance(p: Point, a: Point, b: Point) -> f64 {
    let ab = b - a;
    let len_sq = ab.hypot2();
    if len_sq == 0.0 {
        return p.distance(a);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}
