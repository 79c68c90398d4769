//! Screen-space projection, hit-testing, and overlay placement.
//!
//! The view transform scales image coordinates by the zoom factor, rotates
//! about the viewport center, and applies the pan offset. `project` and
//! `unproject` are exact inverses within floating-point epsilon.

use kurbo::{Affine, Point, Vec2};

use crate::core::{Canvas, ClientId, ShapeType};
use crate::error::{CanvasError, CanvasResult};

/// Current zoom/rotation/pan of the canvas.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewState {
    pub zoom: f64,
    pub rotation_deg: f64,
    pub pan: Vec2,
    pub viewport: Canvas,
}

impl ViewState {
    pub fn new(zoom: f64, rotation_deg: f64, pan: Vec2, viewport: Canvas) -> CanvasResult<Self> {
        if !zoom.is_finite() || zoom <= 0.0 {
            return Err(CanvasError::validation("zoom must be positive and finite"));
        }
        Ok(Self {
            zoom,
            rotation_deg,
            pan,
            viewport,
        })
    }

    fn affine(&self) -> Affine {
        let center = self.viewport.center().to_vec2();
        Affine::translate(self.pan)
            * Affine::translate(center)
            * Affine::rotate(self.rotation_deg.to_radians())
            * Affine::translate(-center)
            * Affine::scale(self.zoom)
    }

    /// Map an image-space point to screen space.
    pub fn project(&self, image_point: Point) -> Point {
        self.affine() * image_point
    }

    /// Map a screen-space point back to image space. Inverse of
    /// [`ViewState::project`].
    pub fn unproject(&self, screen_point: Point) -> Point {
        self.affine().inverse() * screen_point
    }

    /// Position an overlay (context menu, slider popup) of `size` pixels near
    /// `anchor`, offsetting along the current rotation angle and clamping the
    /// result into the viewport.
    pub fn place_overlay(&self, anchor: Point, size: (f64, f64), gap: f64) -> Point {
        let angle = self.rotation_deg.to_radians();
        let offset = Vec2::new(angle.cos(), angle.sin()) * gap;
        let desired = anchor + offset;
        let max_x = (f64::from(self.viewport.width) - size.0).max(0.0);
        let max_y = (f64::from(self.viewport.height) - size.1).max(0.0);
        Point::new(desired.x.clamp(0.0, max_x), desired.y.clamp(0.0, max_y))
    }
}

/// One shape offered to the hit-tester, with image-space geometry.
#[derive(Clone, Debug)]
pub struct HitTarget {
    pub client_id: ClientId,
    pub shape_type: ShapeType,
    pub points: Vec<Point>,
    pub z_order: i32,
    /// Monotonic activation counter; larger means more recently activated.
    pub activation: u64,
}

/// Result of a hit test.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    pub client_id: ClientId,
    /// Set when a specific vertex was hit rather than an edge.
    pub point_index: Option<usize>,
    /// Screen-space distance to the hit geometry.
    pub distance: f64,
}

/// Find the nearest shape or vertex within `tolerance` screen pixels of
/// `screen_point`. Ties break to the highest `z_order`, then the most
/// recently activated target. Empty input yields `None`.
pub fn hit_test(
    view: &ViewState,
    screen_point: Point,
    targets: &[HitTarget],
    tolerance: f64,
) -> Option<Hit> {
    const TIE_EPS: f64 = 1e-6;

    let mut best: Option<(Hit, i32, u64)> = None;
    for target in targets {
        let Some(hit) = hit_one(view, screen_point, target, tolerance) else {
            continue;
        };
        let candidate = (hit, target.z_order, target.activation);
        best = Some(match best {
            None => candidate,
            Some(current) => {
                let (cur_hit, cur_z, cur_act) = current;
                let closer = hit.distance < cur_hit.distance - TIE_EPS;
                let tied = (hit.distance - cur_hit.distance).abs() <= TIE_EPS;
                if closer
                    || (tied && target.z_order > cur_z)
                    || (tied && target.z_order == cur_z && target.activation > cur_act)
                {
                    candidate
                } else {
                    current
                }
            }
        });
    }
    best.map(|(hit, _, _)| hit)
}

fn hit_one(
    view: &ViewState,
    screen_point: Point,
    target: &HitTarget,
    tolerance: f64,
) -> Option<Hit> {
    if target.points.is_empty() {
        return None;
    }
    let projected: Vec<Point> = target.points.iter().map(|&p| view.project(p)).collect();

    // Vertices win over edges at equal distance.
    let mut best_vertex: Option<(usize, f64)> = None;
    for (i, p) in projected.iter().enumerate() {
        let d = p.distance(screen_point);
        if d <= tolerance && best_vertex.is_none_or(|(_, bd)| d < bd) {
            best_vertex = Some((i, d));
        }
    }
    if let Some((index, distance)) = best_vertex {
        return Some(Hit {
            client_id: target.client_id,
            point_index: Some(index),
            distance,
        });
    }

    if matches!(target.shape_type, ShapeType::Points) {
        return None;
    }

    let outline = outline_segments(target.shape_type, &projected);
    let mut best_edge: Option<f64> = None;
    for (a, b) in outline {
        let d = segment_distance(screen_point, a, b);
        if d <= tolerance && best_edge.is_none_or(|bd| d < bd) {
            best_edge = Some(d);
        }
    }
    best_edge.map(|distance| Hit {
        client_id: target.client_id,
        point_index: None,
        distance,
    })
}

/// Outline edges of a projected shape. Rectangles expand their two corners
/// into four sides; closed types wrap the last edge back to the start.
fn outline_segments(shape_type: ShapeType, points: &[Point]) -> Vec<(Point, Point)> {
    if shape_type == ShapeType::Rectangle && points.len() == 2 {
        let (tl, br) = (points[0], points[1]);
        let tr = Point::new(br.x, tl.y);
        let bl = Point::new(tl.x, br.y);
        return vec![(tl, tr), (tr, br), (br, bl), (bl, tl)];
    }
    let mut segments: Vec<(Point, Point)> = points.windows(2).map(|w| (w[0], w[1])).collect();
    if shape_type.is_closed() && points.len() > 2 {
        segments.push((points[points.len() - 1], points[0]));
    }
    segments
}

fn segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let ab = b - a;
    let len_sq = ab.hypot2();
    if len_sq == 0.0 {
        return p.distance(a);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}
