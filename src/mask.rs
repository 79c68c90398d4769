//! Rasterized mask shapes and the gesture-scoped mask editor.
//!
//! A mask travels on the wire as a run-length encoding over its tight bounding
//! box. During a brush/eraser gesture the editor owns a full-frame bitmap and
//! an undo stack; finishing the gesture commits the whole bitmap diff as a
//! single shape update.

use kurbo::Point;
use tracing::debug;

use crate::core::Canvas;
use crate::error::{CanvasError, CanvasResult};

/// Run-length encoded mask over an inclusive bounding box in image coordinates.
///
/// `rle` alternates background/foreground run lengths in raster order, always
/// starting with a background run (possibly zero). The runs cover exactly
/// `width() * height()` pixels.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MaskData {
    pub rle: Vec<u64>,
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl MaskData {
    pub fn width(&self) -> u64 {
        (self.right - self.left + 1).max(0) as u64
    }

    pub fn height(&self) -> u64 {
        (self.bottom - self.top + 1).max(0) as u64
    }

    /// Number of foreground pixels.
    pub fn area(&self) -> u64 {
        self.rle.iter().skip(1).step_by(2).sum()
    }

    /// Build from a bitmap with origin `(left, top)`, shrinking to the tight
    /// bounding box of set pixels. Returns `None` when no pixel is set.
    pub fn from_bitmap(bits: &[bool], width: usize, height: usize, left: i64, top: i64) -> Option<Self> {
        debug_assert_eq!(bits.len(), width * height);

        let mut min_x = usize::MAX;
        let mut min_y = usize::MAX;
        let mut max_x = 0usize;
        let mut max_y = 0usize;
        let mut any = false;
        for y in 0..height {
            for x in 0..width {
                if bits[y * width + x] {
                    any = true;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }
        if !any {
            return None;
        }

        let mut rle = Vec::new();
        let mut current = false; // rle starts with a background run
        let mut run = 0u64;
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let v = bits[y * width + x];
                if v == current {
                    run += 1;
                } else {
                    rle.push(run);
                    current = v;
                    run = 1;
                }
            }
        }
        rle.push(run);

        Some(Self {
            rle,
            left: left + min_x as i64,
            top: top + min_y as i64,
            right: left + max_x as i64,
            bottom: top + max_y as i64,
        })
    }

    /// Expand to a bitmap of `width() * height()` pixels in raster order.
    pub fn to_bitmap(&self) -> CanvasResult<Vec<bool>> {
        let expected = self.width() * self.height();
        let total: u64 = self.rle.iter().sum();
        if total != expected {
            return Err(CanvasError::geometry(format!(
                "mask rle covers {total} pixels, bounding box holds {expected}"
            )));
        }
        let mut bits = Vec::with_capacity(expected as usize);
        let mut value = false;
        for &run in &self.rle {
            for _ in 0..run {
                bits.push(value);
            }
            value = !value;
        }
        Ok(bits)
    }

    /// Flat wire form: run lengths followed by `[left, top, right, bottom]`.
    pub fn to_flat(&self) -> Vec<f64> {
        let mut flat: Vec<f64> = self.rle.iter().map(|&r| r as f64).collect();
        flat.extend([
            self.left as f64,
            self.top as f64,
            self.right as f64,
            self.bottom as f64,
        ]);
        flat
    }

    /// Parse the flat wire form produced by [`MaskData::to_flat`].
    pub fn from_flat(flat: &[f64]) -> CanvasResult<Self> {
        if flat.len() < 5 {
            return Err(CanvasError::validation(
                "mask points must hold at least one run and a bounding box",
            ));
        }
        let (runs, bbox) = flat.split_at(flat.len() - 4);
        if runs.iter().any(|v| *v < 0.0 || v.fract() != 0.0 || !v.is_finite()) {
            return Err(CanvasError::validation("mask run lengths must be non-negative integers"));
        }
        let mask = Self {
            rle: runs.iter().map(|&v| v as u64).collect(),
            left: bbox[0] as i64,
            top: bbox[1] as i64,
            right: bbox[2] as i64,
            bottom: bbox[3] as i64,
        };
        if mask.right < mask.left || mask.bottom < mask.top {
            return Err(CanvasError::validation("mask bounding box is inverted"));
        }
        // Verifies run total against the box.
        mask.to_bitmap()?;
        Ok(mask)
    }
}

/// Owned drawing state for one mask gesture: `start`, stroke updates, `undo`,
/// `finish`. Strokes OR pixels in, eraser strokes AND-NOT them out; each
/// stroke is one undo entry while the gesture is live.
#[derive(Clone, Debug)]
pub struct MaskEditor {
    canvas: Canvas,
    bits: Vec<bool>,
    base: Vec<bool>,
    undo: Vec<Vec<bool>>,
}

impl MaskEditor {
    /// Begin a gesture over a frame, optionally seeded with an existing mask.
    pub fn start(canvas: Canvas, existing: Option<&MaskData>) -> CanvasResult<Self> {
        let len = canvas.width as usize * canvas.height as usize;
        let mut bits = vec![false; len];
        if let Some(mask) = existing {
            let mask_bits = mask.to_bitmap()?;
            let w = mask.width() as i64;
            for (i, set) in mask_bits.iter().enumerate() {
                if !set {
                    continue;
                }
                let x = mask.left + (i as i64 % w);
                let y = mask.top + (i as i64 / w);
                if x >= 0 && y >= 0 && (x as u32) < canvas.width && (y as u32) < canvas.height {
                    bits[y as usize * canvas.width as usize + x as usize] = true;
                }
            }
        }
        Ok(Self {
            base: bits.clone(),
            bits,
            canvas,
            undo: Vec::new(),
        })
    }

    /// Paint a brush stroke: discs of `radius` stamped along the polyline.
    pub fn brush(&mut self, stroke: &[Point], radius: f64) {
        self.snapshot();
        self.stamp_stroke(stroke, radius, true);
    }

    /// Erase a stroke with the same stamping rule as [`MaskEditor::brush`].
    pub fn erase(&mut self, stroke: &[Point], radius: f64) {
        self.snapshot();
        self.stamp_stroke(stroke, radius, false);
    }

    /// Fill the interior of a closed polygon into the mask.
    pub fn polygon_plus(&mut self, ring: &[Point]) -> CanvasResult<()> {
        self.fill_polygon(ring, true)
    }

    /// Clear the interior of a closed polygon out of the mask.
    pub fn polygon_minus(&mut self, ring: &[Point]) -> CanvasResult<()> {
        self.fill_polygon(ring, false)
    }

    /// Revert the most recent stroke. Returns `false` when nothing is left to
    /// undo within the gesture.
    pub fn undo(&mut self) -> bool {
        match self.undo.pop() {
            Some(prev) => {
                self.bits = prev;
                true
            }
            None => false,
        }
    }

    /// Whether the gesture changed anything relative to its starting bitmap.
    pub fn is_dirty(&self) -> bool {
        self.bits != self.base
    }

    /// Commit the gesture. `None` means the resulting mask is empty (the
    /// caller deletes the shape instead of writing an empty one).
    pub fn finish(self) -> Option<MaskData> {
        let strokes = self.undo.len();
        debug!(strokes, "mask gesture finished");
        MaskData::from_bitmap(
            &self.bits,
            self.canvas.width as usize,
            self.canvas.height as usize,
            0,
            0,
        )
    }

    fn snapshot(&mut self) {
        self.undo.push(self.bits.clone());
    }

    fn fill_polygon(&mut self, ring: &[Point], value: bool) -> CanvasResult<()> {
        if ring.len() < 3 {
            return Err(CanvasError::geometry("polygon fill needs at least 3 points"));
        }
        self.snapshot();
        let width = self.canvas.width as usize;
        let height = self.canvas.height as usize;
        fill_ring(&mut self.bits, width, height, ring, value);
        Ok(())
    }

    fn stamp_stroke(&mut self, stroke: &[Point], radius: f64, value: bool) {
        let radius = radius.max(0.5);
        match stroke {
            [] => {}
            [single] => self.stamp_disc(*single, radius, value),
            _ => {
                for pair in stroke.windows(2) {
                    let (a, b) = (pair[0], pair[1]);
                    let dist = a.distance(b);
                    let steps = (dist / (radius * 0.5)).ceil().max(1.0) as usize;
                    for s in 0..=steps {
                        let t = s as f64 / steps as f64;
                        self.stamp_disc(a.lerp(b, t), radius, value);
                    }
                }
            }
        }
    }

    fn stamp_disc(&mut self, center: Point, radius: f64, value: bool) {
        let width = self.canvas.width as i64;
        let height = self.canvas.height as i64;
        let r = radius.ceil() as i64;
        let cx = center.x.round() as i64;
        let cy = center.y.round() as i64;
        for y in (cy - r).max(0)..=(cy + r).min(height - 1) {
            for x in (cx - r).max(0)..=(cx + r).min(width - 1) {
                let dx = x as f64 - center.x;
                let dy = y as f64 - center.y;
                if dx * dx + dy * dy <= radius * radius {
                    self.bits[(y * width + x) as usize] = value;
                }
            }
        }
    }
}

/// Even-odd scanline fill of a closed ring into a full-frame bitmap.
pub(crate) fn fill_ring(bits: &mut [bool], width: usize, height: usize, ring: &[Point], value: bool) {
    let mut xs: Vec<f64> = Vec::new();
    for y in 0..height {
        let scan = y as f64 + 0.5;
        xs.clear();
        for i in 0..ring.len() {
            let a = ring[i];
            let b = ring[(i + 1) % ring.len()];
            if (a.y <= scan && b.y > scan) || (b.y <= scan && a.y > scan) {
                let t = (scan - a.y) / (b.y - a.y);
                xs.push(a.x + t * (b.x - a.x));
            }
        }
        xs.sort_by(|p, q| p.total_cmp(q));
        for pair in xs.chunks_exact(2) {
            let start = (pair[0].round() as i64).clamp(0, width as i64);
            let end = (pair[1].round() as i64).clamp(0, width as i64);
            for x in start..end {
                bits[y * width + x as usize] = value;
            }
        }
    }
}

/// Split a mask in two along an externally supplied cut contour.
///
/// The contour is rasterized as a thin cut through the mask bitmap; the two
/// surviving connected components become the result masks, with cut pixels
/// reassigned to an adjacent component so no area is lost. Fails when the cut
/// does not separate the mask into exactly two parts.
pub fn slice_mask(mask: &MaskData, contour: &[Point]) -> CanvasResult<(MaskData, MaskData)> {
    if contour.len() < 2 {
        return Err(CanvasError::geometry("slice contour needs at least 2 points"));
    }
    let width = mask.width() as usize;
    let height = mask.height() as usize;
    let original = mask.to_bitmap()?;

    // Cut the contour out of a working copy.
    let mut cut = original.clone();
    for pair in contour.windows(2) {
        let a = Point::new(pair[0].x - mask.left as f64, pair[0].y - mask.top as f64);
        let b = Point::new(pair[1].x - mask.left as f64, pair[1].y - mask.top as f64);
        let dist = a.distance(b).max(1.0);
        let steps = (dist * 2.0).ceil() as usize;
        for s in 0..=steps {
            let p = a.lerp(b, s as f64 / steps as f64);
            let x = p.x.round() as i64;
            let y = p.y.round() as i64;
            if x >= 0 && y >= 0 && (x as usize) < width && (y as usize) < height {
                cut[y as usize * width + x as usize] = false;
            }
        }
    }

    let labels = label_components(&cut, width, height);
    let component_count = labels.iter().filter_map(|l| *l).max().map_or(0, |m| m + 1);
    if component_count != 2 {
        return Err(CanvasError::geometry(format!(
            "slice contour produced {component_count} mask components, expected 2"
        )));
    }

    // Give cut pixels that were originally foreground back to a neighbor.
    let mut labels = labels;
    let mut changed = true;
    while changed {
        changed = false;
        for y in 0..height {
            for x in 0..width {
                let i = y * width + x;
                if !original[i] || labels[i].is_some() {
                    continue;
                }
                let neighbor = neighbors4(x, y, width, height)
                    .into_iter()
                    .flatten()
                    .find_map(|j| labels[j]);
                if let Some(l) = neighbor {
                    labels[i] = Some(l);
                    changed = true;
                }
            }
        }
    }

    let mut first = vec![false; width * height];
    let mut second = vec![false; width * height];
    for (i, label) in labels.iter().enumerate() {
        match label {
            Some(0) => first[i] = true,
            Some(_) => second[i] = true,
            None => {}
        }
    }
    let a = MaskData::from_bitmap(&first, width, height, mask.left, mask.top)
        .ok_or_else(|| CanvasError::geometry("slice produced an empty first component"))?;
    let b = MaskData::from_bitmap(&second, width, height, mask.left, mask.top)
        .ok_or_else(|| CanvasError::geometry("slice produced an empty second component"))?;
    Ok((a, b))
}

fn neighbors4(x: usize, y: usize, width: usize, height: usize) -> [Option<usize>; 4] {
    [
        (x > 0).then(|| y * width + x - 1),
        (x + 1 < width).then(|| y * width + x + 1),
        (y > 0).then(|| (y - 1) * width + x),
        (y + 1 < height).then(|| (y + 1) * width + x),
    ]
}

/// 4-connected component labeling over set pixels.
fn label_components(bits: &[bool], width: usize, height: usize) -> Vec<Option<usize>> {
    let mut labels: Vec<Option<usize>> = vec![None; bits.len()];
    let mut next = 0usize;
    let mut stack = Vec::new();
    for start in 0..bits.len() {
        if !bits[start] || labels[start].is_some() {
            continue;
        }
        labels[start] = Some(next);
        stack.push(start);
        while let Some(i) = stack.pop() {
            let (x, y) = (i % width, i / width);
            for j in neighbors4(x, y, width, height).into_iter().flatten() {
                if bits[j] && labels[j].is_none() {
                    labels[j] = Some(next);
                    stack.push(j);
                }
            }
        }
        next += 1;
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas(w: u32, h: u32) -> Canvas {
        Canvas::new(w, h).unwrap()
    }

    #[test]
    fn rle_round_trips_through_bitmap() {
        let bits = vec![
            false, true, true, //
            true, true, false, //
            false, false, true,
        ];
        let mask = MaskData::from_bitmap(&bits, 3, 3, 10, 20).unwrap();
        assert_eq!((mask.left, mask.top, mask.right, mask.bottom), (10, 20, 12, 22));
        let restored = mask.to_bitmap().unwrap();
        assert_eq!(restored, bits);
    }

    #[test]
    fn from_bitmap_shrinks_to_tight_bbox() {
        let mut bits = vec![false; 25];
        bits[2 * 5 + 3] = true; // (3, 2)
        let mask = MaskData::from_bitmap(&bits, 5, 5, 0, 0).unwrap();
        assert_eq!((mask.left, mask.top, mask.right, mask.bottom), (3, 2, 3, 2));
        assert_eq!(mask.area(), 1);
    }

    #[test]
    fn empty_bitmap_gives_no_mask() {
        assert!(MaskData::from_bitmap(&[false; 9], 3, 3, 0, 0).is_none());
    }

    #[test]
    fn flat_form_round_trips() {
        let bits = vec![true, false, true, true];
        let mask = MaskData::from_bitmap(&bits, 2, 2, 1, 1).unwrap();
        let flat = mask.to_flat();
        assert_eq!(MaskData::from_flat(&flat).unwrap(), mask);
    }

    #[test]
    fn from_flat_rejects_mismatched_runs() {
        // Runs cover 3 pixels but the box holds 4.
        let flat = vec![1.0, 2.0, 0.0, 0.0, 1.0, 1.0];
        assert!(MaskData::from_flat(&flat).is_err());
    }

    #[test]
    fn brush_sets_and_eraser_clears() {
        let mut editor = MaskEditor::start(canvas(20, 20), None).unwrap();
        editor.brush(&[Point::new(10.0, 10.0)], 3.0);
        assert!(editor.is_dirty());
        let snapshot = editor.clone().finish().unwrap();
        assert!(snapshot.area() > 0);

        editor.erase(&[Point::new(10.0, 10.0)], 5.0);
        assert!(editor.finish().is_none());
    }

    #[test]
    fn undo_reverts_one_stroke_at_a_time() {
        let mut editor = MaskEditor::start(canvas(10, 10), None).unwrap();
        editor.brush(&[Point::new(2.0, 2.0)], 1.0);
        editor.brush(&[Point::new(7.0, 7.0)], 1.0);
        assert!(editor.undo());
        assert!(editor.undo());
        assert!(!editor.undo());
        assert!(!editor.is_dirty());
    }

    #[test]
    fn polygon_plus_fills_interior() {
        let mut editor = MaskEditor::start(canvas(10, 10), None).unwrap();
        let ring = [
            Point::new(1.0, 1.0),
            Point::new(8.0, 1.0),
            Point::new(8.0, 8.0),
            Point::new(1.0, 8.0),
        ];
        editor.polygon_plus(&ring).unwrap();
        let mask = editor.finish().unwrap();
        assert!(mask.area() >= 36);
    }

    #[test]
    fn polygon_fill_ignores_rings_off_canvas() {
        // A ring entirely left of the canvas must set nothing; its scanline
        // crossings are negative and clamp to empty spans.
        let mut editor = MaskEditor::start(canvas(10, 10), None).unwrap();
        let ring = [
            Point::new(-8.0, 1.0),
            Point::new(-2.0, 1.0),
            Point::new(-2.0, 7.0),
            Point::new(-8.0, 7.0),
        ];
        editor.polygon_plus(&ring).unwrap();
        assert!(editor.finish().is_none());
    }

    #[test]
    fn polygon_fill_clips_to_the_canvas() {
        let mut editor = MaskEditor::start(canvas(10, 10), None).unwrap();
        let ring = [
            Point::new(-5.0, 0.0),
            Point::new(3.0, 0.0),
            Point::new(3.0, 10.0),
            Point::new(-5.0, 10.0),
        ];
        editor.polygon_plus(&ring).unwrap();
        let mask = editor.finish().unwrap();
        assert_eq!(mask.left, 0);
        assert_eq!(mask.area(), 30);
    }

    #[test]
    fn polygon_fill_refuses_degenerate_ring() {
        let mut editor = MaskEditor::start(canvas(4, 4), None).unwrap();
        let err = editor.polygon_minus(&[Point::new(0.0, 0.0), Point::new(1.0, 1.0)]);
        assert!(err.is_err());
    }

    #[test]
    fn slice_splits_rectangle_mask_in_two() {
        let bits = vec![true; 9 * 9];
        let mask = MaskData::from_bitmap(&bits, 9, 9, 0, 0).unwrap();
        let contour = [Point::new(4.0, -1.0), Point::new(4.0, 9.0)];
        let (a, b) = slice_mask(&mask, &contour).unwrap();
        // No pixels lost: cut pixels are reassigned to a neighbor component.
        assert_eq!(a.area() + b.area(), 81);
        assert!(a.right < b.left || b.right < a.left);
    }

    #[test]
    fn slice_fails_when_contour_misses_mask() {
        let bits = vec![true; 4 * 4];
        let mask = MaskData::from_bitmap(&bits, 4, 4, 0, 0).unwrap();
        let contour = [Point::new(100.0, 0.0), Point::new(100.0, 4.0)];
        assert!(slice_mask(&mask, &contour).is_err());
    }
}
