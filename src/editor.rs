//! Interactive editing state machine.
//!
//! The UI layer translates input events into explicit state transitions:
//! `Idle -> Drawing -> Idle`, `Idle -> Editing -> {Reshaping | Dragging} ->
//! Idle`, plus grouping and slicing modes. The editor itself is agnostic to
//! the input device; every gesture is abortable at any time with no partial
//! commit.

use kurbo::{Point, Vec2};
use tracing::debug;

use crate::approx::{simplify_polyline, threshold_from_accuracy};
use crate::core::{Canvas, ClientId, ShapeType};
use crate::error::{CanvasError, CanvasResult};
use crate::mask::{MaskData, MaskEditor, slice_mask};
use crate::shape::{Shape, validate_points};
use crate::state::{AnnotationStore, EngineObserver, ObjectData, ObjectUpdate};

/// Sub-mode while an object is being edited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditMode {
    Selected,
    Reshaping,
    Dragging,
}

/// Active control state of the canvas.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditorState {
    Idle,
    Drawing(ShapeType),
    Editing { target: ClientId, mode: EditMode },
    Grouping { selected: Vec<ClientId> },
    Slicing { target: ClientId },
}

/// In-progress draw gesture: points accumulate until the shape's vertex
/// constraint is satisfied or an explicit finish arrives.
#[derive(Clone, Debug)]
struct DrawSession {
    shape_type: ShapeType,
    label_id: u64,
    frame: u64,
    points: Vec<Point>,
}

/// In-progress mask brush gesture. Wraps a full-frame [`MaskEditor`] bitmap
/// and remembers whether it edits an existing shape or draws a new one.
#[derive(Clone, Debug)]
struct MaskSession {
    editor: MaskEditor,
    target: Option<ClientId>,
    label_id: u64,
    frame: u64,
}

/// The interactive editing engine. Owns only transient gesture state; all
/// committed state lives in the [`AnnotationStore`].
#[derive(Clone, Debug)]
pub struct Editor {
    state: EditorState,
    draw: Option<DrawSession>,
    mask: Option<MaskSession>,
}

impl Default for Editor {
    fn default() -> Self {
        Self::new()
    }
}

impl Editor {
    pub fn new() -> Self {
        Self {
            state: EditorState::Idle,
            draw: None,
            mask: None,
        }
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    /// Abort whatever gesture is in progress, discarding all partial state.
    pub fn cancel(&mut self) {
        if self.state != EditorState::Idle {
            debug!(state = ?self.state, "gesture cancelled");
        }
        self.state = EditorState::Idle;
        self.draw = None;
        self.mask = None;
    }

    /// Begin drawing a new shape. Only valid from `Idle`.
    pub fn start_drawing(
        &mut self,
        shape_type: ShapeType,
        label_id: u64,
        frame: u64,
    ) -> CanvasResult<()> {
        if self.state != EditorState::Idle {
            return Err(CanvasError::validation(format!(
                "cannot start drawing from {:?}",
                self.state
            )));
        }
        if shape_type == ShapeType::Mask {
            return Err(CanvasError::validation(
                "mask shapes are drawn through the mask editor",
            ));
        }
        self.state = EditorState::Drawing(shape_type);
        self.draw = Some(DrawSession {
            shape_type,
            label_id,
            frame,
            points: Vec::new(),
        });
        Ok(())
    }

    /// Add one point to the active draw. Returns `true` when the shape
    /// reached its fixed vertex count and should be finished.
    pub fn add_point(&mut self, point: Point) -> CanvasResult<bool> {
        let session = self
            .draw
            .as_mut()
            .ok_or_else(|| CanvasError::validation("no draw in progress"))?;
        if let Some(max) = session.shape_type.max_points()
            && session.points.len() >= max
        {
            return Err(CanvasError::geometry(format!(
                "{:?} is limited to {max} points",
                session.shape_type
            )));
        }
        session.points.push(point);
        Ok(session
            .shape_type
            .max_points()
            .is_some_and(|max| session.points.len() == max))
    }

    /// Add a programmatic batch of points (assisted drawing, auto-border).
    pub fn add_points(&mut self, points: &[Point]) -> CanvasResult<()> {
        for &p in points {
            self.add_point(p)?;
        }
        Ok(())
    }

    /// Finish the draw and commit exactly one shape.
    ///
    /// `accuracy` (when given) simplifies polygon/polyline geometry with the
    /// slider-derived threshold. Refuses when the minimum vertex count is not
    /// met; the gesture stays active so the user can keep adding points.
    pub fn finish_drawing(
        &mut self,
        store: &mut AnnotationStore,
        observer: &mut dyn EngineObserver,
        accuracy: Option<u8>,
    ) -> CanvasResult<ClientId> {
        let session = self
            .draw
            .as_ref()
            .ok_or_else(|| CanvasError::validation("no draw in progress"))?;

        let mut points = session.points.clone();
        if let Some(accuracy) = accuracy
            && matches!(session.shape_type, ShapeType::Polygon | ShapeType::Polyline)
        {
            points = simplify_polyline(
                &points,
                threshold_from_accuracy(accuracy),
                session.shape_type.is_closed(),
                session.shape_type.min_points(),
            );
        }
        validate_points(session.shape_type, &points)?;

        let shape = Shape {
            client_id: ClientId(0),
            server_id: None,
            label_id: session.label_id,
            frame: session.frame,
            shape_type: session.shape_type,
            points,
            mask: None,
            rotation_deg: 0.0,
            occluded: false,
            outside: false,
            z_order: 0,
            group: None,
            attributes: Default::default(),
        };
        let client_id = store.insert_shape(shape)?;
        observer.shape_drawn(client_id);

        self.draw = None;
        self.state = EditorState::Idle;
        Ok(client_id)
    }

    /// Select an object for editing.
    pub fn start_editing(&mut self, store: &AnnotationStore, target: ClientId) -> CanvasResult<()> {
        if !matches!(self.state, EditorState::Idle) {
            return Err(CanvasError::validation(format!(
                "cannot start editing from {:?}",
                self.state
            )));
        }
        if store.get(target).is_none() {
            return Err(CanvasError::validation(format!("unknown object {target:?}")));
        }
        self.state = EditorState::Editing {
            target,
            mode: EditMode::Selected,
        };
        Ok(())
    }

    pub fn start_reshaping(&mut self) -> CanvasResult<()> {
        self.enter_edit_mode(EditMode::Reshaping)
    }

    pub fn start_dragging(&mut self) -> CanvasResult<()> {
        self.enter_edit_mode(EditMode::Dragging)
    }

    fn enter_edit_mode(&mut self, mode: EditMode) -> CanvasResult<()> {
        match &mut self.state {
            EditorState::Editing { mode: current, .. } => {
                *current = mode;
                Ok(())
            }
            other => Err(CanvasError::validation(format!(
                "cannot enter {mode:?} from {other:?}"
            ))),
        }
    }

    /// Enter grouping mode with an initial selection.
    pub fn start_grouping(&mut self, selected: Vec<ClientId>) -> CanvasResult<()> {
        if self.state != EditorState::Idle {
            return Err(CanvasError::validation(format!(
                "cannot start grouping from {:?}",
                self.state
            )));
        }
        self.state = EditorState::Grouping { selected };
        Ok(())
    }

    pub fn toggle_group_selection(&mut self, id: ClientId) -> CanvasResult<()> {
        let EditorState::Grouping { selected } = &mut self.state else {
            return Err(CanvasError::validation("not in grouping mode"));
        };
        if let Some(pos) = selected.iter().position(|&s| s == id) {
            selected.remove(pos);
        } else {
            selected.push(id);
        }
        Ok(())
    }

    /// Commit the group and return to idle.
    pub fn finish_grouping(
        &mut self,
        store: &mut AnnotationStore,
        observer: &mut dyn EngineObserver,
    ) -> CanvasResult<u64> {
        let EditorState::Grouping { selected } = &self.state else {
            return Err(CanvasError::validation("not in grouping mode"));
        };
        let group = store.group_objects(&selected.clone(), observer)?;
        self.state = EditorState::Idle;
        Ok(group)
    }

    /// Enter slicing mode targeting a polygon or mask shape.
    pub fn start_slicing(&mut self, store: &AnnotationStore, target: ClientId) -> CanvasResult<()> {
        if self.state != EditorState::Idle {
            return Err(CanvasError::validation(format!(
                "cannot start slicing from {:?}",
                self.state
            )));
        }
        let object = store
            .get(target)
            .ok_or_else(|| CanvasError::validation(format!("unknown object {target:?}")))?;
        match &object.data {
            ObjectData::Shape(shape)
                if matches!(shape.shape_type, ShapeType::Polygon | ShapeType::Mask) =>
            {
                self.state = EditorState::Slicing { target };
                Ok(())
            }
            _ => Err(CanvasError::validation(
                "only polygon and mask shapes can be sliced",
            )),
        }
    }

    /// Apply an externally computed slicing contour: the target shape is
    /// replaced by two new shapes. Polygons split along the contour; masks
    /// re-rasterize their bitmap.
    pub fn apply_slice(
        &mut self,
        store: &mut AnnotationStore,
        observer: &mut dyn EngineObserver,
        contour: &[Point],
    ) -> CanvasResult<(ClientId, ClientId)> {
        let EditorState::Slicing { target } = &self.state else {
            return Err(CanvasError::validation("not in slicing mode"));
        };
        let target = *target;
        let object = store
            .get(target)
            .ok_or_else(|| CanvasError::validation(format!("unknown object {target:?}")))?;
        let ObjectData::Shape(original) = object.data.clone() else {
            return Err(CanvasError::validation("slice target must be a shape"));
        };

        let (first, second) = match original.shape_type {
            ShapeType::Polygon => {
                let (a, b) = slice_polygon(&original.points, contour)?;
                (
                    replace_geometry(&original, a, None),
                    replace_geometry(&original, b, None),
                )
            }
            ShapeType::Mask => {
                let mask = original
                    .mask
                    .as_ref()
                    .ok_or_else(|| CanvasError::validation("mask shape without payload"))?;
                let (a, b) = slice_mask(mask, contour)?;
                (
                    replace_geometry(&original, Vec::new(), Some(a)),
                    replace_geometry(&original, Vec::new(), Some(b)),
                )
            }
            other => {
                return Err(CanvasError::validation(format!("cannot slice {other:?}")));
            }
        };

        store.delete(target, observer)?;
        let first_id = store.insert_shape(first)?;
        let second_id = store.insert_shape(second)?;
        observer.annotations_updated(&[first_id, second_id]);

        self.state = EditorState::Idle;
        Ok((first_id, second_id))
    }

    /// Delete one vertex of a shape, preserving the order of the rest.
    /// Refused when the count would drop below the type minimum.
    pub fn delete_point(
        &self,
        store: &mut AnnotationStore,
        observer: &mut dyn EngineObserver,
        target: ClientId,
        frame: u64,
        index: usize,
    ) -> CanvasResult<()> {
        let view = store
            .read(target, frame)?
            .ok_or_else(|| CanvasError::geometry("object has no state at this frame"))?;
        if index >= view.points.len() {
            return Err(CanvasError::geometry(format!("no point at index {index}")));
        }
        if view.points.len() - 1 < view.shape_type.min_points() {
            return Err(CanvasError::geometry(format!(
                "{:?} needs at least {} points",
                view.shape_type,
                view.shape_type.min_points()
            )));
        }
        let mut points = view.points;
        points.remove(index);
        store.commit(ObjectUpdate::new(target, frame).points(points), observer)?;
        Ok(())
    }

    /// Insert a vertex before `index`.
    pub fn insert_point(
        &self,
        store: &mut AnnotationStore,
        observer: &mut dyn EngineObserver,
        target: ClientId,
        frame: u64,
        index: usize,
        point: Point,
    ) -> CanvasResult<()> {
        let view = store
            .read(target, frame)?
            .ok_or_else(|| CanvasError::geometry("object has no state at this frame"))?;
        if let Some(max) = view.shape_type.max_points()
            && view.points.len() >= max
        {
            return Err(CanvasError::geometry(format!(
                "{:?} is limited to {max} points",
                view.shape_type
            )));
        }
        if index > view.points.len() {
            return Err(CanvasError::geometry(format!("no edge at index {index}")));
        }
        let mut points = view.points;
        points.insert(index, point);
        store.commit(ObjectUpdate::new(target, frame).points(points), observer)?;
        Ok(())
    }

    /// Move one vertex.
    pub fn move_point(
        &self,
        store: &mut AnnotationStore,
        observer: &mut dyn EngineObserver,
        target: ClientId,
        frame: u64,
        index: usize,
        to: Point,
    ) -> CanvasResult<()> {
        let view = store
            .read(target, frame)?
            .ok_or_else(|| CanvasError::geometry("object has no state at this frame"))?;
        let mut points = view.points;
        let slot = points
            .get_mut(index)
            .ok_or_else(|| CanvasError::geometry(format!("no point at index {index}")))?;
        *slot = to;
        store.commit(ObjectUpdate::new(target, frame).points(points), observer)?;
        Ok(())
    }

    /// Translate the whole shape by `delta`.
    pub fn drag_by(
        &self,
        store: &mut AnnotationStore,
        observer: &mut dyn EngineObserver,
        target: ClientId,
        frame: u64,
        delta: Vec2,
    ) -> CanvasResult<()> {
        let view = store
            .read(target, frame)?
            .ok_or_else(|| CanvasError::geometry("object has no state at this frame"))?;
        let points = view.points.iter().map(|&p| p + delta).collect();
        store.commit(ObjectUpdate::new(target, frame).points(points), observer)?;
        Ok(())
    }

    /// Scale the shape about `anchor`.
    pub fn resize(
        &self,
        store: &mut AnnotationStore,
        observer: &mut dyn EngineObserver,
        target: ClientId,
        frame: u64,
        anchor: Point,
        scale: f64,
    ) -> CanvasResult<()> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(CanvasError::geometry("scale must be positive and finite"));
        }
        let view = store
            .read(target, frame)?
            .ok_or_else(|| CanvasError::geometry("object has no state at this frame"))?;
        let points = view
            .points
            .iter()
            .map(|&p| anchor + (p - anchor) * scale)
            .collect();
        store.commit(ObjectUpdate::new(target, frame).points(points), observer)?;
        Ok(())
    }

    /// Rotate a polygon's vertex ring so `index` becomes the start point.
    /// Geometry and winding are unchanged.
    pub fn set_start_point(
        &self,
        store: &mut AnnotationStore,
        observer: &mut dyn EngineObserver,
        target: ClientId,
        frame: u64,
        index: usize,
    ) -> CanvasResult<()> {
        let view = store
            .read(target, frame)?
            .ok_or_else(|| CanvasError::geometry("object has no state at this frame"))?;
        if view.shape_type != ShapeType::Polygon {
            return Err(CanvasError::geometry(
                "start point can only be set on polygons",
            ));
        }
        if index >= view.points.len() {
            return Err(CanvasError::geometry(format!("no point at index {index}")));
        }
        let mut points = view.points;
        points.rotate_left(index);
        store.commit(ObjectUpdate::new(target, frame).points(points), observer)?;
        Ok(())
    }

    /// Begin drawing a new mask shape with the brush tools.
    pub fn start_mask_drawing(
        &mut self,
        canvas: Canvas,
        label_id: u64,
        frame: u64,
    ) -> CanvasResult<()> {
        if self.state != EditorState::Idle {
            return Err(CanvasError::validation(format!(
                "cannot start a mask gesture from {:?}",
                self.state
            )));
        }
        self.mask = Some(MaskSession {
            editor: MaskEditor::start(canvas, None)?,
            target: None,
            label_id,
            frame,
        });
        self.state = EditorState::Drawing(ShapeType::Mask);
        Ok(())
    }

    /// Begin a brush gesture over an existing mask shape.
    pub fn start_mask_editing(
        &mut self,
        store: &AnnotationStore,
        canvas: Canvas,
        target: ClientId,
    ) -> CanvasResult<()> {
        if self.state != EditorState::Idle {
            return Err(CanvasError::validation(format!(
                "cannot start a mask gesture from {:?}",
                self.state
            )));
        }
        let object = store
            .get(target)
            .ok_or_else(|| CanvasError::validation(format!("unknown object {target:?}")))?;
        let ObjectData::Shape(shape) = &object.data else {
            return Err(CanvasError::validation("mask editing target must be a shape"));
        };
        let Some(existing) = shape.mask.as_ref() else {
            return Err(CanvasError::validation("mask editing target must be a mask"));
        };
        self.mask = Some(MaskSession {
            editor: MaskEditor::start(canvas, Some(existing))?,
            target: Some(target),
            label_id: shape.label_id,
            frame: shape.frame,
        });
        self.state = EditorState::Editing {
            target,
            mode: EditMode::Reshaping,
        };
        Ok(())
    }

    fn mask_session(&mut self) -> CanvasResult<&mut MaskSession> {
        self.mask
            .as_mut()
            .ok_or_else(|| CanvasError::validation("no mask gesture in progress"))
    }

    pub fn mask_brush(&mut self, stroke: &[Point], radius: f64) -> CanvasResult<()> {
        self.mask_session()?.editor.brush(stroke, radius);
        Ok(())
    }

    pub fn mask_erase(&mut self, stroke: &[Point], radius: f64) -> CanvasResult<()> {
        self.mask_session()?.editor.erase(stroke, radius);
        Ok(())
    }

    pub fn mask_polygon_plus(&mut self, ring: &[Point]) -> CanvasResult<()> {
        self.mask_session()?.editor.polygon_plus(ring)
    }

    pub fn mask_polygon_minus(&mut self, ring: &[Point]) -> CanvasResult<()> {
        self.mask_session()?.editor.polygon_minus(ring)
    }

    /// Undo the most recent stroke of the live gesture.
    pub fn mask_undo(&mut self) -> CanvasResult<bool> {
        Ok(self.mask_session()?.editor.undo())
    }

    /// Finish the mask gesture with a single commit: an update for an edited
    /// shape, an insert for a drawn one. A gesture that erased every pixel of
    /// an existing mask deletes the shape; an empty new mask commits nothing.
    pub fn finish_mask(
        &mut self,
        store: &mut AnnotationStore,
        observer: &mut dyn EngineObserver,
    ) -> CanvasResult<Option<ClientId>> {
        let session = self
            .mask
            .take()
            .ok_or_else(|| CanvasError::validation("no mask gesture in progress"))?;
        self.state = EditorState::Idle;

        match (session.editor.finish(), session.target) {
            (Some(mask), Some(target)) => {
                store.commit(
                    ObjectUpdate::new(target, session.frame).mask(mask),
                    observer,
                )?;
                Ok(Some(target))
            }
            (Some(mask), None) => {
                let shape = Shape {
                    client_id: ClientId(0),
                    server_id: None,
                    label_id: session.label_id,
                    frame: session.frame,
                    shape_type: ShapeType::Mask,
                    points: Vec::new(),
                    mask: Some(mask),
                    rotation_deg: 0.0,
                    occluded: false,
                    outside: false,
                    z_order: 0,
                    group: None,
                    attributes: Default::default(),
                };
                let client_id = store.insert_shape(shape)?;
                observer.shape_drawn(client_id);
                Ok(Some(client_id))
            }
            (None, Some(target)) => {
                store.delete(target, observer)?;
                Ok(None)
            }
            (None, None) => Ok(None),
        }
    }
}

/// New unsaved shape carrying `original`'s label, frame, and flags with
/// replaced geometry. Slice halves never inherit the group or server id.
fn replace_geometry(original: &Shape, points: Vec<Point>, mask: Option<MaskData>) -> Shape {
    Shape {
        client_id: ClientId(0),
        server_id: None,
        label_id: original.label_id,
        frame: original.frame,
        shape_type: original.shape_type,
        points,
        mask,
        rotation_deg: original.rotation_deg,
        occluded: original.occluded,
        outside: original.outside,
        z_order: original.z_order,
        group: None,
        attributes: original.attributes.clone(),
    }
}

/// Split a polygon in two along a contour whose endpoints lie on the polygon
/// boundary (within `SLICE_SNAP` pixels).
pub fn slice_polygon(
    points: &[Point],
    contour: &[Point],
) -> CanvasResult<(Vec<Point>, Vec<Point>)> {
    const SLICE_SNAP: f64 = 1.0;

    if contour.len() < 2 {
        return Err(CanvasError::geometry("slice contour needs at least 2 points"));
    }
    if points.len() < 3 {
        return Err(CanvasError::geometry("slice target must be a polygon"));
    }

    let first = *contour.first().unwrap_or(&Point::ZERO);
    let last = *contour.last().unwrap_or(&Point::ZERO);
    let (edge_a, snap_a, dist_a) = nearest_edge(points, first);
    let (edge_b, snap_b, dist_b) = nearest_edge(points, last);
    if dist_a > SLICE_SNAP || dist_b > SLICE_SNAP {
        return Err(CanvasError::geometry(
            "slice contour endpoints must lie on the polygon boundary",
        ));
    }

    if edge_a == edge_b {
        // Both endpoints snapped onto one edge: the cut carves a notch out of
        // it. Order the snaps along the edge so neither half doubles back over
        // the other's piece of the edge.
        let forward = snap_a.distance(points[edge_a]) <= snap_b.distance(points[edge_a]);
        let (near, far) = if forward { (snap_a, snap_b) } else { (snap_b, snap_a) };
        let mut path: Vec<Point> = contour[1..contour.len() - 1].to_vec();
        if !forward {
            path.reverse();
        }
        let mut notch = vec![near];
        notch.extend(path.iter().copied());
        notch.push(far);
        let mut rest = vec![far];
        rest.extend(vertices_between(points, edge_a, edge_a));
        rest.push(near);
        rest.extend(path);
        if notch.len() < 3 {
            return Err(CanvasError::geometry("slice produced a degenerate polygon"));
        }
        return Ok((notch, rest));
    }

    // Contour with endpoints snapped onto the boundary.
    let mut cut: Vec<Point> = Vec::with_capacity(contour.len());
    cut.push(snap_a);
    cut.extend(contour[1..contour.len() - 1].iter().copied());
    cut.push(snap_b);

    // One half follows the cut then walks the boundary from b's edge back to
    // a's edge; the other half takes the reversed cut and the remaining arc.
    let mut half_one = cut.clone();
    half_one.extend(vertices_between(points, edge_b, edge_a));
    let mut half_two: Vec<Point> = cut.into_iter().rev().collect();
    half_two.extend(vertices_between(points, edge_a, edge_b));

    if half_one.len() < 3 || half_two.len() < 3 {
        return Err(CanvasError::geometry("slice produced a degenerate polygon"));
    }
    Ok((half_one, half_two))
}

/// Ring vertices strictly after `from_edge` up to and including the start
/// vertex of the edge after `to_edge`, walking forward with wraparound.
fn vertices_between(points: &[Point], from_edge: usize, to_edge: usize) -> Vec<Point> {
    let n = points.len();
    let mut out = Vec::new();
    let mut i = (from_edge + 1) % n;
    loop {
        out.push(points[i]);
        if i == to_edge {
            break;
        }
        i = (i + 1) % n;
        if out.len() > n {
            break; // defensive bound; cannot happen with valid edges
        }
    }
    out
}

/// Nearest boundary edge of a closed ring to `p`: `(edge index, projection,
/// distance)`.
fn nearest_edge(points: &[Point], p: Point) -> (usize, Point, f64) {
    let n = points.len();
    let mut best = (0usize, points[0], f64::INFINITY);
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        let ab = b - a;
        let len_sq = ab.hypot2();
        let t = if len_sq == 0.0 {
            0.0
        } else {
            ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0)
        };
        let proj = a + ab * t;
        let d = p.distance(proj);
        if d < best.2 {
            best = (i, proj, d);
        }
    }
    best
}
