//! Track keyframe storage and interpolation.
//!
//! A track is an ordered set of keyframes (frame -> shape state) plus the
//! derived interpolation function. Between two keyframes every coordinate
//! lerps; `occluded`/`outside`/`z_order` are step functions of the left
//! keyframe, and only mutable number attributes interpolate. Outside the
//! keyframe range the nearest keyframe is returned verbatim (no
//! extrapolation).

use std::collections::BTreeMap;

use kurbo::Point;
use tracing::warn;

use crate::core::{AttributeInput, AttributeMap, ClientId, Label, ShapeType};
use crate::error::{CanvasError, CanvasResult};
use crate::shape::{
    Shape, attributes_from_wire, attributes_to_wire, flat_from_points, points_from_flat,
    validate_points,
};
use crate::wire::{WireTrack, WireTrackShape};

/// Shape state recorded at one keyframe. Attributes here are the mutable
/// subset; immutable attributes live on the [`Track`].
#[derive(Clone, Debug, PartialEq)]
pub struct TrackKeyframe {
    pub points: Vec<Point>,
    pub rotation_deg: f64,
    pub occluded: bool,
    pub outside: bool,
    pub z_order: i32,
    pub attributes: AttributeMap,
}

/// A time-series annotation: one logical object instance defined across a
/// frame range by keyframes and interpolation.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub client_id: ClientId,
    pub server_id: Option<u64>,
    pub label_id: u64,
    pub shape_type: ShapeType,
    pub group: Option<u64>,
    /// Immutable attributes, fixed for the track's lifetime.
    pub attributes: AttributeMap,
    keyframes: BTreeMap<u64, TrackKeyframe>,
}

/// The interpolated state of a track at one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct InterpolatedShape {
    pub frame: u64,
    pub points: Vec<Point>,
    pub rotation_deg: f64,
    pub occluded: bool,
    pub outside: bool,
    pub z_order: i32,
    /// Immutable and mutable attributes merged.
    pub attributes: AttributeMap,
    /// True when the frame is an explicit keyframe.
    pub keyframe: bool,
    /// True when interpolation fell back to holding the left keyframe because
    /// adjacent keyframes had different point counts.
    pub held: bool,
}

/// Result of [`Track::split`]: splitting at or before the first keyframe is a
/// no-op that returns the original track.
#[derive(Clone, Debug)]
pub enum SplitOutcome {
    Unchanged(Track),
    Split { previous: Track, current: Track },
}

impl SplitOutcome {
    pub fn into_tracks(self) -> Vec<Track> {
        match self {
            Self::Unchanged(track) => vec![track],
            Self::Split { previous, current } => vec![previous, current],
        }
    }
}

impl Track {
    /// Create an empty track. Mask tracks are rejected: a rasterized bitmap
    /// has no frame-to-frame point correspondence to interpolate.
    pub fn new(client_id: ClientId, label_id: u64, shape_type: ShapeType) -> CanvasResult<Self> {
        if shape_type == ShapeType::Mask {
            return Err(CanvasError::validation("mask tracks are not interpolatable"));
        }
        Ok(Self {
            client_id,
            server_id: None,
            label_id,
            shape_type,
            group: None,
            attributes: AttributeMap::new(),
            keyframes: BTreeMap::new(),
        })
    }

    pub fn from_wire(client_id: ClientId, wire: &WireTrack) -> CanvasResult<Self> {
        let mut track = Self::new(client_id, wire.label_id, wire.shape_type)?;
        track.server_id = wire.id;
        track.group = wire.group;
        track.attributes = attributes_from_wire(&wire.attributes);
        for shape in &wire.shapes {
            track.set_keyframe(
                shape.frame,
                TrackKeyframe {
                    points: points_from_flat(&shape.points)?,
                    rotation_deg: shape.rotation,
                    occluded: shape.occluded,
                    outside: shape.outside,
                    z_order: shape.z_order,
                    attributes: attributes_from_wire(&shape.attributes),
                },
            )?;
        }
        if track.keyframes.is_empty() {
            return Err(CanvasError::validation("track must have at least one keyframe"));
        }
        Ok(track)
    }

    pub fn to_wire(&self) -> WireTrack {
        WireTrack {
            id: self.server_id,
            label_id: self.label_id,
            frame: self.first_keyframe().unwrap_or(0),
            shape_type: self.shape_type,
            group: self.group,
            attributes: attributes_to_wire(&self.attributes),
            shapes: self
                .keyframes
                .iter()
                .map(|(&frame, kf)| WireTrackShape {
                    frame,
                    points: flat_from_points(&kf.points),
                    rotation: kf.rotation_deg,
                    occluded: kf.occluded,
                    outside: kf.outside,
                    z_order: kf.z_order,
                    attributes: attributes_to_wire(&kf.attributes),
                })
                .collect(),
        }
    }

    pub fn keyframe_numbers(&self) -> impl Iterator<Item = u64> + '_ {
        self.keyframes.keys().copied()
    }

    pub fn keyframe(&self, frame: u64) -> Option<&TrackKeyframe> {
        self.keyframes.get(&frame)
    }

    pub fn first_keyframe(&self) -> Option<u64> {
        self.keyframes.keys().next().copied()
    }

    pub fn last_keyframe(&self) -> Option<u64> {
        self.keyframes.keys().next_back().copied()
    }

    /// Record (or replace) a keyframe. Geometry is validated against the
    /// track's shape type; outside keyframes still carry full geometry.
    pub fn set_keyframe(&mut self, frame: u64, keyframe: TrackKeyframe) -> CanvasResult<()> {
        validate_points(self.shape_type, &keyframe.points)?;
        self.keyframes.insert(frame, keyframe);
        Ok(())
    }

    /// Remove a keyframe. The last remaining keyframe cannot be removed; the
    /// caller deletes the whole track instead.
    pub fn remove_keyframe(&mut self, frame: u64) -> CanvasResult<TrackKeyframe> {
        if self.keyframes.len() <= 1 {
            return Err(CanvasError::geometry(
                "cannot remove the only keyframe of a track",
            ));
        }
        self.keyframes
            .remove(&frame)
            .ok_or_else(|| CanvasError::geometry(format!("no keyframe at frame {frame}")))
    }

    /// Compute the track's state at `frame`.
    ///
    /// `label` supplies attribute specs so mutable number attributes can be
    /// interpolated; all other mutable attributes step at the left keyframe.
    pub fn interpolate(&self, frame: u64, label: &Label) -> CanvasResult<InterpolatedShape> {
        let left = self.keyframes.range(..=frame).next_back();
        let right = self.keyframes.range(frame.saturating_add(1)..).next();

        let (lf, lkf) = match left {
            Some(entry) => entry,
            None => {
                // Before the first keyframe: return it verbatim.
                let (&kf0, first) = self
                    .keyframes
                    .iter()
                    .next()
                    .ok_or_else(|| CanvasError::validation("track has no keyframes"))?;
                return Ok(self.verbatim(frame, kf0, first));
            }
        };

        let (rf, rkf) = match right {
            Some(entry) => entry,
            // At or past the last keyframe: no extrapolation.
            None => return Ok(self.verbatim(frame, *lf, lkf)),
        };

        if *lf == frame {
            return Ok(self.verbatim(frame, *lf, lkf));
        }

        let t = (frame - lf) as f64 / (rf - lf) as f64;

        let (points, held) = if lkf.points.len() == rkf.points.len() {
            let points = lkf
                .points
                .iter()
                .zip(&rkf.points)
                .map(|(a, b)| a.lerp(*b, t))
                .collect();
            (points, false)
        } else {
            warn!(
                track = self.client_id.0,
                left = lf,
                right = rf,
                "keyframe point counts differ ({} vs {}), holding left keyframe",
                lkf.points.len(),
                rkf.points.len()
            );
            (lkf.points.clone(), true)
        };

        let mut attributes = self.attributes.clone();
        for (&spec_id, value) in &lkf.attributes {
            let interpolated = match (label.attribute(spec_id), rkf.attributes.get(&spec_id)) {
                (Some(spec), Some(next)) if spec.input == AttributeInput::Number => {
                    lerp_number(value, next, t).unwrap_or_else(|| value.clone())
                }
                _ => value.clone(),
            };
            attributes.insert(spec_id, interpolated);
        }

        Ok(InterpolatedShape {
            frame,
            points,
            rotation_deg: if held {
                lkf.rotation_deg
            } else {
                lerp_angle_deg(lkf.rotation_deg, rkf.rotation_deg, t)
            },
            occluded: lkf.occluded,
            outside: lkf.outside,
            z_order: lkf.z_order,
            attributes,
            keyframe: false,
            held,
        })
    }

    /// Split the track at `frame` into a terminated "previous" half and a
    /// fresh "current" half.
    ///
    /// The previous half keeps keyframes strictly before `frame` and is capped
    /// with a synthetic `outside = true` keyframe at `frame - 1`; the current
    /// half is seeded with the interpolated state at `frame` and keeps
    /// keyframes at or after it. Both halves inherit immutable attributes and
    /// clear `server_id` and `group` so they are treated as new tracks.
    pub fn split(
        &self,
        frame: u64,
        label: &Label,
        previous_id: ClientId,
        current_id: ClientId,
    ) -> CanvasResult<SplitOutcome> {
        let Some(first) = self.first_keyframe() else {
            return Err(CanvasError::validation("track has no keyframes"));
        };
        if frame <= first {
            return Ok(SplitOutcome::Unchanged(self.clone()));
        }

        let cap = self.interpolate(frame - 1, label)?;
        let seed = self.interpolate(frame, label)?;

        let mut previous = Self {
            client_id: previous_id,
            server_id: None,
            label_id: self.label_id,
            shape_type: self.shape_type,
            group: None,
            attributes: self.attributes.clone(),
            keyframes: self.keyframes.range(..frame).map(|(&f, kf)| (f, kf.clone())).collect(),
        };
        previous.keyframes.insert(
            frame - 1,
            TrackKeyframe {
                points: cap.points,
                rotation_deg: cap.rotation_deg,
                occluded: cap.occluded,
                outside: true,
                z_order: cap.z_order,
                attributes: self.mutable_subset(&cap.attributes),
            },
        );

        let mut current = Self {
            client_id: current_id,
            server_id: None,
            label_id: self.label_id,
            shape_type: self.shape_type,
            group: None,
            attributes: self.attributes.clone(),
            keyframes: self
                .keyframes
                .range(frame..)
                .map(|(&f, kf)| (f, kf.clone()))
                .collect(),
        };
        current.keyframes.entry(frame).or_insert(TrackKeyframe {
            points: seed.points,
            rotation_deg: seed.rotation_deg,
            occluded: seed.occluded,
            outside: seed.outside,
            z_order: seed.z_order,
            attributes: self.mutable_subset(&seed.attributes),
        });

        Ok(SplitOutcome::Split { previous, current })
    }

    /// Merge several tracks of the same label and shape type into one.
    /// Keyframe ranges must not collide on any frame.
    pub fn merge(tracks: &[Track], client_id: ClientId) -> CanvasResult<Track> {
        let Some(first) = tracks.first() else {
            return Err(CanvasError::validation("merge needs at least one track"));
        };
        let mut merged = Self::new(client_id, first.label_id, first.shape_type)?;
        merged.attributes = first.attributes.clone();
        for track in tracks {
            if track.shape_type != first.shape_type || track.label_id != first.label_id {
                return Err(CanvasError::validation(
                    "merged tracks must share label and shape type",
                ));
            }
            for (&frame, kf) in &track.keyframes {
                if merged.keyframes.contains_key(&frame) {
                    return Err(CanvasError::validation(format!(
                        "merged tracks overlap at frame {frame}"
                    )));
                }
                merged.keyframes.insert(frame, kf.clone());
            }
        }
        Ok(merged)
    }

    /// Materialize an interpolated state as a standalone [`Shape`].
    pub fn shape_at(&self, frame: u64, label: &Label) -> CanvasResult<Shape> {
        let state = self.interpolate(frame, label)?;
        Ok(Shape {
            client_id: self.client_id,
            server_id: None,
            label_id: self.label_id,
            frame,
            shape_type: self.shape_type,
            points: state.points,
            mask: None,
            rotation_deg: state.rotation_deg,
            occluded: state.occluded,
            outside: state.outside,
            z_order: state.z_order,
            group: self.group,
            attributes: state.attributes,
        })
    }

    fn verbatim(&self, frame: u64, kf_frame: u64, kf: &TrackKeyframe) -> InterpolatedShape {
        let mut attributes = self.attributes.clone();
        attributes.extend(kf.attributes.iter().map(|(&k, v)| (k, v.clone())));
        InterpolatedShape {
            frame,
            points: kf.points.clone(),
            rotation_deg: kf.rotation_deg,
            occluded: kf.occluded,
            outside: kf.outside,
            z_order: kf.z_order,
            attributes,
            keyframe: frame == kf_frame,
            held: false,
        }
    }

    /// Restrict a merged attribute map to the mutable (non-track-level) keys.
    fn mutable_subset(&self, merged: &AttributeMap) -> AttributeMap {
        merged
            .iter()
            .filter(|(k, _)| !self.attributes.contains_key(k))
            .map(|(&k, v)| (k, v.clone()))
            .collect()
    }
}

/// Interpolate two numeric attribute values; `None` when either fails to
/// parse.
fn lerp_number(a: &str, b: &str, t: f64) -> Option<String> {
    let a: f64 = a.trim().parse().ok()?;
    let b: f64 = b.trim().parse().ok()?;
    let v = a + (b - a) * t;
    if (v - v.round()).abs() < 1e-9 {
        Some(format!("{}", v.round() as i64))
    } else {
        Some(format!("{v}"))
    }
}

/// Shortest-arc interpolation of two angles in degrees, normalized to
/// `[0, 360)`. An exact half-turn goes counter-clockwise.
fn lerp_angle_deg(a: f64, b: f64, t: f64) -> f64 {
    let mut delta = (b - a).rem_euclid(360.0);
    if delta > 180.0 {
        delta -= 360.0;
    }
    (a + delta * t).rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AttributeSpec;

    fn label() -> Label {
        Label {
            id: 1,
            name: "vehicle".into(),
            color: Some("#fa3253".into()),
            attributes: vec![
                AttributeSpec {
                    id: 10,
                    name: "speed".into(),
                    mutable: true,
                    input: AttributeInput::Number,
                    values: vec!["0".into(), "200".into(), "1".into()],
                },
                AttributeSpec {
                    id: 11,
                    name: "model".into(),
                    mutable: true,
                    input: AttributeInput::Text,
                    values: vec![],
                },
            ],
        }
    }

    fn rect_kf(points: [f64; 4], outside: bool) -> TrackKeyframe {
        TrackKeyframe {
            points: vec![Point::new(points[0], points[1]), Point::new(points[2], points[3])],
            rotation_deg: 0.0,
            occluded: false,
            outside,
            z_order: 0,
            attributes: AttributeMap::new(),
        }
    }

    fn rect_track() -> Track {
        let mut track = Track::new(ClientId(1), 1, ShapeType::Rectangle).unwrap();
        track.set_keyframe(0, rect_kf([0.0, 0.0, 10.0, 10.0], false)).unwrap();
        track.set_keyframe(10, rect_kf([100.0, 50.0, 200.0, 150.0], false)).unwrap();
        track
    }

    #[test]
    fn midpoint_interpolates_each_bound() {
        let state = rect_track().interpolate(5, &label()).unwrap();
        assert_eq!(state.points[0], Point::new(50.0, 25.0));
        assert_eq!(state.points[1], Point::new(105.0, 80.0));
        assert!(!state.keyframe);
    }

    #[test]
    fn before_first_and_after_last_hold_verbatim() {
        let mut track = rect_track();
        track.set_keyframe(20, rect_kf([5.0, 5.0, 6.0, 6.0], false)).unwrap();
        let label = label();

        // k0 is at frame 0; build one starting later to probe the left edge.
        let mut late = Track::new(ClientId(2), 1, ShapeType::Rectangle).unwrap();
        late.set_keyframe(5, rect_kf([1.0, 2.0, 3.0, 4.0], false)).unwrap();
        late.set_keyframe(9, rect_kf([9.0, 9.0, 9.0, 9.0], false)).unwrap();
        let before = late.interpolate(2, &label).unwrap();
        assert_eq!(before.points, vec![Point::new(1.0, 2.0), Point::new(3.0, 4.0)]);
        assert!(!before.keyframe);

        let after = track.interpolate(99, &label).unwrap();
        assert_eq!(after.points, vec![Point::new(5.0, 5.0), Point::new(6.0, 6.0)]);
    }

    #[test]
    fn keyframe_frames_are_exact() {
        let track = rect_track();
        let state = track.interpolate(10, &label()).unwrap();
        assert!(state.keyframe);
        assert_eq!(state.points[0], Point::new(100.0, 50.0));
    }

    #[test]
    fn occluded_and_outside_are_step_functions() {
        let mut track = Track::new(ClientId(1), 1, ShapeType::Rectangle).unwrap();
        let mut kf = rect_kf([0.0, 0.0, 1.0, 1.0], false);
        kf.occluded = true;
        track.set_keyframe(0, kf).unwrap();
        track.set_keyframe(10, rect_kf([10.0, 10.0, 11.0, 11.0], false)).unwrap();
        let state = track.interpolate(9, &label()).unwrap();
        assert!(state.occluded);
    }

    #[test]
    fn outside_keyframe_keeps_ghost_geometry() {
        let mut track = Track::new(ClientId(1), 1, ShapeType::Rectangle).unwrap();
        track.set_keyframe(0, rect_kf([1.0, 1.0, 2.0, 2.0], true)).unwrap();
        let state = track.interpolate(0, &label()).unwrap();
        assert!(state.outside);
        assert_eq!(state.points.len(), 2);
    }

    #[test]
    fn mismatched_point_counts_hold_left_keyframe() {
        let mut track = Track::new(ClientId(1), 1, ShapeType::Polygon).unwrap();
        track
            .set_keyframe(
                0,
                TrackKeyframe {
                    points: vec![
                        Point::new(0.0, 0.0),
                        Point::new(4.0, 0.0),
                        Point::new(4.0, 4.0),
                    ],
                    rotation_deg: 0.0,
                    occluded: false,
                    outside: false,
                    z_order: 0,
                    attributes: AttributeMap::new(),
                },
            )
            .unwrap();
        track
            .set_keyframe(
                10,
                TrackKeyframe {
                    points: vec![
                        Point::new(0.0, 0.0),
                        Point::new(4.0, 0.0),
                        Point::new(4.0, 4.0),
                        Point::new(0.0, 4.0),
                    ],
                    rotation_deg: 0.0,
                    occluded: false,
                    outside: false,
                    z_order: 0,
                    attributes: AttributeMap::new(),
                },
            )
            .unwrap();
        let state = track.interpolate(5, &label()).unwrap();
        assert!(state.held);
        assert_eq!(state.points.len(), 3);
        assert!(state.points.iter().all(|p| p.x.is_finite() && p.y.is_finite()));
    }

    #[test]
    fn number_attributes_lerp_and_text_steps() {
        let mut track = Track::new(ClientId(1), 1, ShapeType::Rectangle).unwrap();
        let mut a = rect_kf([0.0, 0.0, 1.0, 1.0], false);
        a.attributes.insert(10, "0".into());
        a.attributes.insert(11, "sedan".into());
        let mut b = rect_kf([10.0, 10.0, 11.0, 11.0], false);
        b.attributes.insert(10, "100".into());
        b.attributes.insert(11, "truck".into());
        track.set_keyframe(0, a).unwrap();
        track.set_keyframe(10, b).unwrap();

        let state = track.interpolate(5, &label()).unwrap();
        assert_eq!(state.attributes.get(&10).unwrap(), "50");
        assert_eq!(state.attributes.get(&11).unwrap(), "sedan");
    }

    #[test]
    fn split_before_first_keyframe_is_unchanged() {
        let track = rect_track();
        let outcome = track.split(0, &label(), ClientId(8), ClientId(9)).unwrap();
        let tracks = outcome.into_tracks();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0], track);
    }

    #[test]
    fn split_partitions_keyframes_and_clears_identity() {
        let mut track = rect_track();
        track.server_id = Some(77);
        track.group = Some(3);
        let SplitOutcome::Split { previous, current } =
            track.split(5, &label(), ClientId(8), ClientId(9)).unwrap()
        else {
            panic!("expected a real split");
        };

        assert_eq!(previous.server_id, None);
        assert_eq!(previous.group, None);
        assert_eq!(current.server_id, None);
        assert_eq!(current.group, None);

        // Previous half: original keyframe 0 plus the synthetic cap at 4.
        assert_eq!(previous.keyframe_numbers().collect::<Vec<_>>(), vec![0, 4]);
        assert!(previous.keyframe(4).unwrap().outside);

        // Current half: seeded at 5, original keyframe 10 retained.
        assert_eq!(current.keyframe_numbers().collect::<Vec<_>>(), vec![5, 10]);
        let seed = current.keyframe(5).unwrap();
        assert_eq!(seed.points[0], Point::new(50.0, 25.0));
    }

    #[test]
    fn split_at_existing_keyframe_does_not_duplicate_it() {
        let track = rect_track();
        let SplitOutcome::Split { current, .. } =
            track.split(10, &label(), ClientId(8), ClientId(9)).unwrap()
        else {
            panic!("expected a real split");
        };
        assert_eq!(current.keyframe_numbers().collect::<Vec<_>>(), vec![10]);
    }

    #[test]
    fn merge_rejects_overlapping_keyframes() {
        let a = rect_track();
        let b = rect_track();
        assert!(Track::merge(&[a, b], ClientId(5)).is_err());
    }

    #[test]
    fn merge_unions_disjoint_keyframes() {
        let a = rect_track();
        let mut b = Track::new(ClientId(2), 1, ShapeType::Rectangle).unwrap();
        b.set_keyframe(20, rect_kf([1.0, 1.0, 2.0, 2.0], false)).unwrap();
        let merged = Track::merge(&[a, b], ClientId(5)).unwrap();
        assert_eq!(merged.keyframe_numbers().collect::<Vec<_>>(), vec![0, 10, 20]);
    }

    #[test]
    fn mask_tracks_are_rejected() {
        assert!(Track::new(ClientId(1), 1, ShapeType::Mask).is_err());
    }

    #[test]
    fn rotation_takes_the_shortest_arc() {
        assert_eq!(lerp_angle_deg(350.0, 10.0, 0.5), 0.0);
        assert_eq!(lerp_angle_deg(0.0, 180.0, 0.5), 90.0);
    }
}
