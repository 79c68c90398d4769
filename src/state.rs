//! Session-level annotation state: object wrappers, snapshots, and the
//! copy-on-write commit contract.
//!
//! Reads produce immutable [`ShapeView`] snapshots. Edits are described by an
//! [`ObjectUpdate`] builder and applied through [`AnnotationStore::commit`],
//! which returns a [`CommitToken`]; mutating a snapshot in place has no effect
//! on stored state. Commits notify the registered observer; the persistence
//! collaborator may reject them out of band.

use std::collections::BTreeMap;

use kurbo::Point;
use tracing::debug;

use crate::core::{AttributeMap, ClientId, Label, ShapeType};
use crate::error::{CanvasError, CanvasResult};
use crate::mask::MaskData;
use crate::shape::{Shape, attributes_from_wire, attributes_to_wire};
use crate::track::{SplitOutcome, Track, TrackKeyframe};
use crate::wire::{WireAnnotations, WireTag};

/// Commit notifications emitted by the engine. These report completed
/// mutations; they are not permission requests.
pub trait EngineObserver {
    fn annotations_updated(&mut self, _client_ids: &[ClientId]) {}
    fn shape_drawn(&mut self, _client_id: ClientId) {}
    fn objects_merged(&mut self, _client_id: ClientId) {}
    fn objects_grouped(&mut self, _client_ids: &[ClientId]) {}
    fn track_split(&mut self, _client_ids: &[ClientId]) {}
}

/// Observer that ignores every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullObserver;

impl EngineObserver for NullObserver {}

/// Kind of a stored object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Shape,
    Track,
    Tag,
}

/// Payload of one stored object.
#[derive(Clone, Debug)]
pub enum ObjectData {
    Shape(Shape),
    Track(Track),
    Tag {
        server_id: Option<u64>,
        label_id: u64,
        frame: u64,
        attributes: AttributeMap,
    },
}

/// A stored annotation object: shape, track, or tag.
#[derive(Clone, Debug)]
pub struct ObjectState {
    pub client_id: ClientId,
    pub data: ObjectData,
}

impl ObjectState {
    pub fn object_type(&self) -> ObjectType {
        match &self.data {
            ObjectData::Shape(_) => ObjectType::Shape,
            ObjectData::Track(_) => ObjectType::Track,
            ObjectData::Tag { .. } => ObjectType::Tag,
        }
    }

    pub fn label_id(&self) -> u64 {
        match &self.data {
            ObjectData::Shape(shape) => shape.label_id,
            ObjectData::Track(track) => track.label_id,
            ObjectData::Tag { label_id, .. } => *label_id,
        }
    }
}

/// Immutable per-frame snapshot of a shape or track state.
#[derive(Clone, Debug, PartialEq)]
pub struct ShapeView {
    pub client_id: ClientId,
    pub object_type: ObjectType,
    pub label_id: u64,
    pub frame: u64,
    pub shape_type: ShapeType,
    pub points: Vec<Point>,
    pub mask: Option<MaskData>,
    pub rotation_deg: f64,
    pub occluded: bool,
    pub outside: bool,
    pub z_order: i32,
    pub group: Option<u64>,
    pub attributes: AttributeMap,
    /// True when the frame is an explicit keyframe (always true for shapes).
    pub keyframe: bool,
    /// True when track interpolation held the left keyframe.
    pub held: bool,
}

/// Copy-on-write edit description, applied through
/// [`AnnotationStore::commit`].
#[derive(Clone, Debug)]
pub struct ObjectUpdate {
    pub client_id: ClientId,
    pub frame: u64,
    points: Option<Vec<Point>>,
    mask: Option<MaskData>,
    rotation_deg: Option<f64>,
    occluded: Option<bool>,
    outside: Option<bool>,
    z_order: Option<i32>,
    attributes: Option<AttributeMap>,
}

impl ObjectUpdate {
    pub fn new(client_id: ClientId, frame: u64) -> Self {
        Self {
            client_id,
            frame,
            points: None,
            mask: None,
            rotation_deg: None,
            occluded: None,
            outside: None,
            z_order: None,
            attributes: None,
        }
    }

    pub fn points(mut self, points: Vec<Point>) -> Self {
        self.points = Some(points);
        self
    }

    pub fn mask(mut self, mask: MaskData) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn rotation_deg(mut self, rotation_deg: f64) -> Self {
        self.rotation_deg = Some(rotation_deg);
        self
    }

    pub fn occluded(mut self, occluded: bool) -> Self {
        self.occluded = Some(occluded);
        self
    }

    pub fn outside(mut self, outside: bool) -> Self {
        self.outside = Some(outside);
        self
    }

    pub fn z_order(mut self, z_order: i32) -> Self {
        self.z_order = Some(z_order);
        self
    }

    pub fn attributes(mut self, attributes: AttributeMap) -> Self {
        self.attributes = Some(attributes);
        self
    }
}

/// Receipt for an applied commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitToken {
    pub client_id: ClientId,
    pub revision: u64,
}

/// In-memory annotation state for one job session.
#[derive(Clone, Debug)]
pub struct AnnotationStore {
    labels: BTreeMap<u64, Label>,
    start_frame: u64,
    stop_frame: u64,
    objects: BTreeMap<ClientId, ObjectState>,
    next_client: u64,
    next_group: u64,
    revision: u64,
}

impl AnnotationStore {
    pub fn new(labels: Vec<Label>, start_frame: u64, stop_frame: u64) -> CanvasResult<Self> {
        if start_frame > stop_frame {
            return Err(CanvasError::validation("start_frame must be <= stop_frame"));
        }
        let mut map = BTreeMap::new();
        for label in labels {
            if map.insert(label.id, label).is_some() {
                return Err(CanvasError::validation("duplicate label id"));
            }
        }
        Ok(Self {
            labels: map,
            start_frame,
            stop_frame,
            objects: BTreeMap::new(),
            next_client: 1,
            next_group: 1,
            revision: 0,
        })
    }

    pub fn start_frame(&self) -> u64 {
        self.start_frame
    }

    pub fn stop_frame(&self) -> u64 {
        self.stop_frame
    }

    pub fn label(&self, id: u64) -> CanvasResult<&Label> {
        self.labels
            .get(&id)
            .ok_or_else(|| CanvasError::validation(format!("unknown label id {id}")))
    }

    pub fn get(&self, client_id: ClientId) -> Option<&ObjectState> {
        self.objects.get(&client_id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectState> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn alloc_client_id(&mut self) -> ClientId {
        let id = ClientId(self.next_client);
        self.next_client += 1;
        id
    }

    /// Load the server annotation payload, replacing current state.
    pub fn import(&mut self, annotations: &WireAnnotations) -> CanvasResult<Vec<ClientId>> {
        let mut staged: Vec<ObjectData> = Vec::new();
        for tag in &annotations.tags {
            self.label(tag.label_id)?;
            staged.push(ObjectData::Tag {
                server_id: tag.id,
                label_id: tag.label_id,
                frame: tag.frame,
                attributes: attributes_from_wire(&tag.attributes),
            });
        }
        for wire in &annotations.shapes {
            self.label(wire.label_id)?;
            // Client id is patched after allocation below.
            staged.push(ObjectData::Shape(Shape::from_wire(ClientId(0), wire)?));
        }
        for wire in &annotations.tracks {
            self.label(wire.label_id)?;
            staged.push(ObjectData::Track(Track::from_wire(ClientId(0), wire)?));
        }

        self.objects.clear();
        let mut ids = Vec::with_capacity(staged.len());
        for mut data in staged {
            let client_id = self.alloc_client_id();
            match &mut data {
                ObjectData::Shape(shape) => shape.client_id = client_id,
                ObjectData::Track(track) => track.client_id = client_id,
                ObjectData::Tag { .. } => {}
            }
            self.objects.insert(client_id, ObjectState { client_id, data });
            ids.push(client_id);
        }
        self.revision += 1;
        Ok(ids)
    }

    /// Serialize current state back into the wire payload.
    pub fn export(&self) -> WireAnnotations {
        let mut out = WireAnnotations::default();
        for object in self.objects.values() {
            match &object.data {
                ObjectData::Shape(shape) => out.shapes.push(shape.to_wire()),
                ObjectData::Track(track) => out.tracks.push(track.to_wire()),
                ObjectData::Tag {
                    server_id,
                    label_id,
                    frame,
                    attributes,
                } => out.tags.push(WireTag {
                    id: *server_id,
                    label_id: *label_id,
                    frame: *frame,
                    attributes: attributes_to_wire(attributes),
                }),
            }
        }
        out
    }

    /// Insert a new shape, assigning it a fresh client id.
    pub fn insert_shape(&mut self, mut shape: Shape) -> CanvasResult<ClientId> {
        self.label(shape.label_id)?;
        self.check_frame(shape.frame)?;
        shape.validate()?;
        let client_id = self.alloc_client_id();
        shape.client_id = client_id;
        self.objects.insert(
            client_id,
            ObjectState {
                client_id,
                data: ObjectData::Shape(shape),
            },
        );
        self.revision += 1;
        Ok(client_id)
    }

    pub fn insert_track(&mut self, mut track: Track) -> CanvasResult<ClientId> {
        self.label(track.label_id)?;
        if track.first_keyframe().is_none() {
            return Err(CanvasError::validation("track must have at least one keyframe"));
        }
        let client_id = self.alloc_client_id();
        track.client_id = client_id;
        self.objects.insert(
            client_id,
            ObjectState {
                client_id,
                data: ObjectData::Track(track),
            },
        );
        self.revision += 1;
        Ok(client_id)
    }

    pub fn insert_tag(&mut self, label_id: u64, frame: u64) -> CanvasResult<ClientId> {
        self.label(label_id)?;
        self.check_frame(frame)?;
        let client_id = self.alloc_client_id();
        self.objects.insert(
            client_id,
            ObjectState {
                client_id,
                data: ObjectData::Tag {
                    server_id: None,
                    label_id,
                    frame,
                    attributes: AttributeMap::new(),
                },
            },
        );
        self.revision += 1;
        Ok(client_id)
    }

    pub fn delete(
        &mut self,
        client_id: ClientId,
        observer: &mut dyn EngineObserver,
    ) -> CanvasResult<ObjectState> {
        let removed = self
            .objects
            .remove(&client_id)
            .ok_or_else(|| CanvasError::validation(format!("unknown object {client_id:?}")))?;
        self.revision += 1;
        observer.annotations_updated(&[client_id]);
        Ok(removed)
    }

    /// Read the object's state at `frame` as an immutable snapshot.
    ///
    /// `None` for tags (no geometry) and for shapes that live on another
    /// frame. Tracks always interpolate; presence policy before the first
    /// keyframe is the UI layer's concern.
    pub fn read(&self, client_id: ClientId, frame: u64) -> CanvasResult<Option<ShapeView>> {
        let object = self
            .objects
            .get(&client_id)
            .ok_or_else(|| CanvasError::validation(format!("unknown object {client_id:?}")))?;
        match &object.data {
            ObjectData::Tag { .. } => Ok(None),
            ObjectData::Shape(shape) => {
                if shape.frame != frame {
                    return Ok(None);
                }
                Ok(Some(ShapeView {
                    client_id,
                    object_type: ObjectType::Shape,
                    label_id: shape.label_id,
                    frame,
                    shape_type: shape.shape_type,
                    points: shape.points.clone(),
                    mask: shape.mask.clone(),
                    rotation_deg: shape.rotation_deg,
                    occluded: shape.occluded,
                    outside: shape.outside,
                    z_order: shape.z_order,
                    group: shape.group,
                    attributes: shape.attributes.clone(),
                    keyframe: true,
                    held: false,
                }))
            }
            ObjectData::Track(track) => {
                let label = self.label(track.label_id)?;
                let state = track.interpolate(frame, label)?;
                Ok(Some(ShapeView {
                    client_id,
                    object_type: ObjectType::Track,
                    label_id: track.label_id,
                    frame,
                    shape_type: track.shape_type,
                    points: state.points,
                    mask: None,
                    rotation_deg: state.rotation_deg,
                    occluded: state.occluded,
                    outside: state.outside,
                    z_order: state.z_order,
                    group: track.group,
                    attributes: state.attributes,
                    keyframe: state.keyframe,
                    held: state.held,
                }))
            }
        }
    }

    /// Apply an edit. The stored object is replaced wholesale with the merged
    /// result; for tracks the edit writes the keyframe at `update.frame`.
    pub fn commit(
        &mut self,
        update: ObjectUpdate,
        observer: &mut dyn EngineObserver,
    ) -> CanvasResult<CommitToken> {
        self.check_frame(update.frame)?;
        let object = self
            .objects
            .get_mut(&update.client_id)
            .ok_or_else(|| CanvasError::validation(format!("unknown object {:?}", update.client_id)))?;

        match &mut object.data {
            ObjectData::Shape(shape) => {
                let mut next = shape.clone();
                if let Some(points) = update.points {
                    next.points = points;
                }
                if let Some(mask) = update.mask {
                    next.mask = Some(mask);
                }
                if let Some(rotation) = update.rotation_deg {
                    next.rotation_deg = rotation;
                }
                if let Some(occluded) = update.occluded {
                    next.occluded = occluded;
                }
                if let Some(outside) = update.outside {
                    next.outside = outside;
                }
                if let Some(z_order) = update.z_order {
                    next.z_order = z_order;
                }
                if let Some(attributes) = update.attributes {
                    next.attributes = attributes;
                }
                next.validate()?;
                *shape = next;
            }
            ObjectData::Track(track) => {
                if update.mask.is_some() {
                    return Err(CanvasError::validation("tracks cannot carry mask payloads"));
                }
                let label = self
                    .labels
                    .get(&track.label_id)
                    .ok_or_else(|| CanvasError::validation("unknown label id"))?;
                let base = track.interpolate(update.frame, label)?;
                let mutable_base: AttributeMap = base
                    .attributes
                    .iter()
                    .filter(|(k, _)| !track.attributes.contains_key(k))
                    .map(|(&k, v)| (k, v.clone()))
                    .collect();
                track.set_keyframe(
                    update.frame,
                    TrackKeyframe {
                        points: update.points.unwrap_or(base.points),
                        rotation_deg: update.rotation_deg.unwrap_or(base.rotation_deg),
                        occluded: update.occluded.unwrap_or(base.occluded),
                        outside: update.outside.unwrap_or(base.outside),
                        z_order: update.z_order.unwrap_or(base.z_order),
                        attributes: update.attributes.unwrap_or(mutable_base),
                    },
                )?;
            }
            ObjectData::Tag { attributes, .. } => {
                if update.points.is_some() || update.mask.is_some() {
                    return Err(CanvasError::validation("tags have no geometry"));
                }
                if let Some(next) = update.attributes {
                    *attributes = next;
                }
            }
        }

        self.revision += 1;
        let token = CommitToken {
            client_id: update.client_id,
            revision: self.revision,
        };
        debug!(client_id = update.client_id.0, revision = self.revision, "commit applied");
        observer.annotations_updated(&[update.client_id]);
        Ok(token)
    }

    /// Split a track at `frame`. Returns the resulting client ids: one when
    /// the split point is at or before the first keyframe (no-op), two
    /// otherwise.
    pub fn split_track(
        &mut self,
        client_id: ClientId,
        frame: u64,
        observer: &mut dyn EngineObserver,
    ) -> CanvasResult<Vec<ClientId>> {
        let object = self
            .objects
            .get(&client_id)
            .ok_or_else(|| CanvasError::validation(format!("unknown object {client_id:?}")))?;
        let ObjectData::Track(track) = &object.data else {
            return Err(CanvasError::validation("only tracks can be split"));
        };
        let label = self.labels.get(&track.label_id).cloned().ok_or_else(|| {
            CanvasError::validation(format!("unknown label id {}", track.label_id))
        })?;

        let previous_id = ClientId(self.next_client);
        let current_id = ClientId(self.next_client + 1);
        match track.split(frame, &label, previous_id, current_id)? {
            SplitOutcome::Unchanged(_) => Ok(vec![client_id]),
            SplitOutcome::Split { previous, current } => {
                self.next_client += 2;
                self.objects.remove(&client_id);
                self.objects.insert(
                    previous_id,
                    ObjectState {
                        client_id: previous_id,
                        data: ObjectData::Track(previous),
                    },
                );
                self.objects.insert(
                    current_id,
                    ObjectState {
                        client_id: current_id,
                        data: ObjectData::Track(current),
                    },
                );
                self.revision += 1;
                observer.track_split(&[previous_id, current_id]);
                observer.annotations_updated(&[previous_id, current_id]);
                Ok(vec![previous_id, current_id])
            }
        }
    }

    /// Merge objects into one track: either single-frame shapes on distinct
    /// frames, or whole tracks with disjoint keyframe ranges.
    pub fn merge_objects(
        &mut self,
        client_ids: &[ClientId],
        observer: &mut dyn EngineObserver,
    ) -> CanvasResult<ClientId> {
        if client_ids.len() < 2 {
            return Err(CanvasError::validation("merge needs at least two objects"));
        }
        let mut shapes: Vec<Shape> = Vec::new();
        let mut tracks: Vec<Track> = Vec::new();
        for &id in client_ids {
            let object = self
                .objects
                .get(&id)
                .ok_or_else(|| CanvasError::validation(format!("unknown object {id:?}")))?;
            match &object.data {
                ObjectData::Shape(shape) => shapes.push(shape.clone()),
                ObjectData::Track(track) => tracks.push(track.clone()),
                ObjectData::Tag { .. } => {
                    return Err(CanvasError::validation("tags cannot be merged"));
                }
            }
        }
        if !shapes.is_empty() && !tracks.is_empty() {
            return Err(CanvasError::validation(
                "cannot merge shapes and tracks together",
            ));
        }

        let merged = if tracks.is_empty() {
            self.track_from_shapes(&shapes)?
        } else {
            Track::merge(&tracks, ClientId(0))?
        };

        for &id in client_ids {
            self.objects.remove(&id);
        }
        let merged_id = self.insert_track(merged)?;
        observer.objects_merged(merged_id);
        observer.annotations_updated(&[merged_id]);
        Ok(merged_id)
    }

    /// Put objects into a fresh group, returning the group id.
    pub fn group_objects(
        &mut self,
        client_ids: &[ClientId],
        observer: &mut dyn EngineObserver,
    ) -> CanvasResult<u64> {
        if client_ids.len() < 2 {
            return Err(CanvasError::validation("grouping needs at least two objects"));
        }
        for &id in client_ids {
            let object = self
                .objects
                .get(&id)
                .ok_or_else(|| CanvasError::validation(format!("unknown object {id:?}")))?;
            if object.object_type() == ObjectType::Tag {
                return Err(CanvasError::validation("tags cannot be grouped"));
            }
        }
        let group = self.next_group;
        self.next_group += 1;
        for &id in client_ids {
            if let Some(object) = self.objects.get_mut(&id) {
                match &mut object.data {
                    ObjectData::Shape(shape) => shape.group = Some(group),
                    ObjectData::Track(track) => track.group = Some(group),
                    ObjectData::Tag { .. } => {}
                }
            }
        }
        self.revision += 1;
        observer.objects_grouped(client_ids);
        observer.annotations_updated(client_ids);
        Ok(group)
    }

    /// Build a track from same-label, same-type shapes on distinct frames.
    /// Immutable attributes come from the earliest shape; mutable ones become
    /// per-keyframe values.
    fn track_from_shapes(&self, shapes: &[Shape]) -> CanvasResult<Track> {
        let first = &shapes[0];
        let label = self.label(first.label_id)?;
        let mut track = Track::new(ClientId(0), first.label_id, first.shape_type)?;
        let mut frames_seen = std::collections::BTreeSet::new();
        for shape in shapes {
            if shape.shape_type != first.shape_type || shape.label_id != first.label_id {
                return Err(CanvasError::validation(
                    "merged shapes must share label and shape type",
                ));
            }
            if !frames_seen.insert(shape.frame) {
                return Err(CanvasError::validation(format!(
                    "merged shapes overlap at frame {}",
                    shape.frame
                )));
            }
            let mutable: AttributeMap = shape
                .attributes
                .iter()
                .filter(|(k, _)| label.attribute(**k).is_some_and(|spec| spec.mutable))
                .map(|(k, v)| (*k, v.clone()))
                .collect();
            track.set_keyframe(
                shape.frame,
                TrackKeyframe {
                    points: shape.points.clone(),
                    rotation_deg: shape.rotation_deg,
                    occluded: shape.occluded,
                    outside: shape.outside,
                    z_order: shape.z_order,
                    attributes: mutable,
                },
            )?;
        }
        let earliest = shapes
            .iter()
            .min_by_key(|s| s.frame)
            .unwrap_or(first);
        track.attributes = earliest
            .attributes
            .iter()
            .filter(|(k, _)| label.attribute(**k).is_some_and(|spec| !spec.mutable))
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        Ok(track)
    }

    fn check_frame(&self, frame: u64) -> CanvasResult<()> {
        if frame < self.start_frame || frame > self.stop_frame {
            return Err(CanvasError::validation(format!(
                "frame {frame} outside job range {}..={}",
                self.start_frame, self.stop_frame
            )));
        }
        Ok(())
    }
}
