//! Serialized annotation records exchanged with the server.
//!
//! The engine does not own persistence; it only guarantees that canonical
//! shapes round-trip exactly through these records.

use crate::core::ShapeType;

/// One attribute value on the wire.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WireAttribute {
    pub spec_id: u64,
    pub value: String,
}

/// A single-frame shape record.
///
/// Points are a flat `[x1, y1, x2, y2, ...]` sequence, except rectangles
/// (`[xtl, ytl, xbr, ybr]`) and masks (run lengths followed by the bounding
/// box `[left, top, right, bottom]`).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WireShape {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub label_id: u64,
    pub frame: u64,
    #[serde(rename = "type")]
    pub shape_type: ShapeType,
    pub points: Vec<f64>,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub occluded: bool,
    #[serde(default)]
    pub outside: bool,
    #[serde(default)]
    pub z_order: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<WireAttribute>,
}

/// One keyframe of a track on the wire. Same geometry encoding as
/// [`WireShape`]; attributes here are the mutable ones only.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WireTrackShape {
    pub frame: u64,
    pub points: Vec<f64>,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub occluded: bool,
    #[serde(default)]
    pub outside: bool,
    #[serde(default)]
    pub z_order: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<WireAttribute>,
}

/// A track record: immutable attributes on the track, keyframes inside.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WireTrack {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub label_id: u64,
    pub frame: u64,
    #[serde(rename = "type")]
    pub shape_type: ShapeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<WireAttribute>,
    pub shapes: Vec<WireTrackShape>,
}

/// A frame-level tag (no geometry).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WireTag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub label_id: u64,
    pub frame: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<WireAttribute>,
}

/// The complete annotation payload for a job.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WireAnnotations {
    #[serde(default)]
    pub tags: Vec<WireTag>,
    #[serde(default)]
    pub shapes: Vec<WireShape>,
    #[serde(default)]
    pub tracks: Vec<WireTrack>,
}
