use std::collections::BTreeMap;

use crate::error::{CanvasError, CanvasResult};

pub use kurbo::{Affine, Point, Rect, Vec2};

/// Absolute 0-based frame number in job timeline space.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameNumber(pub u64);

/// Session-local object identity, stable for the lifetime of an annotation
/// session. Never persisted; the server id travels separately.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct ClientId(pub u64);

/// Canvas (or frame) dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Canvas {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Per-frame metadata supplied by the job collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrameMetadata {
    pub number: FrameNumber,
    pub width: u32,
    pub height: u32,
}

/// Geometric kind of an annotation shape.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
    Rectangle,
    Polygon,
    Polyline,
    Points,
    Ellipse,
    Cuboid,
    Mask,
    Skeleton,
}

impl ShapeType {
    /// Minimum number of vertices a structurally valid shape of this type has.
    pub fn min_points(self) -> usize {
        match self {
            Self::Rectangle | Self::Ellipse | Self::Polyline => 2,
            Self::Polygon => 3,
            Self::Points | Self::Mask | Self::Skeleton => 1,
            Self::Cuboid => 4,
        }
    }

    /// Maximum number of vertices, when the type is fixed-arity.
    pub fn max_points(self) -> Option<usize> {
        match self {
            Self::Rectangle | Self::Ellipse => Some(2),
            Self::Cuboid => Some(4),
            Self::Polygon | Self::Polyline | Self::Points | Self::Mask | Self::Skeleton => None,
        }
    }

    /// Closed shapes connect their last vertex back to the first.
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Rectangle | Self::Polygon | Self::Ellipse | Self::Cuboid)
    }
}

/// Widget kind of a label attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeInput {
    Select,
    Checkbox,
    Text,
    Radio,
    Number,
}

/// Declaration of a single label attribute.
///
/// Mutable attributes may differ per keyframe of a track; immutable ones are
/// fixed at track creation and shared across all frames.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AttributeSpec {
    pub id: u64,
    pub name: String,
    pub mutable: bool,
    pub input: AttributeInput,
    /// Allowed values for select/radio inputs, `[min, max, step]` for numbers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// A label definition owned by the job metadata collaborator.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Label {
    pub id: u64,
    pub name: String,
    /// Hex color like `#ff0000`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<AttributeSpec>,
}

impl Label {
    pub fn attribute(&self, spec_id: u64) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|a| a.id == spec_id)
    }
}

/// Attribute values keyed by attribute spec id.
pub type AttributeMap = BTreeMap<u64, String>;

impl Canvas {
    /// Create validated non-degenerate dimensions.
    pub fn new(width: u32, height: u32) -> CanvasResult<Self> {
        if width == 0 || height == 0 {
            return Err(CanvasError::validation("Canvas dimensions must be > 0"));
        }
        Ok(Self { width, height })
    }

    pub fn center(self) -> Point {
        Point::new(f64::from(self.width) / 2.0, f64::from(self.height) / 2.0)
    }
}
