//! Canonical in-memory shape model and wire conversion.

use kurbo::Point;

use crate::core::{AttributeMap, ClientId, ShapeType};
use crate::error::{CanvasError, CanvasResult};
use crate::mask::MaskData;
use crate::wire::{WireAttribute, WireShape};

/// A shape state at a single frame.
///
/// Geometry is a list of image-coordinate points for every type except masks,
/// which carry a rasterized [`MaskData`] instead. `outside == true` shapes keep
/// their full geometry so ghost rendering and export still work.
#[derive(Clone, Debug, PartialEq)]
pub struct Shape {
    pub client_id: ClientId,
    pub server_id: Option<u64>,
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
}

impl Shape {
    /// Convert a wire record into canonical form.
    ///
    /// Rectangles keep their `[xtl, ytl, xbr, ybr]` numbers as two corner
    /// points, so the conversion is its own inverse on coordinates.
    pub fn from_wire(client_id: ClientId, wire: &WireShape) -> CanvasResult<Self> {
        let (points, mask) = match wire.shape_type {
            ShapeType::Mask => (Vec::new(), Some(MaskData::from_flat(&wire.points)?)),
            _ => (points_from_flat(&wire.points)?, None),
        };
        let shape = Self {
            client_id,
            server_id: wire.id,
            label_id: wire.label_id,
            frame: wire.frame,
            shape_type: wire.shape_type,
            points,
            mask,
            rotation_deg: wire.rotation,
            occluded: wire.occluded,
            outside: wire.outside,
            z_order: wire.z_order,
            group: wire.group,
            attributes: attributes_from_wire(&wire.attributes),
        };
        shape.validate()?;
        Ok(shape)
    }

    /// Serialize back to the wire record. Exact inverse of
    /// [`Shape::from_wire`] for every shape type.
    pub fn to_wire(&self) -> WireShape {
        WireShape {
            id: self.server_id,
            label_id: self.label_id,
            frame: self.frame,
            shape_type: self.shape_type,
            points: self.flat_points(),
            rotation: self.rotation_deg,
            occluded: self.occluded,
            outside: self.outside,
            z_order: self.z_order,
            group: self.group,
            attributes: attributes_to_wire(&self.attributes),
        }
    }

    pub fn flat_points(&self) -> Vec<f64> {
        match (&self.mask, self.shape_type) {
            (Some(mask), ShapeType::Mask) => mask.to_flat(),
            _ => flat_from_points(&self.points),
        }
    }

    /// Structural validity: vertex arity per type, finite coordinates, and a
    /// mask payload iff the type is mask. Holds for outside shapes too.
    pub fn validate(&self) -> CanvasResult<()> {
        if self.shape_type == ShapeType::Mask {
            if self.mask.is_none() {
                return Err(CanvasError::validation("mask shape without mask payload"));
            }
            return Ok(());
        }
        if self.mask.is_some() {
            return Err(CanvasError::validation(format!(
                "{:?} shape carries a mask payload",
                self.shape_type
            )));
        }
        validate_points(self.shape_type, &self.points)
    }
}

/// Check vertex arity and coordinate finiteness for a point-based type.
pub fn validate_points(shape_type: ShapeType, points: &[Point]) -> CanvasResult<()> {
    let min = shape_type.min_points();
    if points.len() < min {
        return Err(CanvasError::validation(format!(
            "{shape_type:?} needs at least {min} points, got {}",
            points.len()
        )));
    }
    if let Some(max) = shape_type.max_points()
        && points.len() > max
    {
        return Err(CanvasError::validation(format!(
            "{shape_type:?} allows at most {max} points, got {}",
            points.len()
        )));
    }
    if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(CanvasError::validation("shape points must be finite"));
    }
    Ok(())
}

/// Pair up a flat `[x1, y1, ...]` sequence.
pub fn points_from_flat(flat: &[f64]) -> CanvasResult<Vec<Point>> {
    if !flat.len().is_multiple_of(2) {
        return Err(CanvasError::validation(format!(
            "flat point list has odd length {}",
            flat.len()
        )));
    }
    Ok(flat
        .chunks_exact(2)
        .map(|xy| Point::new(xy[0], xy[1]))
        .collect())
}

/// Flatten points back into `[x1, y1, ...]`.
pub fn flat_from_points(points: &[Point]) -> Vec<f64> {
    points.iter().flat_map(|p| [p.x, p.y]).collect()
}

pub(crate) fn attributes_from_wire(wire: &[WireAttribute]) -> AttributeMap {
    wire.iter()
        .map(|a| (a.spec_id, a.value.clone()))
        .collect()
}

pub(crate) fn attributes_to_wire(map: &AttributeMap) -> Vec<WireAttribute> {
    map.iter()
        .map(|(&spec_id, value)| WireAttribute {
            spec_id,
            value: value.clone(),
        })
        .collect()
}
