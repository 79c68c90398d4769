use kurbo::{Point, Vec2};
use trackcanvas::core::{AttributeMap, ClientId, ShapeType};
use trackcanvas::view::{HitTarget, hit_test};
use trackcanvas::{AnnotationStore, Canvas, Label, Shape, ViewState};

fn store_with_rects() -> (AnnotationStore, Vec<ClientId>) {
    let mut store = AnnotationStore::new(
        vec![Label {
            id: 1,
            name: "box".into(),
            color: None,
            attributes: vec![],
        }],
        0,
        10,
    )
    .unwrap();

    let mut ids = Vec::new();
    for (z, offset) in [(0, 0.0), (2, 5.0)] {
        let id = store
            .insert_shape(Shape {
                client_id: ClientId(0),
                server_id: None,
                label_id: 1,
                frame: 0,
                shape_type: ShapeType::Rectangle,
                points: vec![
                    Point::new(100.0 + offset, 100.0),
                    Point::new(200.0 + offset, 200.0),
                ],
                mask: None,
                rotation_deg: 0.0,
                occluded: false,
                outside: false,
                z_order: z,
                group: None,
                attributes: AttributeMap::new(),
            })
            .unwrap();
        ids.push(id);
    }
    (store, ids)
}

fn targets(store: &AnnotationStore, frame: u64) -> Vec<HitTarget> {
    store
        .objects()
        .filter_map(|object| {
            let view = store.read(object.client_id, frame).ok().flatten()?;
            Some(HitTarget {
                client_id: view.client_id,
                shape_type: view.shape_type,
                points: view.points,
                z_order: view.z_order,
                activation: object.client_id.0,
            })
        })
        .collect()
}

#[test]
fn hit_testing_uses_screen_space_tolerance() {
    let (store, ids) = store_with_rects();
    let view = ViewState::new(2.0, 0.0, Vec2::ZERO, Canvas::new(800, 600).unwrap()).unwrap();
    let targets = targets(&store, 0);

    // Image point (100, 100) projects to (200, 200) at 2x zoom.
    let hit = hit_test(&view, Point::new(198.0, 201.0), &targets, 5.0).unwrap();
    assert_eq!(hit.client_id, ids[0]);
    assert_eq!(hit.point_index, Some(0));

    // 5 screen pixels is only 2.5 image pixels here.
    assert!(hit_test(&view, Point::new(180.0, 180.0), &targets, 5.0).is_none());
}

#[test]
fn overlapping_shapes_resolve_by_z_order() {
    let (store, ids) = store_with_rects();
    let view = ViewState::new(1.0, 0.0, Vec2::ZERO, Canvas::new(800, 600).unwrap()).unwrap();
    let targets = targets(&store, 0);

    // Probe the shared horizontal edge both rectangles pass through.
    let hit = hit_test(&view, Point::new(150.0, 100.0), &targets, 3.0).unwrap();
    assert_eq!(hit.client_id, ids[1]);
}

#[test]
fn rotated_view_still_round_trips_hits() {
    let view = ViewState::new(1.5, 45.0, Vec2::new(30.0, -10.0), Canvas::new(800, 600).unwrap())
        .unwrap();
    let image_point = Point::new(140.0, 160.0);
    let screen = view.project(image_point);
    let back = view.unproject(screen);
    assert!((back.x - image_point.x).abs() < 1e-6);
    assert!((back.y - image_point.y).abs() < 1e-6);
}

#[test]
fn overlay_placement_stays_on_screen() {
    let view = ViewState::new(1.0, 0.0, Vec2::ZERO, Canvas::new(400, 300).unwrap()).unwrap();
    let placed = view.place_overlay(Point::new(395.0, 295.0), (120.0, 40.0), 16.0);
    assert!(placed.x + 120.0 <= 400.0);
    assert!(placed.y + 40.0 <= 300.0);
    assert!(placed.x >= 0.0 && placed.y >= 0.0);
}
