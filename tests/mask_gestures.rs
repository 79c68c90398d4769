use kurbo::Point;
use trackcanvas::core::ShapeType;
use trackcanvas::state::{NullObserver, ObjectData};
use trackcanvas::{AnnotationStore, Canvas, Editor, Label};

fn make_store() -> AnnotationStore {
    AnnotationStore::new(
        vec![Label {
            id: 1,
            name: "region".into(),
            color: None,
            attributes: vec![],
        }],
        0,
        50,
    )
    .unwrap()
}

#[test]
fn brush_gesture_produces_a_mask_shape_that_round_trips() {
    let mut editor = Editor::new();
    let mut store = make_store();
    let canvas = Canvas::new(64, 64).unwrap();

    editor.start_mask_drawing(canvas, 1, 4).unwrap();
    editor
        .mask_polygon_plus(&[
            Point::new(10.0, 10.0),
            Point::new(30.0, 10.0),
            Point::new(30.0, 25.0),
            Point::new(10.0, 25.0),
        ])
        .unwrap();
    let id = editor
        .finish_mask(&mut store, &mut NullObserver)
        .unwrap()
        .unwrap();

    let ObjectData::Shape(shape) = &store.get(id).unwrap().data else {
        panic!("expected shape");
    };
    assert_eq!(shape.shape_type, ShapeType::Mask);
    let mask = shape.mask.as_ref().unwrap();
    assert!(mask.area() > 0);

    // The RLE payload survives a full export/import cycle.
    let exported = store.export();
    let mut other = make_store();
    let ids = other.import(&exported).unwrap();
    let ObjectData::Shape(back) = &other.get(ids[0]).unwrap().data else {
        panic!("expected shape");
    };
    assert_eq!(back.mask.as_ref().unwrap(), mask);
}

#[test]
fn brush_and_erase_combine_into_one_commit() {
    let mut editor = Editor::new();
    let mut store = make_store();
    let canvas = Canvas::new(64, 64).unwrap();

    editor.start_mask_drawing(canvas, 1, 0).unwrap();
    editor
        .mask_brush(&[Point::new(20.0, 20.0), Point::new(40.0, 20.0)], 4.0)
        .unwrap();
    let id = editor
        .finish_mask(&mut store, &mut NullObserver)
        .unwrap()
        .unwrap();
    let before = match &store.get(id).unwrap().data {
        ObjectData::Shape(shape) => shape.mask.clone().unwrap(),
        _ => panic!("expected shape"),
    };

    // One gesture with several strokes lands as a single mask update.
    editor.start_mask_editing(&store, canvas, id).unwrap();
    editor
        .mask_brush(&[Point::new(50.0, 50.0)], 3.0)
        .unwrap();
    editor
        .mask_erase(&[Point::new(20.0, 20.0)], 2.0)
        .unwrap();
    editor.finish_mask(&mut store, &mut NullObserver).unwrap();

    let after = match &store.get(id).unwrap().data {
        ObjectData::Shape(shape) => shape.mask.clone().unwrap(),
        _ => panic!("expected shape"),
    };
    assert_ne!(before, after);
    // The new blob extends the bounding box downward.
    assert!(after.bottom > before.bottom);
}

#[test]
fn undo_within_a_gesture_restores_the_previous_bitmap() {
    let mut editor = Editor::new();
    let mut store = make_store();
    let canvas = Canvas::new(32, 32).unwrap();

    editor.start_mask_drawing(canvas, 1, 0).unwrap();
    editor.mask_brush(&[Point::new(8.0, 8.0)], 2.0).unwrap();
    let id = editor
        .finish_mask(&mut store, &mut NullObserver)
        .unwrap()
        .unwrap();
    let original = match &store.get(id).unwrap().data {
        ObjectData::Shape(shape) => shape.mask.clone().unwrap(),
        _ => panic!("expected shape"),
    };

    editor.start_mask_editing(&store, canvas, id).unwrap();
    editor.mask_brush(&[Point::new(25.0, 25.0)], 2.0).unwrap();
    assert!(editor.mask_undo().unwrap());
    editor.finish_mask(&mut store, &mut NullObserver).unwrap();

    let after = match &store.get(id).unwrap().data {
        ObjectData::Shape(shape) => shape.mask.clone().unwrap(),
        _ => panic!("expected shape"),
    };
    assert_eq!(after, original);
}

#[test]
fn slicing_a_mask_reassigns_every_pixel() {
    let mut editor = Editor::new();
    let mut store = make_store();
    let canvas = Canvas::new(64, 64).unwrap();

    editor.start_mask_drawing(canvas, 1, 0).unwrap();
    editor
        .mask_polygon_plus(&[
            Point::new(10.0, 10.0),
            Point::new(40.0, 10.0),
            Point::new(40.0, 30.0),
            Point::new(10.0, 30.0),
        ])
        .unwrap();
    let id = editor
        .finish_mask(&mut store, &mut NullObserver)
        .unwrap()
        .unwrap();
    let total = match &store.get(id).unwrap().data {
        ObjectData::Shape(shape) => shape.mask.as_ref().unwrap().area(),
        _ => panic!("expected shape"),
    };

    editor.start_slicing(&store, id).unwrap();
    let (a, b) = editor
        .apply_slice(
            &mut store,
            &mut NullObserver,
            &[Point::new(25.0, 5.0), Point::new(25.0, 35.0)],
        )
        .unwrap();

    let area = |cid| match &store.get(cid).unwrap().data {
        ObjectData::Shape(shape) => shape.mask.as_ref().unwrap().area(),
        _ => panic!("expected shape"),
    };
    // Cut pixels are reassigned, never dropped.
    assert_eq!(area(a) + area(b), total);
    assert!(area(a) > 0 && area(b) > 0);
}
