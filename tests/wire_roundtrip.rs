use trackcanvas::state::ObjectType;
use trackcanvas::wire::WireAnnotations;
use trackcanvas::{AnnotationStore, Label};
use trackcanvas::core::{AttributeInput, AttributeSpec};

fn labels() -> Vec<Label> {
    vec![
        Label {
            id: 1,
            name: "person".into(),
            color: Some("#24aee3".into()),
            attributes: vec![
                AttributeSpec {
                    id: 10,
                    name: "pose".into(),
                    mutable: true,
                    input: AttributeInput::Select,
                    values: vec!["standing".into(), "sitting".into()],
                },
                AttributeSpec {
                    id: 11,
                    name: "rigid".into(),
                    mutable: false,
                    input: AttributeInput::Checkbox,
                    values: vec![],
                },
            ],
        },
        Label {
            id: 2,
            name: "weather".into(),
            color: None,
            attributes: vec![AttributeSpec {
                id: 20,
                name: "condition".into(),
                mutable: false,
                input: AttributeInput::Text,
                values: vec![],
            }],
        },
    ]
}

#[test]
fn json_fixture_imports_and_round_trips() {
    let payload: WireAnnotations =
        serde_json::from_str(include_str!("data/job_annotations.json")).unwrap();

    let mut store = AnnotationStore::new(labels(), 0, 100).unwrap();
    let ids = store.import(&payload).unwrap();
    assert_eq!(ids.len(), 5);

    // Canonical form serializes back to exactly the payload we loaded.
    assert_eq!(store.export(), payload);
}

#[test]
fn imported_objects_expose_expected_state() {
    let payload: WireAnnotations =
        serde_json::from_str(include_str!("data/job_annotations.json")).unwrap();
    let mut store = AnnotationStore::new(labels(), 0, 100).unwrap();
    let ids = store.import(&payload).unwrap();

    let types: Vec<ObjectType> = ids
        .iter()
        .map(|&id| store.get(id).unwrap().object_type())
        .collect();
    assert_eq!(
        types,
        vec![
            ObjectType::Tag,
            ObjectType::Shape,
            ObjectType::Shape,
            ObjectType::Shape,
            ObjectType::Track,
        ]
    );

    // The mask shape carries its decoded RLE payload.
    let mask_view = store.read(ids[3], 3).unwrap().unwrap();
    assert_eq!(mask_view.mask.as_ref().unwrap().area(), 4);
    assert!(mask_view.points.is_empty());

    // Track interpolation merges mutable keyframe attributes with the
    // immutable track-level ones.
    let track_view = store.read(ids[4], 5).unwrap().unwrap();
    assert_eq!(track_view.attributes.get(&10).unwrap(), "standing");
    assert_eq!(track_view.attributes.get(&11).unwrap(), "true");
    assert!(!track_view.keyframe);
}

#[test]
fn import_rejects_unknown_labels() {
    let payload: WireAnnotations =
        serde_json::from_str(include_str!("data/job_annotations.json")).unwrap();
    let mut store = AnnotationStore::new(labels()[..1].to_vec(), 0, 100).unwrap();
    assert!(store.import(&payload).is_err());
}
