#![forbid(unsafe_code)]

pub mod approx;
pub mod core;
pub mod decode;
pub mod editor;
pub mod error;
pub mod mask;
pub mod preview;
pub mod shape;
pub mod state;
pub mod track;
pub mod view;
pub mod wire;

pub use crate::core::{Canvas, ClientId, FrameNumber, Label, ShapeType};
pub use decode::{DecodeContext, RawFrame};
pub use editor::{Editor, EditorState};
pub use error::{CanvasError, CanvasResult};
pub use shape::Shape;
pub use state::{AnnotationStore, EngineObserver, ObjectUpdate, ShapeView};
pub use track::Track;
pub use view::ViewState;
