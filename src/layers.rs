//! Ready-made layers.

pub mod model_viewer;

pub use model_viewer::ModelViewerLayer;
