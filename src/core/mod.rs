//! Numeric primitives behind focus ranking: grid mapping and foreground scoring.

pub mod foreground;
pub mod grid;

pub use foreground::{ForegroundClassifier, StagedPipeline, FOREGROUND_THRESHOLD};
pub use grid::{FocusRect, GridCell, GridCoordinateMapper, GridShape, ImageShape};
