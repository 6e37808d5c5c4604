//! Spiral vase post-processing for layered G-code.
//!
//! Each layer's single perimeter loop is rewritten so Z climbs continuously with the XY distance
//! extruded, instead of stepping up once per layer. Optionally the XY path is blended toward the
//! previous layer's path so the loops meet without a visible seam.

pub mod config;
pub mod error;
pub mod gcode;
pub mod geometry;
pub mod job;
pub mod nearest;
pub mod spiral_vase;

// This way we can switch to f64 easily for comparing memory and performance.
pub type Mm = f32;
pub type Factor = f32;
pub type PointIndex = u32;

pub use config::{JobConfig, SpiralVaseConfig};
pub use error::{Result, SpiralVaseError};
pub use gcode::{Axis, GcodeLine, GcodeReader};
pub use geometry::Point;
pub use job::SpiralVaseJob;
pub use nearest::{Reference, ReferenceFinder, ReferenceSearch};
pub use spiral_vase::{LayerFlags, LayerMeasurement, SpiralVase};
