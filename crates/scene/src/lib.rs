//! Scene representation for the ember renderer.
//!
//! - [`Transform`]: local position, rotation and scale
//! - [`SceneGraph`]: an index-based node arena with parent links and cached
//!   world matrices

pub mod graph;
pub mod transform;

pub use graph::{NodeId, SceneError, SceneGraph};
pub use transform::{Transform, normal_matrix};
