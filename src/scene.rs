mod animator;
mod geometry;
pub mod import;
mod instance;
mod vertex;

pub use animator::*;
pub use geometry::*;
pub use instance::*;
pub use vertex::*;
