mod blas;
mod tlas;

pub use blas::*;
pub use tlas::*;
