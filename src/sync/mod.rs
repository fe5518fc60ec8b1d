pub mod communicator;
pub mod gradient;
pub mod image;

pub use communicator::*;
pub use gradient::*;
pub use image::*;
