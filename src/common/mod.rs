pub mod geometry;
pub mod raw_image;

pub use geometry::{Rect, Size};
pub use raw_image::RawImage;
