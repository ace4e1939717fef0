use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Puts pixels upright before any analyzer sees them.
pub struct OrientationNormalizer;

impl OrientationNormalizer {
    /// Applies an EXIF orientation value (1..=8). Unknown values leave the image as is.
    pub fn normalize(image: DynamicImage, orientation: u32) -> DynamicImage {
        if orientation != 1 {
            debug!("Normalizing EXIF orientation {}", orientation);
        }
        match orientation {
            2 => image.fliph(),
            3 => image.rotate180(),
            4 => image.flipv(),
            5 => image.rotate90().fliph(),
            6 => image.rotate90(),
            7 => image.rotate270().fliph(),
            8 => image.rotate270(),
            _ => image,
        }
    }
}

/// Reads the EXIF orientation tag, defaulting to 1 when absent or unreadable.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(reader) => reader,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .unwrap_or(1)
}
